// Error kinds shared by every crate of the boot manager core

use thiserror::Error;
use uefi::proto::device_path::build::BuildError;
use uefi::Status;

/// Boot manager errors
///
/// Each kind maps onto exactly one UEFI status code, see [`EfiError::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EfiError {
    #[error("Invalid parameter")]
    InvalidParameter,

    /// Recoverable: retry with a buffer of `required` units.
    #[error("Buffer too small: {required} required")]
    BufferTooSmall { required: usize },

    #[error("Operation not supported")]
    Unsupported,

    #[error("Not found")]
    NotFound,

    #[error("Out of resources")]
    OutOfResources,

    #[error("Device error")]
    DeviceError,
}

/// Result alias used throughout the workspace
pub type Result<T> = core::result::Result<T, EfiError>;

impl EfiError {
    /// UEFI status code for this error
    pub fn status(&self) -> Status {
        match self {
            EfiError::InvalidParameter => Status::INVALID_PARAMETER,
            EfiError::BufferTooSmall { .. } => Status::BUFFER_TOO_SMALL,
            EfiError::Unsupported => Status::UNSUPPORTED,
            EfiError::NotFound => Status::NOT_FOUND,
            EfiError::OutOfResources => Status::OUT_OF_RESOURCES,
            EfiError::DeviceError => Status::DEVICE_ERROR,
        }
    }

    /// Map a firmware status back to an error kind.
    ///
    /// `BUFFER_TOO_SMALL` carries no size here; callers that know the
    /// required size build the variant themselves.
    pub fn from_status(status: Status) -> Self {
        match status {
            Status::INVALID_PARAMETER => EfiError::InvalidParameter,
            Status::BUFFER_TOO_SMALL => EfiError::BufferTooSmall { required: 0 },
            Status::UNSUPPORTED => EfiError::Unsupported,
            Status::NOT_FOUND => EfiError::NotFound,
            Status::OUT_OF_RESOURCES => EfiError::OutOfResources,
            _ => EfiError::DeviceError,
        }
    }
}

impl From<EfiError> for Status {
    fn from(err: EfiError) -> Self {
        err.status()
    }
}

impl From<BuildError> for EfiError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::BufferTooSmall => EfiError::OutOfResources,
            BuildError::NodeTooBig | BuildError::UnexpectedEndEntire => EfiError::InvalidParameter,
        }
    }
}

/// Convert a unit result into the status returned across the firmware ABI
pub fn status_of(result: Result<()>) -> Status {
    match result {
        Ok(()) => Status::SUCCESS,
        Err(err) => err.status(),
    }
}
