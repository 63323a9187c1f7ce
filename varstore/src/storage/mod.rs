// Variable storage abstraction
// Provides the trait the boot manager uses to reach the platform's variable store

mod cursor;
#[cfg(any(target_os = "uefi", feature = "uefi"))]
pub mod efi;
pub mod memory;

use alloc::vec::Vec;
use shared::{EfiError, Guid, Result};
use uefi::table::runtime::VariableAttributes;
use uefi::CStr16;

/// EFI variable size limit accepted by [`read_variable`] by default (64KB)
pub const MAX_VARIABLE_SIZE: usize = 64 * 1024;

/// Trait for variable storage backends
///
/// Mirrors the `GetVariable`/`GetNextVariableName`/`SetVariable` runtime
/// services. Sizes reported through [`EfiError::BufferTooSmall`] are in
/// bytes for variable data and in UTF-16 units for names.
pub trait VariableStorage {
    /// Copy the data of `(name, vendor)` into `buf`.
    ///
    /// Returns the attributes and the data length, `NotFound` if the variable
    /// does not exist, or `BufferTooSmall` with the data length if `buf` is short.
    fn get_variable(
        &self,
        name: &CStr16,
        vendor: &Guid,
        buf: &mut [u8],
    ) -> Result<(VariableAttributes, usize)>;

    /// Advance the enumeration cursor held in `name`/`vendor`.
    ///
    /// `name` holds the previous NUL-terminated name on entry (an empty name
    /// starts from the beginning) and the next one on success. Returns
    /// `NotFound` after the last variable and `BufferTooSmall` with the
    /// required length, terminator included, when `name` cannot hold it.
    fn next_variable_name(&self, name: &mut [u16], vendor: &mut Guid) -> Result<()>;

    /// Create, replace or (with empty `data`) delete a variable
    fn set_variable(
        &mut self,
        name: &CStr16,
        vendor: &Guid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<()>;
}

/// Read a whole variable: query its size, allocate, then fetch it.
///
/// Variables larger than `max_size` are refused with `OutOfResources`.
pub fn read_variable<S: VariableStorage + ?Sized>(
    storage: &S,
    name: &CStr16,
    vendor: &Guid,
    max_size: usize,
) -> Result<Vec<u8>> {
    let required = match storage.get_variable(name, vendor, &mut []) {
        Ok(_) => return Ok(Vec::new()),
        Err(EfiError::BufferTooSmall { required }) => required,
        Err(err) => return Err(err),
    };
    if required > max_size {
        log::warn!("variable {} is {} bytes, limit is {}", name, required, max_size);
        return Err(EfiError::OutOfResources);
    }

    let mut data = Vec::new();
    data.try_reserve_exact(required)
        .map_err(|_| EfiError::OutOfResources)?;
    data.resize(required, 0);

    let (_, len) = storage.get_variable(name, vendor, &mut data)?;
    data.truncate(len);
    Ok(data)
}
