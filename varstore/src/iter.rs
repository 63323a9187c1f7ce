// Variable name enumeration
// Wraps GetNextVariableName with a grow-on-demand name buffer

use crate::storage::VariableStorage;
use alloc::vec;
use alloc::vec::Vec;
use shared::{EfiError, Guid, Result};
use uefi::{CStr16, CString16};

/// Initial name buffer capacity in UTF-16 units (128 bytes)
pub const DEFAULT_NAME_CAPACITY: usize = 64;

/// Advance the enumeration cursor held in `name` and `vendor`.
///
/// If the storage reports that `name` is too small, the buffer is grown to
/// exactly the reported size (keeping the cursor it holds) and the call is
/// retried once. A second "too small" answer is a protocol violation and
/// surfaces as `OutOfResources`. `NotFound` marks the end of the sequence.
pub fn next_variable_name<S: VariableStorage + ?Sized>(
    storage: &S,
    name: &mut Vec<u16>,
    vendor: &mut Guid,
) -> Result<()> {
    match storage.next_variable_name(name, vendor) {
        Err(EfiError::BufferTooSmall { required }) => {
            grow(name, required)?;
            match storage.next_variable_name(name, vendor) {
                Err(EfiError::BufferTooSmall { required }) => {
                    log::warn!("variable store still wants {} units after growing", required);
                    Err(EfiError::OutOfResources)
                }
                other => other,
            }
        }
        other => other,
    }
}

fn grow(name: &mut Vec<u16>, required: usize) -> Result<()> {
    if required > name.len() {
        name.try_reserve_exact(required - name.len())
            .map_err(|_| EfiError::OutOfResources)?;
    }
    name.resize(required, 0);
    Ok(())
}

/// One enumerated variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableKey {
    pub name: CString16,
    pub vendor: Guid,
}

/// Lazy enumeration of every `(name, vendor)` pair in a store.
///
/// Each instance starts from the beginning; the only state carried between
/// calls is the cursor in its own name buffer.
pub struct VariableNames<'s, S: VariableStorage + ?Sized> {
    storage: &'s S,
    name: Vec<u16>,
    vendor: Guid,
    finished: bool,
}

impl<'s, S: VariableStorage + ?Sized> VariableNames<'s, S> {
    pub fn new(storage: &'s S) -> Self {
        Self::with_capacity(storage, DEFAULT_NAME_CAPACITY)
    }

    /// Start with a name buffer of `capacity` units
    pub fn with_capacity(storage: &'s S, capacity: usize) -> Self {
        Self {
            storage,
            name: vec![0; capacity],
            vendor: Guid::ZERO,
            finished: false,
        }
    }

    /// Current size of the name buffer in units
    pub fn buffer_len(&self) -> usize {
        self.name.len()
    }

    fn current_key(&self) -> Result<VariableKey> {
        let end = self
            .name
            .iter()
            .position(|&unit| unit == 0)
            .ok_or(EfiError::DeviceError)?;
        let name = CStr16::from_u16_with_nul(&self.name[..=end]).map_err(|_| EfiError::DeviceError)?;
        Ok(VariableKey {
            name: CString16::from(name),
            vendor: self.vendor,
        })
    }
}

impl<S: VariableStorage + ?Sized> Iterator for VariableNames<'_, S> {
    type Item = Result<VariableKey>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match next_variable_name(self.storage, &mut self.name, &mut self.vendor) {
            Ok(()) => Some(self.current_key()),
            Err(EfiError::NotFound) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}
