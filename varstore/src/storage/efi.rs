// EFI variable storage implementation
// Reaches the platform variable store through the firmware's runtime services

use super::cursor::KeySnapshot;
use super::VariableStorage;
use alloc::vec::Vec;
use shared::{EfiError, Guid, Result};
use uefi::table::runtime::{VariableAttributes, VariableVendor};
use uefi::table::{Runtime, SystemTable};
use uefi::{CStr16, Status};

/// Variable storage backed by `SystemTable<Runtime>`
///
/// Usable from both boot services and runtime, as long as the system table
/// pointer itself has been converted after the virtual address switch.
///
/// The safe runtime API only lists every key at once. The list is fetched
/// when an enumeration starts from an empty cursor and reused until the
/// next [`VariableStorage::set_variable`], so one full walk costs a single
/// listing. Variables written by other agents during a walk are not seen
/// until it restarts.
pub struct UefiVariableStorage {
    /// System table reference
    system_table: &'static SystemTable<Runtime>,
    keys: KeySnapshot,
}

impl UefiVariableStorage {
    /// Create a new storage instance
    pub fn new(system_table: &'static SystemTable<Runtime>) -> Self {
        Self {
            system_table,
            keys: KeySnapshot::new(),
        }
    }

    fn runtime_services(&self) -> &uefi::table::runtime::RuntimeServices {
        // Safety: the system table is provided by firmware and outlives us
        unsafe { self.system_table.runtime_services() }
    }

    fn list_keys(&self) -> Result<Vec<(Vec<u16>, Guid)>> {
        let keys = self
            .runtime_services()
            .variable_keys()
            .map_err(|err| EfiError::from_status(err.status()))?;

        let mut listed = Vec::new();
        listed
            .try_reserve_exact(keys.len())
            .map_err(|_| EfiError::OutOfResources)?;
        for key in keys {
            match key.name() {
                Ok(name) => listed.push((name.to_u16_slice_with_nul().to_vec(), key.vendor.0)),
                Err(_) => log::warn!("Skipping variable with malformed name under {}", key.vendor.0),
            }
        }
        Ok(listed)
    }
}

impl VariableStorage for UefiVariableStorage {
    fn get_variable(
        &self,
        name: &CStr16,
        vendor: &Guid,
        buf: &mut [u8],
    ) -> Result<(VariableAttributes, usize)> {
        let vendor = VariableVendor(*vendor);
        match self.runtime_services().get_variable(name, &vendor, buf) {
            Ok((data, attributes)) => Ok((attributes, data.len())),
            Err(err) if err.status() == Status::BUFFER_TOO_SMALL => Err(EfiError::BufferTooSmall {
                required: err.data().unwrap_or(0),
            }),
            Err(err) => Err(EfiError::from_status(err.status())),
        }
    }

    fn next_variable_name(&self, name: &mut [u16], vendor: &mut Guid) -> Result<()> {
        self.keys.advance(|| self.list_keys(), name, vendor)
    }

    fn set_variable(
        &mut self,
        name: &CStr16,
        vendor: &Guid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<()> {
        self.keys.invalidate();
        let vendor = VariableVendor(*vendor);
        self.runtime_services()
            .set_variable(name, &vendor, attributes, data)
            .map_err(|err| {
                log::warn!("SetVariable({}) failed: {:?}", name, err.status());
                EfiError::from_status(err.status())
            })
    }
}
