// Boot manager configuration

use shared::{Guid, LINUX_EFI_INITRD_MEDIA_GUID};
use varstore::{DEFAULT_NAME_CAPACITY, MAX_VARIABLE_SIZE};

/// Tunables for [`crate::BootManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootManagerConfig {
    /// Initial variable-name buffer capacity, in UTF-16 units
    pub name_capacity: usize,
    /// Largest variable the manager agrees to read, in bytes
    pub max_variable_size: usize,
    /// Vendor media GUID tagging the initrd device path
    pub initrd_guid: Guid,
}

impl Default for BootManagerConfig {
    fn default() -> Self {
        Self {
            name_capacity: DEFAULT_NAME_CAPACITY,
            max_variable_size: MAX_VARIABLE_SIZE,
            initrd_guid: LINUX_EFI_INITRD_MEDIA_GUID,
        }
    }
}
