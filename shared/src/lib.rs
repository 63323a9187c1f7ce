#![no_std]

// Shared crate for the boot manager core
// Common types shared across crates: GUIDs, error kinds, device paths and memory maps

extern crate alloc;

pub mod device_path;
pub mod error;
pub mod guid;
pub mod memory;

// Re-export shared types
pub use device_path::{DevicePath, DevicePathBuilder, DevicePathNode, DeviceSubType, DeviceType};
pub use error::{EfiError, Result};
pub use guid::{EFI_FDT_GUID, GLOBAL_VARIABLE_GUID, LINUX_EFI_INITRD_MEDIA_GUID, LOAD_FILE2_PROTOCOL_GUID};
pub use memory::{MemoryMap, RuntimeRegion, PAGE_SIZE};
pub use uefi::Guid;
