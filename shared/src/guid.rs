// Well-known GUIDs used by the boot manager

use uefi::{guid, Guid};

/// Vendor GUID of the architectural variables (`BootCurrent`, `BootOrder`, `Boot####`)
pub const GLOBAL_VARIABLE_GUID: Guid = guid!("8be4df61-93ca-11d2-aa0d-00e098032b8c");

/// Vendor media GUID tagging the initrd device path of a load option.
///
/// The same GUID identifies the handle that serves the initrd through
/// `EFI_LOAD_FILE2_PROTOCOL`.
pub const LINUX_EFI_INITRD_MEDIA_GUID: Guid = guid!("5568e427-68fc-4f3d-ac74-ca555231cc68");

/// Vendor media GUID tagging the device-tree device path of a load option
pub const EFI_FDT_GUID: Guid = guid!("b1b621d5-f19c-41a5-830b-d9152c69aae0");

/// `EFI_LOAD_FILE2_PROTOCOL` GUID
pub const LOAD_FILE2_PROTOCOL_GUID: Guid = guid!("4006c0c1-fcb3-403e-996d-4a6c8724e06d");
