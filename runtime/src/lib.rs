#![no_std]

// Runtime crate
// One-shot physical to virtual address switch and pointer relocation for runtime services

extern crate alloc;

pub mod context;
pub mod services;

pub use context::{AddressMap, RuntimeContext, RuntimePhase, OPTIONAL_PTR};
pub use services::{efi_convert_pointer, efi_set_virtual_address_map, RUNTIME};
