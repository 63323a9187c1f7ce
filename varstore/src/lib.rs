#![no_std]

// Variable store crate
// Storage collaborator abstraction for EFI variables and the grow-on-demand name iterator

extern crate alloc;

pub mod iter;
pub mod storage;

pub use iter::{next_variable_name, VariableKey, VariableNames, DEFAULT_NAME_CAPACITY};
pub use storage::memory::MemoryVariableStore;
pub use storage::{read_variable, VariableStorage, MAX_VARIABLE_SIZE};
pub use uefi::table::runtime::VariableAttributes;

#[cfg(any(target_os = "uefi", feature = "uefi"))]
pub use storage::efi::UefiVariableStorage;
