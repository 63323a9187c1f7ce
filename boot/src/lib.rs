#![no_std]

// Boot crate
// Load options, boot option resolution and initrd delivery through LoadFile2

extern crate alloc;

pub mod boot_option;
pub mod config;
pub mod load_file2;
pub mod load_option;

pub use boot_option::{indexed_name, is_load_option_name, BootManager};
pub use config::BootManagerConfig;
pub use load_file2::{BlobSource, InitrdLoadFile2, InitrdProtocol, LoadFile2Protocol};
pub use load_option::{DevicePathList, LoadOption, TaggedPath};
