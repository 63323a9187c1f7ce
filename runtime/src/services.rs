// Runtime service entry points
// Firmware-ABI shims over the process-wide runtime context

use crate::context::RuntimeContext;
use core::ffi::c_void;
use shared::error::status_of;
use shared::EfiError;
use uefi::table::boot::MemoryDescriptor;
use uefi::Status;

/// Process-wide runtime context used by the firmware entry points
pub static RUNTIME: RuntimeContext = RuntimeContext::new();

/// `SetVirtualAddressMap` as installed in the runtime services table.
///
/// # Safety
///
/// `virtual_map` must point to `memory_map_size` readable bytes, or be null
/// with a size of zero.
pub unsafe extern "efiapi" fn efi_set_virtual_address_map(
    memory_map_size: usize,
    descriptor_size: usize,
    descriptor_version: u32,
    virtual_map: *const MemoryDescriptor,
) -> Status {
    let bytes: &[u8] = if virtual_map.is_null() {
        if memory_map_size != 0 {
            return Status::INVALID_PARAMETER;
        }
        &[]
    } else {
        core::slice::from_raw_parts(virtual_map.cast::<u8>(), memory_map_size)
    };
    status_of(RUNTIME.set_virtual_address_map(bytes, descriptor_size, descriptor_version))
}

/// `ConvertPointer` as installed in the runtime services table.
///
/// # Safety
///
/// `address` must be null or point to a writable pointer slot.
pub unsafe extern "efiapi" fn efi_convert_pointer(
    debug_disposition: usize,
    address: *mut *const c_void,
) -> Status {
    if address.is_null() {
        return EfiError::InvalidParameter.status();
    }
    let mut value = *address as usize as u64;
    let status = status_of(RUNTIME.convert_pointer(debug_disposition, &mut value));
    if status.is_success() {
        *address = value as usize as *const c_void;
    }
    status
}
