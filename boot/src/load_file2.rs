// LoadFile2 initrd handler
// Serves a resident initrd image to the OS loader, addressed by VenMedia(initrd)/End

use crate::boot_option::BootManager;
use alloc::vec::Vec;
use core::ffi::c_void;
use runtime::RuntimeContext;
use shared::device_path::{match_end, DevicePathNode, HEADER_SIZE};
use shared::error::status_of;
use shared::{
    DevicePath, DevicePathBuilder, EfiError, Guid, Result, LINUX_EFI_INITRD_MEDIA_GUID,
    LOAD_FILE2_PROTOCOL_GUID,
};
use uefi::Status;
use varstore::VariableStorage;

/// Collaborator that reads a file named by a device path into memory
pub trait BlobSource {
    fn read_blob(&self, path: &DevicePath) -> Result<Vec<u8>>;
}

impl<F> BlobSource for F
where
    F: Fn(&DevicePath) -> Result<Vec<u8>>,
{
    fn read_blob(&self, path: &DevicePath) -> Result<Vec<u8>> {
        self(path)
    }
}

/// Initrd provider behind a LoadFile2 handle.
///
/// The handle's device path is `VenMedia(guid)/End`. The loader locates the
/// handle by that path and passes the remaining path, a bare End node, to
/// [`Self::load_file`]. Calls are stateless; the blob never changes.
#[derive(Debug, Clone)]
pub struct InitrdLoadFile2 {
    device_path: DevicePath,
    blob: Vec<u8>,
}

impl InitrdLoadFile2 {
    /// Serve `blob` under the Linux initrd media GUID
    pub fn new(blob: Vec<u8>) -> Result<Self> {
        Self::with_guid(&LINUX_EFI_INITRD_MEDIA_GUID, blob)
    }

    pub fn with_guid(guid: &Guid, blob: Vec<u8>) -> Result<Self> {
        let device_path = DevicePathBuilder::new().push_vendor_media(guid, &[])?.finish();
        Ok(Self { device_path, blob })
    }

    /// Resolve the initrd of the current boot option and load it.
    ///
    /// Fails with the resolver's error when `BootCurrent`, the option or the
    /// initrd tag is missing, and with the source's error when the read fails.
    pub fn from_boot_option<S: VariableStorage>(
        manager: &BootManager<S>,
        source: &impl BlobSource,
    ) -> Result<Self> {
        let path = manager.initrd_path()?;
        let blob = source.read_blob(&path)?;
        log::info!("initrd {} staged, {} bytes", path, blob.len());
        Self::with_guid(&manager.config().initrd_guid, blob)
    }

    /// Device path of the handle
    pub fn device_path(&self) -> &DevicePath {
        &self.device_path
    }

    /// Size of the blob in bytes
    pub fn size(&self) -> usize {
        self.blob.len()
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// Remaining path if `path` addresses this handle, `None` otherwise
    pub fn locate(&self, path: &DevicePath) -> Option<DevicePath> {
        path.strip_prefix(&self.device_path)
    }

    /// Copy the blob into `buffer`.
    ///
    /// `file_path` is the path remaining after the handle's own path and
    /// must start with an End-of-entire-path node of exactly
    /// [`HEADER_SIZE`] bytes. `buffer_size` holds the
    /// caller's buffer size on entry and the blob size on return. A missing
    /// or short buffer is `BufferTooSmall` and nothing is written.
    pub fn load_file(
        &self,
        file_path: &[u8],
        boot_policy: bool,
        buffer_size: &mut usize,
        buffer: Option<&mut [u8]>,
    ) -> Result<()> {
        if boot_policy {
            return Err(EfiError::Unsupported);
        }

        let node = DevicePathNode::read(file_path)?;
        let end = self.device_path.end_node();
        if !match_end(&node, end.node_type(), end.sub_type()) || node.length() != end.length() {
            log::debug!(
                "LoadFile2: rejecting path node {:#04x}/{:#04x} of {} bytes",
                node.node_type().0,
                node.sub_type().0,
                node.length()
            );
            return Err(EfiError::InvalidParameter);
        }

        let required = self.blob.len();
        let capacity = *buffer_size;
        *buffer_size = required;
        match buffer {
            Some(buffer) if capacity >= required && buffer.len() >= required => {
                buffer[..required].copy_from_slice(&self.blob);
                log::debug!("LoadFile2: delivered {} bytes", required);
                Ok(())
            }
            _ => Err(EfiError::BufferTooSmall { required }),
        }
    }
}

/// `EFI_LOAD_FILE2_PROTOCOL.LoadFile`
pub type LoadFileFn = unsafe extern "efiapi" fn(
    this: *mut LoadFile2Protocol,
    file_path: *const u8,
    boot_policy: u8,
    buffer_size: *mut usize,
    buffer: *mut c_void,
) -> Status;

/// `EFI_LOAD_FILE2_PROTOCOL` as seen by the OS loader
#[repr(C)]
pub struct LoadFile2Protocol {
    pub load_file: LoadFileFn,
}

impl LoadFile2Protocol {
    /// Protocol GUID the interface is installed under
    pub const GUID: Guid = LOAD_FILE2_PROTOCOL_GUID;
}

/// Tag following the public protocol in every [`InitrdProtocol`]
const INITRD_PROTOCOL_SIGNATURE: u64 = u64::from_le_bytes(*b"LF2INITR");

/// Protocol interface installed on the initrd handle.
///
/// The public protocol comes first so a `*mut LoadFile2Protocol` handed out
/// to the loader can be cast back to the whole instance. The entry point
/// must only be called with the interface pointer of an `InitrdProtocol`;
/// the signature after the protocol rejects other instances sharing the
/// entry point layout.
#[repr(C)]
pub struct InitrdProtocol {
    protocol: LoadFile2Protocol,
    signature: u64,
    handler: InitrdLoadFile2,
}

impl InitrdProtocol {
    pub fn new(handler: InitrdLoadFile2) -> Self {
        Self {
            protocol: LoadFile2Protocol {
                load_file: initrd_load_file,
            },
            signature: INITRD_PROTOCOL_SIGNATURE,
            handler,
        }
    }

    pub fn handler(&self) -> &InitrdLoadFile2 {
        &self.handler
    }

    pub fn protocol(&self) -> &LoadFile2Protocol {
        &self.protocol
    }

    /// Interface pointer to install on the handle
    pub fn as_protocol_ptr(&mut self) -> *mut LoadFile2Protocol {
        &mut self.protocol
    }

    /// Have the protocol's function pointer converted when the firmware
    /// switches to virtual addressing.
    ///
    /// # Safety
    ///
    /// `self` must stay at its current address until the transition has run.
    pub unsafe fn relocate_on_address_change(&mut self, ctx: &RuntimeContext) -> Result<()> {
        let slot = &mut self.protocol.load_file as *mut LoadFileFn as usize;
        ctx.register_address_change(move |ctx| {
            let slot = slot as *mut LoadFileFn;
            // SAFETY: the caller keeps the protocol in place until now.
            let mut address = unsafe { *slot } as usize as u64;
            match ctx.convert_pointer(0, &mut address) {
                Ok(()) => unsafe {
                    *slot = core::mem::transmute::<usize, LoadFileFn>(address as usize);
                },
                Err(err) => log::warn!("LoadFile2: cannot relocate entry point ({})", err),
            }
        })
    }
}

/// `this` must be the interface pointer of an [`InitrdProtocol`]. Only the
/// node header of `file_path` is read; the handle owns no deeper path.
unsafe extern "efiapi" fn initrd_load_file(
    this: *mut LoadFile2Protocol,
    file_path: *const u8,
    boot_policy: u8,
    buffer_size: *mut usize,
    buffer: *mut c_void,
) -> Status {
    if this.is_null() || buffer_size.is_null() {
        return EfiError::InvalidParameter.status();
    }
    let instance = &*(this as *const InitrdProtocol);
    if instance.signature != INITRD_PROTOCOL_SIGNATURE {
        log::warn!("LoadFile2: interface is not an initrd protocol");
        return EfiError::InvalidParameter.status();
    }

    // Only the header is read; `load_file` rejects a node longer than that.
    let path: &[u8] = if file_path.is_null() {
        &[]
    } else {
        core::slice::from_raw_parts(file_path, HEADER_SIZE)
    };
    let out = if buffer.is_null() {
        None
    } else {
        Some(core::slice::from_raw_parts_mut(buffer.cast::<u8>(), *buffer_size))
    };

    status_of(
        instance
            .handler
            .load_file(path, boot_policy != 0, &mut *buffer_size, out),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use shared::{DeviceSubType, DeviceType};

    const END: [u8; 4] = [0x7f, 0xff, 4, 0];

    fn handler() -> InitrdLoadFile2 {
        InitrdLoadFile2::new((0..=255u8).cycle().take(1000).collect()).unwrap()
    }

    #[test]
    fn test_device_path_is_vendor_media_end() {
        let handler = handler();
        let path = handler.device_path();
        assert_eq!(path.nodes().count(), 1);
        assert_eq!(path.first_node().unwrap().vendor_guid(), Some(LINUX_EFI_INITRD_MEDIA_GUID));
        assert_eq!(path.as_bytes().len(), 4 + 16 + 4);
    }

    #[test]
    fn test_size_query() {
        let handler = handler();
        let mut size = 0;
        assert_eq!(
            handler.load_file(&END, false, &mut size, None),
            Err(EfiError::BufferTooSmall { required: 1000 })
        );
        assert_eq!(size, 1000);
    }

    #[test]
    fn test_short_buffer_is_untouched() {
        let handler = handler();
        let mut buffer = vec![0xaa; 999];
        let mut size = buffer.len();
        assert_eq!(
            handler.load_file(&END, false, &mut size, Some(&mut buffer)),
            Err(EfiError::BufferTooSmall { required: 1000 })
        );
        assert_eq!(size, 1000);
        assert!(buffer.iter().all(|&b| b == 0xaa));
    }

    #[test]
    fn test_full_read() {
        let handler = handler();
        let mut buffer = vec![0; 1024];
        let mut size = buffer.len();
        handler.load_file(&END, false, &mut size, Some(&mut buffer)).unwrap();
        assert_eq!(size, 1000);
        assert_eq!(&buffer[..1000], handler.blob());
        assert!(buffer[1000..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_boot_policy_is_unsupported() {
        let handler = handler();
        let mut buffer = vec![0; 1000];
        let mut size = buffer.len();
        assert_eq!(
            handler.load_file(&END, true, &mut size, Some(&mut buffer)),
            Err(EfiError::Unsupported)
        );
        assert_eq!(handler.load_file(&[], true, &mut size, None), Err(EfiError::Unsupported));
    }

    #[test]
    fn test_end_type_and_subtype_checked() {
        let handler = handler();
        let mut size = 0;
        let wrong_subtype = [DeviceType::END.0, DeviceSubType::END_INSTANCE.0, 4, 0];
        let wrong_type = [0x04, 0xff, 4, 0];
        assert_eq!(
            handler.load_file(&wrong_subtype, false, &mut size, None),
            Err(EfiError::InvalidParameter)
        );
        assert_eq!(
            handler.load_file(&wrong_type, false, &mut size, None),
            Err(EfiError::InvalidParameter)
        );
        assert_eq!(
            handler.load_file(&[0x7f, 0xff, 2, 0], false, &mut size, None),
            Err(EfiError::InvalidParameter)
        );
        assert_eq!(size, 0);
    }

    #[test]
    fn test_end_node_must_be_header_only() {
        let handler = handler();
        let mut buffer = vec![0u8; 1000];
        let mut size = buffer.len();
        let padded_end = [0x7f, 0xff, 0x08, 0x00, 0, 0, 0, 0];
        assert_eq!(
            handler.load_file(&padded_end, false, &mut size, Some(&mut buffer)),
            Err(EfiError::InvalidParameter)
        );
        assert_eq!(size, 1000);
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_raw_entry_ignores_oversized_length_field() {
        let mut protocol = InitrdProtocol::new(handler());
        let this = protocol.as_protocol_ptr();
        let load_file = protocol.protocol().load_file;

        // Four bytes of memory, header claiming 0xfff0
        let lying_end = alloc::boxed::Box::new([0x7fu8, 0xff, 0xf0, 0xff]);
        let mut size = 0usize;
        let status = unsafe {
            load_file(this, lying_end.as_ptr(), 0, &mut size, core::ptr::null_mut())
        };
        assert_eq!(status, Status::INVALID_PARAMETER);
        assert_eq!(size, 0);
    }

    #[test]
    fn test_raw_entry_rejects_foreign_interface() {
        let mut protocol = InitrdProtocol::new(handler());
        protocol.signature = 0;
        let this = protocol.as_protocol_ptr();
        let load_file = protocol.protocol().load_file;
        let mut size = 0usize;

        let status = unsafe { load_file(this, END.as_ptr(), 0, &mut size, core::ptr::null_mut()) };
        assert_eq!(status, Status::INVALID_PARAMETER);
        assert_eq!(size, 0);
    }

    #[test]
    fn test_locate() {
        let handler = handler();
        let requested = handler.device_path().clone();
        assert!(handler.locate(&requested).unwrap().is_empty());

        let other = InitrdLoadFile2::with_guid(&shared::EFI_FDT_GUID, Vec::new()).unwrap();
        assert!(handler.locate(other.device_path()).is_none());
    }

    #[test]
    fn test_raw_entry_checks_pointers() {
        let mut protocol = InitrdProtocol::new(handler());
        let this = protocol.as_protocol_ptr();
        let load_file = protocol.protocol().load_file;
        assert_eq!(LoadFile2Protocol::GUID, uefi::guid!("4006c0c1-fcb3-403e-996d-4a6c8724e06d"));
        let mut size = 0usize;

        unsafe {
            assert_eq!(
                load_file(core::ptr::null_mut(), END.as_ptr(), 0, &mut size, core::ptr::null_mut()),
                Status::INVALID_PARAMETER
            );
            assert_eq!(
                load_file(this, END.as_ptr(), 0, core::ptr::null_mut(), core::ptr::null_mut()),
                Status::INVALID_PARAMETER
            );
            assert_eq!(
                load_file(this, END.as_ptr(), 0, &mut size, core::ptr::null_mut()),
                Status::BUFFER_TOO_SMALL
            );
        }
        assert_eq!(size, 1000);

        let mut buffer = vec![0u8; size];
        let status = unsafe { load_file(this, END.as_ptr(), 0, &mut size, buffer.as_mut_ptr().cast()) };
        assert_eq!(status, Status::SUCCESS);
        assert_eq!(buffer, protocol.handler().blob());
    }
}
