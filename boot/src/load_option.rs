// Load option codec
// Decodes and encodes the payload of Boot#### variables

use alloc::vec::Vec;
use shared::device_path::{extract_tagged, HEADER_SIZE};
use shared::{DevicePath, DevicePathBuilder, EfiError, Guid, Result};
use uefi::{CStr16, CString16};

const REPLACEMENT_CHARACTER: u16 = 0xfffd;

/// The option may be booted
pub const LOAD_OPTION_ACTIVE: u32 = 0x0000_0001;
/// Reconnect all drivers before booting
pub const LOAD_OPTION_FORCE_RECONNECT: u32 = 0x0000_0002;
/// Hidden from boot menus
pub const LOAD_OPTION_HIDDEN: u32 = 0x0000_0008;
/// Application category (as opposed to boot)
pub const LOAD_OPTION_CATEGORY_APP: u32 = 0x0000_0100;

/// Concatenated device paths of a load option.
///
/// The first member is the boot target. Later members start with a Vendor
/// Media node whose GUID names their role (initrd, device tree, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePathList {
    bytes: Vec<u8>,
}

/// One member of a [`DevicePathList`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedPath {
    /// Role GUID from the leading Vendor Media node, `None` when untagged
    pub guid: Option<Guid>,
    /// The member's path without its tag node
    pub path: DevicePath,
}

impl DevicePathList {
    /// Wrap raw list bytes; the first member must decode completely.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        DevicePath::parse(&bytes)?;
        Ok(Self { bytes })
    }

    /// Build a list from a boot target and role-tagged auxiliary paths.
    ///
    /// Each auxiliary member is encoded as `VenMedia(guid)` followed by the
    /// nodes of its path.
    pub fn join(boot: &DevicePath, tagged: &[(Guid, &DevicePath)]) -> Result<Self> {
        let mut bytes = boot.as_bytes().to_vec();
        for (guid, path) in tagged {
            let prefix = DevicePathBuilder::new().push_vendor_media(guid, &[])?.finish();
            bytes.extend_from_slice(prefix.concat(path).as_bytes());
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The boot target: the first member, whole
    pub fn boot_path(&self) -> Result<DevicePath> {
        DevicePath::parse(&self.bytes)
    }

    /// Decode every member as a tagged variant.
    ///
    /// Trailing bytes shorter than a node header are ignored; a member that
    /// does not decode is an error.
    pub fn entries(&self) -> Result<Vec<TaggedPath>> {
        let mut entries = Vec::new();
        let mut rest = self.bytes.as_slice();
        while rest.len() >= HEADER_SIZE {
            let (path, consumed) = DevicePath::parse_prefix(rest)?;
            rest = &rest[consumed..];
            let entry = match path.first_node().and_then(|node| node.vendor_guid()) {
                Some(guid) => TaggedPath {
                    guid: Some(guid),
                    path: path.split_first().map(|(_, tail)| tail).unwrap_or_else(DevicePath::end),
                },
                None => TaggedPath { guid: None, path },
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    /// The path tagged with `guid`, or the boot target for `None`
    pub fn device_path(&self, guid: Option<&Guid>) -> Result<DevicePath> {
        match guid {
            None => self.boot_path(),
            Some(guid) => extract_tagged(&self.bytes, guid),
        }
    }
}

/// Decoded `Boot####` variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOption {
    pub attributes: u32,
    pub description: CString16,
    pub file_paths: DevicePathList,
    pub optional_data: Vec<u8>,
}

impl LoadOption {
    pub fn new(description: &str, file_paths: DevicePathList) -> Result<Self> {
        Ok(Self {
            attributes: LOAD_OPTION_ACTIVE,
            description: CString16::try_from(description).map_err(|_| EfiError::InvalidParameter)?,
            file_paths,
            optional_data: Vec::new(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.attributes & LOAD_OPTION_ACTIVE != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.attributes & LOAD_OPTION_HIDDEN != 0
    }

    /// Decode `u32 attributes | u16 list length | description | list | optional data`.
    ///
    /// Any truncation is `InvalidParameter`; nothing partial is returned.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let attributes = reader.u32()?;
        let list_len = reader.u16()? as usize;
        let description = reader.ucs2_with_nul()?;
        let list = reader.take(list_len)?;
        let file_paths = DevicePathList::from_bytes(list.to_vec())?;
        let optional_data = reader.rest().to_vec();

        Ok(Self {
            attributes,
            description,
            file_paths,
            optional_data,
        })
    }

    /// Encode into the `Boot####` variable layout
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let list_len =
            u16::try_from(self.file_paths.len()).map_err(|_| EfiError::InvalidParameter)?;
        let description = self.description.to_u16_slice_with_nul();

        let mut out = Vec::new();
        out.try_reserve_exact(
            6 + description.len() * 2 + self.file_paths.len() + self.optional_data.len(),
        )
        .map_err(|_| EfiError::OutOfResources)?;
        out.extend_from_slice(&self.attributes.to_le_bytes());
        out.extend_from_slice(&list_len.to_le_bytes());
        for unit in description {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out.extend_from_slice(self.file_paths.as_bytes());
        out.extend_from_slice(&self.optional_data);
        Ok(out)
    }

    /// The path tagged with `guid`, or the boot target for `None`
    pub fn device_path(&self, guid: Option<&Guid>) -> Result<DevicePath> {
        self.file_paths.device_path(guid)
    }
}

/// Little-endian cursor that fails on truncation
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.data.len() < len {
            return Err(EfiError::InvalidParameter);
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a NUL-terminated description.
    ///
    /// UTF-16 surrogates have no UCS-2 form and are replaced by U+FFFD, so a
    /// label the firmware cannot print does not hide the option's paths.
    fn ucs2_with_nul(&mut self) -> Result<CString16> {
        let mut units = Vec::new();
        let mut replaced = 0;
        loop {
            let unit = self.u16()?;
            if (0xd800..=0xdfff).contains(&unit) {
                units.push(REPLACEMENT_CHARACTER);
                replaced += 1;
                continue;
            }
            units.push(unit);
            if unit == 0 {
                break;
            }
        }
        if replaced > 0 {
            log::debug!("Replaced {} surrogate units in load option description", replaced);
        }
        let text = CStr16::from_u16_with_nul(&units).map_err(|_| EfiError::InvalidParameter)?;
        Ok(CString16::from(text))
    }

    fn rest(&mut self) -> &'a [u8] {
        core::mem::take(&mut self.data)
    }
}
