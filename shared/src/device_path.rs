// Device path codec
// Encodes and decodes chains of typed, length-prefixed nodes terminated by an End node

use crate::error::{EfiError, Result};
use alloc::vec::Vec;
use core::fmt;
use uefi::proto::device_path::build::{self, BuildNode};
use uefi::table::boot::MemoryType;
use uefi::{CString16, Guid};

pub use uefi::proto::device_path::{DeviceSubType, DeviceType};

/// Size of the `type | sub_type | length` header in front of every node
pub const HEADER_SIZE: usize = 4;

/// Size of a Vendor node's GUID, the first field of its payload
pub const VENDOR_GUID_SIZE: usize = 16;

const END_ENTIRE_NODE: [u8; HEADER_SIZE] = [
    DeviceType::END.0,
    DeviceSubType::END_ENTIRE.0,
    HEADER_SIZE as u8,
    0,
];

const END_INSTANCE_NODE: [u8; HEADER_SIZE] = [
    DeviceType::END.0,
    DeviceSubType::END_INSTANCE.0,
    HEADER_SIZE as u8,
    0,
];

/// A single node borrowed from an encoded device path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePathNode<'a> {
    raw: &'a [u8],
}

impl<'a> DevicePathNode<'a> {
    /// Decode the node at the start of `bytes`.
    ///
    /// Fails if the header is truncated, the length is below the header
    /// size, or the node runs past the end of `bytes`.
    pub fn read(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(EfiError::InvalidParameter);
        }
        let length = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        if length < HEADER_SIZE || length > bytes.len() {
            return Err(EfiError::InvalidParameter);
        }
        Ok(Self {
            raw: &bytes[..length],
        })
    }

    pub fn node_type(&self) -> DeviceType {
        DeviceType(self.raw[0])
    }

    pub fn sub_type(&self) -> DeviceSubType {
        DeviceSubType(self.raw[1])
    }

    /// Encoded length, header included
    pub fn length(&self) -> usize {
        self.raw.len()
    }

    /// Payload following the header
    pub fn data(&self) -> &'a [u8] {
        &self.raw[HEADER_SIZE..]
    }

    /// Whole encoded node, header included
    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }

    pub fn is_end(&self) -> bool {
        self.node_type() == DeviceType::END
    }

    pub fn is_end_entire(&self) -> bool {
        match_end(self, DeviceType::END, DeviceSubType::END_ENTIRE)
    }

    pub fn is_end_instance(&self) -> bool {
        match_end(self, DeviceType::END, DeviceSubType::END_INSTANCE)
    }

    /// GUID of a Vendor Media node, `None` for any other node
    pub fn vendor_guid(&self) -> Option<Guid> {
        if self.node_type() != DeviceType::MEDIA || self.sub_type() != DeviceSubType::MEDIA_VENDOR {
            return None;
        }
        let data = self.data();
        if data.len() < VENDOR_GUID_SIZE {
            return None;
        }
        let mut bytes = [0u8; VENDOR_GUID_SIZE];
        bytes.copy_from_slice(&data[..VENDOR_GUID_SIZE]);
        Some(Guid::from_bytes(bytes))
    }
}

/// Check a node's type and subtype against what the consumer anchors on.
///
/// Both fields are compared; a node with the right type but a different
/// subtype does not match.
pub fn match_end(
    node: &DevicePathNode<'_>,
    expected_type: DeviceType,
    expected_sub_type: DeviceSubType,
) -> bool {
    node.node_type() == expected_type && node.sub_type() == expected_sub_type
}

/// Validated, owned device path.
///
/// The encoding always ends with an End-of-entire-path node of length 4.
/// Instance separators (End-of-instance nodes) may appear before it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DevicePath {
    bytes: Vec<u8>,
}

impl DevicePath {
    /// Path consisting of the End node only
    pub fn end() -> Self {
        Self {
            bytes: END_ENTIRE_NODE.to_vec(),
        }
    }

    /// Parse the first device path in `bytes`, ignoring anything after its End node.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::parse_prefix(bytes).map(|(path, _)| path)
    }

    /// Parse the first device path in `bytes` and report how many bytes it used.
    pub fn parse_prefix(bytes: &[u8]) -> Result<(Self, usize)> {
        let consumed = Self::encoded_len(bytes)?;
        let mut owned = Vec::new();
        owned
            .try_reserve_exact(consumed)
            .map_err(|_| EfiError::OutOfResources)?;
        owned.extend_from_slice(&bytes[..consumed]);
        Ok((Self { bytes: owned }, consumed))
    }

    /// Walk nodes until the End-of-entire-path node and return the total length.
    fn encoded_len(bytes: &[u8]) -> Result<usize> {
        let mut offset = 0;
        loop {
            let node = DevicePathNode::read(&bytes[offset..])?;
            offset += node.length();
            if !node.is_end() {
                continue;
            }
            match node.sub_type() {
                DeviceSubType::END_ENTIRE if node.length() == HEADER_SIZE => return Ok(offset),
                DeviceSubType::END_INSTANCE => continue,
                _ => return Err(EfiError::InvalidParameter),
            }
        }
    }

    /// Wrap bytes already known to hold exactly one well-formed path
    fn from_valid(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Whole encoding, final End node included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size in bytes excluding the final End node
    pub fn size(&self) -> usize {
        self.bytes.len() - HEADER_SIZE
    }

    /// True if the path holds nothing but the End node
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Nodes before the final End node; instance separators are included
    pub fn nodes(&self) -> Nodes<'_> {
        Nodes {
            rest: &self.bytes[..self.size()],
        }
    }

    /// First node, or `None` for an empty path
    pub fn first_node(&self) -> Option<DevicePathNode<'_>> {
        self.nodes().next()
    }

    /// Last node that is not an End node
    pub fn last_node(&self) -> Option<DevicePathNode<'_>> {
        self.nodes().filter(|node| !node.is_end()).last()
    }

    /// Terminating End-of-entire-path node
    pub fn end_node(&self) -> DevicePathNode<'_> {
        DevicePathNode {
            raw: &self.bytes[self.size()..],
        }
    }

    /// Split off the first node, returning it with the path that follows it
    pub fn split_first(&self) -> Option<(DevicePathNode<'_>, DevicePath)> {
        let first = self.first_node()?;
        Some((first, Self::from_valid(&self.bytes[first.length()..])))
    }

    /// True if the path carries End-of-instance separators
    pub fn is_multi_instance(&self) -> bool {
        self.nodes().any(|node| node.is_end_instance())
    }

    /// Each instance as its own single-instance path
    pub fn instances(&self) -> Vec<DevicePath> {
        let mut instances = Vec::new();
        let mut start = 0;
        let mut offset = 0;
        for node in self.nodes() {
            if node.is_end_instance() {
                let mut bytes = self.bytes[start..offset].to_vec();
                bytes.extend_from_slice(&END_ENTIRE_NODE);
                instances.push(Self { bytes });
                start = offset + node.length();
            }
            offset += node.length();
        }
        instances.push(Self::from_valid(&self.bytes[start..]));
        instances
    }

    /// New path with `node` inserted in front of the End node
    pub fn append_node(&self, node: DevicePathNode<'_>) -> DevicePath {
        let mut bytes = Vec::with_capacity(self.bytes.len() + node.length());
        bytes.extend_from_slice(&self.bytes[..self.size()]);
        bytes.extend_from_slice(node.as_bytes());
        bytes.extend_from_slice(&END_ENTIRE_NODE);
        Self { bytes }
    }

    /// Concatenate two paths into one, dropping the first path's End node
    pub fn concat(&self, other: &DevicePath) -> DevicePath {
        let mut bytes = Vec::with_capacity(self.size() + other.bytes.len());
        bytes.extend_from_slice(&self.bytes[..self.size()]);
        bytes.extend_from_slice(&other.bytes);
        Self { bytes }
    }

    /// Append `other` as a new instance
    pub fn append_instance(&self, other: &DevicePath) -> DevicePath {
        let mut bytes = Vec::with_capacity(self.bytes.len() + other.bytes.len());
        bytes.extend_from_slice(&self.bytes[..self.size()]);
        bytes.extend_from_slice(&END_INSTANCE_NODE);
        bytes.extend_from_slice(&other.bytes);
        Self { bytes }
    }

    /// If every node of `prefix` equals the node at the same position in
    /// `self`, return the remainder of `self`.
    ///
    /// Used to find which part of a path follows a handle's own path.
    pub fn strip_prefix(&self, prefix: &DevicePath) -> Option<DevicePath> {
        let mut offset = 0;
        let mut ours = self.nodes();
        for theirs in prefix.nodes() {
            let node = ours.next()?;
            if node != theirs {
                return None;
            }
            offset += node.length();
        }
        Some(Self::from_valid(&self.bytes[offset..]))
    }
}

impl fmt::Debug for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePath({})", self)
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("End");
        }
        let mut separator = "";
        for node in self.nodes() {
            if node.is_end_instance() {
                f.write_str(",")?;
                separator = "";
                continue;
            }
            f.write_str(separator)?;
            write_node(f, &node)?;
            separator = "/";
        }
        Ok(())
    }
}

/// Iterator over encoded nodes
pub struct Nodes<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Nodes<'a> {
    type Item = DevicePathNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        // The owning path was validated, so every read succeeds.
        let node = DevicePathNode::read(self.rest).ok()?;
        self.rest = &self.rest[node.length()..];
        Some(node)
    }
}

/// Builder producing a well-formed [`DevicePath`].
///
/// Nodes are encoded by the `uefi` crate's device path builder and
/// collected into an owned buffer.
#[derive(Debug, Default)]
pub struct DevicePathBuilder {
    bytes: Vec<u8>,
}

impl DevicePathBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append any node the `uefi` builder knows how to encode.
    ///
    /// An oversized node is `InvalidParameter`.
    pub fn push(mut self, node: &dyn BuildNode) -> Result<Self> {
        let mut encoded = Vec::new();
        build::DevicePathBuilder::with_vec(&mut encoded).push(node)?;
        self.bytes
            .try_reserve(encoded.len())
            .map_err(|_| EfiError::OutOfResources)?;
        self.bytes.extend_from_slice(&encoded);
        Ok(self)
    }

    /// Append `VenMedia(guid, vendor_data)`
    pub fn push_vendor_media(self, guid: &Guid, vendor_data: &[u8]) -> Result<Self> {
        self.push(&build::media::Vendor {
            vendor_guid: *guid,
            vendor_defined_data: vendor_data,
        })
    }

    /// Append a File Path node holding `path` as NUL-terminated UTF-16
    pub fn push_file_path(self, path: &str) -> Result<Self> {
        let path_name = CString16::try_from(path).map_err(|_| EfiError::InvalidParameter)?;
        self.push(&build::media::FilePath {
            path_name: &path_name,
        })
    }

    /// Append a memory-mapped hardware node covering `[start, end]`
    pub fn push_memory_mapped(self, memory_type: MemoryType, start: u64, end: u64) -> Result<Self> {
        self.push(&build::hardware::MemoryMapped {
            memory_type,
            start_address: start,
            end_address: end,
        })
    }

    /// Close the current instance and start a new one
    pub fn push_instance_end(self) -> Result<Self> {
        self.push(&build::end::Instance)
    }

    /// Terminate with the End-of-entire-path node
    pub fn finish(mut self) -> DevicePath {
        self.bytes.extend_from_slice(&END_ENTIRE_NODE);
        DevicePath { bytes: self.bytes }
    }
}

/// Find the device path tagged with `guid` in a concatenated device-path list.
///
/// Every node of every member is inspected; the first Vendor Media node
/// carrying `guid` wins and the nodes following it, up to that member's End
/// node, are returned. A member that fails to decode ends the scan.
pub fn extract_tagged(list: &[u8], guid: &Guid) -> Result<DevicePath> {
    let mut rest = list;
    while rest.len() >= HEADER_SIZE {
        let consumed = match DevicePath::encoded_len(rest) {
            Ok(consumed) => consumed,
            Err(_) => break,
        };
        let member = &rest[..consumed];
        let mut offset = 0;
        while offset < consumed {
            // Bounds were checked by encoded_len.
            let node = DevicePathNode::read(&member[offset..])?;
            offset += node.length();
            if node.vendor_guid().as_ref() == Some(guid) {
                return Ok(DevicePath::from_valid(&member[offset..]));
            }
        }
        rest = &rest[consumed..];
    }
    Err(EfiError::NotFound)
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    let mut array = [0u8; 8];
    array.copy_from_slice(bytes);
    Some(u64::from_le_bytes(array))
}

fn write_hex(f: &mut fmt::Formatter<'_>, data: &[u8]) -> fmt::Result {
    for byte in data {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &DevicePathNode<'_>) -> fmt::Result {
    let data = node.data();
    match (node.node_type(), node.sub_type()) {
        (DeviceType::MEDIA, DeviceSubType::MEDIA_VENDOR) if data.len() >= VENDOR_GUID_SIZE => {
            let guid = node.vendor_guid().unwrap_or(Guid::ZERO);
            write!(f, "VenMedia({}", guid)?;
            if data.len() > VENDOR_GUID_SIZE {
                f.write_str(",")?;
                write_hex(f, &data[VENDOR_GUID_SIZE..])?;
            }
            f.write_str(")")
        }
        (DeviceType::MEDIA, DeviceSubType::MEDIA_FILE_PATH) => {
            let units = data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .take_while(|&unit| unit != 0);
            for c in char::decode_utf16(units) {
                write!(f, "{}", c.unwrap_or(char::REPLACEMENT_CHARACTER))?;
            }
            Ok(())
        }
        (DeviceType::MEDIA, DeviceSubType::MEDIA_HARD_DRIVE) if data.len() >= 38 => {
            let part = read_u32(data, 0).unwrap_or(0);
            let start = read_u64(data, 4).unwrap_or(0);
            let size = read_u64(data, 12).unwrap_or(0);
            let signature = &data[20..36];
            match data[37] {
                // MBR signature
                0x01 => write!(
                    f,
                    "HD({},MBR,0x{:08x},0x{:x},0x{:x})",
                    part,
                    read_u32(signature, 0).unwrap_or(0),
                    start,
                    size
                ),
                // GPT signature
                0x02 => {
                    let mut bytes = [0u8; VENDOR_GUID_SIZE];
                    bytes.copy_from_slice(signature);
                    write!(
                        f,
                        "HD({},GPT,{},0x{:x},0x{:x})",
                        part,
                        Guid::from_bytes(bytes),
                        start,
                        size
                    )
                }
                _ => write!(f, "HD({},0x{:x},0x{:x})", part, start, size),
            }
        }
        (DeviceType::HARDWARE, DeviceSubType::HARDWARE_MEMORY_MAPPED) if data.len() >= 20 => write!(
            f,
            "MemoryMapped(0x{:x},0x{:x},0x{:x})",
            read_u32(data, 0).unwrap_or(0),
            read_u64(data, 4).unwrap_or(0),
            read_u64(data, 12).unwrap_or(0)
        ),
        (node_type, sub_type) => {
            write!(f, "Path({},{},", node_type.0, sub_type.0)?;
            write_hex(f, data)?;
            f.write_str(")")
        }
    }
}
