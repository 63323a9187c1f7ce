// Memory descriptor map types shared across crates
// Decodes the descriptor array handed over by SetVirtualAddressMap

use crate::error::{EfiError, Result};
use alloc::vec::Vec;
use uefi::table::boot::{MemoryAttribute, MemoryDescriptor, MemoryType};

/// UEFI page size
pub const PAGE_SIZE: u64 = 4096;

/// Descriptor layout version this core understands
pub const DESCRIPTOR_VERSION: u32 = MemoryDescriptor::VERSION;

/// Encoded size of one descriptor: type, padding, physical start,
/// virtual start, page count and attributes
pub const DESCRIPTOR_SIZE: usize = 40;

const TYPE_OFFSET: usize = 0;
const PHYS_OFFSET: usize = 8;
const VIRT_OFFSET: usize = 16;
const PAGES_OFFSET: usize = 24;
const ATTR_OFFSET: usize = 32;

/// Runtime region: a descriptor that takes part in address translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeRegion {
    /// Physical start address
    pub physical_start: u64,
    /// Virtual start address chosen by the OS
    pub virtual_start: u64,
    /// Length in pages
    pub num_pages: u64,
}

impl RuntimeRegion {
    /// Length in bytes, saturating on absurd page counts
    pub fn len(&self) -> u64 {
        self.num_pages.saturating_mul(PAGE_SIZE)
    }

    pub fn is_empty(&self) -> bool {
        self.num_pages == 0
    }

    /// Check if a physical address lies in `[physical_start, physical_start + len)`
    pub fn contains(&self, address: u64) -> bool {
        address >= self.physical_start && address - self.physical_start < self.len()
    }

    /// Rebase a contained physical address onto the virtual range
    pub fn translate(&self, address: u64) -> u64 {
        address.wrapping_add(self.virtual_start.wrapping_sub(self.physical_start))
    }
}

/// Borrowed memory map with a caller-supplied descriptor stride
#[derive(Debug, Clone, Copy)]
pub struct MemoryMap<'a> {
    bytes: &'a [u8],
    descriptor_size: usize,
}

impl<'a> MemoryMap<'a> {
    /// Validate the map layout.
    ///
    /// The version must match [`DESCRIPTOR_VERSION`], the stride must hold a
    /// whole descriptor, and the map must be a whole number of descriptors.
    pub fn new(bytes: &'a [u8], descriptor_size: usize, descriptor_version: u32) -> Result<Self> {
        if descriptor_version != DESCRIPTOR_VERSION
            || descriptor_size < DESCRIPTOR_SIZE
            || bytes.len() % descriptor_size != 0
        {
            return Err(EfiError::InvalidParameter);
        }
        Ok(Self {
            bytes,
            descriptor_size,
        })
    }

    pub fn descriptor_size(&self) -> usize {
        self.descriptor_size
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.bytes.len() / self.descriptor_size
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode every descriptor
    pub fn iter(&self) -> impl Iterator<Item = MemoryDescriptor> + 'a {
        self.bytes
            .chunks_exact(self.descriptor_size)
            .map(decode_descriptor)
    }

    /// Descriptors carrying the `RUNTIME` attribute, in map order
    pub fn runtime_regions(&self) -> Result<Vec<RuntimeRegion>> {
        let mut regions = Vec::new();
        for desc in self.iter() {
            if !desc.att.contains(MemoryAttribute::RUNTIME) {
                continue;
            }
            regions.try_reserve(1).map_err(|_| EfiError::OutOfResources)?;
            regions.push(RuntimeRegion {
                physical_start: desc.phys_start,
                virtual_start: desc.virt_start,
                num_pages: desc.page_count,
            });
        }
        Ok(regions)
    }
}

fn field(chunk: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&chunk[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn decode_descriptor(chunk: &[u8]) -> MemoryDescriptor {
    let ty = u32::from_le_bytes([
        chunk[TYPE_OFFSET],
        chunk[TYPE_OFFSET + 1],
        chunk[TYPE_OFFSET + 2],
        chunk[TYPE_OFFSET + 3],
    ]);
    MemoryDescriptor {
        ty: MemoryType(ty),
        phys_start: field(chunk, PHYS_OFFSET),
        virt_start: field(chunk, VIRT_OFFSET),
        page_count: field(chunk, PAGES_OFFSET),
        att: MemoryAttribute::from_bits_retain(field(chunk, ATTR_OFFSET)),
    }
}

/// Encode descriptors with the given stride; bytes past [`DESCRIPTOR_SIZE`] are zero
pub fn encode_descriptors(descriptors: &[MemoryDescriptor], descriptor_size: usize) -> Vec<u8> {
    let stride = descriptor_size.max(DESCRIPTOR_SIZE);
    let mut bytes = Vec::with_capacity(descriptors.len() * stride);
    for desc in descriptors {
        let start = bytes.len();
        bytes.resize(start + stride, 0);
        let chunk = &mut bytes[start..];
        chunk[TYPE_OFFSET..TYPE_OFFSET + 4].copy_from_slice(&desc.ty.0.to_le_bytes());
        chunk[PHYS_OFFSET..PHYS_OFFSET + 8].copy_from_slice(&desc.phys_start.to_le_bytes());
        chunk[VIRT_OFFSET..VIRT_OFFSET + 8].copy_from_slice(&desc.virt_start.to_le_bytes());
        chunk[PAGES_OFFSET..PAGES_OFFSET + 8].copy_from_slice(&desc.page_count.to_le_bytes());
        chunk[ATTR_OFFSET..ATTR_OFFSET + 8].copy_from_slice(&desc.att.bits().to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn descriptor(ty: MemoryType, phys: u64, virt: u64, pages: u64, att: MemoryAttribute) -> MemoryDescriptor {
        MemoryDescriptor {
            ty,
            phys_start: phys,
            virt_start: virt,
            page_count: pages,
            att,
        }
    }

    #[test]
    fn test_runtime_region() {
        let region = RuntimeRegion {
            physical_start: 0x8000_0000,
            virtual_start: 0xffff_8000_0000_0000,
            num_pages: 2,
        };
        assert_eq!(region.len(), 2 * PAGE_SIZE);
        assert!(region.contains(0x8000_0000));
        assert!(region.contains(0x8000_1fff));
        assert!(!region.contains(0x8000_2000));
        assert!(!region.contains(0x7fff_ffff));
        assert_eq!(region.translate(0x8000_0010), 0xffff_8000_0000_0010);
    }

    #[test]
    fn test_map_filters_runtime_descriptors() {
        let descriptors = vec![
            descriptor(
                MemoryType::RUNTIME_SERVICES_CODE,
                0x1000,
                0x10_1000,
                1,
                MemoryAttribute::RUNTIME | MemoryAttribute::WRITE_BACK,
            ),
            descriptor(MemoryType::CONVENTIONAL, 0x2000, 0, 16, MemoryAttribute::WRITE_BACK),
        ];
        let bytes = encode_descriptors(&descriptors, 48);
        let map = MemoryMap::new(&bytes, 48, DESCRIPTOR_VERSION).unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.iter().nth(1).unwrap().page_count, 16);
        assert_eq!(
            map.runtime_regions().unwrap(),
            vec![RuntimeRegion {
                physical_start: 0x1000,
                virtual_start: 0x10_1000,
                num_pages: 1,
            }]
        );
    }

    #[test]
    fn test_map_rejects_bad_layout() {
        let bytes = vec![0u8; 80];
        assert!(MemoryMap::new(&bytes, DESCRIPTOR_SIZE, DESCRIPTOR_VERSION).is_ok());
        assert_eq!(
            MemoryMap::new(&bytes, DESCRIPTOR_SIZE, DESCRIPTOR_VERSION + 1).unwrap_err(),
            EfiError::InvalidParameter
        );
        assert_eq!(
            MemoryMap::new(&bytes, 32, DESCRIPTOR_VERSION).unwrap_err(),
            EfiError::InvalidParameter
        );
        assert_eq!(
            MemoryMap::new(&bytes, 48, DESCRIPTOR_VERSION).unwrap_err(),
            EfiError::InvalidParameter
        );
    }
}
