// Runtime address translation context
// Tracks the boot-time to runtime transition and the published translation table

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};
use shared::memory::{encode_descriptors, DESCRIPTOR_SIZE, DESCRIPTOR_VERSION};
use shared::{EfiError, MemoryMap, Result, RuntimeRegion};
use spin::{Mutex, Once};
use uefi::table::boot::MemoryDescriptor;

/// `ConvertPointer` disposition: a NULL pointer is left as is and reported as success
pub const OPTIONAL_PTR: usize = 0x1;

/// Phase of the firmware address space
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimePhase {
    /// Identity-mapped, physical addressing
    BootTime = 0,
    /// Table published, address-change observers running
    Transitioning = 1,
    /// OS virtual addressing in effect
    Runtime = 2,
}

impl RuntimePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RuntimePhase::BootTime,
            1 => RuntimePhase::Transitioning,
            _ => RuntimePhase::Runtime,
        }
    }
}

type Observer = Box<dyn FnOnce(&RuntimeContext) + Send>;

/// Translation table published by `SetVirtualAddressMap`
#[derive(Debug)]
pub struct AddressMap {
    regions: Vec<RuntimeRegion>,
}

impl AddressMap {
    /// Runtime regions in map order
    pub fn regions(&self) -> &[RuntimeRegion] {
        &self.regions
    }

    /// Virtual address for `address`, if a runtime region contains it.
    ///
    /// A linear scan; the first containing region in map order wins.
    pub fn translate(&self, address: u64) -> Option<u64> {
        self.regions
            .iter()
            .find(|region| region.contains(address))
            .map(|region| region.translate(address))
    }
}

/// Runtime translation state.
///
/// Created in [`RuntimePhase::BootTime`], moved to [`RuntimePhase::Runtime`]
/// by the single permitted `SetVirtualAddressMap`, never reset. The firmware
/// uses the process-wide instance in [`crate::RUNTIME`]; other instances
/// exist for tests.
pub struct RuntimeContext {
    phase: AtomicU8,
    map: Once<AddressMap>,
    observers: Mutex<Vec<Observer>>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeContext {
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(RuntimePhase::BootTime as u8),
            map: Once::new(),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn phase(&self) -> RuntimePhase {
        RuntimePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// True once the virtual address map is in effect
    pub fn is_virtual(&self) -> bool {
        self.phase() == RuntimePhase::Runtime
    }

    /// Published translation table, `None` before the transition
    pub fn address_map(&self) -> Option<&AddressMap> {
        self.map.get()
    }

    /// Number of observers waiting for the transition
    pub fn pending_observers(&self) -> usize {
        self.observers.lock().len()
    }

    /// Register an address-change observer.
    ///
    /// The observer runs exactly once, during `SetVirtualAddressMap`, and is
    /// expected to call [`Self::convert_pointer`] on the pointers it owns.
    /// Registration closes when the transition starts.
    pub fn register_address_change<F>(&self, observer: F) -> Result<()>
    where
        F: FnOnce(&RuntimeContext) + Send + 'static,
    {
        let mut observers = self.observers.lock();
        if self.phase() != RuntimePhase::BootTime {
            return Err(EfiError::Unsupported);
        }
        observers
            .try_reserve(1)
            .map_err(|_| EfiError::OutOfResources)?;
        observers.push(Box::new(observer));
        Ok(())
    }

    /// Switch to the OS-supplied virtual address map.
    ///
    /// `map` holds descriptors `descriptor_size` bytes apart. Only descriptors
    /// with the `RUNTIME` attribute enter the translation table. A layout
    /// error is `InvalidParameter` and leaves the context at boot time; any
    /// call after a successful one is `Unsupported` and changes nothing.
    pub fn set_virtual_address_map(
        &self,
        map: &[u8],
        descriptor_size: usize,
        descriptor_version: u32,
    ) -> Result<()> {
        if self.phase() != RuntimePhase::BootTime {
            log::warn!("SetVirtualAddressMap called again, rejecting");
            return Err(EfiError::Unsupported);
        }
        let map = MemoryMap::new(map, descriptor_size, descriptor_version)?;
        let regions = map.runtime_regions()?;

        self.phase
            .compare_exchange(
                RuntimePhase::BootTime as u8,
                RuntimePhase::Transitioning as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| EfiError::Unsupported)?;

        let published = self.map.call_once(|| AddressMap { regions });
        let observers = core::mem::take(&mut *self.observers.lock());
        log::info!(
            "switching to virtual mode: {} of {} descriptors are runtime, {} observers",
            published.regions().len(),
            map.len(),
            observers.len()
        );

        for observer in observers {
            observer(self);
        }

        self.phase
            .store(RuntimePhase::Runtime as u8, Ordering::Release);
        Ok(())
    }

    /// Same as [`Self::set_virtual_address_map`] for already decoded descriptors
    pub fn set_virtual_address_map_descriptors(&self, descriptors: &[MemoryDescriptor]) -> Result<()> {
        let bytes = encode_descriptors(descriptors, DESCRIPTOR_SIZE);
        self.set_virtual_address_map(&bytes, DESCRIPTOR_SIZE, DESCRIPTOR_VERSION)
    }

    /// Rewrite a physical address to its virtual counterpart.
    ///
    /// Needs a published table (`Unsupported` otherwise). A zero address is
    /// `InvalidParameter` unless `disposition` has [`OPTIONAL_PTR`]; an address
    /// outside every runtime region is `NotFound`. `address` only changes on
    /// success.
    pub fn convert_pointer(&self, disposition: usize, address: &mut u64) -> Result<()> {
        let map = self.map.get().ok_or(EfiError::Unsupported)?;
        if *address == 0 {
            return if disposition & OPTIONAL_PTR != 0 {
                Ok(())
            } else {
                Err(EfiError::InvalidParameter)
            };
        }
        *address = map.translate(*address).ok_or(EfiError::NotFound)?;
        Ok(())
    }

    /// [`Self::convert_pointer`] for a typed raw pointer
    pub fn convert_raw<T>(&self, pointer: &mut *mut T) -> Result<()> {
        let mut address = *pointer as usize as u64;
        self.convert_pointer(0, &mut address)?;
        *pointer = address as usize as *mut T;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec;
    use core::sync::atomic::AtomicUsize;
    use shared::PAGE_SIZE;
    use uefi::table::boot::{MemoryAttribute, MemoryType};

    const PHYS: u64 = 0x8000_0000;
    const VIRT: u64 = 0xffff_ff00_0000_0000;

    fn runtime_descriptor(phys: u64, virt: u64, pages: u64) -> MemoryDescriptor {
        MemoryDescriptor {
            ty: MemoryType::RUNTIME_SERVICES_DATA,
            phys_start: phys,
            virt_start: virt,
            page_count: pages,
            att: MemoryAttribute::RUNTIME | MemoryAttribute::WRITE_BACK,
        }
    }

    fn boot_descriptor(phys: u64, pages: u64) -> MemoryDescriptor {
        MemoryDescriptor {
            ty: MemoryType::BOOT_SERVICES_DATA,
            phys_start: phys,
            virt_start: 0,
            page_count: pages,
            att: MemoryAttribute::WRITE_BACK,
        }
    }

    #[test]
    fn test_starts_at_boot_time() {
        let ctx = RuntimeContext::new();
        assert_eq!(ctx.phase(), RuntimePhase::BootTime);
        assert!(!ctx.is_virtual());
        assert!(ctx.address_map().is_none());

        let mut addr = PHYS;
        assert_eq!(ctx.convert_pointer(0, &mut addr), Err(EfiError::Unsupported));
        assert_eq!(addr, PHYS);
    }

    #[test]
    fn test_convert_pointer_inside_and_outside() {
        let ctx = RuntimeContext::new();
        ctx.set_virtual_address_map_descriptors(&[
            boot_descriptor(0x1000_0000, 16),
            runtime_descriptor(PHYS, VIRT, 2),
        ])
        .unwrap();
        assert!(ctx.is_virtual());
        assert_eq!(ctx.address_map().unwrap().regions().len(), 1);

        let mut inside = PHYS + PAGE_SIZE + 0x10;
        ctx.convert_pointer(0, &mut inside).unwrap();
        assert_eq!(inside, VIRT + PAGE_SIZE + 0x10);

        let mut last = PHYS + 2 * PAGE_SIZE - 1;
        ctx.convert_pointer(0, &mut last).unwrap();
        assert_eq!(last, VIRT + 2 * PAGE_SIZE - 1);

        let mut past_end = PHYS + 2 * PAGE_SIZE;
        assert_eq!(ctx.convert_pointer(0, &mut past_end), Err(EfiError::NotFound));
        assert_eq!(past_end, PHYS + 2 * PAGE_SIZE);

        // Boot services memory never translates
        let mut boot = 0x1000_0040;
        assert_eq!(ctx.convert_pointer(0, &mut boot), Err(EfiError::NotFound));
    }

    #[test]
    fn test_convert_null_pointer() {
        let ctx = RuntimeContext::new();
        ctx.set_virtual_address_map_descriptors(&[runtime_descriptor(PHYS, VIRT, 1)])
            .unwrap();

        let mut null = 0u64;
        assert_eq!(ctx.convert_pointer(0, &mut null), Err(EfiError::InvalidParameter));
        assert_eq!(ctx.convert_pointer(OPTIONAL_PTR, &mut null), Ok(()));
        assert_eq!(null, 0);
    }

    #[test]
    fn test_convert_raw_pointer() {
        let ctx = RuntimeContext::new();
        ctx.set_virtual_address_map_descriptors(&[runtime_descriptor(PHYS, VIRT, 1)])
            .unwrap();

        let mut ptr = (PHYS + 8) as usize as *mut u32;
        ctx.convert_raw(&mut ptr).unwrap();
        assert_eq!(ptr as usize as u64, VIRT + 8);
    }

    #[test]
    fn test_second_transition_is_rejected() {
        let ctx = RuntimeContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        ctx.register_address_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        ctx.set_virtual_address_map_descriptors(&[runtime_descriptor(PHYS, VIRT, 2)])
            .unwrap();
        assert_eq!(
            ctx.set_virtual_address_map_descriptors(&[runtime_descriptor(PHYS, 0x1234_0000, 2)]),
            Err(EfiError::Unsupported)
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let regions = ctx.address_map().unwrap().regions();
        assert_eq!(regions[0].virtual_start, VIRT);
    }

    #[test]
    fn test_observer_converts_during_transition() {
        let ctx = RuntimeContext::new();
        let converted = Arc::new(AtomicUsize::new(0));
        let slot = converted.clone();
        ctx.register_address_change(move |ctx| {
            assert_eq!(ctx.phase(), RuntimePhase::Transitioning);
            let mut addr = PHYS + 0x20;
            ctx.convert_pointer(0, &mut addr).unwrap();
            slot.store(addr as usize, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(ctx.pending_observers(), 1);

        ctx.set_virtual_address_map_descriptors(&[runtime_descriptor(PHYS, VIRT, 1)])
            .unwrap();
        assert_eq!(converted.load(Ordering::SeqCst) as u64, VIRT + 0x20);
        assert_eq!(ctx.pending_observers(), 0);
    }

    #[test]
    fn test_registration_closes_after_transition() {
        let ctx = RuntimeContext::new();
        ctx.set_virtual_address_map_descriptors(&[]).unwrap();
        assert_eq!(ctx.register_address_change(|_| {}), Err(EfiError::Unsupported));
    }

    #[test]
    fn test_bad_layout_keeps_boot_time() {
        let ctx = RuntimeContext::new();
        let bytes = vec![0u8; DESCRIPTOR_SIZE];
        assert_eq!(
            ctx.set_virtual_address_map(&bytes, DESCRIPTOR_SIZE, DESCRIPTOR_VERSION + 1),
            Err(EfiError::InvalidParameter)
        );
        assert_eq!(
            ctx.set_virtual_address_map(&bytes, DESCRIPTOR_SIZE - 8, DESCRIPTOR_VERSION),
            Err(EfiError::InvalidParameter)
        );
        assert_eq!(ctx.phase(), RuntimePhase::BootTime);

        // A correct call still goes through afterwards
        ctx.set_virtual_address_map(&bytes, DESCRIPTOR_SIZE, DESCRIPTOR_VERSION)
            .unwrap();
        assert!(ctx.is_virtual());
    }
}
