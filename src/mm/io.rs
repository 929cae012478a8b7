//! I/O memory allocator: reserves fixed physical ranges for memory-mapped
//! device registers, as opposed to `phys::PhysAllocator` which hands out
//! arbitrary frames for general use.
//!
//! Device I/O ranges are almost always allocated and freed at their
//! hardware-fixed base address rather than picked by the allocator, so the
//! primary entry point is `alloc_fixed`, which splits the covering free
//! block into up to three pieces (front remainder / allocated middle /
//! back remainder) exactly like a general block-list split, just anchored
//! at both ends instead of one.
//!
//! Freeing a range that doesn't exactly match an allocated block returns
//! `InvalidBlock` and leaves the range allocated, rather than guessing
//! which block it was meant to free.

use spin::Mutex;

use super::block::BlockList;
use super::memory_map::MemoryMap;
use crate::lib::error::KResult;

pub struct IoAllocator {
    list: BlockList,
}

impl IoAllocator {
    /// Starts with nothing free; callers seed it region by region with
    /// `add_region` before any `alloc_fixed` can succeed.
    pub fn empty() -> Self {
        Self {
            list: BlockList::new(0, 0),
        }
    }

    /// Builds the allocator from every `Reserved` region of a consolidated
    /// memory map: that is where MMIO windows and firmware tables live,
    /// as opposed to the `Usable` regions `phys::PhysAllocator` draws from.
    pub fn from_memory_map(map: &MemoryMap) -> KResult<Self> {
        let mut io = Self::empty();
        for region in map.reserved_regions() {
            io.list.add_free(region.base, region.len, true)?;
        }
        Ok(io)
    }

    #[cfg(test)]
    fn new(base: u32, len: u32) -> Self {
        Self {
            list: BlockList::new(base, len),
        }
    }

    /// Reserves `[base, base+size)` for a device's register window.
    pub fn alloc_fixed(&mut self, base: u32, size: u32) -> KResult<()> {
        self.list.alloc_at(base, size)
    }

    /// Releases a range previously reserved with `alloc_fixed`, merging it
    /// back into neighboring free ranges.
    pub fn free(&mut self, base: u32) -> KResult<()> {
        self.list.free(base)
    }
}

lazy_static::lazy_static! {
    pub static ref IO: Mutex<Option<IoAllocator>> = Mutex::new(None);
}

/// # Safety
/// Must run once, after the memory map has been consolidated, before any
/// driver asks to reserve an MMIO window.
pub fn init(map: &MemoryMap) -> KResult<()> {
    *IO.lock() = Some(IoAllocator::from_memory_map(map)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::error::KernelError;

    #[test]
    fn reserves_and_releases_a_device_window() {
        let mut io = IoAllocator::new(0xfe000000, 0x10000);
        io.alloc_fixed(0xfe004000, 0x1000).unwrap();
        io.free(0xfe004000).unwrap();
    }

    #[test]
    fn overlapping_reservation_is_rejected() {
        let mut io = IoAllocator::new(0xfe000000, 0x10000);
        io.alloc_fixed(0xfe004000, 0x2000).unwrap();
        assert_eq!(
            io.alloc_fixed(0xfe005000, 0x1000),
            Err(KernelError::OutOfMemory)
        );
    }

    #[test]
    fn freeing_an_address_never_reserved_is_rejected() {
        let mut io = IoAllocator::new(0xfe000000, 0x10000);
        assert_eq!(io.free(0xfe004000), Err(KernelError::InvalidBlock));
    }
}
