//! Physical page frame allocator.
//!
//! Backed by one `BlockList` per usable region reported by the memory
//! map. Allocation always returns 4 KiB-aligned, 4 KiB-multiple physical
//! ranges; callers map them into a virtual address space separately via
//! `mm::paging`.

use alloc::vec::Vec;
use spin::Mutex;

use super::block::BlockList;
use super::memory_map::MemoryMap;
use crate::lib::error::{KernelError, KResult};

pub struct PhysAllocator {
    regions: Vec<BlockList>,
}

impl PhysAllocator {
    /// Builds the allocator from a consolidated memory map, one
    /// `BlockList` per usable region.
    pub fn from_memory_map(map: &MemoryMap) -> Self {
        let regions = map
            .usable_regions()
            .map(|r| BlockList::new(r.base, r.len))
            .collect();
        Self { regions }
    }

    pub fn alloc_frames(&mut self, count: u32) -> KResult<u32> {
        let size = count
            .checked_mul(super::block::BLOCK_ALIGN)
            .ok_or(KernelError::InvalidParam)?;
        for region in &mut self.regions {
            if let Ok(addr) = region.alloc(size) {
                return Ok(addr);
            }
        }
        Err(KernelError::OutOfMemory)
    }

    pub fn free_frames(&mut self, addr: u32) -> KResult<()> {
        for region in &mut self.regions {
            if region.free(addr).is_ok() {
                return Ok(());
            }
        }
        Err(KernelError::InvalidBlock)
    }

    pub fn total_free(&self) -> u64 {
        self.regions.iter().map(|r| r.total_free() as u64).sum()
    }

    pub fn total_allocated(&self) -> u64 {
        self.regions
            .iter()
            .map(|r| r.total_allocated() as u64)
            .sum()
    }
}

lazy_static::lazy_static! {
    pub static ref PHYS: Mutex<Option<PhysAllocator>> = Mutex::new(None);
}

/// # Safety
/// Must run once, after the memory map has been consolidated and before
/// any other subsystem asks for physical frames.
pub unsafe fn init(map: &MemoryMap) {
    *PHYS.lock() = Some(PhysAllocator::from_memory_map(map));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::memory_map::{MemoryMap, RegionKind};

    fn single_region_map() -> MemoryMap {
        let mut map = MemoryMap::new();
        map.add_region(0x100000, 0x10000, RegionKind::Usable);
        map.consolidate();
        map
    }

    #[test]
    fn allocates_and_frees_frames() {
        let map = single_region_map();
        let mut alloc = PhysAllocator::from_memory_map(&map);
        let a = alloc.alloc_frames(1).unwrap();
        let b = alloc.alloc_frames(1).unwrap();
        assert_ne!(a, b);
        alloc.free_frames(a).unwrap();
        alloc.free_frames(b).unwrap();
        assert_eq!(alloc.total_allocated(), 0);
    }

    #[test]
    fn exhausts_and_reports_out_of_memory() {
        let map = single_region_map();
        let mut alloc = PhysAllocator::from_memory_map(&map);
        let frames = 0x10000 / super::super::block::BLOCK_ALIGN;
        for _ in 0..frames {
            alloc.alloc_frames(1).unwrap();
        }
        assert_eq!(alloc.alloc_frames(1), Err(KernelError::OutOfMemory));
    }
}
