//! Kernel virtual address space allocator.
//!
//! Hands out ranges within the kernel's portion of the address space
//! (above `KERNEL_VIRT_BASE`) for things like the heap, per-process
//! kernel stacks, and the aperture windows `mm::paging` uses to touch
//! arbitrary physical pages. Backed by the same `BlockList` algorithm as
//! the physical allocator, over a single large region instead of one per
//! memory-map entry.

use spin::Mutex;

use super::block::BlockList;
use crate::lib::error::KResult;

pub const KERNEL_VIRT_BASE: u32 = 0xc000_0000;
const KERNEL_VIRT_LEN: u32 = 0x3000_0000;

/// Every address space reserves this leading page: a dereference through
/// a null pointer faults instead of reading whatever physical frame
/// happens to sit at 0.
const NULL_GUARD_SIZE: u32 = 0x1000;

/// Top of the 32-bit address space an allocator will ever hand out;
/// `0xFFFFFFFF` itself is never a valid exclusive range end, so the
/// managed span stops one page short of it.
const ADDR_SPACE_END: u32 = 0xffff_f000;

pub struct VirtAllocator {
    list: BlockList,
}

impl VirtAllocator {
    /// The kernel's own virtual address space: heap, per-process kernel
    /// stacks, and the paging aperture windows all come out of this one
    /// range. Every process directory maps this same range identically,
    /// so there is exactly one instance of it, shared, not one per
    /// process.
    pub fn new() -> Self {
        Self {
            list: BlockList::new(KERNEL_VIRT_BASE, KERNEL_VIRT_LEN),
        }
    }

    /// A process's private virtual address space: the full 32-bit range
    /// minus the null-page guard and the kernel-shared upper region,
    /// which are pre-allocated here so a process's own `alloc` calls can
    /// never be handed either.
    pub fn new_user() -> KResult<Self> {
        let mut list = BlockList::new(0, ADDR_SPACE_END);
        list.alloc_at(0, NULL_GUARD_SIZE)?;
        list.alloc_at(KERNEL_VIRT_BASE, ADDR_SPACE_END - KERNEL_VIRT_BASE)?;
        Ok(Self { list })
    }

    pub fn alloc(&mut self, size: u32) -> KResult<u32> {
        self.list.alloc(size)
    }

    pub fn alloc_at(&mut self, base: u32, size: u32) -> KResult<()> {
        self.list.alloc_at(base, size)
    }

    pub fn free(&mut self, addr: u32) -> KResult<()> {
        self.list.free(addr)
    }
}

lazy_static::lazy_static! {
    pub static ref VIRT: Mutex<VirtAllocator> = Mutex::new(VirtAllocator::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_stay_within_kernel_range() {
        let mut v = VirtAllocator::new();
        let addr = v.alloc(0x2000).unwrap();
        assert!(addr >= KERNEL_VIRT_BASE);
        assert!(addr < KERNEL_VIRT_BASE + KERNEL_VIRT_LEN);
    }

    #[test]
    fn user_allocator_never_hands_out_the_null_page() {
        let mut v = VirtAllocator::new_user().unwrap();
        for _ in 0..8 {
            let addr = v.alloc(0x1000).unwrap();
            assert!(addr >= NULL_GUARD_SIZE);
            assert!(addr < KERNEL_VIRT_BASE);
        }
    }

    #[test]
    fn user_allocator_never_hands_out_kernel_shared_range() {
        let mut v = VirtAllocator::new_user().unwrap();
        assert!(v.alloc_at(KERNEL_VIRT_BASE, 0x1000).is_err());
    }
}
