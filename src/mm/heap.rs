//! Kernel heap: a fixed virtual range carved out of `mm::virt`, backed by
//! physical frames eagerly mapped at init time, with allocation handled
//! by `linked_list_allocator`.

use linked_list_allocator::LockedHeap;

use super::paging::{DirId, PageFlags};
use crate::lib::error::KResult;

pub const HEAP_SIZE: u32 = 1024 * 1024; // 1 MiB

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// # Safety
/// Must run once, after `mm::phys`/`mm::virt`/the kernel page directory
/// are all initialized, and before the first `alloc`/`Vec::new` et al.
pub unsafe fn init(kernel_dir: DirId) -> KResult<()> {
    let heap_base = super::virt::VIRT.lock().alloc(HEAP_SIZE)?;

    super::paging::map(
        kernel_dir,
        heap_base,
        0,
        HEAP_SIZE,
        true,
        PageFlags::attrs(false, true, true),
    )?;

    unsafe {
        ALLOCATOR
            .lock()
            .init(heap_base as *mut u8, HEAP_SIZE as usize);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct HeapStats {
    pub total: usize,
    pub used: usize,
    pub free: usize,
}

pub fn stats() -> HeapStats {
    let heap = ALLOCATOR.lock();
    let total = heap.size();
    let free = heap.free();
    HeapStats {
        total,
        used: total - free,
        free,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_size_is_a_whole_number_of_pages() {
        assert_eq!(HEAP_SIZE % super::super::paging::PAGE_SIZE, 0);
    }
}
