//! Memory management: the consolidated memory map, the three block-list
//! allocators built on top of it (physical frames, kernel virtual space,
//! I/O windows), two-level paging, and the kernel heap.

pub mod block;
pub mod heap;
pub mod io;
pub mod memory_map;
pub mod paging;
pub mod phys;
pub mod virt;

use memory_map::MemoryMap;
use paging::DirId;

/// Runs memory-management bring-up in dependency order: consolidate the
/// map, stand up the physical allocator over it, build the kernel page
/// directory, seed the I/O allocator from the reserved regions, then the
/// heap on top of all of that.
///
/// # Safety
/// Must run once, early in boot, after the architecture layer (`arch::x86`)
/// is initialized and before any subsystem that allocates memory.
pub unsafe fn init(map: &MemoryMap) -> DirId {
    unsafe {
        phys::init(map);
    }
    crate::info!(
        "mm: {} KiB usable across {} region(s)",
        map.total_usable() / 1024,
        map.regions().count()
    );

    let kernel_dir = paging::init_kernel_directory().expect("failed to allocate kernel directory");

    io::init(map).expect("failed to initialize io allocator");

    unsafe {
        heap::init(kernel_dir).expect("failed to initialize kernel heap");
    }
    crate::info!("mm: kernel heap ready ({} KiB)", heap::HEAP_SIZE / 1024);

    kernel_dir
}
