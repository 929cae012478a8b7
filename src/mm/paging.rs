//! Two-level IA-32 paging: 1024-entry page directories pointing at
//! 1024-entry page tables, each mapping a single 4 KiB page. No PAE, no
//! 4 MiB large pages; the original kernel this is modeled on never used
//! either.
//!
//! Every process directory shares the same upper region of kernel page
//! tables (the "kernel-shared directory" entries) so a kernel-call
//! handler sees identical kernel mappings regardless of which process's
//! directory CR3 currently holds. Two fixed virtual addresses, the
//! aperture windows `ch1` and `ch2`, are reserved in that shared region
//! so the kernel can map an arbitrary physical page (another process's
//! directory or table, typically) into its own address space for editing
//! without needing a full recursive-mapping trick.
//!
//! Directories are named by a `DirId`, a dense small integer, rather than
//! handed out to callers by value: `DirId(0)` is the idle/kernel
//! directory, shared into every process and never freed. Looking a
//! directory up by id rather than holding it keeps a `Process` record
//! from owning page-table memory directly, matching the rest of this
//! module's pattern of routing every access through the aperture.

use alloc::vec::Vec;
use bitflags::bitflags;
use spin::Mutex;

use super::virt::KERNEL_VIRT_BASE;
use crate::lib::error::{KernelError, KResult};

pub const PAGE_SIZE: u32 = 0x1000;
const ENTRIES_PER_TABLE: usize = 1024;

// Physical memory below `KERNEL_VIRT_BASE`'s backing frames is identity
// mapped for the kernel's own use, so a physical frame address can be
// dereferenced directly when editing directory/table structures that
// live in that range. This is what lets `with_frame`/`with_frame_mut`
// below treat a frame number as a pointer without walking a translation
// first.

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT   = 1 << 0;
        const WRITABLE  = 1 << 1;
        const USER      = 1 << 2;
        const ACCESSED  = 1 << 5;
        const DIRTY     = 1 << 6;
        const GLOBAL    = 1 << 8;
    }
}

impl PageFlags {
    /// Builds the attribute bundle the map API takes: `US`, `RW`, and
    /// `Global`, with `P` implied present by `map` itself.
    pub fn attrs(user: bool, writable: bool, global: bool) -> Self {
        let mut f = Self::empty();
        if user {
            f |= Self::USER;
        }
        if writable {
            f |= Self::WRITABLE;
        }
        if global {
            f |= Self::GLOBAL;
        }
        f
    }
}

#[derive(Clone, Copy)]
#[repr(transparent)]
struct Entry(u32);

impl Entry {
    const fn empty() -> Self {
        Self(0)
    }

    fn new(phys_addr: u32, flags: PageFlags) -> Self {
        Self((phys_addr & !0xfff) | flags.bits())
    }

    fn present(self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    fn addr(self) -> u32 {
        self.0 & !0xfff
    }

    fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & 0xfff3)
    }
}

#[repr(C, align(4096))]
struct Table {
    entries: [Entry; ENTRIES_PER_TABLE],
}

impl Table {
    const fn empty() -> Self {
        Self {
            entries: [Entry::empty(); ENTRIES_PER_TABLE],
        }
    }
}

fn dir_index(vaddr: u32) -> usize {
    (vaddr >> 22) as usize
}

fn table_index(vaddr: u32) -> usize {
    ((vaddr >> 12) & 0x3ff) as usize
}

/// Number of directory entries, starting at `dir_index(KERNEL_VIRT_BASE)`,
/// that every process directory must share verbatim with every other.
const KERNEL_SHARED_ENTRIES: usize = ENTRIES_PER_TABLE - dir_index_const(KERNEL_VIRT_BASE);

const fn dir_index_const(vaddr: u32) -> usize {
    (vaddr >> 22) as usize
}

/// Dense small integer naming a page directory. `0` is the idle/kernel
/// directory: never freed, lower half shared into every process.
pub type DirId = u32;

pub const KERNEL_DIR: DirId = 0;

struct DirSlot {
    used: bool,
    pdbr: u32,
}

struct DirectoryTable {
    slots: Vec<DirSlot>,
}

impl DirectoryTable {
    const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    fn install(&mut self, id: DirId, pdbr: u32) {
        let idx = id as usize;
        while self.slots.len() <= idx {
            self.slots.push(DirSlot {
                used: false,
                pdbr: 0,
            });
        }
        self.slots[idx] = DirSlot { used: true, pdbr };
    }

    fn alloc_id(&mut self, pdbr: u32) -> DirId {
        if let Some(idx) = self.slots.iter().position(|s| !s.used) {
            self.slots[idx] = DirSlot { used: true, pdbr };
            idx as DirId
        } else {
            self.slots.push(DirSlot { used: true, pdbr });
            (self.slots.len() - 1) as DirId
        }
    }

    fn pdbr(&self, id: DirId) -> KResult<u32> {
        self.slots
            .get(id as usize)
            .filter(|s| s.used)
            .map(|s| s.pdbr)
            .ok_or(KernelError::NoSuchTask)
    }

    fn free(&mut self, id: DirId) -> KResult<u32> {
        if id == KERNEL_DIR {
            return Err(KernelError::PermissionDenied);
        }
        let slot = self
            .slots
            .get_mut(id as usize)
            .filter(|s| s.used)
            .ok_or(KernelError::NoSuchTask)?;
        slot.used = false;
        Ok(slot.pdbr)
    }
}

lazy_static::lazy_static! {
    static ref DIRS: Mutex<DirectoryTable> = Mutex::new(DirectoryTable::new());
}

/// Allocates the one directory shared by the idle task and every
/// kernel-only thread, with no process-private mappings yet, and
/// installs it as `KERNEL_DIR`. Must run once, early in boot.
pub fn init_kernel_directory() -> KResult<DirId> {
    let frame = crate::mm::phys::PHYS
        .lock()
        .as_mut()
        .ok_or(KernelError::OutOfMemory)?
        .alloc_frames(1)?;
    unsafe {
        with_frame_mut(frame, |table: &mut Table| {
            for e in table.entries.iter_mut() {
                *e = Entry::empty();
            }
        });
    }
    DIRS.lock().install(KERNEL_DIR, frame);
    Ok(KERNEL_DIR)
}

/// `alloc_dir(pid)`: allocates a fresh page directory and copies the
/// kernel half from `KERNEL_DIR` into it, so the new process inherits
/// kernel mappings without sharing its process-private lower half. The
/// `pid` is accepted for naming symmetry with the component's contract;
/// the directory table itself is indexed purely by `DirId`, with the
/// `pid -> dir_id` association kept by the caller (`ProcessTable`).
pub fn alloc_dir(_pid: u32) -> KResult<DirId> {
    let frame = crate::mm::phys::PHYS
        .lock()
        .as_mut()
        .ok_or(KernelError::OutOfMemory)?
        .alloc_frames(1)?;

    let kernel_pdbr = DIRS.lock().pdbr(KERNEL_DIR)?;

    unsafe {
        with_frame_mut(frame, |table: &mut Table| {
            for e in table.entries.iter_mut() {
                *e = Entry::empty();
            }
            with_frame(kernel_pdbr, |kernel_table: &Table| {
                let start = dir_index_const(KERNEL_VIRT_BASE);
                table.entries[start..start + KERNEL_SHARED_ENTRIES]
                    .copy_from_slice(&kernel_table.entries[start..start + KERNEL_SHARED_ENTRIES]);
            });
        });
    }

    Ok(DIRS.lock().alloc_id(frame))
}

/// `free_dir(dir_id)`: iterates all user-half PDEs; for each present PDE,
/// frees the underlying page table and its frames. Zeros the directory.
/// Releases the directory frame. The kernel directory can never be freed.
pub fn free_dir(dir_id: DirId) -> KResult<()> {
    let pdbr = DIRS.lock().pdbr(dir_id)?;
    let user_end = dir_index_const(KERNEL_VIRT_BASE);

    unsafe {
        with_frame_mut(pdbr, |dir: &mut Table| {
            for di in 0..user_end {
                if !dir.entries[di].present() {
                    continue;
                }
                let table_frame = dir.entries[di].addr();
                with_frame(table_frame, |table: &Table| {
                    for e in table.entries.iter() {
                        if e.present() {
                            let _ = crate::mm::phys::PHYS
                                .lock()
                                .as_mut()
                                .map(|p| p.free_frames(e.addr()));
                        }
                    }
                });
                let _ = crate::mm::phys::PHYS
                    .lock()
                    .as_mut()
                    .map(|p| p.free_frames(table_frame));
                dir.entries[di] = Entry::empty();
            }
        });
    }

    let freed_pdbr = DIRS.lock().free(dir_id)?;
    crate::mm::phys::PHYS
        .lock()
        .as_mut()
        .ok_or(KernelError::OutOfMemory)?
        .free_frames(freed_pdbr)
}

fn ensure_table(dir: &mut Table, di: usize) -> KResult<u32> {
    if dir.entries[di].present() {
        return Ok(dir.entries[di].addr());
    }
    let new_frame = crate::mm::phys::PHYS
        .lock()
        .as_mut()
        .ok_or(KernelError::OutOfMemory)?
        .alloc_frames(1)?;
    unsafe {
        with_frame_mut(new_frame, |table: &mut Table| {
            for e in table.entries.iter_mut() {
                *e = Entry::empty();
            }
        });
    }
    dir.entries[di] =
        Entry::new(new_frame, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER);
    Ok(new_frame)
}

/// `map(dir_id, vaddr, paddr, size, {allocate_phys, global, ring, rw})`:
/// for every 4 KiB page in `[vaddr, vaddr+size)`, installs a page table
/// if the covering PDE is absent, sets the PTE to `paddr` (advancing by
/// `PAGE_SIZE` per page when `allocate_phys` is false) or to a freshly
/// allocated frame (when true), sets the attribute bits, and invalidates
/// the TLB for the vaddr just mapped. `vaddr`, `paddr`, and `size` must
/// all be 4 KiB aligned. Not transactional: on a sub-failure the caller
/// is expected to `unmap` whatever prefix already succeeded.
pub fn map(
    dir_id: DirId,
    vaddr: u32,
    paddr: u32,
    size: u32,
    allocate_phys: bool,
    flags: PageFlags,
) -> KResult<()> {
    if vaddr % PAGE_SIZE != 0 || paddr % PAGE_SIZE != 0 || size % PAGE_SIZE != 0 {
        return Err(KernelError::Misaligned);
    }
    let pdbr = DIRS.lock().pdbr(dir_id)?;
    let pages = size / PAGE_SIZE;

    for i in 0..pages {
        let page_vaddr = vaddr + i * PAGE_SIZE;
        let page_paddr = if allocate_phys {
            crate::mm::phys::PHYS
                .lock()
                .as_mut()
                .ok_or(KernelError::OutOfMemory)?
                .alloc_frames(1)?
        } else {
            paddr + i * PAGE_SIZE
        };

        let di = dir_index(page_vaddr);
        let ti = table_index(page_vaddr);

        let table_frame = unsafe {
            with_frame_mut(pdbr, |dir: &mut Table| ensure_table(dir, di))
        }?;

        unsafe {
            with_frame_mut(table_frame, |table: &mut Table| -> KResult<()> {
                if table.entries[ti].present() {
                    return Err(KernelError::PageAlreadyMapped);
                }
                table.entries[ti] = Entry::new(page_paddr, flags | PageFlags::PRESENT);
                Ok(())
            })
        }?;

        unsafe {
            crate::arch::x86::cpu::invlpg(page_vaddr);
        }
    }
    Ok(())
}

/// `unmap(dir_id, vaddr, size, {free_phys})`: the inverse of `map`. After
/// clearing a page table's last live PTE, the page table itself is freed
/// and its PDE cleared. Invalidates the TLB for every vaddr unmapped.
pub fn unmap(dir_id: DirId, vaddr: u32, size: u32, free_phys: bool) -> KResult<()> {
    if vaddr % PAGE_SIZE != 0 || size % PAGE_SIZE != 0 {
        return Err(KernelError::Misaligned);
    }
    let pdbr = DIRS.lock().pdbr(dir_id)?;
    let pages = size / PAGE_SIZE;

    for i in 0..pages {
        let page_vaddr = vaddr + i * PAGE_SIZE;
        let di = dir_index(page_vaddr);
        let ti = table_index(page_vaddr);

        let table_frame = unsafe {
            with_frame(pdbr, |dir: &Table| {
                if dir.entries[di].present() {
                    Some(dir.entries[di].addr())
                } else {
                    None
                }
            })
        };
        let Some(table_frame) = table_frame else {
            unsafe {
                crate::arch::x86::cpu::invlpg(page_vaddr);
            }
            continue;
        };

        let (freed_phys, table_now_empty) = unsafe {
            with_frame_mut(table_frame, |table: &mut Table| {
                let freed = if table.entries[ti].present() {
                    Some(table.entries[ti].addr())
                } else {
                    None
                };
                table.entries[ti] = Entry::empty();
                let empty = table.entries.iter().all(|e| !e.present());
                (freed, empty)
            })
        };

        if let Some(phys) = freed_phys {
            if free_phys {
                let _ = crate::mm::phys::PHYS
                    .lock()
                    .as_mut()
                    .map(|p| p.free_frames(phys));
            }
        }

        if table_now_empty {
            unsafe {
                with_frame_mut(pdbr, |dir: &mut Table| {
                    dir.entries[di] = Entry::empty();
                });
            }
            let _ = crate::mm::phys::PHYS
                .lock()
                .as_mut()
                .map(|p| p.free_frames(table_frame));
        }

        unsafe {
            crate::arch::x86::cpu::invlpg(page_vaddr);
        }
    }
    Ok(())
}

/// `copy(dst_dir_id, src_dir_id, vaddr, size)`: deep-copies the physical
/// content of each present page from `src` to `dst` over `[vaddr,
/// vaddr+size)`, allocating new frames in `dst`. PTE attributes are
/// copied except `A`/`D`, which reset. Used by `fork`, where the
/// destination half is always freshly allocated and all-absent: a
/// present destination PTE is therefore unreachable by construction and
/// only asserted against in debug builds rather than merged with.
pub fn copy(dst_dir_id: DirId, src_dir_id: DirId, vaddr: u32, size: u32) -> KResult<()> {
    if vaddr % PAGE_SIZE != 0 || size % PAGE_SIZE != 0 {
        return Err(KernelError::Misaligned);
    }
    let src_pdbr = DIRS.lock().pdbr(src_dir_id)?;
    let dst_pdbr = DIRS.lock().pdbr(dst_dir_id)?;
    let pages = size / PAGE_SIZE;

    for i in 0..pages {
        let page_vaddr = vaddr + i * PAGE_SIZE;
        let di = dir_index(page_vaddr);
        let ti = table_index(page_vaddr);

        let src_entry = unsafe {
            with_frame(src_pdbr, |dir: &Table| {
                if !dir.entries[di].present() {
                    return None;
                }
                let table_frame = dir.entries[di].addr();
                with_frame(table_frame, |table: &Table| {
                    if table.entries[ti].present() {
                        Some(table.entries[ti])
                    } else {
                        None
                    }
                })
            })
        };
        let Some(src_entry) = src_entry else {
            continue;
        };

        let new_frame = crate::mm::phys::PHYS
            .lock()
            .as_mut()
            .ok_or(KernelError::OutOfMemory)?
            .alloc_frames(1)?;
        unsafe {
            copy_frame(src_entry.addr(), new_frame);
        }

        let keep_flags = src_entry.flags() & !(PageFlags::ACCESSED | PageFlags::DIRTY);

        let dst_table_frame = unsafe {
            with_frame_mut(dst_pdbr, |dir: &mut Table| ensure_table(dir, di))
        }?;
        unsafe {
            with_frame_mut(dst_table_frame, |table: &mut Table| {
                debug_assert!(
                    !table.entries[ti].present(),
                    "copy: destination PTE already present"
                );
                table.entries[ti] = Entry::new(new_frame, keep_flags | PageFlags::PRESENT);
            });
        }
    }
    Ok(())
}

/// `get_pdbr(dir_id) -> pdbr_value`: the hardware CR3 value for `dir_id`.
pub fn get_pdbr(dir_id: DirId) -> KResult<u32> {
    DIRS.lock().pdbr(dir_id)
}

pub fn translate(dir_id: DirId, vaddr: u32) -> KResult<Option<u32>> {
    let pdbr = DIRS.lock().pdbr(dir_id)?;
    let di = dir_index(vaddr);
    let ti = table_index(vaddr);
    let offset = vaddr & 0xfff;

    Ok(unsafe {
        with_frame(pdbr, |dir: &Table| {
            if !dir.entries[di].present() {
                return None;
            }
            let table_frame = dir.entries[di].addr();
            with_frame(table_frame, |table: &Table| {
                if !table.entries[ti].present() {
                    return None;
                }
                Some(table.entries[ti].addr() + offset)
            })
        })
    })
}

/// # Safety
/// Both `src` and `dst` must be valid, page-aligned physical frame
/// addresses reachable through the identity-mapped low region.
unsafe fn copy_frame(src: u32, dst: u32) {
    unsafe {
        core::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, PAGE_SIZE as usize);
    }
}

/// Aperture window identity: two fixed slots in the kernel-shared region
/// used to temporarily map one physical frame at a time.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Ch1,
    Ch2,
}

fn aperture_vaddr(channel: Channel) -> u32 {
    match channel {
        Channel::Ch1 => 0xffc0_0000,
        Channel::Ch2 => 0xffc0_1000,
    }
}

/// Maps `frame` into the given aperture channel of the currently-active
/// directory and runs `f` with a reference to it, unmapping afterward.
///
/// This is how the kernel edits a page table or directory belonging to a
/// process other than the one currently running: rather than switching
/// CR3, it borrows one of these two windows in its own always-mapped
/// kernel region. Channel 1 is used for read-only visits, channel 2 for
/// mutating ones, so `copy`'s simultaneous src+dst visits never alias.
///
/// # Safety
/// `frame` must be a valid physical frame; the two channels exist
/// precisely so two frames can be visited at once (directory + table, or
/// src + dst during `copy`) without one evicting the other, but nested
/// calls on the *same* channel will alias.
unsafe fn with_frame<T>(frame: u32, f: impl FnOnce(&Table) -> T) -> T {
    unsafe { with_frame_impl(frame, Channel::Ch1, |t| f(t)) }
}

unsafe fn with_frame_mut<T>(frame: u32, f: impl FnOnce(&mut Table) -> T) -> T {
    unsafe { with_frame_impl_mut(frame, Channel::Ch2, f) }
}

unsafe fn with_frame_impl<T>(frame: u32, channel: Channel, f: impl FnOnce(&Table) -> T) -> T {
    let vaddr = aperture_vaddr(channel);
    unsafe {
        current_kernel_directory_map(vaddr, frame);
        let table = &*(vaddr as *const Table);
        let result = f(table);
        current_kernel_directory_unmap(vaddr);
        result
    }
}

unsafe fn with_frame_impl_mut<T>(frame: u32, channel: Channel, f: impl FnOnce(&mut Table) -> T) -> T {
    let vaddr = aperture_vaddr(channel);
    unsafe {
        current_kernel_directory_map(vaddr, frame);
        let table = &mut *(vaddr as *mut Table);
        let result = f(table);
        current_kernel_directory_unmap(vaddr);
        result
    }
}

/// Maps the aperture PTE directly against whatever directory CR3 names
/// right now, bypassing `map` to avoid reentering the aperture machinery
/// while setting it up.
///
/// # Safety
/// `vaddr` must be one of the two reserved aperture addresses and must not
/// already be mapped; `frame` must be a valid physical frame.
unsafe fn current_kernel_directory_map(vaddr: u32, frame: u32) {
    let pdbr = super::super::arch::x86::cpu::read_cr3();
    let di = dir_index(vaddr);
    let ti = table_index(vaddr);
    unsafe {
        let dir = &mut *(pdbr as *mut Table);
        if !dir.entries[di].present() {
            // The kernel-shared region always has its page tables
            // pre-allocated by `init`; reaching here means init() was
            // skipped.
            panic!("aperture directory entry missing, paging not initialized");
        }
        let table = &mut *(dir.entries[di].addr() as *mut Table);
        table.entries[ti] = Entry::new(frame, PageFlags::PRESENT | PageFlags::WRITABLE);
        super::super::arch::x86::cpu::invlpg(vaddr);
    }
}

/// # Safety
/// `vaddr` must currently be mapped by `current_kernel_directory_map`.
unsafe fn current_kernel_directory_unmap(vaddr: u32) {
    let pdbr = super::super::arch::x86::cpu::read_cr3();
    let di = dir_index(vaddr);
    let ti = table_index(vaddr);
    unsafe {
        let dir = &mut *(pdbr as *mut Table);
        let table = &mut *(dir.entries[di].addr() as *mut Table);
        table.entries[ti] = Entry::empty();
        super::super::arch::x86::cpu::invlpg(vaddr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_and_table_index_split_a_vaddr_correctly() {
        let vaddr = 0xc010_3000u32;
        assert_eq!(dir_index(vaddr), (vaddr >> 22) as usize);
        assert_eq!(table_index(vaddr), ((vaddr >> 12) & 0x3ff) as usize);
    }

    #[test]
    fn entry_round_trips_address_and_flags() {
        let e = Entry::new(0x1234_5000, PageFlags::PRESENT | PageFlags::WRITABLE);
        assert_eq!(e.addr(), 0x1234_5000);
        assert!(e.present());
        assert!(e.flags().contains(PageFlags::WRITABLE));
    }

    #[test]
    fn entry_preserves_global_bit() {
        let e = Entry::new(0x2000, PageFlags::PRESENT | PageFlags::GLOBAL);
        assert!(e.flags().contains(PageFlags::GLOBAL));
    }

    #[test]
    fn aperture_channels_are_distinct_and_page_aligned() {
        let ch1 = aperture_vaddr(Channel::Ch1);
        let ch2 = aperture_vaddr(Channel::Ch2);
        assert_ne!(ch1, ch2);
        assert_eq!(ch1 % PAGE_SIZE, 0);
        assert_eq!(ch2 % PAGE_SIZE, 0);
    }

    #[test]
    fn directory_table_recycles_freed_ids() {
        let mut dirs = DirectoryTable::new();
        dirs.install(KERNEL_DIR, 0x1000);
        let a = dirs.alloc_id(0x2000);
        dirs.free(a).unwrap();
        let b = dirs.alloc_id(0x3000);
        assert_eq!(a, b);
    }

    #[test]
    fn kernel_dir_cannot_be_freed() {
        let mut dirs = DirectoryTable::new();
        dirs.install(KERNEL_DIR, 0x1000);
        assert_eq!(dirs.free(KERNEL_DIR), Err(KernelError::PermissionDenied));
    }
}
