//! `proc_add`: loads a fresh process image into a brand new address
//! space and creates its main thread, the only way (besides `fork`) a
//! process comes into existence.

use crate::lib::error::{KernelError, KResult};
use crate::mm::block::align_up;
use crate::mm::paging::{self, PageFlags, PAGE_SIZE};
use crate::mm::phys::PHYS;
use crate::mm::virt::VirtAllocator;
use crate::process::elf;
use crate::process::table::{Pid, Process, ProcessKind, ProcessTable};
use crate::process::thread::{StackInfo, ThreadTable, Tid};

const USER_STACK_SIZE: u32 = PAGE_SIZE;
/// Fixed window every process's initial stack lands in; chosen well
/// above any plausible `end_point` so the loader's heap never grows into
/// it before `set_break` starts refusing to.
const USER_STACK_WINDOW: u32 = 0xbf00_0000;

pub struct SpawnResult {
    pub pid: Pid,
    pub tid: Tid,
}

/// `proc_add(kind, image_bytes) → pid`: allocates a pid and directory,
/// seeds a per-process `VirtAllocator`, loads `image_bytes` through the
/// ELF loader, sets `heap_break` just past the loaded image, maps a user
/// stack, and creates the main thread.
pub fn proc_add(
    processes: &mut ProcessTable,
    threads: &mut ThreadTable,
    kind: ProcessKind,
    image_bytes: &[u8],
) -> KResult<SpawnResult> {
    let dir_id = paging::alloc_dir(0)?;

    let loaded = match elf::load(image_bytes, dir_id) {
        Ok(l) => l,
        Err(e) => {
            let _ = paging::free_dir(dir_id);
            return Err(e);
        }
    };

    let mut virt = match VirtAllocator::new_user() {
        Ok(v) => v,
        Err(e) => {
            let _ = paging::free_dir(dir_id);
            return Err(e);
        }
    };

    let heap_break = align_up(loaded.end_point, PAGE_SIZE);
    if heap_break > 0 {
        if let Err(e) = virt.alloc_at(0, heap_break) {
            let _ = paging::free_dir(dir_id);
            return Err(e);
        }
    }

    let stack_frame = match PHYS
        .lock()
        .as_mut()
        .ok_or(KernelError::OutOfMemory)
        .and_then(|p| p.alloc_frames(1))
    {
        Ok(f) => f,
        Err(e) => {
            let _ = paging::free_dir(dir_id);
            return Err(e);
        }
    };

    if let Err(e) = paging::map(
        dir_id,
        USER_STACK_WINDOW,
        stack_frame,
        USER_STACK_SIZE,
        false,
        PageFlags::attrs(true, true, false),
    ) {
        let _ = PHYS.lock().as_mut().map(|p| p.free_frames(stack_frame));
        let _ = paging::free_dir(dir_id);
        return Err(e);
    }
    let _ = virt.alloc_at(USER_STACK_WINDOW, USER_STACK_SIZE);

    let pid = match processes.allocate(|pid| Process {
        pid,
        parent_pid: None,
        kind,
        dir_id,
        virt: Some(virt),
        entry_point: loaded.entry_point,
        heap_end: loaded.end_point,
        heap_break,
        user_stack_base: USER_STACK_WINDOW,
        user_stack_size: USER_STACK_SIZE,
        thread_count: 1,
    }) {
        Ok(pid) => pid,
        Err(e) => {
            let _ = paging::free_dir(dir_id);
            return Err(e);
        }
    };

    let user_stack = StackInfo {
        top: USER_STACK_WINDOW + USER_STACK_SIZE,
        bottom: USER_STACK_WINDOW,
        size: USER_STACK_SIZE,
    };
    let kernel_stack = StackInfo {
        top: 0,
        bottom: 0,
        size: 0,
    };

    let tid = match threads.thread_add_main(pid, loaded.entry_point, user_stack, kernel_stack) {
        Ok(tid) => tid,
        Err(e) => {
            processes.free(pid).ok();
            let _ = paging::free_dir(dir_id);
            return Err(e);
        }
    };

    crate::info!("proc_add: loaded pid {} (tid {}) entry {:#x}", pid, tid, loaded.entry_point);

    Ok(SpawnResult { pid, tid })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_stack_window_is_page_aligned() {
        assert_eq!(USER_STACK_WINDOW % PAGE_SIZE, 0);
        assert_eq!(USER_STACK_SIZE % PAGE_SIZE, 0);
    }
}
