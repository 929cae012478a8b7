//! `proc_fork`: duplicates a process's address space and its calling
//! thread, returning the child's pid to the parent and scheduling the
//! child to run.
//!
//! Every kernel call returns its result through the caller's ESI-pointed
//! param block rather than a register, which sidesteps what would
//! otherwise be an awkward case for fork: the parent and child need to
//! observe *different* return values from the same call site despite
//! sharing the same saved `{eip, esp, ebp}` context immediately after the
//! duplicate address space is created. Concretely:
//!
//! - The parent's own in-flight kernel-call handler writes the new pid
//!   into the parent's param block directly, the same as any other call.
//! - The child thread is *not* given the parent's in-progress call frame.
//! - It starts at a small trampoline entry point that writes `0` into its
//!   own (freshly copied) param block slot and then jumps to the same
//!   post-syscall return path the parent's `int 0x30`-`0x3F` handler uses,
//!   so it resumes in user mode exactly where the parent's call site was,
//!   observing a 0 return value.
//!
//! No extra register convention or context field is needed; the
//! distinction lives entirely in what each thread's saved `eip` points to.

use crate::lib::error::{KernelError, KResult};
use crate::mm::paging;
use crate::mm::virt::VirtAllocator;
use crate::process::table::{Pid, Process, ProcessKind, ProcessTable};
use crate::process::thread::{StackInfo, ThreadTable, Tid};

/// Address of the child-only trampoline that zeroes the fork return value
/// before rejoining the common kernel-call return path. Installed once
/// during early boot into every process's kernel-shared mappings.
pub const FORK_CHILD_TRAMPOLINE: u32 = 0xffbf_f000;

pub struct ForkResult {
    pub child_pid: Pid,
    pub child_tid: Tid,
}

/// Duplicates `parent_pid`'s address space and the calling thread
/// `parent_tid`, returning the new process and thread ids.
pub fn fork(
    processes: &mut ProcessTable,
    threads: &mut ThreadTable,
    parent_pid: Pid,
    parent_tid: Tid,
) -> KResult<ForkResult> {
    let parent_thread_context = threads.get(parent_tid)?.context;
    let (
        parent_kind,
        parent_dir_id,
        parent_heap_end,
        parent_heap_break,
        parent_stack_base,
        parent_stack_size,
    ) = {
        let parent = processes.get(parent_pid)?;
        (
            parent.kind,
            parent.dir_id,
            parent.heap_end,
            parent.heap_break,
            parent.user_stack_base,
            parent.user_stack_size,
        )
    };

    if parent_kind == ProcessKind::Kernel {
        crate::warn!("fork: refusing to fork kernel process {}", parent_pid);
        return Err(KernelError::PermissionDenied);
    }

    let child_dir_id = paging::alloc_dir(parent_pid)?;
    if let Err(e) = page_copy_user_space(
        child_dir_id,
        parent_dir_id,
        parent_heap_end,
        parent_stack_base,
        parent_stack_size,
    ) {
        let _ = paging::free_dir(child_dir_id);
        return Err(e);
    }

    let child_virt = match VirtAllocator::new_user() {
        Ok(mut v) => {
            if parent_heap_end > 0 {
                let _ = v.alloc_at(0, parent_heap_end);
            }
            if parent_stack_size > 0 {
                let _ = v.alloc_at(parent_stack_base, parent_stack_size);
            }
            Some(v)
        }
        Err(e) => {
            let _ = paging::free_dir(child_dir_id);
            return Err(e);
        }
    };

    let child_pid = match processes.allocate(|pid| Process {
        pid,
        parent_pid: Some(parent_pid),
        kind: parent_kind,
        dir_id: child_dir_id,
        virt: child_virt,
        entry_point: parent_thread_context.eip,
        heap_end: parent_heap_end,
        heap_break: parent_heap_break,
        user_stack_base: parent_stack_base,
        user_stack_size: parent_stack_size,
        thread_count: 1,
    }) {
        Ok(pid) => pid,
        Err(e) => {
            let _ = paging::free_dir(child_dir_id);
            return Err(e);
        }
    };

    let kernel_stack = StackInfo {
        top: 0,
        bottom: 0,
        size: 0,
    };
    let user_stack = StackInfo {
        top: parent_stack_base + parent_stack_size,
        bottom: parent_stack_base,
        size: parent_stack_size,
    };

    let child_tid = match threads.thread_fork(child_pid, FORK_CHILD_TRAMPOLINE, user_stack, kernel_stack) {
        Ok(tid) => tid,
        Err(e) => {
            processes.free(child_pid).ok();
            let _ = paging::free_dir(child_dir_id);
            crate::error!("fork: thread table full allocating child of pid {}", parent_pid);
            return Err(e);
        }
    };

    crate::info!(
        "fork: pid {} forked to pid {} (tid {})",
        parent_pid,
        child_pid,
        child_tid
    );

    Ok(ForkResult {
        child_pid,
        child_tid,
    })
}

/// Deep-copies every present page below `heap_end` (the heap and
/// whatever data/bss precedes it) and the parent's entire user stack
/// region into the child's directory, both via the shared range-copy
/// operation rather than a hand-rolled per-frame loop.
fn page_copy_user_space(
    child_dir_id: paging::DirId,
    parent_dir_id: paging::DirId,
    heap_end: u32,
    stack_base: u32,
    stack_size: u32,
) -> KResult<()> {
    use crate::mm::block::align_up;

    let heap_len = align_up(heap_end, paging::PAGE_SIZE);
    if heap_len > 0 {
        paging::copy(child_dir_id, parent_dir_id, 0, heap_len)?;
    }
    if stack_size > 0 {
        paging::copy(child_dir_id, parent_dir_id, stack_base, stack_size)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trampoline_address_is_page_aligned() {
        assert_eq!(FORK_CHILD_TRAMPOLINE % crate::mm::paging::PAGE_SIZE, 0);
    }
}
