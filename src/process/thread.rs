//! Thread table: one flat slot array shared by every process, mirroring
//! `table::ProcessTable`'s flat-slot design rather than the original's
//! per-process thread chunk list.

use alloc::vec::Vec;

use crate::lib::error::{KernelError, KResult};
use crate::process::table::Pid;

pub const MAX_THREADS: usize = 1024;

pub type Tid = u32;
pub type TaskId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Zombie,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    pub eip: u32,
    pub esp: u32,
    pub ebp: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct StackInfo {
    pub top: u32,
    pub bottom: u32,
    pub size: u32,
}

pub struct Thread {
    pub tid: Tid,
    pub task_id: TaskId,
    pub pid: Pid,
    pub state: ThreadState,
    pub entry_point: u32,
    pub context: Context,
    pub user_stack: StackInfo,
    pub kernel_stack: StackInfo,
}

struct Slot {
    used: bool,
    thread: Option<Thread>,
}

pub struct ThreadTable {
    slots: Vec<Slot>,
    next_task_id: TaskId,
}

impl ThreadTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_THREADS);
        for _ in 0..MAX_THREADS {
            slots.push(Slot {
                used: false,
                thread: None,
            });
        }
        Self {
            slots,
            next_task_id: 1,
        }
    }

    pub fn allocate(
        &mut self,
        pid: Pid,
        entry_point: u32,
        user_stack: StackInfo,
        kernel_stack: StackInfo,
    ) -> KResult<Tid> {
        let index = self
            .slots
            .iter()
            .position(|s| !s.used)
            .ok_or(KernelError::TableFull)?;
        let tid = index as Tid;
        let task_id = self.next_task_id;
        self.next_task_id += 1;

        self.slots[index] = Slot {
            used: true,
            thread: Some(Thread {
                tid,
                task_id,
                pid,
                state: ThreadState::Ready,
                entry_point,
                context: Context {
                    eip: entry_point,
                    esp: user_stack.top,
                    ebp: user_stack.top,
                },
                user_stack,
                kernel_stack,
            }),
        };
        Ok(tid)
    }

    /// `thread_add_main(proc)`: the main thread of a freshly loaded
    /// process, always allocated as tid 0 in the process's own thread
    /// count and starting at the process's entry point on its own stack.
    pub fn thread_add_main(
        &mut self,
        pid: Pid,
        entry_point: u32,
        user_stack: StackInfo,
        kernel_stack: StackInfo,
    ) -> KResult<Tid> {
        self.allocate(pid, entry_point, user_stack, kernel_stack)
    }

    /// `thread_create(entry, user_stack_addr, user_stack_size)`: a
    /// secondary thread in an already-running process. The caller has
    /// already mapped `user_stack_addr..+user_stack_size` in the current
    /// address space; only a kernel stack is allocated here.
    pub fn thread_create(
        &mut self,
        pid: Pid,
        entry: u32,
        user_stack_addr: u32,
        user_stack_size: u32,
        kernel_stack: StackInfo,
    ) -> KResult<Tid> {
        let word_size = 4;
        let user_stack = StackInfo {
            top: user_stack_addr + user_stack_size - word_size,
            bottom: user_stack_addr,
            size: user_stack_size,
        };
        self.allocate(pid, entry, user_stack, kernel_stack)
    }

    /// `thread_fork(child_pid, entry_point, user_stack, kernel_stack)`:
    /// the child's main thread after a `fork`. Always tid 0 in the
    /// child's own numbering; `entry_point` is the special child-only
    /// trampoline address that distinguishes the child's first resumption
    /// from the parent's ordinary return from the kernel call.
    pub fn thread_fork(
        &mut self,
        child_pid: Pid,
        entry_point: u32,
        user_stack: StackInfo,
        kernel_stack: StackInfo,
    ) -> KResult<Tid> {
        self.allocate(child_pid, entry_point, user_stack, kernel_stack)
    }

    pub fn get(&self, tid: Tid) -> KResult<&Thread> {
        self.slots
            .get(tid as usize)
            .filter(|s| s.used)
            .and_then(|s| s.thread.as_ref())
            .ok_or(KernelError::NoSuchTask)
    }

    pub fn get_mut(&mut self, tid: Tid) -> KResult<&mut Thread> {
        self.slots
            .get_mut(tid as usize)
            .filter(|s| s.used)
            .and_then(|s| s.thread.as_mut())
            .ok_or(KernelError::NoSuchTask)
    }

    pub fn set_state(&mut self, tid: Tid, state: ThreadState) -> KResult<()> {
        self.get_mut(tid)?.state = state;
        Ok(())
    }

    pub fn free(&mut self, tid: Tid) -> KResult<Thread> {
        let slot = self
            .slots
            .get_mut(tid as usize)
            .ok_or(KernelError::NoSuchTask)?;
        if !slot.used {
            return Err(KernelError::NoSuchTask);
        }
        slot.used = false;
        slot.thread.take().ok_or(KernelError::NoSuchTask)
    }

    pub fn threads_of(&self, pid: Pid) -> impl Iterator<Item = &Thread> {
        self.slots
            .iter()
            .filter(move |s| s.used)
            .filter_map(|s| s.thread.as_ref())
            .filter(move |t| t.pid == pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(top: u32) -> StackInfo {
        StackInfo {
            top,
            bottom: top - 0x1000,
            size: 0x1000,
        }
    }

    #[test]
    fn allocate_assigns_distinct_task_ids() {
        let mut table = ThreadTable::new();
        let t1 = table.allocate(0, 0x1000, stack(0x2000), stack(0x3000)).unwrap();
        let t2 = table.allocate(0, 0x1000, stack(0x2000), stack(0x3000)).unwrap();
        assert_ne!(table.get(t1).unwrap().task_id, table.get(t2).unwrap().task_id);
    }

    #[test]
    fn new_thread_starts_ready_with_context_at_entry() {
        let mut table = ThreadTable::new();
        let tid = table.allocate(1, 0x4000, stack(0x8000), stack(0x9000)).unwrap();
        let t = table.get(tid).unwrap();
        assert_eq!(t.state, ThreadState::Ready);
        assert_eq!(t.context.eip, 0x4000);
    }

    #[test]
    fn thread_add_main_allocates_at_process_entry_point() {
        let mut table = ThreadTable::new();
        let tid = table
            .thread_add_main(3, 0x4000_1000, stack(0x8000), stack(0x9000))
            .unwrap();
        assert_eq!(table.get(tid).unwrap().context.eip, 0x4000_1000);
    }

    #[test]
    fn thread_create_places_top_one_word_below_stack_end() {
        let mut table = ThreadTable::new();
        let tid = table
            .thread_create(1, 0x4000_2000, 0x5000_0000, 0x1000, stack(0x9000))
            .unwrap();
        let t = table.get(tid).unwrap();
        assert_eq!(t.user_stack.top, 0x5000_0ffc);
        assert_eq!(t.user_stack.bottom, 0x5000_0000);
    }

    #[test]
    fn threads_of_filters_by_owning_process() {
        let mut table = ThreadTable::new();
        table.allocate(1, 0, stack(0x1000), stack(0x2000)).unwrap();
        table.allocate(2, 0, stack(0x1000), stack(0x2000)).unwrap();
        table.allocate(1, 0, stack(0x1000), stack(0x2000)).unwrap();
        assert_eq!(table.threads_of(1).count(), 2);
        assert_eq!(table.threads_of(2).count(), 1);
    }
}
