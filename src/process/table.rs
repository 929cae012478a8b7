//! Process table: a fixed-capacity slot array, each slot either free or
//! holding one process's bookkeeping.
//!
//! The original kernel grew this table in 4 KiB chunks linked together as
//! entries were needed (`TblThreadChunk_t`). A flat, fixed-capacity `Vec`
//! indexed directly by pid is used here instead: process count is bounded
//! and known well in advance on a single-CPU microkernel of this scale, so
//! the chunk-growth indirection buys nothing but complexity.

use alloc::vec::Vec;

use crate::lib::error::{KernelError, KResult};
use crate::mm::paging::DirId;
use crate::mm::virt::VirtAllocator;

pub const MAX_PROCESSES: usize = 256;

/// Priority band a process's threads are scheduled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessKind {
    Kernel = 0,
    Driver = 1,
    Server = 2,
    User = 3,
}

impl ProcessKind {
    /// Only `Driver` processes may issue the kernel calls that touch raw
    /// I/O ports, IRQ registration, or other processes' memory.
    pub fn has_driver_authority(self) -> bool {
        matches!(self, ProcessKind::Driver)
    }
}

pub type Pid = u32;

pub struct Process {
    pub pid: Pid,
    pub parent_pid: Option<Pid>,
    pub kind: ProcessKind,
    /// The directory holding this process's mappings, looked up through
    /// `mm::paging` rather than owned by value: several processes may
    /// point at the same shared directory (the idle/kernel one), and a
    /// `Process` record itself should not be the thing keeping page
    /// table memory alive.
    pub dir_id: DirId,
    /// This process's private virtual address space. `None` for
    /// kernel-kind processes, which only ever map into the shared kernel
    /// range and have no user-half addresses of their own to track.
    pub virt: Option<VirtAllocator>,
    pub entry_point: u32,
    pub heap_end: u32,
    pub heap_break: u32,
    pub user_stack_base: u32,
    pub user_stack_size: u32,
    pub thread_count: u32,
}

struct Slot {
    used: bool,
    proc: Option<Process>,
}

pub struct ProcessTable {
    slots: Vec<Slot>,
}

impl ProcessTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PROCESSES);
        for _ in 0..MAX_PROCESSES {
            slots.push(Slot {
                used: false,
                proc: None,
            });
        }
        Self { slots }
    }

    /// Allocates the first free slot and installs `build(pid)`'s result
    /// into it, returning the new pid.
    pub fn allocate(&mut self, build: impl FnOnce(Pid) -> Process) -> KResult<Pid> {
        let index = self
            .slots
            .iter()
            .position(|s| !s.used)
            .ok_or(KernelError::TableFull)?;
        let pid = index as Pid;
        self.slots[index] = Slot {
            used: true,
            proc: Some(build(pid)),
        };
        Ok(pid)
    }

    pub fn get(&self, pid: Pid) -> KResult<&Process> {
        self.slots
            .get(pid as usize)
            .filter(|s| s.used)
            .and_then(|s| s.proc.as_ref())
            .ok_or(KernelError::NoSuchTask)
    }

    pub fn get_mut(&mut self, pid: Pid) -> KResult<&mut Process> {
        self.slots
            .get_mut(pid as usize)
            .filter(|s| s.used)
            .and_then(|s| s.proc.as_mut())
            .ok_or(KernelError::NoSuchTask)
    }

    pub fn free(&mut self, pid: Pid) -> KResult<Process> {
        let slot = self
            .slots
            .get_mut(pid as usize)
            .ok_or(KernelError::NoSuchTask)?;
        if !slot.used {
            return Err(KernelError::NoSuchTask);
        }
        slot.used = false;
        slot.proc.take().ok_or(KernelError::NoSuchTask)
    }

    pub fn count_used(&self) -> usize {
        self.slots.iter().filter(|s| s.used).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_assigns_increasing_pids_to_free_slots() {
        let mut table = ProcessTable::new();
        let pid0 = table
            .allocate(|pid| Process {
                pid,
                parent_pid: None,
                kind: ProcessKind::Kernel,
                dir_id: 0,
                virt: None,
                entry_point: 0,
                heap_end: 0,
                heap_break: 0,
                user_stack_base: 0,
                user_stack_size: 0,
                thread_count: 0,
            })
            .unwrap();
        assert_eq!(pid0, 0);
        assert_eq!(table.count_used(), 1);
    }

    #[test]
    fn free_returns_slot_for_reuse() {
        let mut table = ProcessTable::new();
        let pid = table
            .allocate(|pid| Process {
                pid,
                parent_pid: None,
                kind: ProcessKind::User,
                dir_id: 1,
                virt: VirtAllocator::new_user().ok(),
                entry_point: 0,
                heap_end: 0,
                heap_break: 0,
                user_stack_base: 0,
                user_stack_size: 0,
                thread_count: 0,
            })
            .unwrap();
        table.free(pid).unwrap();
        assert_eq!(table.count_used(), 0);
        assert!(table.get(pid).is_err());
    }

    #[test]
    fn driver_authority_is_exclusive_to_driver_kind() {
        assert!(ProcessKind::Driver.has_driver_authority());
        assert!(!ProcessKind::Server.has_driver_authority());
        assert!(!ProcessKind::User.has_driver_authority());
        assert!(!ProcessKind::Kernel.has_driver_authority());
    }
}
