//! IRQ monitor: lets a driver thread block until one or more hardware
//! interrupts fire, bridging the IDT's interrupt context (which can't
//! safely do much more than flag the event) to the scheduler's blocking
//! primitives.
//!
//! Ownership is per-task, not per-IRQ: a `WaitInfo` slot belongs to one
//! task and tracks every IRQ line that task currently monitors via two
//! bitmasks, `monitored_mask` and `pending_mask`. A given IRQ line may be
//! owned by at most one task at a time (enforced across every slot at
//! `start_monitoring`); the task gives it up with `stop_monitoring`, which
//! frees the slot entirely once no IRQ remains monitored.
//!
//! IRQs 0 (PIT), 2 (cascade) and 8 (RTC) are kernel-reserved and can never
//! be monitored this way; the timer's own handler drives the scheduler
//! directly instead.

use spin::Mutex;

use crate::arch::x86::pic::Irq as HwIrq;
use crate::lib::error::{KernelError, KResult};
use crate::process::table::{Pid, ProcessKind};
use crate::process::thread::Tid;

const MAX_WAITERS: usize = 32;
const IRQ_COUNT: u32 = 16;

const RESERVED_IRQS: [u8; 3] = [0, 2, 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Waiting,
}

#[derive(Clone, Copy)]
struct WaitInfo {
    tid: Tid,
    pid: Pid,
    monitored_mask: u16,
    pending_mask: u16,
    state: State,
}

impl WaitInfo {
    fn new(tid: Tid, pid: Pid) -> Self {
        Self {
            tid,
            pid,
            monitored_mask: 0,
            pending_mask: 0,
            state: State::Idle,
        }
    }
}

struct Monitor {
    slots: [Option<WaitInfo>; MAX_WAITERS],
}

impl Monitor {
    const fn new() -> Self {
        Self {
            slots: [None; MAX_WAITERS],
        }
    }

    fn find_by_tid(&self, tid: Tid) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(w) if w.tid == tid))
    }

    fn irq_owned_by_other(&self, irq: u8, tid: Tid) -> bool {
        self.slots.iter().flatten().any(|w| {
            w.tid != tid && w.monitored_mask & (1 << irq) != 0
        })
    }
}

lazy_static::lazy_static! {
    static ref MONITOR: Mutex<Monitor> = Mutex::new(Monitor::new());
}

fn validate_irq(irq: u8) -> KResult<()> {
    if irq as u32 >= IRQ_COUNT || RESERVED_IRQS.contains(&irq) {
        return Err(KernelError::InvalidParam);
    }
    Ok(())
}

fn hw_irq(irq: u8) -> Option<HwIrq> {
    Some(match irq {
        1 => HwIrq::Keyboard,
        3 => HwIrq::Com2,
        4 => HwIrq::Com1,
        5 => HwIrq::Lpt2,
        6 => HwIrq::Floppy,
        7 => HwIrq::Lpt1,
        9 => HwIrq::Free9,
        10 => HwIrq::Free10,
        11 => HwIrq::Free11,
        12 => HwIrq::Mouse,
        13 => HwIrq::Fpu,
        14 => HwIrq::PrimaryAta,
        15 => HwIrq::SecondaryAta,
        _ => return None,
    })
}

fn caller_kind(pid: Pid) -> ProcessKind {
    crate::process::PROCESSES
        .lock()
        .get(pid)
        .map(|p| p.kind)
        .unwrap_or(ProcessKind::Driver)
}

/// `start_monitoring(irq)`: rejects reserved/out-of-range IRQs, rejects
/// an IRQ already owned by a different task, then reserves (or reuses)
/// the caller's WaitInfo slot and sets the monitored bit.
pub fn start_monitoring(irq: u8, tid: Tid, pid: Pid) -> KResult<()> {
    validate_irq(irq)?;
    let mut monitor = MONITOR.lock();

    if monitor.irq_owned_by_other(irq, tid) {
        return Err(KernelError::AlreadyStarted);
    }
    if let Some(idx) = monitor.find_by_tid(tid) {
        let slot = monitor.slots[idx].as_mut().unwrap();
        if slot.monitored_mask & (1 << irq) != 0 {
            return Err(KernelError::AlreadyStarted);
        }
        slot.monitored_mask |= 1 << irq;
        return Ok(());
    }

    let idx = monitor
        .slots
        .iter()
        .position(|s| s.is_none())
        .ok_or(KernelError::TableFull)?;
    let mut info = WaitInfo::new(tid, pid);
    info.monitored_mask = 1 << irq;
    monitor.slots[idx] = Some(info);
    Ok(())
}

/// `stop_monitoring(irq)`: ownership check, then clears both masks for
/// `irq`; frees the caller's slot entirely once nothing remains
/// monitored.
pub fn stop_monitoring(irq: u8, tid: Tid) -> KResult<()> {
    validate_irq(irq)?;
    let mut monitor = MONITOR.lock();
    let idx = monitor.find_by_tid(tid).ok_or(KernelError::NoSuchWait)?;
    let slot = monitor.slots[idx].as_mut().unwrap();
    if slot.monitored_mask & (1 << irq) == 0 {
        return Err(KernelError::PermissionDenied);
    }
    slot.monitored_mask &= !(1 << irq);
    slot.pending_mask &= !(1 << irq);
    if slot.monitored_mask == 0 {
        monitor.slots[idx] = None;
    }
    Ok(())
}

/// `wait()`: the caller must own at least one IRQ. Blocks if nothing is
/// pending yet; once pending (immediately, or after being woken),
/// returns the accumulated pending mask and clears it.
pub fn wait(tid: Tid, pid: Pid) -> KResult<u32> {
    {
        let monitor = MONITOR.lock();
        let idx = monitor.find_by_tid(tid).ok_or(KernelError::PermissionDenied)?;
        let slot = monitor.slots[idx].unwrap();
        if slot.monitored_mask == 0 {
            return Err(KernelError::PermissionDenied);
        }
        if slot.pending_mask == 0 {
            drop(monitor);
            MONITOR.lock().slots[idx].as_mut().unwrap().state = State::Waiting;
            crate::sched::block_current(tid, caller_kind(pid));
        }
    }

    let mut monitor = MONITOR.lock();
    let idx = monitor.find_by_tid(tid).ok_or(KernelError::PermissionDenied)?;
    let slot = monitor.slots[idx].as_mut().unwrap();
    let pending = slot.pending_mask as u32;
    slot.pending_mask = 0;
    slot.state = State::Idle;
    Ok(pending)
}

/// `complete(irq)`: ownership check, then signals end-of-interrupt for
/// the hardware line. Kept separate from `wait` because a driver may do
/// substantial register I/O between observing the IRQ and acknowledging
/// it.
pub fn complete(irq: u8, tid: Tid) -> KResult<()> {
    validate_irq(irq)?;
    {
        let monitor = MONITOR.lock();
        let idx = monitor.find_by_tid(tid).ok_or(KernelError::NoSuchWait)?;
        let slot = monitor.slots[idx].unwrap();
        if slot.monitored_mask & (1 << irq) == 0 {
            return Err(KernelError::PermissionDenied);
        }
    }
    if let Some(hw) = hw_irq(irq) {
        unsafe {
            crate::arch::x86::pic::PICS
                .lock()
                .notify_end_of_interrupt(hw.vector());
        }
    }
    Ok(())
}

/// `enable(irq)` / `disable(irq)`: ownership check, then gate the line
/// at the PIC.
pub fn enable(irq: u8, tid: Tid) -> KResult<()> {
    set_line_masked(irq, tid, false)
}

pub fn disable(irq: u8, tid: Tid) -> KResult<()> {
    set_line_masked(irq, tid, true)
}

fn set_line_masked(irq: u8, tid: Tid, mask: bool) -> KResult<()> {
    validate_irq(irq)?;
    let monitor = MONITOR.lock();
    let idx = monitor.find_by_tid(tid).ok_or(KernelError::NoSuchWait)?;
    let slot = monitor.slots[idx].unwrap();
    if slot.monitored_mask & (1 << irq) == 0 {
        return Err(KernelError::PermissionDenied);
    }
    drop(monitor);
    let hw = hw_irq(irq).expect("validate_irq already excluded reserved/out-of-range lines");
    let mut pics = crate::arch::x86::pic::PICS.lock();
    if mask {
        pics.disable_irq(hw);
    } else {
        pics.enable_irq(hw);
    }
    Ok(())
}

/// Called from the hardware IRQ handler for `irq` (already translated
/// from its PIC vector). Marks the bit pending in whichever WaitInfo
/// owns it and wakes that task if it was blocked in `wait`. Does not
/// send EOI; the owning driver thread acknowledges via `complete`.
pub fn on_irq(irq: u8) {
    let mut monitor = MONITOR.lock();
    let Some(idx) = monitor
        .slots
        .iter()
        .position(|s| matches!(s, Some(w) if w.monitored_mask & (1 << irq) != 0))
    else {
        return;
    };
    let slot = monitor.slots[idx].as_mut().unwrap();
    slot.pending_mask |= 1 << irq;
    let should_wake = slot.state == State::Waiting;
    let (tid, pid) = (slot.tid, slot.pid);
    if should_wake {
        slot.state = State::Idle;
    }
    drop(monitor);
    if should_wake {
        crate::sched::wake(tid, caller_kind(pid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_irqs_are_rejected() {
        assert_eq!(validate_irq(0), Err(KernelError::InvalidParam));
        assert_eq!(validate_irq(2), Err(KernelError::InvalidParam));
        assert_eq!(validate_irq(8), Err(KernelError::InvalidParam));
        assert_eq!(validate_irq(16), Err(KernelError::InvalidParam));
        assert!(validate_irq(5).is_ok());
    }

    #[test]
    fn start_monitoring_twice_for_the_same_task_is_already_started() {
        let mut monitor = Monitor::new();
        monitor.slots[0] = Some(WaitInfo {
            tid: 1,
            pid: 1,
            monitored_mask: 1 << 5,
            pending_mask: 0,
            state: State::Idle,
        });
        assert!(monitor.irq_owned_by_other(5, 2));
        assert!(!monitor.irq_owned_by_other(5, 1));
    }

    #[test]
    fn stop_monitoring_frees_the_slot_when_nothing_remains() {
        let mut monitor = Monitor::new();
        monitor.slots[0] = Some(WaitInfo {
            tid: 4,
            pid: 1,
            monitored_mask: 1 << 5,
            pending_mask: 1 << 5,
            state: State::Idle,
        });
        let idx = monitor.find_by_tid(4).unwrap();
        let slot = monitor.slots[idx].as_mut().unwrap();
        slot.monitored_mask &= !(1 << 5);
        slot.pending_mask &= !(1 << 5);
        if slot.monitored_mask == 0 {
            monitor.slots[idx] = None;
        }
        assert!(monitor.find_by_tid(4).is_none());
    }
}
