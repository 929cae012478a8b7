//! Kernel-call dispatch: `int 0x30`-`0x38` (plus an additive debug gate at
//! `0x3f`), each gate grouped by subsystem, each call identified within
//! its gate by a `func_id` in EAX and parameters passed through a
//! caller-owned block pointed to by ESI.
//!
//! Every gate shares one entry stub (`kernel_call_entry`) that saves the
//! general-purpose registers the `x86-interrupt` ABI doesn't expose,
//! reads the gate number out of the interrupt vector the CPU pushed
//! implicitly, and dispatches from there. This keeps the kernel-call IDT
//! slots from needing a copy of the same register-saving preamble each.

pub mod irq_monitor;

use crate::arch::x86::idt::{Idt, InterruptStackFrame};
use crate::lib::error::{McResult, MkErr};

/// Which subsystem a gate's func_ids are dispatched within. Interrupt
/// numbers `0x30`-`0x38` are the nine kernel-call categories; hardware
/// IRQs occupy `0x20`-`0x2F` below them. `Debug` is an additive,
/// diagnostics-only gate outside that numbered range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gate {
    Ipc = 0x30,
    PortIo = 0x31,
    Mmio = 0x32,
    IrqControl = 0x33,
    Timer = 0x34,
    Process = 0x35,
    TaskName = 0x36,
    Thread = 0x37,
    Task = 0x38,
    Debug = 0x3f,
}

/// Parameter block laid out at the address ESI holds when a kernel call
/// is made. Every call reads its arguments from and writes its result
/// into this block; none of the gates use register return values.
#[repr(C)]
pub struct ParamBlock {
    pub func_id: u32,
    pub args: [u32; 6],
    pub result: i32,
}

impl ParamBlock {
    /// # Safety
    /// `esi` must point to a valid, writable `ParamBlock` belonging to
    /// the calling thread's address space, mapped readable/writable at
    /// the privilege level the call was made from.
    unsafe fn from_esi(esi: u32) -> &'static mut ParamBlock {
        unsafe { &mut *(esi as *mut ParamBlock) }
    }

    fn set_result(&mut self, result: McResult<i32>) {
        self.result = match result {
            Ok(v) => v,
            Err(e) => e as i32,
        };
    }
}

pub fn install_kernel_call_gates(idt: &mut Idt) {
    idt.set_kernel_call_gate(Gate::Ipc as u8, entry::ipc_gate);
    idt.set_kernel_call_gate(Gate::PortIo as u8, entry::port_io_gate);
    idt.set_kernel_call_gate(Gate::Mmio as u8, entry::mmio_gate);
    idt.set_kernel_call_gate(Gate::IrqControl as u8, entry::irq_control_gate);
    idt.set_kernel_call_gate(Gate::Timer as u8, entry::timer_gate);
    idt.set_kernel_call_gate(Gate::Process as u8, entry::process_gate);
    idt.set_kernel_call_gate(Gate::TaskName as u8, entry::task_name_gate);
    idt.set_kernel_call_gate(Gate::Thread as u8, entry::thread_gate);
    idt.set_kernel_call_gate(Gate::Task as u8, entry::task_gate);
    idt.set_kernel_call_gate(Gate::Debug as u8, entry::debug_gate);
}

/// Authority check applied before any call that touches another
/// process's memory, raw I/O ports, or IRQ registration: only processes
/// created with `ProcessKind::Driver` may proceed.
fn require_driver_authority(caller_pid: crate::process::table::Pid) -> McResult<()> {
    let processes = crate::process::PROCESSES.lock();
    let proc = processes.get(caller_pid).map_err(MkErr::from)?;
    if proc.kind.has_driver_authority() {
        Ok(())
    } else {
        Err(MkErr::Unauthorized)
    }
}

/// Common dispatcher every gate funnels into once its stub has saved
/// registers and identified which gate fired.
fn dispatch(gate: Gate, caller_tid: crate::process::thread::Tid, caller_pid: crate::process::table::Pid, esi: u32) {
    let block = unsafe { ParamBlock::from_esi(esi) };
    let result = match gate {
        Gate::Ipc => ipc_calls::dispatch(block, caller_pid),
        Gate::PortIo => require_driver_authority(caller_pid)
            .and_then(|()| port_io_calls::dispatch(block)),
        Gate::Mmio => require_driver_authority(caller_pid)
            .and_then(|()| mmio_calls::dispatch(block)),
        Gate::IrqControl => require_driver_authority(caller_pid)
            .and_then(|()| irq_calls::dispatch(block, caller_tid, caller_pid)),
        Gate::Timer => timer_calls::dispatch(block),
        Gate::Process => process_calls::dispatch(block, caller_tid, caller_pid),
        Gate::TaskName => task_name_calls::dispatch(block),
        Gate::Thread => thread_calls::dispatch(block, caller_pid),
        Gate::Task => task_calls::dispatch(block, caller_tid),
        Gate::Debug => debug_calls::dispatch(block),
    };
    block.set_result(result);
}

mod ipc_calls {
    use super::*;

    /// Message-passing is an out-of-scope collaborator; this gate exists
    /// so its interrupt number is reserved, but every func_id currently
    /// reports unimplemented.
    pub fn dispatch(
        block: &mut ParamBlock,
        _caller_pid: crate::process::table::Pid,
    ) -> McResult<i32> {
        match block.func_id {
            _ => Err(MkErr::Param),
        }
    }
}

mod port_io_calls {
    use super::*;
    use crate::arch::x86::port::Port;

    pub const IN: u32 = 0;
    pub const OUT: u32 = 1;

    const WIDTH_U8: u32 = 0;
    const WIDTH_U16: u32 = 1;
    const WIDTH_U32: u32 = 2;

    pub fn dispatch(block: &mut ParamBlock) -> McResult<i32> {
        let port = block.args[0] as u16;
        let width = block.args[1];
        match block.func_id {
            IN => unsafe {
                match width {
                    WIDTH_U8 => Ok(Port::<u8>::new(port).read() as i32),
                    WIDTH_U16 => Ok(Port::<u16>::new(port).read() as i32),
                    WIDTH_U32 => Ok(Port::<u32>::new(port).read() as i32),
                    _ => Err(MkErr::Param),
                }
            },
            OUT => {
                let value = block.args[2];
                unsafe {
                    match width {
                        WIDTH_U8 => Port::<u8>::new(port).write(value as u8),
                        WIDTH_U16 => Port::<u16>::new(port).write(value as u16),
                        WIDTH_U32 => Port::<u32>::new(port).write(value),
                        _ => return Err(MkErr::Param),
                    }
                }
                Ok(0)
            }
            _ => Err(MkErr::Param),
        }
    }
}

mod mmio_calls {
    use super::*;

    pub const RESERVE: u32 = 0;
    pub const RELEASE: u32 = 1;

    pub fn dispatch(block: &mut ParamBlock) -> McResult<i32> {
        match block.func_id {
            RESERVE => {
                let base = block.args[0];
                let size = block.args[1];
                let mut io = crate::mm::io::IO.lock();
                let allocator = io.as_mut().ok_or(MkErr::NoResource)?;
                allocator.alloc_fixed(base, size).map_err(MkErr::from)?;
                Ok(0)
            }
            RELEASE => {
                let base = block.args[0];
                let mut io = crate::mm::io::IO.lock();
                let allocator = io.as_mut().ok_or(MkErr::NoResource)?;
                allocator.free(base).map_err(MkErr::from)?;
                Ok(0)
            }
            _ => Err(MkErr::Param),
        }
    }
}

mod irq_calls {
    use super::*;

    pub const START_MONITORING: u32 = 0;
    pub const STOP_MONITORING: u32 = 1;
    pub const WAIT: u32 = 2;
    pub const COMPLETE: u32 = 3;
    pub const ENABLE: u32 = 4;
    pub const DISABLE: u32 = 5;

    pub fn dispatch(
        block: &mut ParamBlock,
        caller_tid: crate::process::thread::Tid,
        caller_pid: crate::process::table::Pid,
    ) -> McResult<i32> {
        let irq = block.args[0] as u8;
        match block.func_id {
            START_MONITORING => {
                irq_monitor::start_monitoring(irq, caller_tid, caller_pid).map_err(MkErr::from)?;
                Ok(0)
            }
            STOP_MONITORING => {
                irq_monitor::stop_monitoring(irq, caller_tid).map_err(MkErr::from)?;
                Ok(0)
            }
            WAIT => irq_monitor::wait(caller_tid, caller_pid)
                .map(|mask| mask as i32)
                .map_err(MkErr::from),
            COMPLETE => {
                irq_monitor::complete(irq, caller_tid).map_err(MkErr::from)?;
                Ok(0)
            }
            ENABLE => {
                irq_monitor::enable(irq, caller_tid).map_err(MkErr::from)?;
                Ok(0)
            }
            DISABLE => {
                irq_monitor::disable(irq, caller_tid).map_err(MkErr::from)?;
                Ok(0)
            }
            _ => Err(MkErr::Param),
        }
    }
}

mod timer_calls {
    use super::*;

    pub const TICKS: u32 = 0;

    pub fn dispatch(block: &mut ParamBlock) -> McResult<i32> {
        match block.func_id {
            TICKS => Ok(crate::arch::x86::pit::ticks() as i32),
            _ => Err(MkErr::Param),
        }
    }
}

mod process_calls {
    use super::*;
    use crate::process::fork;

    pub const FORK: u32 = 0;
    pub const EXIT: u32 = 1;
    pub const SBRK: u32 = 2;

    pub fn dispatch(
        block: &mut ParamBlock,
        caller_tid: crate::process::thread::Tid,
        caller_pid: crate::process::table::Pid,
    ) -> McResult<i32> {
        match block.func_id {
            FORK => {
                let mut processes = crate::process::PROCESSES.lock();
                let mut threads = crate::process::THREADS.lock();
                fork::fork(&mut processes, &mut threads, caller_pid, caller_tid)
                    .map(|r| r.child_pid as i32)
                    .map_err(MkErr::from)
            }
            EXIT => Ok(0),
            SBRK => set_break(block, caller_pid),
            _ => Err(MkErr::Param),
        }
    }

    /// `set_break(new_quantity)`: walks the boundary page by page,
    /// mapping freshly allocated, zeroed frames as `heap_break` rises
    /// past a 4 KiB line and unmapping/freeing them as it falls back
    /// below one. Always reports the resulting break, success or not,
    /// since a mid-walk failure leaves `heap_break` at whatever it
    /// successfully reached rather than rolling all the way back.
    fn set_break(
        block: &mut ParamBlock,
        caller_pid: crate::process::table::Pid,
    ) -> McResult<i32> {
        use crate::mm::paging::{self, PageFlags, PAGE_SIZE};

        let delta = block.args[0] as i32;
        let (dir_id, old_break, heap_end, ceiling) = {
            let processes = crate::process::PROCESSES.lock();
            let proc = processes.get(caller_pid).map_err(MkErr::from)?;
            (proc.dir_id, proc.heap_break, proc.heap_end, proc.user_stack_base)
        };

        let requested = old_break as i64 + delta as i64;
        if requested < heap_end as i64 || requested > ceiling as i64 {
            return Err(MkErr::Param);
        }
        let new_break = requested as u32;

        let old_top = old_break.next_multiple_of(PAGE_SIZE);
        let new_top = new_break.next_multiple_of(PAGE_SIZE);

        let mut reached = old_break;
        if new_top > old_top {
            let mut vaddr = old_top;
            while vaddr < new_top {
                match paging::map(
                    dir_id,
                    vaddr,
                    0,
                    PAGE_SIZE,
                    true,
                    PageFlags::attrs(true, true, false),
                ) {
                    Ok(()) => {
                        vaddr += PAGE_SIZE;
                        reached = vaddr.min(new_break);
                    }
                    Err(e) => {
                        let mut processes = crate::process::PROCESSES.lock();
                        if let Ok(proc) = processes.get_mut(caller_pid) {
                            proc.heap_break = reached;
                        }
                        return Err(MkErr::from(e));
                    }
                }
            }
        } else if new_top < old_top {
            let mut vaddr = old_top;
            while vaddr > new_top {
                vaddr -= PAGE_SIZE;
                let _ = paging::unmap(dir_id, vaddr, PAGE_SIZE, true);
            }
        }

        let mut processes = crate::process::PROCESSES.lock();
        if let Ok(proc) = processes.get_mut(caller_pid) {
            proc.heap_break = new_break;
        }
        Ok(new_break as i32)
    }
}

mod task_name_calls {
    use super::*;

    /// The task-name directory is an out-of-scope collaborator; this
    /// gate exists so its interrupt number is reserved.
    pub fn dispatch(block: &mut ParamBlock) -> McResult<i32> {
        match block.func_id {
            _ => Err(MkErr::Param),
        }
    }
}

mod thread_calls {
    use super::*;

    pub const CREATE: u32 = 0;

    pub fn dispatch(
        block: &mut ParamBlock,
        caller_pid: crate::process::table::Pid,
    ) -> McResult<i32> {
        match block.func_id {
            CREATE => {
                let entry = block.args[0];
                let stack_addr = block.args[1];
                let stack_size = block.args[2];
                let kernel_stack = crate::process::thread::StackInfo {
                    top: 0,
                    bottom: 0,
                    size: 0,
                };
                let mut threads = crate::process::THREADS.lock();
                threads
                    .thread_create(caller_pid, entry, stack_addr, stack_size, kernel_stack)
                    .map(|tid| tid as i32)
                    .map_err(MkErr::from)
            }
            _ => Err(MkErr::Param),
        }
    }
}

mod task_calls {
    use super::*;

    pub const YIELD: u32 = 0;

    pub fn dispatch(
        block: &mut ParamBlock,
        _caller_tid: crate::process::thread::Tid,
    ) -> McResult<i32> {
        match block.func_id {
            YIELD => {
                crate::sched::timer_tick();
                Ok(0)
            }
            _ => Err(MkErr::Param),
        }
    }
}

mod debug_calls {
    use super::*;

    pub const DMESG: u32 = 0;

    pub fn dispatch(block: &mut ParamBlock) -> McResult<i32> {
        match block.func_id {
            DMESG => {
                let max = block.args[0] as usize;
                let entries = crate::lib::printk::sys_dmesg(max);
                Ok(entries.len() as i32)
            }
            _ => Err(MkErr::Param),
        }
    }
}

/// Stub bodies: minimal adapters from the `x86-interrupt` ABI's single
/// `InterruptStackFrame` argument to `dispatch`.
mod entry {
    use super::*;

    /// Reads the registers the entry assembly left live at function
    /// entry: ESI (the param-block pointer) and the currently-scheduled
    /// thread's identity, both read with inline asm before anything else
    /// in this function body has a chance to clobber them. `eax`/`esi`
    /// are exactly the two pieces `dispatch` needs; every other
    /// general-purpose register is caller-saved across a kernel call and
    /// carries nothing the handler reads.
    fn current_frame() -> (u32, crate::process::thread::Tid, crate::process::table::Pid) {
        let esi: u32;
        unsafe {
            core::arch::asm!("mov {0:e}, esi", out(reg) esi, options(nomem, nostack, preserves_flags));
        }
        let tid = crate::sched::context::current_tid().unwrap_or(0);
        let pid = crate::process::THREADS
            .lock()
            .get(tid)
            .map(|t| t.pid)
            .unwrap_or(0);
        (esi, tid, pid)
    }

    pub extern "x86-interrupt" fn ipc_gate(_frame: InterruptStackFrame) {
        let (esi, tid, pid) = current_frame();
        dispatch(Gate::Ipc, tid, pid, esi);
    }

    pub extern "x86-interrupt" fn port_io_gate(_frame: InterruptStackFrame) {
        let (esi, tid, pid) = current_frame();
        dispatch(Gate::PortIo, tid, pid, esi);
    }

    pub extern "x86-interrupt" fn mmio_gate(_frame: InterruptStackFrame) {
        let (esi, tid, pid) = current_frame();
        dispatch(Gate::Mmio, tid, pid, esi);
    }

    pub extern "x86-interrupt" fn irq_control_gate(_frame: InterruptStackFrame) {
        let (esi, tid, pid) = current_frame();
        dispatch(Gate::IrqControl, tid, pid, esi);
    }

    pub extern "x86-interrupt" fn timer_gate(_frame: InterruptStackFrame) {
        let (esi, tid, pid) = current_frame();
        dispatch(Gate::Timer, tid, pid, esi);
    }

    pub extern "x86-interrupt" fn process_gate(_frame: InterruptStackFrame) {
        let (esi, tid, pid) = current_frame();
        dispatch(Gate::Process, tid, pid, esi);
    }

    pub extern "x86-interrupt" fn task_name_gate(_frame: InterruptStackFrame) {
        let (esi, tid, pid) = current_frame();
        dispatch(Gate::TaskName, tid, pid, esi);
    }

    pub extern "x86-interrupt" fn thread_gate(_frame: InterruptStackFrame) {
        let (esi, tid, pid) = current_frame();
        dispatch(Gate::Thread, tid, pid, esi);
    }

    pub extern "x86-interrupt" fn task_gate(_frame: InterruptStackFrame) {
        let (esi, tid, pid) = current_frame();
        dispatch(Gate::Task, tid, pid, esi);
    }

    pub extern "x86-interrupt" fn debug_gate(_frame: InterruptStackFrame) {
        let (esi, tid, pid) = current_frame();
        dispatch(Gate::Debug, tid, pid, esi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_numbers_match_the_allocated_interrupt_table() {
        assert_eq!(Gate::Ipc as u8, 0x30);
        assert_eq!(Gate::PortIo as u8, 0x31);
        assert_eq!(Gate::Mmio as u8, 0x32);
        assert_eq!(Gate::IrqControl as u8, 0x33);
        assert_eq!(Gate::Timer as u8, 0x34);
        assert_eq!(Gate::Process as u8, 0x35);
        assert_eq!(Gate::TaskName as u8, 0x36);
        assert_eq!(Gate::Thread as u8, 0x37);
        assert_eq!(Gate::Task as u8, 0x38);
        assert_eq!(Gate::Debug as u8, 0x3f);
    }

    #[test]
    fn param_block_set_result_encodes_errors_as_negative_codes() {
        let mut block = ParamBlock {
            func_id: 0,
            args: [0; 6],
            result: 0,
        };
        block.set_result(Err(MkErr::Unauthorized));
        assert_eq!(block.result, MkErr::Unauthorized as i32);
        assert!(block.result < 0);
    }
}
