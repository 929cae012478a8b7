//! 32-bit Interrupt Descriptor Table: CPU exception vectors (0-31), the
//! remapped PIC IRQ vectors (32-47), and the kernel-call gate range
//! (0x30-0x3F) through which user-mode threads enter the kernel via `int`.
//!
//! Built by hand against `extern "x86-interrupt"` handlers rather than the
//! `x86_64` crate's `InterruptDescriptorTable`, since that type assumes a
//! 64-bit interrupt stack frame.

use lazy_static::lazy_static;
use spin::Mutex;

use super::gdt::KERNEL_CODE_SELECTOR;
use super::pic::Irq;

/// Register state pushed by the CPU before an `x86-interrupt` handler runs,
/// in push order for a same-privilege interrupt (no privilege change).
#[repr(C)]
pub struct InterruptStackFrame {
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

pub type HandlerFn = extern "x86-interrupt" fn(InterruptStackFrame);
pub type HandlerFnWithCode = extern "x86-interrupt" fn(InterruptStackFrame, u32);

const GATE_INTERRUPT_32: u8 = 0x8e; // present, DPL 0, 32-bit interrupt gate
const GATE_INTERRUPT_32_RING3: u8 = 0xee; // present, DPL 3, callable via `int`

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct Entry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl Entry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, type_attr: u8) -> Self {
        Self {
            offset_low: (handler & 0xffff) as u16,
            selector: KERNEL_CODE_SELECTOR,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xffff) as u16,
        }
    }
}

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

pub struct Idt {
    entries: [Entry; 256],
}

impl Idt {
    const fn new() -> Self {
        Self {
            entries: [Entry::missing(); 256],
        }
    }

    pub fn set_handler(&mut self, vector: u8, handler: HandlerFn) {
        self.entries[vector as usize] = Entry::new(handler as usize as u32, GATE_INTERRUPT_32);
    }

    pub fn set_handler_with_code(&mut self, vector: u8, handler: HandlerFnWithCode) {
        self.entries[vector as usize] = Entry::new(handler as usize as u32, GATE_INTERRUPT_32);
    }

    /// Kernel-call gates must be DPL 3 so user-mode `int 0x30`-`0x3F`
    /// doesn't take a general protection fault.
    pub fn set_kernel_call_gate(&mut self, vector: u8, handler: HandlerFn) {
        self.entries[vector as usize] =
            Entry::new(handler as usize as u32, GATE_INTERRUPT_32_RING3);
    }

    fn pointer(&self) -> DescriptorTablePointer {
        DescriptorTablePointer {
            limit: (core::mem::size_of::<[Entry; 256]>() - 1) as u16,
            base: self.entries.as_ptr() as u32,
        }
    }
}

unsafe impl Send for Idt {}

lazy_static! {
    static ref IDT: Mutex<Idt> = Mutex::new(build_idt());
}

fn build_idt() -> Idt {
    let mut idt = Idt::new();

    idt.set_handler(0, exceptions::divide_error);
    idt.set_handler(3, exceptions::breakpoint);
    idt.set_handler(6, exceptions::invalid_opcode);
    idt.set_handler_with_code(8, exceptions::double_fault);
    idt.set_handler_with_code(13, exceptions::general_protection_fault);
    idt.set_handler_with_code(14, exceptions::page_fault);

    idt.set_handler(Irq::Timer.vector(), irq::timer);
    idt.set_handler(Irq::Keyboard.vector(), irq::keyboard);
    idt.set_handler(Irq::PrimaryAta.vector(), irq::primary_ata);
    idt.set_handler(Irq::SecondaryAta.vector(), irq::secondary_ata);

    crate::syscall::install_kernel_call_gates(&mut idt);

    idt
}

/// # Safety
/// Must run after `gdt::init` so `KERNEL_CODE_SELECTOR` already names a
/// valid code segment.
pub unsafe fn init() {
    let idt = IDT.lock();
    let pointer = idt.pointer();
    unsafe {
        core::arch::asm!("lidt [{0}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    }
}

mod exceptions {
    use super::InterruptStackFrame;

    pub extern "x86-interrupt" fn divide_error(frame: InterruptStackFrame) {
        panic!("divide error at {:#x}", frame.eip);
    }

    pub extern "x86-interrupt" fn breakpoint(frame: InterruptStackFrame) {
        crate::warn!("breakpoint at {:#x}", frame.eip);
    }

    pub extern "x86-interrupt" fn invalid_opcode(frame: InterruptStackFrame) {
        panic!("invalid opcode at {:#x}", frame.eip);
    }

    pub extern "x86-interrupt" fn double_fault(frame: InterruptStackFrame, code: u32) -> ! {
        panic!("double fault (code {:#x}) at {:#x}", code, frame.eip);
    }

    pub extern "x86-interrupt" fn general_protection_fault(
        frame: InterruptStackFrame,
        code: u32,
    ) {
        panic!(
            "general protection fault (code {:#x}) at {:#x}",
            code, frame.eip
        );
    }

    pub extern "x86-interrupt" fn page_fault(frame: InterruptStackFrame, code: u32) {
        let fault_addr = super::super::cpu::read_cr2();
        panic!(
            "page fault (code {:#x}) at {:#x}, fault address {:#x}",
            code, frame.eip, fault_addr
        );
    }
}

mod irq {
    use super::InterruptStackFrame;
    use crate::arch::x86::pic::{Irq, PICS};

    pub extern "x86-interrupt" fn timer(_frame: InterruptStackFrame) {
        crate::arch::x86::pit::on_tick();
        crate::sched::timer_tick();
        unsafe {
            PICS.lock().notify_end_of_interrupt(Irq::Timer.vector());
        }
    }

    pub extern "x86-interrupt" fn keyboard(_frame: InterruptStackFrame) {
        unsafe {
            PICS.lock().notify_end_of_interrupt(Irq::Keyboard.vector());
        }
    }

    pub extern "x86-interrupt" fn primary_ata(_frame: InterruptStackFrame) {
        // No EOI here: the owning driver thread sends it via `complete`
        // once it has actually serviced the device.
        crate::syscall::irq_monitor::on_irq(Irq::PrimaryAta as u8);
    }

    pub extern "x86-interrupt" fn secondary_ata(_frame: InterruptStackFrame) {
        let vector = Irq::SecondaryAta.vector();
        if PICS.lock().is_spurious(vector) {
            return;
        }
        crate::syscall::irq_monitor::on_irq(Irq::SecondaryAta as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_call_gate_is_callable_from_ring3() {
        let mut idt = Idt::new();
        idt.set_kernel_call_gate(0x30, exceptions_test_handler);
        let entry = idt.entries[0x30];
        assert_eq!(entry.type_attr, GATE_INTERRUPT_32_RING3);
    }

    extern "x86-interrupt" fn exceptions_test_handler(_frame: InterruptStackFrame) {}
}
