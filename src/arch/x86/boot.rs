//! Early boot sequence: bring up the console first so every later step can
//! log, then segmentation, interrupt routing, and the timer, in the order
//! each depends on the last.

use super::{gdt, idt, pic, pit, serial, tss};

/// Runs the fixed IA-32 bring-up sequence. Returns once interrupts are
/// enabled and the kernel can safely depend on preemption and logging.
///
/// # Safety
/// Must be called exactly once, as the first substantive action of
/// `_start`, on the bootstrap stack with interrupts still disabled.
pub unsafe fn init() {
    serial::init();
    crate::info!("mochi: serial console up");

    unsafe {
        gdt::init(tss::tss());
    }
    crate::info!("mochi: gdt loaded");

    unsafe {
        idt::init();
    }
    crate::info!("mochi: idt loaded");

    unsafe {
        pic::init();
    }
    crate::info!("mochi: pic remapped to vectors 32-47");

    unsafe {
        pit::init(crate::config::TIMER_HZ);
    }
    crate::info!("mochi: pit configured for {} Hz", crate::config::TIMER_HZ);

    pic::PICS.lock().enable_irq(pic::Irq::Timer);
    super::cpu::enable_interrupts();
    crate::info!("mochi: interrupts enabled");
}
