//! Programmable Interval Timer driver. Configures channel 0 to fire IRQ0
//! at a fixed rate and exposes a monotonic tick counter the scheduler uses
//! to drive preemption and log records use as a timestamp.

use core::sync::atomic::{AtomicU64, Ordering};

use super::port::Port;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_BASE_FREQUENCY: u32 = 1_193_182;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// # Safety
/// Must run once during boot, after `pic::init` and before interrupts are
/// enabled, so the first IRQ0 arrives once the handler is installed.
pub unsafe fn init(hz: u32) {
    let divisor = (PIT_BASE_FREQUENCY / hz).clamp(1, u16::MAX as u32) as u16;
    let mut command: Port<u8> = Port::new(PIT_COMMAND);
    let mut channel0: Port<u8> = Port::new(PIT_CHANNEL0);

    unsafe {
        command.write(0x36); // channel 0, lobyte/hibyte, mode 3 (square wave)
        channel0.write((divisor & 0xff) as u8);
        channel0.write(((divisor >> 8) & 0xff) as u8);
    }
}

/// Called from the IRQ0 handler on every timer interrupt.
pub fn on_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Ticks elapsed since boot, at whatever rate `init` configured.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_tick_increments_monotonically() {
        let before = ticks();
        on_tick();
        on_tick();
        assert_eq!(ticks(), before + 2);
    }
}
