//! Panic handling: log the panic message at `Error` level, then halt the
//! core with interrupts disabled. There is exactly one CPU in this kernel,
//! so there is no cross-core notification to perform and no recursion to
//! guard beyond making sure the handler itself cannot panic.

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, Ordering};

static PANICKING: AtomicBool = AtomicBool::new(false);

pub fn handle(info: &PanicInfo) -> ! {
    // If the logging path itself panics, fall straight to halt rather than
    // recursing back into this function.
    if PANICKING.swap(true, Ordering::SeqCst) {
        halt();
    }

    if let Some(location) = info.location() {
        crate::error!(
            "panic at {}:{}:{}: {}",
            location.file(),
            location.line(),
            location.column(),
            info.message()
        );
    } else {
        crate::error!("panic: {}", info.message());
    }

    halt()
}

fn halt() -> ! {
    crate::arch::x86::cpu::disable_interrupts();
    loop {
        crate::arch::x86::cpu::hlt();
    }
}
