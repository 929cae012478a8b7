//! Minimal 16550-compatible UART driver for COM1.
//!
//! Replaces the `uart_16550` crate, which pulls in the long-mode-only
//! `x86_64::Port` type. Polling transmit only; the kernel never reads from
//! the serial line.

use lazy_static::lazy_static;
use spin::Mutex;

use super::port::Port;

const COM1_BASE: u16 = 0x3f8;

struct SerialPort {
    data: Port<u8>,
    int_enable: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        Self {
            data: Port::new(base),
            int_enable: Port::new(base + 1),
            fifo_ctrl: Port::new(base + 2),
            line_ctrl: Port::new(base + 3),
            modem_ctrl: Port::new(base + 4),
            line_status: Port::new(base + 5),
        }
    }

    /// # Safety
    /// Must be called exactly once before any write, with exclusive access
    /// to the COM1 I/O ports.
    unsafe fn init(&mut self) {
        unsafe {
            self.int_enable.write(0x00); // disable interrupts
            self.line_ctrl.write(0x80); // enable DLAB
            self.data.write(0x03); // divisor low byte: 38400 baud
            self.int_enable.write(0x00); // divisor high byte
            self.line_ctrl.write(0x03); // 8 bits, no parity, one stop bit
            self.fifo_ctrl.write(0xc7); // enable FIFO, clear, 14-byte threshold
            self.modem_ctrl.write(0x0b); // IRQs enabled, RTS/DSR set
        }
    }

    fn line_status(&mut self) -> u8 {
        unsafe { self.line_status.read() }
    }

    fn write_byte(&mut self, byte: u8) {
        while self.line_status() & 0x20 == 0 {
            core::hint::spin_loop();
        }
        unsafe {
            self.data.write(byte);
        }
    }
}

lazy_static! {
    static ref COM1: Mutex<SerialPort> = {
        let mut port = SerialPort::new(COM1_BASE);
        unsafe {
            port.init();
        }
        Mutex::new(port)
    };
}

/// Writes `s` to COM1, translating `\n` to `\r\n` for terminal emulators.
pub fn write_str(s: &str) {
    let mut port = COM1.lock();
    for byte in s.bytes() {
        if byte == b'\n' {
            port.write_byte(b'\r');
        }
        port.write_byte(byte);
    }
}

/// Forces COM1 initialization; called once during early boot so the first
/// log line isn't delayed behind lazy_static's first-touch init.
pub fn init() {
    lazy_static::initialize(&COM1);
}
