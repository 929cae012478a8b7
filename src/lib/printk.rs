//! Kernel logging: buffered log records plus the `printk!`/`info!`/`debug!`/
//! `error!` family of call-site macros used throughout the kernel.
//!
//! Every record is pushed into a fixed-capacity ring buffer (`LOG_BUFFER`)
//! and mirrored to the serial console as it's produced. The ring buffer lets
//! `sys_dmesg` (kernel call `0x3F_DMESG`) replay recent history to a caller
//! without re-touching the serial port.

use core::fmt::Write;
use spin::Mutex;

use crate::lib::ringbuf::RingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

/// Output encoding for a log record: human-readable for a console, or a
/// flat JSON object for automated test harnesses scraping serial output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

const LOG_MSG_CAP: usize = 120;

#[derive(Clone, Copy)]
pub struct LogEntry {
    pub level: LogLevel,
    pub tick: u64,
    len: usize,
    msg: [u8; LOG_MSG_CAP],
}

impl LogEntry {
    fn new(level: LogLevel, tick: u64, msg: &str) -> Self {
        let mut buf = [0u8; LOG_MSG_CAP];
        let bytes = msg.as_bytes();
        let len = bytes.len().min(LOG_MSG_CAP);
        buf[..len].copy_from_slice(&bytes[..len]);
        Self {
            level,
            tick,
            len,
            msg: buf,
        }
    }

    pub fn message(&self) -> &str {
        core::str::from_utf8(&self.msg[..self.len]).unwrap_or("<invalid utf8>")
    }
}

const LOG_BUFFER_CAP: usize = 1024;

pub struct LogBuffer {
    ring: RingBuffer<LogEntry, LOG_BUFFER_CAP>,
}

impl LogBuffer {
    const fn new() -> Self {
        Self {
            ring: RingBuffer::new(),
        }
    }

    fn push(&mut self, entry: LogEntry) {
        self.ring.push(entry);
    }

    pub fn drain(&mut self) -> alloc::vec::Vec<LogEntry> {
        self.ring.drain_all()
    }
}

lazy_static::lazy_static! {
    pub static ref LOG_BUFFER: Mutex<LogBuffer> = Mutex::new(LogBuffer::new());
    static ref LOG_LEVEL: Mutex<LogLevel> = Mutex::new(LogLevel::Debug);
    static ref LOG_FORMAT: Mutex<LogFormat> = Mutex::new(LogFormat::Human);
}

/// Raises or lowers the minimum level emitted to the console and ring buffer.
pub fn set_level(level: LogLevel) {
    *LOG_LEVEL.lock() = level;
}

/// Switches console output between human-readable lines and structured JSON.
pub fn set_format(format: LogFormat) {
    *LOG_FORMAT.lock() = format;
}

struct SerialWriter;

impl Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        crate::arch::x86::serial::write_str(s);
        Ok(())
    }
}

/// Core logging entry point; call through the macros below rather than
/// directly so the module path and line number are captured consistently.
pub fn log(level: LogLevel, args: core::fmt::Arguments) {
    if level > *LOG_LEVEL.lock() {
        return;
    }

    let tick = crate::arch::x86::pit::ticks();
    let mut msg_buf = heapless::String::<LOG_MSG_CAP>::new();
    let _ = core::fmt::write(&mut msg_buf, args);

    let entry = LogEntry::new(level, tick, msg_buf.as_str());
    LOG_BUFFER.lock().push(entry);

    let format = *LOG_FORMAT.lock();
    let mut writer = SerialWriter;
    match format {
        LogFormat::Human => {
            let _ = writeln!(writer, "[{:>6}] {:<5} {}", tick, level.as_str(), msg_buf.as_str());
        }
        LogFormat::Json => {
            let _ = writeln!(
                writer,
                "{{\"tick\":{},\"level\":\"{}\",\"msg\":\"{}\"}}",
                tick,
                level.as_str(),
                msg_buf.as_str()
            );
        }
    }
}

/// Emits a single structured key-value pair alongside a message, used by
/// scenario tests that grep serial output for a specific field.
pub fn log_kv(level: LogLevel, msg: &str, key: &str, value: i64) {
    log(level, format_args!("{} {}={}", msg, key, value));
}

#[macro_export]
macro_rules! printk {
    ($($arg:tt)*) => {
        $crate::lib::printk::log($crate::lib::printk::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::lib::printk::log($crate::lib::printk::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::lib::printk::log($crate::lib::printk::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::lib::printk::log($crate::lib::printk::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::lib::printk::log($crate::lib::printk::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::lib::printk::log($crate::lib::printk::LogLevel::Trace, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_kv {
    ($level:expr, $msg:expr, $key:expr, $value:expr) => {
        $crate::lib::printk::log_kv($level, $msg, $key, $value)
    };
}

/// Kernel call handler backing `KC_DMESG`: copies up to `max` buffered log
/// messages into the caller-supplied buffer, newest last.
pub fn sys_dmesg(max: usize) -> alloc::vec::Vec<LogEntry> {
    let mut entries = LOG_BUFFER.lock().drain();
    if entries.len() > max {
        let drop_count = entries.len() - max;
        entries.drain(0..drop_count);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_truncates_long_messages() {
        let long = "x".repeat(LOG_MSG_CAP * 2);
        let entry = LogEntry::new(LogLevel::Info, 0, &long);
        assert_eq!(entry.message().len(), LOG_MSG_CAP);
    }

    #[test]
    fn level_ordering_filters_correctly() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }
}
