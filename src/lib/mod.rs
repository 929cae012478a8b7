//! Architecture-agnostic support code: error types, the logging macros,
//! the ring buffer they're built on, and the panic handler.

pub mod error;
pub mod panic;
pub mod printk;
pub mod ringbuf;
