//! Architecture layer. Only IA-32 (`x86`) is supported; this kernel is a
//! 32-bit protected-mode design and carries no abstraction for other
//! targets.

pub mod x86;
