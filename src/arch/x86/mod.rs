//! IA-32 protected-mode architecture support: segmentation, paging
//! primitives, the legacy PIC/PIT, serial console and port I/O.

pub mod boot;
pub mod cpu;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod pit;
pub mod port;
pub mod serial;
pub mod tss;
