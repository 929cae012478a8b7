//! 32-bit Global Descriptor Table: flat kernel and user code/data segments
//! plus the single TSS descriptor used for ring 3 -> ring 0 stack switches.
//!
//! Built by hand rather than through the `x86_64` crate, since that crate's
//! descriptor layout assumes long mode. The segment selectors chosen here
//! (`0x08` kernel code, `0x10` kernel data, `0x18` user data, `0x20` user
//! code, `0x28` TSS) match the values kernel-call entry/exit code and the
//! TSS loader expect.

use bitflags::bitflags;
use lazy_static::lazy_static;
use spin::Mutex;

use super::tss::Tss;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_DATA_SELECTOR: u16 = 0x18 | 3;
pub const USER_CODE_SELECTOR: u16 = 0x20 | 3;
pub const TSS_SELECTOR: u16 = 0x28;

bitflags! {
    /// Access byte bits common to code/data descriptors (bit 7 present,
    /// bit 4 descriptor type, bits 3-0 type+accessed).
    #[derive(Clone, Copy)]
    struct Access: u8 {
        const PRESENT      = 1 << 7;
        const DESCRIPTOR   = 1 << 4; // 1 = code/data, 0 = system
        const EXECUTABLE   = 1 << 3;
        const READ_WRITE   = 1 << 1; // readable for code, writable for data
        const ACCESSED     = 1 << 0;
        const RING3        = 0b0110_0000; // DPL = 3
        const TSS_AVAILABLE = 0b1001;
    }
}

#[derive(Clone, Copy)]
#[repr(C, packed)]
struct Descriptor {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    limit_high_flags: u8,
    base_high: u8,
}

impl Descriptor {
    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            limit_high_flags: 0,
            base_high: 0,
        }
    }

    /// Flat 4 GiB code/data segment: base 0, limit 0xFFFFF with 4K
    /// granularity, 32-bit operand size.
    const fn flat(access: u8) -> Self {
        Self {
            limit_low: 0xffff,
            base_low: 0,
            base_mid: 0,
            access,
            limit_high_flags: 0xc0 | 0x0f, // granularity=4K, 32-bit, limit high nibble
            base_high: 0,
        }
    }

    fn tss(tss: &'static Tss) -> Self {
        let base = tss as *const Tss as u32;
        let limit = (core::mem::size_of::<Tss>() - 1) as u32;
        Self {
            limit_low: (limit & 0xffff) as u16,
            base_low: (base & 0xffff) as u16,
            base_mid: ((base >> 16) & 0xff) as u8,
            access: 0x89, // present, DPL 0, 32-bit available TSS
            limit_high_flags: ((limit >> 16) & 0x0f) as u8,
            base_high: ((base >> 24) & 0xff) as u8,
        }
    }
}

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

struct Gdt {
    entries: [Descriptor; 6],
}

impl Gdt {
    fn new(tss: &'static Tss) -> Self {
        let kernel_code =
            Access::PRESENT | Access::DESCRIPTOR | Access::EXECUTABLE | Access::READ_WRITE;
        let kernel_data = Access::PRESENT | Access::DESCRIPTOR | Access::READ_WRITE;
        let user_code = kernel_code | Access::RING3;
        let user_data = kernel_data | Access::RING3;

        Self {
            entries: [
                Descriptor::null(),
                Descriptor::flat(kernel_code.bits()),
                Descriptor::flat(kernel_data.bits()),
                Descriptor::flat(user_data.bits()),
                Descriptor::flat(user_code.bits()),
                Descriptor::tss(tss),
            ],
        }
    }

    fn pointer(&self) -> DescriptorTablePointer {
        DescriptorTablePointer {
            limit: (core::mem::size_of::<[Descriptor; 6]>() - 1) as u16,
            base: self.entries.as_ptr() as u32,
        }
    }
}

lazy_static! {
    static ref GDT: Mutex<Option<Gdt>> = Mutex::new(None);
}

/// Builds the GDT against the process-wide TSS and loads it, then reloads
/// every segment register and the task register.
///
/// # Safety
/// Must run exactly once during early boot, before any ring-3 transition,
/// and `tss` must outlive the kernel (it is `'static`).
pub unsafe fn init(tss: &'static Tss) {
    let mut slot = GDT.lock();
    *slot = Some(Gdt::new(tss));
    let gdt = slot.as_ref().unwrap();
    let pointer = gdt.pointer();

    unsafe {
        core::arch::asm!("lgdt [{0}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
        reload_segments();
        core::arch::asm!("ltr {0:x}", in(reg) TSS_SELECTOR, options(nostack, preserves_flags));
    }
}

unsafe fn reload_segments() {
    unsafe {
        core::arch::asm!(
            "push {code_sel:e}",
            "lea {tmp:e}, [2f]",
            "push {tmp:e}",
            "retf",
            "2:",
            "mov ax, {data_sel:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            code_sel = in(reg) KERNEL_CODE_SELECTOR as u32,
            data_sel = in(reg) KERNEL_DATA_SELECTOR,
            tmp = out(reg) _,
            options(nostack),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_descriptor_has_4k_granularity_and_32bit_flag() {
        let d = Descriptor::flat(0x9a);
        assert_eq!(d.limit_high_flags & 0xc0, 0xc0);
        assert_eq!(d.limit_low, 0xffff);
    }

    #[test]
    fn selectors_are_word_aligned_and_rpl_correct() {
        assert_eq!(KERNEL_CODE_SELECTOR & 0b111, 0);
        assert_eq!(USER_CODE_SELECTOR & 0b11, 3);
        assert_eq!(USER_DATA_SELECTOR & 0b11, 3);
    }
}
