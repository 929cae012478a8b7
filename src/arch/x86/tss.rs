//! 32-bit Task State Segment: only used for its `esp0`/`ss0` fields, which
//! give the CPU a ring-0 stack to switch to on every `int 0x30`-`0x3F`
//! kernel call and on hardware interrupts taken from ring 3.
//!
//! This 32-bit TSS carries exactly one privilege-level stack pointer
//! (no IST mechanism, which is a long-mode feature), updated on every
//! thread switch.

use spin::Mutex;

#[repr(C, packed)]
pub struct Tss {
    link: u16,
    _reserved0: u16,
    esp0: u32,
    ss0: u16,
    _reserved1: u16,
    esp1: u32,
    ss1: u16,
    _reserved2: u16,
    esp2: u32,
    ss2: u16,
    _reserved3: u16,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u16,
    _reserved4: u16,
    cs: u16,
    _reserved5: u16,
    ss: u16,
    _reserved6: u16,
    ds: u16,
    _reserved7: u16,
    fs: u16,
    _reserved8: u16,
    gs: u16,
    _reserved9: u16,
    ldt: u16,
    _reserved10: u16,
    trap: u16,
    iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        Self {
            link: 0,
            _reserved0: 0,
            esp0: 0,
            ss0: super::gdt::KERNEL_DATA_SELECTOR,
            _reserved1: 0,
            esp1: 0,
            ss1: 0,
            _reserved2: 0,
            esp2: 0,
            ss2: 0,
            _reserved3: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            _reserved4: 0,
            cs: 0,
            _reserved5: 0,
            ss: 0,
            _reserved6: 0,
            ds: 0,
            _reserved7: 0,
            fs: 0,
            _reserved8: 0,
            gs: 0,
            _reserved9: 0,
            ldt: 0,
            _reserved10: 0,
            trap: 0,
            iomap_base: core::mem::size_of::<Tss>() as u16,
        }
    }
}

unsafe impl Sync for Tss {}

static TSS: Tss = Tss::new();
static ESP0: Mutex<u32> = Mutex::new(0);

/// Returns the single, process-lifetime TSS instance for `gdt::init` to
/// build a descriptor against.
pub fn tss() -> &'static Tss {
    &TSS
}

/// Updates `esp0` in the live TSS. Called by the scheduler on every
/// context switch so a ring-3 thread taking an interrupt lands on the
/// correct kernel stack.
///
/// # Safety
/// `esp0` must point to the top of a valid, currently-unused kernel stack
/// for the thread about to run.
pub unsafe fn set_kernel_stack(esp0: u32) {
    *ESP0.lock() = esp0;
    unsafe {
        let ptr = &TSS.esp0 as *const u32 as *mut u32;
        ptr.write_volatile(esp0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iomap_base_points_past_the_structure() {
        assert_eq!(TSS.iomap_base as usize, core::mem::size_of::<Tss>());
    }
}
