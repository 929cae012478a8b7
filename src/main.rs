#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]
#![cfg_attr(feature = "strict", deny(warnings))]

//! Mochi: a small IA-32 protected-mode microkernel. Entry point only;
//! everything interesting lives in the modules below.

extern crate alloc;

// Multiboot header, so GRUB (or any Multiboot-aware loader) can find and
// start this kernel without a UEFI stub. Magic/flags/checksum per the
// Multiboot 1 specification.
core::arch::global_asm!(
    ".section .multiboot, \"a\"",
    ".align 4",
    ".long 0x1badb002", // magic
    ".long 0x00000003", // flags: align modules, provide memory map
    ".long -(0x1badb002 + 0x00000003)", // checksum
    ".section .text",
);

pub mod arch;
pub mod config;
#[allow(special_module_name)]
pub mod lib;
pub mod mm;
pub mod process;
pub mod sched;
pub mod syscall;

use core::panic::PanicInfo;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    unsafe {
        arch::x86::boot::init();
    }

    config::log_build_info();

    // TODO(boot): read the real Multiboot memory map from the pointer
    // the loader leaves in EBX instead of this placeholder single region.
    let mut map = mm::memory_map::MemoryMap::new();
    map.add_region(0x0010_0000, 0x0700_0000, mm::memory_map::RegionKind::Usable);
    map.consolidate();

    let kernel_dir = unsafe { mm::init(&map) };

    let idle_pid = process::PROCESSES
        .lock()
        .allocate(|pid| process::table::Process {
            pid,
            parent_pid: None,
            kind: process::table::ProcessKind::Kernel,
            dir_id: kernel_dir,
            virt: None,
            entry_point: idle_loop as usize as u32,
            heap_end: 0,
            heap_break: 0,
            user_stack_base: 0,
            user_stack_size: 0,
            thread_count: 1,
        })
        .expect("failed to allocate idle process");

    let idle_stack = process::thread::StackInfo {
        top: 0,
        bottom: 0,
        size: 0,
    };
    let idle_tid = process::THREADS
        .lock()
        .thread_add_main(idle_pid, idle_loop as usize as u32, idle_stack, idle_stack)
        .expect("failed to allocate idle thread");

    sched::SCHEDULER.lock().set_idle_thread(idle_tid);

    // TODO(boot): load the real init program from the Multiboot module
    // the loader leaves in EBX instead of this embedded placeholder.
    let spawned = process::spawn::proc_add(
        &mut process::PROCESSES.lock(),
        &mut process::THREADS.lock(),
        process::table::ProcessKind::Server,
        &INIT_IMAGE,
    );
    match spawned {
        Ok(result) => {
            sched::SCHEDULER
                .lock()
                .enqueue_new(result.tid, process::table::ProcessKind::Server);
            crate::info!("mochi: init process loaded as pid {}", result.pid);
        }
        Err(e) => crate::warn!("mochi: failed to load init process: {}", e),
    }

    crate::info!("mochi: boot complete, entering idle loop");
    idle_loop()
}

/// A minimal placeholder ELF32 executable: one `PT_LOAD` segment holding
/// `jmp $` so the first user process has somewhere harmless to spin.
/// Stands in for a real init program until Multiboot module loading
/// lands.
static INIT_IMAGE: [u8; 86] = build_init_image();

const fn build_init_image() -> [u8; 86] {
    let mut buf = [0u8; 86];
    buf[0] = 0x7f;
    buf[1] = b'E';
    buf[2] = b'L';
    buf[3] = b'F';
    buf[4] = 1; // ELFCLASS32
    buf[16] = 2; // ET_EXEC
    buf[17] = 0;
    let entry: u32 = 0x4000_0000;
    let mut i = 0;
    while i < 4 {
        buf[24 + i] = ((entry >> (8 * i)) & 0xff) as u8;
        i += 1;
    }
    let phoff: u32 = 52;
    let mut i = 0;
    while i < 4 {
        buf[28 + i] = ((phoff >> (8 * i)) & 0xff) as u8;
        i += 1;
    }
    buf[42] = 32; // e_phentsize
    buf[43] = 0;
    buf[44] = 1; // e_phnum
    buf[45] = 0;

    let ph = phoff as usize;
    // p_type = PT_LOAD
    buf[ph] = 1;
    // p_offset = data_offset (right after this one program header)
    let data_offset: u32 = phoff + 32;
    let mut i = 0;
    while i < 4 {
        buf[ph + 4 + i] = ((data_offset >> (8 * i)) & 0xff) as u8;
        i += 1;
    }
    // p_vaddr = entry
    let mut i = 0;
    while i < 4 {
        buf[ph + 8 + i] = ((entry >> (8 * i)) & 0xff) as u8;
        i += 1;
    }
    // p_filesz = p_memsz = 2 (the jmp $ opcode)
    buf[ph + 16] = 2;
    buf[ph + 20] = 2;
    // p_flags = R|X
    buf[ph + 24] = 1 | 4;

    buf[data_offset as usize] = 0xeb;
    buf[data_offset as usize + 1] = 0xfe;
    buf
}

fn idle_loop() -> ! {
    loop {
        arch::x86::cpu::hlt();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    lib::panic::handle(info)
}
