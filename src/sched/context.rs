//! The context switch itself: saves `{eip, esp, ebp}` for the outgoing
//! thread, restores the same three for the incoming one, reloads CR3
//! only if the two threads don't already share a page directory, and
//! updates the TSS's esp0 so the next ring-3 -> ring-0 transition lands
//! on the incoming thread's kernel stack.
//!
//! This is kept as a single, isolated, `unsafe` leaf function: no caller
//! above it should ever need to know how a switch is performed, only that
//! calling `switch_to` replaces "the currently running thread" with
//! whichever thread id it's given.

use crate::process::thread::{Context, Tid};
use crate::process::{PROCESSES, THREADS};

/// Switches execution to `next`, suspending the caller in place such that
/// when the outgoing thread is scheduled again, it resumes right after
/// the call to `switch_to` that sent it out.
pub fn switch_to(next: Tid) {
    let current_tid = CURRENT.with_current(|c| *c);

    if Some(next) == current_tid {
        return;
    }

    let (next_ctx, next_pdbr, next_esp0) = {
        let threads = THREADS.lock();
        let thread = match threads.get(next) {
            Ok(t) => t,
            Err(_) => return,
        };
        let processes = PROCESSES.lock();
        let pdbr = processes
            .get(thread.pid)
            .ok()
            .and_then(|p| crate::mm::paging::get_pdbr(p.dir_id).ok())
            .unwrap_or(0);
        (thread.context, pdbr, thread.kernel_stack.top)
    };

    let prev_ctx_ptr = match current_tid {
        Some(tid) => {
            let mut threads = THREADS.lock();
            match threads.get_mut(tid) {
                Ok(t) => &mut t.context as *mut Context,
                Err(_) => core::ptr::null_mut(),
            }
        }
        None => core::ptr::null_mut(),
    };

    let current_pdbr = crate::arch::x86::cpu::read_cr3();
    if next_pdbr != 0 && next_pdbr != current_pdbr {
        unsafe {
            crate::arch::x86::cpu::load_cr3(next_pdbr);
        }
    }

    if next_esp0 != 0 {
        unsafe {
            crate::arch::x86::tss::set_kernel_stack(next_esp0);
        }
    }

    CURRENT.set(next);

    unsafe {
        raw_switch(prev_ctx_ptr, &next_ctx as *const Context);
    }
}

/// # Safety
/// `prev` may be null (nothing to save into, e.g. switching away from the
/// idle bootstrap context); `next` must point to a context previously
/// produced either by this function or by `thread::ThreadTable::allocate`.
/// Saves/restores only the three callee-saved-by-convention fields this
/// kernel's ABI tracks (`eip`/`esp`/`ebp`); general-purpose registers are
/// caller-saved across a kernel call and are not part of a thread's
/// resident context the way they would be for a signal-handling kernel.
unsafe fn raw_switch(prev: *mut Context, next: *const Context) {
    unsafe {
        core::arch::asm!(
            // Save the outgoing thread's stack frame pointers and its
            // resume point (the label right after the jump below) so
            // that switching back into it lands here, not at entry.
            "test {prev}, {prev}",
            "jz 2f",
            "mov [{prev} + 4], esp",
            "mov [{prev} + 8], ebp",
            "lea {tmp}, [3f]",
            "mov [{prev} + 0], {tmp}",
            "2:",
            // Load the incoming thread's stack and jump to its saved
            // eip: entry_point for a never-run thread, or the resume
            // label saved above for one that was previously switched out.
            "mov esp, [{next} + 4]",
            "mov ebp, [{next} + 8]",
            "mov eax, [{next}]",
            "jmp eax",
            "3:",
            prev = in(reg) prev,
            next = in(reg) next,
            tmp = out(reg) _,
            out("eax") _,
            options(nostack),
        );
    }
}

struct CurrentTid(spin::Mutex<Option<Tid>>);

impl CurrentTid {
    fn with_current<R>(&self, f: impl FnOnce(&Option<Tid>) -> R) -> R {
        f(&self.0.lock())
    }

    fn set(&self, tid: Tid) {
        *self.0.lock() = Some(tid);
    }
}

static CURRENT: CurrentTid = CurrentTid(spin::Mutex::new(None));

/// The thread currently running on this CPU, or `None` before the first
/// `switch_to` (i.e. still on the bootstrap stack).
pub fn current_tid() -> Option<Tid> {
    CURRENT.with_current(|c| *c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_field_offsets_match_the_asm_above() {
        // `raw_switch` indexes into `Context` by hand-computed byte
        // offsets (eip=0, esp=4, ebp=8) since inline asm can't use
        // `core::mem::offset_of!` operands directly; this guards against
        // the struct's field order ever changing under it.
        let ctx = Context {
            eip: 1,
            esp: 2,
            ebp: 3,
        };
        let base = &ctx as *const Context as usize;
        assert_eq!(&ctx.eip as *const u32 as usize - base, 0);
        assert_eq!(&ctx.esp as *const u32 as usize - base, 4);
        assert_eq!(&ctx.ebp as *const u32 as usize - base, 8);
    }
}
