//! Process and thread tables, and the `fork` operation that creates new
//! processes from an existing one.

pub mod elf;
pub mod fork;
pub mod spawn;
pub mod table;
pub mod thread;

use spin::Mutex;

use table::ProcessTable;
use thread::ThreadTable;

lazy_static::lazy_static! {
    pub static ref PROCESSES: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());
    pub static ref THREADS: Mutex<ThreadTable> = Mutex::new(ThreadTable::new());
}
