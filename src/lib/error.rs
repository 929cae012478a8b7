//! Kernel-internal and syscall-facing error types.
//!
//! `KernelError` is the rich, internal error type returned by subsystem
//! operations (`?`-propagated throughout `mm`, `process`, `sched`). At the
//! kernel-call boundary it is narrowed to `MkErr`, the small numeric code
//! that crosses into a caller's ESI param block.

use core::fmt;

/// Internal error type shared by all kernel subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No free block satisfied the requested size/alignment.
    OutOfMemory,
    /// A block handle did not belong to the list it was looked up in.
    InvalidBlock,
    /// Caller-supplied address was not page aligned where alignment is required.
    Misaligned,
    /// A page table entry was already present where the operation required it absent.
    PageAlreadyMapped,
    /// A page table entry was absent where the operation required it present.
    PageNotMapped,
    /// Process/thread table has no free slot.
    TableFull,
    /// Caller referenced a pid/tid with no corresponding table entry.
    NoSuchTask,
    /// Thread is not in the state required for the requested transition.
    BadState,
    /// Caller lacked the authority required for this kernel call.
    PermissionDenied,
    /// func_id did not map to a known kernel call.
    UnknownCall,
    /// Param block pointed to by ESI failed validation.
    InvalidParam,
    /// IRQ monitor has no outstanding wait for the given source.
    NoSuchWait,
    /// Caller already owns the IRQ (or another resource) it tried to claim.
    AlreadyStarted,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::OutOfMemory => "out of memory",
            KernelError::InvalidBlock => "invalid block handle",
            KernelError::Misaligned => "address not aligned",
            KernelError::PageAlreadyMapped => "page already mapped",
            KernelError::PageNotMapped => "page not mapped",
            KernelError::TableFull => "table full",
            KernelError::NoSuchTask => "no such task",
            KernelError::BadState => "invalid state transition",
            KernelError::PermissionDenied => "permission denied",
            KernelError::UnknownCall => "unknown kernel call",
            KernelError::InvalidParam => "invalid parameter block",
            KernelError::NoSuchWait => "no such wait",
            KernelError::AlreadyStarted => "already started",
        };
        f.write_str(msg)
    }
}

/// Result alias for internal subsystem operations.
pub type KResult<T> = Result<T, KernelError>;

/// Numeric error code returned to a caller through the ESI param block.
/// This is the full taxonomy a kernel-call handler may report in `err`;
/// `None` means the call succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MkErr {
    None = 0,
    Param = -1,
    Unauthorized = -2,
    AlreadyStarted = -3,
    IoAlloc = -4,
    VirtAlloc = -5,
    PageSet = -6,
    NoExist = -7,
    NoMemory = -8,
    SizeOver = -9,
    NotRegistered = -10,
    Registered = -11,
    NoResource = -12,
    Timeout = -13,
}

impl From<KernelError> for MkErr {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::OutOfMemory => MkErr::NoMemory,
            KernelError::InvalidBlock => MkErr::NoExist,
            KernelError::Misaligned | KernelError::InvalidParam => MkErr::Param,
            KernelError::PageAlreadyMapped => MkErr::Registered,
            KernelError::PageNotMapped => MkErr::PageSet,
            KernelError::TableFull => MkErr::NoResource,
            KernelError::NoSuchTask => MkErr::NoExist,
            KernelError::NoSuchWait => MkErr::NotRegistered,
            KernelError::AlreadyStarted => MkErr::AlreadyStarted,
            KernelError::BadState => MkErr::PageSet,
            KernelError::PermissionDenied => MkErr::Unauthorized,
            KernelError::UnknownCall => MkErr::Param,
        }
    }
}

/// Result alias for kernel-call handlers, whose Err side is already the
/// narrowed ABI error code.
pub type McResult<T> = Result<T, MkErr>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn maps_out_of_memory_to_no_memory() {
        assert_eq!(MkErr::from(KernelError::OutOfMemory), MkErr::NoMemory);
    }

    #[test]
    fn maps_permission_denied_to_unauthorized() {
        assert_eq!(
            MkErr::from(KernelError::PermissionDenied),
            MkErr::Unauthorized
        );
    }

    #[test]
    fn maps_already_started_through_unchanged() {
        assert_eq!(
            MkErr::from(KernelError::AlreadyStarted),
            MkErr::AlreadyStarted
        );
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(KernelError::TableFull.to_string(), "table full");
    }
}
