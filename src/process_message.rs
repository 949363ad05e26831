//! The vocabulary crossing the Monitor's output boundary.

use nix::sys::signal::Signal;
use nix::unistd::Pid;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CrashReason {
    /// SIGSEGV, si_code == SEGV_MAPERR. We can't disambiguate read vs.
    /// write without decoding the faulting instruction, so we default to
    /// Read (see DESIGN.md).
    ReadOfUnmappedAddress,
    /// SIGSEGV, si_code == SEGV_ACCERR: the address is mapped but the
    /// access violates page protection, most commonly a write to a
    /// read-only page.
    WriteToProtectedAddress,
    UnalignedAddress,
    IllegalInstruction,
    FloatingPointException,
    HardwareError,
    Unknown { si_code: i32 },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProcessMessage {
    Exit { pid: Pid, status: i32 },
    Limbo { pid: Pid, exit_code: i32 },
    Trace { pid: Pid },
    Break { pid: Pid },
    Watch { pid: Pid, fault_addr: u64 },
    Crash { pid: Pid, reason: CrashReason, signal: Signal, fault_addr: u64 },
    NewThread { parent_pid: Pid, child_tid: Pid },
    Exec { pid: Pid },
    Signal { pid: Pid, signal: Signal },
    SignalDelivered { pid: Pid, signal: Signal },
}

/// The Monitor's one-way output boundary: a message sink plus the two
/// thread-lifecycle callbacks the enclosing Process Object needs.
/// Implementations must be safe to call from the wait task's thread.
pub trait ProcessSink: Send + Sync {
    fn send_message(&self, message: ProcessMessage);

    /// Instantiate a per-thread handle for a newly observed tid.
    fn create_new_posix_thread(&self, tid: Pid);

    /// Called for a clone child once its initial SIGSTOP has been
    /// reconciled against the clone-trap seen on the parent.
    fn add_thread_for_initial_stop_if_needed(&self, tid: Pid);
}
