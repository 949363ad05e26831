//! The polymorphic Operation funneled onto the owner task.
//!
//! Modeled as a tagged enum rather than a trait object: the owner task
//! dispatches on the variant, and each variant carries its inputs plus raw
//! out-pointers into the caller's stack frame. No heap allocation per
//! operation, no virtual dispatch.

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::os::raw::c_long;

/// Register-set identifiers as passed to `PTRACE_GETREGSET`/`SETREGSET`.
pub type RegisterSetId = std::os::raw::c_int;

pub enum Operation<'a> {
    ReadMemory {
        tid: Pid,
        addr: u64,
        buf: &'a mut [u8],
        out_read: &'a mut usize,
        out_err: &'a mut Option<Errno>,
    },
    WriteMemory {
        tid: Pid,
        addr: u64,
        buf: &'a [u8],
        out_written: &'a mut usize,
        out_err: &'a mut Option<Errno>,
    },
    ReadRegisterValue {
        tid: Pid,
        offset: usize,
        name: &'static str,
        out_value: &'a mut u64,
        out_ok: &'a mut bool,
    },
    WriteRegisterValue {
        tid: Pid,
        offset: usize,
        name: &'static str,
        value: u64,
        out_ok: &'a mut bool,
    },
    ReadRegisterSet {
        tid: Pid,
        set_id: RegisterSetId,
        buf: &'a mut [u8],
        out_ok: &'a mut bool,
    },
    WriteRegisterSet {
        tid: Pid,
        set_id: RegisterSetId,
        buf: &'a [u8],
        out_ok: &'a mut bool,
    },
    ReadGpr {
        tid: Pid,
        buf: &'a mut [u8],
        out_ok: &'a mut bool,
    },
    WriteGpr {
        tid: Pid,
        buf: &'a [u8],
        out_ok: &'a mut bool,
    },
    ReadFpr {
        tid: Pid,
        buf: &'a mut [u8],
        out_ok: &'a mut bool,
    },
    WriteFpr {
        tid: Pid,
        buf: &'a [u8],
        out_ok: &'a mut bool,
    },
    ReadThreadPointer {
        tid: Pid,
        out_addr: &'a mut u64,
        out_ok: &'a mut bool,
    },
    Resume {
        tid: Pid,
        signal: Option<Signal>,
        out_ok: &'a mut bool,
    },
    SingleStep {
        tid: Pid,
        signal: Option<Signal>,
        out_ok: &'a mut bool,
    },
    GetSignalInfo {
        tid: Pid,
        out_siginfo: &'a mut libc::siginfo_t,
        out_ok: &'a mut bool,
        out_errno: &'a mut i32,
    },
    GetEventMessage {
        tid: Pid,
        out_value: &'a mut c_long,
        out_ok: &'a mut bool,
    },
    Detach {
        tid: Pid,
        out_err: &'a mut Option<Errno>,
    },
    /// Sentinel: tells the owner task to leave its serve loop.
    Exit,
}

impl<'a> Operation<'a> {
    pub fn tid(&self) -> Option<Pid> {
        match self {
            Operation::ReadMemory { tid, .. }
            | Operation::WriteMemory { tid, .. }
            | Operation::ReadRegisterValue { tid, .. }
            | Operation::WriteRegisterValue { tid, .. }
            | Operation::ReadRegisterSet { tid, .. }
            | Operation::WriteRegisterSet { tid, .. }
            | Operation::ReadGpr { tid, .. }
            | Operation::WriteGpr { tid, .. }
            | Operation::ReadFpr { tid, .. }
            | Operation::WriteFpr { tid, .. }
            | Operation::ReadThreadPointer { tid, .. }
            | Operation::Resume { tid, .. }
            | Operation::SingleStep { tid, .. }
            | Operation::GetSignalInfo { tid, .. }
            | Operation::GetEventMessage { tid, .. }
            | Operation::Detach { tid, .. } => Some(*tid),
            Operation::Exit => None,
        }
    }
}
