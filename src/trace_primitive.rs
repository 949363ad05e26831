//! Thin, logged wrapper over `ptrace(2)`.
//!
//! `ptrace` is unusual among syscalls in that `-1` is a legitimate result
//! for some requests (e.g. `PTRACE_PEEKDATA`), so callers must clear errno
//! before the call and consult it afterwards rather than trusting the
//! return value alone.

use crate::log;
use crate::log::{verbosity_for, LogCategory, LogLevel::LogDebug, Verbosity};
use libc::c_uint;
use nix::errno::Errno;
use nix::unistd::Pid;
use std::ffi::c_void;
use std::os::raw::c_long;

fn request_name(request: c_uint) -> &'static str {
    match request {
        libc::PTRACE_PEEKTEXT => "PEEKTEXT",
        libc::PTRACE_PEEKDATA => "PEEKDATA",
        libc::PTRACE_PEEKUSER => "PEEKUSER",
        libc::PTRACE_POKETEXT => "POKETEXT",
        libc::PTRACE_POKEDATA => "POKEDATA",
        libc::PTRACE_POKEUSER => "POKEUSER",
        libc::PTRACE_CONT => "CONT",
        libc::PTRACE_SINGLESTEP => "SINGLESTEP",
        libc::PTRACE_GETREGS => "GETREGS",
        libc::PTRACE_SETREGS => "SETREGS",
        libc::PTRACE_GETFPREGS => "GETFPREGS",
        libc::PTRACE_SETFPREGS => "SETFPREGS",
        libc::PTRACE_GETREGSET => "GETREGSET",
        libc::PTRACE_SETREGSET => "SETREGSET",
        libc::PTRACE_ATTACH => "ATTACH",
        libc::PTRACE_DETACH => "DETACH",
        libc::PTRACE_TRACEME => "TRACEME",
        libc::PTRACE_SETOPTIONS => "SETOPTIONS",
        libc::PTRACE_GETEVENTMSG => "GETEVENTMSG",
        libc::PTRACE_GETSIGINFO => "GETSIGINFO",
        _ => "?",
    }
}

fn errno_mnemonic(errno: Errno) -> &'static str {
    match errno {
        Errno::ESRCH => "ESRCH",
        Errno::EINVAL => "EINVAL",
        Errno::EBUSY => "EBUSY",
        Errno::EPERM => "EPERM",
        _ => "other",
    }
}

/// True for the two requests whose kernel calling convention takes the
/// register-set id by value in the `addr` argument and an iovec in `data`.
fn is_register_set_request(request: c_uint) -> bool {
    request == libc::PTRACE_GETREGSET || request == libc::PTRACE_SETREGSET
}

/// Issue `ptrace(request, tid, addr, data)`.
///
/// For `PTRACE_GETREGSET`/`PTRACE_SETREGSET`, `addr` must point at an
/// `i32` holding the register-set id; the wrapper dereferences it and
/// passes the id by value, matching the kernel's calling convention for
/// those two requests.
///
/// # Safety
/// `addr` and `data` must each be valid for the request being issued —
/// this function has no way to check that a `PTRACE_PEEKDATA` `addr` is
/// really an address in the tracee, for example.
pub unsafe fn trace(
    request: c_uint,
    tid: Pid,
    addr: *mut c_void,
    data: *mut c_void,
) -> Result<c_long, Errno> {
    let resolved_addr = if is_register_set_request(request) {
        *(addr as *const i32) as *mut c_void
    } else {
        addr
    };

    Errno::clear();
    let ret = libc::ptrace(request, tid.as_raw(), resolved_addr, data);
    let result = if ret == -1 {
        match Errno::last() {
            Errno::UnknownErrno => Ok(ret),
            e => Err(e),
        }
    } else {
        Ok(ret)
    };

    match verbosity_for(LogCategory::TRACE_SYSCALL) {
        Some(Verbosity::Long) => {
            log!(
                LogDebug,
                "ptrace({}, {}, {:?}, {:?}) -> {:?}",
                request_name(request),
                tid,
                resolved_addr,
                data,
                result
            );
        }
        Some(Verbosity::Short) => {
            if let Err(e) = result {
                log!(
                    LogDebug,
                    "ptrace({}, {}) failed: {} ({})",
                    request_name(request),
                    tid,
                    e,
                    errno_mnemonic(e)
                );
            }
        }
        None => {}
    }

    result
}

/// Convenience wrapper for the common case where `addr`/`data` are plain
/// integers rather than pointers (the majority of scalar ptrace calls).
///
/// # Safety
/// Same requirements as [`trace`].
pub unsafe fn trace_scalar(request: c_uint, tid: Pid, addr: usize, data: usize) -> Result<c_long, Errno> {
    trace(request, tid, addr as *mut c_void, data as *mut c_void)
}
