//! Offset-based legacy register access and set-id/iovec register access,
//! plus the three thread-pointer dialects.
//!
//! Register layout (which offset is which register, byte order) is the
//! caller's concern — this module only knows how to move bytes in and out
//! of the kernel's two register interfaces.

use crate::log::{verbosity_for, LogCategory, LogLevel::LogDebug, Verbosity};
use crate::trace_primitive::{trace, trace_scalar};
use crate::{log, operation::RegisterSetId};
use libc::c_uint;
use nix::errno::Errno;
use nix::unistd::Pid;
use std::ffi::c_void;
use std::mem::size_of;

fn log_reg(action: &str, tid: Pid, offset: usize, name: &str, value: Option<u64>) {
    if verbosity_for(LogCategory::REGISTERS).is_some() {
        log!(LogDebug, "{} tid={} offset={:#x} ({}) -> {:?}", action, tid, offset, name, value);
    }
}

/// `PTRACE_PEEKUSER`: read one machine word from the kernel's per-thread
/// register layout at `offset`.
pub fn read_register_value(tid: Pid, offset: usize, name: &'static str) -> (u64, bool) {
    match unsafe { trace_scalar(libc::PTRACE_PEEKUSER, tid, offset, 0) } {
        Ok(v) => {
            log_reg("read", tid, offset, name, Some(v as u64));
            (v as u64, true)
        }
        Err(_) => (0, false),
    }
}

/// `PTRACE_POKEUSER`: write one machine word into the per-thread register
/// layout at `offset`.
pub fn write_register_value(tid: Pid, offset: usize, name: &'static str, value: u64) -> bool {
    log_reg("write", tid, offset, name, Some(value));
    unsafe { trace_scalar(libc::PTRACE_POKEUSER, tid, offset, value as usize) }.is_ok()
}

fn bulk_read(tid: Pid, request: c_uint, buf: &mut [u8]) -> bool {
    let ret = unsafe {
        trace(
            request,
            tid,
            0 as *mut c_void,
            buf.as_mut_ptr() as *mut c_void,
        )
    };
    ret.is_ok()
}

fn bulk_write(tid: Pid, request: c_uint, buf: &[u8]) -> bool {
    let ret = unsafe {
        trace(
            request,
            tid,
            0 as *mut c_void,
            buf.as_ptr() as *mut c_void,
        )
    };
    ret.is_ok()
}

pub fn read_gpr(tid: Pid, buf: &mut [u8]) -> bool {
    bulk_read(tid, libc::PTRACE_GETREGS, buf)
}

pub fn write_gpr(tid: Pid, buf: &[u8]) -> bool {
    bulk_write(tid, libc::PTRACE_SETREGS, buf)
}

pub fn read_fpr(tid: Pid, buf: &mut [u8]) -> bool {
    bulk_read(tid, libc::PTRACE_GETFPREGS, buf)
}

pub fn write_fpr(tid: Pid, buf: &[u8]) -> bool {
    bulk_write(tid, libc::PTRACE_SETFPREGS, buf)
}

/// `iovec`-based register-set transfer (`PTRACE_GETREGSET`/`SETREGSET`).
/// `set_id` selects which register set, e.g. `NT_PRSTATUS` for the GPRs or
/// an architecture-specific id for hardware debug registers.
pub fn read_register_set(tid: Pid, set_id: RegisterSetId, buf: &mut [u8]) -> bool {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut c_void,
        iov_len: buf.len(),
    };
    let mut id = set_id;
    unsafe {
        trace(
            libc::PTRACE_GETREGSET,
            tid,
            &mut id as *mut i32 as *mut c_void,
            &mut iov as *mut libc::iovec as *mut c_void,
        )
    }
    .is_ok()
}

pub fn write_register_set(tid: Pid, set_id: RegisterSetId, buf: &[u8]) -> bool {
    let mut iov = libc::iovec {
        iov_base: buf.as_ptr() as *mut c_void,
        iov_len: buf.len(),
    };
    let mut id = set_id;
    unsafe {
        trace(
            libc::PTRACE_SETREGSET,
            tid,
            &mut id as *mut i32 as *mut c_void,
            &mut iov as *mut libc::iovec as *mut c_void,
        )
    }
    .is_ok()
}

/// Register-set id for the general-purpose set, shared by every arch that
/// uses the iovec interface.
pub const NT_PRSTATUS: RegisterSetId = 1;
/// Floating-point register set.
pub const NT_PRFPREG: RegisterSetId = 2;
/// aarch64 TLS register.
pub const NT_ARM_TLS: RegisterSetId = 0x401;
/// aarch64 hardware breakpoint registers.
pub const NT_ARM_HW_BREAK: RegisterSetId = 0x402;
/// aarch64 hardware watchpoint registers.
pub const NT_ARM_HW_WATCH: RegisterSetId = 0x403;

/// When the legacy scalar `PEEKUSER`/`POKEUSER` requests aren't available
/// for an architecture, a logical "register at offset" read/write is done
/// by transferring the whole GPR or FPR set and slicing into it. `gpr_size`
/// is the known byte size of the GPR struct; offsets at or beyond it index
/// into the FPR set.
pub fn read_register_via_set(
    tid: Pid,
    offset: usize,
    len: usize,
    gpr_size: usize,
    out: &mut [u8],
) -> bool {
    debug_assert_eq!(out.len(), len);
    if offset < gpr_size {
        let mut gpr = vec![0u8; gpr_size];
        if !read_gpr(tid, &mut gpr) {
            return false;
        }
        if offset + len > gpr.len() {
            return false;
        }
        out.copy_from_slice(&gpr[offset..offset + len]);
        true
    } else {
        let fpr_offset = offset - gpr_size;
        // FPR set size is architecture-specific; callers size their own
        // scratch buffer, so probe with a generously sized guess and trust
        // the kernel to truncate via the bulk transfer's fixed layout.
        let mut fpr = vec![0u8; fpr_offset + len];
        if !read_fpr(tid, &mut fpr) {
            return false;
        }
        out.copy_from_slice(&fpr[fpr_offset..fpr_offset + len]);
        true
    }
}

pub fn write_register_via_set(
    tid: Pid,
    offset: usize,
    gpr_size: usize,
    overlay: &[u8],
) -> bool {
    if offset < gpr_size {
        let mut gpr = vec![0u8; gpr_size];
        if !read_gpr(tid, &mut gpr) {
            return false;
        }
        if offset + overlay.len() > gpr.len() {
            return false;
        }
        gpr[offset..offset + overlay.len()].copy_from_slice(overlay);
        write_gpr(tid, &gpr)
    } else {
        let fpr_offset = offset - gpr_size;
        let mut fpr = vec![0u8; fpr_offset + overlay.len()];
        if !read_fpr(tid, &mut fpr) {
            return false;
        }
        fpr[fpr_offset..fpr_offset + overlay.len()].copy_from_slice(overlay);
        write_fpr(tid, &fpr)
    }
}

/// Read the tracee's thread-local-storage base address. Dialect selected
/// at compile time by target arch.
pub fn read_thread_pointer(tid: Pid) -> (u64, bool) {
    read_thread_pointer_impl(tid)
}

#[cfg(target_arch = "x86_64")]
fn read_thread_pointer_impl(tid: Pid) -> (u64, bool) {
    // PTRACE_ARCH_PRCTL with ARCH_GET_FS asks the kernel for the current
    // fs_base, the x86-64 TLS segment base.
    const PTRACE_ARCH_PRCTL: i32 = 30;
    const ARCH_GET_FS: usize = 0x1003;
    let mut value: u64 = 0;
    let ok = unsafe {
        trace(
            PTRACE_ARCH_PRCTL,
            tid,
            &mut value as *mut u64 as *mut c_void,
            ARCH_GET_FS as *mut c_void,
        )
    }
    .is_ok();
    (value, ok)
}

#[cfg(target_arch = "x86")]
fn read_thread_pointer_impl(tid: Pid) -> (u64, bool) {
    // 32-bit legacy dialect: the segment selector in the register file
    // encodes a GDT index in its upper 13 bits (shift right by 3), which
    // PTRACE_GET_THREAD_AREA resolves to a `user_desc` with the base.
    const GS_OFFSET: usize = 16 * size_of::<i32>(); // offsetof(user_regs_struct, xgs)
    const PTRACE_GET_THREAD_AREA: i32 = 25;

    let (selector, ok) = read_register_value(tid, GS_OFFSET, "gs");
    if !ok {
        return (0, false);
    }
    let index = (selector as u32) >> 3;

    #[repr(C)]
    struct UserDesc {
        entry_number: u32,
        base_addr: u32,
        limit: u32,
        flags: u32,
    }
    let mut desc = UserDesc { entry_number: index, base_addr: 0, limit: 0, flags: 0 };
    let ok = unsafe {
        trace(
            PTRACE_GET_THREAD_AREA,
            tid,
            index as *mut c_void,
            &mut desc as *mut UserDesc as *mut c_void,
        )
    }
    .is_ok();
    (desc.base_addr as u64, ok)
}

#[cfg(target_arch = "aarch64")]
fn read_thread_pointer_impl(tid: Pid) -> (u64, bool) {
    let mut value: u64 = 0;
    let buf = unsafe {
        std::slice::from_raw_parts_mut(&mut value as *mut u64 as *mut u8, size_of::<u64>())
    };
    let ok = read_register_set(tid, NT_ARM_TLS, buf);
    (value, ok)
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
fn read_thread_pointer_impl(_tid: Pid) -> (u64, bool) {
    (0, false)
}

/// Hardware debug registers (watchpoint/breakpoint address and control
/// arrays) are architecture-specific and optional. On x86_64 they ride the
/// legacy `PEEKUSER`/`POKEUSER` path at fixed offsets into the kernel's
/// debug register area; on aarch64 they use the set-id interface. Callers
/// on unsupported architectures must not invoke these.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DebugRegisterError {
    Unsupported,
    Ptrace(Errno),
}

#[cfg(target_arch = "x86_64")]
pub fn read_debug_register(tid: Pid, index: usize) -> Result<u64, DebugRegisterError> {
    // offsetof(struct user, u_debugreg[index]) on x86_64.
    const USER_DEBUGREG_OFFSET: usize = 848;
    let offset = USER_DEBUGREG_OFFSET + index * size_of::<u64>();
    let (value, ok) = read_register_value(tid, offset, "dr");
    if ok {
        Ok(value)
    } else {
        Err(DebugRegisterError::Unsupported)
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub fn read_debug_register(_tid: Pid, _index: usize) -> Result<u64, DebugRegisterError> {
    Err(DebugRegisterError::Unsupported)
}

