//! The serialized rendezvous that routes every privileged operation onto
//! the owner task.
//!
//! On Linux, only the task that attached to (or forked) a tracee may issue
//! trace requests against it. The funnel is the one place in this crate
//! that is allowed to forget that rule, because it is the mechanism that
//! enforces it for everyone else (design note "Thread-affine syscall").

use crate::memory_ops::{read_memory, write_memory};
use crate::operation::Operation;
use crate::register_ops::{
    read_fpr, read_gpr, read_register_set, read_register_value, read_thread_pointer, write_fpr,
    write_gpr, write_register_set, write_register_value,
};
use crate::sync::Semaphore;
use crate::trace_primitive::{trace, trace_scalar};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::cell::UnsafeCell;
use std::os::raw::c_long;
use std::sync::Mutex;
use std::thread::JoinHandle;

struct Slot(UnsafeCell<Option<Operation<'static>>>);

// Safety: the slot is written by a caller thread holding `submit_lock`,
// then handed to the owner task exclusively via the pending/done
// semaphore pair below — never touched by two threads at once.
unsafe impl Sync for Slot {}

pub struct Funnel {
    /// Serializes writers of the slot; guarantees at most one pending
    /// operation.
    submit_lock: Mutex<()>,
    pending: Semaphore,
    done: Semaphore,
    slot: Slot,
}

impl Funnel {
    pub fn new() -> Funnel {
        Funnel {
            submit_lock: Mutex::new(()),
            pending: Semaphore::new(0),
            done: Semaphore::new(0),
            slot: Slot(UnsafeCell::new(None)),
        }
    }

    /// Enqueue `op`, wake the owner task, and block until it has executed
    /// and signaled completion. Operations complete in the order their
    /// submitters acquire `submit_lock`.
    pub fn submit(&self, op: Operation<'_>) {
        let _guard = self.submit_lock.lock().unwrap();
        // Safety: `op` borrows only data that outlives this call, and we
        // block below until the owner task is done with it, so extending
        // the lifetime to 'static is sound for the window it's reachable.
        let op_static: Operation<'static> = unsafe { std::mem::transmute(op) };
        unsafe {
            *self.slot.0.get() = Some(op_static);
        }
        self.pending.post();
        self.done.wait();
    }

    /// Runs on the owner task. Blocks waiting for operations until an
    /// `Exit` sentinel is received.
    pub fn serve(&self) {
        loop {
            self.pending.wait();
            let op = unsafe { (*self.slot.0.get()).take() }.expect("funnel slot empty after pending signal");
            let is_exit = matches!(op, Operation::Exit);
            execute(op);
            self.done.post();
            if is_exit {
                return;
            }
        }
    }

    pub fn spawn_owner(funnel: std::sync::Arc<Funnel>) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("monitor-owner".into())
            .spawn(move || funnel.serve())
            .expect("failed to spawn owner task")
    }

    /// Enqueues the `Exit` sentinel. Does not join; callers join the
    /// handle returned by `spawn_owner` separately.
    pub fn request_exit(&self) {
        self.submit(Operation::Exit);
    }
}

fn execute(op: Operation<'static>) {
    match op {
        Operation::ReadMemory { tid, addr, buf, out_read, out_err } => {
            let (n, err) = read_memory(tid, addr, buf);
            *out_read = n;
            *out_err = err;
        }
        Operation::WriteMemory { tid, addr, buf, out_written, out_err } => {
            let (n, err) = write_memory(tid, addr, buf);
            *out_written = n;
            *out_err = err;
        }
        Operation::ReadRegisterValue { tid, offset, name, out_value, out_ok } => {
            let (v, ok) = read_register_value(tid, offset, name);
            *out_value = v;
            *out_ok = ok;
        }
        Operation::WriteRegisterValue { tid, offset, name, value, out_ok } => {
            *out_ok = write_register_value(tid, offset, name, value);
        }
        Operation::ReadRegisterSet { tid, set_id, buf, out_ok } => {
            *out_ok = read_register_set(tid, set_id, buf);
        }
        Operation::WriteRegisterSet { tid, set_id, buf, out_ok } => {
            *out_ok = write_register_set(tid, set_id, buf);
        }
        Operation::ReadGpr { tid, buf, out_ok } => {
            *out_ok = read_gpr(tid, buf);
        }
        Operation::WriteGpr { tid, buf, out_ok } => {
            *out_ok = write_gpr(tid, buf);
        }
        Operation::ReadFpr { tid, buf, out_ok } => {
            *out_ok = read_fpr(tid, buf);
        }
        Operation::WriteFpr { tid, buf, out_ok } => {
            *out_ok = write_fpr(tid, buf);
        }
        Operation::ReadThreadPointer { tid, out_addr, out_ok } => {
            let (addr, ok) = read_thread_pointer(tid);
            *out_addr = addr;
            *out_ok = ok;
        }
        Operation::Resume { tid, signal, out_ok } => {
            *out_ok = resume(tid, signal).is_ok();
        }
        Operation::SingleStep { tid, signal, out_ok } => {
            *out_ok = single_step(tid, signal).is_ok();
        }
        Operation::GetSignalInfo { tid, out_siginfo, out_ok, out_errno } => {
            match get_signal_info(tid) {
                Ok(info) => {
                    *out_siginfo = info;
                    *out_ok = true;
                    *out_errno = 0;
                }
                Err(e) => {
                    *out_ok = false;
                    *out_errno = e as i32;
                }
            }
        }
        Operation::GetEventMessage { tid, out_value, out_ok } => {
            match get_event_message(tid) {
                Ok(v) => {
                    *out_value = v;
                    *out_ok = true;
                }
                Err(_) => *out_ok = false,
            }
        }
        Operation::Detach { tid, out_err } => {
            *out_err = detach(tid).err();
        }
        Operation::Exit => {}
    }
}

fn resume(tid: Pid, signal: Option<Signal>) -> Result<(), Errno> {
    let sig = signal.map_or(0, |s| s as i32);
    unsafe { trace_scalar(libc::PTRACE_CONT, tid, 0, sig as usize) }.map(|_| ())
}

fn single_step(tid: Pid, signal: Option<Signal>) -> Result<(), Errno> {
    let sig = signal.map_or(0, |s| s as i32);
    unsafe { trace_scalar(libc::PTRACE_SINGLESTEP, tid, 0, sig as usize) }.map(|_| ())
}

fn get_signal_info(tid: Pid) -> Result<libc::siginfo_t, Errno> {
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    unsafe {
        trace(
            libc::PTRACE_GETSIGINFO,
            tid,
            0 as *mut std::ffi::c_void,
            &mut info as *mut libc::siginfo_t as *mut std::ffi::c_void,
        )
    }?;
    Ok(info)
}

fn get_event_message(tid: Pid) -> Result<c_long, Errno> {
    let mut value: std::os::raw::c_ulong = 0;
    unsafe {
        trace(
            libc::PTRACE_GETEVENTMSG,
            tid,
            0 as *mut std::ffi::c_void,
            &mut value as *mut std::os::raw::c_ulong as *mut std::ffi::c_void,
        )
    }?;
    Ok(value as c_long)
}

fn detach(tid: Pid) -> Result<(), Errno> {
    unsafe { trace_scalar(libc::PTRACE_DETACH, tid, 0, 0) }.map(|_| ())
}
