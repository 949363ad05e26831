//! The Monitor: ties launch/attach, the funnel, and the wait loop together
//! into the public operational API.

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::funnel::Funnel;
use crate::lifecycle::{self, LaunchOutcome, LaunchSpec};
use crate::operation::{Operation, RegisterSetId};
use crate::process_message::ProcessSink;
use crate::wait_loop::WaitLoop;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::os::raw::c_long;
use std::os::unix::io::RawFd;
use std::sync::atomic::AtomicI32;
use std::sync::Arc;
use std::thread::JoinHandle;

/// The lifetime object. Owns the inferior's pid, the pty master (launch
/// only), the funnel, and the handles to the owner and wait tasks.
pub struct Monitor {
    leader: Pid,
    pty_master: RawFd,
    funnel: Arc<Funnel>,
    owner_handle: Option<JoinHandle<()>>,
    wait_handle: Option<JoinHandle<()>>,
    wait_kernel_tid: Arc<AtomicI32>,
    wait_loop: Arc<WaitLoop>,
}

impl Monitor {
    pub fn launch(
        spec: LaunchSpec,
        config: &MonitorConfig,
        sink: Arc<dyn ProcessSink>,
    ) -> Result<Monitor, MonitorError> {
        let LaunchOutcome { leader, pty_master } = lifecycle::launch(spec, config)?;
        sink.create_new_posix_thread(leader);
        sink.send_message(lifecycle::initial_trace_message(leader));
        Ok(Monitor::assemble(leader, pty_master, sink))
    }

    pub fn attach(pid: Pid, sink: Arc<dyn ProcessSink>) -> Result<Monitor, MonitorError> {
        let sink_for_attach = sink.clone();
        lifecycle::attach(pid, |tid| sink_for_attach.create_new_posix_thread(tid))?;
        sink.send_message(lifecycle::initial_trace_message(pid));
        Ok(Monitor::assemble(pid, -1, sink))
    }

    fn assemble(leader: Pid, pty_master: RawFd, sink: Arc<dyn ProcessSink>) -> Monitor {
        let funnel = Arc::new(Funnel::new());
        let owner_handle = Funnel::spawn_owner(funnel.clone());

        let wait_loop = Arc::new(WaitLoop::new(leader, funnel.clone(), sink));
        let (wait_handle, wait_kernel_tid) = WaitLoop::spawn(wait_loop.clone());

        Monitor {
            leader,
            pty_master,
            funnel,
            owner_handle: Some(owner_handle),
            wait_handle: Some(wait_handle),
            wait_kernel_tid,
            wait_loop,
        }
    }

    pub fn pid(&self) -> Pid {
        self.leader
    }

    /// The pty master descriptor, or `-1` when attached rather than
    /// launched.
    pub fn pty_master(&self) -> RawFd {
        self.pty_master
    }

    pub fn read_memory(&self, tid: Pid, addr: u64, buf: &mut [u8]) -> (usize, Option<Errno>) {
        let mut read = 0usize;
        let mut err = None;
        self.funnel.submit(Operation::ReadMemory { tid, addr, buf, out_read: &mut read, out_err: &mut err });
        (read, err)
    }

    pub fn write_memory(&self, tid: Pid, addr: u64, buf: &[u8]) -> (usize, Option<Errno>) {
        let mut written = 0usize;
        let mut err = None;
        self.funnel.submit(Operation::WriteMemory { tid, addr, buf, out_written: &mut written, out_err: &mut err });
        (written, err)
    }

    pub fn read_register_value(&self, tid: Pid, offset: usize, name: &'static str) -> (u64, bool) {
        let mut value = 0u64;
        let mut ok = false;
        self.funnel.submit(Operation::ReadRegisterValue { tid, offset, name, out_value: &mut value, out_ok: &mut ok });
        (value, ok)
    }

    pub fn write_register_value(&self, tid: Pid, offset: usize, name: &'static str, value: u64) -> bool {
        let mut ok = false;
        self.funnel.submit(Operation::WriteRegisterValue { tid, offset, name, value, out_ok: &mut ok });
        ok
    }

    pub fn read_register_set(&self, tid: Pid, set_id: RegisterSetId, buf: &mut [u8]) -> bool {
        let mut ok = false;
        self.funnel.submit(Operation::ReadRegisterSet { tid, set_id, buf, out_ok: &mut ok });
        ok
    }

    pub fn write_register_set(&self, tid: Pid, set_id: RegisterSetId, buf: &[u8]) -> bool {
        let mut ok = false;
        self.funnel.submit(Operation::WriteRegisterSet { tid, set_id, buf, out_ok: &mut ok });
        ok
    }

    pub fn read_gpr(&self, tid: Pid, buf: &mut [u8]) -> bool {
        let mut ok = false;
        self.funnel.submit(Operation::ReadGpr { tid, buf, out_ok: &mut ok });
        ok
    }

    pub fn write_gpr(&self, tid: Pid, buf: &[u8]) -> bool {
        let mut ok = false;
        self.funnel.submit(Operation::WriteGpr { tid, buf, out_ok: &mut ok });
        ok
    }

    pub fn read_fpr(&self, tid: Pid, buf: &mut [u8]) -> bool {
        let mut ok = false;
        self.funnel.submit(Operation::ReadFpr { tid, buf, out_ok: &mut ok });
        ok
    }

    pub fn write_fpr(&self, tid: Pid, buf: &[u8]) -> bool {
        let mut ok = false;
        self.funnel.submit(Operation::WriteFpr { tid, buf, out_ok: &mut ok });
        ok
    }

    pub fn read_thread_pointer(&self, tid: Pid) -> (u64, bool) {
        let mut addr = 0u64;
        let mut ok = false;
        self.funnel.submit(Operation::ReadThreadPointer { tid, out_addr: &mut addr, out_ok: &mut ok });
        (addr, ok)
    }

    pub fn resume(&self, tid: Pid, signal: Option<Signal>) -> bool {
        let mut ok = false;
        self.funnel.submit(Operation::Resume { tid, signal, out_ok: &mut ok });
        ok
    }

    pub fn single_step(&self, tid: Pid, signal: Option<Signal>) -> bool {
        let mut ok = false;
        self.funnel.submit(Operation::SingleStep { tid, signal, out_ok: &mut ok });
        ok
    }

    pub fn get_signal_info(&self, tid: Pid) -> Result<libc::siginfo_t, i32> {
        let mut siginfo: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let mut ok = false;
        let mut errno_raw = 0;
        self.funnel.submit(Operation::GetSignalInfo { tid, out_siginfo: &mut siginfo, out_ok: &mut ok, out_errno: &mut errno_raw });
        if ok {
            Ok(siginfo)
        } else {
            Err(errno_raw)
        }
    }

    pub fn get_event_message(&self, tid: Pid) -> Option<c_long> {
        let mut value: c_long = 0;
        let mut ok = false;
        self.funnel.submit(Operation::GetEventMessage { tid, out_value: &mut value, out_ok: &mut ok });
        if ok {
            Some(value)
        } else {
            None
        }
    }

    pub fn detach(&self, tid: Pid) -> Option<Errno> {
        lifecycle::detach(&self.funnel, tid)
    }

    pub fn kill(&self) {
        lifecycle::kill_group(self.leader);
    }

    /// Quiesce `target` without halting its sibling threads.
    pub fn stop_single_thread(&self, target: Pid) {
        self.wait_loop.stop_single_thread(target);
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(wait_handle) = self.wait_handle.take() {
            lifecycle::teardown(
                &self.wait_loop,
                &self.wait_kernel_tid,
                wait_handle,
                &self.funnel,
                self.pty_master,
            );
        }
        if let Some(owner_handle) = self.owner_handle.take() {
            let _ = owner_handle.join();
        }
    }
}
