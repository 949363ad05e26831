//! The wait task: trap/event classifier and initial-stop reconciler.
//!
//! Runs on its own OS thread — the wait primitive has no ordering-
//! preserving non-blocking variant, so polling is not an option.

use crate::funnel::Funnel;
use crate::operation::Operation;
use crate::process_message::{CrashReason, ProcessMessage, ProcessSink};
use crate::siginfo_codes;
use crate::wait_status::WaitStatus;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::collections::HashSet;
use std::os::raw::c_long;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once};
use std::thread::JoinHandle;
use std::time::Duration;

/// `SIGUSR1`'s default disposition is process termination; a thread-directed
/// `tgkill` with no handler installed would kill the whole process instead of
/// just interrupting the blocking `waitpid`. Install a no-op handler once so
/// delivery only causes `EINTR`.
fn ensure_shutdown_signal_handler() {
    static INIT: Once = Once::new();
    INIT.call_once(|| unsafe {
        extern "C" fn noop(_: i32) {}
        // `libc::signal` installs BSD (auto-restarting) semantics on glibc,
        // which would make `waitpid` swallow the signal and keep blocking.
        // Use `sigaction` directly with no `SA_RESTART` so the blocking
        // `waitpid` actually returns `EINTR`.
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = noop as usize;
        sa.sa_flags = 0;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGUSR1, &sa, std::ptr::null_mut());
    });
}

fn funnel_get_signal_info(funnel: &Funnel, tid: Pid) -> Result<libc::siginfo_t, Errno> {
    let mut siginfo: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let mut ok = false;
    let mut errno_raw = 0i32;
    funnel.submit(Operation::GetSignalInfo {
        tid,
        out_siginfo: &mut siginfo,
        out_ok: &mut ok,
        out_errno: &mut errno_raw,
    });
    if ok {
        Ok(siginfo)
    } else {
        Err(Errno::from_i32(errno_raw))
    }
}

fn funnel_get_event_message(funnel: &Funnel, tid: Pid) -> Option<c_long> {
    let mut value: c_long = 0;
    let mut ok = false;
    funnel.submit(Operation::GetEventMessage { tid, out_value: &mut value, out_ok: &mut ok });
    if ok {
        Some(value)
    } else {
        None
    }
}

fn funnel_resume(funnel: &Funnel, tid: Pid, signal: Option<Signal>) -> bool {
    let mut ok = false;
    funnel.submit(Operation::Resume { tid, signal, out_ok: &mut ok });
    ok
}

/// Tracks the two independent halves of a new thread's arrival: the
/// clone-trap seen on the parent, and the user-origin SIGSTOP seen on the
/// child itself. They may arrive in either order.
#[derive(Default)]
pub struct InitialStopTracker {
    clone_seen: HashSet<Pid>,
    stop_seen: HashSet<Pid>,
}

impl InitialStopTracker {
    pub fn new() -> InitialStopTracker {
        InitialStopTracker::default()
    }

    pub fn note_clone(&mut self, tid: Pid) -> bool {
        self.clone_seen.insert(tid);
        self.is_ready(tid)
    }

    pub fn note_stop(&mut self, tid: Pid) -> bool {
        self.stop_seen.insert(tid);
        self.is_ready(tid)
    }

    pub fn is_ready(&self, tid: Pid) -> bool {
        self.clone_seen.contains(&tid) && self.stop_seen.contains(&tid)
    }
}

enum ClassifyResult {
    Message(ProcessMessage),
    Silent,
    LeaderGone,
}

fn classify_stop(
    funnel: &Funnel,
    sink: &dyn ProcessSink,
    tracker: &Mutex<InitialStopTracker>,
    leader: Pid,
    pid: Pid,
    status: WaitStatus,
) -> ClassifyResult {
    let event = status.ptrace_event();
    if event == libc::PTRACE_EVENT_CLONE {
        return match funnel_get_event_message(funnel, pid) {
            Some(raw_child) => {
                let child = Pid::from_raw(raw_child as i32);
                sink.create_new_posix_thread(child);
                let ready = tracker.lock().unwrap().note_clone(child);
                if ready {
                    sink.add_thread_for_initial_stop_if_needed(child);
                }
                ClassifyResult::Message(ProcessMessage::NewThread { parent_pid: pid, child_tid: child })
            }
            None => ClassifyResult::Silent,
        };
    }
    if event == libc::PTRACE_EVENT_EXEC {
        return ClassifyResult::Message(ProcessMessage::Exec { pid });
    }
    if event == libc::PTRACE_EVENT_EXIT {
        let code = funnel_get_event_message(funnel, pid).unwrap_or(0) as i32;
        return ClassifyResult::Message(ProcessMessage::Limbo { pid, exit_code: code });
    }

    // Syscall-stop (PTRACE_O_TRACESYSGOOD convention): absorbed without
    // consulting signal info at all.
    if status.stop_signal() == (libc::SIGTRAP | 0x80) {
        funnel_resume(funnel, pid, None);
        return ClassifyResult::Silent;
    }

    match funnel_get_signal_info(funnel, pid) {
        Err(Errno::EINVAL) => {
            // Group-stop: every task in the thread-group is stopped
            // awaiting SIGCONT. Re-inject the stop signal and keep going.
            funnel_resume(funnel, pid, Some(Signal::SIGSTOP));
            ClassifyResult::Silent
        }
        Err(_) => {
            if pid == leader {
                ClassifyResult::LeaderGone
            } else {
                ClassifyResult::Silent
            }
        }
        Ok(siginfo) => classify_siginfo(funnel, sink, tracker, pid, siginfo),
    }
}

fn classify_siginfo(
    funnel: &Funnel,
    sink: &dyn ProcessSink,
    tracker: &Mutex<InitialStopTracker>,
    pid: Pid,
    siginfo: libc::siginfo_t,
) -> ClassifyResult {
    if siginfo.si_signo == libc::SIGTRAP {
        return classify_trap(pid, siginfo);
    }

    let signal = Signal::from_c_int(siginfo.si_signo)
        .expect("kernel delivered a signal number outside the known set");
    let si_code = siginfo.si_code;

    if siginfo_codes::is_user_origin(si_code) {
        if signal == Signal::SIGSTOP {
            let ready = tracker.lock().unwrap().note_stop(pid);
            if ready {
                sink.add_thread_for_initial_stop_if_needed(pid);
            }
        }
        let sender = unsafe { siginfo.si_pid() };
        return if Pid::from_raw(sender) == nix::unistd::getpid() {
            ClassifyResult::Message(ProcessMessage::SignalDelivered { pid, signal })
        } else {
            ClassifyResult::Message(ProcessMessage::Signal { pid, signal })
        };
    }

    if matches!(signal, Signal::SIGSEGV | Signal::SIGILL | Signal::SIGFPE | Signal::SIGBUS) {
        let fault_addr = unsafe { siginfo.si_addr() } as u64;
        let reason = classify_crash_reason(signal, si_code);
        return ClassifyResult::Message(ProcessMessage::Crash { pid, reason, signal, fault_addr });
    }

    ClassifyResult::Message(ProcessMessage::Signal { pid, signal })
}

fn classify_trap(pid: Pid, siginfo: libc::siginfo_t) -> ClassifyResult {
    let si_code = siginfo.si_code;
    if si_code == 0 || si_code == siginfo_codes::trap::TRACE {
        return ClassifyResult::Message(ProcessMessage::Trace { pid });
    }
    if si_code == siginfo_codes::SI_KERNEL || si_code == siginfo_codes::trap::BRKPT {
        return ClassifyResult::Message(ProcessMessage::Break { pid });
    }
    if si_code == siginfo_codes::trap::HWBKPT {
        let addr = unsafe { siginfo.si_addr() } as u64;
        return ClassifyResult::Message(ProcessMessage::Watch { pid, fault_addr: addr });
    }
    panic!("unrecognized si_code {} for SIGTRAP stop on {}", si_code, pid);
}

fn classify_crash_reason(signal: Signal, si_code: i32) -> CrashReason {
    match signal {
        Signal::SIGSEGV => {
            if si_code == siginfo_codes::segv::MAPERR {
                CrashReason::ReadOfUnmappedAddress
            } else if si_code == siginfo_codes::segv::ACCERR {
                CrashReason::WriteToProtectedAddress
            } else {
                CrashReason::Unknown { si_code }
            }
        }
        Signal::SIGBUS => {
            if si_code == siginfo_codes::bus::ADRALN {
                CrashReason::UnalignedAddress
            } else {
                CrashReason::Unknown { si_code }
            }
        }
        Signal::SIGILL => CrashReason::IllegalInstruction,
        Signal::SIGFPE => CrashReason::FloatingPointException,
        _ => CrashReason::HardwareError,
    }
}

fn send_directed_sigstop(tid: Pid) {
    let ret = unsafe { libc::syscall(libc::SYS_tgkill, tid.as_raw(), tid.as_raw(), libc::SIGSTOP) };
    if ret != 0 {
        unsafe {
            libc::kill(tid.as_raw(), libc::SIGSTOP);
        }
    }
}

/// Owns the process-group wait loop for one inferior. The Monitor spawns
/// exactly one of these onto its wait task.
pub struct WaitLoop {
    leader: Pid,
    funnel: Arc<Funnel>,
    sink: Arc<dyn ProcessSink>,
    tracker: Mutex<InitialStopTracker>,
    shutdown: AtomicBool,
    running: AtomicBool,
    stop_request: Mutex<Option<Pid>>,
    stop_done: Condvar,
}

impl WaitLoop {
    pub fn new(leader: Pid, funnel: Arc<Funnel>, sink: Arc<dyn ProcessSink>) -> WaitLoop {
        WaitLoop {
            leader,
            funnel,
            sink,
            tracker: Mutex::new(InitialStopTracker::new()),
            shutdown: AtomicBool::new(false),
            running: AtomicBool::new(true),
            stop_request: Mutex::new(None),
            stop_done: Condvar::new(),
        }
    }

    fn wait_one(&self) -> Option<(Pid, WaitStatus)> {
        let mut raw_status: i32 = 0;
        let ret = unsafe { libc::waitpid(-self.leader.as_raw(), &mut raw_status, libc::__WALL) };
        if ret > 0 {
            Some((Pid::from_raw(ret), WaitStatus::new(raw_status)))
        } else {
            None
        }
    }

    fn handle_wait(&self, pid: Pid, status: WaitStatus) -> Option<ProcessMessage> {
        if status.exited() {
            return Some(ProcessMessage::Exit { pid, status: status.exit_status() });
        }
        if status.signaled() {
            return Some(ProcessMessage::Exit { pid, status: 128 + status.term_signal() });
        }
        if !status.stopped() {
            return None;
        }
        match classify_stop(&self.funnel, self.sink.as_ref(), &self.tracker, self.leader, pid, status) {
            ClassifyResult::Message(m) => Some(m),
            ClassifyResult::Silent => None,
            ClassifyResult::LeaderGone => Some(ProcessMessage::Exit { pid: self.leader, status: -1 }),
        }
    }

    /// Entry point for the dedicated wait task. Blocks until the leader
    /// exits (forwarded as the terminating `Exit` message) or the process
    /// group has no tasks left to wait for. All `waitpid` calls against
    /// this leader's process group happen on this one thread; a pending
    /// `stop_single_thread` request rides along with the ordinary event
    /// stream instead of a second thread racing this one for the same
    /// wait events.
    pub fn run(&self) {
        loop {
            match self.wait_one() {
                Some((pid, status)) => {
                    if self.handle_event(pid, status) {
                        self.finish_running();
                        return;
                    }
                }
                None => {
                    if Errno::last() == Errno::ECHILD {
                        self.finish_running();
                        return;
                    }
                    // EINTR: either a spurious interruption or the private
                    // shutdown signal from `teardown`. Only the latter
                    // should end the loop.
                    if self.shutdown.load(Ordering::SeqCst) {
                        self.finish_running();
                        return;
                    }
                }
            }
        }
    }

    fn finish_running(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_done.notify_all();
    }

    /// Classifies and forwards one `(pid, status)` pair, reconciling it
    /// against any in-flight `stop_single_thread` request along the way.
    /// Returns true if the leader has exited and `run()` should stop.
    fn handle_event(&self, pid: Pid, status: WaitStatus) -> bool {
        if self.try_complete_directed_sigstop(pid, status) {
            return false;
        }

        let active_target = *self.stop_request.lock().unwrap();

        let msg = match self.handle_wait(pid, status) {
            Some(m) => m,
            None => return false,
        };

        let is_leader_exit = matches!(&msg, ProcessMessage::Exit { pid: p, .. } if *p == self.leader);

        // Limbo/Exit for the thread a caller is waiting to quiesce count
        // as its final stop too. A sibling thread left holding a
        // delivered signal while we're quiescing someone else is resumed
        // so it doesn't wedge the group.
        let mut resume_after = None;
        match &msg {
            ProcessMessage::Limbo { pid: p, .. } | ProcessMessage::Exit { pid: p, .. }
                if Some(*p) == active_target =>
            {
                self.complete_stop_request(*p);
            }
            ProcessMessage::Signal { pid: p, .. }
                if active_target.is_some() && Some(*p) != active_target =>
            {
                resume_after = Some(*p);
            }
            _ => {}
        }

        self.sink.send_message(msg);
        if let Some(p) = resume_after {
            funnel_resume(&self.funnel, p, None);
        }
        is_leader_exit
    }

    /// The directed `SIGSTOP` used to quiesce a single thread is an
    /// internal mechanism, not a user-visible event: swallow it here and
    /// wake the waiting caller instead of classifying/forwarding it.
    fn try_complete_directed_sigstop(&self, pid: Pid, status: WaitStatus) -> bool {
        if !status.stopped() || status.stop_signal() != libc::SIGSTOP {
            return false;
        }
        let mut guard = self.stop_request.lock().unwrap();
        if *guard == Some(pid) {
            *guard = None;
            drop(guard);
            self.stop_done.notify_all();
            true
        } else {
            false
        }
    }

    fn complete_stop_request(&self, pid: Pid) {
        let mut guard = self.stop_request.lock().unwrap();
        if *guard == Some(pid) {
            *guard = None;
            drop(guard);
            self.stop_done.notify_all();
        }
    }

    /// Quiesce `target` without halting its sibling threads. The actual
    /// `waitpid` calls stay on the wait task's own thread via `run()`'s
    /// ordinary loop — this just registers the pending target, sends the
    /// directed `SIGSTOP`, and blocks until `run()` reports it satisfied.
    /// Events for other threads are classified and forwarded as usual
    /// while we wait; a thread already in a delivered-stop is resumed so
    /// it doesn't wedge the group. Limbo/Exit for `target` count as its
    /// final stop.
    pub fn stop_single_thread(&self, target: Pid) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        *self.stop_request.lock().unwrap() = Some(target);
        send_directed_sigstop(target);

        let mut guard = self.stop_request.lock().unwrap();
        while guard.is_some() && self.running.load(Ordering::SeqCst) {
            let (g, timed_out) =
                self.stop_done.wait_timeout(guard, Duration::from_millis(50)).unwrap();
            guard = g;
            let _ = timed_out;
        }
    }

    /// Marks the loop for shutdown; the next `EINTR` in `run()` returns
    /// instead of retrying.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Spawns the wait task. Returns its join handle and a cell that the
    /// thread publishes its kernel tid into once running, so teardown can
    /// target it with a directed shutdown signal.
    pub fn spawn(wait_loop: Arc<WaitLoop>) -> (JoinHandle<()>, Arc<AtomicI32>) {
        ensure_shutdown_signal_handler();
        let kernel_tid = Arc::new(AtomicI32::new(0));
        let kernel_tid_for_thread = kernel_tid.clone();
        let handle = std::thread::Builder::new()
            .name("monitor-wait".into())
            .spawn(move || {
                let tid = unsafe { libc::syscall(libc::SYS_gettid) } as i32;
                kernel_tid_for_thread.store(tid, Ordering::SeqCst);
                wait_loop.run();
            })
            .expect("failed to spawn wait task");
        (handle, kernel_tid)
    }
}
