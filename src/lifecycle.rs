//! Launch, attach, detach, kill, teardown.

use crate::config::MonitorConfig;
use crate::error::{LaunchError, MonitorError};
use crate::funnel::Funnel;
use crate::operation::Operation;
use crate::process_message::ProcessMessage;
use crate::wait_loop::WaitLoop;
use nix::errno::Errno;
use nix::pty::{openpty, OpenptyResult};
use nix::sys::stat::Mode;
use nix::unistd::{chdir, close, dup2, execve, fork, setpgid, ForkResult, Pid};
use std::ffi::CString;
use std::fs::OpenOptions;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;

const DEFAULT_TRACE_OPTIONS: i32 =
    libc::PTRACE_O_TRACECLONE | libc::PTRACE_O_TRACEEXEC | libc::PTRACE_O_TRACEEXIT;

/// Arguments consumed once by the child bootstrap; discarded after launch.
pub struct LaunchSpec {
    pub program: CString,
    pub argv: Vec<CString>,
    pub envp: Vec<CString>,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub disable_aslr: bool,
}

pub struct LaunchOutcome {
    pub leader: Pid,
    pub pty_master: RawFd,
}

/// Child-side bootstrap. Never returns: every path ends in `_exit` with a
/// small coded status the parent maps via [`LaunchError::from_child_exit_code`].
fn child_bootstrap(pty: &OpenptyResult, spec: &LaunchSpec) -> ! {
    unsafe {
        if libc::ptrace(libc::PTRACE_TRACEME, 0, 0, 0) != 0 {
            libc::_exit(1);
        }
    }
    // The master end belongs to the parent; the child only ever touches
    // the slave.
    if close(pty.master).is_err() {
        unsafe { libc::_exit(2) };
    }
    let gid = unsafe { libc::getgid() };
    if unsafe { libc::setgid(gid) } != 0 {
        unsafe { libc::_exit(3) };
    }
    if setpgid(Pid::from_raw(0), Pid::from_raw(0)).is_err() {
        unsafe { libc::_exit(4) };
    }
    if !redirect_stdio(pty.slave, spec) {
        unsafe { libc::_exit(5) };
    }
    if let Some(cwd) = &spec.cwd {
        if chdir(cwd.as_path()).is_err() {
            unsafe { libc::_exit(6) };
        }
    }
    if spec.disable_aslr {
        unsafe {
            libc::personality(libc::ADDR_NO_RANDOMIZE as u64);
        }
    }
    let argv: Vec<&std::ffi::CStr> = spec.argv.iter().map(|c| c.as_c_str()).collect();
    let envp: Vec<&std::ffi::CStr> = spec.envp.iter().map(|c| c.as_c_str()).collect();
    let _ = execve(&spec.program, &argv, &envp);
    unsafe { libc::_exit(7) };
}

fn redirect_stdio(pty_slave: RawFd, spec: &LaunchSpec) -> bool {
    let targets: [(&Option<PathBuf>, RawFd); 3] =
        [(&spec.stdin, 0), (&spec.stdout, 1), (&spec.stderr, 2)];
    for (path, fd) in targets {
        let source = match path {
            Some(p) => match OpenOptions::new().read(fd == 0).write(fd != 0).open(p) {
                Ok(f) => {
                    let raw = f.as_raw_fd();
                    std::mem::forget(f);
                    raw
                }
                Err(_) => return false,
            },
            None => pty_slave,
        };
        if dup2(source, fd).is_err() {
            return false;
        }
    }
    if close(pty_slave).is_err() {
        return false;
    }
    true
}

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFL)?;
    let mut flags = nix::fcntl::OFlag::from_bits_truncate(flags);
    flags.insert(nix::fcntl::OFlag::O_NONBLOCK);
    nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Waits for a tid's post-TRACEME/post-attach stop, directly via
/// `waitpid` — the owner task doesn't exist until the first caller of this
/// returns, so this one wait cannot go through the funnel. `__WALL` is
/// required here: `attach` calls this for every tid in the target
/// thread-group, including non-leader `CLONE_THREAD` tasks, and plain
/// `waitpid` returns `ECHILD` for those.
fn wait_for_initial_stop(pid: Pid) -> Result<(), Errno> {
    let mut status: i32 = 0;
    loop {
        let ret = unsafe { libc::waitpid(pid.as_raw(), &mut status, libc::__WALL) };
        if ret == pid.as_raw() {
            return Ok(());
        }
        if ret == -1 {
            match Errno::last() {
                Errno::EINTR => continue,
                e => return Err(e),
            }
        }
    }
}

pub fn launch(spec: LaunchSpec, _config: &MonitorConfig) -> Result<LaunchOutcome, MonitorError> {
    let pty = openpty(None, None).map_err(|_| MonitorError::InvalidState)?;

    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            child_bootstrap(&pty, &spec);
        }
        Ok(ForkResult::Parent { child }) => {
            let _ = close(pty.slave);
            wait_for_initial_stop(child).map_err(MonitorError::Ptrace)?;

            // A nonzero exit before reaching the post-exec stop means the
            // child aborted during bootstrap; surface the coded reason.
            let mut status: i32 = 0;
            let probe = unsafe { libc::waitpid(child.as_raw(), &mut status, libc::WNOHANG) };
            if probe == child.as_raw() && libc::WIFEXITED(status) {
                if let Some(e) = LaunchError::from_child_exit_code(libc::WEXITSTATUS(status)) {
                    return Err(MonitorError::Launch(e));
                }
            }

            let ret = unsafe {
                libc::ptrace(
                    libc::PTRACE_SETOPTIONS,
                    child.as_raw(),
                    0,
                    DEFAULT_TRACE_OPTIONS as *mut std::ffi::c_void,
                )
            };
            if ret != 0 {
                return Err(MonitorError::Ptrace(Errno::last()));
            }

            set_nonblocking(pty.master).map_err(|_| MonitorError::InvalidState)?;

            Ok(LaunchOutcome { leader: child, pty_master: pty.master })
        }
        Err(e) => Err(MonitorError::Ptrace(e)),
    }
}

fn list_tasks(pid: Pid) -> Result<Vec<Pid>, MonitorError> {
    let dir = format!("/proc/{}/task", pid);
    let entries = std::fs::read_dir(&dir).map_err(|_| MonitorError::NoSuchProcess)?;
    let mut tasks = Vec::new();
    for entry in entries.flatten() {
        if let Some(name) = entry.file_name().to_str() {
            if let Ok(tid) = name.parse::<i32>() {
                tasks.push(Pid::from_raw(tid));
            }
        }
    }
    Ok(tasks)
}

/// Enumerate and attach every task of `pid`'s thread-group, repeating
/// until a full pass finds nothing new (tasks created mid-attach must
/// also be captured). `create_thread` is called once per task that was
/// successfully attached and stopped.
pub fn attach(
    pid: Pid,
    mut create_thread: impl FnMut(Pid),
) -> Result<(), MonitorError> {
    if pid.as_raw() <= 1 {
        return Err(MonitorError::NoSuchProcess);
    }

    let mut attached = std::collections::HashSet::new();
    loop {
        let tasks = list_tasks(pid)?;
        if tasks.is_empty() {
            return Err(MonitorError::NoSuchProcess);
        }
        let mut progressed = false;
        for tid in tasks {
            if attached.contains(&tid) {
                continue;
            }
            progressed = true;
            let ret = unsafe { libc::ptrace(libc::PTRACE_ATTACH, tid.as_raw(), 0, 0) };
            if ret != 0 {
                if Errno::last() == Errno::ESRCH {
                    continue; // vanished mid-attach
                }
                return Err(MonitorError::Ptrace(Errno::last()));
            }
            if wait_for_initial_stop(tid).is_err() {
                continue;
            }
            let opt_ret = unsafe {
                libc::ptrace(
                    libc::PTRACE_SETOPTIONS,
                    tid.as_raw(),
                    0,
                    DEFAULT_TRACE_OPTIONS as *mut std::ffi::c_void,
                )
            };
            if opt_ret != 0 {
                return Err(MonitorError::Ptrace(Errno::last()));
            }
            create_thread(tid);
            attached.insert(tid);
        }
        if !progressed {
            break;
        }
    }
    Ok(())
}

pub fn detach(funnel: &Funnel, tid: Pid) -> Option<Errno> {
    let mut err = None;
    funnel.submit(Operation::Detach { tid, out_err: &mut err });
    err
}

pub fn kill_group(leader: Pid) {
    unsafe {
        libc::kill(-leader.as_raw(), libc::SIGKILL);
    }
}

/// Stop the wait task by directed signal and join it, enqueue the Exit
/// sentinel to the owner task and join it, close the pty master.
pub fn teardown(
    wait_loop: &WaitLoop,
    wait_kernel_tid: &std::sync::atomic::AtomicI32,
    wait_handle: std::thread::JoinHandle<()>,
    funnel: &Funnel,
    pty_master: RawFd,
) {
    use std::sync::atomic::Ordering;
    wait_loop.request_shutdown();
    // The wait thread publishes its kernel tid almost immediately; a short
    // spin covers the race without needing another rendezvous primitive.
    for _ in 0..1000 {
        let tid = wait_kernel_tid.load(Ordering::SeqCst);
        if tid != 0 {
            unsafe {
                libc::syscall(libc::SYS_tgkill, std::process::id() as i32, tid, libc::SIGUSR1);
            }
            break;
        }
        std::thread::yield_now();
    }
    let _ = wait_handle.join();

    funnel.request_exit();

    if pty_master >= 0 {
        unsafe {
            libc::close(pty_master);
        }
    }
}

pub fn initial_trace_message(pid: Pid) -> ProcessMessage {
    ProcessMessage::Trace { pid }
}

/// Mirrors the `PosixThreadCreationFlags`-style bitflags used for
/// construction options in the teacher's own launch path.
bitflags::bitflags! {
    pub struct LaunchFlags: u32 {
        const DISABLE_ASLR = 0b0000_0001;
        const ALLOCATE_PTY = 0b0000_0010;
    }
}
