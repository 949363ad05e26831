//! Error taxonomy for the Monitor.
//!
//! Kernel-trace errors are reported through operation out-slots as raw
//! `Errno` snapshots, not through `MonitorError` — only construction-time
//! and protocol-level failures reach this type.

use std::fmt;
use nix::errno::Errno;

#[derive(Debug)]
pub enum MonitorError {
    /// A kernel trace request failed in a way that blocks construction.
    Ptrace(Errno),
    /// The launched child failed before completing its exec.
    Launch(LaunchError),
    /// An operation was submitted after destruction/teardown.
    InvalidState,
    /// Attach was requested for a pid with no such process, or pid <= 1.
    NoSuchProcess,
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Ptrace(e) => write!(f, "ptrace failed: {}", e),
            MonitorError::Launch(e) => write!(f, "launch failed: {}", e),
            MonitorError::InvalidState => write!(f, "monitor is in an invalid/torn-down state"),
            MonitorError::NoSuchProcess => write!(f, "no such process"),
        }
    }
}

impl std::error::Error for MonitorError {}

impl From<LaunchError> for MonitorError {
    fn from(e: LaunchError) -> Self {
        MonitorError::Launch(e)
    }
}

/// One variant per coded exit status (1..7) a launched child may use to
/// report a bootstrap failure to the parent before exec.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LaunchError {
    TraceMeFailed,
    ClosePtySlaveFailed,
    DropPrivilegesFailed,
    SetProcessGroupFailed,
    RedirectStdioFailed,
    ChangeDirectoryFailed,
    ExecFailed,
    /// The child exited with a status this parent doesn't recognize,
    /// e.g. it was killed by a signal before reaching any checkpoint.
    Unknown(i32),
}

impl LaunchError {
    pub fn from_child_exit_code(code: i32) -> Option<LaunchError> {
        match code {
            0 => None,
            1 => Some(LaunchError::TraceMeFailed),
            2 => Some(LaunchError::ClosePtySlaveFailed),
            3 => Some(LaunchError::DropPrivilegesFailed),
            4 => Some(LaunchError::SetProcessGroupFailed),
            5 => Some(LaunchError::RedirectStdioFailed),
            6 => Some(LaunchError::ChangeDirectoryFailed),
            7 => Some(LaunchError::ExecFailed),
            other => Some(LaunchError::Unknown(other)),
        }
    }
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::TraceMeFailed => write!(f, "PTRACE_TRACEME failed in child"),
            LaunchError::ClosePtySlaveFailed => write!(f, "failed to close pty slave in child"),
            LaunchError::DropPrivilegesFailed => write!(f, "failed to drop setgid privileges in child"),
            LaunchError::SetProcessGroupFailed => write!(f, "failed to start new process group in child"),
            LaunchError::RedirectStdioFailed => write!(f, "failed to redirect stdio in child"),
            LaunchError::ChangeDirectoryFailed => write!(f, "failed to chdir to working directory in child"),
            LaunchError::ExecFailed => write!(f, "execve failed in child"),
            LaunchError::Unknown(code) => write!(f, "child exited with unrecognized status {}", code),
        }
    }
}

/// True when `errno` means "the task already died"; callers skip the task
/// rather than fail the enclosing operation.
pub fn is_vanished_task(errno: Errno) -> bool {
    errno == Errno::ESRCH
}
