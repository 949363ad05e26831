//! Inferior Process Monitor: a Linux-only ptrace-based core that mediates
//! every interaction between a debugger and a traced child process.
//!
//! See `monitor::Monitor` for the entry point.

#[macro_use]
pub mod log;

pub mod config;
pub mod error;
pub mod funnel;
pub mod lifecycle;
pub mod memory_ops;
pub mod monitor;
pub mod operation;
pub mod process_message;
pub mod register_ops;
pub mod siginfo_codes;
pub mod sync;
pub mod trace_primitive;
pub mod wait_loop;
pub mod wait_status;

pub use config::MonitorConfig;
pub use error::{LaunchError, MonitorError};
pub use lifecycle::LaunchSpec;
pub use monitor::Monitor;
pub use process_message::{CrashReason, ProcessMessage, ProcessSink};
