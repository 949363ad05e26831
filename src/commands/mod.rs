use inferior_monitor::{ProcessMessage, ProcessSink};
use nix::unistd::Pid;
use std::io;
use std::sync::mpsc::Sender;

pub mod attach_command;
pub mod launch_command;
pub mod rd_options;

pub trait RdCommand {
    fn run(&mut self) -> io::Result<()>;
}

/// Prints one `ProcessMessage` either as Rust `Debug` or as a JSON object,
/// mirroring `trace_info_command.rs`'s `#[derive(Serialize)]` dump style
/// without forcing `serde` onto the library's own event type.
pub fn print_message(message: &ProcessMessage, json: bool) {
    if json {
        println!("{}", message_to_json(message));
    } else {
        println!("{:?}", message);
    }
}

/// Forwards events from the wait task's thread to the CLI's main loop over
/// a channel. The thread-handle callbacks are no-ops: this demo has no
/// Process Object to populate.
pub struct ChannelSink {
    pub tx: Sender<ProcessMessage>,
}

impl ProcessSink for ChannelSink {
    fn send_message(&self, message: ProcessMessage) {
        let _ = self.tx.send(message);
    }

    fn create_new_posix_thread(&self, _tid: Pid) {}

    fn add_thread_for_initial_stop_if_needed(&self, _tid: Pid) {}
}

fn message_to_json(message: &ProcessMessage) -> serde_json::Value {
    use serde_json::json;
    match *message {
        ProcessMessage::Exit { pid, status } => json!({"type": "exit", "pid": pid.as_raw(), "status": status}),
        ProcessMessage::Limbo { pid, exit_code } => json!({"type": "limbo", "pid": pid.as_raw(), "exit_code": exit_code}),
        ProcessMessage::Trace { pid } => json!({"type": "trace", "pid": pid.as_raw()}),
        ProcessMessage::Break { pid } => json!({"type": "break", "pid": pid.as_raw()}),
        ProcessMessage::Watch { pid, fault_addr } => {
            json!({"type": "watch", "pid": pid.as_raw(), "fault_addr": fault_addr})
        }
        ProcessMessage::Crash { pid, reason, signal, fault_addr } => json!({
            "type": "crash",
            "pid": pid.as_raw(),
            "reason": format!("{:?}", reason),
            "signal": signal as i32,
            "fault_addr": fault_addr,
        }),
        ProcessMessage::NewThread { parent_pid, child_tid } => json!({
            "type": "new_thread",
            "parent_pid": parent_pid.as_raw(),
            "child_tid": child_tid.as_raw(),
        }),
        ProcessMessage::Exec { pid } => json!({"type": "exec", "pid": pid.as_raw()}),
        ProcessMessage::Signal { pid, signal } => {
            json!({"type": "signal", "pid": pid.as_raw(), "signal": signal as i32})
        }
        ProcessMessage::SignalDelivered { pid, signal } => {
            json!({"type": "signal_delivered", "pid": pid.as_raw(), "signal": signal as i32})
        }
    }
}
