use crate::commands::rd_options::MonitorSubCommand;
use crate::commands::{print_message, ChannelSink, RdCommand};
use inferior_monitor::{Monitor, ProcessMessage};
use nix::unistd::Pid;
use std::io;
use std::sync::mpsc::channel;
use std::sync::Arc;

pub struct AttachCommand {
    pid: i32,
    json: bool,
}

impl AttachCommand {
    pub fn new(cmd: MonitorSubCommand) -> AttachCommand {
        match cmd {
            MonitorSubCommand::Attach { pid, json } => AttachCommand { pid, json },
            _ => panic!("AttachCommand constructed from a non-Attach subcommand"),
        }
    }
}

impl RdCommand for AttachCommand {
    fn run(&mut self) -> io::Result<()> {
        let (tx, rx) = channel();
        let sink = Arc::new(ChannelSink { tx });
        let monitor = Monitor::attach(Pid::from_raw(self.pid), sink)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let leader = monitor.pid();
        for message in rx.iter() {
            print_message(&message, self.json);
            if let ProcessMessage::Exit { pid, .. } = message {
                if pid == leader {
                    break;
                }
            }
        }
        Ok(())
    }
}
