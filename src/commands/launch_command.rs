use crate::commands::rd_options::MonitorSubCommand;
use crate::commands::{print_message, ChannelSink, RdCommand};
use inferior_monitor::{LaunchSpec, Monitor, MonitorConfig, ProcessMessage};
use std::ffi::CString;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::channel;
use std::sync::Arc;

pub struct LaunchCommand {
    program: String,
    args: Vec<String>,
    no_aslr: bool,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    cwd: Option<PathBuf>,
    json: bool,
}

impl LaunchCommand {
    pub fn new(cmd: MonitorSubCommand) -> LaunchCommand {
        match cmd {
            MonitorSubCommand::Launch { program, args, no_aslr, stdin, stdout, stderr, cwd, json } => {
                LaunchCommand { program, args, no_aslr, stdin, stdout, stderr, cwd, json }
            }
            _ => panic!("LaunchCommand constructed from a non-Launch subcommand"),
        }
    }
}

fn to_cstring(s: &str) -> CString {
    CString::new(s).expect("argument contains an interior NUL byte")
}

impl RdCommand for LaunchCommand {
    fn run(&mut self) -> io::Result<()> {
        let mut argv = vec![to_cstring(&self.program)];
        argv.extend(self.args.iter().map(|a| to_cstring(a)));
        let envp: Vec<CString> = std::env::vars()
            .map(|(k, v)| to_cstring(&format!("{}={}", k, v)))
            .collect();

        let spec = LaunchSpec {
            program: to_cstring(&self.program),
            argv,
            envp,
            stdin: self.stdin.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            cwd: self.cwd.clone(),
            disable_aslr: self.no_aslr,
        };
        let config = MonitorConfig { disable_aslr: self.no_aslr, ..MonitorConfig::default() };

        let (tx, rx) = channel();
        let sink = Arc::new(ChannelSink { tx });
        let monitor = Monitor::launch(spec, &config, sink)
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
