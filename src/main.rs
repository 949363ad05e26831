mod commands;

use commands::attach_command::AttachCommand;
use commands::launch_command::LaunchCommand;
use commands::rd_options::{MonitorOptions, MonitorSubCommand};
use commands::RdCommand;
use structopt::StructOpt;

fn main() {
    let options = MonitorOptions::from_args();
    let mut command: Box<dyn RdCommand> = match &options.cmd {
        MonitorSubCommand::Launch { .. } => Box::new(LaunchCommand::new(options.cmd)),
        MonitorSubCommand::Attach { .. } => Box::new(AttachCommand::new(options.cmd)),
    };

    if let Err(e) = command.run() {
        eprintln!("monitor: {}", e);
        std::process::exit(1);
    }
}
