use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "monitor", about = "Inferior Process Monitor demonstration CLI")]
pub struct MonitorOptions {
    #[structopt(subcommand)]
    pub cmd: MonitorSubCommand,
}

#[derive(StructOpt, Debug, Clone)]
pub enum MonitorSubCommand {
    /// Launch a program under the Monitor and print its lifecycle events.
    Launch {
        program: String,
        args: Vec<String>,
        #[structopt(long)]
        no_aslr: bool,
        #[structopt(long, parse(from_os_str))]
        stdin: Option<PathBuf>,
        #[structopt(long, parse(from_os_str))]
        stdout: Option<PathBuf>,
        #[structopt(long, parse(from_os_str))]
        stderr: Option<PathBuf>,
        #[structopt(long, parse(from_os_str))]
        cwd: Option<PathBuf>,
        /// Emit each event as a JSON object instead of Debug formatting.
        #[structopt(long)]
        json: bool,
    },
    /// Attach to an already-running process.
    Attach {
        pid: i32,
        #[structopt(long)]
        json: bool,
    },
}
