use std::path::Path;
use std::process::ExitCode;

use mqrelay_engine::pidfile::{self, Status};

use super::EXIT_OK;

/// Execute the `status` command.
pub fn execute(pidfile_path: &Path) -> ExitCode {
    match pidfile::status(pidfile_path) {
        Status::Running { pid, uptime } => {
            println!("running (pid {pid}, up {}s)", uptime.as_secs());
        }
        Status::Stopped => {
            println!("stopped");
        }
    }
    EXIT_OK
}
