use std::path::Path;
use std::process::ExitCode;

use mqrelay_engine::pidfile;

use super::{exit_config_error, EXIT_OK};

/// Execute the `stop` command: write the quit sentinel.
pub fn execute(pidfile_path: &Path) -> ExitCode {
    match pidfile::request_quit(pidfile_path) {
        Ok(()) => {
            println!("quit requested");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("error: {e}");
            exit_config_error()
        }
    }
}
