use std::path::Path;
use std::process::ExitCode;

use mqrelay_engine::config::{load, validator};

use super::{exit_config_error, EXIT_OK};

/// Execute the `check` command: parse and validate without running.
pub fn execute(config_path: &Path) -> ExitCode {
    let config = match load::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return exit_config_error();
        }
    };
    if let Err(e) = validator::validate_relay(&config) {
        eprintln!("error: {e}");
        return exit_config_error();
    }

    let incoming = if config.incoming.broker.is_some() {
        "broker"
    } else {
        "queue"
    };
    let outgoing = if config.outgoing.broker.is_some() {
        "broker"
    } else {
        "queue"
    };
    println!("Configuration OK: {incoming} -> {outgoing}");
    EXIT_OK
}
