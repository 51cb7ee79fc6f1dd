use std::path::Path;
use std::process::ExitCode;

use mqrelay_engine::config::{load, validator};
use mqrelay_engine::orchestrator;
use mqrelay_types::ErrorCategory;

use super::{exit_config_error, exit_runtime_error, EXIT_OK};

/// Execute the `run` command: parse, validate, and drive a relay.
pub async fn execute(config_path: &Path) -> ExitCode {
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

    tracing::info!(
        config = %config_path.display(),
        reliable = config.reliable,
        window = config.window,
        "relay configuration validated"
    );

    match orchestrator::run_relay(&config).await {
        Ok(result) => {
            println!("Relay finished: {}.", result.stop_reason);
            println!("  Received: {}", result.counts.received);
            println!("  Sent:     {}", result.counts.sent);
            println!("  Dropped:  {}", result.counts.dropped);
            println!("  Acked:    {}", result.counts.acked);
            println!("  Duration: {:.2}s", result.duration_secs);
            EXIT_OK
        }
        Err(e) if e.category == ErrorCategory::Config => {
            eprintln!("error: {e}");
            exit_config_error()
        }
        Err(e) => {
            eprintln!("fatal: {e}");
            exit_runtime_error()
        }
    }
}
