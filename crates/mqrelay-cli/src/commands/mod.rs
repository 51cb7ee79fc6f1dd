pub mod check;
pub mod run;
pub mod status;
pub mod stop;

use std::process::ExitCode;

/// Clean termination, including stop-condition fires.
pub const EXIT_OK: ExitCode = ExitCode::SUCCESS;

/// Configuration or validation error; nothing ran.
#[must_use]
pub fn exit_config_error() -> ExitCode {
    ExitCode::from(1)
}

/// Fatal runtime error after pipeline start.
#[must_use]
pub fn exit_runtime_error() -> ExitCode {
    ExitCode::from(2)
}
