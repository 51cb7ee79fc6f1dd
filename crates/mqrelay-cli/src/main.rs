mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mqrelay", version, about = "Move messages between AMQP brokers and disk queues")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a relay
    Run {
        /// Path to relay YAML file
        config: PathBuf,
    },
    /// Validate a relay configuration
    Check {
        /// Path to relay YAML file
        config: PathBuf,
    },
    /// Report whether an instance is running
    Status {
        /// Path to the instance's PID file
        pidfile: PathBuf,
    },
    /// Request graceful termination of a running instance
    Stop {
        /// Path to the instance's PID file
        pidfile: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { config } => commands::run::execute(&config).await,
        Commands::Check { config } => commands::check::execute(&config),
        Commands::Status { pidfile } => commands::status::execute(&pidfile),
        Commands::Stop { pidfile } => commands::stop::execute(&pidfile),
    }
}
