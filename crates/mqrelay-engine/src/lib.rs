//! Message-transfer engine: sources, sinks, transforms, the in-flight
//! window, and the controller that drives them.

pub mod broker;
pub mod config;
pub mod controller;
pub mod dirq;
pub mod endpoint;
pub mod orchestrator;
pub mod pidfile;
pub mod result;
pub mod transform;
pub mod window;

// Re-export public API for convenience
pub use controller::{Controller, EngineOptions};
pub use endpoint::{Completion, SendOutcome, Sink, Source, StepOutcome};
pub use orchestrator::run_relay;
pub use result::{RunCounts, RunResult, StopReason};
