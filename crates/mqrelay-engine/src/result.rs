//! Run result types.

use mqrelay_types::EngineError;

/// Why the step loop terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The acknowledged-message count reached the configured `count`.
    CountReached,
    /// Wall clock since start reached the configured `duration`.
    DurationElapsed,
    /// No receipt for the configured `timeout_inactivity`.
    InactivityTimeout,
    /// The source reported exhaustion.
    SourceExhausted,
    /// An external quit was requested (PID sentinel or signal).
    QuitRequested,
    /// A fatal component error forced shutdown.
    Fatal(EngineError),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CountReached => f.write_str("count reached"),
            Self::DurationElapsed => f.write_str("duration elapsed"),
            Self::InactivityTimeout => f.write_str("inactivity timeout"),
            Self::SourceExhausted => f.write_str("source exhausted"),
            Self::QuitRequested => f.write_str("quit requested"),
            Self::Fatal(e) => write!(f, "fatal error: {e}"),
        }
    }
}

/// Aggregate message counts for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    /// Messages yielded by the source.
    pub received: u64,
    /// Messages durably accepted by the sink.
    pub sent: u64,
    /// Messages dropped by the transform (including transform errors).
    pub dropped: u64,
    /// Delivery tags acknowledged back to the source.
    pub acked: u64,
}

/// Result of a completed relay run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub counts: RunCounts,
    pub stop_reason: StopReason,
    pub duration_secs: f64,
}
