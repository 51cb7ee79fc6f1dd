//! Structured error model for the relay engine.
//!
//! [`EngineError`] carries a category and a fatality flag. Categories
//! map one-to-one onto the failure domains of the pipeline: config,
//! broker transport, broker protocol, local storage, and the user
//! transform. Construct via the category-specific factory methods.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad classification of an engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid configuration, rejected before the pipeline starts.
    Config,
    /// Network I/O failure on a broker endpoint.
    Transport,
    /// The broker violated the AMQP contract.
    Protocol,
    /// Local disk I/O failure on a queue-directory endpoint.
    Storage,
    /// The user transform failed for a message.
    Transform,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Storage => "storage",
            Self::Transform => "transform",
        };
        f.write_str(s)
    }
}

/// An error raised by a pipeline component.
///
/// `fatal` decides whether the controller shuts the pipeline down or
/// logs and continues. Transform errors and per-entry storage errors
/// on the source side are the only non-fatal categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {message}")]
pub struct EngineError {
    pub category: ErrorCategory,
    pub message: String,
    pub fatal: bool,
}

impl EngineError {
    fn new(category: ErrorCategory, fatal: bool, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            fatal,
        }
    }

    /// Configuration or validation error. Always fatal; rejected
    /// before the pipeline has side effects.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, true, message)
    }

    /// Broker network failure. Fatal, except that the controller may
    /// retry the initial connect while no message has been received.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transport, true, message)
    }

    /// AMQP contract violation from the broker. Fatal.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Protocol, true, message)
    }

    /// Disk failure on the sink side. Fatal: completing the send
    /// without durable storage would risk silent loss.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Storage, true, message)
    }

    /// Disk failure confined to a single source-side entry. Logged
    /// and skipped.
    #[must_use]
    pub fn storage_entry(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Storage, false, message)
    }

    /// User transform failure. The affected message is dropped and
    /// the pipeline continues.
    #[must_use]
    pub fn transform(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transform, false, message)
    }

    /// Whether this error must bring the pipeline down.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}
