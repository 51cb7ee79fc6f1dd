//! Destination canonicalization.
//!
//! Subscription and routing destinations arrive as prefixed strings
//! (`/queue/orders`, `/topic/metrics.#`, `/exchange/events`) and are
//! normalized into a `{kind, name}` pair at the config boundary so the
//! engine only ever sees structured values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// What kind of broker entity a destination names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Queue,
    Topic,
    Exchange,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queue => "queue",
            Self::Topic => "topic",
            Self::Exchange => "exchange",
        };
        f.write_str(s)
    }
}

/// A canonicalized destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub kind: DestinationKind,
    pub name: String,
}

impl Destination {
    #[must_use]
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            kind: DestinationKind::Queue,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            kind: DestinationKind::Topic,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn exchange(name: impl Into<String>) -> Self {
        Self {
            kind: DestinationKind::Exchange,
            name: name.into(),
        }
    }
}

impl FromStr for Destination {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = if let Some(rest) = s.strip_prefix("/queue/") {
            (DestinationKind::Queue, rest)
        } else if let Some(rest) = s.strip_prefix("/topic/") {
            (DestinationKind::Topic, rest)
        } else if let Some(rest) = s.strip_prefix("/exchange/") {
            (DestinationKind::Exchange, rest)
        } else {
            return Err(EngineError::config(format!(
                "destination '{s}' must start with /queue/, /topic/, or /exchange/"
            )));
        };
        if name.is_empty() {
            return Err(EngineError::config(format!("destination '{s}' has an empty name")));
        }
        Ok(Self {
            kind,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.kind, self.name)
    }
}
