//! Canonical configuration types.
//!
//! Several options are duck-typed in the file format (a queue can be a
//! bare path or a mapping, a subscription a destination string or a
//! mapping, a credential `user:pass` or a mapping). They are
//! normalized here, at the serde boundary, so the engine only ever
//! sees one canonical shape.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use mqrelay_types::{Destination, EngineError};

fn default_window() -> usize {
    64
}
fn default_timeout_connect() -> u64 {
    30
}
fn default_timeout_linger() -> u64 {
    10
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    pub incoming: EndpointConfig,
    pub outgoing: EndpointConfig,
    #[serde(default)]
    pub transform: Option<TransformConfig>,

    /// Broker-side credit for the incoming subscription.
    #[serde(default)]
    pub prefetch: Option<u16>,
    /// Maximum number of in-flight (received, unacked) messages.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Client-side acks on the source and publisher confirms on the sink.
    #[serde(default)]
    pub reliable: bool,

    /// Stop after this many acknowledged messages.
    #[serde(default)]
    pub count: Option<u64>,
    /// Stop after this many seconds of wall clock.
    #[serde(default)]
    pub duration: Option<u64>,
    /// Stop after this many seconds without a receipt.
    #[serde(default)]
    pub timeout_inactivity: Option<u64>,

    /// Bound on endpoint connection establishment, seconds.
    #[serde(default = "default_timeout_connect")]
    pub timeout_connect: u64,
    /// Bound on the shutdown drain and flush, seconds.
    #[serde(default = "default_timeout_linger")]
    pub timeout_linger: u64,

    /// Defer sink startup until the first received message.
    #[serde(default)]
    pub lazy: bool,
    /// Queue source: rescan from the beginning on exhaustion.
    #[serde(rename = "loop", default)]
    pub loop_rescan: bool,
    /// Queue source: delete entries on ack.
    #[serde(default)]
    pub remove: bool,
    /// Emit run statistics at shutdown.
    #[serde(default)]
    pub statistics: bool,

    #[serde(default)]
    pub pidfile: Option<PathBuf>,
}

impl RelayConfig {
    #[must_use]
    pub fn timeout_connect(&self) -> Duration {
        Duration::from_secs(self.timeout_connect)
    }

    #[must_use]
    pub fn timeout_linger(&self) -> Duration {
        Duration::from_secs(self.timeout_linger)
    }

    /// Broker-side credit to request: the configured `prefetch`, or
    /// `min(count, 100)` when running reliable toward a known count.
    #[must_use]
    pub fn effective_prefetch(&self) -> Option<u16> {
        if self.prefetch.is_some() {
            return self.prefetch;
        }
        if self.reliable {
            if let Some(count) = self.count {
                #[allow(clippy::cast_possible_truncation)]
                return Some(count.min(100) as u16);
            }
        }
        None
    }
}

/// One side of the relay: either a broker or a queue directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    #[serde(default)]
    pub broker: Option<BrokerConfig>,
    #[serde(default)]
    pub queue: Option<QueueConfig>,
}

/// Broker endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// `amqp[s]://[user[:pass]@]host[:port]/vhost`
    pub uri: String,
    /// Overrides any userinfo embedded in the URI.
    #[serde(default)]
    pub auth: Option<Credential>,
    /// Source side only; at least one is required there.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// Queue-directory endpoint settings. Accepts a bare path.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "QueueSpec")]
pub struct QueueConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueueSpec {
    Compact(PathBuf),
    Full { path: PathBuf },
}

impl From<QueueSpec> for QueueConfig {
    fn from(spec: QueueSpec) -> Self {
        let path = match spec {
            QueueSpec::Compact(path) | QueueSpec::Full { path } => path,
        };
        Self { path }
    }
}

/// Broker authentication material. Accepts `user:pass`.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "CredentialSpec")]
pub struct Credential {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CredentialSpec {
    Compact(String),
    Full { username: String, password: String },
}

impl TryFrom<CredentialSpec> for Credential {
    type Error = EngineError;

    fn try_from(spec: CredentialSpec) -> Result<Self, Self::Error> {
        match spec {
            CredentialSpec::Compact(s) => {
                let (username, password) = s.split_once(':').ok_or_else(|| {
                    EngineError::config("compact credential must be 'user:pass'")
                })?;
                Ok(Self {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            CredentialSpec::Full { username, password } => Ok(Self { username, password }),
        }
    }
}

/// A broker subscription. Accepts a bare destination string.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "SubscriptionSpec")]
pub struct Subscription {
    pub destination: Destination,
    pub exclusive: bool,
    /// Passed through to the broker on consume.
    pub arguments: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SubscriptionSpec {
    Compact(String),
    Full {
        destination: String,
        #[serde(default)]
        exclusive: bool,
        #[serde(default)]
        arguments: HashMap<String, String>,
    },
}

impl TryFrom<SubscriptionSpec> for Subscription {
    type Error = EngineError;

    fn try_from(spec: SubscriptionSpec) -> Result<Self, Self::Error> {
        match spec {
            SubscriptionSpec::Compact(destination) => Ok(Self {
                destination: destination.parse()?,
                exclusive: false,
                arguments: HashMap::new(),
            }),
            SubscriptionSpec::Full {
                destination,
                exclusive,
                arguments,
            } => Ok(Self {
                destination: destination.parse()?,
                exclusive,
                arguments,
            }),
        }
    }
}

/// Transform selection: a registry name plus its data strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    pub name: String,
    #[serde(default)]
    pub data: Vec<String>,
}
