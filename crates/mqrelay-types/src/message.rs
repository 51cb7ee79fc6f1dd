//! Message envelope and delivery tag types.
//!
//! A [`Message`] is an opaque body plus a flat string-to-string header
//! map. The engine never inspects bodies; headers are read and mutated
//! only on behalf of the configured transform and the broker property
//! mapping.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A message moving through the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Short-string header map. Keys are unique; order is irrelevant.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Opaque payload bytes.
    #[serde(default)]
    pub body: Vec<u8>,
    /// Content encoding tag associated with the body, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
}

impl Message {
    /// Create a message with the given body and no headers.
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: HashMap::new(),
            body: body.into(),
            content_encoding: None,
        }
    }

    /// Builder-style header insertion, mostly for tests and transforms.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Look up a header value.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Insert or replace a header.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Remove a header, returning its previous value.
    pub fn remove_header(&mut self, key: &str) -> Option<String> {
        self.headers.remove(key)
    }
}

/// Opaque source-issued identifier for a yielded message.
///
/// Two tags are distinct iff they were issued by distinct source
/// yields. Only the source that issued a tag can interpret it; the
/// engine just carries tags through the in-flight window and hands
/// them back for ack/nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    /// Wrap a source-private tag value.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The source-private tag value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
