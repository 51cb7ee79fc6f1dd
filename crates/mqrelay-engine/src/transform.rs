//! Per-message transform hook.
//!
//! Transforms are compiled-in and selected by name from configuration.
//! The controller invokes them single-threaded from the step loop; a
//! transform may mutate the header map but must not retain the message
//! after returning.

use mqrelay_types::{EngineError, Message};

/// Verdict of a transform's `check` for one message.
#[derive(Debug)]
pub enum Verdict {
    /// Forward this (possibly rewritten) message to the sink.
    Forward(Message),
    /// Drop the message; the string is logged as the reason.
    Drop(String),
}

/// Stateful per-message hook. All hooks except `check` default to
/// no-ops.
pub trait Transform: Send + std::fmt::Debug {
    /// Called once before any `check`, with the configured data strings.
    fn start(&mut self, _data: &[String]) -> Result<(), EngineError> {
        Ok(())
    }

    /// Called per message.
    fn check(&mut self, message: Message) -> Result<Verdict, EngineError>;

    /// Called when the source reports idle. Must not block.
    fn idle(&mut self) {}

    /// Called once during shutdown.
    fn stop(&mut self) {}
}

/// Passes every message through unchanged. Used when no transform is
/// configured.
#[derive(Debug, Default)]
pub struct Identity;

impl Transform for Identity {
    fn check(&mut self, message: Message) -> Result<Verdict, EngineError> {
        Ok(Verdict::Forward(message))
    }
}

/// Adds fixed headers to every message. Data entries are `key=value`.
#[derive(Debug, Default)]
pub struct SetHeader {
    headers: Vec<(String, String)>,
}

impl Transform for SetHeader {
    fn start(&mut self, data: &[String]) -> Result<(), EngineError> {
        for entry in data {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                EngineError::config(format!("set-header entry '{entry}' is not key=value"))
            })?;
            if key.is_empty() {
                return Err(EngineError::config(format!(
                    "set-header entry '{entry}' has an empty key"
                )));
            }
            self.headers.push((key.to_string(), value.to_string()));
        }
        Ok(())
    }

    fn check(&mut self, mut message: Message) -> Result<Verdict, EngineError> {
        for (key, value) in &self.headers {
            message.set_header(key.clone(), value.clone());
        }
        Ok(Verdict::Forward(message))
    }
}

/// Drops messages whose header matches a configured value. Data
/// entries are `key=value` or `key=value=reason`; the default drop
/// reason is `skip`.
#[derive(Debug, Default)]
pub struct FilterHeader {
    rules: Vec<FilterRule>,
}

#[derive(Debug)]
struct FilterRule {
    key: String,
    value: String,
    reason: String,
}

impl Transform for FilterHeader {
    fn start(&mut self, data: &[String]) -> Result<(), EngineError> {
        for entry in data {
            let mut parts = entry.splitn(3, '=');
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                return Err(EngineError::config(format!(
                    "filter-header entry '{entry}' is not key=value[=reason]"
                )));
            };
            if key.is_empty() {
                return Err(EngineError::config(format!(
                    "filter-header entry '{entry}' has an empty key"
                )));
            }
            self.rules.push(FilterRule {
                key: key.to_string(),
                value: value.to_string(),
                reason: parts.next().unwrap_or("skip").to_string(),
            });
        }
        Ok(())
    }

    fn check(&mut self, message: Message) -> Result<Verdict, EngineError> {
        for rule in &self.rules {
            if message.header(&rule.key) == Some(rule.value.as_str()) {
                return Ok(Verdict::Drop(rule.reason.clone()));
            }
        }
        Ok(Verdict::Forward(message))
    }
}

/// Instantiate a transform by registry name.
///
/// # Errors
///
/// Returns a config error for unknown names.
pub fn by_name(name: &str) -> Result<Box<dyn Transform>, EngineError> {
    match name {
        "identity" => Ok(Box::new(Identity)),
        "set-header" => Ok(Box::new(SetHeader::default())),
        "filter-header" => Ok(Box::new(FilterHeader::default())),
        other => Err(EngineError::config(format!(
            "unknown transform '{other}' (known: identity, set-header, filter-header)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward(v: Verdict) -> Message {
        match v {
            Verdict::Forward(m) => m,
            Verdict::Drop(r) => panic!("unexpected drop: {r}"),
        }
    }

    #[test]
    fn identity_forwards_unchanged() {
        let mut t = Identity;
        let msg = Message::new(b"x".to_vec()).with_header("a", "b");
        let out = forward(t.check(msg.clone()).unwrap());
        assert_eq!(out, msg);
    }

    #[test]
    fn set_header_adds_configured_headers() {
        let mut t = SetHeader::default();
        t.start(&["destination=/queue/R".to_string(), "env=prod".to_string()])
            .unwrap();
        let out = forward(t.check(Message::new(vec![])).unwrap());
        assert_eq!(out.header("destination"), Some("/queue/R"));
        assert_eq!(out.header("env"), Some("prod"));
    }

    #[test]
    fn set_header_rejects_malformed_data() {
        let mut t = SetHeader::default();
        assert!(t.start(&["no-equals-sign".to_string()]).is_err());
        assert!(SetHeader::default().start(&["=value".to_string()]).is_err());
    }

    #[test]
    fn filter_header_drops_matches() {
        let mut t = FilterHeader::default();
        t.start(&["priority=low".to_string()]).unwrap();

        let low = Message::new(vec![]).with_header("priority", "low");
        match t.check(low).unwrap() {
            Verdict::Drop(reason) => assert_eq!(reason, "skip"),
            Verdict::Forward(_) => panic!("low-priority message should drop"),
        }

        let high = Message::new(vec![]).with_header("priority", "high");
        assert!(matches!(t.check(high).unwrap(), Verdict::Forward(_)));
    }

    #[test]
    fn filter_header_custom_reason() {
        let mut t = FilterHeader::default();
        t.start(&["kind=test=not-for-prod".to_string()]).unwrap();
        let msg = Message::new(vec![]).with_header("kind", "test");
        match t.check(msg).unwrap() {
            Verdict::Drop(reason) => assert_eq!(reason, "not-for-prod"),
            Verdict::Forward(_) => panic!("should drop"),
        }
    }

    #[test]
    fn registry_resolves_known_names() {
        assert!(by_name("identity").is_ok());
        assert!(by_name("set-header").is_ok());
        assert!(by_name("filter-header").is_ok());
        let err = by_name("python-callback").unwrap_err();
        assert!(err.to_string().contains("unknown transform"));
    }
}
