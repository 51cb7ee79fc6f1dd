//! Relay configuration loading.
//!
//! The file is parsed into a YAML tree first and environment
//! references are expanded afterwards, inside string scalars only.
//! Broker URIs and credentials routinely carry secrets via
//! `${AMQP_PASSWORD}`-style references, and expanding after the parse
//! means a variable's value can never alter the document structure or
//! leak into option names. References support a fallback
//! (`${VAR:-default}`), and `$$` escapes a literal dollar sign.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::{Captures, Regex};

use crate::config::types::RelayConfig;

static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\$)|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("valid expansion regex")
});

/// Expand one scalar. Unset variables without a fallback are pushed
/// onto `missing` instead of failing, so every unresolved reference in
/// the file can be reported in one pass.
fn expand(input: &str, missing: &mut Vec<String>) -> String {
    VAR_RE
        .replace_all(input, |caps: &Captures<'_>| {
            if caps.get(1).is_some() {
                return "$".to_string();
            }
            let name = &caps[2];
            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => match caps.get(3) {
                    Some(fallback) => fallback.as_str().to_string(),
                    None => {
                        missing.push(name.to_string());
                        String::new()
                    }
                },
            }
        })
        .into_owned()
}

/// Walk the parsed document and expand every string scalar in place.
/// Mapping keys are left alone: option names are fixed, only values
/// may come from the environment.
fn expand_scalars(value: &mut serde_yaml::Value, missing: &mut Vec<String>) {
    match value {
        serde_yaml::Value::String(s) => {
            if s.contains('$') {
                *s = expand(s, missing);
            }
        }
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                expand_scalars(item, missing);
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_key, item) in map.iter_mut() {
                expand_scalars(item, missing);
            }
        }
        _ => {}
    }
}

/// Load a relay configuration from a YAML string.
///
/// # Errors
///
/// Returns an error if the YAML is malformed, an environment reference
/// has no value and no fallback, or the document does not describe a
/// valid relay.
pub fn load_str(input: &str) -> Result<RelayConfig> {
    let mut document: serde_yaml::Value =
        serde_yaml::from_str(input).context("Failed to parse relay YAML")?;

    let mut missing = Vec::new();
    expand_scalars(&mut document, &mut missing);
    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        bail!(
            "Unset environment variable(s) in relay config: {}",
            missing.join(", ")
        );
    }

    serde_yaml::from_value(document).context("Invalid relay configuration")
}

/// Load a relay configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or [`load_str`] fails.
pub fn load(path: &Path) -> Result<RelayConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read relay config {}", path.display()))?;
    load_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand_all(input: &str) -> (String, Vec<String>) {
        let mut missing = Vec::new();
        let expanded = expand(input, &mut missing);
        (expanded, missing)
    }

    #[test]
    fn reference_is_replaced_by_env_value() {
        std::env::set_var("MQR_LOAD_HOST", "broker.internal");
        let (out, missing) = expand_all("amqp://${MQR_LOAD_HOST}:5672/%2f");
        assert_eq!(out, "amqp://broker.internal:5672/%2f");
        assert!(missing.is_empty());
        std::env::remove_var("MQR_LOAD_HOST");
    }

    #[test]
    fn fallback_applies_when_unset() {
        let (out, missing) = expand_all("${MQR_LOAD_UNSET_A:-guest}");
        assert_eq!(out, "guest");
        assert!(missing.is_empty());
    }

    #[test]
    fn env_value_beats_fallback() {
        std::env::set_var("MQR_LOAD_VHOST", "prod");
        let (out, _) = expand_all("${MQR_LOAD_VHOST:-dev}");
        assert_eq!(out, "prod");
        std::env::remove_var("MQR_LOAD_VHOST");
    }

    #[test]
    fn empty_fallback_is_allowed() {
        let (out, missing) = expand_all("x${MQR_LOAD_UNSET_B:-}y");
        assert_eq!(out, "xy");
        assert!(missing.is_empty());
    }

    #[test]
    fn double_dollar_escapes() {
        let (out, missing) = expand_all("cost: $$5, raw: $${NOT_A_VAR}");
        assert_eq!(out, "cost: $5, raw: ${NOT_A_VAR}");
        assert!(missing.is_empty());
    }

    #[test]
    fn unset_without_fallback_is_collected() {
        let (_, missing) = expand_all("${MQR_LOAD_UNSET_C} and ${MQR_LOAD_UNSET_C}");
        assert_eq!(missing, vec!["MQR_LOAD_UNSET_C", "MQR_LOAD_UNSET_C"]);
    }

    #[test]
    fn expansion_reaches_nested_sequences() {
        std::env::set_var("MQR_LOAD_QUEUE", "orders");
        let yaml = r#"
incoming:
  broker:
    uri: amqp://localhost:5672/%2f
    subscriptions: ["/queue/${MQR_LOAD_QUEUE}"]
outgoing:
  queue: /var/spool/out
"#;
        let config = load_str(yaml).unwrap();
        let subs = &config.incoming.broker.as_ref().unwrap().subscriptions;
        assert_eq!(subs[0].destination.name, "orders");
        std::env::remove_var("MQR_LOAD_QUEUE");
    }

    #[test]
    fn credential_from_environment() {
        std::env::set_var("MQR_LOAD_PASS", "sesame");
        let yaml = r#"
incoming:
  queue: /var/spool/in
outgoing:
  broker:
    uri: amqp://remote:5672/%2f
    auth: "svc:${MQR_LOAD_PASS}"
"#;
        let config = load_str(yaml).unwrap();
        let auth = config.outgoing.broker.unwrap().auth.unwrap();
        assert_eq!(auth.username, "svc");
        assert_eq!(auth.password, "sesame");
        std::env::remove_var("MQR_LOAD_PASS");
    }

    #[test]
    fn all_unset_references_reported_once_each() {
        let yaml = r#"
incoming:
  broker:
    uri: ${MQR_LOAD_MISSING_URI}
    subscriptions: ["/queue/${MQR_LOAD_MISSING_Q}", "/topic/${MQR_LOAD_MISSING_Q}"]
outgoing:
  queue: /out
"#;
        let err = load_str(yaml).unwrap_err().to_string();
        assert!(err.contains("MQR_LOAD_MISSING_URI"));
        assert!(err.contains("MQR_LOAD_MISSING_Q"));
        // Deduplicated: the twice-referenced variable appears once.
        assert_eq!(err.matches("MQR_LOAD_MISSING_Q").count(), 1);
    }

    #[test]
    fn option_names_are_never_expanded() {
        let mut doc: serde_yaml::Value =
            serde_yaml::from_str("'${MQR_LOAD_UNSET_D}': value").unwrap();
        let mut missing = Vec::new();
        expand_scalars(&mut doc, &mut missing);
        assert!(missing.is_empty(), "keys must not be expanded");
        assert!(doc
            .as_mapping()
            .unwrap()
            .contains_key(&serde_yaml::Value::String("${MQR_LOAD_UNSET_D}".into())));
    }

    #[test]
    fn variable_value_cannot_change_structure() {
        // A value that looks like YAML stays a plain string.
        std::env::set_var("MQR_LOAD_TRICKY", "{path: /evil}");
        let yaml = r#"
incoming:
  queue: ${MQR_LOAD_TRICKY}
outgoing:
  queue: /out
"#;
        let config = load_str(yaml).unwrap();
        assert_eq!(
            config.incoming.queue.unwrap().path.to_str().unwrap(),
            "{path: /evil}"
        );
        std::env::remove_var("MQR_LOAD_TRICKY");
    }

    #[test]
    fn malformed_yaml_fails_before_expansion() {
        assert!(load_str("incoming: [unclosed").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load(Path::new("/nonexistent/relay.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/relay.yaml"));
    }
}
