//! Semantic validation for parsed relay configuration values.
//!
//! Structural normalization (destination prefixes, credential shapes)
//! already happened at parse time; this pass checks the cross-option
//! rules and reports every violation at once.

use anyhow::{bail, Result};

use crate::config::types::{EndpointConfig, RelayConfig};
use crate::transform;

fn endpoint_shape(endpoint: &EndpointConfig, side: &str, errors: &mut Vec<String>) {
    match (&endpoint.broker, &endpoint.queue) {
        (Some(_), Some(_)) => {
            errors.push(format!("{side} must configure a broker or a queue, not both"));
        }
        (None, None) => {
            errors.push(format!("{side} must configure a broker or a queue"));
        }
        _ => {}
    }
}

/// Validate a parsed relay configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_relay(config: &RelayConfig) -> Result<()> {
    let mut errors = Vec::new();

    endpoint_shape(&config.incoming, "incoming", &mut errors);
    endpoint_shape(&config.outgoing, "outgoing", &mut errors);

    if let Some(broker) = &config.incoming.broker {
        if broker.subscriptions.is_empty() {
            errors.push("incoming broker requires at least one subscription".to_string());
        }
    } else if config.prefetch.is_some() {
        errors.push("prefetch requires a broker source".to_string());
    }

    if config.incoming.queue.is_none() {
        if config.loop_rescan {
            errors.push("loop requires a queue source".to_string());
        }
        if config.remove {
            errors.push("remove requires a queue source".to_string());
        }
    }

    if let Some(broker) = &config.outgoing.broker {
        if !broker.subscriptions.is_empty() {
            errors.push("outgoing broker must not define subscriptions".to_string());
        }
    }

    if config.window == 0 {
        errors.push("window must be at least 1".to_string());
    }
    if config.count == Some(0) {
        errors.push("count must be greater than zero when set".to_string());
    }
    if config.duration == Some(0) {
        errors.push("duration must be greater than zero when set".to_string());
    }
    if config.timeout_inactivity == Some(0) {
        errors.push("timeout_inactivity must be greater than zero when set".to_string());
    }
    if config.timeout_connect == 0 {
        errors.push("timeout_connect must be greater than zero".to_string());
    }
    if config.timeout_linger == 0 {
        errors.push("timeout_linger must be greater than zero".to_string());
    }

    if let Some(t) = &config.transform {
        if let Err(e) = transform::by_name(&t.name) {
            errors.push(e.message);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Relay validation failed:\n  - {}", errors.join("\n  - "));
    }
}
