//! AMQP broker endpoints, backed by lapin.
//!
//! The engine depends only on the [`Source`](crate::endpoint::Source)
//! and [`Sink`](crate::endpoint::Sink) seams; everything lapin-specific
//! (connection setup, property mapping, confirm handling) lives here.

pub mod sink;
pub mod source;

pub use sink::BrokerSink;
pub use source::BrokerSource;

use std::time::Duration;

use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::uri::AMQPUri;
use lapin::{BasicProperties, Connection, ConnectionProperties};

use mqrelay_types::{Destination, DestinationKind, EngineError, Message};

use crate::config::Credential;

/// Header keys that ride AMQP basic properties rather than the
/// application headers table.
const HDR_CONTENT_TYPE: &str = "content-type";
const HDR_PERSISTENT: &str = "persistent";
const HDR_EXPIRATION: &str = "expiration";
const HDR_PRIORITY: &str = "priority";
const HDR_REPLY_TO: &str = "reply-to";
const HDR_CORRELATION_ID: &str = "correlation-id";
const HDR_MESSAGE_ID: &str = "message-id";
const HDR_APP_ID: &str = "app-id";
/// Routing metadata consumed by the sink, never published.
pub(crate) const HDR_DESTINATION: &str = "destination";

/// Classify a lapin error into the engine taxonomy.
pub(crate) fn amqp_error(context: &str, error: &lapin::Error) -> EngineError {
    match error {
        lapin::Error::ProtocolError(e) => EngineError::protocol(format!("{context}: {e}")),
        other => EngineError::transport(format!("{context}: {other}")),
    }
}

/// Connect to a broker, bounded by `timeout_connect`. An explicit
/// credential overrides any userinfo embedded in the URI.
pub(crate) async fn connect(
    uri: &str,
    credential: Option<&Credential>,
    timeout_connect: Duration,
) -> Result<Connection, EngineError> {
    let mut amqp_uri: AMQPUri = uri
        .parse()
        .map_err(|e| EngineError::config(format!("invalid broker URI '{uri}': {e}")))?;
    if let Some(cred) = credential {
        amqp_uri.authority.userinfo.username = cred.username.clone();
        amqp_uri.authority.userinfo.password = cred.password.clone();
    }

    let host = amqp_uri.authority.host.clone();
    let connected = tokio::time::timeout(
        timeout_connect,
        Connection::connect_uri(amqp_uri, ConnectionProperties::default()),
    )
    .await
    .map_err(|_| {
        EngineError::transport(format!(
            "connect to {host} timed out after {}s",
            timeout_connect.as_secs()
        ))
    })?
    .map_err(|e| amqp_error("broker connect failed", &e))?;

    tracing::info!(host = %host, "broker connection established");
    Ok(connected)
}

/// Exchange and routing key for a canonicalized destination.
pub(crate) fn routing_for(destination: &Destination) -> (String, String) {
    match destination.kind {
        DestinationKind::Queue => (String::new(), destination.name.clone()),
        DestinationKind::Topic => ("amq.topic".to_string(), destination.name.clone()),
        DestinationKind::Exchange => (destination.name.clone(), String::new()),
    }
}

fn truthy(value: &str) -> bool {
    matches!(value, "true" | "1" | "yes")
}

/// Map message headers onto AMQP basic properties. Reserved keys
/// become properties; the rest go to the headers table. The
/// `destination` header is routing metadata and is not published.
pub(crate) fn properties_from_message(message: &Message) -> BasicProperties {
    let mut props = BasicProperties::default();
    let mut table = FieldTable::default();

    for (key, value) in &message.headers {
        match key.as_str() {
            HDR_DESTINATION => {}
            HDR_CONTENT_TYPE => props = props.with_content_type(ShortString::from(value.clone())),
            HDR_PERSISTENT => {
                props = props.with_delivery_mode(if truthy(value) { 2 } else { 1 });
            }
            HDR_EXPIRATION => props = props.with_expiration(ShortString::from(value.clone())),
            HDR_PRIORITY => match value.parse::<u8>() {
                Ok(p) => props = props.with_priority(p),
                Err(_) => tracing::warn!(value, "ignoring unparseable priority header"),
            },
            HDR_REPLY_TO => props = props.with_reply_to(ShortString::from(value.clone())),
            HDR_CORRELATION_ID => {
                props = props.with_correlation_id(ShortString::from(value.clone()));
            }
            HDR_MESSAGE_ID => props = props.with_message_id(ShortString::from(value.clone())),
            HDR_APP_ID => props = props.with_app_id(ShortString::from(value.clone())),
            _ => {
                table.insert(
                    ShortString::from(key.clone()),
                    AMQPValue::LongString(LongString::from(value.clone())),
                );
            }
        }
    }

    if let Some(encoding) = &message.content_encoding {
        props = props.with_content_encoding(ShortString::from(encoding.clone()));
    }
    if !table.inner().is_empty() {
        props = props.with_headers(table);
    }
    props
}

fn amqp_value_to_string(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::Boolean(b) => Some(b.to_string()),
        AMQPValue::ShortShortInt(i) => Some(i.to_string()),
        AMQPValue::ShortShortUInt(i) => Some(i.to_string()),
        AMQPValue::ShortInt(i) => Some(i.to_string()),
        AMQPValue::ShortUInt(i) => Some(i.to_string()),
        AMQPValue::LongInt(i) => Some(i.to_string()),
        AMQPValue::LongUInt(i) => Some(i.to_string()),
        AMQPValue::LongLongInt(i) => Some(i.to_string()),
        AMQPValue::Float(f) => Some(f.to_string()),
        AMQPValue::Double(d) => Some(d.to_string()),
        _ => None,
    }
}

/// Reverse of [`properties_from_message`].
pub(crate) fn message_from_parts(properties: &BasicProperties, data: Vec<u8>) -> Message {
    let mut message = Message::new(data);

    if let Some(table) = properties.headers() {
        for (key, value) in table.inner() {
            match amqp_value_to_string(value) {
                Some(v) => message.set_header(key.as_str(), v),
                None => {
                    tracing::warn!(header = key.as_str(), "dropping non-scalar AMQP header");
                }
            }
        }
    }

    if let Some(ct) = properties.content_type() {
        message.set_header(HDR_CONTENT_TYPE, ct.as_str());
    }
    if let Some(mode) = properties.delivery_mode() {
        if *mode == 2 {
            message.set_header(HDR_PERSISTENT, "true");
        }
    }
    if let Some(exp) = properties.expiration() {
        message.set_header(HDR_EXPIRATION, exp.as_str());
    }
    if let Some(priority) = properties.priority() {
        message.set_header(HDR_PRIORITY, priority.to_string());
    }
    if let Some(reply_to) = properties.reply_to() {
        message.set_header(HDR_REPLY_TO, reply_to.as_str());
    }
    if let Some(id) = properties.correlation_id() {
        message.set_header(HDR_CORRELATION_ID, id.as_str());
    }
    if let Some(id) = properties.message_id() {
        message.set_header(HDR_MESSAGE_ID, id.as_str());
    }
    if let Some(id) = properties.app_id() {
        message.set_header(HDR_APP_ID, id.as_str());
    }
    if let Some(encoding) = properties.content_encoding() {
        message.content_encoding = Some(encoding.as_str().to_string());
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_by_destination_kind() {
        assert_eq!(
            routing_for(&Destination::queue("orders")),
            (String::new(), "orders".to_string())
        );
        assert_eq!(
            routing_for(&Destination::topic("metrics.cpu")),
            ("amq.topic".to_string(), "metrics.cpu".to_string())
        );
        assert_eq!(
            routing_for(&Destination::exchange("events")),
            ("events".to_string(), String::new())
        );
    }

    #[test]
    fn reserved_headers_become_properties() {
        let msg = Message::new(b"body".to_vec())
            .with_header("content-type", "text/plain")
            .with_header("persistent", "true")
            .with_header("priority", "5")
            .with_header("correlation-id", "abc")
            .with_header("trace", "t-1");

        let props = properties_from_message(&msg);
        assert_eq!(props.content_type().as_ref().map(ShortString::as_str), Some("text/plain"));
        assert_eq!(*props.delivery_mode(), Some(2));
        assert_eq!(*props.priority(), Some(5));
        assert_eq!(props.correlation_id().as_ref().map(ShortString::as_str), Some("abc"));
        let table = props.headers().as_ref().expect("headers table");
        assert!(table.inner().contains_key(&ShortString::from("trace")));
    }

    #[test]
    fn destination_header_is_not_published() {
        let msg = Message::new(vec![]).with_header("destination", "/queue/q");
        let props = properties_from_message(&msg);
        assert!(props.headers().is_none());
    }

    #[test]
    fn property_mapping_roundtrips() {
        let mut msg = Message::new(b"payload".to_vec())
            .with_header("content-type", "application/json")
            .with_header("persistent", "true")
            .with_header("priority", "3")
            .with_header("reply-to", "callback")
            .with_header("x-custom", "value");
        msg.content_encoding = Some("gzip".to_string());

        let props = properties_from_message(&msg);
        let back = message_from_parts(&props, msg.body.clone());
        assert_eq!(back, msg);
    }

    #[test]
    fn non_persistent_delivery_mode_maps_to_no_header() {
        let msg = Message::new(vec![]).with_header("persistent", "no");
        let props = properties_from_message(&msg);
        assert_eq!(*props.delivery_mode(), Some(1));
        let back = message_from_parts(&props, vec![]);
        assert!(back.header("persistent").is_none());
    }

    #[test]
    fn unparseable_priority_is_ignored() {
        let msg = Message::new(vec![]).with_header("priority", "urgent");
        let props = properties_from_message(&msg);
        assert!(props.priority().is_none());
    }

    #[test]
    fn scalar_table_values_are_stringified() {
        let mut table = FieldTable::default();
        table.insert(ShortString::from("count"), AMQPValue::LongInt(42));
        table.insert(ShortString::from("flag"), AMQPValue::Boolean(true));
        let props = BasicProperties::default().with_headers(table);

        let msg = message_from_parts(&props, vec![]);
        assert_eq!(msg.header("count"), Some("42"));
        assert_eq!(msg.header("flag"), Some("true"));
    }
}
