//! Publishing broker sink.
//!
//! With `reliable` set the channel runs in publisher-confirm mode and
//! each publish spawns a waiter task that reports the confirmation on
//! the completion queue; without it, completions are emitted as soon
//! as the frame is handed to the wire library.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::{Channel, Connection};

use mqrelay_types::{Destination, EngineError, Message};

use crate::config::Credential;
use crate::endpoint::{Completion, CompletionSender, SendOutcome, Sink};

use super::{amqp_error, connect, properties_from_message, routing_for, HDR_DESTINATION};

const FLUSH_POLL: Duration = Duration::from_millis(10);

pub struct BrokerSink {
    uri: String,
    credential: Option<Credential>,
    reliable: bool,
    timeout_connect: Duration,
    completions: CompletionSender,

    connection: Option<Connection>,
    channel: Option<Channel>,
    /// Publishes whose confirmation has not yet been reported.
    unconfirmed: Arc<AtomicUsize>,
}

impl BrokerSink {
    #[must_use]
    pub fn new(
        uri: impl Into<String>,
        credential: Option<Credential>,
        reliable: bool,
        timeout_connect: Duration,
        completions: CompletionSender,
    ) -> Self {
        Self {
            uri: uri.into(),
            credential,
            reliable,
            timeout_connect,
            completions,
            connection: None,
            channel: None,
            unconfirmed: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn destination_of(message: &Message) -> Result<Destination, EngineError> {
        let raw = message.header(HDR_DESTINATION).ok_or_else(|| {
            EngineError::config("message has no destination header to route by")
        })?;
        Destination::from_str(raw)
    }
}

#[async_trait]
impl Sink for BrokerSink {
    async fn start(&mut self) -> Result<(), EngineError> {
        let connection = connect(&self.uri, self.credential.as_ref(), self.timeout_connect).await?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| amqp_error("open channel", &e))?;
        if self.reliable {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| amqp_error("enable publisher confirms", &e))?;
        }
        self.connection = Some(connection);
        self.channel = Some(channel);
        Ok(())
    }

    async fn send(&mut self, seq: u64, message: Message) -> Result<(), EngineError> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| EngineError::transport("broker sink is not started"))?;

        let destination = Self::destination_of(&message)?;
        let (exchange, routing_key) = routing_for(&destination);
        let properties = properties_from_message(&message);

        let confirm = channel
            .basic_publish(
                &exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| amqp_error("publish", &e))?;

        if self.reliable {
            self.unconfirmed.fetch_add(1, Ordering::SeqCst);
            let completions = self.completions.clone();
            let unconfirmed = self.unconfirmed.clone();
            tokio::spawn(async move {
                let outcome = match confirm.await {
                    Ok(Confirmation::Nack(_)) => SendOutcome::Failed(EngineError::transport(
                        "broker negatively acknowledged publish",
                    )),
                    Ok(_) => SendOutcome::Confirmed,
                    Err(e) => SendOutcome::Failed(amqp_error("publisher confirm", &e)),
                };
                unconfirmed.fetch_sub(1, Ordering::SeqCst);
                let _ = completions.send(Completion { seq, outcome });
            });
        } else {
            let _ = self.completions.send(Completion {
                seq,
                outcome: SendOutcome::Confirmed,
            });
        }
        Ok(())
    }

    async fn flush(&mut self, budget: Duration) -> Result<(), EngineError> {
        let deadline = Instant::now() + budget;
        while self.unconfirmed.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                tracing::warn!(
                    outstanding = self.unconfirmed.load(Ordering::SeqCst),
                    "flush budget elapsed with unconfirmed publishes"
                );
                break;
            }
            tokio::time::sleep(FLUSH_POLL).await;
        }
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close(200, "shutting down").await {
                tracing::debug!(error = %e, "broker connection close");
            }
        }
        self.channel = None;
    }
}
