//! Push-based broker source.
//!
//! Subscriptions are established on one channel (delivery tags are
//! channel-scoped, so one channel keeps them unambiguous) before the
//! first `step()`. A background pump task per consumer forwards
//! deliveries into an in-process queue; `step()` is a `try_recv`
//! against that queue, which keeps the controller loop non-blocking.
//! The pattern follows the pack's Kafka source (background reader
//! task feeding a channel).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{Channel, Connection};
use tokio::sync::mpsc;

use mqrelay_types::{DeliveryTag, DestinationKind, EngineError};

use crate::config::{Credential, Subscription};
use crate::endpoint::{Source, StepOutcome};

use super::{amqp_error, connect, message_from_parts};

pub struct BrokerSource {
    uri: String,
    credential: Option<Credential>,
    subscriptions: Vec<Subscription>,
    /// Client-side acking and server-side credit. When unset the
    /// broker auto-acks and `ack`/`nack` are no-ops.
    reliable: bool,
    prefetch: Option<u16>,
    timeout_connect: Duration,

    connection: Option<Connection>,
    channel: Option<Channel>,
    consumer_tags: Vec<String>,
    deliveries: Option<mpsc::UnboundedReceiver<Delivery>>,
    /// Set by a pump task when its consumer stream fails.
    failed: Arc<AtomicBool>,
    stopped: bool,
}

impl BrokerSource {
    #[must_use]
    pub fn new(
        uri: impl Into<String>,
        credential: Option<Credential>,
        subscriptions: Vec<Subscription>,
        reliable: bool,
        prefetch: Option<u16>,
        timeout_connect: Duration,
    ) -> Self {
        Self {
            uri: uri.into(),
            credential,
            subscriptions,
            reliable,
            prefetch,
            timeout_connect,
            connection: None,
            channel: None,
            consumer_tags: Vec::new(),
            deliveries: None,
            failed: Arc::new(AtomicBool::new(false)),
            stopped: false,
        }
    }

    fn channel(&self) -> Result<&Channel, EngineError> {
        self.channel
            .as_ref()
            .ok_or_else(|| EngineError::transport("broker source is not started"))
    }

    /// Resolve the queue a subscription consumes from, declaring and
    /// binding a server-named queue for topic/exchange destinations.
    async fn consume_queue(
        channel: &Channel,
        subscription: &Subscription,
    ) -> Result<String, EngineError> {
        let destination = &subscription.destination;
        match destination.kind {
            DestinationKind::Queue => {
                channel
                    .queue_declare(
                        &destination.name,
                        QueueDeclareOptions {
                            passive: true,
                            ..QueueDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        EngineError::config(format!(
                            "subscription queue '{}' is not available: {e}",
                            destination.name
                        ))
                    })?;
                Ok(destination.name.clone())
            }
            DestinationKind::Topic | DestinationKind::Exchange => {
                let queue = channel
                    .queue_declare(
                        "",
                        QueueDeclareOptions {
                            exclusive: true,
                            auto_delete: true,
                            ..QueueDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| amqp_error("declare subscription queue", &e))?;
                let (exchange, routing_key) = match destination.kind {
                    DestinationKind::Topic => ("amq.topic", destination.name.as_str()),
                    _ => (destination.name.as_str(), "#"),
                };
                channel
                    .queue_bind(
                        queue.name().as_str(),
                        exchange,
                        routing_key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| amqp_error("bind subscription queue", &e))?;
                Ok(queue.name().as_str().to_string())
            }
        }
    }

    fn consume_arguments(subscription: &Subscription) -> FieldTable {
        let mut table = FieldTable::default();
        for (key, value) in &subscription.arguments {
            table.insert(
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            );
        }
        table
    }
}

#[async_trait]
impl Source for BrokerSource {
    async fn start(&mut self) -> Result<(), EngineError> {
        let connection = connect(&self.uri, self.credential.as_ref(), self.timeout_connect).await?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| amqp_error("open channel", &e))?;

        if let Some(prefetch) = self.prefetch {
            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| amqp_error("set prefetch", &e))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.failed.store(false, Ordering::SeqCst);

        for (index, subscription) in self.subscriptions.iter().enumerate() {
            let queue = Self::consume_queue(&channel, subscription).await?;
            let consumer_tag = format!("mqrelay-{index}");
            let mut consumer = channel
                .basic_consume(
                    &queue,
                    &consumer_tag,
                    BasicConsumeOptions {
                        no_ack: !self.reliable,
                        exclusive: subscription.exclusive,
                        ..BasicConsumeOptions::default()
                    },
                    Self::consume_arguments(subscription),
                )
                .await
                .map_err(|e| amqp_error("subscribe", &e))?;

            tracing::info!(
                destination = %subscription.destination,
                queue,
                prefetch = self.prefetch,
                reliable = self.reliable,
                "subscribed"
            );

            let tx = tx.clone();
            let failed = self.failed.clone();
            tokio::spawn(async move {
                while let Some(item) = consumer.next().await {
                    match item {
                        Ok(delivery) => {
                            if tx.send(delivery).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "consumer stream failed");
                            failed.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            });
            self.consumer_tags.push(consumer_tag);
        }

        self.connection = Some(connection);
        self.channel = Some(channel);
        self.deliveries = Some(rx);
        Ok(())
    }

    async fn step(&mut self) -> Result<StepOutcome, EngineError> {
        let Some(rx) = self.deliveries.as_mut() else {
            return Err(EngineError::transport("broker source is not started"));
        };
        match rx.try_recv() {
            Ok(delivery) => {
                let tag = DeliveryTag::new(delivery.delivery_tag);
                let message = message_from_parts(&delivery.properties, delivery.data);
                Ok(StepOutcome::Received { message, tag })
            }
            Err(mpsc::error::TryRecvError::Empty) => {
                if self.failed.load(Ordering::SeqCst) {
                    Err(EngineError::transport("broker connection lost"))
                } else {
                    Ok(StepOutcome::Idle)
                }
            }
            Err(mpsc::error::TryRecvError::Disconnected) => {
                if self.stopped {
                    Ok(StepOutcome::Idle)
                } else {
                    Err(EngineError::transport("broker connection lost"))
                }
            }
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), EngineError> {
        if !self.reliable {
            return Ok(());
        }
        self.channel()?
            .basic_ack(tag.as_u64(), BasicAckOptions::default())
            .await
            .map_err(|e| amqp_error("ack", &e))
    }

    async fn nack(&mut self, tag: DeliveryTag) -> Result<(), EngineError> {
        if !self.reliable {
            return Ok(());
        }
        self.channel()?
            .basic_nack(
                tag.as_u64(),
                BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                },
            )
            .await
            .map_err(|e| amqp_error("nack", &e))
    }

    async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(channel) = self.channel.as_ref() {
            for tag in &self.consumer_tags {
                if let Err(e) = channel
                    .basic_cancel(tag, BasicCancelOptions::default())
                    .await
                {
                    tracing::warn!(consumer = tag.as_str(), error = %e, "cancel failed");
                }
            }
        }
        self.consumer_tags.clear();
    }

    async fn close(&mut self) {
        self.stopped = true;
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close(200, "shutting down").await {
                tracing::debug!(error = %e, "broker connection close");
            }
        }
        self.channel = None;
        self.deliveries = None;
    }
}
