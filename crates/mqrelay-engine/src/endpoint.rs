//! Source and sink contracts.
//!
//! Both endpoint flavors (AMQP broker, on-disk queue directory) sit
//! behind these traits; the controller depends on nothing else. All
//! operations except `start` and `flush` must return promptly: a
//! source with nothing available reports [`StepOutcome::Idle`], and a
//! sink acknowledges durable completion asynchronously through the
//! completion queue rather than blocking `send`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use mqrelay_types::{DeliveryTag, EngineError, Message};

/// Outcome of a single non-blocking receive attempt.
#[derive(Debug)]
pub enum StepOutcome {
    /// One message, with the tag to ack it by.
    Received { message: Message, tag: DeliveryTag },
    /// Nothing available right now; the source is healthy.
    Idle,
    /// The source will never produce again (finite queue directory
    /// without rescan). Broker sources never report this.
    Exhausted,
}

/// Durable-completion notice for a previously submitted send.
#[derive(Debug)]
pub struct Completion {
    /// Window sequence number the send was admitted under.
    pub seq: u64,
    pub outcome: SendOutcome,
}

/// How a send ended.
#[derive(Debug)]
pub enum SendOutcome {
    /// The sink durably accepted the message.
    Confirmed,
    /// The sink rejected or lost the message.
    Failed(EngineError),
}

/// Sender half of the completion queue, handed to sinks at build time.
pub type CompletionSender = mpsc::UnboundedSender<Completion>;

/// Receiver half, polled by the controller.
pub type CompletionReceiver = mpsc::UnboundedReceiver<Completion>;

/// A message producer.
///
/// `stop` halts production but keeps the ack path open: the shutdown
/// sequence drains the in-flight window (which acks) after stopping
/// the source. `close` is the final teardown. Both are idempotent.
#[async_trait]
pub trait Source: Send {
    /// Establish the connection or open the directory.
    async fn start(&mut self) -> Result<(), EngineError>;

    /// Non-blocking attempt to obtain one message.
    async fn step(&mut self) -> Result<StepOutcome, EngineError>;

    /// Confirm successful downstream handling of `tag`.
    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), EngineError>;

    /// Give the message back: requeue on a broker, release the entry
    /// lock on a queue directory.
    async fn nack(&mut self, tag: DeliveryTag) -> Result<(), EngineError>;

    /// Stop producing messages.
    async fn stop(&mut self);

    /// Release all resources.
    async fn close(&mut self);
}

/// A message consumer.
#[async_trait]
pub trait Sink: Send {
    /// Connect or prepare the output directory.
    async fn start(&mut self) -> Result<(), EngineError>;

    /// Submit one message. Durable completion is reported on the
    /// completion queue under `seq`; an `Err` here means the message
    /// never entered the sink at all.
    async fn send(&mut self, seq: u64, message: Message) -> Result<(), EngineError>;

    /// Wait until every outstanding completion has been emitted, or
    /// `budget` elapses.
    async fn flush(&mut self, budget: Duration) -> Result<(), EngineError>;

    /// Release resources; idempotent.
    async fn stop(&mut self);
}

/// Create a completion queue pair.
#[must_use]
pub fn completion_queue() -> (CompletionSender, CompletionReceiver) {
    mpsc::unbounded_channel()
}
