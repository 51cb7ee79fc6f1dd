//! Sliding window of in-flight messages.
//!
//! The window bounds memory and sequences acks: entries enter in
//! receipt order, are resolved out of order as sink completions and
//! drops arrive, and leave strictly from the head so acks reach the
//! source in FIFO order. That ordering is required for brokers with
//! cumulative-ack semantics and harmless for directory sources.

use std::collections::VecDeque;

use mqrelay_types::DeliveryTag;

/// Resolution state of an in-flight entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Submitted to the sink (or transform), outcome unknown.
    Pending,
    /// Durably accepted by the sink.
    Sent,
    /// Dropped by the transform (or a transform error).
    Dropped,
}

/// Final outcome reported through [`Window::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    Sent,
    Dropped,
}

/// One in-flight message.
#[derive(Debug, Clone)]
struct InFlight {
    seq: u64,
    tag: DeliveryTag,
    state: EntryState,
}

/// The window is full; the caller must drain before admitting more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("in-flight window is full")]
pub struct WindowFull;

/// Bounded FIFO of in-flight entries.
#[derive(Debug)]
pub struct Window {
    entries: VecDeque<InFlight>,
    next_seq: u64,
    capacity: usize,
}

impl Window {
    /// Create a window admitting at most `capacity` unresolved entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            next_seq: 0,
            capacity,
        }
    }

    /// Append a new `Pending` entry, returning its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`WindowFull`] when `outstanding() == capacity`.
    pub fn admit(&mut self, tag: DeliveryTag) -> Result<u64, WindowFull> {
        if self.entries.len() >= self.capacity {
            return Err(WindowFull);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(InFlight {
            seq,
            tag,
            state: EntryState::Pending,
        });
        Ok(seq)
    }

    /// Resolve the entry admitted under `seq`.
    ///
    /// Unknown or already-resolved sequence numbers are ignored with a
    /// warning: late sink completions can race a drain during shutdown.
    pub fn complete(&mut self, seq: u64, outcome: CompleteOutcome) {
        let Some(entry) = self.entries.iter_mut().find(|e| e.seq == seq) else {
            tracing::warn!(seq, "completion for unknown in-flight entry ignored");
            return;
        };
        if entry.state != EntryState::Pending {
            tracing::warn!(seq, state = ?entry.state, "duplicate completion ignored");
            return;
        }
        entry.state = match outcome {
            CompleteOutcome::Sent => EntryState::Sent,
            CompleteOutcome::Dropped => EntryState::Dropped,
        };
    }

    /// Pop resolved entries from the head, returning their tags in
    /// receipt order. Stops at the first still-Pending entry.
    pub fn drain(&mut self) -> Vec<DeliveryTag> {
        let mut tags = Vec::new();
        while let Some(head) = self.entries.front() {
            if head.state == EntryState::Pending {
                break;
            }
            let entry = self.entries.pop_front().expect("head checked above");
            tags.push(entry.tag);
        }
        tags
    }

    /// Number of unresolved-or-undrained entries currently held.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
}
