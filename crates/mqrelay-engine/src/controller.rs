//! The pipeline controller.
//!
//! One cooperative step loop owns all four components and the
//! termination decision. Each iteration: evaluate stop conditions,
//! attempt one receive (window permitting), run the transform, hand
//! the message to the sink, poll the completion queue, and drain the
//! window into source acks. The loop body never blocks; the only
//! suspension points are the 10 ms idle yield and the bounded
//! connect/flush calls at the edges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mqrelay_types::{EngineError, ErrorCategory, Message};

use crate::endpoint::{CompletionReceiver, SendOutcome, Sink, Source, StepOutcome};
use crate::pidfile::PidFile;
use crate::result::{RunCounts, RunResult, StopReason};
use crate::transform::{Transform, Verdict};
use crate::window::{CompleteOutcome, Window};

/// Cooperative yield when the source is idle or the window is full.
const IDLE_YIELD: Duration = Duration::from_millis(10);
/// How often the PID file is re-read for the quit sentinel.
const PID_CHECK_INTERVAL: Duration = Duration::from_millis(250);
/// Delay before the single zero-receipt transport retry.
const SOURCE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Engine-level options, already normalized from configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub window: usize,
    pub count: Option<u64>,
    pub duration: Option<Duration>,
    pub timeout_inactivity: Option<Duration>,
    pub timeout_linger: Duration,
    pub lazy: bool,
    pub statistics: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            window: 64,
            count: None,
            duration: None,
            timeout_inactivity: None,
            timeout_linger: Duration::from_secs(10),
            lazy: false,
            statistics: false,
        }
    }
}

/// Owns the components and drives the step loop.
pub struct Controller {
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
    transform: Box<dyn Transform>,
    window: Window,
    completions: CompletionReceiver,
    options: EngineOptions,

    quit: Arc<AtomicBool>,
    pidfile: Option<PidFile>,
    pid_checked_at: Instant,

    counts: RunCounts,
    sink_started: bool,
    source_exhausted: bool,
    source_retried: bool,
    started_at: Instant,
    last_activity: Instant,
}

impl Controller {
    #[must_use]
    pub fn new(
        source: Box<dyn Source>,
        sink: Box<dyn Sink>,
        transform: Box<dyn Transform>,
        completions: CompletionReceiver,
        options: EngineOptions,
    ) -> Self {
        let now = Instant::now();
        Self {
            source,
            sink,
            transform,
            window: Window::new(options.window),
            completions,
            options,
            quit: Arc::new(AtomicBool::new(false)),
            pidfile: None,
            pid_checked_at: now,
            counts: RunCounts::default(),
            sink_started: false,
            source_exhausted: false,
            source_retried: false,
            started_at: now,
            last_activity: now,
        }
    }

    /// Share an externally settable quit flag (signal handlers, tests).
    #[must_use]
    pub fn with_quit_flag(mut self, quit: Arc<AtomicBool>) -> Self {
        self.quit = quit;
        self
    }

    /// Watch a held PID file for the quit sentinel.
    #[must_use]
    pub fn with_pidfile(mut self, pidfile: PidFile) -> Self {
        self.pidfile = Some(pidfile);
        self
    }

    /// Run the pipeline to completion.
    ///
    /// # Errors
    ///
    /// Returns the fatal error after executing the shutdown sequence;
    /// every other stop condition yields an `Ok` result.
    pub async fn run(mut self) -> Result<RunResult, EngineError> {
        if !self.options.lazy {
            self.sink.start().await?;
            self.sink_started = true;
        }
        self.source.start().await?;

        self.started_at = Instant::now();
        self.last_activity = self.started_at;
        tracing::info!(
            window = self.options.window,
            count = self.options.count,
            lazy = self.options.lazy,
            "relay started"
        );

        let reason = self.step_loop().await;
        tracing::info!(%reason, "stopping");
        self.shutdown().await;

        let duration_secs = self.started_at.elapsed().as_secs_f64();
        if self.options.statistics {
            let rate = if duration_secs > 0.0 {
                #[allow(clippy::cast_precision_loss)]
                let acked = self.counts.acked as f64;
                acked / duration_secs
            } else {
                0.0
            };
            tracing::info!(
                received = self.counts.received,
                sent = self.counts.sent,
                dropped = self.counts.dropped,
                acked = self.counts.acked,
                duration_secs,
                rate_per_sec = format!("{rate:.1}").as_str(),
                "run statistics"
            );
        }

        match reason {
            StopReason::Fatal(error) => Err(error),
            reason => Ok(RunResult {
                counts: self.counts,
                stop_reason: reason,
                duration_secs,
            }),
        }
    }

    async fn step_loop(&mut self) -> StopReason {
        loop {
            if let Some(reason) = self.stop_reason() {
                return reason;
            }

            if self.window.is_full() {
                tokio::time::sleep(IDLE_YIELD).await;
            } else {
                match self.source.step().await {
                    Ok(StepOutcome::Received { message, tag }) => {
                        self.last_activity = Instant::now();
                        self.counts.received += 1;
                        let Ok(seq) = self.window.admit(tag) else {
                            // Unreachable with the is_full guard above.
                            return StopReason::Fatal(EngineError::protocol(
                                "window overflow despite capacity check",
                            ));
                        };
                        if let Err(error) = self.process(seq, message).await {
                            return StopReason::Fatal(error);
                        }
                    }
                    Ok(StepOutcome::Idle) => {
                        self.transform.idle();
                        tokio::time::sleep(IDLE_YIELD).await;
                    }
                    Ok(StepOutcome::Exhausted) => {
                        self.source_exhausted = true;
                    }
                    Err(error) => {
                        if let Some(reason) = self.handle_source_error(error).await {
                            return reason;
                        }
                    }
                }
            }

            if let Some(error) = self.poll_completions() {
                return StopReason::Fatal(error);
            }
            if let Err(error) = self.drain_acks().await {
                return StopReason::Fatal(error);
            }
        }
    }

    /// Transform and submit one admitted message.
    async fn process(&mut self, seq: u64, message: Message) -> Result<(), EngineError> {
        match self.transform.check(message) {
            Ok(Verdict::Forward(message)) => {
                if !self.sink_started {
                    self.sink.start().await?;
                    self.sink_started = true;
                }
                self.sink.send(seq, message).await
            }
            Ok(Verdict::Drop(reason)) => {
                tracing::info!(seq, reason, "message dropped by transform");
                self.window.complete(seq, CompleteOutcome::Dropped);
                self.counts.dropped += 1;
                Ok(())
            }
            Err(error) => {
                tracing::warn!(seq, error = %error, "transform failed; dropping message");
                self.window.complete(seq, CompleteOutcome::Dropped);
                self.counts.dropped += 1;
                Ok(())
            }
        }
    }

    /// A transport failure before any receipt gets one restart; every
    /// other source error is fatal or logged per its category.
    async fn handle_source_error(&mut self, error: EngineError) -> Option<StopReason> {
        if error.category == ErrorCategory::Transport
            && self.counts.received == 0
            && !self.source_retried
        {
            self.source_retried = true;
            tracing::warn!(error = %error, "source transport error before first receipt; retrying once");
            tokio::time::sleep(SOURCE_RETRY_DELAY).await;
            self.source.close().await;
            if let Err(restart) = self.source.start().await {
                return Some(StopReason::Fatal(restart));
            }
            return None;
        }
        if error.is_fatal() {
            return Some(StopReason::Fatal(error));
        }
        tracing::warn!(error = %error, "source error");
        None
    }

    /// Non-blocking sweep of the completion queue.
    fn poll_completions(&mut self) -> Option<EngineError> {
        loop {
            match self.completions.try_recv() {
                Ok(completion) => match completion.outcome {
                    SendOutcome::Confirmed => {
                        self.window.complete(completion.seq, CompleteOutcome::Sent);
                        self.counts.sent += 1;
                    }
                    SendOutcome::Failed(error) => {
                        // The entry stays Pending and is never acked,
                        // so the source redelivers it.
                        tracing::error!(seq = completion.seq, error = %error, "send failed");
                        return Some(error);
                    }
                },
                Err(_) => return None,
            }
        }
    }

    /// Ack resolved window entries back to the source, in FIFO order.
    async fn drain_acks(&mut self) -> Result<(), EngineError> {
        for tag in self.window.drain() {
            self.source.ack(tag).await?;
            self.counts.acked += 1;
        }
        Ok(())
    }

    fn stop_reason(&mut self) -> Option<StopReason> {
        if let Some(count) = self.options.count {
            if self.counts.acked >= count {
                return Some(StopReason::CountReached);
            }
        }
        if let Some(duration) = self.options.duration {
            if self.started_at.elapsed() >= duration {
                return Some(StopReason::DurationElapsed);
            }
        }
        if let Some(inactivity) = self.options.timeout_inactivity {
            if self.last_activity.elapsed() >= inactivity {
                return Some(StopReason::InactivityTimeout);
            }
        }
        if self.source_exhausted {
            return Some(StopReason::SourceExhausted);
        }
        if self.quit.load(Ordering::SeqCst) {
            return Some(StopReason::QuitRequested);
        }
        if let Some(pidfile) = &self.pidfile {
            if self.pid_checked_at.elapsed() >= PID_CHECK_INTERVAL {
                self.pid_checked_at = Instant::now();
                if pidfile.quit_requested() {
                    self.quit.store(true, Ordering::SeqCst);
                    return Some(StopReason::QuitRequested);
                }
            }
        }
        None
    }

    /// Shutdown sequence: stop admitting, drain within the linger
    /// budget, flush the sink, tear components down in reverse order.
    /// Entries still pending at the deadline are left unacked; the
    /// source will redeliver them.
    async fn shutdown(&mut self) {
        self.source.stop().await;

        let deadline = Instant::now() + self.options.timeout_linger;
        while !self.window.is_empty() {
            if Instant::now() >= deadline {
                break;
            }
            if self.poll_completions().is_some() {
                // A failed send will never complete; stop waiting.
                break;
            }
            if let Err(error) = self.drain_acks().await {
                tracing::warn!(error = %error, "ack failed during shutdown drain");
                break;
            }
            if self.window.is_empty() {
                break;
            }
            tokio::time::sleep(IDLE_YIELD).await;
        }
        if !self.window.is_empty() {
            tracing::warn!(
                outstanding = self.window.outstanding(),
                "leaving in-flight entries unacked at shutdown"
            );
        }

        if self.sink_started {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Err(error) = self.sink.flush(remaining).await {
                tracing::warn!(error = %error, "sink flush failed during shutdown");
            }
        }

        self.transform.stop();
        self.sink.stop().await;
        self.source.close().await;
    }
}
