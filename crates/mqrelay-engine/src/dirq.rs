//! On-disk queue directory endpoints.
//!
//! A queue directory is maildir-shaped: `tmp/` for in-progress writes,
//! `new/` for deliverable entries, `cur/` for entries claimed by a
//! running relay. Writers stage into `tmp/`, fsync, and rename into
//! `new/`; readers claim by renaming `new/` into `cur/`. Renames keep
//! claims atomic, so a crashed run leaves its unacked claims in `cur/`
//! where the next `start()` recovers them.
//!
//! Entries are JSON envelopes with the body base64-encoded.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use mqrelay_types::{DeliveryTag, EngineError, Message};

use crate::endpoint::{Completion, CompletionSender, SendOutcome, Sink, Source, StepOutcome};

const TMP: &str = "tmp";
const NEW: &str = "new";
const CUR: &str = "cur";

/// Serialized form of one queue entry.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_encoding: Option<String>,
    /// Base64-encoded body bytes.
    body: String,
}

impl Envelope {
    fn from_message(message: &Message) -> Self {
        Self {
            headers: message.headers.clone(),
            content_encoding: message.content_encoding.clone(),
            body: BASE64.encode(&message.body),
        }
    }

    fn into_message(self) -> Result<Message, EngineError> {
        let body = BASE64
            .decode(self.body.as_bytes())
            .map_err(|e| EngineError::storage_entry(format!("invalid body encoding: {e}")))?;
        Ok(Message {
            headers: self.headers,
            body,
            content_encoding: self.content_encoding,
        })
    }
}

fn ensure_layout(root: &Path) -> Result<(), EngineError> {
    for sub in [TMP, NEW, CUR] {
        std::fs::create_dir_all(root.join(sub)).map_err(|e| {
            EngineError::storage(format!(
                "cannot create queue directory {}: {e}",
                root.join(sub).display()
            ))
        })?;
    }
    Ok(())
}

/// Fsync a directory so a preceding rename is durable.
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Pull-based source iterating a queue directory.
pub struct DirQueueSource {
    root: PathBuf,
    /// Delete acked entries (`remove`); otherwise acked entries are
    /// released back into `new/`.
    remove: bool,
    /// Rescan from the beginning on exhaustion (`loop`).
    rescan: bool,
    pending: VecDeque<PathBuf>,
    claims: HashMap<u64, PathBuf>,
    next_tag: u64,
    first_scan_done: bool,
    stopped: bool,
}

impl DirQueueSource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, remove: bool, rescan: bool) -> Self {
        Self {
            root: root.into(),
            remove,
            rescan,
            pending: VecDeque::new(),
            claims: HashMap::new(),
            next_tag: 0,
            first_scan_done: false,
            stopped: false,
        }
    }

    /// List deliverable entries, in the order the directory yields them.
    fn scan(&mut self) -> Result<(), EngineError> {
        let new_dir = self.root.join(NEW);
        let entries = std::fs::read_dir(&new_dir).map_err(|e| {
            EngineError::storage(format!("cannot read {}: {e}", new_dir.display()))
        })?;
        for entry in entries {
            match entry {
                Ok(e) => self.pending.push_back(e.path()),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable directory entry"),
            }
        }
        Ok(())
    }

    /// Recover claims left behind by a previous unclean shutdown.
    fn recover_stale_claims(&self) -> Result<(), EngineError> {
        let cur_dir = self.root.join(CUR);
        let entries = std::fs::read_dir(&cur_dir).map_err(|e| {
            EngineError::storage(format!("cannot read {}: {e}", cur_dir.display()))
        })?;
        let mut recovered = 0u64;
        for entry in entries.flatten() {
            let from = entry.path();
            let to = self.root.join(NEW).join(entry.file_name());
            if let Err(e) = std::fs::rename(&from, &to) {
                tracing::warn!(entry = %from.display(), error = %e, "failed to recover stale claim");
            } else {
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, dir = %self.root.display(), "recovered stale queue claims");
        }
        Ok(())
    }

    /// Claim one listed entry and decode it. `None` means the entry was
    /// gone or undecodable and the caller should try the next one.
    fn claim(&mut self, path: &Path) -> Option<(Message, DeliveryTag)> {
        let Some(name) = path.file_name() else {
            return None;
        };
        let claimed = self.root.join(CUR).join(name);
        if let Err(e) = std::fs::rename(path, &claimed) {
            // Entry vanished (claimed elsewhere or removed); not an error.
            tracing::debug!(entry = %path.display(), error = %e, "entry not claimable");
            return None;
        }
        let bytes = match std::fs::read(&claimed) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(entry = %claimed.display(), error = %e, "skipping unreadable entry");
                return None;
            }
        };
        let envelope: Envelope = match serde_json::from_slice(&bytes) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(entry = %claimed.display(), error = %e, "skipping undecodable entry");
                return None;
            }
        };
        let message = match envelope.into_message() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(entry = %claimed.display(), error = %e, "skipping entry");
                return None;
            }
        };
        let tag = DeliveryTag::new(self.next_tag);
        self.next_tag += 1;
        self.claims.insert(tag.as_u64(), claimed);
        Some((message, tag))
    }

    fn release(&mut self, tag: DeliveryTag) {
        let Some(claimed) = self.claims.remove(&tag.as_u64()) else {
            tracing::warn!(%tag, "release for unknown queue entry ignored");
            return;
        };
        let Some(name) = claimed.file_name().map(std::ffi::OsStr::to_os_string) else {
            return;
        };
        let back = self.root.join(NEW).join(name);
        if let Err(e) = std::fs::rename(&claimed, &back) {
            tracing::warn!(entry = %claimed.display(), error = %e, "failed to release entry");
        }
    }
}

#[async_trait]
impl Source for DirQueueSource {
    async fn start(&mut self) -> Result<(), EngineError> {
        ensure_layout(&self.root)?;
        self.recover_stale_claims()?;
        self.scan()?;
        self.first_scan_done = true;
        tracing::info!(
            dir = %self.root.display(),
            entries = self.pending.len(),
            remove = self.remove,
            rescan = self.rescan,
            "queue source opened"
        );
        Ok(())
    }

    async fn step(&mut self) -> Result<StepOutcome, EngineError> {
        if self.stopped {
            return Ok(StepOutcome::Idle);
        }
        loop {
            while let Some(path) = self.pending.pop_front() {
                if let Some((message, tag)) = self.claim(&path) {
                    return Ok(StepOutcome::Received { message, tag });
                }
            }
            if self.first_scan_done && !self.rescan {
                return Ok(StepOutcome::Exhausted);
            }
            self.scan()?;
            if self.pending.is_empty() {
                return Ok(if self.rescan {
                    StepOutcome::Idle
                } else {
                    StepOutcome::Exhausted
                });
            }
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), EngineError> {
        if self.remove {
            let Some(claimed) = self.claims.remove(&tag.as_u64()) else {
                tracing::warn!(%tag, "ack for unknown queue entry ignored");
                return Ok(());
            };
            if let Err(e) = std::fs::remove_file(&claimed) {
                tracing::warn!(entry = %claimed.display(), error = %e, "failed to delete acked entry");
            }
        } else {
            self.release(tag);
        }
        Ok(())
    }

    async fn nack(&mut self, tag: DeliveryTag) -> Result<(), EngineError> {
        self.release(tag);
        Ok(())
    }

    async fn stop(&mut self) {
        self.stopped = true;
        self.pending.clear();
    }

    async fn close(&mut self) {
        // Claims never acked stay in cur/; the next start() recovers
        // them, preserving at-least-once delivery.
        self.stopped = true;
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Sink writing each message as a fsynced queue directory entry.
pub struct DirQueueSink {
    root: PathBuf,
    completions: CompletionSender,
    counter: u64,
}

impl DirQueueSink {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, completions: CompletionSender) -> Self {
        Self {
            root: root.into(),
            completions,
            counter: 0,
        }
    }

    fn entry_name(&mut self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis();
        let name = format!("{millis}-{}-{:08}.msg", std::process::id(), self.counter);
        self.counter += 1;
        name
    }

    fn write_entry(&mut self, message: &Message) -> Result<(), EngineError> {
        let envelope = Envelope::from_message(message);
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| EngineError::storage(format!("cannot encode entry: {e}")))?;

        let name = self.entry_name();
        let staged = self.root.join(TMP).join(&name);
        let published = self.root.join(NEW).join(&name);

        let io = (|| -> std::io::Result<()> {
            use std::io::Write as _;
            let mut file = std::fs::File::create(&staged)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            std::fs::rename(&staged, &published)?;
            sync_dir(&self.root.join(NEW))
        })();
        io.map_err(|e| {
            EngineError::storage(format!("cannot write entry {}: {e}", published.display()))
        })
    }
}

#[async_trait]
impl Sink for DirQueueSink {
    async fn start(&mut self) -> Result<(), EngineError> {
        ensure_layout(&self.root)?;
        tracing::info!(dir = %self.root.display(), "queue sink opened");
        Ok(())
    }

    async fn send(&mut self, seq: u64, message: Message) -> Result<(), EngineError> {
        // The write is synchronous and fsynced, so the completion can
        // be emitted right away.
        self.write_entry(&message)?;
        let _ = self.completions.send(Completion {
            seq,
            outcome: SendOutcome::Confirmed,
        });
        Ok(())
    }

    async fn flush(&mut self, _budget: Duration) -> Result<(), EngineError> {
        // Every send completed before returning; nothing outstanding.
        Ok(())
    }

    async fn stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::completion_queue;

    fn message(n: u8) -> Message {
        Message::new(vec![n; 4]).with_header("n", n.to_string())
    }

    async fn write_messages(root: &Path, count: u8) {
        let (tx, mut rx) = completion_queue();
        let mut sink = DirQueueSink::new(root, tx);
        sink.start().await.unwrap();
        for n in 0..count {
            sink.send(u64::from(n), message(n)).await.unwrap();
            let done = rx.recv().await.unwrap();
            assert_eq!(done.seq, u64::from(n));
            assert!(matches!(done.outcome, SendOutcome::Confirmed));
        }
    }

    #[tokio::test]
    async fn sink_then_source_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        write_messages(dir.path(), 3).await;

        let mut source = DirQueueSource::new(dir.path(), true, false);
        source.start().await.unwrap();
        let mut seen = Vec::new();
        loop {
            match source.step().await.unwrap() {
                StepOutcome::Received { message, tag } => {
                    seen.push(message.header("n").unwrap().to_string());
                    source.ack(tag).await.unwrap();
                }
                StepOutcome::Exhausted => break,
                StepOutcome::Idle => panic!("unexpected idle on finite queue"),
            }
        }
        assert_eq!(seen.len(), 3);
        // remove=true deleted everything
        assert_eq!(std::fs::read_dir(dir.path().join(NEW)).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(dir.path().join(CUR)).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn ack_without_remove_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_messages(dir.path(), 2).await;

        let mut source = DirQueueSource::new(dir.path(), false, false);
        source.start().await.unwrap();
        while let StepOutcome::Received { tag, .. } = source.step().await.unwrap() {
            source.ack(tag).await.unwrap();
        }
        assert_eq!(std::fs::read_dir(dir.path().join(NEW)).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn nack_releases_entry_for_redelivery() {
        let dir = tempfile::tempdir().unwrap();
        write_messages(dir.path(), 1).await;

        let mut source = DirQueueSource::new(dir.path(), true, false);
        source.start().await.unwrap();
        let StepOutcome::Received { tag, .. } = source.step().await.unwrap() else {
            panic!("expected a message");
        };
        source.nack(tag).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path().join(NEW)).unwrap().count(), 1);

        // A fresh pass sees it again.
        let mut source2 = DirQueueSource::new(dir.path(), true, false);
        source2.start().await.unwrap();
        assert!(matches!(
            source2.step().await.unwrap(),
            StepOutcome::Received { .. }
        ));
    }

    #[tokio::test]
    async fn corrupt_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_messages(dir.path(), 1).await;
        std::fs::write(dir.path().join(NEW).join("garbage.msg"), b"not json").unwrap();

        let mut source = DirQueueSource::new(dir.path(), true, false);
        source.start().await.unwrap();
        let mut received = 0;
        loop {
            match source.step().await.unwrap() {
                StepOutcome::Received { tag, .. } => {
                    received += 1;
                    source.ack(tag).await.unwrap();
                }
                StepOutcome::Exhausted => break,
                StepOutcome::Idle => panic!("unexpected idle"),
            }
        }
        assert_eq!(received, 1, "only the valid entry is yielded");
    }

    #[tokio::test]
    async fn stale_claims_recovered_on_start() {
        let dir = tempfile::tempdir().unwrap();
        write_messages(dir.path(), 1).await;

        // Claim but never ack, as a crashed run would.
        let mut crashed = DirQueueSource::new(dir.path(), true, false);
        crashed.start().await.unwrap();
        assert!(matches!(
            crashed.step().await.unwrap(),
            StepOutcome::Received { .. }
        ));
        drop(crashed);
        assert_eq!(std::fs::read_dir(dir.path().join(CUR)).unwrap().count(), 1);

        let mut recovered = DirQueueSource::new(dir.path(), true, false);
        recovered.start().await.unwrap();
        assert!(matches!(
            recovered.step().await.unwrap(),
            StepOutcome::Received { .. }
        ));
    }

    #[tokio::test]
    async fn rescan_yields_idle_on_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = DirQueueSource::new(dir.path(), false, true);
        source.start().await.unwrap();
        assert!(matches!(source.step().await.unwrap(), StepOutcome::Idle));

        // A late-arriving entry is picked up by the next rescan.
        write_messages(dir.path(), 1).await;
        assert!(matches!(
            source.step().await.unwrap(),
            StepOutcome::Received { .. }
        ));
    }

    #[test]
    fn envelope_roundtrip() {
        let mut msg = Message::new(vec![0, 159, 146, 150]).with_header("k", "v");
        msg.content_encoding = Some("binary".into());
        let env = Envelope::from_message(&msg);
        let back = env.into_message().unwrap();
        assert_eq!(back, msg);
    }
}
