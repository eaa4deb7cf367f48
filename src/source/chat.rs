//! Live chat subscription plus periodic gap-recovery polling against a
//! per-channel cursor log. (spec §4.11)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration};

use crate::attachment::AttachmentClassifier;
use crate::envelope::{MediaKind, MessageEnvelope, OriginalHandle, ReplyContext, SourceKind};
use crate::metrics::MetricsCollector;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Everything ChatSource needs from one inbound message, whether it
/// arrived via the live event path or the gap-recovery poll. Built by
/// the concrete chat-library binding (out of core, spec §1/§6).
#[derive(Debug, Clone)]
pub struct ChatMessageMeta {
    pub id: i64,
    pub channel_id: String,
    pub channel_handle: Option<String>,
    pub channel_name: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub has_media: bool,
    pub media_kind: MediaKind,
    pub attachment_filename: Option<String>,
    pub attachment_mime: Option<String>,
    pub file_id: Option<String>,
    pub reply: Option<ChatReplyMeta>,
}

#[derive(Debug, Clone)]
pub struct ChatReplyMeta {
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub media_kind: MediaKind,
    pub has_media: bool,
}

/// The chat-platform binding, kept behind a trait so gap recovery (the
/// part this spec actually covers) is testable without a live session.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    async fn latest_message(&self, channel_id: &str) -> anyhow::Result<Option<ChatMessageMeta>>;
    /// Messages with id strictly greater than `since_id`, ascending.
    async fn history_since(&self, channel_id: &str, since_id: i64) -> anyhow::Result<Vec<ChatMessageMeta>>;
}

fn sanitize_for_filename(id: &str) -> String {
    id.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' }).collect()
}

fn cursor_path(dir: &Path, channel_id: &str) -> PathBuf {
    dir.join(format!("{}.txt", sanitize_for_filename(channel_id)))
}

async fn write_cursor(dir: &Path, channel_id: &str, display_name: &str, last_id: i64) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        tracing::warn!(error = %e, "failed to create chat cursor directory");
        return;
    }
    let path = cursor_path(dir, channel_id);
    let contents = format!("{display_name}\n{last_id}");
    if let Err(e) = tokio::fs::write(&path, contents).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to write chat cursor");
    }
}

async fn read_cursor(dir: &Path, channel_id: &str) -> Option<(String, i64)> {
    let path = cursor_path(dir, channel_id);
    let contents = tokio::fs::read_to_string(&path).await.ok()?;
    let mut lines = contents.lines();
    let display_name = lines.next()?.to_string();
    let last_id: i64 = lines.next()?.parse().ok()?;
    Some((display_name, last_id))
}

async fn clear_cursor(dir: &Path, channel_id: &str) {
    let path = cursor_path(dir, channel_id);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to clear chat cursor");
        }
    }
}

fn classify_media_kind(mime: Option<&str>) -> MediaKind {
    match mime {
        Some(m) if m.starts_with("image/") => MediaKind::Image,
        Some(m) if m.starts_with("video/") || m.starts_with("application/") || m.starts_with("text/") => MediaKind::Document,
        Some(_) => MediaKind::Other,
        None => MediaKind::None,
    }
}

fn build_envelope(msg: &ChatMessageMeta) -> MessageEnvelope {
    let media_kind = if msg.has_media { classify_media_kind(msg.attachment_mime.as_deref()) } else { MediaKind::None };
    let reply_context = msg.reply.as_ref().map(|r| {
        ReplyContext::new(r.author.clone(), r.timestamp, &r.text, r.media_kind, r.has_media)
    });
    let mut metadata = HashMap::new();
    if let Some(filename) = &msg.attachment_filename {
        metadata.insert("attachment_filename".to_string(), filename.clone());
    }
    if let Some(mime) = &msg.attachment_mime {
        metadata.insert("attachment_mime".to_string(), mime.clone());
    }
    if let Some(handle) = &msg.channel_handle {
        metadata.insert("channel_handle".to_string(), handle.clone());
    }
    MessageEnvelope {
        source_kind: SourceKind::Chat,
        channel_id: msg.channel_id.clone(),
        channel_name: msg.channel_name.clone(),
        author: msg.author.clone(),
        timestamp: msg.timestamp,
        text: msg.text.clone(),
        has_media: msg.has_media,
        media_kind,
        media_path: None,
        ocr_enabled: false,
        ocr_text: None,
        reply_context,
        original: OriginalHandle {
            chat_message_id: Some(msg.id),
            chat_id: msg.channel_id.parse().ok(),
            file_id: msg.file_id.clone(),
        },
        metadata,
    }
}

/// Classifies media as deliverable to a restricted destination. Images,
/// videos, and executables are unconditionally non-deliverable there.
pub fn restricted_allows(media_kind: MediaKind, filename: Option<&str>, mime: Option<&str>) -> bool {
    match media_kind {
        MediaKind::None => true,
        MediaKind::Image => false,
        MediaKind::Document | MediaKind::Other => AttachmentClassifier::is_safe(filename, mime),
    }
}

pub struct ChatSource {
    client: Arc<dyn ChatClient>,
    cursor_dir: PathBuf,
    poll_interval: Duration,
}

impl ChatSource {
    pub fn new(client: Arc<dyn ChatClient>, cursor_dir: PathBuf) -> Self {
        Self { client, cursor_dir, poll_interval: POLL_INTERVAL }
    }

    /// Overrides the poll interval; used by tests so gap recovery doesn't
    /// have to wait out the real 5-minute period.
    pub fn with_poll_interval(client: Arc<dyn ChatClient>, cursor_dir: PathBuf, poll_interval: Duration) -> Self {
        Self { client, cursor_dir, poll_interval }
    }

    /// Runs the full lifecycle for one channel: startup proof, then
    /// concurrently the event-forwarding loop and the gap-recovery poll
    /// loop, until `shutdown` fires. `events` is fed by the live
    /// subscription (wired up by the caller, e.g. a teloxide dispatcher).
    pub async fn run_channel(
        &self,
        channel_id: String,
        mut events: mpsc::Receiver<ChatMessageMeta>,
        envelope_tx: mpsc::Sender<MessageEnvelope>,
        metrics: Arc<MetricsCollector>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut cursor = match self.client.latest_message(&channel_id).await {
            Ok(Some(msg)) => {
                tracing::info!(channel = %channel_id, author = %msg.author, timestamp = %msg.timestamp, "connection established");
                write_cursor(&self.cursor_dir, &channel_id, &msg.channel_name, msg.id).await;
                msg.id
            }
            Ok(None) => {
                write_cursor(&self.cursor_dir, &channel_id, &channel_id, 0).await;
                0
            }
            Err(e) => {
                tracing::warn!(channel = %channel_id, error = %e, "startup proof fetch failed");
                0
            }
        };
        let mut channel_name = channel_id.clone();

        let mut poll_ticker = time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        clear_cursor(&self.cursor_dir, &channel_id).await;
                        break;
                    }
                }
                maybe_event = events.recv() => {
                    let Some(msg) = maybe_event else { break };
                    channel_name = msg.channel_name.clone();
                    let envelope = build_envelope(&msg);
                    if envelope_tx.send(envelope).await.is_ok() {
                        cursor = cursor.max(msg.id);
                        write_cursor(&self.cursor_dir, &channel_id, &channel_name, cursor).await;
                    }
                }
                _ = poll_ticker.tick() => {
                    match self.client.history_since(&channel_id, cursor).await {
                        Ok(missed) => {
                            for msg in missed {
                                channel_name = msg.channel_name.clone();
                                let envelope = build_envelope(&msg);
                                if envelope_tx.send(envelope).await.is_ok() {
                                    cursor = cursor.max(msg.id);
                                    metrics.bump_missed_caught();
                                    write_cursor(&self.cursor_dir, &channel_id, &channel_name, cursor).await;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(channel = %channel_id, error = %e, "gap recovery poll failed");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeClient {
        latest: Option<ChatMessageMeta>,
        history: StdMutex<Vec<ChatMessageMeta>>,
    }

    #[async_trait::async_trait]
    impl ChatClient for FakeClient {
        async fn latest_message(&self, _channel_id: &str) -> anyhow::Result<Option<ChatMessageMeta>> {
            Ok(self.latest.clone())
        }
        async fn history_since(&self, _channel_id: &str, since_id: i64) -> anyhow::Result<Vec<ChatMessageMeta>> {
            let mut guard = self.history.lock().unwrap();
            let (ready, pending): (Vec<_>, Vec<_>) = guard.drain(..).partition(|m| m.id > since_id);
            *guard = pending;
            let mut ready = ready;
            ready.sort_by_key(|m| m.id);
            Ok(ready)
        }
    }

    fn msg(id: i64, channel: &str) -> ChatMessageMeta {
        ChatMessageMeta {
            id,
            channel_id: channel.to_string(),
            channel_handle: None,
            channel_name: "Chan".to_string(),
            author: "bob".to_string(),
            timestamp: Utc::now(),
            text: format!("msg {id}"),
            has_media: false,
            media_kind: MediaKind::None,
            attachment_filename: None,
            attachment_mime: None,
            file_id: None,
            reply: None,
        }
    }

    #[test]
    fn restricted_allows_blocks_images_unconditionally() {
        assert!(!restricted_allows(MediaKind::Image, Some("a.png"), Some("image/png")));
        assert!(restricted_allows(MediaKind::None, None, None));
    }

    #[test]
    fn restricted_allows_defers_to_classifier_for_documents() {
        assert!(restricted_allows(MediaKind::Document, Some("a.csv"), Some("text/csv")));
        assert!(!restricted_allows(MediaKind::Document, Some("a.exe"), Some("application/octet-stream")));
    }

    #[tokio::test]
    async fn gap_recovery_emits_missed_messages_in_ascending_id_order() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(FakeClient {
            latest: Some(msg(10, "c1")),
            history: StdMutex::new(vec![msg(14, "c1"), msg(11, "c1"), msg(13, "c1"), msg(12, "c1")]),
        });
        let source = ChatSource::with_poll_interval(client, dir.path().to_path_buf(), Duration::from_millis(20));
        let (_event_tx, event_rx) = mpsc::channel(8);
        let (envelope_tx, mut envelope_rx) = mpsc::channel(8);
        let metrics = Arc::new(MetricsCollector::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            source.run_channel("c1".to_string(), event_rx, envelope_tx, metrics.clone(), shutdown_rx).await
        });

        let mut received = Vec::new();
        for _ in 0..4 {
            let env = time::timeout(Duration::from_secs(2), envelope_rx.recv()).await.unwrap().unwrap();
            received.push(env.text);
        }
        shutdown_tx.send(true).unwrap();
        let _ = handle.await;

        assert_eq!(received, vec!["msg 11", "msg 12", "msg 13", "msg 14"]);
    }

    #[tokio::test]
    async fn event_path_updates_cursor_to_max_seen() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(FakeClient { latest: None, history: StdMutex::new(vec![]) });
        let source = ChatSource::new(client, dir.path().to_path_buf());
        let (event_tx, event_rx) = mpsc::channel(8);
        let (envelope_tx, mut envelope_rx) = mpsc::channel(8);
        let metrics = Arc::new(MetricsCollector::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            source.run_channel("c2".to_string(), event_rx, envelope_tx, metrics, shutdown_rx).await
        });

        event_tx.send(msg(5, "c2")).await.unwrap();
        event_tx.send(msg(7, "c2")).await.unwrap();
        let first = envelope_rx.recv().await.unwrap();
        let second = envelope_rx.recv().await.unwrap();
        assert_eq!(first.text, "msg 5");
        assert_eq!(second.text, "msg 7");

        drop(event_tx);
        shutdown_tx.send(true).unwrap();
        let _ = handle.await;

        let cursor = read_cursor(dir.path(), "c2").await;
        // cleared on shutdown per spec §4.11 step 4
        assert!(cursor.is_none());
    }
}
