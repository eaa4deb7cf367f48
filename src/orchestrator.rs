//! The pipeline state machine: wiring, preprocessing, routing, delivery,
//! media lifecycle, and shutdown. (spec §4.13)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{DestinationConfig, DestinationKind, RouteTable};
use crate::envelope::{MediaKind, MessageEnvelope, OriginalHandle, SourceKind};
use crate::formatter::{defang, Formatter, HtmlFormatter, MarkdownFormatter};
use crate::metrics::MetricsCollector;
use crate::ocr::OcrAdapter;
use crate::rate_limiter::RateLimiter;
use crate::retry::{RetryQueue, RetryReason};
use crate::router::Router;
use crate::sender::{chat::ChatSender, webhook::WebhookSender, DestinationSender, Outcome};
use crate::source::chat::restricted_allows;

/// Downloads chat media given the opaque `OriginalHandle`. The concrete
/// chat-library binding (out of core, spec §1/§6) implements this.
#[async_trait::async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, original: &OriginalHandle, tmp_dir: &Path) -> anyhow::Result<Option<DownloadedMedia>>;
}

pub struct DownloadedMedia {
    pub path: String,
    pub filename: Option<String>,
    pub mime: Option<String>,
}

pub struct NullMediaDownloader;

#[async_trait::async_trait]
impl MediaDownloader for NullMediaDownloader {
    async fn download(&self, _original: &OriginalHandle, _tmp_dir: &Path) -> anyhow::Result<Option<DownloadedMedia>> {
        Ok(None)
    }
}

pub struct Orchestrator {
    pub route_table: Arc<RouteTable>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsCollector>,
    pub retry_queue: Arc<RetryQueue>,
    pub ocr: Arc<OcrAdapter>,
    pub webhook_sender: Arc<WebhookSender>,
    pub chat_sender: Arc<ChatSender>,
    pub media_downloader: Arc<dyn MediaDownloader>,
    pub attachments_dir: PathBuf,
}

impl Orchestrator {
    /// Removes stragglers from a previous crash. Called once at startup.
    pub async fn purge_attachments_dir(&self) {
        if let Err(e) = tokio::fs::create_dir_all(&self.attachments_dir).await {
            tracing::warn!(error = %e, "failed to create attachments dir");
            return;
        }
        let mut entries = match tokio::fs::read_dir(&self.attachments_dir).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list attachments dir for startup purge");
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                tracing::warn!(path = %entry.path().display(), error = %e, "failed to purge stale attachment");
            }
        }
    }

    /// Consumes envelopes from `envelope_rx` until the channel closes,
    /// running the full per-envelope pipeline for each.
    pub async fn run(&self, mut envelope_rx: mpsc::Receiver<MessageEnvelope>) {
        while let Some(envelope) = envelope_rx.recv().await {
            self.handle_envelope(envelope).await;
        }
    }

    /// The per-envelope handler. Never propagates an error upward (spec
    /// §7); returns `routed_success` purely for metrics/tests.
    pub async fn handle_envelope(&self, envelope: MessageEnvelope) -> bool {
        match envelope.source_kind {
            SourceKind::Chat => self.metrics.bump_messages_received_chat(),
            SourceKind::Feed => self.metrics.bump_messages_received_feed(),
        }

        let router = Router::new(&self.route_table);
        let mut envelope = envelope;

        // --- Preprocess ---
        let mut downloaded_path: Option<String> = None;
        let mut downloaded_filename: Option<String> = None;
        let mut downloaded_mime: Option<String> = None;

        if envelope.source_kind == SourceKind::Chat {
            if router.needs_ocr(&envelope.channel_id) && envelope.has_media {
                if let Some(dl) = self.ensure_media_downloaded(&envelope, &mut downloaded_path, &mut downloaded_filename, &mut downloaded_mime).await {
                    if self.ocr.available().await {
                        if let Some(text) = self.ocr.extract(&dl).await {
                            self.metrics.bump_ocr_processed();
                            envelope.ocr_text = Some(text);
                        }
                    }
                }
            }
            if let Some(mid) = envelope.original.chat_message_id {
                let handle = envelope.metadata.get("channel_handle").cloned();
                let url = crate::formatter::chat_message_url(&envelope.channel_id, handle.as_deref(), mid);
                envelope.metadata.insert("defanged_source_url".to_string(), defang(&url));
            }
        }

        // --- Route ---
        let matches = router.route(&envelope).await;
        if matches.is_empty() {
            self.metrics.bump_no_destination();
            self.cleanup(&downloaded_path).await;
            return false;
        }

        // --- Media policy ---
        let any_restricted = matches.iter().any(|m| m.channel_rule.map(|r| r.restricted_mode).unwrap_or(false));
        let media_allowed_for_restricted = if any_restricted && envelope.has_media {
            let filename = envelope.metadata.get("attachment_filename").or(downloaded_filename.as_ref());
            let mime = envelope.metadata.get("attachment_mime").or(downloaded_mime.as_ref());
            restricted_allows(envelope.media_kind, filename.map(String::as_str), mime.map(String::as_str))
        } else {
            true
        };

        // --- Ensure media: any matched destination may need to forward it ---
        if envelope.has_media && downloaded_path.is_none() {
            self.ensure_media_downloaded(&envelope, &mut downloaded_path, &mut downloaded_filename, &mut downloaded_mime).await;
        }
        envelope.media_path = downloaded_path.clone();

        // --- Deliver to each matched destination ---
        let mut any_ok = false;
        for m in &matches {
            let dest = self.route_table.destination(m.destination_id);
            let restricted = m.channel_rule.map(|r| r.restricted_mode).unwrap_or(false);
            let media_allowed = !restricted || media_allowed_for_restricted;

            let parsed = match m.channel_rule.and_then(|r| r.parser.as_ref()).or_else(|| m.feed_rule.and_then(|r| r.parser.as_ref())) {
                Some(spec) => spec.apply(&envelope),
                None => envelope.clone(),
            };

            let matched_keywords: Vec<String> = m
                .channel_rule
                .map(|r| r.keywords.clone())
                .or_else(|| m.feed_rule.map(|r| r.keywords.clone()))
                .unwrap_or_default();

            let media_for_send = if media_allowed { downloaded_path.as_deref() } else { None };

            let outcome = match dest.kind {
                DestinationKind::Webhook => {
                    let body = HtmlFormatter { media_allowed }.format(&parsed, m.channel_rule, &matched_keywords);
                    self.dispatch(dest, &body, media_for_send, self.webhook_sender.as_ref()).await
                }
                DestinationKind::Chat => {
                    let body = MarkdownFormatter { media_allowed }.format(&parsed, m.channel_rule, &matched_keywords);
                    self.dispatch(dest, &body, media_for_send, self.chat_sender.as_ref()).await
                }
            };

            match outcome {
                Outcome::Ok => {
                    any_ok = true;
                    match dest.kind {
                        DestinationKind::Webhook => self.metrics.bump_sent_webhook(),
                        DestinationKind::Chat => self.metrics.bump_sent_chat(),
                    }
                }
                Outcome::RateLimited(_) | Outcome::Error(_) => {
                    let reason = match outcome {
                        Outcome::RateLimited(_) => RetryReason::RateLimited,
                        Outcome::Error(e) => RetryReason::SendError(e),
                        Outcome::Ok => unreachable!(),
                    };
                    let body = match dest.kind {
                        DestinationKind::Webhook => HtmlFormatter { media_allowed }.format(&parsed, m.channel_rule, &matched_keywords),
                        DestinationKind::Chat => MarkdownFormatter { media_allowed }.format(&parsed, m.channel_rule, &matched_keywords),
                    };
                    self.retry_queue
                        .enqueue(
                            Arc::new(dest.clone()),
                            body,
                            media_for_send.map(str::to_string),
                            reason,
                        )
                        .await;
                    self.metrics.bump_queued_retry();
                }
            }
        }

        if any_ok {
            self.metrics.bump_routed_success();
        } else {
            self.metrics.bump_routed_failed();
        }

        self.cleanup(&downloaded_path).await;
        any_ok
    }

    async fn dispatch(
        &self,
        dest: &DestinationConfig,
        body: &str,
        media_path: Option<&str>,
        sender: &(impl DestinationSender + Sync),
    ) -> Outcome {
        let key = sender.rate_limit_key(&dest.endpoint);
        self.rate_limiter.reserve(&key).await;
        let outcome = sender.send(&dest.endpoint, body, media_path).await;
        if let Outcome::RateLimited(d) = &outcome {
            self.rate_limiter.register(&key, *d).await;
        }
        outcome
    }

    async fn ensure_media_downloaded(
        &self,
        envelope: &MessageEnvelope,
        path_out: &mut Option<String>,
        filename_out: &mut Option<String>,
        mime_out: &mut Option<String>,
    ) -> Option<String> {
        if let Some(p) = path_out {
            return Some(p.clone());
        }
        match self.media_downloader.download(&envelope.original, &self.attachments_dir).await {
            Ok(Some(media)) => {
                *path_out = Some(media.path.clone());
                *filename_out = media.filename;
                *mime_out = media.mime;
                Some(media.path)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "media download failed, continuing without it");
                None
            }
        }
    }

    async fn cleanup(&self, path: &Option<String>) {
        if let Some(path) = path {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path, error = %e, "cleanup failed");
                }
            }
        }
    }
}

/// Generates an opaque temp filename under `tmp/attachments/`.
pub fn temp_attachment_path(dir: &Path, extension: &str) -> PathBuf {
    dir.join(format!("{}.{extension}", Uuid::new_v4()))
}
