//! In-memory session counters with periodic snapshot. (spec: MetricsCollector)

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Race-free counters updated from many tasks (spec §5 shared-resource
/// policy). Each counter is a standalone atomic; the snapshot taken for
/// `tmp/metrics.json` is therefore not a single atomic point-in-time
/// read across all counters, which is acceptable per spec (best-effort,
/// "not required for correctness").
#[derive(Default)]
pub struct MetricsCollector {
    messages_received_chat: AtomicU64,
    messages_received_feed: AtomicU64,
    ocr_processed: AtomicU64,
    no_destination: AtomicU64,
    queued_retry: AtomicU64,
    routed_success: AtomicU64,
    routed_failed: AtomicU64,
    sent_webhook: AtomicU64,
    sent_chat: AtomicU64,
    permanent_failure: AtomicU64,
    missed_caught: AtomicU64,
}

/// JSON-serializable point-in-time snapshot.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub messages_received_chat: u64,
    pub messages_received_feed: u64,
    pub ocr_processed: u64,
    pub no_destination: u64,
    pub queued_retry: u64,
    pub routed_success: u64,
    pub routed_failed: u64,
    pub sent_webhook: u64,
    pub sent_chat: u64,
    pub permanent_failure: u64,
    pub missed_caught: u64,
}

macro_rules! bump {
    ($name:ident, $field:ident) => {
        pub fn $name(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    bump!(bump_messages_received_chat, messages_received_chat);
    bump!(bump_messages_received_feed, messages_received_feed);
    bump!(bump_ocr_processed, ocr_processed);
    bump!(bump_no_destination, no_destination);
    bump!(bump_queued_retry, queued_retry);
    bump!(bump_routed_success, routed_success);
    bump!(bump_routed_failed, routed_failed);
    bump!(bump_sent_webhook, sent_webhook);
    bump!(bump_sent_chat, sent_chat);
    bump!(bump_permanent_failure, permanent_failure);
    bump!(bump_missed_caught, missed_caught);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received_chat: self.messages_received_chat.load(Ordering::Relaxed),
            messages_received_feed: self.messages_received_feed.load(Ordering::Relaxed),
            ocr_processed: self.ocr_processed.load(Ordering::Relaxed),
            no_destination: self.no_destination.load(Ordering::Relaxed),
            queued_retry: self.queued_retry.load(Ordering::Relaxed),
            routed_success: self.routed_success.load(Ordering::Relaxed),
            routed_failed: self.routed_failed.load(Ordering::Relaxed),
            sent_webhook: self.sent_webhook.load(Ordering::Relaxed),
            sent_chat: self.sent_chat.load(Ordering::Relaxed),
            permanent_failure: self.permanent_failure.load(Ordering::Relaxed),
            missed_caught: self.missed_caught.load(Ordering::Relaxed),
        }
    }

    /// Best-effort write to `tmp/metrics.json`; failures are logged and
    /// swallowed, matching `CleanupFailure`-style non-fatal handling.
    pub async fn write_snapshot(&self, path: &Path) {
        let snapshot = self.snapshot();
        let json = match serde_json::to_vec_pretty(&snapshot) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize metrics snapshot");
                return;
            }
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(error = %e, "failed to create metrics directory");
                return;
            }
        }
        if let Err(e) = tokio::fs::write(path, json).await {
            tracing::warn!(error = %e, "failed to write metrics snapshot");
        }
    }
}
