//! Interval polling of one feed URL with age-bounded dedup. (spec §4.12)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use feed_rs::model::Feed;
use reqwest::Client;
use sha1::{Digest, Sha1};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration};

use crate::envelope::{MediaKind, MessageEnvelope, OriginalHandle, SourceKind};
use crate::metrics::MetricsCollector;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MAX_AGE: ChronoDuration = ChronoDuration::days(2);
const SUMMARY_CAP: usize = 1000;

fn sanitize_for_filename(s: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn cursor_path(dir: &Path, feed_name: &str) -> PathBuf {
    dir.join(format!("{}.txt", sanitize_for_filename(feed_name)))
}

/// Feed cursors are persistent across restarts (spec §3), unlike chat
/// cursors.
async fn read_cursor(dir: &Path, feed_url: &str) -> Option<DateTime<Utc>> {
    let contents = tokio::fs::read_to_string(cursor_path(dir, feed_url)).await.ok()?;
    DateTime::parse_from_rfc3339(contents.trim()).ok().map(|d| d.with_timezone(&Utc))
}

async fn write_cursor(dir: &Path, feed_url: &str, ts: DateTime<Utc>) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        tracing::warn!(error = %e, "failed to create feed cursor directory");
        return;
    }
    let path = cursor_path(dir, feed_url);
    if let Err(e) = tokio::fs::write(&path, ts.to_rfc3339()).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to write feed cursor");
    }
}

fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, cap: usize) -> String {
    if s.chars().count() <= cap {
        s.to_string()
    } else {
        s.chars().take(cap).collect()
    }
}

fn entry_timestamp(entry: &feed_rs::model::Entry) -> Option<DateTime<Utc>> {
    entry.updated.or(entry.published)
}

fn entry_title(entry: &feed_rs::model::Entry) -> String {
    entry.title.as_ref().map(|t| t.content.clone()).unwrap_or_else(|| "[no title]".to_string())
}

fn entry_link(entry: &feed_rs::model::Entry) -> String {
    entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
        .or_else(|| entry.links.first())
        .map(|l| l.href.clone())
        .unwrap_or_default()
}

fn entry_summary(entry: &feed_rs::model::Entry) -> String {
    let raw = entry.summary.as_ref().map(|s| s.content.as_str()).unwrap_or("");
    truncate_chars(&strip_html(raw), SUMMARY_CAP)
}

async fn fetch_feed(client: &Client, url: &str) -> anyhow::Result<Feed> {
    let bytes = client.get(url).send().await?.bytes().await?;
    let feed = feed_rs::parser::parse(std::io::Cursor::new(bytes))?;
    Ok(feed)
}

pub struct FeedSource {
    client: Client,
    cursor_dir: PathBuf,
    poll_interval: Duration,
}

impl FeedSource {
    pub fn new(client: Client, cursor_dir: PathBuf) -> Self {
        Self { client, cursor_dir, poll_interval: POLL_INTERVAL }
    }

    /// Overrides the poll interval; used by tests so polling doesn't have
    /// to wait out the real 5-minute period.
    pub fn with_poll_interval(client: Client, cursor_dir: PathBuf, poll_interval: Duration) -> Self {
        Self { client, cursor_dir, poll_interval }
    }

    /// Runs one poller for a single (already-deduplicated) feed URL
    /// until `shutdown` fires.
    pub async fn run_feed(
        &self,
        feed_url: String,
        display_name: String,
        envelope_tx: mpsc::Sender<MessageEnvelope>,
        _metrics: Arc<MetricsCollector>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut last_seen = match read_cursor(&self.cursor_dir, &feed_url).await {
            Some(ts) => ts,
            None => {
                // First run: anchor at now and emit nothing this cycle.
                let now = Utc::now();
                write_cursor(&self.cursor_dir, &feed_url, now).await;
                now
            }
        };

        let mut ticker = time::interval(self.poll_interval);
        // Consume the immediate first tick so the loop polls right away,
        // matching "run once immediately" (teacher's run_once pattern).
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match fetch_feed(&self.client, &feed_url).await {
                        Ok(feed) => {
                            let cutoff = Utc::now() - MAX_AGE;
                            let mut fresh: Vec<_> = feed
                                .entries
                                .iter()
                                .filter_map(|e| entry_timestamp(e).map(|ts| (ts, e)))
                                .filter(|(ts, _)| *ts >= cutoff && *ts > last_seen)
                                .collect();
                            fresh.sort_by_key(|(ts, _)| *ts);

                            for (ts, entry) in &fresh {
                                let text = format!("{}\n{}\n{}", entry_title(entry), entry_link(entry), entry_summary(entry));
                                let envelope = MessageEnvelope {
                                    source_kind: SourceKind::Feed,
                                    channel_id: feed_url.clone(),
                                    channel_name: display_name.clone(),
                                    author: display_name.clone(),
                                    timestamp: *ts,
                                    text,
                                    has_media: false,
                                    media_kind: MediaKind::None,
                                    media_path: None,
                                    ocr_enabled: false,
                                    ocr_text: None,
                                    reply_context: None,
                                    original: OriginalHandle::default(),
                                    metadata: HashMap::new(),
                                };
                                let _ = envelope_tx.send(envelope).await;
                            }

                            if let Some((max_ts, _)) = fresh.last() {
                                last_seen = *max_ts;
                                write_cursor(&self.cursor_dir, &feed_url, last_seen).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(feed = %feed_url, error = %e, "feed fetch/parse failed, skipping this cycle");
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

    #[test]
    fn strip_html_removes_tags_and_collapses_whitespace() {
        assert_eq!(strip_html("<p>hello   <b>world</b></p>"), "hello world");
    }

    #[test]
    fn summary_truncation_cap_is_1000_chars() {
        let long = "x".repeat(2000);
        assert_eq!(truncate_chars(&strip_html(&long), SUMMARY_CAP).chars().count(), 1000);
    }

    #[tokio::test]
    async fn first_run_anchors_cursor_and_writes_no_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let before = read_cursor(dir.path(), "https://feed.example/x").await;
        assert!(before.is_none());
        write_cursor(dir.path(), "https://feed.example/x", Utc::now()).await;
        let after = read_cursor(dir.path(), "https://feed.example/x").await;
        assert!(after.is_some());
    }

    #[test]
    fn cursor_round_trip_preserves_value() {
        let ts = Utc::now();
        let rfc = ts.to_rfc3339();
        let parsed = DateTime::parse_from_rfc3339(&rfc).unwrap().with_timezone(&Utc);
        assert_eq!(ts.timestamp_millis(), parsed.timestamp_millis());
    }
}
