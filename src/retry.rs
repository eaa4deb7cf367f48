//! Bounded-attempt backoff queue mediating delivery failures. (spec §4.10)

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::{DestinationConfig, DestinationKind};
use crate::metrics::MetricsCollector;
use crate::rate_limiter::RateLimiter;
use crate::sender::{chat::ChatSender, webhook::WebhookSender, DestinationSender, Outcome};

pub const MAX_ATTEMPTS: u32 = 3;
pub const INITIAL_DELAY_SECS: u64 = 5;

/// Why an item was enqueued; logged, not otherwise acted on.
#[derive(Debug, Clone)]
pub enum RetryReason {
    RateLimited,
    SendError(String),
}

pub struct RetryItem {
    pub destination: Arc<DestinationConfig>,
    pub wire_payload: String,
    pub media_path: Option<String>,
    pub attempt: u32,
    pub next_ready_at: Instant,
    pub reason: RetryReason,
}

/// Single-writer-conceptual queue: many producers enqueue concurrently
/// (must be race-free, guarded by the mutex); one background loop ticks
/// and snapshots the queue at tick start so iteration is safe against
/// concurrent enqueue.
pub struct RetryQueue {
    items: Mutex<Vec<RetryItem>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self { items: Mutex::new(Vec::new()) }
    }

    pub async fn enqueue(
        &self,
        destination: Arc<DestinationConfig>,
        wire_payload: String,
        media_path: Option<String>,
        reason: RetryReason,
    ) {
        let item = RetryItem {
            destination,
            wire_payload,
            media_path,
            attempt: 1,
            next_ready_at: Instant::now() + Duration::from_secs(INITIAL_DELAY_SECS),
            reason,
        };
        self.items.lock().await.push(item);
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Runs the background tick loop until `shutdown` resolves. Tick
    /// granularity is 2 seconds (spec §9 open question: this
    /// implementation picks 2s over the conflicting "1s" prose).
    pub async fn run(
        self: Arc<Self>,
        webhook_sender: Arc<WebhookSender>,
        chat_sender: Arc<ChatSender>,
        rate_limiter: Arc<RateLimiter>,
        metrics: Arc<MetricsCollector>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick(&webhook_sender, &chat_sender, &rate_limiter, &metrics).await;
                }
            }
        }
    }

    async fn tick(
        &self,
        webhook_sender: &WebhookSender,
        chat_sender: &ChatSender,
        rate_limiter: &RateLimiter,
        metrics: &MetricsCollector,
    ) {
        let now = Instant::now();
        let mut snapshot = {
            let mut guard = self.items.lock().await;
            std::mem::take(&mut *guard)
        };

        let mut keep = Vec::with_capacity(snapshot.len());
        for mut item in snapshot.drain(..) {
            if item.next_ready_at > now {
                keep.push(item);
                continue;
            }
            if item.attempt > MAX_ATTEMPTS {
                tracing::warn!(destination = %item.destination.name, attempt = item.attempt, "dropping message after exhausting retries");
                metrics.bump_permanent_failure();
                continue;
            }

            let key = match item.destination.kind {
                DestinationKind::Webhook => webhook_sender.rate_limit_key(&item.destination.endpoint),
                DestinationKind::Chat => chat_sender.rate_limit_key(&item.destination.endpoint),
            };
            rate_limiter.reserve(&key).await;

            let outcome = match item.destination.kind {
                DestinationKind::Webhook => {
                    webhook_sender
                        .send(&item.destination.endpoint, &item.wire_payload, item.media_path.as_deref())
                        .await
                }
                DestinationKind::Chat => {
                    chat_sender
                        .send(&item.destination.endpoint, &item.wire_payload, item.media_path.as_deref())
                        .await
                }
            };

            match outcome {
                Outcome::Ok => {
                    tracing::info!(destination = %item.destination.name, attempt = item.attempt, "retry delivered");
                }
                Outcome::RateLimited(d) => {
                    rate_limiter.register(&key, d).await;
                    item.next_ready_at = Instant::now() + backoff_delay(item.attempt);
                    item.attempt += 1;
                    keep.push(item);
                }
                Outcome::Error(e) => {
                    tracing::warn!(destination = %item.destination.name, attempt = item.attempt, error = %e, "retry attempt failed");
                    item.next_ready_at = Instant::now() + backoff_delay(item.attempt);
                    item.attempt += 1;
                    keep.push(item);
                }
            }
        }

        let mut guard = self.items.lock().await;
        guard.extend(keep);
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// `5 * 2^(attempt-1)` seconds: 5, 10, 20 for attempts 1, 2, 3.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(INITIAL_DELAY_SECS * 2u64.pow(attempt.saturating_sub(1)))
}
