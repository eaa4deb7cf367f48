//! Wire-protocol delivery per destination kind, with chunking and
//! caption-overflow policy. (spec §4.9)

pub mod chat;
pub mod webhook;

use std::time::Duration;

/// Outcome of a single send attempt. `RateLimited` and `Error` are both
/// handled identically by the caller (enqueue to `RetryQueue`); they are
/// kept distinct because only `RateLimited` also registers a cooldown.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok,
    RateLimited(Duration),
    Error(String),
}

#[async_trait::async_trait]
pub trait DestinationSender {
    async fn send(&self, endpoint: &str, body: &str, media_path: Option<&str>) -> Outcome;

    /// Kind-qualified rate-limiter key for this destination's endpoint.
    fn rate_limit_key(&self, endpoint: &str) -> String;
}
