//! Per-destination cooldown table with monotonic deadlines. (spec §4.1)

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Maps a kind-qualified destination key (e.g. `webhook:<url>` or
/// `chat:<id>`) to the instant it becomes reservable again.
///
/// Keys are qualified by kind so that a webhook's `retry_after` and a
/// chat flood-wait are tracked independently even if the raw ids collide.
#[derive(Debug, Default)]
pub struct RateLimiter {
    deadlines: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { deadlines: Mutex::new(HashMap::new()) }
    }

    /// Blocks the caller until `key`'s cooldown has passed, then clears it.
    /// Returns immediately if there is no active cooldown.
    pub async fn reserve(&self, key: &str) {
        let deadline = {
            let mut map = self.deadlines.lock().await;
            match map.get(key).copied() {
                Some(d) if d > Instant::now() => {
                    map.remove(key);
                    Some(d)
                }
                Some(_) => {
                    map.remove(key);
                    None
                }
                None => None,
            }
        };
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if deadline > now {
                tokio::time::sleep(deadline - now).await;
            }
        }
    }

    /// Registers a cooldown of `duration` (rounded up to whole seconds)
    /// starting now.
    pub async fn register(&self, key: &str, duration: Duration) {
        let secs = duration.as_secs() + if duration.subsec_nanos() > 0 { 1 } else { 0 };
        let deadline = Instant::now() + Duration::from_secs(secs);
        self.deadlines.lock().await.insert(key.to_string(), deadline);
    }
}
