//! Requests-per-minute limits on backend calls.
//!
//! Each scope (one role, or the whole pipeline) keeps a sliding window of
//! recent request times. A caller over the limit sleeps until the oldest
//! request leaves the window.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Window for `max_rpm` limits.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Scope shared by every role of a pipeline.
pub const PIPELINE_SCOPE: &str = "pipeline";

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(RATE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until `scope` has room for another request, then record it.
    ///
    /// Returns how long the caller waited. A limit of zero is treated as one.
    pub async fn acquire(&self, scope: &str, max_requests: u32) -> Duration {
        let limit = max_requests.max(1) as usize;
        let started = Instant::now();
        loop {
            let wait = {
                let mut requests = self.requests.lock().await;
                let recent = requests.entry(scope.to_string()).or_default();
                let now = Instant::now();
                while recent
                    .front()
                    .is_some_and(|&at| now.duration_since(at) >= self.window)
                {
                    recent.pop_front();
                }
                if recent.len() < limit {
                    recent.push_back(now);
                    return started.elapsed();
                }
                match recent.front() {
                    Some(&oldest) => self.window.saturating_sub(now.duration_since(oldest)),
                    None => Duration::ZERO,
                }
            };
            tracing::debug!(scope, wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests recorded for `scope` within the current window.
    pub async fn in_window(&self, scope: &str) -> usize {
        let requests = self.requests.lock().await;
        let now = Instant::now();
        requests.get(scope).map_or(0, |recent| {
            recent
                .iter()
                .filter(|&&at| now.duration_since(at) < self.window)
                .count()
        })
    }
}
