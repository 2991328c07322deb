//! The rate-limiter hook and a fixed-window implementation for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: i64,
    /// Seconds the client should wait; set when denied.
    pub retry_after: Option<u64>,
}

/// Deployment-chosen limiter; consulted before every negotiating request.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn before_request(&self, key: &str) -> RateDecision;
}

/// In-memory fixed-window limiter.
pub struct FixedWindowLimiter {
    max_per_window: u32,
    window_ms: i64,
    windows: Mutex<HashMap<String, (i64, u32)>>,
}

impl FixedWindowLimiter {
    pub fn new(max_per_window: u32, window_ms: i64) -> Self {
        Self {
            max_per_window,
            window_ms: window_ms.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn before_request(&self, key: &str) -> RateDecision {
        let now = now_ms();
        let mut windows = match self.windows.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = windows.entry(key.to_string()).or_insert((now, 0));
        if now - entry.0 >= self.window_ms {
            *entry = (now, 0);
        }
        let reset_at = entry.0 + self.window_ms;
        if entry.1 >= self.max_per_window {
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_at,
                retry_after: Some(((reset_at - now).max(0) as u64).div_ceil(1000).max(1)),
            };
        }
        entry.1 += 1;
        RateDecision {
            allowed: true,
            remaining: self.max_per_window - entry.1,
            reset_at,
            retry_after: None,
        }
    }
}
