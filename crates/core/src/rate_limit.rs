//! Fixed-window rate limiting.
//!
//! Used for login attempts (per client IP) and for message frequency (per
//! session). State is in memory only and resets on restart.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One fixed window: attempts counted since `started`.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub count: u32,
    pub started: Instant,
}

impl RateWindow {
    pub fn new(now: Instant) -> Self {
        Self { count: 0, started: now }
    }

    /// Record an attempt. Returns `Err(retry_after)` when it exceeds `max`.
    ///
    /// The window resets once strictly more than `window` has elapsed.
    pub fn hit(&mut self, now: Instant, max: u32, window: Duration) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed > window {
            self.count = 0;
            self.started = now;
        }
        self.count = self.count.saturating_add(1);
        if self.count > max {
            let retry_after = window.saturating_sub(now.saturating_duration_since(self.started));
            Err(retry_after)
        } else {
            Ok(())
        }
    }
}

/// Fixed-window limiter keyed by client.
pub struct RateLimiter<K = String> {
    max_attempts: u32,
    window: Duration,
    windows: Mutex<HashMap<K, RateWindow>>,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count an attempt by `key` at `now`. The error carries the time until
    /// the window resets.
    pub fn check_at(&self, key: &K, now: Instant) -> Result<(), Duration> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        // Periodic cleanup: if map grows too large, evict expired windows
        if windows.len() > 10_000 {
            let window = self.window;
            windows.retain(|_, w| now.saturating_duration_since(w.started) <= window);
        }

        windows
            .entry(key.clone())
            .or_insert_with(|| RateWindow::new(now))
            .hit(now, self.max_attempts, self.window)
    }

    /// Forget a client's attempts.
    pub fn reset(&self, key: &K) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.remove(key);
    }
}
