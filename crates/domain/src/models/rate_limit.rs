//! Fixed-window rate limiting.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Identifies the subject a limit applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn endpoint(url: &str) -> Self {
        Self(format!("endpoint:{url}"))
    }

    pub fn form(form_id: Uuid) -> Self {
        Self(format!("form:{form_id}"))
    }

    pub fn source(source: &str) -> Self {
        Self(format!("source:{source}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A limit of `limit` requests per `window` for `key`.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitRule {
    pub key: RateLimitKey,
    pub limit: u32,
    pub window: Duration,
}

/// Counter for one key within one aligned window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitWindow {
    pub key: RateLimitKey,
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl RateLimitWindow {
    /// Opens the window containing `now`. Windows are aligned to the epoch.
    pub fn open(key: RateLimitKey, now: DateTime<Utc>, window: Duration) -> Self {
        let (window_start, window_end) = aligned_window(now, window);
        Self {
            key,
            count: 0,
            window_start,
            window_end,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_end
    }

    /// Whether one more request fits, rolling over first if the window passed.
    pub fn has_capacity(&mut self, limit: u32, now: DateTime<Utc>, window: Duration) -> bool {
        self.roll(now, window);
        self.count < limit
    }

    /// Counts one request. Returns false when the limit is already reached.
    pub fn try_consume(&mut self, limit: u32, now: DateTime<Utc>, window: Duration) -> bool {
        if !self.has_capacity(limit, now, window) {
            return false;
        }
        self.count += 1;
        true
    }

    /// Returns one unit consumed in the current window.
    pub fn refund(&mut self, now: DateTime<Utc>) {
        if !self.is_expired(now) && self.count > 0 {
            self.count -= 1;
        }
    }

    fn roll(&mut self, now: DateTime<Utc>, window: Duration) {
        if self.is_expired(now) {
            let (start, end) = aligned_window(now, window);
            self.window_start = start;
            self.window_end = end;
            self.count = 0;
        }
    }
}

/// Bounds of the epoch-aligned window of `window` length containing `now`.
pub fn aligned_window(now: DateTime<Utc>, window: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
    let len = window.num_milliseconds().max(1);
    let ts = now.timestamp_millis();
    let start_ms = ts - ts.rem_euclid(len);
    let start = Utc
        .timestamp_millis_opt(start_ms)
        .single()
        .unwrap_or(now);
    (start, start + Duration::milliseconds(len))
}
