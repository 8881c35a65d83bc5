//! Fixed-window limits applied before each outbound request.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domain::models::{RateLimitKey, RateLimitRule, RateLimitWindow};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, PartialEq)]
pub enum RateDecision {
    Allowed,
    Denied {
        key: RateLimitKey,
        retry_at: DateTime<Utc>,
    },
}

type Shard = Arc<Mutex<RateLimitWindow>>;

/// One lock per key; the map lock is only held to find or insert a shard.
#[derive(Default)]
pub struct DeliveryRateLimiter {
    windows: RwLock<HashMap<RateLimitKey, Shard>>,
}

impl DeliveryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn shard(&self, rule: &RateLimitRule, now: DateTime<Utc>) -> Shard {
        if let Some(shard) = self.windows.read().await.get(&rule.key) {
            return Arc::clone(shard);
        }

        let mut windows = self.windows.write().await;
        Arc::clone(windows.entry(rule.key.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(RateLimitWindow::open(
                rule.key.clone(),
                now,
                rule.window,
            )))
        }))
    }

    /// Counts one request against `key`. Returns false once `limit` requests
    /// were already counted in the current window.
    pub async fn allow(
        &self,
        key: &RateLimitKey,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let rule = RateLimitRule {
            key: key.clone(),
            limit,
            window,
        };
        matches!(self.try_acquire(&[rule], now).await, RateDecision::Allowed)
    }

    /// Counts one request against every rule, or against none of them.
    ///
    /// Shards are locked in key order so concurrent multi-key checks cannot
    /// deadlock.
    pub async fn try_acquire(&self, rules: &[RateLimitRule], now: DateTime<Utc>) -> RateDecision {
        let mut order: Vec<&RateLimitRule> = rules.iter().collect();
        order.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
        order.dedup_by(|a, b| a.key == b.key);

        let mut locked = Vec::with_capacity(order.len());
        for rule in order {
            let guard = self.shard(rule, now).await.lock_owned().await;
            locked.push((rule, guard));
        }

        let mut consumed = 0;
        let mut denied = None;
        for (rule, window) in locked.iter_mut() {
            if window.try_consume(rule.limit, now, rule.window) {
                consumed += 1;
                continue;
            }
            denied = Some(RateDecision::Denied {
                key: rule.key.clone(),
                retry_at: window.window_end,
            });
            break;
        }

        match denied {
            Some(decision) => {
                for (_, window) in locked.iter_mut().take(consumed) {
                    window.refund(now);
                }
                decision
            }
            None => RateDecision::Allowed,
        }
    }

    /// Drops windows that have ended and are not in use. Returns how many
    /// were removed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.write().await;
        let before = windows.len();
        // With the map write-locked nobody can pick up a new handle, so a
        // count of one means the shard is idle.
        windows.retain(|_, shard| {
            if Arc::strong_count(shard) > 1 {
                return true;
            }
            match shard.try_lock() {
                Ok(window) => !window.is_expired(now),
                Err(_) => true,
            }
        });
        before - windows.len()
    }

    pub async fn window(&self, key: &RateLimitKey) -> Option<RateLimitWindow> {
        let shard = self.windows.read().await.get(key).cloned()?;
        let window = shard.lock().await.clone();
        Some(window)
    }
}
