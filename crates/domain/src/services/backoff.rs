//! Exponential backoff with jitter for the retry queue.

use chrono::Duration;
use rand::Rng;

/// Never schedule a retry sooner than this.
const MIN_DELAY_MS: i64 = 1_000;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added or subtracted at random, 0.0..=1.0.
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    /// Delay before retry number `retry_count + 1`:
    /// `base * 2^retry_count ± jitter`, capped at `max_delay`.
    pub fn delay_for<R: Rng + ?Sized>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let max_ms = self.max_delay.num_milliseconds().max(MIN_DELAY_MS);
        let exp = retry_count.min(30);
        let delay_ms = self
            .base_delay
            .num_milliseconds()
            .saturating_mul(1i64 << exp)
            .min(max_ms);

        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let jitter_ms = if ratio > 0.0 {
            let spread = delay_ms as f64 * ratio;
            rng.gen_range(-spread..=spread) as i64
        } else {
            0
        };

        Duration::milliseconds((delay_ms + jitter_ms).clamp(MIN_DELAY_MS, max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::seconds(30),
            max_delay: Duration::hours(1),
            jitter_ratio: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_exponential_growth_without_jitter() {
        let policy = RetryPolicy {
            base_delay: Duration::seconds(10),
            max_delay: Duration::seconds(1000),
            jitter_ratio: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(policy.delay_for(0, &mut rng), Duration::seconds(10));
        assert_eq!(policy.delay_for(1, &mut rng), Duration::seconds(20));
        assert_eq!(policy.delay_for(3, &mut rng), Duration::seconds(80));
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::seconds(10),
            max_delay: Duration::seconds(60),
            jitter_ratio: 0.5,
        };
        let mut rng = StdRng::seed_from_u64(42);
        for n in 0..40 {
            assert!(policy.delay_for(n, &mut rng) <= Duration::seconds(60));
        }
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy {
            base_delay: Duration::seconds(100),
            max_delay: Duration::hours(1),
            jitter_ratio: 0.2,
        };
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let d = policy.delay_for(0, &mut rng);
            assert!(d >= Duration::seconds(80) && d <= Duration::seconds(120));
        }
    }

    #[test]
    fn test_delay_is_always_positive() {
        let policy = RetryPolicy {
            base_delay: Duration::milliseconds(1),
            max_delay: Duration::milliseconds(1),
            jitter_ratio: 1.0,
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert!(policy.delay_for(0, &mut rng) >= Duration::seconds(1));
    }
}
