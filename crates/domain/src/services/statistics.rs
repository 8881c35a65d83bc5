//! Response-time statistics shared by health evaluation and analytics.

use serde::{Deserialize, Serialize};

/// Nearest-rank percentile over an ascending slice. `p` is in 0..=100.
pub fn percentile(sorted: &[i64], p: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeStats {
    pub min_ms: i64,
    pub max_ms: i64,
    pub avg_ms: f64,
    pub p95_ms: i64,
}

impl ResponseTimeStats {
    pub fn from_samples(samples: &[i64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let sum: i64 = sorted.iter().sum();
        Self {
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            avg_ms: sum as f64 / sorted.len() as f64,
            p95_ms: percentile(&sorted, 95.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_nearest_rank() {
        let v: Vec<i64> = (1..=100).collect();
        assert_eq!(percentile(&v, 95.0), 95);
        assert_eq!(percentile(&v, 100.0), 100);
        assert_eq!(percentile(&v, 0.0), 1);
        assert_eq!(percentile(&[42], 95.0), 42);
        assert_eq!(percentile(&[], 95.0), 0);
    }

    #[test]
    fn test_stats_from_samples() {
        let s = ResponseTimeStats::from_samples(&[300, 100, 200]);
        assert_eq!(s.min_ms, 100);
        assert_eq!(s.max_ms, 300);
        assert_eq!(s.avg_ms, 200.0);
        assert_eq!(s.p95_ms, 300);
    }
}
