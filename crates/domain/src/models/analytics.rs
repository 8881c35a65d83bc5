//! Aggregated delivery analytics.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::delivery::{DeliveryAttempt, DeliveryOutcome};
use crate::services::statistics::ResponseTimeStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hourly,
    Daily,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
        }
    }

    /// The period of this granularity containing `ts`.
    pub fn period_containing(&self, ts: DateTime<Utc>) -> Period {
        let date = ts.date_naive();
        match self {
            Self::Hourly => Period::hour(date, ts.hour()),
            Self::Daily => Period::day(date),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            other => Err(format!("unknown granularity: {other}")),
        }
    }
}

/// A closed-open UTC interval that one bucket covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Period {
    pub date: NaiveDate,
    /// Set for hourly periods.
    pub hour: Option<u32>,
}

impl Period {
    pub fn day(date: NaiveDate) -> Self {
        Self { date, hour: None }
    }

    pub fn hour(date: NaiveDate, hour: u32) -> Self {
        Self {
            date,
            hour: Some(hour.min(23)),
        }
    }

    pub fn granularity(&self) -> Granularity {
        if self.hour.is_some() {
            Granularity::Hourly
        } else {
            Granularity::Daily
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        let midnight = Utc.from_utc_datetime(&self.date.and_time(chrono::NaiveTime::MIN));
        midnight + Duration::hours(i64::from(self.hour.unwrap_or(0)))
    }

    pub fn end(&self) -> DateTime<Utc> {
        match self.hour {
            Some(_) => self.start() + Duration::hours(1),
            None => self.start() + Duration::days(1),
        }
    }

    pub fn previous(&self) -> Self {
        match self.hour {
            Some(_) => self.granularity().period_containing(self.start() - Duration::hours(1)),
            None => Self::day(self.date - Duration::days(1)),
        }
    }

    pub fn next(&self) -> Self {
        self.granularity().period_containing(self.end())
    }
}

/// Identity of an analytics bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub form_id: Uuid,
    pub endpoint_id: Uuid,
    pub period: Period,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsBucket {
    pub form_id: Uuid,
    pub endpoint_id: Uuid,
    pub date: NaiveDate,
    pub hour: Option<i16>,
    pub granularity: Granularity,
    pub total_count: i64,
    pub success_count: i64,
    /// Physical failures (retryable and terminal).
    pub failure_count: i64,
    /// Circuit-open and rate-limited rows.
    pub short_circuited_count: i64,
    pub min_response_ms: i64,
    pub max_response_ms: i64,
    pub avg_response_ms: f64,
    pub p95_response_ms: i64,
}

impl AnalyticsBucket {
    /// Builds a bucket from every log row of the period. Deterministic, so
    /// re-running over the same rows yields the same bucket.
    pub fn from_attempts(key: BucketKey, attempts: &[DeliveryAttempt]) -> Self {
        let mut success = 0i64;
        let mut failure = 0i64;
        let mut short_circuited = 0i64;
        let mut times = Vec::with_capacity(attempts.len());
        for a in attempts {
            if !a.outcome.is_physical() {
                short_circuited += 1;
                continue;
            }
            if a.success {
                success += 1;
            } else {
                failure += 1;
            }
            times.push(a.response_time_ms);
        }
        let stats = ResponseTimeStats::from_samples(&times);
        Self {
            form_id: key.form_id,
            endpoint_id: key.endpoint_id,
            date: key.period.date,
            hour: key.period.hour.map(|h| h as i16),
            granularity: key.period.granularity(),
            total_count: success + failure + short_circuited,
            success_count: success,
            failure_count: failure,
            short_circuited_count: short_circuited,
            min_response_ms: stats.min_ms,
            max_response_ms: stats.max_ms,
            avg_response_ms: stats.avg_ms,
            p95_response_ms: stats.p95_ms,
        }
    }

    pub fn key(&self) -> BucketKey {
        BucketKey {
            form_id: self.form_id,
            endpoint_id: self.endpoint_id,
            period: Period {
                date: self.date,
                hour: self.hour.map(|h| h as u32),
            },
        }
    }
}

/// Live counters for a form's dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeStats {
    pub form_id: Uuid,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    /// Percentage, 0.0..=100.0.
    pub success_rate: f64,
    pub last_request_at: Option<DateTime<Utc>>,
    /// Pending and processing retries.
    pub queue_size: i64,
    pub timestamp: DateTime<Utc>,
}

/// Error messages listed in a breakdown.
pub const TOP_ERRORS: usize = 10;

/// Coarse failure cause shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Dns,
    Tls,
    Connection,
    Authentication,
    Authorization,
    NotFound,
    RateLimit,
    ClientError,
    ServerError,
    BadGateway,
    ServiceUnavailable,
    /// Short-circuited by an open breaker.
    CircuitOpen,
    /// Held back by a local rate limit.
    Throttled,
    Unknown,
}

impl ErrorCategory {
    /// Categorizes a failed attempt by its status code, or by its error
    /// message when no response arrived.
    pub fn classify(
        outcome: DeliveryOutcome,
        status_code: Option<i32>,
        error_message: Option<&str>,
    ) -> Self {
        match outcome {
            DeliveryOutcome::CircuitOpen => return Self::CircuitOpen,
            DeliveryOutcome::RateLimited => return Self::Throttled,
            _ => {}
        }

        if let Some(code) = status_code {
            return match code {
                401 => Self::Authentication,
                403 => Self::Authorization,
                404 => Self::NotFound,
                429 => Self::RateLimit,
                502 => Self::BadGateway,
                503 => Self::ServiceUnavailable,
                500..=599 => Self::ServerError,
                400..=499 => Self::ClientError,
                _ => Self::Unknown,
            };
        }

        let message = error_message.unwrap_or_default().to_ascii_lowercase();
        // DNS and TLS failures surface as connect errors; test them first.
        if message.contains("timed out") || message.contains("timeout") {
            Self::Timeout
        } else if message.contains("dns") || message.contains("resolve") {
            Self::Dns
        } else if message.contains("tls") || message.contains("certificate") {
            Self::Tls
        } else if message.contains("connect") || message.contains("network") {
            Self::Connection
        } else {
            Self::Unknown
        }
    }
}

/// Log rows sharing outcome, status code and error message.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptGroup {
    pub outcome: DeliveryOutcome,
    pub status_code: Option<i32>,
    pub error_message: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorStat {
    pub error: String,
    pub count: i64,
    /// Share of all failed attempts, 0.0..=100.0.
    pub percentage: f64,
}

/// Failure mix of a form's deliveries over `[from, to)`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBreakdown {
    pub form_id: Uuid,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_attempts: i64,
    pub failed_attempts: i64,
    pub categories: BTreeMap<ErrorCategory, i64>,
    /// Every received status code, successes included.
    pub response_codes: BTreeMap<i32, i64>,
    pub top_errors: Vec<ErrorStat>,
}

impl ErrorBreakdown {
    pub fn from_groups(
        form_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        groups: &[AttemptGroup],
    ) -> Self {
        let mut total_attempts = 0;
        let mut failed_attempts = 0;
        let mut categories = BTreeMap::new();
        let mut response_codes = BTreeMap::new();
        let mut by_message: HashMap<&str, i64> = HashMap::new();

        for group in groups {
            total_attempts += group.count;
            if let Some(code) = group.status_code {
                *response_codes.entry(code).or_insert(0) += group.count;
            }
            if group.outcome == DeliveryOutcome::Success {
                continue;
            }
            failed_attempts += group.count;
            let category = ErrorCategory::classify(
                group.outcome,
                group.status_code,
                group.error_message.as_deref(),
            );
            *categories.entry(category).or_insert(0) += group.count;
            if let Some(message) = group.error_message.as_deref() {
                *by_message.entry(message).or_insert(0) += group.count;
            }
        }

        let mut top: Vec<(&str, i64)> = by_message.into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let top_errors = top
            .into_iter()
            .take(TOP_ERRORS)
            .map(|(error, count)| ErrorStat {
                error: error.to_string(),
                count,
                percentage: count as f64 / failed_attempts as f64 * 100.0,
            })
            .collect();

        Self {
            form_id,
            from,
            to,
            total_attempts,
            failed_attempts,
            categories,
            response_codes,
            top_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(outcome: DeliveryOutcome, ms: i64) -> DeliveryAttempt {
        DeliveryAttempt {
            id: Uuid::new_v4(),
            delivery_id: 1,
            endpoint_id: Uuid::nil(),
            form_id: Uuid::nil(),
            event_id: Uuid::new_v4(),
            event_type: "form.submitted".into(),
            target_url: "https://example.com".into(),
            attempt_number: 1,
            status_code: None,
            response_time_ms: ms,
            success: outcome == DeliveryOutcome::Success,
            outcome,
            error_message: None,
            response_body: None,
            request_payload: "{}".into(),
            created_at: Utc::now(),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    #[test]
    fn test_period_bounds() {
        let h = Period::hour(date(), 23);
        assert_eq!(h.end() - h.start(), Duration::hours(1));
        assert_eq!(h.next(), Period::hour(date().succ_opt().unwrap(), 0));
        assert_eq!(Period::hour(date(), 0).previous().hour, Some(23));

        let d = Period::day(date());
        assert_eq!(d.end() - d.start(), Duration::days(1));
        assert_eq!(d.previous().date, date().pred_opt().unwrap());
    }

    #[test]
    fn test_period_containing() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 10, 14, 35, 0).unwrap();
        let p = Granularity::Hourly.period_containing(ts);
        assert_eq!(p.hour, Some(14));
        assert!(p.start() <= ts && ts < p.end());
        assert_eq!(Granularity::Daily.period_containing(ts).hour, None);
    }

    #[test]
    fn test_bucket_counts() {
        let key = BucketKey {
            form_id: Uuid::nil(),
            endpoint_id: Uuid::nil(),
            period: Period::day(date()),
        };
        let attempts = vec![
            attempt(DeliveryOutcome::Success, 100),
            attempt(DeliveryOutcome::Success, 300),
            attempt(DeliveryOutcome::TerminalFailure, 200),
            attempt(DeliveryOutcome::CircuitOpen, 0),
        ];
        let b = AnalyticsBucket::from_attempts(key, &attempts);
        assert_eq!(b.total_count, 4);
        assert_eq!(b.success_count, 2);
        assert_eq!(b.failure_count, 1);
        assert_eq!(b.short_circuited_count, 1);
        assert_eq!(b.min_response_ms, 100);
        assert_eq!(b.max_response_ms, 300);
        assert_eq!(b.p95_response_ms, 300);
        assert_eq!(b.granularity, Granularity::Daily);
        assert_eq!(b.key(), key);
    }

    #[test]
    fn test_bucket_is_deterministic() {
        let key = BucketKey {
            form_id: Uuid::nil(),
            endpoint_id: Uuid::nil(),
            period: Period::hour(date(), 3),
        };
        let attempts = vec![
            attempt(DeliveryOutcome::Success, 5),
            attempt(DeliveryOutcome::RetryableFailure, 50),
        ];
        assert_eq!(
            AnalyticsBucket::from_attempts(key, &attempts),
            AnalyticsBucket::from_attempts(key, &attempts)
        );
    }

    fn group(
        outcome: DeliveryOutcome,
        status_code: Option<i32>,
        error: Option<&str>,
        count: i64,
    ) -> AttemptGroup {
        AttemptGroup {
            outcome,
            status_code,
            error_message: error.map(str::to_string),
            count,
        }
    }

    #[test]
    fn test_classify_failures() {
        use DeliveryOutcome::*;
        let classify = ErrorCategory::classify;
        assert_eq!(classify(RetryableFailure, Some(503), Some("HTTP 503")), ErrorCategory::ServiceUnavailable);
        assert_eq!(classify(RetryableFailure, Some(500), None), ErrorCategory::ServerError);
        assert_eq!(classify(TerminalFailure, Some(410), None), ErrorCategory::ClientError);
        assert_eq!(classify(TerminalFailure, Some(401), None), ErrorCategory::Authentication);
        assert_eq!(
            classify(RetryableFailure, None, Some("request timed out after 5s")),
            ErrorCategory::Timeout
        );
        assert_eq!(
            classify(RetryableFailure, None, Some("connection failed: dns error: no record")),
            ErrorCategory::Dns
        );
        assert_eq!(
            classify(RetryableFailure, None, Some("connection failed: connection refused")),
            ErrorCategory::Connection
        );
        assert_eq!(classify(CircuitOpen, None, Some("circuit open")), ErrorCategory::CircuitOpen);
        assert_eq!(classify(RateLimited, None, None), ErrorCategory::Throttled);
        assert_eq!(classify(RetryableFailure, None, Some("weird")), ErrorCategory::Unknown);
    }

    #[test]
    fn test_breakdown_from_groups() {
        let now = Utc::now();
        let groups = [
            group(DeliveryOutcome::Success, Some(200), None, 6),
            group(DeliveryOutcome::RetryableFailure, Some(503), Some("HTTP 503"), 3),
            group(DeliveryOutcome::RetryableFailure, None, Some("request timed out after 5s"), 1),
            group(DeliveryOutcome::CircuitOpen, None, Some("circuit open until later"), 1),
        ];
        let b = ErrorBreakdown::from_groups(Uuid::nil(), now - Duration::hours(1), now, &groups);

        assert_eq!(b.total_attempts, 11);
        assert_eq!(b.failed_attempts, 5);
        assert_eq!(b.categories[&ErrorCategory::ServiceUnavailable], 3);
        assert_eq!(b.categories[&ErrorCategory::Timeout], 1);
        assert_eq!(b.categories[&ErrorCategory::CircuitOpen], 1);
        assert_eq!(b.response_codes[&200], 6);
        assert_eq!(b.response_codes[&503], 3);
        assert_eq!(b.top_errors[0].error, "HTTP 503");
        assert_eq!(b.top_errors[0].count, 3);
        assert!((b.top_errors[0].percentage - 60.0).abs() < 1e-9);
        assert_eq!(b.top_errors.len(), 3);

        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["categories"]["service_unavailable"], 3);
        assert_eq!(json["response_codes"]["503"], 3);
    }

    #[test]
    fn test_breakdown_without_failures() {
        let now = Utc::now();
        let groups = [group(DeliveryOutcome::Success, Some(204), None, 2)];
        let b = ErrorBreakdown::from_groups(Uuid::nil(), now, now, &groups);
        assert_eq!(b.failed_attempts, 0);
        assert!(b.categories.is_empty());
        assert!(b.top_errors.is_empty());
    }
}
