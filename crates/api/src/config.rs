use serde::Deserialize;
use std::net::SocketAddr;

use chrono::Duration;
use domain::models::{CircuitBreakerPolicy, HealthPolicy};
use domain::services::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub delivery: DeliveryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub health: HealthConfig,
    pub analytics: AnalyticsConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Seconds to wait for in-flight deliveries on shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn pool_config(&self) -> persistence::db::DatabaseConfig {
        persistence::db::DatabaseConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            connect_timeout_secs: self.connect_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Per-request timeout unless the endpoint overrides it.
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,

    /// Retry budget unless the endpoint overrides it.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum concurrent outbound deliveries.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Bytes of response body kept on the attempt row.
    #[serde(default = "default_response_body_limit")]
    pub response_body_limit: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Accept endpoint URLs pointing at loopback, private or link-local
    /// addresses.
    #[serde(default)]
    pub allow_private_urls: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_base_cooldown")]
    pub base_cooldown_secs: u64,

    #[serde(default = "default_max_cooldown")]
    pub max_cooldown_secs: u64,

    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per window to a single endpoint URL.
    #[serde(default = "default_endpoint_limit")]
    pub endpoint_limit: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests per window across all endpoints of a form.
    #[serde(default)]
    pub form_limit: Option<u32>,

    /// Requests per window for one event producer.
    #[serde(default)]
    pub source_limit: Option<u32>,

    /// Inbound API requests per minute per client IP.
    #[serde(default = "default_api_rate_limit")]
    pub api_requests_per_minute: u32,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,

    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// How long a claimed task stays invisible to other workers. Must
    /// outlast the longest endpoint timeout.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_window")]
    pub window_minutes: i64,

    #[serde(default = "default_max_samples")]
    pub max_samples: i64,

    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Success rate (0.0..=1.0) below which an endpoint is unhealthy.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: f64,

    #[serde(default = "default_failure_burst_threshold")]
    pub failure_burst_threshold: usize,

    #[serde(default = "default_failure_burst_window")]
    pub failure_burst_window_secs: i64,

    #[serde(default = "default_alert_cooldown")]
    pub alert_cooldown_secs: i64,

    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_analytics_interval")]
    pub interval_secs: u64,

    /// Days of closed periods re-rolled when no watermark exists yet.
    #[serde(default = "default_backfill_days")]
    pub backfill_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: i64,

    #[serde(default = "default_retention_interval")]
    pub interval_secs: u64,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    60
}
fn default_shutdown_grace() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_delivery_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}
fn default_worker_pool_size() -> usize {
    32
}
fn default_max_payload_bytes() -> usize {
    262_144
}
fn default_response_body_limit() -> usize {
    1024
}
fn default_user_agent() -> String {
    "webhook-engine/1.0".to_string()
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_base_cooldown() -> u64 {
    60
}
fn default_max_cooldown() -> u64 {
    3600
}
fn default_snapshot_interval() -> u64 {
    30
}
fn default_endpoint_limit() -> u32 {
    60
}
fn default_window_secs() -> u64 {
    60
}
fn default_api_rate_limit() -> u32 {
    600
}
fn default_sweep_interval() -> u64 {
    300
}
fn default_base_delay() -> u64 {
    30
}
fn default_max_delay() -> u64 {
    3600
}
fn default_jitter_ratio() -> f64 {
    0.1
}
fn default_batch_size() -> i64 {
    100
}
fn default_poll_interval() -> u64 {
    5
}
fn default_lease_secs() -> u64 {
    180
}
fn default_health_window() -> i64 {
    60
}
fn default_max_samples() -> i64 {
    200
}
fn default_min_samples() -> usize {
    10
}
fn default_unhealthy_threshold() -> f64 {
    0.5
}
fn default_failure_burst_threshold() -> usize {
    20
}
fn default_failure_burst_window() -> i64 {
    300
}
fn default_alert_cooldown() -> i64 {
    3600
}
fn default_health_interval() -> u64 {
    60
}
fn default_analytics_interval() -> u64 {
    300
}
fn default_backfill_days() -> i64 {
    2
}
fn default_log_retention_days() -> i64 {
    90
}
fn default_retention_interval() -> u64 {
    3600
}

/// Upper bound of an endpoint's `timeout_secs` override.
const MAX_ENDPOINT_TIMEOUT_SECS: u64 = 120;
/// Headroom beyond the request itself for store writes, used by retry
/// leases and breaker probe deadlines.
const LEASE_MARGIN_SECS: u64 = 15;

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with WH__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("WH").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for tests from embedded defaults plus overrides.
    ///
    /// Does not touch the file system and skips validation.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "127.0.0.1"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""

            [logging]
            level = "info"
            format = "json"

            [delivery]
            timeout_secs = 5
            allow_private_urls = true

            [circuit_breaker]
            failure_threshold = 5

            [rate_limit]
            endpoint_limit = 60

            [retry]
            base_delay_secs = 30

            [health]
            min_samples = 10

            [analytics]
            interval_secs = 300

            [retention]
            log_retention_days = 90
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "WH__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        let positive = [
            ("delivery.timeout_secs", self.delivery.timeout_secs),
            (
                "delivery.worker_pool_size",
                self.delivery.worker_pool_size as u64,
            ),
            (
                "circuit_breaker.failure_threshold",
                u64::from(self.circuit_breaker.failure_threshold),
            ),
            (
                "circuit_breaker.base_cooldown_secs",
                self.circuit_breaker.base_cooldown_secs,
            ),
            (
                "rate_limit.endpoint_limit",
                u64::from(self.rate_limit.endpoint_limit),
            ),
            ("rate_limit.window_secs", self.rate_limit.window_secs),
            (
                "rate_limit.api_requests_per_minute",
                u64::from(self.rate_limit.api_requests_per_minute),
            ),
            ("retry.base_delay_secs", self.retry.base_delay_secs),
            ("retry.poll_interval_secs", self.retry.poll_interval_secs),
            ("retry.lease_secs", self.retry.lease_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigValidationError::InvalidValue(format!(
                "{name} must be greater than 0"
            )));
        }

        let slowest_attempt = self.slowest_attempt_secs();
        if self.retry.lease_secs <= slowest_attempt + LEASE_MARGIN_SECS {
            return Err(ConfigValidationError::InvalidValue(format!(
                "retry.lease_secs must exceed {}s (slowest delivery plus settle margin)",
                slowest_attempt + LEASE_MARGIN_SECS
            )));
        }

        if self.circuit_breaker.max_cooldown_secs < self.circuit_breaker.base_cooldown_secs {
            return Err(ConfigValidationError::InvalidValue(
                "circuit_breaker.max_cooldown_secs cannot be below base_cooldown_secs".to_string(),
            ));
        }

        if self.retry.batch_size <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "retry.batch_size must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(ConfigValidationError::InvalidValue(
                "retry.jitter_ratio must be between 0 and 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.health.unhealthy_threshold) {
            return Err(ConfigValidationError::InvalidValue(
                "health.unhealthy_threshold must be between 0 and 1".to_string(),
            ));
        }

        if self.retention.log_retention_days <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "retention.log_retention_days must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigValidationError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|_| {
                ConfigValidationError::InvalidValue(format!(
                    "invalid socket address {}:{}",
                    self.server.host, self.server.port
                ))
            })
    }

    pub fn breaker_policy(&self) -> CircuitBreakerPolicy {
        CircuitBreakerPolicy {
            failure_threshold: self.circuit_breaker.failure_threshold,
            base_cooldown: secs(self.circuit_breaker.base_cooldown_secs),
            max_cooldown: secs(self.circuit_breaker.max_cooldown_secs),
            probe_timeout: secs(self.slowest_attempt_secs() + LEASE_MARGIN_SECS),
        }
    }

    /// Longest a single outbound request can take.
    pub fn slowest_attempt_secs(&self) -> u64 {
        self.delivery.timeout_secs.max(MAX_ENDPOINT_TIMEOUT_SECS)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: secs(self.retry.base_delay_secs),
            max_delay: secs(self.retry.max_delay_secs),
            jitter_ratio: self.retry.jitter_ratio,
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            min_samples: self.health.min_samples,
            unhealthy_threshold: self.health.unhealthy_threshold,
        }
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}
