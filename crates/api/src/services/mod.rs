//! Engine services: delivery, reliability state and monitoring.

pub mod alerting;
pub mod analytics;
pub mod circuit_breaker;
pub mod engine;
pub mod executor;
pub mod health_monitor;
pub mod rate_limiter;
pub mod retry_scheduler;
pub mod transform;
pub mod transport;

pub use alerting::AlertService;
pub use analytics::AnalyticsAggregator;
pub use circuit_breaker::CircuitBreakerRegistry;
pub use engine::{
    CircuitStatus, EngineSettings, PublishReceipt, RetryResult, TestResult, WebhookEngine,
};
pub use executor::{DeliveryExecutor, ExecutedAttempt, ExecutorSettings};
pub use health_monitor::HealthMonitor;
pub use rate_limiter::{DeliveryRateLimiter, RateDecision};
pub use retry_scheduler::RetryScheduler;
pub use transform::{JsonEnvelopeTransform, PayloadTransform, TransformError};
pub use transport::{ReqwestTransport, TransportError, WebhookTransport};

use persistence::StoreError;
use thiserror::Error;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] validator::ValidationErrors),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}
