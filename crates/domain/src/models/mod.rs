//! Domain models for the webhook engine.

pub mod alert;
pub mod analytics;
pub mod circuit_breaker;
pub mod delivery;
pub mod endpoint;
pub mod event;
pub mod health;
pub mod rate_limit;
pub mod retry;

pub use alert::{Alert, AlertSeverity, AlertType};
pub use analytics::{
    AnalyticsBucket, AttemptGroup, BucketKey, ErrorBreakdown, ErrorCategory, ErrorStat, Granularity,
    Period, RealtimeStats,
};
pub use circuit_breaker::{
    Admission, CircuitBreakerPolicy, CircuitBreakerState, CircuitState, CircuitTransition,
};
pub use delivery::{DeliveryAttempt, DeliveryIdGenerator, DeliveryOutcome, DeliveryQuery};
pub use endpoint::{
    CreateEndpointRequest, CreateEndpointResponse, Endpoint, EndpointResponse,
    UpdateEndpointRequest,
};
pub use event::{EventEnvelope, PublishRequest};
pub use health::{HealthPolicy, HealthRecord, HealthStatus};
pub use rate_limit::{RateLimitKey, RateLimitRule, RateLimitWindow};
pub use retry::{RetryStatus, RetryTask, RetryTransition};
