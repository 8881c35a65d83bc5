//! Database entity definitions.
//!
//! Entities are direct mappings to database rows. Conversions into domain
//! models are fallible because enum columns are stored as text.

pub mod alert;
pub mod analytics;
pub mod circuit_breaker;
pub mod delivery_attempt;
pub mod endpoint;
pub mod health;
pub mod retry_task;

pub use alert::AlertEntity;
pub use analytics::AnalyticsBucketEntity;
pub use circuit_breaker::CircuitBreakerEntity;
pub use delivery_attempt::DeliveryAttemptEntity;
pub use endpoint::EndpointEntity;
pub use health::HealthRecordEntity;
pub use retry_task::RetryTaskEntity;

use crate::error::StoreError;

/// Parses a text column into a domain enum.
pub(crate) fn parse_column<T>(column: &str, value: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| StoreError::InvalidData(format!("{column}: {e}")))
}

/// Converts a non-negative integer column.
pub(crate) fn unsigned_column(column: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{column}: negative value {value}")))
}
