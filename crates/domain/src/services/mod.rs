//! Pure domain services shared by the engine.

pub mod backoff;
pub mod statistics;

pub use backoff::RetryPolicy;
pub use statistics::{percentile, ResponseTimeStats};
