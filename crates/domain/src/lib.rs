//! Domain layer for the webhook delivery engine.
//!
//! This crate contains:
//! - Domain models (Endpoint, DeliveryAttempt, RetryTask, CircuitBreakerState, ...)
//! - Pure reliability logic (breaker transitions, fixed windows, backoff, statistics)

pub mod models;
pub mod services;
