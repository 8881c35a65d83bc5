//! Webhook delivery and reliability engine.
//!
//! The library exposes the engine services, the HTTP router and the
//! background jobs so the binary and the integration tests share one wiring.

pub mod app;
pub mod config;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod services;
