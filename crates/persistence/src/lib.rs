//! Persistence layer for the webhook engine.
//!
//! This crate contains:
//! - Storage traits consumed by the engine
//! - PostgreSQL repositories and their row entities
//! - An in-memory store
//! - Schema migrations

pub mod db;
pub mod entities;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod repositories;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use repositories::PgStore;
pub use store::{
    AnalyticsStore, AttemptCounts, DeliveryStore, EndpointStore, MonitoringStore, Store,
    StoreHealth, StoreResult,
};
