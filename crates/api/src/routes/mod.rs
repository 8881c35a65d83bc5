//! HTTP route handlers.

pub mod endpoints;
pub mod events;
pub mod health;
pub mod monitoring;
