//! Shared utilities and common types for the webhook engine.
//!
//! This crate provides common functionality used across all other crates:
//! - Payload signing and verification (HMAC-SHA256)
//! - Endpoint configuration validation helpers, including private address
//!   detection for outbound targets

pub mod crypto;
pub mod validation;
