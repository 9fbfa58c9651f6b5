//! Common types for the Guild authenticated request layer.
//!
//! This crate holds the data model shared by signers, the clock-skew estimator
//! and the request fetcher, together with the configuration-schema and
//! registry plumbing every pluggable implementation relies on.

/// API error shapes returned by the platform backend.
pub mod api;
/// Signing inputs and outputs: requests, signed payloads and validations.
pub mod auth;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Redacting wrapper for private keys and tokens.
pub mod secret_string;
/// Hex and time helpers.
pub mod utils;
/// Configuration validation types for implementation tables.
pub mod validation;

pub use api::*;
pub use auth::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use utils::{current_timestamp_ms, with_0x_prefix, without_0x_prefix};
pub use validation::*;
