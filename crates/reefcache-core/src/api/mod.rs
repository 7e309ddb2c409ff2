//! REST API client module.
//!
//! This module provides the `ApiClient`, the concrete fetch capability a
//! host can inject into the sync orchestrators, and `JsonBody`, the decoder
//! for its responses. The core caches never depend on it directly.

pub mod client;
pub mod error;

pub use client::{ApiClient, JsonBody};
pub use error::ApiError;
