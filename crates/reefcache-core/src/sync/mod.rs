//! Orchestration between remote operations and the local caches.
//!
//! Remote calls are injected as async closures returning `anyhow::Result<R>`
//! together with a [`Decoder`] that turns `R` into the JSON payload. The
//! only suspension points are those calls; everything on the cache side
//! runs to completion.

pub mod decode;
pub mod entity;
pub mod fetch;
pub mod mutate;

pub use decode::{
    is_empty_payload, unwrap_envelope, Decoder, Enveloped, Passthrough, ENVELOPE_FIELD,
};
pub use entity::EntitySync;
pub use fetch::{CacheSync, FetchMode, FetchOptions, FetchSource, Fetched};
