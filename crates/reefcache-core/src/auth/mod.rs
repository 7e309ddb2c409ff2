//! Session token state.
//!
//! This module provides `TokenStore`: access and refresh tokens with expiry
//! awareness, persisted in a reserved namespace of the shared key-value
//! store and cleared as a unit on logout. Expired tokens are purged the
//! first time they are read.

pub mod session;

pub use session::{TokenState, TokenStore, TOKEN_REFRESH_BUFFER_MINUTES};
