// API crate clippy configuration
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Authgate API Library
//!
//! Session-token lifecycle and request gating for an HTTP API: issuance,
//! validation, rotation and revocation of bearer credentials, plus
//! per-endpoint rate limiting in front of the credential-issuing endpoints.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
