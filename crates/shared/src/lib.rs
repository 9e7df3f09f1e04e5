// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Authgate Shared Utilities
//!
//! Leaf components with no knowledge of the HTTP layer:
//!
//! - **Rate limiting**: per-(endpoint class, client IP) token buckets
//! - **Database**: connection pool construction with bounded timeouts

pub mod db;
pub mod rate_limit;

pub use db::create_pool;
pub use rate_limit::{ClassLimit, Decision, EndpointClass, RateLimitConfig, RateLimiter};
