//! Tokengate - Distributed Token Bucket Admission Control
//!
//! This crate decides whether to admit a request for a given identity, with
//! bucket state shared by every application process through Redis. Each check
//! is a single atomic Lua script evaluated on the Redis clock, so processes
//! never coordinate with each other and never need synchronized clocks.

pub mod algorithm;
pub mod config;
pub mod error;
pub mod executor;
pub mod limiter;

pub use config::{BackendConfig, FailStrategy, LimiterConfig, Mode, TokengateConfig};
pub use error::{Result, TokengateError};
pub use limiter::{Admission, BucketKey, Identity, RateLimitInfo, RateLimiter, RateLimiterBuilder};
