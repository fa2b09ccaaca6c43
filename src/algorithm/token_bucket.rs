//! Token bucket algorithm.

use std::sync::OnceLock;

use super::{Algorithm, LuaScript};
use crate::error::{Result, TokengateError};

const SCRIPT_SOURCE: &str = include_str!("../../scripts/token_bucket.lua");

fn script() -> &'static LuaScript {
    static SCRIPT: OnceLock<LuaScript> = OnceLock::new();
    SCRIPT.get_or_init(|| LuaScript::new(SCRIPT_SOURCE))
}

/// Token bucket refilled continuously at `rate` tokens per `per` seconds,
/// holding at most `capacity` tokens.
///
/// Refill is computed lazily inside the script from the Redis clock, so idle
/// buckets cost nothing and callers on different hosts never disagree about
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucket {
    rate: u64,
    per: u64,
    capacity: u64,
}

impl TokenBucket {
    /// Tag used in bucket keys.
    pub const KEY_TAG: &'static str = "token_bucket";

    /// Create a bucket description. `capacity` defaults to `rate`.
    pub fn new(rate: u64, per: u64, capacity: Option<u64>) -> Result<Self> {
        if rate == 0 {
            return Err(TokengateError::Config("rate must be > 0".to_string()));
        }
        if per == 0 {
            return Err(TokengateError::Config("per must be > 0".to_string()));
        }
        let capacity = capacity.unwrap_or(rate);
        if capacity == 0 {
            return Err(TokengateError::Config("capacity must be > 0".to_string()));
        }
        for (name, value) in [("rate", rate), ("per", per), ("capacity", capacity)] {
            if i64::try_from(value).is_err() {
                return Err(TokengateError::Config(format!("{} is too large", name)));
            }
        }

        Ok(Self { rate, per, capacity })
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    pub fn per(&self) -> u64 {
        self.per
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl Algorithm for TokenBucket {
    fn key_tag(&self) -> &'static str {
        Self::KEY_TAG
    }

    fn script(&self) -> &LuaScript {
        script()
    }

    fn static_args(&self) -> Vec<i64> {
        // Bounds checked in `new`.
        vec![self.rate as i64, self.per as i64, self.capacity as i64]
    }

    fn dynamic_args(&self, cost: u64) -> Vec<i64> {
        vec![i64::try_from(cost).unwrap_or(i64::MAX)]
    }

    fn limit(&self) -> u64 {
        self.capacity
    }
}
