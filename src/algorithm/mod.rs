//! Admission algorithms expressed as atomic Lua scripts.
//!
//! An algorithm is pure data: the script text plus the arguments it needs.
//! It never touches the network; executing it is the executor's job.

mod token_bucket;

pub use token_bucket::TokenBucket;

use std::fmt;

/// A Lua script together with its content address.
///
/// Redis addresses loaded scripts by the SHA-1 of their source, so the hash is
/// computed once here and reused for every `EVALSHA`.
#[derive(Clone)]
pub struct LuaScript {
    source: &'static str,
    hash: String,
}

impl LuaScript {
    /// Wrap a script source and compute its content hash.
    pub fn new(source: &'static str) -> Self {
        let hash = redis::Script::new(source).get_hash().to_string();
        Self { source, hash }
    }

    /// The script body, sent with `EVAL` when the server does not know it yet.
    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Hex SHA-1 of the source.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Debug for LuaScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuaScript").field("hash", &self.hash).finish()
    }
}

/// Capabilities every admission algorithm provides to the limiter.
///
/// Adding an algorithm means implementing this trait; the limiter itself does
/// not change.
pub trait Algorithm: Send + Sync + fmt::Debug {
    /// Short identifier folded into the storage key.
    fn key_tag(&self) -> &'static str;

    /// The script evaluated atomically by the backend.
    fn script(&self) -> &LuaScript;

    /// Arguments fixed for the lifetime of the limiter.
    fn static_args(&self) -> Vec<i64>;

    /// Per-request arguments appended after [`Algorithm::static_args`].
    fn dynamic_args(&self, _cost: u64) -> Vec<i64> {
        Vec::new()
    }

    /// The ceiling reported as `limit` in decisions.
    fn limit(&self) -> u64;
}
