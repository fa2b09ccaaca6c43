//! Local record of scripts registered on the server.

use dashmap::DashSet;
use tracing::trace;

/// Content hashes of scripts the server is believed to hold.
///
/// Shared by every concurrent call on one executor. A stale entry is harmless:
/// the server answers `NOSCRIPT`, the executor clears the cache and resends
/// the full source.
#[derive(Debug, Default)]
pub struct ScriptCache {
    registered: DashSet<String>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `hash` can be invoked with `EVALSHA`.
    pub fn is_registered(&self, hash: &str) -> bool {
        self.registered.contains(hash)
    }

    /// Record that the server now holds `hash`.
    pub fn mark_registered(&self, hash: &str) {
        if self.registered.insert(hash.to_string()) {
            trace!(hash = %hash, "Script registered");
        }
    }

    /// Forget every registration, e.g. after the server lost its script cache.
    pub fn clear(&self) {
        trace!(entries = self.registered.len(), "Clearing script cache");
        self.registered.clear();
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}
