//! Caller-supplied hooks: identity mapping and decision observers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

use super::decision::RateLimitInfo;
use crate::error::TokengateError;

/// Maps a raw identity to the value that is hashed into the bucket key.
pub type IdentityMapper = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Called with the raw identity and the decision.
pub type DecisionObserver = Arc<dyn Fn(&str, &RateLimitInfo) + Send + Sync>;

/// Called with every error that reaches the fail strategy or the caller.
pub type ErrorObserver = Arc<dyn Fn(&TokengateError) + Send + Sync>;

/// The set of observers attached to a limiter. All are optional.
#[derive(Clone, Default)]
pub struct Observers {
    pub on_admit: Option<DecisionObserver>,
    pub on_reject: Option<DecisionObserver>,
    pub on_error: Option<ErrorObserver>,
}

impl Observers {
    pub(crate) fn decided(&self, identity: &str, info: &RateLimitInfo) {
        let (hook, name) = if info.allowed {
            (&self.on_admit, "on_admit")
        } else {
            (&self.on_reject, "on_reject")
        };
        if let Some(hook) = hook {
            isolate(name, || hook(identity, info));
        }
    }

    pub(crate) fn errored(&self, err: &TokengateError) {
        if let Some(hook) = &self.on_error {
            isolate("on_error", || hook(err));
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("on_admit", &self.on_admit.is_some())
            .field("on_reject", &self.on_reject.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Run an observer so that a panic inside it cannot change the decision.
fn isolate(name: &str, hook: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        warn!(observer = name, "Observer panicked; decision unaffected");
    }
}
