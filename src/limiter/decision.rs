//! Admission decisions and their HTTP header form.

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, TokengateError};
use crate::executor::{RawReply, ReplyValue};

/// Slack allowed on the reported balance for floating-point noise.
const EPSILON: f64 = 1e-6;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Bucket capacity
    pub limit: u64,
    /// Whole tokens left after this check
    pub remaining: u64,
    /// Unix timestamp (Redis clock) at which the bucket is full again
    pub reset: u64,
    /// Whether this check was admitted
    pub allowed: bool,
    /// Tokens consumed if admitted, tokens requested if not
    pub cost: u64,
}

impl RateLimitInfo {
    /// Interpret a raw script reply.
    ///
    /// Any deviation from the reply contract is a [`TokengateError::Contract`]
    /// error: it means the script on the server does not match this client.
    pub(crate) fn from_reply(reply: &RawReply, limit: u64, cost: u64) -> Result<Self> {
        let allowed = match reply.allowed {
            ReplyValue::Int(1) => true,
            ReplyValue::Int(0) => false,
            ref other => return Err(contract(format!("allowed flag must be 0 or 1, got {:?}", other))),
        };

        let tokens = number(&reply.remaining, "remaining")?;
        if !tokens.is_finite() || tokens < -EPSILON || tokens > limit as f64 + EPSILON {
            return Err(contract(format!(
                "remaining {} is outside [0, {}]",
                tokens, limit
            )));
        }
        let remaining = (tokens.clamp(0.0, limit as f64).floor() as u64).min(limit);

        let reset = number(&reply.reset, "reset")?;
        if !reset.is_finite() || reset < 0.0 || reset.fract() != 0.0 {
            return Err(contract(format!("reset must be a whole timestamp, got {}", reset)));
        }

        Ok(Self {
            limit,
            remaining,
            reset: reset as u64,
            allowed,
            cost,
        })
    }

    /// Seconds from `now` until the bucket is full, never negative.
    pub fn reset_after(&self, now: u64) -> u64 {
        self.reset.saturating_sub(now)
    }

    /// Seconds a rejected caller should wait, relative to `now`.
    pub fn retry_after(&self, now: u64) -> Option<u64> {
        if self.allowed {
            None
        } else {
            Some(self.reset_after(now).max(1))
        }
    }

    /// Header pairs for an HTTP response, relative values computed from `now`.
    pub fn headers_at(&self, now: u64) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset.to_string()),
            ("X-RateLimit-Reset-After", self.reset_after(now).to_string()),
        ];
        if let Some(retry) = self.retry_after(now) {
            headers.push(("Retry-After", retry.to_string()));
        }
        headers
    }

    /// Header pairs using the local clock for the relative values.
    ///
    /// `reset` comes from the Redis clock, so the relative headers are only as
    /// accurate as the local clock's agreement with it. Callers that can fetch
    /// [`crate::RateLimiter::server_time`] should pass it to
    /// [`RateLimitInfo::headers_at`] instead.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.headers_at(now)
    }
}

fn contract(msg: String) -> TokengateError {
    TokengateError::Contract(msg)
}

fn number(value: &ReplyValue, field: &str) -> Result<f64> {
    match value {
        ReplyValue::Int(v) => Ok(*v as f64),
        ReplyValue::Double(v) => Ok(*v),
        ReplyValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| contract(format!("{} is not numeric ({:?}): {}", field, s, e))),
        ReplyValue::Nil => Err(contract(format!("{} is missing", field))),
    }
}

/// Result of [`crate::RateLimiter::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The decision, absent only when the backend was unavailable and the
    /// limiter failed open
    pub info: Option<RateLimitInfo>,
}

impl Admission {
    pub(crate) fn decided(info: RateLimitInfo) -> Self {
        Self {
            allowed: info.allowed,
            info: Some(info),
        }
    }

    pub(crate) fn failed_open() -> Self {
        Self {
            allowed: true,
            info: None,
        }
    }
}
