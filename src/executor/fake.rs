//! In-process stand-in for Redis used by unit tests.
//!
//! Evaluates the token bucket rule the way the Lua script does, against a
//! clock the test advances by hand.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{AsyncScriptExecutor, ExecutorError, RawReply, ReplyValue, ScriptExecutor};
use crate::algorithm::LuaScript;

pub(crate) const START: f64 = 1_700_000_000.0;

#[derive(Default)]
pub(crate) struct FakeEngine {
    buckets: Mutex<HashMap<String, (f64, f64)>>,
    offset: Mutex<f64>,
    failure: Mutex<Option<ExecutorError>>,
    reply: Mutex<Option<RawReply>>,
    calls: AtomicUsize,
    keys: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn now(&self) -> f64 {
        START + *self.offset.lock()
    }

    pub(crate) fn advance(&self, secs: f64) {
        *self.offset.lock() += secs;
    }

    /// Make every following call fail with `err`.
    pub(crate) fn fail_with(&self, err: ExecutorError) {
        *self.failure.lock() = Some(err);
    }

    /// Make every following call return `reply` verbatim.
    pub(crate) fn reply_with(&self, reply: RawReply) {
        *self.reply.lock() = Some(reply);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn keys_seen(&self) -> Vec<String> {
        self.keys.lock().clone()
    }

    fn evaluate(&self, keys: &[String], args: &[i64]) -> Result<RawReply, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().extend(keys.iter().cloned());

        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        if let Some(reply) = self.reply.lock().clone() {
            return Ok(reply);
        }

        let (key, [rate, per, capacity, cost]) = match (keys, args) {
            ([key], [a, b, c, d]) => (key, [*a as f64, *b as f64, *c as f64, *d as f64]),
            _ => return Err(ExecutorError::Rejected("wrong number of keys or args".into())),
        };

        let now = self.now();
        let mut buckets = self.buckets.lock();
        let (mut tokens, last) = buckets.get(key).copied().unwrap_or((capacity, now));

        let delta = (now - last).max(0.0);
        tokens = capacity.min(tokens + delta * rate / per);

        let mut allowed = 0;
        if tokens >= cost {
            allowed = 1;
            tokens -= cost;
        }
        tokens = tokens.clamp(0.0, capacity);

        buckets.insert(key.clone(), (tokens, now));

        let reset = (now + (capacity - tokens) * per / rate).ceil() as i64;
        Ok(RawReply {
            allowed: ReplyValue::Int(allowed),
            remaining: ReplyValue::Text(tokens.to_string()),
            reset: ReplyValue::Int(reset),
        })
    }
}

impl ScriptExecutor for FakeEngine {
    fn execute(
        &self,
        _script: &LuaScript,
        keys: &[String],
        args: &[i64],
    ) -> Result<RawReply, ExecutorError> {
        self.evaluate(keys, args)
    }

    fn server_time(&self) -> Result<f64, ExecutorError> {
        Ok(self.now())
    }
}

#[async_trait]
impl AsyncScriptExecutor for FakeEngine {
    async fn execute(
        &self,
        _script: &LuaScript,
        keys: &[String],
        args: &[i64],
    ) -> Result<RawReply, ExecutorError> {
        self.evaluate(keys, args)
    }

    async fn server_time(&self) -> Result<f64, ExecutorError> {
        Ok(self.now())
    }
}
