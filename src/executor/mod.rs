//! Atomic script execution against Redis.
//!
//! Executors run an algorithm's Lua script in exactly one round trip and hand
//! back the raw reply. They never decide policy: every failure is returned as
//! an [`ExecutorError`] and the limiter chooses what to do with it.

mod blocking;
mod cache;
mod pooled;

#[cfg(test)]
pub(crate) mod fake;
#[cfg(test)]
pub(crate) mod resp;

pub use blocking::RedisExecutor;
pub use cache::ScriptCache;
pub use pooled::AsyncRedisExecutor;

use async_trait::async_trait;
use redis::ErrorKind;
use thiserror::Error;

use crate::algorithm::LuaScript;

/// Failures surfaced by an executor.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    /// Connection refused or dropped, I/O failure, or a timeout.
    #[error("{0}")]
    Unavailable(String),
    /// Redis refused the script or its arguments.
    #[error("{0}")]
    Rejected(String),
    /// The reply was not the `(allowed, remaining, reset)` triple.
    #[error("{0}")]
    MalformedReply(String),
    /// The backend could not be set up from its configuration.
    #[error("{0}")]
    Config(String),
}

/// One scalar element of a script reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyValue {
    Int(i64),
    Double(f64),
    Text(String),
    Nil,
}

/// The raw `(allowed, remaining, reset)` triple returned by a script.
///
/// Element types are not interpreted here; that happens in the limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReply {
    pub allowed: ReplyValue,
    pub remaining: ReplyValue,
    pub reset: ReplyValue,
}

/// Blocking script executor.
pub trait ScriptExecutor: Send + Sync {
    /// Execute `script` atomically against `keys` with `args`.
    fn execute(&self, script: &LuaScript, keys: &[String], args: &[i64])
        -> Result<RawReply, ExecutorError>;

    /// Cheap connectivity probe. Never mutates state.
    fn health_check(&self) -> bool {
        true
    }

    /// Server clock in seconds, for observability only.
    fn server_time(&self) -> Result<f64, ExecutorError> {
        Err(ExecutorError::Rejected(
            "backend does not expose a clock".to_string(),
        ))
    }
}

/// Async script executor with the same contract as [`ScriptExecutor`].
#[async_trait]
pub trait AsyncScriptExecutor: Send + Sync {
    /// Execute `script` atomically against `keys` with `args`.
    async fn execute(
        &self,
        script: &LuaScript,
        keys: &[String],
        args: &[i64],
    ) -> Result<RawReply, ExecutorError>;

    /// Cheap connectivity probe. Never mutates state.
    async fn health_check(&self) -> bool {
        true
    }

    /// Server clock in seconds, for observability only.
    async fn server_time(&self) -> Result<f64, ExecutorError> {
        Err(ExecutorError::Rejected(
            "backend does not expose a clock".to_string(),
        ))
    }
}

/// Build `EVALSHA hash numkeys keys.. args..`.
pub(crate) fn evalsha_cmd(script: &LuaScript, keys: &[String], args: &[i64]) -> redis::Cmd {
    let mut cmd = redis::cmd("EVALSHA");
    cmd.arg(script.hash()).arg(keys.len()).arg(keys).arg(args);
    cmd
}

/// Build `EVAL source numkeys keys.. args..`. Also registers the script.
pub(crate) fn eval_cmd(script: &LuaScript, keys: &[String], args: &[i64]) -> redis::Cmd {
    let mut cmd = redis::cmd("EVAL");
    cmd.arg(script.source()).arg(keys.len()).arg(keys).arg(args);
    cmd
}

pub(crate) fn is_noscript(err: &redis::RedisError) -> bool {
    err.kind() == ErrorKind::NoScriptError
}

/// Sort a Redis error into the executor taxonomy.
pub(crate) fn classify(err: redis::RedisError) -> ExecutorError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
    {
        return ExecutorError::Unavailable(err.to_string());
    }

    match err.kind() {
        ErrorKind::BusyLoadingError
        | ErrorKind::TryAgain
        | ErrorKind::ClusterDown
        | ErrorKind::MasterDown => ExecutorError::Unavailable(err.to_string()),
        ErrorKind::InvalidClientConfig => ExecutorError::Config(err.to_string()),
        _ => ExecutorError::Rejected(err.to_string()),
    }
}

/// Decode a script reply into the fixed triple.
pub(crate) fn decode_reply(value: redis::Value) -> Result<RawReply, ExecutorError> {
    let items = match value {
        redis::Value::Array(items) => items,
        other => {
            return Err(ExecutorError::MalformedReply(format!(
                "expected a 3-element array, got {:?}",
                other
            )))
        }
    };

    if items.len() != 3 {
        return Err(ExecutorError::MalformedReply(format!(
            "expected 3 reply elements, got {}",
            items.len()
        )));
    }

    let mut scalars = items.into_iter().map(decode_scalar);
    let mut next = || {
        scalars
            .next()
            .unwrap_or_else(|| Err(ExecutorError::MalformedReply("missing element".into())))
    };

    Ok(RawReply {
        allowed: next()?,
        remaining: next()?,
        reset: next()?,
    })
}

fn decode_scalar(value: redis::Value) -> Result<ReplyValue, ExecutorError> {
    match value {
        redis::Value::Int(v) => Ok(ReplyValue::Int(v)),
        redis::Value::Double(v) => Ok(ReplyValue::Double(v)),
        redis::Value::BulkString(bytes) => String::from_utf8(bytes)
            .map(ReplyValue::Text)
            .map_err(|e| ExecutorError::MalformedReply(format!("invalid UTF-8 in reply: {}", e))),
        redis::Value::SimpleString(s) => Ok(ReplyValue::Text(s)),
        redis::Value::Nil => Ok(ReplyValue::Nil),
        other => Err(ExecutorError::MalformedReply(format!(
            "unsupported reply element: {:?}",
            other
        ))),
    }
}
