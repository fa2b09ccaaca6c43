//! Blocking Redis executor.

use parking_lot::Mutex;
use redis::{Client, Connection, ConnectionLike};
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::{
    classify, decode_reply, eval_cmd, evalsha_cmd, is_noscript, ExecutorError, RawReply,
    ScriptCache, ScriptExecutor,
};
use crate::algorithm::LuaScript;
use crate::config::BackendConfig;

/// Blocking executor backed by a `redis::Client`.
///
/// Idle connections are kept in a small stash so concurrent callers each get
/// their own connection without reconnecting on every call. A connection that
/// failed with an availability error is dropped instead of being reused, and a
/// stashed connection must answer PING before it is handed out again.
pub struct RedisExecutor {
    client: Client,
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
    connect_timeout: Duration,
    operation_timeout: Duration,
    scripts: ScriptCache,
}

impl RedisExecutor {
    /// Create an executor. No connection is opened until the first call.
    pub fn new(config: &BackendConfig) -> Result<Self, ExecutorError> {
        config.validate()?;
        let client = Client::open(config.url.as_str())
            .map_err(|e| ExecutorError::Config(format!("Invalid Redis URL: {}", e)))?;

        debug!(
            max_connections = config.max_connections,
            connect_timeout_ms = config.connect_timeout_ms,
            operation_timeout_ms = config.operation_timeout_ms,
            "Blocking Redis executor created"
        );

        Ok(Self {
            client,
            idle: Mutex::new(Vec::new()),
            max_idle: config.max_connections,
            connect_timeout: config.connect_timeout(),
            operation_timeout: config.operation_timeout(),
            scripts: ScriptCache::new(),
        })
    }

    /// The script registration cache.
    pub fn scripts(&self) -> &ScriptCache {
        &self.scripts
    }

    fn checkout(&self) -> Result<Connection, ExecutorError> {
        loop {
            let stashed = self.idle.lock().pop();
            let Some(mut conn) = stashed else { break };
            if conn.is_open() && conn.check_connection() {
                return Ok(conn);
            }
            debug!("Discarding stale Redis connection");
        }

        let conn = self
            .client
            .get_connection_with_timeout(self.connect_timeout)
            .map_err(classify)?;
        conn.set_read_timeout(Some(self.operation_timeout))
            .map_err(classify)?;
        conn.set_write_timeout(Some(self.operation_timeout))
            .map_err(classify)?;
        trace!("Opened Redis connection");
        Ok(conn)
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    /// Run `op` on a pooled connection and classify its failure.
    fn run<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
    ) -> Result<T, ExecutorError> {
        let mut conn = self.checkout()?;
        match op(&mut conn) {
            Ok(value) => {
                self.checkin(conn);
                Ok(value)
            }
            Err(err) => {
                let err = classify(err);
                if !matches!(err, ExecutorError::Unavailable(_)) {
                    self.checkin(conn);
                }
                Err(err)
            }
        }
    }
}

impl ScriptExecutor for RedisExecutor {
    fn execute(
        &self,
        script: &LuaScript,
        keys: &[String],
        args: &[i64],
    ) -> Result<RawReply, ExecutorError> {
        let value = self.run(|conn| {
            if self.scripts.is_registered(script.hash()) {
                match evalsha_cmd(script, keys, args).query::<redis::Value>(&mut *conn) {
                    Err(err) if is_noscript(&err) => {
                        warn!(hash = %script.hash(), "Script no longer known to Redis, re-registering");
                        self.scripts.clear();
                    }
                    other => return other,
                }
            }

            // EVAL runs the script and leaves it registered under its hash.
            let value = eval_cmd(script, keys, args).query::<redis::Value>(conn)?;
            self.scripts.mark_registered(script.hash());
            Ok(value)
        })?;

        decode_reply(value)
    }

    fn health_check(&self) -> bool {
        match self.run(|conn| redis::cmd("PING").query::<String>(conn)) {
            Ok(pong) => pong == "PONG",
            Err(e) => {
                debug!(error = %e, "Redis health check failed");
                false
            }
        }
    }

    fn server_time(&self) -> Result<f64, ExecutorError> {
        let (secs, micros) = self.run(|conn| redis::cmd("TIME").query::<(u64, u64)>(conn))?;
        Ok(secs as f64 + micros as f64 / 1_000_000.0)
    }
}
