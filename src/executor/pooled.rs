//! Async Redis executor over a deadpool connection pool.

use async_trait::async_trait;
use deadpool_redis::{
    Config as PoolSettings, Connection, Pool, PoolConfig, PoolError, Runtime, Timeouts,
};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    classify, decode_reply, eval_cmd, evalsha_cmd, is_noscript, AsyncScriptExecutor,
    ExecutorError, RawReply, ScriptCache,
};
use crate::algorithm::LuaScript;
use crate::config::BackendConfig;

/// Async executor backed by a `deadpool-redis` pool.
pub struct AsyncRedisExecutor {
    pool: Pool,
    operation_timeout: Duration,
    scripts: ScriptCache,
}

impl AsyncRedisExecutor {
    /// Create the pool. Connections are opened lazily on first use, so
    /// construction does no I/O.
    pub fn new(config: &BackendConfig) -> Result<Self, ExecutorError> {
        config.validate()?;
        let mut settings = PoolSettings::from_url(config.url.clone());

        let mut timeouts = Timeouts::new();
        timeouts.wait = Some(config.connect_timeout());
        timeouts.create = Some(config.connect_timeout());
        timeouts.recycle = Some(config.operation_timeout());

        let mut pool_config = PoolConfig::new(config.max_connections);
        pool_config.timeouts = timeouts;
        settings.pool = Some(pool_config);

        let pool = settings
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ExecutorError::Config(format!("Failed to create Redis pool: {}", e)))?;

        info!(
            max_connections = config.max_connections,
            "Async Redis connection pool created"
        );

        Ok(Self {
            pool,
            operation_timeout: config.operation_timeout(),
            scripts: ScriptCache::new(),
        })
    }

    /// The script registration cache.
    pub fn scripts(&self) -> &ScriptCache {
        &self.scripts
    }

    async fn checkout(&self) -> Result<Connection, ExecutorError> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Backend(err) => classify(err),
            PoolError::Timeout(kind) => {
                ExecutorError::Unavailable(format!("Timed out waiting for connection: {:?}", kind))
            }
            other => ExecutorError::Unavailable(format!("Failed to get Redis connection: {}", other)),
        })
    }

    /// Bound one round trip by the operation timeout.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, ExecutorError> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(ExecutorError::Unavailable(format!(
                "Redis operation timed out after {}ms",
                self.operation_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl AsyncScriptExecutor for AsyncRedisExecutor {
    async fn execute(
        &self,
        script: &LuaScript,
        keys: &[String],
        args: &[i64],
    ) -> Result<RawReply, ExecutorError> {
        let mut conn = self.checkout().await?;

        let value = self
            .bounded(async {
                if self.scripts.is_registered(script.hash()) {
                    let attempt: redis::RedisResult<redis::Value> =
                        evalsha_cmd(script, keys, args).query_async(&mut *conn).await;
                    match attempt {
                        Err(err) if is_noscript(&err) => {
                            warn!(hash = %script.hash(), "Script no longer known to Redis, re-registering");
                            self.scripts.clear();
                        }
                        other => return other,
                    }
                }

                // EVAL runs the script and leaves it registered under its hash.
                let value: redis::Value = eval_cmd(script, keys, args)
                    .query_async(&mut *conn)
                    .await?;
                self.scripts.mark_registered(script.hash());
                Ok(value)
            })
            .await?;

        decode_reply(value)
    }

    async fn health_check(&self) -> bool {
        let result: Result<String, ExecutorError> = async {
            let mut conn = self.checkout().await?;
            self.bounded(redis::cmd("PING").query_async(&mut *conn)).await
        }
        .await;

        match result {
            Ok(pong) => pong == "PONG",
            Err(e) => {
                debug!(error = %e, "Redis health check failed");
                false
            }
        }
    }

    async fn server_time(&self) -> Result<f64, ExecutorError> {
        let mut conn = self.checkout().await?;
        let (secs, micros): (u64, u64) = self
            .bounded(redis::cmd("TIME").query_async(&mut *conn))
            .await?;
        Ok(secs as f64 + micros as f64 / 1_000_000.0)
    }
}
