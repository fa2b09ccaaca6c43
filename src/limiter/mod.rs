//! The rate limiter: validates input, runs the algorithm through an executor
//! and turns the reply into a decision.
//!
//! The limiter holds no per-request state and takes no locks. Concurrent
//! checks against the same bucket are serialized by Redis, which evaluates
//! each script atomically.

mod decision;
mod identity;
mod observer;

pub use decision::{Admission, RateLimitInfo};
pub use identity::{validate_identity, BucketKey, Identity, MAX_IDENTITY_LEN};
pub use observer::{DecisionObserver, ErrorObserver, IdentityMapper, Observers};

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::algorithm::{Algorithm, TokenBucket};
use crate::config::{validate_namespace, FailStrategy, Mode, TokengateConfig};
use crate::error::{Result, TokengateError};
use crate::executor::{
    AsyncRedisExecutor, AsyncScriptExecutor, ExecutorError, RawReply, RedisExecutor,
    ScriptExecutor,
};

/// The executor a limiter is bound to. Fixes its calling convention.
#[derive(Clone)]
enum Backend {
    Blocking(Arc<dyn ScriptExecutor>),
    Async(Arc<dyn AsyncScriptExecutor>),
}

impl Backend {
    fn mode(&self) -> Mode {
        match self {
            Backend::Blocking(_) => Mode::Blocking,
            Backend::Async(_) => Mode::Async,
        }
    }
}

/// Key and arguments for one check.
struct Prepared {
    key: String,
    args: Vec<i64>,
}

/// Distributed token-bucket rate limiter.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Clone)]
pub struct RateLimiter {
    algorithm: Arc<dyn Algorithm>,
    namespace: String,
    fail_strategy: FailStrategy,
    identity_mapper: Option<IdentityMapper>,
    observers: Observers,
    backend: Backend,
}

impl RateLimiter {
    /// Start building a limiter admitting `rate` requests per `per` seconds.
    pub fn builder(rate: u64, per: u64) -> RateLimiterBuilder {
        RateLimiterBuilder::new(rate, per)
    }

    /// Build a limiter and its Redis executor from configuration.
    ///
    /// The configured [`Mode`] selects the blocking or the async executor.
    pub fn from_config(config: &TokengateConfig) -> Result<Self> {
        config.validate()?;

        let limiter = &config.limiter;
        let mut builder = Self::builder(limiter.rate, limiter.per)
            .namespace(limiter.namespace.clone())
            .fail_strategy(limiter.fail_strategy);
        if let Some(capacity) = limiter.capacity {
            builder = builder.capacity(capacity);
        }

        match limiter.mode {
            Mode::Blocking => builder.build(Arc::new(RedisExecutor::new(&config.backend)?)),
            Mode::Async => builder.build_async(Arc::new(AsyncRedisExecutor::new(&config.backend)?)),
        }
    }

    /// Calling convention this limiter accepts.
    pub fn mode(&self) -> Mode {
        self.backend.mode()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn fail_strategy(&self) -> FailStrategy {
        self.fail_strategy
    }

    /// The configured bucket capacity.
    pub fn limit(&self) -> u64 {
        self.algorithm.limit()
    }

    /// Bucket key an identity maps to, after identity mapping and hashing.
    pub fn key_for(&self, identity: &str) -> Result<BucketKey> {
        validate_identity(identity)?;
        let resolved = match &self.identity_mapper {
            Some(mapper) => {
                let resolved = mapper(identity);
                validate_identity(&resolved)?;
                resolved
            }
            None => identity.to_string(),
        };
        Ok(BucketKey::new(&self.namespace, self.algorithm.key_tag(), &resolved))
    }

    /// Check and consume `cost` tokens for `identity`.
    ///
    /// Only valid on a limiter built with a blocking executor.
    pub fn decide(&self, identity: &str, cost: u64) -> Result<Admission> {
        let executor = match &self.backend {
            Backend::Blocking(executor) => executor,
            Backend::Async(_) => {
                return Err(TokengateError::CallingConvention(
                    "decide() cannot be used on an async limiter; use decide_async()".to_string(),
                ))
            }
        };

        let prepared = self.prepare(identity, cost)?;
        let outcome = executor.execute(
            self.algorithm.script(),
            std::slice::from_ref(&prepared.key),
            &prepared.args,
        );
        self.settle(identity, cost, &prepared.key, outcome)
    }

    /// Check and consume `cost` tokens for `identity`.
    ///
    /// Only valid on a limiter built with an async executor.
    pub async fn decide_async(&self, identity: &str, cost: u64) -> Result<Admission> {
        let executor = match &self.backend {
            Backend::Async(executor) => executor,
            Backend::Blocking(_) => {
                return Err(TokengateError::CallingConvention(
                    "decide_async() requires an async limiter; use decide()".to_string(),
                ))
            }
        };

        let prepared = self.prepare(identity, cost)?;
        let outcome = executor
            .execute(
                self.algorithm.script(),
                std::slice::from_ref(&prepared.key),
                &prepared.args,
            )
            .await;
        self.settle(identity, cost, &prepared.key, outcome)
    }

    /// Whether Redis answers. Blocking limiters only.
    pub fn health_check(&self) -> Result<bool> {
        match &self.backend {
            Backend::Blocking(executor) => Ok(executor.health_check()),
            Backend::Async(_) => Err(TokengateError::CallingConvention(
                "health_check() cannot be used on an async limiter".to_string(),
            )),
        }
    }

    /// Whether Redis answers. Async limiters only.
    pub async fn health_check_async(&self) -> Result<bool> {
        match &self.backend {
            Backend::Async(executor) => Ok(executor.health_check().await),
            Backend::Blocking(_) => Err(TokengateError::CallingConvention(
                "health_check_async() requires an async limiter".to_string(),
            )),
        }
    }

    /// Redis clock in seconds. For observability only; decisions never use it.
    pub fn server_time(&self) -> Result<f64> {
        match &self.backend {
            Backend::Blocking(executor) => Ok(executor.server_time()?),
            Backend::Async(_) => Err(TokengateError::CallingConvention(
                "server_time() cannot be used on an async limiter".to_string(),
            )),
        }
    }

    /// Redis clock in seconds. For observability only; decisions never use it.
    pub async fn server_time_async(&self) -> Result<f64> {
        match &self.backend {
            Backend::Async(executor) => Ok(executor.server_time().await?),
            Backend::Blocking(_) => Err(TokengateError::CallingConvention(
                "server_time_async() requires an async limiter".to_string(),
            )),
        }
    }

    fn prepare(&self, identity: &str, cost: u64) -> Result<Prepared> {
        if cost == 0 {
            return Err(TokengateError::Config("cost must be > 0".to_string()));
        }
        if i64::try_from(cost).is_err() {
            return Err(TokengateError::Config(format!("cost {} is too large", cost)));
        }

        let key = self.key_for(identity)?.to_string_key();
        let mut args = self.algorithm.static_args();
        args.extend(self.algorithm.dynamic_args(cost));

        Ok(Prepared { key, args })
    }

    fn settle(
        &self,
        identity: &str,
        cost: u64,
        key: &str,
        outcome: std::result::Result<RawReply, ExecutorError>,
    ) -> Result<Admission> {
        let reply = match outcome {
            Ok(reply) => reply,
            Err(err) => return self.fail(key, err.into()),
        };

        let info = match RateLimitInfo::from_reply(&reply, self.algorithm.limit(), cost) {
            Ok(info) => info,
            Err(err) => {
                error!(key = %key, reply = ?reply, error = %err, "Unexpected script reply");
                self.observers.errored(&err);
                return Err(err);
            }
        };

        debug!(
            key = %key,
            allowed = info.allowed,
            remaining = info.remaining,
            reset = info.reset,
            cost = cost,
            "Rate limit decision"
        );

        self.observers.decided(identity, &info);
        Ok(Admission::decided(info))
    }

    fn fail(&self, key: &str, err: TokengateError) -> Result<Admission> {
        self.observers.errored(&err);

        if !err.is_backend_unavailable() {
            error!(key = %key, error = %err, "Rate limit check failed");
            return Err(err);
        }

        match self.fail_strategy {
            FailStrategy::Open => {
                warn!(key = %key, error = %err, "Backend unavailable, failing open");
                Ok(Admission::failed_open())
            }
            FailStrategy::Closed => {
                warn!(key = %key, error = %err, "Backend unavailable, failing closed");
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("algorithm", &self.algorithm)
            .field("namespace", &self.namespace)
            .field("fail_strategy", &self.fail_strategy)
            .field("mode", &self.mode())
            .field("identity_mapper", &self.identity_mapper.is_some())
            .field("observers", &self.observers)
            .finish()
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    rate: u64,
    per: u64,
    capacity: Option<u64>,
    algorithm: Option<Arc<dyn Algorithm>>,
    namespace: String,
    fail_strategy: FailStrategy,
    identity_mapper: Option<IdentityMapper>,
    observers: Observers,
}

impl RateLimiterBuilder {
    fn new(rate: u64, per: u64) -> Self {
        Self {
            rate,
            per,
            capacity: None,
            algorithm: None,
            namespace: "default".to_string(),
            fail_strategy: FailStrategy::default(),
            identity_mapper: None,
            observers: Observers::default(),
        }
    }

    /// Burst ceiling. Defaults to `rate`.
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Use a different algorithm instead of the token bucket described by
    /// `rate`, `per` and `capacity`.
    pub fn algorithm(mut self, algorithm: Arc<dyn Algorithm>) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Behavior when Redis is unreachable. Defaults to [`FailStrategy::Open`].
    pub fn fail_strategy(mut self, fail_strategy: FailStrategy) -> Self {
        self.fail_strategy = fail_strategy;
        self
    }

    /// Transform identities before they are hashed into keys.
    pub fn identity_mapper(mut self, mapper: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.identity_mapper = Some(Arc::new(mapper));
        self
    }

    pub fn on_admit(
        mut self,
        hook: impl Fn(&str, &RateLimitInfo) + Send + Sync + 'static,
    ) -> Self {
        self.observers.on_admit = Some(Arc::new(hook));
        self
    }

    pub fn on_reject(
        mut self,
        hook: impl Fn(&str, &RateLimitInfo) + Send + Sync + 'static,
    ) -> Self {
        self.observers.on_reject = Some(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&TokengateError) + Send + Sync + 'static) -> Self {
        self.observers.on_error = Some(Arc::new(hook));
        self
    }

    /// Finish with a blocking executor; the limiter accepts only `decide`.
    pub fn build<E: ScriptExecutor + 'static>(self, executor: Arc<E>) -> Result<RateLimiter> {
        self.finish(Backend::Blocking(executor))
    }

    /// Finish with an async executor; the limiter accepts only `decide_async`.
    pub fn build_async<E: AsyncScriptExecutor + 'static>(
        self,
        executor: Arc<E>,
    ) -> Result<RateLimiter> {
        self.finish(Backend::Async(executor))
    }

    fn finish(self, backend: Backend) -> Result<RateLimiter> {
        validate_namespace(&self.namespace)?;
        let algorithm = match self.algorithm {
            Some(algorithm) => algorithm,
            None => Arc::new(TokenBucket::new(self.rate, self.per, self.capacity)?),
        };

        debug!(
            algorithm = ?algorithm,
            namespace = %self.namespace,
            fail_strategy = ?self.fail_strategy,
            mode = ?backend.mode(),
            "Rate limiter created"
        );

        Ok(RateLimiter {
            algorithm,
            namespace: self.namespace,
            fail_strategy: self.fail_strategy,
            identity_mapper: self.identity_mapper,
            observers: self.observers,
            backend,
        })
    }
}
