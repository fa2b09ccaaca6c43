//! Configuration management for tokengate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TokengateError};
use crate::executor::ExecutorError;

/// Main configuration for a tokengate limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokengateConfig {
    /// Redis connection configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Limiter parameters
    #[serde(default)]
    pub limiter: LimiterConfig,
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Redis URL, e.g. `redis://127.0.0.1:6379/0`
    #[serde(default = "default_url")]
    pub url: String,

    /// Upper bound for establishing a connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound for one command round trip
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }
}

impl BackendConfig {
    /// Configuration for `url` with default timeouts and pool size.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Reject settings no connection could work with. Both executors call
    /// this before building anything.
    pub fn validate(&self) -> std::result::Result<(), ExecutorError> {
        if self.url.is_empty() {
            return Err(ExecutorError::Config("backend url cannot be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ExecutorError::Config("max_connections must be > 0".to_string()));
        }
        if self.connect_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err(ExecutorError::Config("timeouts must be > 0".to_string()));
        }
        Ok(())
    }
}

fn default_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_operation_timeout_ms() -> u64 {
    1000
}

fn default_max_connections() -> usize {
    100
}

/// What to do when Redis cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailStrategy {
    /// Admit the request and report no decision.
    #[default]
    Open,
    /// Surface a backend-unavailable error.
    Closed,
}

impl std::str::FromStr for FailStrategy {
    type Err = TokengateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(FailStrategy::Open),
            "closed" => Ok(FailStrategy::Closed),
            other => Err(TokengateError::Config(format!(
                "fail_strategy must be either 'open' or 'closed', got '{}'",
                other
            ))),
        }
    }
}

/// Which calling convention a limiter serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Blocking,
    Async,
}

/// Limiter parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Tokens added per `per` seconds
    #[serde(default = "default_rate")]
    pub rate: u64,

    /// Refill period in seconds
    #[serde(default = "default_per")]
    pub per: u64,

    /// Burst ceiling; defaults to `rate`
    #[serde(default)]
    pub capacity: Option<u64>,

    /// Key namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub fail_strategy: FailStrategy,

    #[serde(default)]
    pub mode: Mode,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            per: default_per(),
            capacity: None,
            namespace: default_namespace(),
            fail_strategy: FailStrategy::default(),
            mode: Mode::default(),
        }
    }
}

fn default_rate() -> u64 {
    10
}

fn default_per() -> u64 {
    1
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Check a key namespace.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(TokengateError::Config("namespace cannot be empty".to_string()));
    }
    if namespace.chars().any(char::is_whitespace) {
        return Err(TokengateError::Config(format!(
            "namespace '{}' must not contain whitespace",
            namespace
        )));
    }
    Ok(())
}

impl TokengateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TokengateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration layered from an optional YAML file and
    /// `TOKENGATE__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        builder
            .add_source(
                config::Environment::with_prefix("TOKENGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<TokengateConfig>())
            .map_err(|e| TokengateError::Config(format!("Failed to load configuration: {}", e)))
    }

    /// Report configuration errors before anything connects.
    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        crate::algorithm::TokenBucket::new(
            self.limiter.rate,
            self.limiter.per,
            self.limiter.capacity,
        )?;
        validate_namespace(&self.limiter.namespace)
    }
}
