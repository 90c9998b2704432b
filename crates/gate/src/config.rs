//! Process configuration.
//!
//! [`GateConfig`] gathers everything a serving process needs at startup:
//! store connection, privileged keys, the assertion signing seed, cache
//! sizing and timeouts. It deserializes from a config file section or is
//! read from the environment with [`GateConfig::from_env`].

use std::time::Duration;

use admission_authn::{AssertionConfig, AssertionKeyPair, PrivilegedKeys};
use admission_cache::CacheConfig;
use admission_storage::{ConfigError, DEFAULT_OPERATION_TIMEOUT, RedisStoreConfig, RetryConfig};
use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};

use crate::{
    engine::DEFAULT_GENERATION_TIMEOUT,
    gate::{DEFAULT_QUOTA_FAILURE_POLICY, FailurePolicy},
};

/// Store URL used when `REDIS_URL` is unset.
pub const DEFAULT_REDIS_URL: &str = "redis://redis:6379/1";

/// Top-level configuration of a serving process.
///
/// Secrets (the store password, privileged keys, the signing seed) are
/// never printed by `Debug`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// Shared store URL.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Store password, when kept out of the URL.
    #[serde(default)]
    pub redis_password: Option<String>,

    /// Keys resolving to the `admin` identity.
    #[serde(default)]
    pub admin_keys: Vec<String>,

    /// Keys resolving to the `api_user` identity.
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Keys resolving to the `readonly_user` identity.
    #[serde(default)]
    pub read_only_keys: Vec<String>,

    /// Base64url Ed25519 seed for signed assertions. Assertions are rejected
    /// when unset.
    #[serde(default)]
    pub assertion_signing_key: Option<String>,

    /// Assertion issuance settings.
    #[serde(default)]
    pub assertion: AssertionConfig,

    /// Outcome when the quota step cannot reach the store.
    #[serde(default)]
    pub quota_failure_policy: FailurePolicy,

    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Bound on every store operation.
    #[serde(with = "humantime_serde", default = "default_store_timeout")]
    pub store_timeout: Duration,

    /// Bound on a single generation.
    #[serde(with = "humantime_serde", default = "default_generation_timeout")]
    pub generation_timeout: Duration,

    /// Retry policy for the startup store probe and engine warm-up.
    #[serde(default)]
    pub connect_retry: RetryConfig,
}

fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_owned()
}

fn default_store_timeout() -> Duration {
    DEFAULT_OPERATION_TIMEOUT
}

fn default_generation_timeout() -> Duration {
    DEFAULT_GENERATION_TIMEOUT
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            redis_password: None,
            admin_keys: Vec::new(),
            api_keys: Vec::new(),
            read_only_keys: Vec::new(),
            assertion_signing_key: None,
            assertion: AssertionConfig::default(),
            quota_failure_policy: DEFAULT_QUOTA_FAILURE_POLICY,
            cache: CacheConfig::default(),
            store_timeout: DEFAULT_OPERATION_TIMEOUT,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            connect_retry: RetryConfig::default(),
        }
    }
}

impl std::fmt::Debug for GateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateConfig")
            .field("redis_password", &self.redis_password.as_ref().map(|_| "<redacted>"))
            .field("admin_keys", &self.admin_keys.len())
            .field("api_keys", &self.api_keys.len())
            .field("read_only_keys", &self.read_only_keys.len())
            .field("assertion_signing_key", &self.assertion_signing_key.as_ref().map(|_| "<redacted>"))
            .field("assertion", &self.assertion)
            .field("quota_failure_policy", &self.quota_failure_policy)
            .field("cache", &self.cache)
            .field("store_timeout", &self.store_timeout)
            .field("generation_timeout", &self.generation_timeout)
            .field("connect_retry", &self.connect_retry)
            .finish_non_exhaustive()
    }
}

impl GateConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `REDIS_URL` | `redis_url` |
    /// | `REDIS_PASSWORD` | `redis_password` |
    /// | `ADMIN_KEYS`, `API_KEYS`, `READ_ONLY_KEYS` | comma-separated privileged keys |
    /// | `ASSERTION_SIGNING_KEY` | `assertion_signing_key` |
    /// | `ASSERTION_TTL` | `assertion.ttl`, e.g. `12h` |
    /// | `QUOTA_FAILURE_POLICY` | `closed` or `open` |
    ///
    /// Unset or empty variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed or the result
    /// fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through
    /// `lookup`.
    ///
    /// # Errors
    ///
    /// As [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = var("REDIS_URL") {
            config.redis_url = url;
        }
        config.redis_password = var("REDIS_PASSWORD");
        config.admin_keys = split_keys(var("ADMIN_KEYS").as_deref());
        config.api_keys = split_keys(var("API_KEYS").as_deref());
        config.read_only_keys = split_keys(var("READ_ONLY_KEYS").as_deref());
        config.assertion_signing_key = var("ASSERTION_SIGNING_KEY");
        if let Some(raw) = var("ASSERTION_TTL") {
            let ttl = humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::Invalid {
                field: "ASSERTION_TTL",
                reason: e.to_string(),
            })?;
            config.assertion = AssertionConfig::builder().ttl(ttl).build()?;
        }
        if let Some(raw) = var("QUOTA_FAILURE_POLICY") {
            config.quota_failure_policy = raw.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks every nested section; used after deserialization as well.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_timeout.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "store_timeout",
                value: "0ms".to_owned(),
                min: "1ms".to_owned(),
            });
        }
        if self.generation_timeout.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "generation_timeout",
                value: "0ms".to_owned(),
                min: "1ms".to_owned(),
            });
        }
        self.assertion.validate()?;
        self.cache.validate()?;
        self.connect_retry.validate()?;
        self.store_config().map(|_| ())
    }

    /// Store connection settings derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the URL is empty.
    pub fn store_config(&self) -> Result<RedisStoreConfig, ConfigError> {
        RedisStoreConfig::builder()
            .url(self.redis_url.as_str())
            .maybe_password(self.redis_password.clone())
            .operation_timeout(self.store_timeout)
            .connect_retry(self.connect_retry.clone())
            .build()
    }

    /// The privileged key tiers.
    #[must_use]
    pub fn privileged_keys(&self) -> PrivilegedKeys {
        PrivilegedKeys::from_tiers(
            self.admin_keys.iter().map(String::as_str),
            self.api_keys.iter().map(String::as_str),
            self.read_only_keys.iter().map(String::as_str),
        )
    }

    /// The assertion key pair, if a signing seed is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the seed is not a base64url 32-byte value.
    pub fn assertion_keys(&self) -> Result<Option<AssertionKeyPair>, ConfigError> {
        self.assertion_signing_key.as_deref().map(AssertionKeyPair::from_base64url).transpose()
    }
}

fn split_keys(list: Option<&str>) -> Vec<String> {
    list.map(|list| {
        list.split(',').map(str::trim).filter(|key| !key.is_empty()).map(str::to_owned).collect()
    })
    .unwrap_or_default()
}
