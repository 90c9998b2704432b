//! Redis-backed state store.
//!
//! [`RedisStore`] implements [`StateStore`] on a `deadpool-redis` connection
//! pool. Field maps are Redis hashes, strings are plain keys with `PX`
//! expiry, and the daily quota rule runs as a Lua script so that reset,
//! check and increment happen in one server-side step.
//!
//! Pool checkout and every command are bounded by the configured operation
//! timeout; wrap the store in [`TimeoutStore`](crate::TimeoutStore) as well
//! to put a single deadline on checkout + command.
//!
//! # Example
//!
//! ```no_run
//! use admission_storage::{RedisStore, RedisStoreConfig, StateStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisStoreConfig::builder().url("redis://127.0.0.1:6379/1").build()?;
//! let store = RedisStore::connect(config).await?;
//! store.ping().await?;
//! # Ok(())
//! # }
//! ```

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;
use deadpool_redis::{Config as PoolConfig, Pool, PoolConfig as PoolSizing, Runtime, Timeouts};
use redis::IntoConnectionInfo;
use serde::{Deserialize, Serialize};

use crate::{
    backend::StateStore,
    error::{ConfigError, StoreError, StoreResult},
    retry::{RetryConfig, with_retry},
    timeout::DEFAULT_OPERATION_TIMEOUT,
    types::{FieldMap, QuotaDecision, format_reset_date},
};

/// Default connection pool size.
pub const DEFAULT_POOL_SIZE: usize = 16;

/// Server-side quota rule. Returns `{status, requests_today, daily_limit}`
/// where status is `1` admitted, `0` exhausted, `-1` missing.
const CONSUME_QUOTA_SCRIPT: &str = r"
local key = KEYS[1]
local today = ARGV[1]
if redis.call('EXISTS', key) == 0 then
  return {-1, 0, 0}
end
local used = tonumber(redis.call('HGET', key, 'requests_today') or '0')
local limit = tonumber(redis.call('HGET', key, 'daily_limit') or '0')
if used == nil or limit == nil then
  return redis.error_reply('ERR quota fields are not integers')
end
if redis.call('HGET', key, 'last_reset') ~= today then
  redis.call('HSET', key, 'requests_today', 0, 'last_reset', today)
  used = 0
end
if used >= limit then
  return {0, used, limit}
end
used = redis.call('HINCRBY', key, 'requests_today', 1)
return {1, used, limit}
";

/// Configuration for [`RedisStore`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisStoreConfig {
    /// Connection URL, e.g. `redis://:password@host:6379/1`.
    pub(crate) url: String,

    /// Password applied on top of the URL, for deployments that keep it
    /// out of the URL.
    #[serde(default)]
    pub(crate) password: Option<String>,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_size")]
    pub(crate) pool_size: usize,

    /// Bound for pool checkout, connection creation and each command.
    #[serde(with = "humantime_serde", default = "default_operation_timeout")]
    pub(crate) operation_timeout: Duration,

    /// Retry policy for the initial connection probe.
    #[serde(default)]
    pub(crate) connect_retry: RetryConfig,
}

// The URL may embed a password.
impl std::fmt::Debug for RedisStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStoreConfig")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pool_size", &self.pool_size)
            .field("operation_timeout", &self.operation_timeout)
            .field("connect_retry", &self.connect_retry)
            .finish_non_exhaustive()
    }
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_operation_timeout() -> Duration {
    DEFAULT_OPERATION_TIMEOUT
}

#[bon::bon]
impl RedisStoreConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the URL is empty, the pool size is zero,
    /// or the operation timeout is zero.
    #[builder]
    pub fn new(
        #[builder(into)] url: String,
        #[builder(into)] password: Option<String>,
        #[builder(default = DEFAULT_POOL_SIZE)] pool_size: usize,
        #[builder(default = DEFAULT_OPERATION_TIMEOUT)] operation_timeout: Duration,
        #[builder(default)] connect_retry: RetryConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self { url, password, pool_size, operation_timeout, connect_retry };
        config.validate()?;
        Ok(config)
    }

    /// Checks field ranges; used after deserialization as well.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "url", reason: "must not be empty".into() });
        }
        if self.pool_size == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "pool_size",
                value: "0".to_owned(),
                min: "1".to_owned(),
            });
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "operation_timeout",
                value: "0ms".to_owned(),
                min: "1ms".to_owned(),
            });
        }
        self.connect_retry.validate()
    }

    /// Per-operation deadline.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Maximum pooled connections.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

/// Redis implementation of [`StateStore`].
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    quota_script: redis::Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisStore")
            .field("max_size", &status.max_size)
            .field("available", &status.available)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Builds the pool and probes the server with `PING`, retrying transient
    /// failures per `config.connect_retry`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the pool cannot be built or the server stays
    /// unreachable after all retries.
    #[tracing::instrument(skip(config), fields(pool_size = config.pool_size))]
    pub async fn connect(config: RedisStoreConfig) -> StoreResult<Self> {
        let store = Self::from_config(&config)?;
        with_retry(&config.connect_retry, "store_connect", || store.ping()).await?;
        tracing::info!("shared state store connected");
        Ok(store)
    }

    /// Builds the pool without contacting the server. Connections are
    /// created lazily on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the URL or pool settings are rejected.
    pub fn from_config(config: &RedisStoreConfig) -> StoreResult<Self> {
        let mut pool_config = match config.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => {
                let mut info = config.url.as_str().into_connection_info().map_err(|e| {
                    StoreError::internal_with_source("invalid store configuration", e)
                })?;
                info.redis.password = Some(password.to_owned());
                PoolConfig::from_connection_info(info)
            },
            None => PoolConfig::from_url(config.url.clone()),
        };
        let mut sizing = PoolSizing::new(config.pool_size);
        sizing.timeouts = Timeouts {
            wait: Some(config.operation_timeout),
            create: Some(config.operation_timeout),
            recycle: Some(config.operation_timeout),
        };
        pool_config.pool = Some(sizing);

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::internal_with_source("invalid store configuration", e))?;

        Ok(Self { pool, quota_script: redis::Script::new(CONSUME_QUOTA_SCRIPT) })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool, quota_script: redis::Script::new(CONSUME_QUOTA_SCRIPT) }
    }

    async fn connection(&self) -> StoreResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(StoreError::from)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry.
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get_fields(&self, key: &str) -> StoreResult<FieldMap> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(fields.into_iter().collect())
    }

    async fn set_fields(
        &self,
        key: &str,
        fields: FieldMap,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;

        let mut hset = redis::cmd("HSET");
        hset.arg(key);
        for (field, value) in &fields {
            hset.arg(field).arg(value);
        }

        let mut pipe = redis::pipe();
        pipe.atomic().add_command(hset).ignore();
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
        }
        let (): () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.connection().await?;
        let value: i64 =
            redis::cmd("HINCRBY").arg(key).arg(field).arg(delta).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let (): () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::internal("unexpected PING reply"))
        }
    }

    async fn consume_daily_quota(
        &self,
        key: &str,
        today: NaiveDate,
    ) -> StoreResult<QuotaDecision> {
        let mut conn = self.connection().await?;
        let reply: Vec<i64> = self
            .quota_script
            .key(key)
            .arg(format_reset_date(today))
            .invoke_async(&mut conn)
            .await?;
        decode_quota_reply(&reply)
    }
}

fn decode_quota_reply(reply: &[i64]) -> StoreResult<QuotaDecision> {
    let [status, used, limit] = reply else {
        return Err(StoreError::serialization("quota script returned an unexpected shape"));
    };
    let used = u64::try_from(*used)
        .map_err(|_| StoreError::serialization("negative requests_today counter"))?;
    let limit =
        u64::try_from(*limit).map_err(|_| StoreError::serialization("negative daily_limit"))?;
    match status {
        1 => Ok(QuotaDecision::Admitted { requests_today: used, daily_limit: limit }),
        0 => Ok(QuotaDecision::Exhausted { requests_today: used, daily_limit: limit }),
        -1 => Ok(QuotaDecision::Missing),
        _ => Err(StoreError::serialization("quota script returned an unknown status")),
    }
}
