//! Response cache configuration.

use std::time::Duration;

use admission_storage::{ConfigError, DEFAULT_OPERATION_TIMEOUT};
use serde::{Deserialize, Serialize};

/// Default in-process tier capacity, in entries.
pub const DEFAULT_LOCAL_CAPACITY: u64 = 1000;

/// Default in-process tier TTL.
pub const DEFAULT_LOCAL_TTL: Duration = Duration::from_secs(60 * 60);

/// Default shared tier TTL.
pub const DEFAULT_SHARED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default bound on a single shared tier call.
pub const DEFAULT_SHARED_TIMEOUT: Duration = DEFAULT_OPERATION_TIMEOUT;

/// Prefix of shared tier keys, separating cached responses from identity
/// records in the same store.
pub const SHARED_KEY_PREFIX: &str = "response:";

/// Configuration for [`ResponseCache`](crate::ResponseCache).
///
/// # Validation
///
/// - `local_capacity` must be >= 1
/// - `local_ttl` and `shared_timeout` must be non-zero
/// - `shared_ttl` must be at least `local_ttl`
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use admission_cache::CacheConfig;
/// let config = CacheConfig::builder()
///     .local_capacity(500)
///     .local_ttl(Duration::from_secs(600))
///     .build()
///     .expect("valid config");
/// assert_eq!(config.local_capacity(), 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum in-process entries.
    #[serde(default = "default_local_capacity")]
    local_capacity: u64,

    /// Lifetime of an in-process entry.
    #[serde(with = "humantime_serde", default = "default_local_ttl")]
    local_ttl: Duration,

    /// Lifetime of a shared entry.
    #[serde(with = "humantime_serde", default = "default_shared_ttl")]
    shared_ttl: Duration,

    /// Bound on each shared tier read or write.
    #[serde(with = "humantime_serde", default = "default_shared_timeout")]
    shared_timeout: Duration,
}

fn default_local_capacity() -> u64 {
    DEFAULT_LOCAL_CAPACITY
}

fn default_local_ttl() -> Duration {
    DEFAULT_LOCAL_TTL
}

fn default_shared_ttl() -> Duration {
    DEFAULT_SHARED_TTL
}

fn default_shared_timeout() -> Duration {
    DEFAULT_SHARED_TIMEOUT
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_capacity: DEFAULT_LOCAL_CAPACITY,
            local_ttl: DEFAULT_LOCAL_TTL,
            shared_ttl: DEFAULT_SHARED_TTL,
            shared_timeout: DEFAULT_SHARED_TIMEOUT,
        }
    }
}

#[bon::bon]
impl CacheConfig {
    /// Creates a validated cache configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first invalid field.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_LOCAL_CAPACITY)] local_capacity: u64,
        #[builder(default = DEFAULT_LOCAL_TTL)] local_ttl: Duration,
        #[builder(default = DEFAULT_SHARED_TTL)] shared_ttl: Duration,
        #[builder(default = DEFAULT_SHARED_TIMEOUT)] shared_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { local_capacity, local_ttl, shared_ttl, shared_timeout };
        config.validate()?;
        Ok(config)
    }

    /// Checks field ranges; used after deserialization as well.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_capacity == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "local_capacity",
                value: "0".to_owned(),
                min: "1".to_owned(),
            });
        }
        for (field, value) in [("local_ttl", self.local_ttl), ("shared_timeout", self.shared_timeout)]
        {
            if value.is_zero() {
                return Err(ConfigError::BelowMinimum {
                    field,
                    value: "0ms".to_owned(),
                    min: "1ms".to_owned(),
                });
            }
        }
        if self.shared_ttl < self.local_ttl {
            return Err(ConfigError::Invalid {
                field: "shared_ttl",
                reason: format!(
                    "{}s is shorter than local_ttl {}s",
                    self.shared_ttl.as_secs(),
                    self.local_ttl.as_secs()
                ),
            });
        }
        Ok(())
    }

    /// Maximum in-process entries.
    #[must_use]
    pub fn local_capacity(&self) -> u64 {
        self.local_capacity
    }

    /// Lifetime of an in-process entry.
    #[must_use]
    pub fn local_ttl(&self) -> Duration {
        self.local_ttl
    }

    /// Lifetime of a shared entry.
    #[must_use]
    pub fn shared_ttl(&self) -> Duration {
        self.shared_ttl
    }

    /// Bound on each shared tier call.
    #[must_use]
    pub fn shared_timeout(&self) -> Duration {
        self.shared_timeout
    }
}
