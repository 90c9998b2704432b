//! Shared state store abstraction for the admission core.
//!
//! This crate provides the [`StateStore`] trait that the credential
//! verifier, quota ledger and response cache use to reach the networked
//! key-value store. Every process serving requests shares one store; all
//! cross-process coordination happens through the store's own atomic
//! operations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │   CredentialVerifier │ QuotaLedger │ ResponseCache       │
//! ├──────────────────────────────────────────────────────────┤
//! │                 admission-storage                        │
//! │                StateStore trait                          │
//! │  (field maps, strings, increment, TTL, ping, quota)      │
//! ├──────────────────────────────────────────────────────────┤
//! │              TimeoutStore (deadline per op)              │
//! ├──────────────┬───────────────────────────────────────────┤
//! │ MemoryStore  │              RedisStore                   │
//! │  (testing)   │            (production)                   │
//! └──────────────┴───────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use admission_storage::{FieldMap, MemoryStore, QuotaDecision, StateStore};
//! use chrono::NaiveDate;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new();
//!
//!     let mut record = FieldMap::new();
//!     record.insert("daily_limit".into(), "2".into());
//!     record.insert("requests_today".into(), "0".into());
//!     record.insert("last_reset".into(), "2024-03-01".into());
//!     store.set_fields("apikey:abc", record, None).await?;
//!
//!     let today = NaiveDate::from_ymd_opt(2024, 3, 1).ok_or("bad date")?;
//!     let decision = store.consume_daily_quota("apikey:abc", today).await?;
//!     assert_eq!(decision, QuotaDecision::Admitted { requests_today: 1, daily_limit: 2 });
//!     Ok(())
//! }
//! ```
//!
//! # Available Stores
//!
//! | Store | Use Case | Persistence |
//! |-------|----------|-------------|
//! | [`MemoryStore`] | Tests, single-process development | No |
//! | [`RedisStore`] | Production | Yes |
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with store wrappers for tests (stalling,
//!   failing and counting stores).
//! - **`failpoints`**: Activates `fail` injection points.

#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod memory;
pub mod redis;
pub mod retry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod timeout;
pub mod types;

pub use backend::StateStore;
pub use error::{BoxError, ConfigError, StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis::{RedisStore, RedisStoreConfig};
pub use retry::{RetryConfig, Transient, with_retry};
pub use timeout::{DEFAULT_OPERATION_TIMEOUT, TimeoutStore};
pub use types::{
    FIELD_DAILY_LIMIT, FIELD_LAST_RESET, FIELD_REQUESTS_TODAY, FieldMap, QuotaDecision,
    format_reset_date,
};
