//! Deterministic two-tier response cache for the admission core.
//!
//! Generated responses are keyed by a [`Fingerprint`] of the request
//! parameters and kept in two tiers:
//!
//! ```text
//! lookup(fp) ──▶ in-process (moka, 1h) ──hit──▶ text
//!                    │ miss
//!                    ▼
//!               shared store (24h) ──hit──▶ copy to in-process ──▶ text
//!                    │ miss / error / timeout
//!                    ▼
//!                  None
//! ```
//!
//! Only the in-process tier is authoritative for this process; the shared
//! tier is an optimization and its failures never surface to callers.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use admission_cache::{CacheTier, GenerationParams, ResponseCache};
//! use admission_storage::MemoryStore;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let cache = ResponseCache::builder().shared(Arc::new(MemoryStore::new())).build();
//! let params = GenerationParams {
//!     prompt: "Explain borrowing".into(),
//!     max_tokens: 128,
//!     temperature: 0.1,
//!     top_p: 0.95,
//! };
//! let fp = params.fingerprint();
//!
//! cache.store(&fp, "References without ownership.").await;
//! let hit = cache.lookup(&fp).await.unwrap();
//! assert_eq!(hit.tier, CacheTier::Local);
//! # });
//! ```
//!
//! # Feature Flags
//!
//! - **`failpoints`**: Activates the `cache-shared-get` and `cache-shared-put` injection points.

#![deny(unsafe_code)]

pub mod config;
pub mod fingerprint;
pub mod stats;
pub mod tiered;

pub use config::{
    CacheConfig, DEFAULT_LOCAL_CAPACITY, DEFAULT_LOCAL_TTL, DEFAULT_SHARED_TIMEOUT,
    DEFAULT_SHARED_TTL, SHARED_KEY_PREFIX,
};
pub use fingerprint::{Fingerprint, GenerationParams};
pub use stats::CacheStatsSnapshot;
pub use tiered::{CacheOutcome, CacheTier, CachedResponse, ResponseCache, shared_key};
