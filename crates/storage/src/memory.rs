//! In-memory state store implementation.
//!
//! [`MemoryStore`] implements [`StateStore`] on a `HashMap` guarded by a
//! [`parking_lot::RwLock`]. It backs unit and integration tests and
//! single-process development setups.
//!
//! # Features
//!
//! - **Thread-safe**: one lock covers data and expiry, so compound operations are atomic
//! - **TTL support**: expired keys are invisible immediately and reclaimed by a background task
//! - **Redis-compatible typing**: a key holds either a string or a field map; using the wrong
//!   accessor fails like Redis' `WRONGTYPE`
//!
//! # Limitations
//!
//! - Data is not persisted; everything is lost when the process exits
//! - Not shared between processes, so it cannot serve as a real shared tier

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::Instant, time::sleep};

use crate::{
    backend::StateStore,
    error::{StoreError, StoreResult},
    types::{
        FIELD_DAILY_LIMIT, FIELD_LAST_RESET, FIELD_REQUESTS_TODAY, FieldMap, QuotaDecision,
        format_reset_date,
    },
};

/// How often the background task sweeps expired keys.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // Best-effort signal; the receiver may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Fields(FieldMap),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

fn wrong_type() -> StoreError {
    StoreError::internal("operation against a key holding the wrong kind of value")
}

fn parse_counter(fields: &FieldMap, name: &str) -> StoreResult<u64> {
    match fields.get(name) {
        None => Ok(0),
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| StoreError::serialization(format!("field '{name}' is not an integer"))),
    }
}

/// In-memory [`StateStore`].
///
/// # Cloning
///
/// Cheaply cloneable; all clones share the same data.
///
/// # Shutdown
///
/// The TTL cleanup task stops when the last clone is dropped, or earlier via
/// [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, Entry>>>,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("keys", &self.data.read().len()).finish()
    }
}

impl MemoryStore {
    /// Creates an empty store and spawns its TTL cleanup task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let store = Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        // The task holds only a weak handle so it never keeps the data alive.
        let data = Arc::downgrade(&store.data);
        tokio::spawn(async move {
            Self::cleanup_expired_keys(data, shutdown_rx).await;
        });

        store
    }

    async fn cleanup_expired_keys(
        data: std::sync::Weak<RwLock<HashMap<String, Entry>>>,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        loop {
            select! {
                _ = sleep(CLEANUP_INTERVAL) => {}
                _ = shutdown_rx.changed() => {
                    return;
                }
            }

            let Some(data) = data.upgrade() else {
                return;
            };
            let now = Instant::now();
            data.write().retain(|_, entry| entry.is_live(now));
        }
    }

    /// Explicitly signals the background cleanup task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.read().values().filter(|e| e.is_live(now)).count()
    }

    /// Returns `true` when no live keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every key.
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_fields(&self, key: &str) -> StoreResult<FieldMap> {
        let data = self.data.read();
        match data.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => match &entry.value {
                Value::Fields(fields) => Ok(fields.clone()),
                Value::Text(_) => Err(wrong_type()),
            },
            _ => Ok(FieldMap::new()),
        }
    }

    async fn set_fields(
        &self,
        key: &str,
        fields: FieldMap,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let now = Instant::now();
        let mut data = self.data.write();

        let entry = data
            .entry(key.to_owned())
            .and_modify(|entry| {
                if !entry.is_live(now) {
                    *entry = Entry { value: Value::Fields(FieldMap::new()), expires_at: None };
                }
            })
            .or_insert_with(|| Entry { value: Value::Fields(FieldMap::new()), expires_at: None });

        let Value::Fields(existing) = &mut entry.value else {
            return Err(wrong_type());
        };
        existing.extend(fields);
        if let Some(ttl) = ttl {
            entry.expires_at = Some(now + ttl);
        }

        Ok(())
    }

    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let now = Instant::now();
        let mut data = self.data.write();

        let entry = data
            .entry(key.to_owned())
            .and_modify(|entry| {
                if !entry.is_live(now) {
                    *entry = Entry { value: Value::Fields(FieldMap::new()), expires_at: None };
                }
            })
            .or_insert_with(|| Entry { value: Value::Fields(FieldMap::new()), expires_at: None });

        let Value::Fields(fields) = &mut entry.value else {
            return Err(wrong_type());
        };
        let current = match fields.get(field) {
            None => 0,
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                StoreError::serialization(format!("field '{field}' is not an integer"))
            })?,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::serialization("increment would overflow"))?;
        fields.insert(field.to_owned(), next.to_string());

        Ok(next)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let data = self.data.read();
        match data.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => match &entry.value {
                Value::Text(text) => Ok(Some(text.clone())),
                Value::Fields(_) => Err(wrong_type()),
            },
            _ => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let expires_at = Some(Instant::now() + ttl);
        self.data
            .write()
            .insert(key.to_owned(), Entry { value: Value::Text(value.to_owned()), expires_at });
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        // Acquiring the lock proves we are not deadlocked.
        let _unused = self.data.read();
        Ok(())
    }

    async fn consume_daily_quota(
        &self,
        key: &str,
        today: NaiveDate,
    ) -> StoreResult<QuotaDecision> {
        // The whole rule runs under one write lock.
        let mut data = self.data.write();
        let fields = match data.get_mut(key) {
            Some(entry) if entry.is_live(Instant::now()) => match &mut entry.value {
                Value::Fields(fields) => fields,
                Value::Text(_) => return Err(wrong_type()),
            },
            _ => return Ok(QuotaDecision::Missing),
        };

        // Parse before writing so a corrupt record is left untouched.
        let daily_limit = parse_counter(fields, FIELD_DAILY_LIMIT)?;
        let mut requests_today = parse_counter(fields, FIELD_REQUESTS_TODAY)?;

        let today = format_reset_date(today);
        if fields.get(FIELD_LAST_RESET) != Some(&today) {
            requests_today = 0;
            fields.insert(FIELD_REQUESTS_TODAY.to_owned(), "0".to_owned());
            fields.insert(FIELD_LAST_RESET.to_owned(), today);
        }

        if requests_today >= daily_limit {
            return Ok(QuotaDecision::Exhausted { requests_today, daily_limit });
        }

        let requests_today = requests_today + 1;
        fields.insert(FIELD_REQUESTS_TODAY.to_owned(), requests_today.to_string());
        Ok(QuotaDecision::Admitted { requests_today, daily_limit })
    }
}
