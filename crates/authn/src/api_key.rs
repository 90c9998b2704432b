//! Opaque API keys and their persisted records.
//!
//! A key is `ak_` followed by 32 random bytes in unpadded base64url. Only
//! the SHA-256 hex digest of the key is stored, under `apikey:{digest}`;
//! the raw key is handed out exactly once, by
//! [`ApiKeyProvisioner::create`].
//!
//! # Record layout
//!
//! | Field | Example |
//! |-------|---------|
//! | `user_id` | `analytics-team` |
//! | `permissions` | `generate,read` |
//! | `created_at` | `2024-06-01T12:00:00+00:00` |
//! | `requests_today` | `17` |
//! | `daily_limit` | `1000` |
//! | `last_reset` | `2024-06-01` |

use std::sync::Arc;

use admission_storage::{
    FIELD_DAILY_LIMIT, FIELD_LAST_RESET, FIELD_REQUESTS_TODAY, FieldMap, StateStore, StoreError,
    format_reset_date,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{
    error::AuthError,
    identity::{CredentialKind, Identity, PermissionSet, QuotaUsage},
};

/// Prefix of every generated key.
pub const API_KEY_PREFIX: &str = "ak_";

/// Prefix of the store key holding a record.
pub const RECORD_KEY_PREFIX: &str = "apikey:";

/// Daily limit given to new keys when none is requested.
pub const DEFAULT_DAILY_LIMIT: u64 = 1000;

const FIELD_USER_ID: &str = "user_id";
const FIELD_PERMISSIONS: &str = "permissions";
const FIELD_CREATED_AT: &str = "created_at";

/// Generates a new raw API key.
#[must_use]
pub fn generate_api_key() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; 32]);
    rand::rng().fill(&mut bytes[..]);
    let mut key = Zeroizing::new(String::with_capacity(API_KEY_PREFIX.len() + 43));
    key.push_str(API_KEY_PREFIX);
    URL_SAFE_NO_PAD.encode_string(&bytes[..], &mut *key);
    key
}

/// SHA-256 hex digest of a raw key.
#[must_use]
pub fn hash_api_key(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Store key of the record for a raw key.
#[must_use]
pub fn record_key(raw: &str) -> String {
    format!("{RECORD_KEY_PREFIX}{}", hash_api_key(raw))
}

/// A persisted API key record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    /// Owner of the key.
    pub user_id: String,
    /// Granted permissions.
    pub permissions: PermissionSet,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Requests counted since `last_reset`.
    pub requests_today: u64,
    /// Daily ceiling.
    pub daily_limit: u64,
    /// UTC date of the last counter reset.
    pub last_reset: NaiveDate,
}

impl ApiKeyRecord {
    /// Encodes the record as a store field map.
    #[must_use]
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(FIELD_USER_ID.to_owned(), self.user_id.clone());
        fields.insert(FIELD_PERMISSIONS.to_owned(), self.permissions.to_list());
        fields.insert(FIELD_CREATED_AT.to_owned(), self.created_at.to_rfc3339());
        fields.insert(FIELD_REQUESTS_TODAY.to_owned(), self.requests_today.to_string());
        fields.insert(FIELD_DAILY_LIMIT.to_owned(), self.daily_limit.to_string());
        fields.insert(FIELD_LAST_RESET.to_owned(), format_reset_date(self.last_reset));
        fields
    }

    /// Decodes a record read from the store.
    ///
    /// Returns `Ok(None)` for an empty map (no such record).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if a field is missing or
    /// unparsable.
    pub fn from_fields(fields: &FieldMap) -> Result<Option<Self>, StoreError> {
        if fields.is_empty() {
            return Ok(None);
        }

        let field = |name: &str| {
            fields
                .get(name)
                .ok_or_else(|| StoreError::serialization(format!("record is missing {name}")))
        };
        let number = |name: &str| {
            field(name)?.trim().parse::<u64>().map_err(|_| {
                StoreError::serialization(format!("record field {name} is not a count"))
            })
        };

        let created_at = DateTime::parse_from_rfc3339(field(FIELD_CREATED_AT)?)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| StoreError::serialization("record field created_at is not RFC 3339"))?;
        let last_reset = NaiveDate::parse_from_str(field(FIELD_LAST_RESET)?, "%Y-%m-%d")
            .map_err(|_| StoreError::serialization("record field last_reset is not a date"))?;

        Ok(Some(Self {
            user_id: field(FIELD_USER_ID)?.clone(),
            permissions: PermissionSet::parse_list(field(FIELD_PERMISSIONS)?),
            created_at,
            requests_today: number(FIELD_REQUESTS_TODAY)?,
            daily_limit: number(FIELD_DAILY_LIMIT)?,
            last_reset,
        }))
    }

    /// The identity this record grants, with the counters as stored.
    #[must_use]
    pub fn to_identity(&self) -> Identity {
        Identity::new(
            self.user_id.clone(),
            self.permissions.clone(),
            CredentialKind::ApiKey,
            Some(QuotaUsage { requests_today: self.requests_today, daily_limit: self.daily_limit }),
        )
    }
}

/// Parameters for a new API key.
#[derive(Debug, Clone, bon::Builder)]
pub struct NewApiKey {
    /// Owner of the key.
    #[builder(into)]
    pub user_id: String,
    /// Granted permissions; defaults to `{generate}`.
    #[builder(default = PermissionSet::default_for_new_keys())]
    pub permissions: PermissionSet,
    /// Daily ceiling; defaults to [`DEFAULT_DAILY_LIMIT`].
    #[builder(default = DEFAULT_DAILY_LIMIT)]
    pub daily_limit: u64,
}

/// A newly created key. The raw key is not retrievable again.
pub struct ProvisionedKey {
    /// The raw key to hand to the caller.
    pub api_key: Zeroizing<String>,
    /// The record as written.
    pub record: ApiKeyRecord,
}

impl std::fmt::Debug for ProvisionedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedKey").field("record", &self.record).finish_non_exhaustive()
    }
}

/// Creates API key records in the shared store.
#[derive(Clone)]
pub struct ApiKeyProvisioner {
    store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for ApiKeyProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyProvisioner").finish_non_exhaustive()
    }
}

impl ApiKeyProvisioner {
    /// Creates a provisioner writing to `store`.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Generates a key, persists its record and returns the raw key.
    ///
    /// Admin-only at the gate; this type performs no permission check.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::StoreUnavailable`] if the record cannot be
    /// written.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create(&self, request: NewApiKey) -> Result<ProvisionedKey, AuthError> {
        let api_key = generate_api_key();
        let now = Utc::now();
        let record = ApiKeyRecord {
            user_id: request.user_id,
            permissions: request.permissions,
            created_at: now,
            requests_today: 0,
            daily_limit: request.daily_limit,
            last_reset: now.date_naive(),
        };

        self.store
            .set_fields(&record_key(&api_key), record.to_fields(), None)
            .await
            .map_err(AuthError::store_unavailable)?;

        tracing::info!(
            permissions = %record.permissions.to_list(),
            daily_limit = record.daily_limit,
            "provisioned API key"
        );
        Ok(ProvisionedKey { api_key, record })
    }
}
