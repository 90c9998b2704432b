//! Daily quota ledger.
//!
//! [`QuotaLedger`] applies the daily limit to store-backed identities
//! through [`StateStore::consume_daily_quota`], so the day-boundary reset,
//! the limit check and the increment happen as one atomic store operation.
//! Assertion and privileged identities never reach the ledger.

use std::sync::Arc;

use admission_storage::{QuotaDecision, StateStore};
use chrono::{NaiveDate, Utc};
use fail::fail_point;

use crate::{error::AuthError, identity::QuotaUsage};

/// Per-identity daily request counters in the shared store.
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for QuotaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaLedger").finish_non_exhaustive()
    }
}

impl QuotaLedger {
    /// Creates a ledger over `store`.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Counts one request against the record at `record_key`, using today's
    /// UTC date.
    ///
    /// # Errors
    ///
    /// See [`consume_on`](Self::consume_on).
    pub async fn consume(&self, record_key: &str) -> Result<QuotaUsage, AuthError> {
        self.consume_on(record_key, Utc::now().date_naive()).await
    }

    /// Counts one request against the record at `record_key` as of `today`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::QuotaExceeded`] if the limit was already reached; nothing is incremented
    /// - [`AuthError::CredentialNotFound`] if the record no longer exists
    /// - [`AuthError::StoreUnavailable`] if the store failed or timed out
    pub async fn consume_on(
        &self,
        record_key: &str,
        today: NaiveDate,
    ) -> Result<QuotaUsage, AuthError> {
        fail_point!("quota-before-consume", |_| {
            Err(AuthError::store_unavailable(admission_storage::StoreError::connection(
                "injected quota failure",
            )))
        });

        let decision = self.store.consume_daily_quota(record_key, today).await.map_err(|e| {
            tracing::warn!(error = %e, transient = e.is_transient(), "quota consumption failed");
            AuthError::store_unavailable(e)
        })?;

        match decision {
            QuotaDecision::Admitted { requests_today, daily_limit } => {
                tracing::debug!(requests_today, daily_limit, "quota consumed");
                Ok(QuotaUsage { requests_today, daily_limit })
            },
            QuotaDecision::Exhausted { requests_today, daily_limit } => {
                tracing::debug!(requests_today, daily_limit, "daily quota exhausted");
                Err(AuthError::quota_exceeded(daily_limit))
            },
            QuotaDecision::Missing => Err(AuthError::credential_not_found()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use admission_storage::{
        MemoryStore,
        testutil::{FailingStore, store_with_record},
    };

    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[tokio::test]
    async fn test_limit_then_rollover() {
        let store = store_with_record("apikey:a", 3, 0, date(1)).await;
        let ledger = QuotaLedger::new(Arc::new(store));

        for expected in 1..=3 {
            let usage = ledger.consume_on("apikey:a", date(1)).await.unwrap();
            assert_eq!(usage, QuotaUsage { requests_today: expected, daily_limit: 3 });
        }
        assert!(matches!(
            ledger.consume_on("apikey:a", date(1)).await,
            Err(AuthError::QuotaExceeded { daily_limit: 3 })
        ));

        for expected in 1..=3 {
            let usage = ledger.consume_on("apikey:a", date(2)).await.unwrap();
            assert_eq!(usage.requests_today, expected);
        }
        assert!(ledger.consume_on("apikey:a", date(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let ledger = QuotaLedger::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            ledger.consume("apikey:none").await,
            Err(AuthError::CredentialNotFound)
        ));
    }

    #[tokio::test]
    async fn test_store_failure_is_unavailable() {
        let store = FailingStore::new(store_with_record("apikey:a", 3, 0, date(1)).await);
        store.fail_quota(true);
        let ledger = QuotaLedger::new(Arc::new(store));

        let err = ledger.consume_on("apikey:a", date(1)).await.unwrap_err();
        assert!(err.is_store_failure());
    }
}
