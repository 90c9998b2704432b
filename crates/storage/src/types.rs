//! Common types used across store operations.

use std::collections::BTreeMap;

use chrono::NaiveDate;

/// Field map stored under a single key (a Redis hash).
///
/// A `BTreeMap` keeps iteration order stable, so records serialize the same
/// way on every write.
pub type FieldMap = BTreeMap<String, String>;

/// Field holding the number of requests consumed on `last_reset`.
pub const FIELD_REQUESTS_TODAY: &str = "requests_today";

/// Field holding the positive per-day ceiling.
pub const FIELD_DAILY_LIMIT: &str = "daily_limit";

/// Field holding the ISO date (`YYYY-MM-DD`, UTC) of the last counter reset.
pub const FIELD_LAST_RESET: &str = "last_reset";

/// Outcome of the atomic reset-check-increment performed by
/// [`StateStore::consume_daily_quota`](crate::StateStore::consume_daily_quota).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// The request fit under the limit; `requests_today` is the
    /// post-increment value.
    Admitted {
        /// Counter value after this request was counted.
        requests_today: u64,
        /// The record's daily limit.
        daily_limit: u64,
    },
    /// The limit was already reached; nothing was incremented.
    Exhausted {
        /// Counter value observed (after any day-boundary reset).
        requests_today: u64,
        /// The record's daily limit.
        daily_limit: u64,
    },
    /// No record exists under the key.
    Missing,
}

/// Renders a date the way the `last_reset` field stores it.
#[must_use]
pub fn format_reset_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
