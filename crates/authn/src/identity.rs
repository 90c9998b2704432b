//! Resolved caller identities and permission sets.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A capability tag granted to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// May request generations.
    Generate,
    /// May read usage statistics.
    Read,
    /// May provision keys and read metrics.
    Admin,
}

impl Permission {
    /// The persisted tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Read => "read",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognised permission tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission tag: {0}")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "generate" => Ok(Self::Generate),
            "read" => Ok(Self::Read),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownPermission(other.to_owned())),
        }
    }
}

/// An unordered set of permissions, membership-tested at the gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Permissions granted to newly provisioned keys when none are given.
    #[must_use]
    pub fn default_for_new_keys() -> Self {
        Self::from_iter([Permission::Generate])
    }

    /// Parses the comma-joined persisted form.
    ///
    /// Unknown tags are dropped with a warning so that a record written by a
    /// newer release still verifies with the permissions this one knows.
    #[must_use]
    pub fn parse_list(list: &str) -> Self {
        list.split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .filter_map(|tag| match tag.parse::<Permission>() {
                Ok(permission) => Some(permission),
                Err(err) => {
                    tracing::warn!(error = %err, "ignoring permission tag");
                    None
                },
            })
            .collect()
    }

    /// The comma-joined persisted form, in a stable order.
    #[must_use]
    pub fn to_list(&self) -> String {
        self.0.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(",")
    }

    /// Returns `true` if `permission` is granted.
    #[must_use]
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    /// Grants `permission`.
    pub fn insert(&mut self, permission: Permission) {
        self.0.insert(permission);
    }

    /// Number of granted permissions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing is granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates granted permissions in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// How an identity was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Self-contained signed assertion; no store access, no quota.
    Assertion,
    /// Statically configured privileged key; fixed quota, no store access.
    Privileged,
    /// Opaque API key backed by a store record and the quota ledger.
    ApiKey,
}

/// Quota counters as seen when the identity was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    /// Requests counted today, including the current one once admitted.
    pub requests_today: u64,
    /// Daily ceiling.
    pub daily_limit: u64,
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    identity_id: String,
    permissions: PermissionSet,
    kind: CredentialKind,
    usage: Option<QuotaUsage>,
}

impl Identity {
    /// Creates an identity.
    pub fn new(
        identity_id: impl Into<String>,
        permissions: PermissionSet,
        kind: CredentialKind,
        usage: Option<QuotaUsage>,
    ) -> Self {
        Self { identity_id: identity_id.into(), permissions, kind, usage }
    }

    /// Stable identifier of the caller.
    #[must_use]
    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }

    /// Granted permissions.
    #[must_use]
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// Returns `true` if `permission` is granted.
    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }

    /// How the identity was established.
    #[must_use]
    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    /// Quota counters; `None` for signed assertions.
    #[must_use]
    pub fn usage(&self) -> Option<QuotaUsage> {
        self.usage
    }

    /// Replaces the quota counters, e.g. with the ledger's post-increment view.
    #[must_use]
    pub fn with_usage(mut self, usage: QuotaUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}
