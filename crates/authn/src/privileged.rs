//! Statically configured privileged keys.
//!
//! Operators configure three tiers of keys out of band (`ADMIN_KEYS`,
//! `API_KEYS`, `READ_ONLY_KEYS`). A match yields a fixed identity with a
//! fixed quota and never touches the store. Only SHA-256 digests of the
//! configured keys are kept in memory.

use sha2::{Digest, Sha256};

use crate::identity::{CredentialKind, Identity, Permission, PermissionSet, QuotaUsage};

/// Privileged key tiers, in match precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivilegedTier {
    /// Full access.
    Admin,
    /// Generation and read access.
    Standard,
    /// Read access only.
    ReadOnly,
}

impl PrivilegedTier {
    /// Identity id reported for the tier.
    #[must_use]
    pub fn identity_id(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Standard => "api_user",
            Self::ReadOnly => "readonly_user",
        }
    }

    /// Permissions granted by the tier.
    #[must_use]
    pub fn permissions(self) -> PermissionSet {
        match self {
            Self::Admin => {
                PermissionSet::from_iter([Permission::Admin, Permission::Generate, Permission::Read])
            },
            Self::Standard => PermissionSet::from_iter([Permission::Generate, Permission::Read]),
            Self::ReadOnly => PermissionSet::from_iter([Permission::Read]),
        }
    }

    /// Fixed daily limit reported for the tier.
    #[must_use]
    pub fn daily_limit(self) -> u64 {
        match self {
            Self::Admin => 10_000,
            Self::Standard => 1_000,
            Self::ReadOnly => 5_000,
        }
    }

    /// The identity a match resolves to.
    #[must_use]
    pub fn identity(self) -> Identity {
        Identity::new(
            self.identity_id(),
            self.permissions(),
            CredentialKind::Privileged,
            Some(QuotaUsage { requests_today: 0, daily_limit: self.daily_limit() }),
        )
    }
}

/// The configured privileged keys, held as digests.
#[derive(Clone, Default)]
pub struct PrivilegedKeys {
    entries: Vec<([u8; 32], PrivilegedTier)>,
}

impl std::fmt::Debug for PrivilegedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = |tier| self.entries.iter().filter(|(_, t)| *t == tier).count();
        f.debug_struct("PrivilegedKeys")
            .field("admin", &count(PrivilegedTier::Admin))
            .field("standard", &count(PrivilegedTier::Standard))
            .field("read_only", &count(PrivilegedTier::ReadOnly))
            .finish()
    }
}

impl PrivilegedKeys {
    /// No privileged keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the set from the three tier lists. Blank entries are ignored.
    pub fn from_tiers<I, S>(admin: I, standard: I, read_only: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = Self::new();
        for key in admin {
            keys.add(key.as_ref(), PrivilegedTier::Admin);
        }
        for key in standard {
            keys.add(key.as_ref(), PrivilegedTier::Standard);
        }
        for key in read_only {
            keys.add(key.as_ref(), PrivilegedTier::ReadOnly);
        }
        keys
    }

    /// Builds the set from comma-separated lists, the form used by the
    /// `ADMIN_KEYS`, `API_KEYS` and `READ_ONLY_KEYS` variables.
    #[must_use]
    pub fn from_comma_lists(admin: &str, standard: &str, read_only: &str) -> Self {
        Self::from_tiers(admin.split(','), standard.split(','), read_only.split(','))
    }

    /// Registers one key. Blank keys are ignored.
    pub fn add(&mut self, key: &str, tier: PrivilegedTier) {
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        self.entries.push((Sha256::digest(key.as_bytes()).into(), tier));
    }

    /// Number of configured keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no key is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the highest tier whose key equals `token`.
    ///
    /// Every entry is compared so the time taken does not depend on which
    /// tier matched.
    #[must_use]
    pub fn match_token(&self, token: &str) -> Option<PrivilegedTier> {
        let digest: [u8; 32] = Sha256::digest(token.as_bytes()).into();
        let mut best: Option<PrivilegedTier> = None;
        for (candidate, tier) in &self.entries {
            if digests_equal(candidate, &digest) {
                best = match best {
                    Some(current) if precedence(current) <= precedence(*tier) => Some(current),
                    _ => Some(*tier),
                };
            }
        }
        best
    }
}

fn precedence(tier: PrivilegedTier) -> u8 {
    match tier {
        PrivilegedTier::Admin => 0,
        PrivilegedTier::Standard => 1,
        PrivilegedTier::ReadOnly => 2,
    }
}

fn digests_equal(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
