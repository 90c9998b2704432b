//! Entry points and the access each one requires.

use std::fmt;

use admission_authn::Permission;
use serde::Serialize;

/// What a caller must present to reach an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No credential.
    Public,
    /// Any admitted identity.
    Authenticated,
    /// An admitted identity holding the permission.
    Requires(Permission),
}

/// The service entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Text generation.
    Generate,
    /// Chat-style generation from a message list.
    ChatCompletion,
    /// API key provisioning.
    CreateApiKey,
    /// Observer snapshot.
    Metrics,
    /// Caller usage statistics.
    Stats,
    /// Liveness report.
    Health,
}

impl Endpoint {
    /// Every entry point.
    pub const ALL: [Endpoint; 6] = [
        Self::Generate,
        Self::ChatCompletion,
        Self::CreateApiKey,
        Self::Metrics,
        Self::Stats,
        Self::Health,
    ];

    /// Access rule of the entry point.
    #[must_use]
    pub fn access(self) -> Access {
        match self.required_permission() {
            Some(permission) => Access::Requires(permission),
            None if self == Self::Health => Access::Public,
            None => Access::Authenticated,
        }
    }

    /// Permission checked at admission, if any.
    #[must_use]
    pub fn required_permission(self) -> Option<Permission> {
        match self {
            Self::Generate | Self::ChatCompletion => Some(Permission::Generate),
            Self::CreateApiKey | Self::Metrics => Some(Permission::Admin),
            Self::Stats | Self::Health => None,
        }
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::ChatCompletion => "chat_completion",
            Self::CreateApiKey => "create_api_key",
            Self::Metrics => "metrics",
            Self::Stats => "stats",
            Self::Health => "health",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
