//! Log output for embedding processes.
//!
//! The library crates only emit `tracing` events; installing a subscriber
//! is the process's choice. These helpers install the usual one: an
//! `EnvFilter` from `RUST_LOG` (or a given default level) feeding the fmt
//! layer.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Level used when `RUST_LOG` is unset or unparseable.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Installs the global subscriber at [`DEFAULT_LOG_LEVEL`].
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    init_tracing_with_level(DEFAULT_LOG_LEVEL)
}

/// Installs the global subscriber, preferring `RUST_LOG` over `level`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing_with_level(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).try_init().is_ok()
}
