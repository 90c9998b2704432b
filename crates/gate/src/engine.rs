//! Inference engine seam.
//!
//! The engine itself is an external collaborator; the gate only needs a
//! fallible `generate` call that it can bound with a timeout.

use std::time::Duration;

use admission_cache::GenerationParams;
use admission_storage::Transient;
use async_trait::async_trait;
use thiserror::Error;

/// Default bound on a single generation.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Inference failures.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum GenerationError {
    /// The engine reported an error.
    #[error("Inference engine error: {0}")]
    Engine(String),

    /// The engine did not answer within the generation timeout.
    #[error("Inference timed out after {elapsed_ms}ms")]
    Timeout {
        /// The bound that was exceeded, in milliseconds.
        elapsed_ms: u64,
    },

    /// The engine is not loaded or not reachable.
    #[error("Inference engine unavailable")]
    Unavailable,
}

impl GenerationError {
    /// Creates a [`GenerationError::Engine`] error.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    /// Creates a [`GenerationError::Timeout`] error.
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed_ms: elapsed.as_millis() as u64 }
    }
}

impl Transient for GenerationError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable)
    }
}

/// A text generation backend.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Generates text for `params`.
    #[must_use = "generation results must be handled"]
    async fn generate(&self, params: &GenerationParams) -> Result<String, GenerationError>;

    /// Model name reported in chat completions.
    fn model_name(&self) -> &str;

    /// Returns `true` once the engine can serve requests.
    fn is_ready(&self) -> bool {
        true
    }

    /// Prepares the engine (model load, device probe). Called once at
    /// startup and retried on transient errors.
    async fn warm_up(&self) -> Result<(), GenerationError> {
        Ok(())
    }
}
