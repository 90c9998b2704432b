//! Test doubles for the inference engine.
//!
//! Feature-gated behind `testutil`.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use admission_cache::GenerationParams;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::engine::{GenerationError, InferenceEngine};

/// Engine that answers `"echo: <prompt>"`, counting calls.
///
/// Can be told to stall, fail, or report itself as not ready.
#[derive(Debug, Clone, Default)]
pub struct EchoEngine {
    calls: Arc<AtomicUsize>,
    not_ready: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
    failure: Arc<Mutex<Option<GenerationError>>>,
}

impl EchoEngine {
    /// Creates a ready engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `delay` before answering.
    pub fn stall_for(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Fails every call with `error`, or stops failing with `None`.
    pub fn fail_with(&self, error: Option<GenerationError>) {
        *self.failure.lock() = error;
    }

    /// Toggles readiness.
    pub fn set_ready(&self, ready: bool) {
        self.not_ready.store(!ready, Ordering::SeqCst);
    }

    /// Number of `generate` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceEngine for EchoEngine {
    async fn generate(&self, params: &GenerationParams) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        Ok(format!("echo: {}", params.prompt))
    }

    fn model_name(&self) -> &str {
        "echo-1"
    }

    fn is_ready(&self) -> bool {
        !self.not_ready.load(Ordering::SeqCst)
    }
}
