//! # Admission Gate
//!
//! Request-time admission control and the generation service in front of
//! an inference engine.
//!
//! Every call carries a bearer token and goes through one decision point:
//!
//! ```text
//! token ──▶ CredentialVerifier ──▶ QuotaLedger ──▶ permission check ──▶ Identity
//!           (assertion │ privileged │ stored key)   (stored keys only)
//!                                                                      │
//!                     GenerationService ◀──────────────────────────────┘
//!                        │  validate ─▶ ResponseCache ─miss─▶ InferenceEngine
//!                        ▼
//!                     Observer (cache hits, outcomes, durations)
//! ```
//!
//! [`GateContext`] wires the pieces from a [`GateConfig`]; there is no
//! process-global state.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use admission_gate::{GateConfig, GateContext, GenerateRequest, InferenceEngine};
//!
//! # async fn serve(engine: Arc<dyn InferenceEngine>, token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! admission_gate::telemetry::init_tracing();
//! let context = GateContext::connect(GateConfig::from_env()?, engine).await?;
//! context.warm_up_engine().await?;
//!
//! let request = GenerateRequest::builder().prompt("Explain lifetimes").build();
//! match context.service().generate(token, request).await {
//!     Ok(response) => println!("{} (cached: {})", response.response, response.cached),
//!     Err(err) => eprintln!("{} {err}", err.http_status()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables [`testutil`] with a scriptable echo engine.
//! - **`failpoints`**: Activates the `engine-generate` injection point and those of the
//!   dependency crates.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Request and response types.
pub mod api;
/// Process configuration.
pub mod config;
/// Process-wide wiring.
pub mod context;
/// Entry points and access rules.
pub mod endpoint;
/// Inference engine seam.
pub mod engine;
/// Gate error taxonomy.
pub mod error;
/// The admission gate.
pub mod gate;
/// Observability hooks.
pub mod observer;
/// The generation service.
pub mod service;
/// Subscriber installation.
pub mod telemetry;
/// Test doubles.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use api::{
    ChatChoice, ChatCompletion, ChatMessage, ChatRequest, ChatUsage, CreateApiKeyRequest,
    CreatedApiKey, GenerateRequest, GenerateResponse, HealthReport, HealthStatus, StatsReport,
};
pub use config::{DEFAULT_REDIS_URL, GateConfig};
pub use context::GateContext;
pub use endpoint::{Access, Endpoint};
pub use engine::{DEFAULT_GENERATION_TIMEOUT, GenerationError, InferenceEngine};
pub use error::{GateError, Result, StatusCategory};
pub use gate::{AdmissionGate, DEFAULT_QUOTA_FAILURE_POLICY, FailurePolicy};
pub use observer::{GateMetrics, MetricsSnapshot, NoopObserver, Observer, RequestOutcome};
pub use service::GenerationService;
