//! Process-wide wiring.
//!
//! [`GateContext`] owns the store client, the response cache, the gate and
//! the service built from one [`GateConfig`]. A serving process creates one
//! at startup and hands clones of the service to its request handlers.

use std::sync::Arc;

use admission_authn::{
    AssertionIssuer, AssertionKeyPair, CredentialVerifier, IssuedAssertion, PermissionSet,
};
use admission_cache::ResponseCache;
use admission_storage::{ConfigError, RedisStore, StateStore, TimeoutStore, with_retry};

use crate::{
    config::GateConfig,
    engine::InferenceEngine,
    error::{GateError, Result},
    gate::AdmissionGate,
    observer::GateMetrics,
    service::GenerationService,
};

/// Everything a serving process shares across requests.
#[derive(Clone)]
pub struct GateContext {
    config: GateConfig,
    store: Arc<dyn StateStore>,
    engine: Arc<dyn InferenceEngine>,
    service: GenerationService,
    metrics: Arc<GateMetrics>,
    issuer: Option<AssertionIssuer>,
}

impl std::fmt::Debug for GateContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateContext")
            .field("config", &self.config)
            .field("service", &self.service)
            .field("assertions", &self.issuer.is_some())
            .finish_non_exhaustive()
    }
}

impl GateContext {
    /// Connects to the configured store, retrying per
    /// `config.connect_retry`, and wires the context around it. Every store
    /// call is bounded by `config.store_timeout`.
    ///
    /// # Errors
    ///
    /// - [`GateError::Config`] if the configuration is invalid
    /// - [`GateError::StoreUnavailable`] if the store stays unreachable
    #[tracing::instrument(skip_all)]
    pub async fn connect(config: GateConfig, engine: Arc<dyn InferenceEngine>) -> Result<Self> {
        let redis =
            RedisStore::connect(config.store_config()?).await.map_err(GateError::StoreUnavailable)?;
        let store = Arc::new(TimeoutStore::new(redis, config.store_timeout));
        Self::with_store(config, store, engine)
    }

    /// Wires the context around an existing store.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if the configuration is invalid or the
    /// assertion signing key cannot be decoded.
    pub fn with_store(
        config: GateConfig,
        store: Arc<dyn StateStore>,
        engine: Arc<dyn InferenceEngine>,
    ) -> Result<Self> {
        config.validate()?;
        let keys = config.assertion_keys()?;
        let privileged = config.privileged_keys();
        if privileged.is_empty() && keys.is_none() {
            tracing::warn!(
                "no privileged keys or assertion key configured, only stored API keys can be admitted"
            );
        }

        let verifier = CredentialVerifier::builder()
            .store(Arc::clone(&store))
            .maybe_assertions(keys.as_ref().map(AssertionKeyPair::verifier))
            .privileged(privileged)
            .build();
        let gate = AdmissionGate::builder()
            .verifier(verifier)
            .quota_failure_policy(config.quota_failure_policy)
            .build();
        let cache = ResponseCache::builder()
            .config(config.cache.clone())
            .shared(Arc::clone(&store))
            .build();
        let metrics = Arc::new(GateMetrics::new());
        let service = GenerationService::builder()
            .gate(gate)
            .cache(cache)
            .engine(Arc::clone(&engine))
            .store(Arc::clone(&store))
            .observer(metrics.clone())
            .generation_timeout(config.generation_timeout)
            .build();
        let issuer = keys.map(|keys| keys.issuer(config.assertion.ttl()));

        tracing::info!(
            quota_failure_policy = config.quota_failure_policy.as_str(),
            assertions = issuer.is_some(),
            model = engine.model_name(),
            "admission context ready",
        );
        Ok(Self { config, store, engine, service, metrics, issuer })
    }

    /// Runs the engine warm-up, retrying transient failures per
    /// `config.connect_retry`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::GenerationFailed`] if warm-up still fails.
    pub async fn warm_up_engine(&self) -> Result<()> {
        with_retry(&self.config.connect_retry, "engine_warm_up", || self.engine.warm_up()).await?;
        tracing::info!(model = self.engine.model_name(), "inference engine ready");
        Ok(())
    }

    /// Mints a signed assertion for `identity_id`. Issuance is an operator
    /// action and is not admission-gated.
    ///
    /// # Errors
    ///
    /// - [`GateError::Config`] if no signing key is configured
    /// - [`GateError::Internal`] if signing fails
    pub fn issue_assertion(
        &self,
        identity_id: &str,
        permissions: &PermissionSet,
    ) -> Result<IssuedAssertion> {
        let issuer = self.issuer.as_ref().ok_or_else(|| ConfigError::Invalid {
            field: "assertion_signing_key",
            reason: "not configured".to_owned(),
        })?;
        Ok(issuer.issue(identity_id, permissions)?)
    }

    /// The configuration the context was built from.
    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// The shared store client.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// The generation service.
    #[must_use]
    pub fn service(&self) -> &GenerationService {
        &self.service
    }

    /// The admission gate.
    #[must_use]
    pub fn gate(&self) -> &AdmissionGate {
        self.service.gate()
    }

    /// The response cache.
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        self.service.cache()
    }

    /// The metrics the service reports to.
    #[must_use]
    pub fn metrics(&self) -> &GateMetrics {
        &self.metrics
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use admission_authn::Permission;
    use admission_cache::GenerationParams;
    use admission_storage::{MemoryStore, RetryConfig};
    use async_trait::async_trait;
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

    use super::*;
    use crate::{
        api::GenerateRequest, engine::GenerationError, observer::Observer, testutil::EchoEngine,
    };

    fn config_with_keys() -> GateConfig {
        GateConfig {
            admin_keys: vec!["root-key".into()],
            assertion_signing_key: Some(URL_SAFE_NO_PAD.encode([9u8; 32])),
            ..GateConfig::default()
        }
    }

    #[tokio::test]
    async fn test_wiring_admits_configured_credentials() {
        let context = GateContext::with_store(
            config_with_keys(),
            Arc::new(MemoryStore::new()),
            Arc::new(EchoEngine::new()),
        )
        .unwrap();

        let issued = context
            .issue_assertion("svc", &PermissionSet::from_iter([Permission::Generate]))
            .unwrap();
        let response = context
            .service()
            .generate(&issued.token, GenerateRequest::builder().prompt("hi").build())
            .await
            .unwrap();
        assert_eq!(response.identity_id, "svc");

        assert!(context.gate().admit("root-key", Permission::Admin).await.is_ok());
        assert_eq!(context.cache().local_len(), 1);
        assert_eq!(context.metrics().snapshot().unwrap().cache_misses, 1);
    }

    #[tokio::test]
    async fn test_issue_without_key_is_config_error() {
        let context = GateContext::with_store(
            GateConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(EchoEngine::new()),
        )
        .unwrap();
        assert!(matches!(
            context.issue_assertion("svc", &PermissionSet::new()),
            Err(GateError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_signing_key_rejected_at_wiring() {
        let config = GateConfig {
            assertion_signing_key: Some("short".into()),
            ..GateConfig::default()
        };
        let result = GateContext::with_store(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(EchoEngine::new()),
        );
        assert!(matches!(result, Err(GateError::Config(_))));
    }

    /// Fails warm-up a fixed number of times with a transient error.
    struct FlakyWarmUp {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl InferenceEngine for FlakyWarmUp {
        async fn generate(
            &self,
            _params: &GenerationParams,
        ) -> std::result::Result<String, GenerationError> {
            Ok(String::new())
        }

        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn warm_up(&self) -> std::result::Result<(), GenerationError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            self.failures_left.store(left - 1, Ordering::SeqCst);
            Err(GenerationError::Unavailable)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_up_retries_transient_failures() {
        let config = GateConfig {
            connect_retry: RetryConfig::builder().max_retries(2).build().unwrap(),
            ..GateConfig::default()
        };
        let engine = Arc::new(FlakyWarmUp { failures_left: AtomicUsize::new(2) });
        let context =
            GateContext::with_store(config.clone(), Arc::new(MemoryStore::new()), engine).unwrap();
        context.warm_up_engine().await.unwrap();

        let engine = Arc::new(FlakyWarmUp { failures_left: AtomicUsize::new(3) });
        let context = GateContext::with_store(config, Arc::new(MemoryStore::new()), engine).unwrap();
        assert!(matches!(
            context.warm_up_engine().await,
            Err(GateError::GenerationFailed(GenerationError::Unavailable))
        ));
    }
}
