//! The generation service.
//!
//! [`GenerationService`] is the application surface behind an HTTP front
//! end. Every entry point goes through the [`AdmissionGate`] with the access
//! rule its [`Endpoint`] declares; only admitted generation requests reach
//! the response cache and the inference engine.

use std::{sync::Arc, time::Duration};

use admission_authn::{ApiKeyProvisioner, NewApiKey};
use admission_cache::{CacheOutcome, GenerationParams, ResponseCache};
use admission_storage::StateStore;
use fail::fail_point;
use tokio::time::Instant;

use crate::{
    api::{
        ChatChoice, ChatCompletion, ChatMessage, ChatRequest, ChatUsage, CreateApiKeyRequest,
        CreatedApiKey, GenerateRequest, GenerateResponse, HealthReport, HealthStatus, StatsReport,
    },
    endpoint::Endpoint,
    engine::{DEFAULT_GENERATION_TIMEOUT, GenerationError, InferenceEngine},
    error::{GateError, Result},
    gate::AdmissionGate,
    observer::{MetricsSnapshot, NoopObserver, Observer, RequestOutcome},
};

/// Admission-gated access to the response cache and the inference engine.
///
/// Cheaply cloneable; clones share the cache, engine and observer.
#[derive(Clone)]
pub struct GenerationService {
    gate: AdmissionGate,
    cache: ResponseCache,
    engine: Arc<dyn InferenceEngine>,
    store: Arc<dyn StateStore>,
    provisioner: ApiKeyProvisioner,
    observer: Arc<dyn Observer>,
    generation_timeout: Duration,
}

impl std::fmt::Debug for GenerationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationService")
            .field("gate", &self.gate)
            .field("model", &self.engine.model_name())
            .field("generation_timeout", &self.generation_timeout)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl GenerationService {
    /// Creates a service.
    ///
    /// `store` backs key provisioning and the liveness probes; it should be
    /// the store the gate's verifier reads from.
    #[builder]
    pub fn new(
        gate: AdmissionGate,
        cache: ResponseCache,
        engine: Arc<dyn InferenceEngine>,
        store: Arc<dyn StateStore>,
        observer: Option<Arc<dyn Observer>>,
        #[builder(default = DEFAULT_GENERATION_TIMEOUT)] generation_timeout: Duration,
    ) -> Self {
        let observer: Arc<dyn Observer> = observer.unwrap_or_else(|| Arc::new(NoopObserver));
        let provisioner = ApiKeyProvisioner::new(Arc::clone(&store));
        Self { gate, cache, engine, store, provisioner, observer, generation_timeout }
    }

    /// The admission gate.
    #[must_use]
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// The response cache.
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Generates text for an admitted caller holding `generate`.
    ///
    /// Identical parameters are served from the cache; a miss runs the
    /// engine, bounded by the generation timeout, and writes the result back
    /// to both tiers.
    ///
    /// # Errors
    ///
    /// - any admission error of [`AdmissionGate::admit`]
    /// - [`GateError::InvalidRequest`] for out-of-bounds parameters
    /// - [`GateError::GenerationFailed`] if the engine fails, times out or is not ready
    #[tracing::instrument(skip_all)]
    pub async fn generate(&self, token: &str, request: GenerateRequest) -> Result<GenerateResponse> {
        let started = Instant::now();
        let result: Result<GenerateResponse> = async {
            let identity = self.gate.admit_endpoint(token, Endpoint::Generate).await?;
            let identity_id = identity.map(|i| i.identity_id().to_owned()).unwrap_or_default();
            let params = request.into_params()?;
            let outcome = self.complete(&params).await?;
            let generation_time = started.elapsed();

            tracing::info!(
                identity_id = %identity_id,
                cached = outcome.is_cached(),
                elapsed_ms = generation_time.as_millis() as u64,
                "generation served",
            );
            Ok(GenerateResponse {
                response: outcome.text.to_string(),
                cached: outcome.is_cached(),
                generation_time,
                identity_id,
            })
        }
        .await;
        self.record(Endpoint::Generate, started, result)
    }

    /// Chat-style generation: the last `user` message is generated for as a
    /// plain prompt, through the same cache and engine path as
    /// [`generate`](Self::generate).
    ///
    /// # Errors
    ///
    /// As [`generate`](Self::generate); also [`GateError::InvalidRequest`]
    /// when the message list is empty or has no `user` message.
    #[tracing::instrument(skip_all)]
    pub async fn chat_completion(&self, token: &str, request: ChatRequest) -> Result<ChatCompletion> {
        let started = Instant::now();
        let result: Result<ChatCompletion> = async {
            self.gate.admit_endpoint(token, Endpoint::ChatCompletion).await?;
            let params = request.to_generate_request()?.into_params()?;
            let outcome = self.complete(&params).await?;

            Ok(ChatCompletion {
                usage: ChatUsage::count(&params.prompt, &outcome.text),
                choices: vec![ChatChoice {
                    message: ChatMessage::assistant(&*outcome.text),
                    finish_reason: "stop".to_owned(),
                }],
                model: self.engine.model_name().to_owned(),
                cached: outcome.is_cached(),
            })
        }
        .await;
        self.record(Endpoint::ChatCompletion, started, result)
    }

    /// Provisions an API key. Admin only.
    ///
    /// # Errors
    ///
    /// - any admission error of [`AdmissionGate::admit`]
    /// - [`GateError::InvalidRequest`] for an empty `user_id`, a zero `daily_limit` or an unknown
    ///   permission tag
    /// - [`GateError::StoreUnavailable`] if the record cannot be written
    #[tracing::instrument(skip_all)]
    pub async fn create_api_key(
        &self,
        token: &str,
        request: CreateApiKeyRequest,
    ) -> Result<CreatedApiKey> {
        let started = Instant::now();
        let result: Result<CreatedApiKey> = async {
            let admin = self
                .gate
                .admit_endpoint(token, Endpoint::CreateApiKey)
                .await?
                .ok_or_else(|| GateError::internal("provisioning admitted without identity"))?;

            let user_id = request.user_id.trim();
            if user_id.is_empty() {
                return Err(GateError::invalid_request("user_id required"));
            }
            if request.daily_limit == Some(0) {
                return Err(GateError::invalid_request("daily_limit must be positive"));
            }
            let new_key = NewApiKey::builder()
                .user_id(user_id)
                .maybe_permissions(request.permission_set()?)
                .maybe_daily_limit(request.daily_limit)
                .build();
            let provisioned = self.provisioner.create(new_key).await?;

            tracing::info!(
                user_id = %provisioned.record.user_id,
                created_by = admin.identity_id(),
                "API key created",
            );
            Ok(CreatedApiKey {
                api_key: provisioned.api_key,
                user_id: provisioned.record.user_id,
                permissions: provisioned.record.permissions,
                daily_limit: provisioned.record.daily_limit,
                created_by: admin.identity_id().to_owned(),
            })
        }
        .await;
        self.record(Endpoint::CreateApiKey, started, result)
    }

    /// Usage report for any admitted caller. Counts against the caller's
    /// quota like any other request.
    ///
    /// # Errors
    ///
    /// Any admission error of [`AdmissionGate::authenticate`].
    #[tracing::instrument(skip_all)]
    pub async fn stats(&self, token: &str) -> Result<StatsReport> {
        let started = Instant::now();
        let result: Result<StatsReport> = async {
            let identity = self
                .gate
                .admit_endpoint(token, Endpoint::Stats)
                .await?
                .ok_or_else(|| GateError::internal("stats admitted without identity"))?;
            let usage = identity.usage();
            Ok(StatsReport {
                identity_id: identity.identity_id().to_owned(),
                requests_today: usage.map_or(0, |u| u.requests_today),
                daily_limit: usage.map(|u| u.daily_limit),
                cache_entries: self.cache.local_len(),
                store_connected: self.store_connected().await,
            })
        }
        .await;
        self.record(Endpoint::Stats, started, result)
    }

    /// Liveness report. Requires no credential and never fails.
    pub async fn health(&self) -> HealthReport {
        let started = Instant::now();
        let engine_ready = self.engine.is_ready();
        let store_connected = self.store_connected().await;
        let status = if engine_ready && store_connected {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        self.observer.on_request(Endpoint::Health, RequestOutcome::Success, started.elapsed());
        HealthReport {
            status,
            engine_ready,
            store_connected,
            cache_entries: self.cache.local_len(),
        }
    }

    /// Observer snapshot. Admin only. Empty when the observer keeps no
    /// metrics.
    ///
    /// # Errors
    ///
    /// Any admission error of [`AdmissionGate::admit`].
    #[tracing::instrument(skip_all)]
    pub async fn metrics(&self, token: &str) -> Result<MetricsSnapshot> {
        let started = Instant::now();
        let result = self
            .gate
            .admit_endpoint(token, Endpoint::Metrics)
            .await
            .map(|_| self.observer.snapshot().unwrap_or_default());
        self.record(Endpoint::Metrics, started, result)
    }

    async fn complete(&self, params: &GenerationParams) -> Result<CacheOutcome> {
        let fingerprint = params.fingerprint();
        let outcome = self.cache.get_or_compute(&fingerprint, || self.run_engine(params)).await;
        // Failed generations are misses too.
        self.observer.on_cache_lookup(outcome.as_ref().ok().and_then(|o| o.tier));
        Ok(outcome?)
    }

    async fn run_engine(&self, params: &GenerationParams) -> std::result::Result<String, GenerationError> {
        fail_point!("engine-generate", |_| Err(GenerationError::engine("injected failure")));
        if !self.engine.is_ready() {
            return Err(GenerationError::Unavailable);
        }
        match tokio::time::timeout(self.generation_timeout, self.engine.generate(params)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "inference failed");
                Err(err)
            },
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.generation_timeout.as_millis() as u64,
                    "inference timed out",
                );
                Err(GenerationError::timeout(self.generation_timeout))
            },
        }
    }

    async fn store_connected(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(error = %err, "store ping failed");
                false
            },
        }
    }

    fn record<T>(&self, endpoint: Endpoint, started: Instant, result: Result<T>) -> Result<T> {
        let outcome = match &result {
            Ok(_) => RequestOutcome::Success,
            Err(err) => {
                tracing::debug!(endpoint = %endpoint, error = %err, "request refused");
                RequestOutcome::Error(err.category())
            },
        };
        self.observer.on_request(endpoint, outcome, started.elapsed());
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use admission_authn::{
        CredentialVerifier, Permission, PermissionSet, PrivilegedKeys, testutil::provision_key,
    };
    use admission_cache::CacheTier;
    use admission_storage::{MemoryStore, testutil::FailingStore};

    use super::*;
    use crate::{gate::FailurePolicy, observer::GateMetrics, testutil::EchoEngine};

    struct Harness {
        service: GenerationService,
        engine: EchoEngine,
        metrics: Arc<GateMetrics>,
        store: Arc<dyn StateStore>,
    }

    fn harness_over(store: Arc<dyn StateStore>) -> Harness {
        let verifier = CredentialVerifier::builder()
            .store(Arc::clone(&store))
            .privileged(PrivilegedKeys::from_comma_lists("root-key", "svc-key", "dash-key"))
            .build();
        let gate = AdmissionGate::builder()
            .verifier(verifier)
            .quota_failure_policy(FailurePolicy::Closed)
            .build();
        let engine = EchoEngine::new();
        let metrics = Arc::new(GateMetrics::new());
        let service = GenerationService::builder()
            .gate(gate)
            .cache(ResponseCache::builder().shared(Arc::clone(&store)).build())
            .engine(Arc::new(engine.clone()))
            .store(Arc::clone(&store))
            .observer(metrics.clone())
            .generation_timeout(Duration::from_secs(5))
            .build();
        Harness { service, engine, metrics, store }
    }

    fn harness() -> Harness {
        harness_over(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_generate_then_cached() {
        let h = harness();
        let request = GenerateRequest::builder().prompt("hello").build();

        let first = h.service.generate("svc-key", request.clone()).await.unwrap();
        assert_eq!(first.response, "echo: hello");
        assert!(!first.cached);
        assert_eq!(first.identity_id, "api_user");

        let second = h.service.generate("svc-key", request).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.response, first.response);
        assert_eq!(h.engine.calls(), 1);

        let snapshot = h.metrics.snapshot().unwrap();
        assert_eq!((snapshot.cache_hits, snapshot.cache_misses), (1, 1));
        assert_eq!(snapshot.request_count(Endpoint::Generate, RequestOutcome::Success), 2);
    }

    #[tokio::test]
    async fn test_generate_requires_generate_permission() {
        let h = harness();
        let err = h
            .service
            .generate("dash-key", GenerateRequest::builder().prompt("hi").build())
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::PermissionDenied { required: Permission::Generate }));
        assert_eq!(h.engine.calls(), 0);

        let snapshot = h.metrics.snapshot().unwrap();
        assert_eq!(snapshot.requests["generate"]["forbidden"], 1);
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_engine() {
        let h = harness();
        let request = GenerateRequest::builder().prompt("hi").max_tokens(0).build();
        let err = h.service.generate("svc-key", request).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert_eq!(h.engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_is_not_cached() {
        let h = harness();
        h.engine.fail_with(Some(GenerationError::engine("cuda oom")));
        let request = GenerateRequest::builder().prompt("retry me").build();

        let err = h.service.generate("svc-key", request.clone()).await.unwrap_err();
        assert!(matches!(err, GateError::GenerationFailed(GenerationError::Engine(_))));
        assert_eq!(err.to_string(), "Generation failed");

        h.engine.fail_with(None);
        let ok = h.service.generate("svc-key", request).await.unwrap();
        assert!(!ok.cached);
        assert_eq!(h.engine.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_timeout_is_generation_failure() {
        let h = harness();
        h.engine.stall_for(Duration::from_secs(60));
        let err = h
            .service
            .generate("svc-key", GenerateRequest::builder().prompt("slow").build())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::GenerationFailed(GenerationError::Timeout { elapsed_ms: 5000 })
        ));
        assert_eq!(err.http_status(), 500);
    }

    #[tokio::test]
    async fn test_engine_not_ready_is_unavailable() {
        let h = harness();
        h.engine.set_ready(false);
        let err = h
            .service
            .generate("svc-key", GenerateRequest::builder().prompt("early").build())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert_eq!(h.engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_chat_shares_cache_with_generate() {
        let h = harness();
        h.service
            .generate("svc-key", GenerateRequest::builder().prompt("two words").build())
            .await
            .unwrap();

        let chat = ChatRequest::new(vec![ChatMessage::user("two words")]);
        let completion = h.service.chat_completion("svc-key", chat).await.unwrap();
        assert!(completion.cached);
        assert_eq!(completion.model, "echo-1");
        assert_eq!(completion.choices[0].message.content, "echo: two words");
        assert_eq!(completion.choices[0].message.role, "assistant");
        assert_eq!(completion.choices[0].finish_reason, "stop");
        assert_eq!(completion.usage.prompt_tokens, 2);
        assert_eq!(completion.usage.completion_tokens, 3);
        assert_eq!(h.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_chat_without_user_message() {
        let h = harness();
        let err = h
            .service
            .chat_completion("svc-key", ChatRequest::new(vec![ChatMessage::assistant("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_create_api_key_admin_only() {
        let h = harness();
        let err = h
            .service
            .create_api_key("svc-key", CreateApiKeyRequest::new("team"))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::PermissionDenied { required: Permission::Admin }));

        let created = h
            .service
            .create_api_key("root-key", CreateApiKeyRequest::new("team"))
            .await
            .unwrap();
        assert!(created.api_key.starts_with("ak_"));
        assert_eq!(created.created_by, "admin");
        assert_eq!(created.permissions, PermissionSet::default_for_new_keys());

        // The new key works immediately.
        let response = h
            .service
            .generate(&created.api_key, GenerateRequest::builder().prompt("mine").build())
            .await
            .unwrap();
        assert_eq!(response.identity_id, "team");
    }

    #[tokio::test]
    async fn test_create_api_key_rejects_bad_input() {
        let h = harness();
        let blank = h.service.create_api_key("root-key", CreateApiKeyRequest::new("  ")).await;
        assert!(matches!(blank, Err(GateError::InvalidRequest(m)) if m == "user_id required"));

        let mut request = CreateApiKeyRequest::new("team");
        request.permissions = Some(vec!["superuser".into()]);
        assert!(matches!(
            h.service.create_api_key("root-key", request).await,
            Err(GateError::InvalidRequest(_))
        ));

        let request = CreateApiKeyRequest { daily_limit: Some(0), ..CreateApiKeyRequest::new("team") };
        let zero = h.service.create_api_key("root-key", request).await;
        assert!(
            matches!(zero, Err(GateError::InvalidRequest(m)) if m == "daily_limit must be positive")
        );

        let request = CreateApiKeyRequest { daily_limit: Some(1), ..CreateApiKeyRequest::new("team") };
        let created = h.service.create_api_key("root-key", request).await.unwrap();
        assert_eq!(created.daily_limit, 1);
        let request = GenerateRequest::builder().prompt("hi").build();
        assert!(h.service.generate(&created.api_key, request).await.is_ok());
    }

    #[tokio::test]
    async fn test_stats_counts_like_any_request() {
        let h = harness();
        let key = provision_key(Arc::clone(&h.store), "team", PermissionSet::new(), 10).await;

        let first = h.service.stats(&key).await.unwrap();
        assert_eq!(first.identity_id, "team");
        assert_eq!(first.requests_today, 1);
        assert_eq!(first.daily_limit, Some(10));
        assert!(first.store_connected);

        let second = h.service.stats(&key).await.unwrap();
        assert_eq!(second.requests_today, 2);
    }

    #[tokio::test]
    async fn test_health_reports_components() {
        let store = FailingStore::new(MemoryStore::new());
        let h = harness_over(Arc::new(store.clone()));

        let report = h.service.health().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.cache_entries, 0);

        store.fail_reads(true);
        let report = h.service.health().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(!report.store_connected);
        assert!(report.engine_ready);
    }

    #[tokio::test]
    async fn test_metrics_admin_only() {
        let h = harness();
        assert!(matches!(
            h.service.metrics("svc-key").await,
            Err(GateError::PermissionDenied { .. })
        ));
        let snapshot = h.service.metrics("root-key").await.unwrap();
        assert_eq!(snapshot.requests["metrics"]["forbidden"], 1);
    }

    #[tokio::test]
    async fn test_metrics_empty_without_recording_observer() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let verifier = CredentialVerifier::builder()
            .store(Arc::clone(&store))
            .privileged(PrivilegedKeys::from_comma_lists("root-key", "", ""))
            .build();
        let service = GenerationService::builder()
            .gate(AdmissionGate::builder().verifier(verifier).build())
            .cache(ResponseCache::builder().build())
            .engine(Arc::new(EchoEngine::new()))
            .store(store)
            .build();
        assert_eq!(service.metrics("root-key").await.unwrap(), MetricsSnapshot::default());
    }

    #[tokio::test]
    async fn test_cache_tier_reported_after_local_clear() {
        let h = harness();
        let request = GenerateRequest::builder().prompt("persist").build();
        h.service.generate("svc-key", request.clone()).await.unwrap();
        h.service.cache().clear_local();

        let params = request.into_params().unwrap();
        let hit = h.service.cache().lookup(&params.fingerprint()).await.unwrap();
        assert_eq!(hit.tier, CacheTier::Shared);
    }
}
