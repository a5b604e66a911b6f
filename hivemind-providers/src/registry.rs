//! Provider registry: registration, lifecycle, scoring, and dispatch.
//!
//! Dispatch composes the three reliability layers in a fixed order:
//! acquire a concurrency permit, consult the circuit breaker, then run
//! the adapter (which owns the retry loop). The permit is RAII and the
//! breaker sees exactly one observation per user-visible call.
//!
//! The provider map is read-mostly under an async `RwLock`; per-provider
//! mutable state (breaker, limiter, health, score) lives inside each
//! [`ProviderState`] behind its own locks and is never touched under
//! the registry-wide lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::auth::Credential;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::ProviderError;
use crate::limiter::{ConcurrencyLimiter, LimiterStats, RequestPermit};
use crate::models::{
    CompletionRequest, CompletionResponse, HealthState, ProviderRecord,
};
use crate::providers::adapter::HttpAdapter;
use crate::providers::catalog;
use crate::providers::{AdapterConfig, CompletionStream, Provider};

/// Runtime state the registry keeps per provider, wrapped around the
/// pure adapter.
pub struct ProviderState {
    name: String,
    adapter: Arc<dyn Provider>,
    breaker: CircuitBreaker,
    limiter: ConcurrencyLimiter,
    health: std::sync::RwLock<HealthState>,
    /// Last externally verified quality score; unknown sorts last
    score: std::sync::RwLock<Option<f64>>,
    draining: AtomicBool,
}

impl ProviderState {
    fn new(adapter: Arc<dyn Provider>, breaker_config: CircuitBreakerConfig) -> Self {
        let name = adapter.name().to_string();
        let capacity = adapter.capabilities().limits.max_concurrent_requests;
        Self {
            breaker: CircuitBreaker::new(name.clone(), breaker_config),
            limiter: ConcurrencyLimiter::new(capacity),
            health: std::sync::RwLock::new(HealthState::Unknown),
            score: std::sync::RwLock::new(None),
            draining: AtomicBool::new(false),
            name,
            adapter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adapter(&self) -> &Arc<dyn Provider> {
        &self.adapter
    }

    pub fn health(&self) -> HealthState {
        *self.health.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn score(&self) -> Option<f64> {
        *self.score.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn limiter_stats(&self) -> LimiterStats {
        self.limiter.stats()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    fn set_health(&self, health: HealthState) {
        *self.health.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = health;
    }

    fn set_score(&self, score: f64) {
        *self.score.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(score);
    }

    fn observe(&self, error: Option<&ProviderError>) {
        match error {
            None => {
                self.breaker.record_success();
                self.set_health(HealthState::Healthy);
            }
            Some(error) => {
                if error.counts_as_failure() {
                    self.breaker.record_failure();
                }
                match error {
                    ProviderError::RateLimited => self.set_health(HealthState::RateLimited),
                    ProviderError::AuthFailed { .. }
                    | ProviderError::AuthProductRestricted { .. } => {
                        self.set_health(HealthState::AuthFailed)
                    }
                    ProviderError::Cancelled | ProviderError::InvalidRequest { .. } => {}
                    _ => self.set_health(HealthState::Unhealthy),
                }
            }
        }
    }
}

/// Per-provider request counters, exponential-moving-average latency.
#[derive(Debug, Clone, Default)]
pub struct ProviderMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub last_request: Option<DateTime<Utc>>,
}

impl ProviderMetrics {
    fn record(&mut self, success: bool, latency_ms: u64) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        let alpha = 0.1;
        self.average_latency_ms = alpha * latency_ms as f64 + (1.0 - alpha) * self.average_latency_ms;
        self.last_request = Some(Utc::now());
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

/// Multiplexes completion requests over registered providers.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<ProviderState>>>,
    breaker_config: CircuitBreakerConfig,
    metrics: DashMap<String, ProviderMetrics>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::with_breaker_config(CircuitBreakerConfig::default())
    }

    pub fn with_breaker_config(breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            breaker_config,
            metrics: DashMap::new(),
        }
    }

    /// Register an adapter. Names are unique; a duplicate is a
    /// configuration error.
    pub async fn register(&self, adapter: Arc<dyn Provider>) -> Result<(), ProviderError> {
        let state = Arc::new(ProviderState::new(adapter, self.breaker_config.clone()));
        let mut providers = self.providers.write().await;
        if providers.contains_key(state.name()) {
            return Err(ProviderError::Configuration {
                message: format!("provider {} is already registered", state.name()),
            });
        }
        info!(provider = %state.name(), "registered provider");
        providers.insert(state.name().to_string(), state);
        Ok(())
    }

    /// Build and register an HTTP adapter from a configuration record.
    pub async fn register_from_record(&self, record: ProviderRecord) -> Result<(), ProviderError> {
        let descriptor =
            catalog::descriptor(&record.provider_type).ok_or_else(|| ProviderError::Configuration {
                message: format!("unknown provider type {}", record.provider_type),
            })?;

        let credential = if record.api_key.is_empty() {
            Credential::None
        } else {
            Credential::ApiKey(record.api_key.clone())
        };
        let mut config = AdapterConfig::new(credential);
        if let Some(name) = record.name.clone() {
            config = config.with_name(name);
        }
        if let Some(base_url) = record.base_url.clone() {
            config = config.with_base_url(base_url);
        }
        if let Some(model) = record.default_model.clone() {
            config = config.with_default_model(model);
        }
        if let Some(cap) = record.max_concurrent_requests {
            config = config.with_max_concurrent_requests(cap);
        }
        for (key, value) in &record.headers {
            config = config.with_header(key.clone(), value.clone());
        }

        let adapter = HttpAdapter::from_descriptor(descriptor, config)?;
        self.register(Arc::new(adapter)).await
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ProviderState>> {
        self.providers.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }

    /// Record an externally verified quality score for ordering.
    pub async fn set_score(&self, name: &str, score: f64) -> Result<(), ProviderError> {
        let state = self.get(name).await.ok_or_else(|| ProviderError::Configuration {
            message: format!("provider {name} is not registered"),
        })?;
        state.set_score(score);
        Ok(())
    }

    /// Providers ordered by verifier score, best first; unscored
    /// providers sort last.
    pub async fn providers_by_score(&self) -> Vec<Arc<ProviderState>> {
        let mut states: Vec<Arc<ProviderState>> =
            self.providers.read().await.values().cloned().collect();
        states.sort_by(|a, b| match (a.score(), b.score()) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.name().cmp(b.name()),
        });
        states
    }

    pub fn metrics(&self, name: &str) -> Option<ProviderMetrics> {
        self.metrics.get(name).map(|entry| entry.clone())
    }

    /// Dispatch to the best-scored eligible provider, falling through
    /// to the next one only when a provider cannot accept the call at
    /// all (draining, circuit open, or permit starvation).
    pub async fn complete(
        &self,
        request: CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<CompletionResponse, ProviderError> {
        let ordered = self.providers_by_score().await;
        if ordered.is_empty() {
            return Err(ProviderError::Configuration {
                message: "no providers registered".to_string(),
            });
        }

        let mut last_error = None;
        for state in ordered {
            match self.dispatch(state.clone(), request.clone(), deadline).await {
                Err(error @ (ProviderError::CircuitOpen { .. } | ProviderError::PermitTimeout)) => {
                    warn!(provider = %state.name(), "skipping provider: {error}");
                    last_error = Some(error);
                }
                other => return other,
            }
        }
        Err(last_error.unwrap_or(ProviderError::Configuration {
            message: "no eligible provider".to_string(),
        }))
    }

    /// Dispatch to one provider by name.
    pub async fn complete_with(
        &self,
        name: &str,
        request: CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<CompletionResponse, ProviderError> {
        let state = self.get(name).await.ok_or_else(|| ProviderError::Configuration {
            message: format!("provider {name} is not registered"),
        })?;
        self.dispatch(state, request, deadline).await
    }

    /// Streaming dispatch to one provider by name. The permit rides
    /// inside the returned stream and frees on drop or exhaustion.
    pub async fn complete_stream_with(
        &self,
        name: &str,
        request: CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<CompletionStream, ProviderError> {
        let state = self.get(name).await.ok_or_else(|| ProviderError::Configuration {
            message: format!("provider {name} is not registered"),
        })?;

        if state.is_draining() {
            return Err(ProviderError::Configuration {
                message: format!("provider {name} is shutting down"),
            });
        }

        let permit = state.limiter.acquire(deadline).await?;
        state.breaker.check()?;

        match state.adapter.complete_stream(request, deadline).await {
            Ok(stream) => {
                state.observe(None);
                Ok(hold_permit(stream, permit))
            }
            Err(error) => {
                state.observe(Some(&error));
                Err(error)
            }
        }
    }

    async fn dispatch(
        &self,
        state: Arc<ProviderState>,
        request: CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<CompletionResponse, ProviderError> {
        if state.is_draining() {
            return Err(ProviderError::Configuration {
                message: format!("provider {} is shutting down", state.name()),
            });
        }

        // Fixed composition: permit, then breaker, then the adapter's
        // retry loop. The permit frees on every path out.
        let _permit = state.limiter.acquire(deadline).await?;
        state.breaker.check()?;

        let started = Instant::now();
        let result = state.adapter.complete(request, deadline).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        state.observe(result.as_ref().err());
        self.metrics
            .entry(state.name().to_string())
            .or_default()
            .record(result.is_ok(), latency_ms);

        result
    }

    /// Wait for in-flight requests to finish, then remove the
    /// provider. New requests are refused as soon as this is called.
    pub async fn unregister(
        &self,
        name: &str,
        deadline: Option<Instant>,
    ) -> Result<(), ProviderError> {
        let state = self.remove(name).await?;
        state.draining.store(true, Ordering::Release);
        let drained = state.limiter.drain(deadline).await;
        info!(provider = %name, graceful = drained.is_ok(), "unregistered provider");
        drained
    }

    /// Remove the provider immediately, aborting queued waiters.
    pub async fn unregister_forced(&self, name: &str) -> Result<(), ProviderError> {
        let state = self.remove(name).await?;
        state.draining.store(true, Ordering::Release);
        state.limiter.close();
        info!(provider = %name, "forcibly unregistered provider");
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<Arc<ProviderState>, ProviderError> {
        self.providers
            .write()
            .await
            .remove(name)
            .ok_or_else(|| ProviderError::Configuration {
                message: format!("provider {name} is not registered"),
            })
    }

    /// Probe every provider and refresh health states.
    pub async fn health_check_all(&self) -> HashMap<String, HealthState> {
        let states: Vec<Arc<ProviderState>> =
            self.providers.read().await.values().cloned().collect();

        let mut results = HashMap::new();
        for state in states {
            let health = match state.adapter.health_check().await {
                Ok(()) => HealthState::Healthy,
                Err(ProviderError::RateLimited) => HealthState::RateLimited,
                Err(ProviderError::AuthFailed { .. })
                | Err(ProviderError::AuthProductRestricted { .. }) => HealthState::AuthFailed,
                Err(_) => HealthState::Unhealthy,
            };
            state.set_health(health);
            results.insert(state.name().to_string(), health);
        }
        results
    }
}

/// Keep the request permit alive for the lifetime of a stream.
fn hold_permit(mut stream: CompletionStream, permit: RequestPermit) -> CompletionStream {
    use futures::StreamExt;
    Box::pin(async_stream::stream! {
        let _permit = permit;
        while let Some(item) = stream.next().await {
            yield item;
        }
    })
}
