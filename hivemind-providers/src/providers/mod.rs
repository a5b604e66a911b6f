//! Provider abstraction layer.
//!
//! Every remote completion service sits behind the [`Provider`] trait.
//! Twenty-plus providers ship as entries in [`catalog`], all realized
//! by one [`adapter::HttpAdapter`] template parameterized with a
//! [`catalog::ProviderDescriptor`]; adding a provider means adding a
//! descriptor, not a module. The CLI-delegation provider in [`cli`] is
//! the one non-HTTP implementation.

use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;

use crate::auth::Credential;
use crate::error::ProviderError;
use crate::models::{
    CompletionRequest, CompletionResponse, ProviderCapabilities,
};
use crate::retry::RetryConfig;

pub mod adapter;
pub mod catalog;
pub mod cli;
pub mod http_client;
pub mod sse;
pub mod wire;
pub mod wire_anthropic;
pub mod wire_openai;

/// A finite, non-restartable sequence of completion elements.
///
/// Intermediate elements carry delta text with an empty finish reason;
/// the final element carries the assembled content and a non-empty
/// finish reason. A mid-stream failure is delivered as a single final
/// element with `finish_reason = error`, after which the stream closes.
pub type CompletionStream =
    Pin<Box<dyn Stream<Item = Result<CompletionResponse, ProviderError>> + Send>>;

/// Uniform contract every provider implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registered name of this provider instance.
    fn name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Check a configuration map for the fields this provider needs.
    /// Returns `(ok, missing-field messages)`.
    fn validate_config(&self, config: &HashMap<String, String>) -> (bool, Vec<String>);

    /// One-shot completion. `deadline` bounds the whole call including
    /// retries.
    async fn complete(
        &self,
        request: CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Streaming completion. The stream must be fully consumed or
    /// dropped; dropping cancels the underlying transfer.
    async fn complete_stream(
        &self,
        request: CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<CompletionStream, ProviderError>;

    /// Cheap liveness probe against the remote service.
    async fn health_check(&self) -> Result<(), ProviderError>;
}

/// Runtime configuration for one adapter instance, layered over its
/// descriptor defaults.
#[derive(Clone)]
pub struct AdapterConfig {
    /// Registered name; defaults to the descriptor name
    pub name: Option<String>,
    pub credential: Credential,
    /// Overrides the descriptor base URL
    pub base_url: Option<String>,
    /// Overrides the descriptor default model
    pub default_model: Option<String>,
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub max_concurrent_requests: u32,
    /// Extra headers sent on every request
    pub headers: HashMap<String, String>,
}

impl AdapterConfig {
    pub fn new(credential: Credential) -> Self {
        Self {
            name: None,
            credential,
            base_url: None,
            default_model: None,
            timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
            max_concurrent_requests: 8,
            headers: HashMap::new(),
        }
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self::new(Credential::ApiKey(key.into()))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent_requests(mut self, cap: u32) -> Self {
        self.max_concurrent_requests = cap.max(1);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}
