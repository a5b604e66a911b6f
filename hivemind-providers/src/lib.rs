//! # Hivemind Providers
//!
//! Uniform dispatch over 20+ heterogeneous LLM completion services.
//! Every provider hides behind one contract with the same reliability
//! properties: bounded per-provider concurrency, circuit breaking,
//! budgeted retries with an auth-retry escape hatch, and streaming with
//! correct cancellation.
//!
//! ## Overview
//!
//! - **Registry**: registration, env-var auto-discovery, verifier-score
//!   ordering, graceful and forced deregistration
//! - **Adapter template**: one HTTP adapter parameterized by a
//!   descriptor table; a new provider is ~40 lines of descriptor
//! - **Wire families**: Anthropic-shaped and OpenAI-shaped codecs cover
//!   the whole catalog, unary and SSE streaming
//! - **Reliability**: per-provider semaphore, circuit breaker, and
//!   retry engine composed in a fixed order
//! - **Auth**: API-key headers, per-request OAuth token reads, and a
//!   CLI-delegation adapter with session continuity
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hivemind_providers::{
//!     discover_from_env, CompletionRequest, ProviderRegistry,
//! };
//!
//! let registry = ProviderRegistry::new();
//! discover_from_env(&registry, None).await;
//!
//! let request = CompletionRequest::new()
//!     .with_user_message("Summarize the build failure");
//! let response = registry.complete(request, None).await?;
//! println!("{} said: {}", response.provider, response.content);
//! ```
//!
//! ## Streaming
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! let mut stream = registry
//!     .complete_stream_with("anthropic", request, None)
//!     .await?;
//! while let Some(chunk) = stream.next().await {
//!     let chunk = chunk?;
//!     if chunk.finish_reason.is_terminal() {
//!         println!("\nfull answer: {}", chunk.content);
//!     } else {
//!         print!("{}", chunk.content);
//!     }
//! }
//! ```
//!
//! Dispatch composes `acquire permit -> consult breaker -> retry loop ->
//! release permit`; the layers are deliberately separate and the order
//! is fixed.

pub mod auth;
pub mod circuit_breaker;
pub mod discovery;
pub mod duration_serde;
pub mod error;
pub mod limiter;
pub mod models;
pub mod providers;
pub mod registry;
pub mod retry;

pub use auth::{AccessTokens, AuthHeader, Credential, StaticAccessToken};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use discovery::{discover_from_env, DiscoveryReport};
pub use error::ProviderError;
pub use limiter::{ConcurrencyLimiter, LimiterStats, RequestPermit};
pub use models::{
    CapabilityLimits, CompletionRequest, CompletionResponse, FinishReason, HealthState, Message,
    ProviderCapabilities, ProviderRecord, Role, ToolCall, ToolChoice, ToolSpec, Usage,
};
pub use providers::adapter::HttpAdapter;
pub use providers::catalog::{descriptor, ProviderDescriptor, CATALOG};
pub use providers::cli::{CliAdapter, CliProviderConfig};
pub use providers::wire::WireFamily;
pub use providers::{AdapterConfig, CompletionStream, Provider};
pub use registry::{ProviderMetrics, ProviderRegistry, ProviderState};
pub use retry::RetryConfig;

/// Result type for provider-layer operations.
pub type Result<T> = std::result::Result<T, ProviderError>;
