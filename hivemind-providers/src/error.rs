//! Error types for the provider dispatch layer.
//!
//! Every surfaced failure is one of these kinds. The retry engine keys
//! off [`ProviderError::is_retryable`], the auth-retry path off
//! [`ProviderError::is_auth`], and the circuit breaker off
//! [`ProviderError::counts_as_failure`].

use thiserror::Error;

/// Provider-layer failures.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP 429 from the provider
    #[error("rate limited by provider")]
    RateLimited,

    /// Caller deadline exceeded
    #[error("request timed out")]
    Timeout,

    /// HTTP 401 that survived the single auth-retry
    #[error("authentication failed: {message}")]
    AuthFailed { message: String },

    /// Credential is valid but scoped to a different product; never
    /// retried
    #[error("credential restricted to another product: {message}")]
    AuthProductRestricted { message: String },

    /// Transport-level failure (DNS, TLS, connect, broken pipe)
    #[error("connection error: {0}")]
    Connection(#[from] reqwest::Error),

    /// HTTP 503 from the provider
    #[error("provider unavailable")]
    Unavailable,

    /// HTTP 529 or an equivalent overload signal
    #[error("provider overloaded")]
    Overloaded,

    /// HTTP 400 or a request that failed local validation
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Circuit breaker is open for this provider
    #[error("circuit open for provider {provider}")]
    CircuitOpen { provider: String },

    /// Concurrency permit did not become available before the deadline
    #[error("timed out waiting for a request permit")]
    PermitTimeout,

    /// Caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// Provider response did not match the expected wire shape
    #[error("response parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Any other provider API error, by status code
    #[error("provider API error: {code} - {message}")]
    Api { code: u16, message: String },

    /// Invalid or missing provider configuration
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl ProviderError {
    /// Errors the retry engine will attempt again within its budget:
    /// 429, 500, 502, 503, 504, and transport failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited
            | ProviderError::Unavailable
            | ProviderError::Overloaded
            | ProviderError::Connection(_) => true,
            ProviderError::Api { code, .. } => matches!(code, 500 | 502 | 504),
            _ => false,
        }
    }

    /// Errors eligible for the single out-of-budget auth-retry.
    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::AuthFailed { .. })
    }

    /// Whether the circuit breaker should record this error as a
    /// provider failure. Caller cancellation and malformed requests say
    /// nothing about provider health.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(
            self,
            ProviderError::Cancelled | ProviderError::InvalidRequest { .. }
        )
    }
}
