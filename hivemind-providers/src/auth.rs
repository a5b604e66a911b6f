//! Credential handling for provider adapters.
//!
//! Adapters never cache OAuth tokens; the reader is queried on every
//! request because tokens rotate underneath long-lived processes.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ProviderError;

/// Environment variable that opts a discovered Anthropic-shaped
/// provider into OAuth credentials instead of an API key.
pub const OAUTH_OPT_IN_ENV: &str = "CLAUDE_CODE_USE_OAUTH_CREDENTIALS";

/// Header shape a provider expects its credential in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthHeader {
    /// `Authorization: Bearer <key-or-token>`
    Bearer,
    /// A named header carrying the bare credential, e.g.
    /// `x-api-key: <key>` or Azure's `api-key: <key>`
    Header(&'static str),
    /// No credential (local runtimes such as Ollama)
    None,
}

/// Source of rotating OAuth access tokens.
#[async_trait]
pub trait AccessTokens: Send + Sync {
    /// The token to attach to the next request.
    async fn access_token(&self) -> Result<String, ProviderError>;
}

/// Fixed token source for tests and short-lived tools.
pub struct StaticAccessToken(pub String);

#[async_trait]
impl AccessTokens for StaticAccessToken {
    async fn access_token(&self) -> Result<String, ProviderError> {
        Ok(self.0.clone())
    }
}

/// What a provider authenticates with.
#[derive(Clone)]
pub enum Credential {
    ApiKey(String),
    OAuth(Arc<dyn AccessTokens>),
    None,
}

impl Credential {
    pub fn is_oauth(&self) -> bool {
        matches!(self, Credential::OAuth(_))
    }

    /// Materialize the credential value for one request.
    pub async fn resolve(&self) -> Result<Option<String>, ProviderError> {
        match self {
            Credential::ApiKey(key) => Ok(Some(key.clone())),
            Credential::OAuth(reader) => Ok(Some(reader.access_token().await?)),
            Credential::None => Ok(None),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret itself.
        match self {
            Credential::ApiKey(_) => f.write_str("Credential::ApiKey(..)"),
            Credential::OAuth(_) => f.write_str("Credential::OAuth(..)"),
            Credential::None => f.write_str("Credential::None"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_resolves() {
        let credential = Credential::OAuth(Arc::new(StaticAccessToken("tok-1".to_string())));
        assert_eq!(credential.resolve().await.unwrap().unwrap(), "tok-1");
        assert!(credential.is_oauth());
    }

    #[tokio::test]
    async fn api_key_and_none_resolve() {
        let key = Credential::ApiKey("sk-test".to_string());
        assert_eq!(key.resolve().await.unwrap().unwrap(), "sk-test");
        assert!(Credential::None.resolve().await.unwrap().is_none());
    }

    #[test]
    fn debug_never_leaks_secrets() {
        let rendered = format!("{:?}", Credential::ApiKey("sk-secret".to_string()));
        assert!(!rendered.contains("secret"));
    }
}
