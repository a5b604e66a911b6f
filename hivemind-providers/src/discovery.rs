//! Environment-driven provider discovery.
//!
//! Walks the catalog and instantiates every provider whose key variable
//! is set and non-empty. Base URLs honor `<PROVIDER>_BASE_URL`
//! overrides. When `CLAUDE_CODE_USE_OAUTH_CREDENTIALS=true` and an
//! OAuth token source is supplied, Anthropic-shaped providers use it
//! instead of their API key.

use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{AccessTokens, AuthHeader, Credential, OAUTH_OPT_IN_ENV};
use crate::error::ProviderError;
use crate::providers::adapter::HttpAdapter;
use crate::providers::catalog::{self, ProviderDescriptor};
use crate::providers::wire::WireFamily;
use crate::providers::AdapterConfig;
use crate::registry::ProviderRegistry;

/// Outcome of one discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub registered: Vec<String>,
    pub skipped: Vec<String>,
}

/// Register every provider whose environment variable carries a value.
/// Already-registered names are left untouched.
pub async fn discover_from_env(
    registry: &ProviderRegistry,
    oauth_tokens: Option<Arc<dyn AccessTokens>>,
) -> DiscoveryReport {
    let oauth_opted_in = std::env::var(OAUTH_OPT_IN_ENV)
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let mut report = DiscoveryReport::default();
    for descriptor in catalog::CATALOG {
        let value = std::env::var(descriptor.env_key).unwrap_or_default();
        if value.is_empty() {
            report.skipped.push(descriptor.name.to_string());
            continue;
        }

        match build_discovered(descriptor, value, oauth_opted_in, oauth_tokens.as_ref()) {
            Ok(adapter) => match registry.register(Arc::new(adapter)).await {
                Ok(()) => {
                    info!(provider = descriptor.name, env = descriptor.env_key, "discovered provider");
                    report.registered.push(descriptor.name.to_string());
                }
                Err(error) => {
                    warn!(provider = descriptor.name, "discovery skipped: {error}");
                    report.skipped.push(descriptor.name.to_string());
                }
            },
            Err(error) => {
                warn!(provider = descriptor.name, "discovery failed: {error}");
                report.skipped.push(descriptor.name.to_string());
            }
        }
    }
    report
}

fn build_discovered(
    descriptor: &'static ProviderDescriptor,
    env_value: String,
    oauth_opted_in: bool,
    oauth_tokens: Option<&Arc<dyn AccessTokens>>,
) -> Result<HttpAdapter, ProviderError> {
    let credential = match descriptor.auth {
        // Keyless providers use their env var as the endpoint address.
        AuthHeader::None => Credential::None,
        _ => {
            if oauth_opted_in && descriptor.wire == WireFamily::Anthropic {
                match oauth_tokens {
                    Some(tokens) => Credential::OAuth(tokens.clone()),
                    None => Credential::ApiKey(env_value.clone()),
                }
            } else {
                Credential::ApiKey(env_value.clone())
            }
        }
    };

    let mut config = AdapterConfig::new(credential);
    if descriptor.auth == AuthHeader::None {
        config = config.with_base_url(env_value);
    }
    let base_override = std::env::var(descriptor.base_url_env()).unwrap_or_default();
    if !base_override.is_empty() {
        config = config.with_base_url(base_override);
    }

    HttpAdapter::from_descriptor(descriptor, config)
}
