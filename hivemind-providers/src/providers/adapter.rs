//! The one HTTP adapter behind every catalog entry.
//!
//! Translation, dispatch-through-retry, response mapping, and the
//! confidence heuristic live here once; descriptors supply the URL,
//! auth shape, wire family, and defaults. Request bodies are marshaled
//! a single time and the byte buffer is cloned per retry attempt.

use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::auth::AuthHeader;
use crate::error::ProviderError;
use crate::models::{
    CapabilityLimits, CompletionRequest, CompletionResponse, FinishReason, ProviderCapabilities,
};
use crate::providers::catalog::ProviderDescriptor;
use crate::providers::http_client::{map_error_response, map_transport_error, HttpProviderClient};
use crate::providers::sse::{SseDecoder, SseRecord};
use crate::providers::wire::{FinalStream, StreamStep, WireFamily};
use crate::providers::{AdapterConfig, CompletionStream, Provider};
use crate::retry;

/// HTTP adapter parameterized by a [`ProviderDescriptor`].
pub struct HttpAdapter {
    descriptor: &'static ProviderDescriptor,
    name: String,
    http: HttpProviderClient,
    config: AdapterConfig,
}

impl HttpAdapter {
    pub fn from_descriptor(
        descriptor: &'static ProviderDescriptor,
        config: AdapterConfig,
    ) -> Result<Self, ProviderError> {
        let mut headers: HashMap<String, String> = descriptor
            .extra_headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        headers.extend(config.headers.clone());

        let http = HttpProviderClient::new(
            config.timeout,
            config.base_url.clone(),
            descriptor.default_base_url,
            &headers,
        )?;

        Ok(Self {
            descriptor,
            name: config
                .name
                .clone()
                .unwrap_or_else(|| descriptor.name.to_string()),
            http,
            config,
        })
    }

    pub fn descriptor(&self) -> &'static ProviderDescriptor {
        self.descriptor
    }

    pub fn max_concurrent_requests(&self) -> u32 {
        self.config.max_concurrent_requests
    }

    fn model_for(&self, request: &CompletionRequest) -> String {
        request
            .model
            .clone()
            .or_else(|| self.config.default_model.clone())
            .unwrap_or_else(|| self.descriptor.default_model.to_string())
    }

    /// Credential headers for one attempt. Resolved per request so
    /// rotating OAuth tokens are always current.
    async fn auth_headers(&self) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        let Some(secret) = self.config.credential.resolve().await? else {
            return Ok(headers);
        };

        let oauth = self.config.credential.is_oauth();
        // OAuth tokens always travel as a bearer, whatever the API-key
        // convention of the provider is.
        if oauth || self.descriptor.auth == AuthHeader::Bearer {
            let value = format!("Bearer {secret}")
                .parse::<HeaderValue>()
                .map_err(|_| ProviderError::Configuration {
                    message: "credential is not a valid header value".to_string(),
                })?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        } else if let AuthHeader::Header(name) = self.descriptor.auth {
            let name = name
                .parse::<HeaderName>()
                .map_err(|_| ProviderError::Configuration {
                    message: format!("invalid auth header name {name}"),
                })?;
            let value = secret
                .parse::<HeaderValue>()
                .map_err(|_| ProviderError::Configuration {
                    message: "credential is not a valid header value".to_string(),
                })?;
            headers.insert(name, value);
        }

        if oauth && self.descriptor.wire == WireFamily::Anthropic {
            headers.insert(
                HeaderName::from_static("anthropic-beta"),
                HeaderValue::from_static(super::wire_anthropic::OAUTH_BETA),
            );
            headers.insert(
                HeaderName::from_static("x-app"),
                HeaderValue::from_static(env!("CARGO_PKG_NAME")),
            );
        }

        Ok(headers)
    }

    /// One wire attempt: send the pre-marshaled body, map non-success
    /// statuses, return the raw response bytes.
    async fn send_once(&self, body: Vec<u8>) -> Result<Vec<u8>, ProviderError> {
        let headers = self.auth_headers().await?;
        let response = self
            .http
            .post_bytes(self.descriptor.chat_path, body, headers)
            .await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        Ok(bytes.to_vec())
    }

    fn assemble(
        &self,
        request_id: &str,
        decoded: FinalStream,
        latency_ms: u64,
    ) -> CompletionResponse {
        let confidence = estimate_confidence(decoded.finish_reason, decoded.content.len());
        CompletionResponse {
            id: request_id.to_string(),
            response_id: decoded.response_id,
            provider: self.name.clone(),
            content: decoded.content,
            tool_calls: decoded.tool_calls,
            finish_reason: decoded.finish_reason,
            usage: decoded.usage,
            confidence,
            latency_ms,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Provider for HttpAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            vision: self.descriptor.vision,
            reasoning: self.descriptor.reasoning,
            models: self.descriptor.models.iter().map(|m| m.to_string()).collect(),
            features: vec![
                "completion".to_string(),
                "streaming".to_string(),
                "tools".to_string(),
            ],
            request_kinds: vec!["unary".to_string(), "stream".to_string()],
            limits: CapabilityLimits {
                max_concurrent_requests: self.config.max_concurrent_requests,
                ..CapabilityLimits::default()
            },
        }
    }

    fn validate_config(&self, config: &HashMap<String, String>) -> (bool, Vec<String>) {
        let mut missing = Vec::new();
        if self.descriptor.auth != AuthHeader::None
            && config.get("api_key").map(String::is_empty).unwrap_or(true)
        {
            missing.push(format!(
                "api_key is required for provider {} (env {})",
                self.descriptor.name, self.descriptor.env_key
            ));
        }
        if let Some(base_url) = config.get("base_url") {
            if !base_url.is_empty() && !base_url.starts_with("http") {
                missing.push(format!("base_url must be an http(s) URL, got {base_url}"));
            }
        }
        (missing.is_empty(), missing)
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<CompletionResponse, ProviderError> {
        request.validate()?;
        let model = self.model_for(&request);
        let body = self.descriptor.wire.build_body(&request, &model, false)?;

        let started = Instant::now();
        let bytes = retry::execute(&self.config.retry, deadline, || {
            let body = body.clone();
            self.send_once(body)
        })
        .await?;

        let decoded = self.descriptor.wire.parse_response(&bytes)?;
        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(
            provider = %self.name,
            model = %model,
            latency_ms,
            finish = decoded.finish_reason.as_str(),
            "completion finished"
        );
        Ok(self.assemble(&request.id, decoded, latency_ms))
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<CompletionStream, ProviderError> {
        request.validate()?;
        let model = self.model_for(&request);
        let body = self.descriptor.wire.build_body(&request, &model, true)?;

        // The retry engine covers connection establishment; once bytes
        // start flowing the stream is not restartable.
        let response = retry::execute(&self.config.retry, deadline, || {
            let body = body.clone();
            async move {
                let headers = self.auth_headers().await?;
                let response = self
                    .http
                    .post_bytes(self.descriptor.chat_path, body, headers)
                    .await?;
                if !response.status().is_success() {
                    return Err(map_error_response(response).await);
                }
                Ok(response)
            }
        })
        .await?;

        let provider = self.name.clone();
        let request_id = request.id.clone();
        let wire = self.descriptor.wire;
        let started = Instant::now();

        let stream = stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            let mut parser = wire.stream_parser();

            loop {
                let chunk = match deadline {
                    Some(deadline) => {
                        match tokio::time::timeout_at(deadline, bytes_stream.next()).await {
                            Ok(chunk) => chunk,
                            Err(_) => {
                                yield Ok(CompletionResponse::stream_error(
                                    &request_id,
                                    &provider,
                                    &ProviderError::Timeout,
                                ));
                                return;
                            }
                        }
                    }
                    None => bytes_stream.next().await,
                };

                let data = match chunk {
                    Some(Ok(data)) => data,
                    Some(Err(error)) => {
                        // Mid-stream failures surface as one terminal
                        // element, then the stream closes.
                        yield Ok(CompletionResponse::stream_error(
                            &request_id,
                            &provider,
                            &map_transport_error(error),
                        ));
                        return;
                    }
                    None => {
                        // Wire closed without a terminator; emit what
                        // accumulated.
                        let mut done = parser.take_final();
                        if done.finish_reason == FinishReason::None {
                            done.finish_reason = FinishReason::Stop;
                        }
                        let latency = started.elapsed().as_millis() as u64;
                        let confidence =
                            estimate_confidence(done.finish_reason, done.content.len());
                        yield Ok(CompletionResponse {
                            id: request_id.clone(),
                            response_id: done.response_id,
                            provider: provider.clone(),
                            content: done.content,
                            tool_calls: done.tool_calls,
                            finish_reason: done.finish_reason,
                            usage: done.usage,
                            confidence,
                            latency_ms: latency,
                            created_at: Utc::now(),
                        });
                        return;
                    }
                };

                for record in decoder.feed(&data) {
                    let step = match record {
                        SseRecord::Done => Ok(StreamStep::Finished(parser.take_final())),
                        SseRecord::Data(payload) => parser.apply(&payload),
                    };
                    match step {
                        Ok(StreamStep::Delta(text)) => {
                            yield Ok(CompletionResponse::chunk(&request_id, &provider, text));
                        }
                        Ok(StreamStep::Finished(done)) => {
                            let latency = started.elapsed().as_millis() as u64;
                            let confidence =
                                estimate_confidence(done.finish_reason, done.content.len());
                            yield Ok(CompletionResponse {
                                id: request_id.clone(),
                                response_id: done.response_id,
                                provider: provider.clone(),
                                content: done.content,
                                tool_calls: done.tool_calls,
                                finish_reason: done.finish_reason,
                                usage: done.usage,
                                confidence,
                                latency_ms: latency,
                                created_at: Utc::now(),
                            });
                            return;
                        }
                        Ok(StreamStep::Continue) => {}
                        Err(error) => {
                            yield Ok(CompletionResponse::stream_error(
                                &request_id,
                                &provider,
                                &error,
                            ));
                            return;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if let Some(models_path) = self.descriptor.models_path {
            let headers = self.auth_headers().await?;
            let response = self.http.get(models_path, headers).await?;
            if !response.status().is_success() {
                return Err(map_error_response(response).await);
            }
            return Ok(());
        }

        // No models endpoint; probe with a one-token completion.
        let mut probe = CompletionRequest::new().with_user_message("Hi");
        probe.max_tokens = 1;
        let deadline = Some(Instant::now() + std::time::Duration::from_secs(10));
        self.complete(probe, deadline).await.map(|_| ())
    }
}

/// Advisory confidence from the finish reason and content length.
/// Clean terminals score higher, truncation is penalized, longer
/// answers get a small boost.
pub fn estimate_confidence(finish_reason: FinishReason, content_len: usize) -> f32 {
    let mut confidence: f32 = match finish_reason {
        FinishReason::ToolCalls => 0.9,
        _ => 0.85,
    };

    match finish_reason {
        FinishReason::Stop | FinishReason::EndTurn | FinishReason::StopSequence => {
            confidence += 0.05;
        }
        FinishReason::MaxTokens => confidence -= 0.1,
        FinishReason::Error => confidence -= 0.5,
        _ => {}
    }

    if content_len >= 100 {
        confidence += 0.02;
    }
    if content_len >= 500 {
        confidence += 0.03;
    }

    confidence.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::catalog;

    fn adapter(name: &str) -> HttpAdapter {
        HttpAdapter::from_descriptor(
            catalog::descriptor(name).unwrap(),
            AdapterConfig::api_key("sk-test"),
        )
        .unwrap()
    }

    #[test]
    fn model_fallback_chain() {
        let adapter = adapter("anthropic");
        let request = CompletionRequest::new().with_user_message("hi");
        assert_eq!(adapter.model_for(&request), "claude-sonnet-4-20250514");

        let request = request.with_model("claude-3-5-haiku-20241022");
        assert_eq!(adapter.model_for(&request), "claude-3-5-haiku-20241022");

        let configured = HttpAdapter::from_descriptor(
            catalog::descriptor("anthropic").unwrap(),
            AdapterConfig::api_key("sk-test").with_default_model("claude-opus-4-20250514"),
        )
        .unwrap();
        let request = CompletionRequest::new().with_user_message("hi");
        assert_eq!(configured.model_for(&request), "claude-opus-4-20250514");
    }

    #[tokio::test]
    async fn api_key_header_shape_follows_descriptor() {
        let anthropic = adapter("anthropic");
        let headers = anthropic.auth_headers().await.unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-test");
        assert!(headers.get(reqwest::header::AUTHORIZATION).is_none());

        let openai = adapter("openai");
        let headers = openai.auth_headers().await.unwrap();
        assert_eq!(
            headers.get(reqwest::header::AUTHORIZATION).unwrap(),
            "Bearer sk-test"
        );
    }

    #[tokio::test]
    async fn oauth_uses_bearer_plus_beta_headers() {
        use crate::auth::{Credential, StaticAccessToken};
        use std::sync::Arc;

        let adapter = HttpAdapter::from_descriptor(
            catalog::descriptor("anthropic").unwrap(),
            AdapterConfig::new(Credential::OAuth(Arc::new(StaticAccessToken(
                "oat-123".to_string(),
            )))),
        )
        .unwrap();

        let headers = adapter.auth_headers().await.unwrap();
        assert_eq!(
            headers.get(reqwest::header::AUTHORIZATION).unwrap(),
            "Bearer oat-123"
        );
        assert_eq!(headers.get("anthropic-beta").unwrap(), "oauth-2025-04-20");
        assert!(headers.get("x-app").is_some());
        // The API-key header must not appear alongside OAuth.
        assert!(headers.get("x-api-key").is_none());
    }

    #[test]
    fn validate_config_reports_missing_key() {
        let adapter = adapter("openai");
        let (ok, missing) = adapter.validate_config(&HashMap::new());
        assert!(!ok);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].contains("OPENAI_API_KEY"));

        let mut config = HashMap::new();
        config.insert("api_key".to_string(), "sk-x".to_string());
        let (ok, missing) = adapter.validate_config(&config);
        assert!(ok, "{missing:?}");

        config.insert("base_url".to_string(), "ftp://nope".to_string());
        let (ok, _) = adapter.validate_config(&config);
        assert!(!ok);
    }

    #[test]
    fn confidence_heuristic_bands() {
        // Clean terminal beats truncation.
        let clean = estimate_confidence(FinishReason::EndTurn, 50);
        let truncated = estimate_confidence(FinishReason::MaxTokens, 50);
        assert!(clean > truncated);

        // Longer content nudges upward within a reason.
        let short = estimate_confidence(FinishReason::Stop, 10);
        let medium = estimate_confidence(FinishReason::Stop, 200);
        let long = estimate_confidence(FinishReason::Stop, 1000);
        assert!(short < medium && medium < long);

        // Tool calls start from the higher base.
        assert!(estimate_confidence(FinishReason::ToolCalls, 0) >= 0.9);

        // Always clamped.
        for reason in [
            FinishReason::Stop,
            FinishReason::EndTurn,
            FinishReason::MaxTokens,
            FinishReason::ToolCalls,
            FinishReason::Error,
        ] {
            for len in [0, 100, 500, 10_000] {
                let value = estimate_confidence(reason, len);
                assert!((0.0..=1.0).contains(&value));
            }
        }
    }
}
