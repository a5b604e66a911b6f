//! Request and response types shared by every provider adapter.
//!
//! These are the caller-facing shapes; each wire family translates them
//! to and from its provider-native JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ProviderError;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Image URLs attached to the turn, for vision-capable providers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }
}

/// A tool the model may call, described by a JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-schema parameters; serialized with `type: object` always
    /// present
    pub parameters: serde_json::Value,
}

/// How the model should use the tool catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// Model decides whether to call a tool
    Auto,
    /// Model must call some tool
    Any,
    /// Model must call the named tool
    Tool { name: String },
    /// Model must not call tools
    None,
}

/// A structured tool invocation returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments exactly as the provider produced them
    pub arguments: String,
}

/// Canonical terminal labels for a completion. [`FinishReason::None`]
/// (the empty string on the wire) marks an intermediate streaming
/// chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "end_turn")]
    EndTurn,
    #[serde(rename = "max_tokens")]
    MaxTokens,
    #[serde(rename = "stop_sequence")]
    StopSequence,
    #[serde(rename = "tool_calls")]
    ToolCalls,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "")]
    None,
}

impl FinishReason {
    /// Map a provider-reported reason onto the canonical set. Tool-use
    /// flavored reasons collapse to `tool_calls`; `length` means the
    /// token budget ran out; anything unrecognized is a plain stop.
    pub fn from_wire(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return FinishReason::None;
        }
        if normalized.contains("tool") || normalized.contains("function_call") {
            return FinishReason::ToolCalls;
        }
        match normalized.as_str() {
            "stop" => FinishReason::Stop,
            "end_turn" => FinishReason::EndTurn,
            "length" | "max_tokens" => FinishReason::MaxTokens,
            "stop_sequence" => FinishReason::StopSequence,
            "error" => FinishReason::Error,
            _ => FinishReason::Stop,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::EndTurn => "end_turn",
            FinishReason::MaxTokens => "max_tokens",
            FinishReason::StopSequence => "stop_sequence",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Error => "error",
            FinishReason::None => "",
        }
    }

    /// True for everything except a streaming chunk marker.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FinishReason::None)
    }
}

impl Default for FinishReason {
    fn default() -> Self {
        FinishReason::None
    }
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// A completion request as submitted to the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Correlation id echoed back on the response
    #[serde(default)]
    pub id: String,
    /// Optional system prompt, merged with any system-role messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// 0 means "adapter default" (4096 for every shipped family)
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl CompletionRequest {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    pub fn with_user_message(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message::user(content));
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Check the request invariants before any wire translation.
    pub fn validate(&self) -> Result<(), ProviderError> {
        let prompt_empty = self.prompt.as_deref().unwrap_or("").is_empty();
        if self.messages.is_empty() && prompt_empty {
            return Err(ProviderError::InvalidRequest {
                message: "request needs at least one message or a non-empty prompt".to_string(),
            });
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ProviderError::InvalidRequest {
                    message: format!("temperature {temperature} outside [0, 2]"),
                });
            }
        }
        if let Some(top_p) = self.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(ProviderError::InvalidRequest {
                    message: format!("top_p {top_p} outside [0, 1]"),
                });
            }
        }
        Ok(())
    }
}

/// A completion (or one streaming chunk of one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Correlation id from the request
    pub id: String,
    /// Provider-assigned response id
    pub response_id: String,
    pub provider: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: Usage,
    /// Advisory quality estimate in `[0, 1]`
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl CompletionResponse {
    /// Intermediate streaming chunk carrying only delta text.
    pub fn chunk(request_id: &str, provider: &str, delta: impl Into<String>) -> Self {
        Self {
            id: request_id.to_string(),
            response_id: String::new(),
            provider: provider.to_string(),
            content: delta.into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::None,
            usage: Usage::default(),
            confidence: 0.0,
            latency_ms: 0,
            created_at: Utc::now(),
        }
    }

    /// Terminal stream element describing a mid-stream failure.
    pub fn stream_error(request_id: &str, provider: &str, error: &ProviderError) -> Self {
        Self {
            id: request_id.to_string(),
            response_id: String::new(),
            provider: provider.to_string(),
            content: error.to_string(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Error,
            usage: Usage::default(),
            confidence: 0.0,
            latency_ms: 0,
            created_at: Utc::now(),
        }
    }
}

/// What a provider can do, as reported by its adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub streaming: bool,
    pub tool_calling: bool,
    pub vision: bool,
    pub reasoning: bool,
    pub models: Vec<String>,
    pub features: Vec<String>,
    pub request_kinds: Vec<String>,
    pub limits: CapabilityLimits,
}

/// Hard limits advertised by a provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CapabilityLimits {
    pub max_context_tokens: u32,
    pub max_input_length: u32,
    pub max_output_length: u32,
    pub max_concurrent_requests: u32,
}

impl Default for CapabilityLimits {
    fn default() -> Self {
        Self {
            max_context_tokens: 128_000,
            max_input_length: 1_000_000,
            max_output_length: 8_192,
            max_concurrent_requests: 8,
        }
    }
}

/// Health of a registered provider as tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown,
    Healthy,
    RateLimited,
    AuthFailed,
    Unhealthy,
}

/// A registration record for building an adapter from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub provider_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub max_concurrent_requests: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_request_is_invalid() {
        let request = CompletionRequest::new();
        assert!(matches!(
            request.validate(),
            Err(ProviderError::InvalidRequest { .. })
        ));

        let with_prompt = CompletionRequest::new().with_prompt("hi");
        assert!(with_prompt.validate().is_ok());

        let with_message = CompletionRequest::new().with_user_message("hi");
        assert!(with_message.validate().is_ok());
    }

    #[test]
    fn parameter_ranges_are_enforced() {
        let mut request = CompletionRequest::new().with_user_message("hi");
        request.temperature = Some(2.5);
        assert!(request.validate().is_err());

        request.temperature = Some(2.0);
        assert!(request.validate().is_ok());

        request.top_p = Some(1.5);
        assert!(request.validate().is_err());
        request.top_p = Some(1.0);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn finish_reason_canonicalization() {
        assert_eq!(FinishReason::from_wire("END_TURN"), FinishReason::EndTurn);
        assert_eq!(FinishReason::from_wire("length"), FinishReason::MaxTokens);
        assert_eq!(FinishReason::from_wire("max_tokens"), FinishReason::MaxTokens);
        assert_eq!(FinishReason::from_wire("tool_use"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_wire("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_wire("stop_sequence"), FinishReason::StopSequence);
        assert_eq!(FinishReason::from_wire(""), FinishReason::None);
        assert_eq!(FinishReason::from_wire("banana"), FinishReason::Stop);
    }

    #[test]
    fn finish_reason_serializes_to_wire_names() {
        assert_eq!(
            serde_json::to_string(&FinishReason::EndTurn).unwrap(),
            "\"end_turn\""
        );
        assert_eq!(serde_json::to_string(&FinishReason::None).unwrap(), "\"\"");
        let parsed: FinishReason = serde_json::from_str("\"tool_calls\"").unwrap();
        assert_eq!(parsed, FinishReason::ToolCalls);
    }

    #[test]
    fn usage_totals() {
        let usage = Usage::new(10, 32);
        assert_eq!(usage.total_tokens, 42);
    }
}
