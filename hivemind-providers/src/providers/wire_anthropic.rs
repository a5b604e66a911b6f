//! Wire codec for the Anthropic-shaped provider family.
//!
//! System-role messages are extracted into the dedicated `system`
//! field, tool choices are normalized to object form, and every tool
//! schema carries `type: object`. Streaming uses the
//! `content_block_delta` / `message_delta` / `message_stop` event
//! grammar.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::models::{
    CompletionRequest, FinishReason, Role, ToolCall, ToolChoice, Usage,
};
use crate::providers::wire::{
    ensure_object_schema, normalize_tool_choice, FinalStream, StreamStep,
};

pub const API_VERSION: &str = "2023-06-01";
pub const OAUTH_BETA: &str = "oauth-2025-04-20";

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Value,
}

/// Serialize a request into the provider-native body. Called once per
/// top-level call; the bytes are reused across retry attempts.
pub fn build_body(
    request: &CompletionRequest,
    model: &str,
    stream: bool,
) -> Result<Vec<u8>, ProviderError> {
    let mut system = String::new();
    if let Some(prompt) = request.prompt.as_deref() {
        system.push_str(prompt);
    }

    let mut messages = Vec::new();
    for message in &request.messages {
        match message.role {
            Role::System => {
                if !message.content.is_empty() {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&message.content);
                }
            }
            Role::User => messages.push(WireMessage {
                role: "user",
                content: content_value(&message.content, &message.images),
            }),
            Role::Assistant => messages.push(WireMessage {
                role: "assistant",
                content: Value::String(message.content.clone()),
            }),
            // Tool results ride as user turns in this family.
            Role::Tool => messages.push(WireMessage {
                role: "user",
                content: Value::String(message.content.clone()),
            }),
        }
    }

    // A prompt with no conversation still needs one user turn.
    if messages.is_empty() && !system.is_empty() {
        messages.push(WireMessage {
            role: "user",
            content: Value::String(std::mem::take(&mut system)),
        });
    }

    // `none` means the caller forbids tool use entirely.
    let tools_forbidden = request.tool_choice == Some(ToolChoice::None);
    let tools: Vec<Value> = if tools_forbidden {
        Vec::new()
    } else {
        request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": ensure_object_schema(&tool.parameters),
                })
            })
            .collect()
    };

    let tool_choice = if tools.is_empty() {
        None
    } else {
        normalize_tool_choice(request.tool_choice.as_ref())
    };

    let wire = WireRequest {
        model: model.to_string(),
        max_tokens: if request.max_tokens == 0 {
            4096
        } else {
            request.max_tokens
        },
        messages,
        system: if system.is_empty() { None } else { Some(system) },
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.clone(),
        tools,
        tool_choice,
        stream: stream.then_some(true),
    };
    Ok(serde_json::to_vec(&wire)?)
}

fn content_value(text: &str, images: &[String]) -> Value {
    if images.is_empty() {
        return Value::String(text.to_string());
    }
    let mut blocks = vec![json!({"type": "text", "text": text})];
    for url in images {
        blocks.push(json!({
            "type": "image",
            "source": {"type": "url", "url": url},
        }));
    }
    Value::Array(blocks)
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Decoded unary response, before the adapter attaches correlation id,
/// latency, and confidence.
pub fn parse_response(body: &[u8]) -> Result<FinalStream, ProviderError> {
    let wire: WireResponse = serde_json::from_slice(body)?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in wire.content {
        match block.block_type.as_str() {
            "text" => {
                if let Some(text) = block.text {
                    content.push_str(&text);
                }
            }
            "tool_use" => tool_calls.push(ToolCall {
                id: block.id.unwrap_or_default(),
                name: block.name.unwrap_or_default(),
                arguments: block
                    .input
                    .map(|input| input.to_string())
                    .unwrap_or_else(|| "{}".to_string()),
            }),
            _ => {}
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        FinishReason::from_wire(wire.stop_reason.as_deref().unwrap_or(""))
    } else {
        FinishReason::ToolCalls
    };

    Ok(FinalStream {
        response_id: wire.id,
        content,
        tool_calls,
        finish_reason,
        usage: Usage::new(wire.usage.input_tokens, wire.usage.output_tokens),
    })
}

#[derive(Debug, Default)]
struct PartialTool {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulating parser for the streaming event grammar. Feed each SSE
/// record; the final assembled response comes out of `message_stop`.
#[derive(Debug, Default)]
pub struct StreamParser {
    response_id: String,
    content: String,
    stop_reason: FinishReason,
    usage: WireUsageTally,
    current_tool: Option<PartialTool>,
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Default)]
struct WireUsageTally {
    input_tokens: u32,
    output_tokens: u32,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, raw: &str) -> Result<StreamStep, ProviderError> {
        let event: Value = serde_json::from_str(raw)?;
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");

        match event_type {
            "message_start" => {
                if let Some(id) = event
                    .pointer("/message/id")
                    .and_then(Value::as_str)
                {
                    self.response_id = id.to_string();
                }
                if let Some(input) = event
                    .pointer("/message/usage/input_tokens")
                    .and_then(Value::as_u64)
                {
                    self.usage.input_tokens = input as u32;
                }
                Ok(StreamStep::Continue)
            }
            "content_block_start" => {
                let block = event.get("content_block");
                if block.and_then(|b| b.get("type")).and_then(Value::as_str) == Some("tool_use") {
                    self.current_tool = Some(PartialTool {
                        id: block
                            .and_then(|b| b.get("id"))
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: block
                            .and_then(|b| b.get("name"))
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        arguments: String::new(),
                    });
                }
                Ok(StreamStep::Continue)
            }
            "content_block_delta" => {
                if let Some(text) = event.pointer("/delta/text").and_then(Value::as_str) {
                    self.content.push_str(text);
                    return Ok(StreamStep::Delta(text.to_string()));
                }
                if let Some(partial) = event
                    .pointer("/delta/partial_json")
                    .and_then(Value::as_str)
                {
                    if let Some(tool) = self.current_tool.as_mut() {
                        tool.arguments.push_str(partial);
                    }
                }
                Ok(StreamStep::Continue)
            }
            "content_block_stop" => {
                if let Some(tool) = self.current_tool.take() {
                    self.tool_calls.push(ToolCall {
                        id: tool.id,
                        name: tool.name,
                        arguments: if tool.arguments.is_empty() {
                            "{}".to_string()
                        } else {
                            tool.arguments
                        },
                    });
                }
                Ok(StreamStep::Continue)
            }
            "message_delta" => {
                if let Some(reason) = event
                    .pointer("/delta/stop_reason")
                    .and_then(Value::as_str)
                {
                    self.stop_reason = FinishReason::from_wire(reason);
                }
                if let Some(output) = event
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_u64)
                {
                    self.usage.output_tokens = output as u32;
                }
                Ok(StreamStep::Continue)
            }
            "message_stop" => Ok(StreamStep::Finished(self.take_final())),
            // ping and unknown event types are ignored
            _ => Ok(StreamStep::Continue),
        }
    }

    /// Assemble the terminal element from accumulated state.
    pub fn take_final(&mut self) -> FinalStream {
        let tool_calls = std::mem::take(&mut self.tool_calls);
        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else if self.stop_reason.is_terminal() {
            self.stop_reason
        } else {
            FinishReason::Stop
        };
        FinalStream {
            response_id: std::mem::take(&mut self.response_id),
            content: std::mem::take(&mut self.content),
            tool_calls,
            finish_reason,
            usage: Usage::new(self.usage.input_tokens, self.usage.output_tokens),
        }
    }
}
