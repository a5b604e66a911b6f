//! Wire codec for the OpenAI-compatible provider family, which covers
//! most of the catalog: OpenAI itself plus the many vendors exposing a
//! `/chat/completions` surface.
//!
//! Streaming is chunked `choices[].delta` records terminated by the
//! literal `[DONE]` line.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::models::{CompletionRequest, FinishReason, Role, ToolCall, ToolChoice, Usage};
use crate::providers::wire::{
    ensure_object_schema, normalize_tool_choice, FinalStream, StreamStep,
};

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
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

pub fn build_body(
    request: &CompletionRequest,
    model: &str,
    stream: bool,
) -> Result<Vec<u8>, ProviderError> {
    let mut messages = Vec::new();
    if let Some(prompt) = request.prompt.as_deref() {
        if !prompt.is_empty() {
            messages.push(WireMessage {
                role: "system",
                content: Value::String(prompt.to_string()),
            });
        }
    }
    for message in &request.messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        messages.push(WireMessage {
            role,
            content: content_value(&message.content, &message.images),
        });
    }

    let tools_forbidden = request.tool_choice == Some(ToolChoice::None);
    let tools: Vec<Value> = if tools_forbidden {
        Vec::new()
    } else {
        request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": ensure_object_schema(&tool.parameters),
                    },
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
        messages,
        max_tokens: if request.max_tokens == 0 {
            4096
        } else {
            request.max_tokens
        },
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop.clone(),
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
    let mut parts = vec![json!({"type": "text", "text": text})];
    for url in images {
        parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
    }
    Value::Array(parts)
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

pub fn parse_response(body: &[u8]) -> Result<FinalStream, ProviderError> {
    let wire: WireResponse = serde_json::from_slice(body)?;
    let usage = wire.usage.unwrap_or_default();

    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Api {
            code: 0,
            message: "response carried no choices".to_string(),
        })?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: if call.function.arguments.is_empty() {
                "{}".to_string()
            } else {
                call.function.arguments
            },
        })
        .collect();

    let finish_reason = if tool_calls.is_empty() {
        FinishReason::from_wire(choice.finish_reason.as_deref().unwrap_or(""))
    } else {
        FinishReason::ToolCalls
    };

    Ok(FinalStream {
        response_id: wire.id,
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason,
        usage: Usage::new(usage.prompt_tokens, usage.completion_tokens),
    })
}

#[derive(Debug, Default)]
struct PartialTool {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulating parser for chunked streaming responses. The `[DONE]`
/// terminator is handled by the adapter, which calls `take_final`.
#[derive(Debug, Default)]
pub struct StreamParser {
    response_id: String,
    content: String,
    finish_reason: FinishReason,
    usage: Usage,
    tools: Vec<PartialTool>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, raw: &str) -> Result<StreamStep, ProviderError> {
        let chunk: Value = serde_json::from_str(raw)?;

        if self.response_id.is_empty() {
            if let Some(id) = chunk.get("id").and_then(Value::as_str) {
                self.response_id = id.to_string();
            }
        }
        if let Some(usage) = chunk.get("usage") {
            let input = usage
                .get("prompt_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            let output = usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            if input > 0 || output > 0 {
                self.usage = Usage::new(input, output);
            }
        }

        let Some(choice) = chunk.pointer("/choices/0") else {
            return Ok(StreamStep::Continue);
        };

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = FinishReason::from_wire(reason);
        }

        if let Some(calls) = choice.pointer("/delta/tool_calls").and_then(Value::as_array) {
            for call in calls {
                let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                while self.tools.len() <= index {
                    self.tools.push(PartialTool::default());
                }
                let slot = &mut self.tools[index];
                if let Some(id) = call.get("id").and_then(Value::as_str) {
                    slot.id = id.to_string();
                }
                if let Some(name) = call.pointer("/function/name").and_then(Value::as_str) {
                    slot.name.push_str(name);
                }
                if let Some(arguments) =
                    call.pointer("/function/arguments").and_then(Value::as_str)
                {
                    slot.arguments.push_str(arguments);
                }
            }
            return Ok(StreamStep::Continue);
        }

        if let Some(text) = choice.pointer("/delta/content").and_then(Value::as_str) {
            if !text.is_empty() {
                self.content.push_str(text);
                return Ok(StreamStep::Delta(text.to_string()));
            }
        }

        Ok(StreamStep::Continue)
    }

    pub fn take_final(&mut self) -> FinalStream {
        let tool_calls: Vec<ToolCall> = std::mem::take(&mut self.tools)
            .into_iter()
            .filter(|tool| !tool.name.is_empty() || !tool.id.is_empty())
            .map(|tool| ToolCall {
                id: tool.id,
                name: tool.name,
                arguments: if tool.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    tool.arguments
                },
            })
            .collect();

        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else if self.finish_reason.is_terminal() {
            self.finish_reason
        } else {
            FinishReason::Stop
        };

        FinalStream {
            response_id: std::mem::take(&mut self.response_id),
            content: std::mem::take(&mut self.content),
            tool_calls,
            finish_reason,
            usage: self.usage,
        }
    }
}
