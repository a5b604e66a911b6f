//! Shared pieces of the wire codecs: the family selector, the decoded
//! terminal shape, and streaming parser steps.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::models::{CompletionRequest, FinishReason, ToolCall, ToolChoice, Usage};

/// The two request/response grammars shipped in the catalog. A new
/// provider picks one of these in its descriptor instead of bringing a
/// new codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFamily {
    /// Anthropic messages API shape
    Anthropic,
    /// OpenAI chat-completions shape and its many compatibles
    OpenAi,
}

impl WireFamily {
    pub fn build_body(
        &self,
        request: &CompletionRequest,
        model: &str,
        stream: bool,
    ) -> Result<Vec<u8>, ProviderError> {
        match self {
            WireFamily::Anthropic => super::wire_anthropic::build_body(request, model, stream),
            WireFamily::OpenAi => super::wire_openai::build_body(request, model, stream),
        }
    }

    pub fn parse_response(&self, body: &[u8]) -> Result<FinalStream, ProviderError> {
        match self {
            WireFamily::Anthropic => super::wire_anthropic::parse_response(body),
            WireFamily::OpenAi => super::wire_openai::parse_response(body),
        }
    }

    pub fn stream_parser(&self) -> WireStreamParser {
        match self {
            WireFamily::Anthropic => {
                WireStreamParser::Anthropic(super::wire_anthropic::StreamParser::new())
            }
            WireFamily::OpenAi => {
                WireStreamParser::OpenAi(super::wire_openai::StreamParser::new())
            }
        }
    }
}

/// The assembled terminal element of a completion: everything a wire
/// family can decode before the adapter attaches correlation id,
/// latency, and confidence.
#[derive(Debug, Clone)]
pub struct FinalStream {
    pub response_id: String,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// One step of a streaming parse.
#[derive(Debug)]
pub enum StreamStep {
    /// Intermediate text delta to surface as a chunk
    Delta(String),
    /// Wire-level terminator seen; stream is complete
    Finished(FinalStream),
    /// Bookkeeping record, nothing to surface
    Continue,
}

/// Family-dispatched streaming parser.
pub enum WireStreamParser {
    Anthropic(super::wire_anthropic::StreamParser),
    OpenAi(super::wire_openai::StreamParser),
}

impl WireStreamParser {
    pub fn apply(&mut self, raw: &str) -> Result<StreamStep, ProviderError> {
        match self {
            WireStreamParser::Anthropic(parser) => parser.apply(raw),
            WireStreamParser::OpenAi(parser) => parser.apply(raw),
        }
    }

    /// Assemble the terminal element from whatever has accumulated.
    /// Used on `[DONE]` and on end-of-stream without a terminator.
    pub fn take_final(&mut self) -> FinalStream {
        match self {
            WireStreamParser::Anthropic(parser) => parser.take_final(),
            WireStreamParser::OpenAi(parser) => parser.take_final(),
        }
    }
}

/// Tool-choice directives always travel in object form, for both wire
/// families: `auto` and `any` must never be sent as bare strings.
/// `None` (tool use forbidden) returns no directive; callers drop the
/// catalog instead.
pub fn normalize_tool_choice(choice: Option<&ToolChoice>) -> Option<Value> {
    match choice {
        Some(ToolChoice::Auto) | None => Some(serde_json::json!({"type": "auto"})),
        Some(ToolChoice::Any) => Some(serde_json::json!({"type": "any"})),
        Some(ToolChoice::Tool { name }) => {
            Some(serde_json::json!({"type": "tool", "name": name}))
        }
        Some(ToolChoice::None) => None,
    }
}

/// Guarantee a tool schema carries `type: object`, which several
/// providers reject the request without.
pub fn ensure_object_schema(parameters: &Value) -> Value {
    match parameters {
        Value::Object(map) => {
            let mut map = map.clone();
            map.entry("type".to_string())
                .or_insert_with(|| Value::String("object".to_string()));
            Value::Object(map)
        }
        _ => serde_json::json!({"type": "object", "properties": {}}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_gains_object_type() {
        let schema = ensure_object_schema(&json!({"properties": {"x": {"type": "number"}}}));
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["x"].is_object());
    }

    #[test]
    fn existing_type_is_preserved() {
        let schema = ensure_object_schema(&json!({"type": "object", "required": ["x"]}));
        assert_eq!(schema["required"][0], "x");
    }

    #[test]
    fn non_object_schemas_are_replaced() {
        let schema = ensure_object_schema(&Value::Null);
        assert_eq!(schema, json!({"type": "object", "properties": {}}));
    }

    #[test]
    fn tool_choice_is_always_object_form() {
        assert_eq!(
            normalize_tool_choice(Some(&ToolChoice::Auto)),
            Some(json!({"type": "auto"}))
        );
        assert_eq!(normalize_tool_choice(None), Some(json!({"type": "auto"})));
        assert_eq!(
            normalize_tool_choice(Some(&ToolChoice::Any)),
            Some(json!({"type": "any"}))
        );
        assert_eq!(
            normalize_tool_choice(Some(&ToolChoice::Tool {
                name: "get_weather".to_string()
            })),
            Some(json!({"type": "tool", "name": "get_weather"}))
        );
        assert_eq!(normalize_tool_choice(Some(&ToolChoice::None)), None);
    }
}
