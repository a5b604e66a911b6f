//! Provider backed by a locally installed CLI instead of an HTTP
//! endpoint.
//!
//! The adapter shells out to the binary (no shell interpolation; argv
//! only), streams its stdout, and keeps session continuity by capturing
//! the top-level `session_id` from JSON output and passing it back on
//! subsequent calls. Prompt text is screened against a conservative
//! argument policy before any process is spawned, and the adapter
//! refuses to launch when its environment probe says it is already
//! running inside the host CLI.

use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ProviderError;
use crate::models::{
    CapabilityLimits, CompletionRequest, CompletionResponse, FinishReason, ProviderCapabilities,
    Role, Usage,
};
use crate::providers::{CompletionStream, Provider};

/// Characters never allowed into a CLI argument: shell metacharacters
/// and control bytes. The command runs without a shell, but arguments
/// still end up in logs and subprocess environments.
const FORBIDDEN_CHARS: &[char] = &[';', '|', '&', '$', '`', '<', '>', '\\'];

/// Configuration for a CLI-delegation provider.
#[derive(Debug, Clone)]
pub struct CliProviderConfig {
    /// Path to the installed binary
    pub binary: PathBuf,
    /// Fixed arguments prepended to every invocation
    pub base_args: Vec<String>,
    pub model: Option<String>,
    /// Environment variable that marks "already inside the host CLI";
    /// set and non-empty means refuse to launch
    pub host_guard_env: String,
    pub timeout: Duration,
}

impl Default for CliProviderConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("claude"),
            base_args: vec!["--print".to_string(), "--output-format".to_string(), "json".to_string()],
            model: None,
            host_guard_env: "CLAUDECODE".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Adapter that delegates completions to a local CLI process.
pub struct CliAdapter {
    name: String,
    config: CliProviderConfig,
    /// Session captured from the last JSON response, passed back via
    /// `--resume` for conversation continuity
    session_id: Mutex<Option<String>>,
}

impl CliAdapter {
    pub fn new(name: impl Into<String>, config: CliProviderConfig) -> Self {
        Self {
            name: name.into(),
            config,
            session_id: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock_session().clone()
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.session_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn guard_recursion(&self) -> Result<(), ProviderError> {
        let probed = std::env::var(&self.config.host_guard_env).unwrap_or_default();
        if !probed.is_empty() {
            return Err(ProviderError::Configuration {
                message: format!(
                    "refusing to launch {} recursively ({} is set)",
                    self.config.binary.display(),
                    self.config.host_guard_env
                ),
            });
        }
        Ok(())
    }

    fn render_prompt(request: &CompletionRequest) -> String {
        let mut rendered = String::new();
        if let Some(prompt) = request.prompt.as_deref() {
            if !prompt.is_empty() {
                rendered.push_str(prompt);
                rendered.push('\n');
            }
        }
        for message in &request.messages {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            rendered.push_str(role);
            rendered.push_str(": ");
            rendered.push_str(&message.content);
            rendered.push('\n');
        }
        rendered
    }

    fn build_command(&self, prompt: &str, stream: bool) -> Command {
        let mut command = Command::new(&self.config.binary);
        for arg in &self.config.base_args {
            // Streaming swaps the plain json output format.
            if stream && arg == "json" {
                command.arg("stream-json");
            } else {
                command.arg(arg);
            }
        }
        if let Some(model) = &self.config.model {
            command.arg("--model").arg(model);
        }
        if let Some(session) = self.lock_session().as_deref() {
            command.arg("--resume").arg(session);
        }
        command.arg(prompt);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Pull content, session id, and usage out of one JSON stdout
    /// document. Non-JSON output falls back to raw text.
    fn absorb_output(&self, raw: &str) -> (String, Usage) {
        match serde_json::from_str::<Value>(raw) {
            Ok(json) => {
                if let Some(session) = json.get("session_id").and_then(Value::as_str) {
                    *self.lock_session() = Some(session.to_string());
                }
                let content = json
                    .get("result")
                    .or_else(|| json.get("content"))
                    .and_then(Value::as_str)
                    .unwrap_or(raw)
                    .to_string();
                let usage = Usage::new(
                    json.pointer("/usage/input_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as u32,
                    json.pointer("/usage/output_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as u32,
                );
                (content, usage)
            }
            Err(_) => (raw.to_string(), Usage::default()),
        }
    }
}

/// Screen prompt text against the argument policy.
pub fn validate_cli_argument(text: &str) -> Result<(), ProviderError> {
    for ch in text.chars() {
        if ch.is_control() && ch != '\n' && ch != '\t' {
            return Err(ProviderError::InvalidRequest {
                message: "prompt contains control characters".to_string(),
            });
        }
        if FORBIDDEN_CHARS.contains(&ch) {
            return Err(ProviderError::InvalidRequest {
                message: format!("prompt contains forbidden character {ch:?}"),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl Provider for CliAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: false,
            vision: false,
            reasoning: true,
            models: self.config.model.iter().cloned().collect(),
            features: vec!["completion".to_string(), "streaming".to_string()],
            request_kinds: vec!["unary".to_string(), "stream".to_string()],
            limits: CapabilityLimits {
                max_concurrent_requests: 1,
                ..CapabilityLimits::default()
            },
        }
    }

    fn validate_config(&self, config: &HashMap<String, String>) -> (bool, Vec<String>) {
        let mut missing = Vec::new();
        let binary = config
            .get("binary")
            .cloned()
            .unwrap_or_else(|| self.config.binary.display().to_string());
        if binary.is_empty() {
            missing.push("binary path is required".to_string());
        }
        (missing.is_empty(), missing)
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<CompletionResponse, ProviderError> {
        request.validate()?;
        self.guard_recursion()?;

        let prompt = Self::render_prompt(&request);
        validate_cli_argument(&prompt)?;

        let started = Instant::now();
        let mut command = self.build_command(&prompt, false);
        debug!(provider = %self.name, "spawning CLI completion");

        let child = command.spawn().map_err(|e| ProviderError::Configuration {
            message: format!("failed to spawn {}: {e}", self.config.binary.display()),
        })?;

        let default_deadline = Instant::now() + self.config.timeout;
        let deadline = deadline.unwrap_or(default_deadline).min(default_deadline);
        let output = match tokio::time::timeout_at(deadline, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| ProviderError::Configuration {
                message: format!("CLI process failed: {e}"),
            })?,
            // kill_on_drop reaps the child when the future is dropped.
            Err(_) => return Err(ProviderError::Timeout),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Api {
                code: output.status.code().unwrap_or(-1).unsigned_abs() as u16,
                message: stderr.chars().take(500).collect(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (content, usage) = self.absorb_output(stdout.trim());

        Ok(CompletionResponse {
            id: request.id.clone(),
            response_id: self.session_id().unwrap_or_default(),
            provider: self.name.clone(),
            content,
            tool_calls: Vec::new(),
            finish_reason: FinishReason::EndTurn,
            usage,
            confidence: super::adapter::estimate_confidence(FinishReason::EndTurn, 0),
            latency_ms: started.elapsed().as_millis() as u64,
            created_at: Utc::now(),
        })
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<CompletionStream, ProviderError> {
        request.validate()?;
        self.guard_recursion()?;

        let prompt = Self::render_prompt(&request);
        validate_cli_argument(&prompt)?;

        let mut command = self.build_command(&prompt, true);
        let mut child = command.spawn().map_err(|e| ProviderError::Configuration {
            message: format!("failed to spawn {}: {e}", self.config.binary.display()),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ProviderError::Configuration {
            message: "CLI child has no stdout".to_string(),
        })?;

        let provider = self.name.clone();
        let request_id = request.id.clone();
        let started = Instant::now();

        let stream = stream! {
            let mut lines = BufReader::new(stdout).lines();
            let mut content = String::new();
            let mut session_seen = None;

            loop {
                let next_line = match deadline {
                    Some(deadline) => {
                        match tokio::time::timeout_at(deadline, lines.next_line()).await {
                            Ok(line) => line,
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
                    None => lines.next_line().await,
                };

                match next_line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let delta = match serde_json::from_str::<Value>(line) {
                            Ok(json) => {
                                if let Some(session) =
                                    json.get("session_id").and_then(Value::as_str)
                                {
                                    session_seen = Some(session.to_string());
                                }
                                json.pointer("/delta/text")
                                    .or_else(|| json.get("result"))
                                    .and_then(Value::as_str)
                                    .map(|s| s.to_string())
                            }
                            Err(_) => Some(line.to_string()),
                        };
                        if let Some(delta) = delta {
                            if !delta.is_empty() {
                                content.push_str(&delta);
                                yield Ok(CompletionResponse::chunk(
                                    &request_id,
                                    &provider,
                                    delta,
                                ));
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        yield Ok(CompletionResponse::stream_error(
                            &request_id,
                            &provider,
                            &ProviderError::Configuration {
                                message: format!("CLI stdout read failed: {error}"),
                            },
                        ));
                        return;
                    }
                }
            }

            yield Ok(CompletionResponse {
                id: request_id.clone(),
                response_id: session_seen.clone().unwrap_or_default(),
                provider: provider.clone(),
                content: content.clone(),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::EndTurn,
                usage: Usage::default(),
                confidence: super::adapter::estimate_confidence(
                    FinishReason::EndTurn,
                    content.len(),
                ),
                latency_ms: started.elapsed().as_millis() as u64,
                created_at: Utc::now(),
            });
        };

        // Session continuity survives across calls.
        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if tokio::fs::metadata(&self.config.binary).await.is_ok() {
            return Ok(());
        }
        // Bare command names resolve through PATH at spawn time.
        if self.config.binary.components().count() == 1 {
            return Ok(());
        }
        Err(ProviderError::Configuration {
            message: format!("CLI binary {} not found", self.config.binary.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_policy_rejects_metacharacters() {
        assert!(validate_cli_argument("plain prompt text").is_ok());
        assert!(validate_cli_argument("multi\nline\tprompt").is_ok());

        for bad in ["rm -rf; echo", "a | b", "a && b", "$(whoami)", "`id`", "a > b", "a \\ b"] {
            assert!(
                validate_cli_argument(bad).is_err(),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_cli_argument("bell\u{7}").is_err());
    }

    #[test]
    fn session_id_is_captured_from_json_output() {
        let adapter = CliAdapter::new("claude-cli", CliProviderConfig::default());
        assert!(adapter.session_id().is_none());

        let (content, usage) = adapter.absorb_output(
            r#"{"result":"Hello there","session_id":"sess-42","usage":{"input_tokens":3,"output_tokens":5}}"#,
        );
        assert_eq!(content, "Hello there");
        assert_eq!(usage.total_tokens, 8);
        assert_eq!(adapter.session_id().unwrap(), "sess-42");
    }

    #[test]
    fn non_json_output_falls_back_to_raw_text() {
        let adapter = CliAdapter::new("claude-cli", CliProviderConfig::default());
        let (content, usage) = adapter.absorb_output("plain text answer");
        assert_eq!(content, "plain text answer");
        assert_eq!(usage, Usage::default());
        assert!(adapter.session_id().is_none());
    }

    #[test]
    fn resume_flag_follows_captured_session() {
        let adapter = CliAdapter::new("claude-cli", CliProviderConfig::default());
        adapter.absorb_output(r#"{"result":"x","session_id":"sess-7"}"#);

        let command = adapter.build_command("prompt", false);
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        let resume_at = args.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(args[resume_at + 1], "sess-7");
        assert_eq!(args.last().unwrap(), "prompt");
    }

    #[test]
    fn streaming_swaps_output_format() {
        let adapter = CliAdapter::new("claude-cli", CliProviderConfig::default());
        let command = adapter.build_command("prompt", true);
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"stream-json".to_string()));
        assert!(!args.contains(&"json".to_string()));
    }

    #[tokio::test]
    async fn recursion_guard_blocks_nested_launch() {
        let guard_var = "CLI_ADAPTER_TEST_GUARD";
        let adapter = CliAdapter::new(
            "claude-cli",
            CliProviderConfig {
                host_guard_env: guard_var.to_string(),
                ..Default::default()
            },
        );

        std::env::set_var(guard_var, "1");
        let request = CompletionRequest::new().with_user_message("hi");
        let result = adapter.complete(request, None).await;
        std::env::remove_var(guard_var);

        assert!(matches!(result, Err(ProviderError::Configuration { .. })));
    }
}
