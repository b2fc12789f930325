//! Completion-provider client.
//!
//! The provider accepts a system/user message pair, an optional tool
//! schema, and a tool choice, and returns either a tool invocation or
//! free-text content. Both shapes are handled; everything else is a
//! malformed-response error. Providers are injected behind
//! [`CompletionProvider`] so the orchestrator and planner can be tested
//! without a network.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::config::CompletionConfig;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    RequestFailed(String),

    #[error("completion provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("completion response malformed: {0}")]
    MalformedResponse(String),

    #[error("completion call timed out after {0} ms")]
    Timeout(u64),
}

/// A tool the model may invoke: name, description, JSON-schema parameters.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub tools: Vec<ToolSpec>,
    /// Ask the provider for a JSON object response (planner mode).
    pub json_mode: bool,
}

/// The two response shapes a completion provider can produce.
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    ToolCall { name: String, arguments: Value },
    Text(String),
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, LlmError>;
}

/// OpenAI-compatible `/v1/chat/completions` client.
pub struct OpenAiCompletions {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    /// JSON-encoded argument object.
    arguments: String,
}

impl OpenAiCompletions {
    /// Build a client from configuration. Returns `None` when no API key
    /// is configured — the caller falls back to deterministic mode.
    #[must_use]
    pub fn from_config(config: &CompletionConfig) -> Option<Self> {
        let api_key = config.api_key.as_deref().filter(|k| !k.is_empty())?;
        Some(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
        })
    }

    fn tool_payload(tools: &[ToolSpec]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    fn parse_outcome(body: ChatResponse) -> Result<ChatOutcome, LlmError> {
        let message = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| LlmError::MalformedResponse("no choices in response".to_string()))?;

        if let Some(call) = message.tool_calls.and_then(|mut calls| {
            if calls.is_empty() {
                None
            } else {
                Some(calls.remove(0))
            }
        }) {
            let arguments: Value = if call.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|e| {
                    LlmError::MalformedResponse(format!("tool arguments not JSON: {e}"))
                })?
            };
            return Ok(ChatOutcome::ToolCall {
                name: call.function.name,
                arguments,
            });
        }

        let text = message
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                LlmError::MalformedResponse("neither tool call nor content".to_string())
            })?;

        Ok(ChatOutcome::Text(text))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletions {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut payload = json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        });

        if !request.tools.is_empty() {
            payload["tools"] = Value::Array(Self::tool_payload(&request.tools));
            payload["tool_choice"] = json!("auto");
        }
        if request.json_mode {
            payload["response_format"] = json!({ "type": "json_object" });
        }

        debug!(model = %self.model, tools = request.tools.len(), "completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        Self::parse_outcome(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_call_outcome() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "function": {
                            "name": "get_risk_distribution",
                            "arguments": "{\"top_n\": 4}"
                        }
                    }]
                }
            }]
        }"#;
        let body: ChatResponse = serde_json::from_str(raw).unwrap();
        match OpenAiCompletions::parse_outcome(body).unwrap() {
            ChatOutcome::ToolCall { name, arguments } => {
                assert_eq!(name, "get_risk_distribution");
                assert_eq!(arguments["top_n"], 4);
            }
            ChatOutcome::Text(_) => panic!("expected tool call"),
        }
    }

    #[test]
    fn test_parse_text_outcome() {
        let raw = r#"{"choices":[{"message":{"content":"  plain text  "}}]}"#;
        let body: ChatResponse = serde_json::from_str(raw).unwrap();
        match OpenAiCompletions::parse_outcome(body).unwrap() {
            ChatOutcome::Text(text) => assert_eq!(text, "plain text"),
            ChatOutcome::ToolCall { .. } => panic!("expected text"),
        }
    }

    #[test]
    fn test_parse_empty_arguments_defaults_to_object() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "tool_calls": [{ "function": { "name": "compute_cltv", "arguments": "" } }]
                }
            }]
        }"#;
        let body: ChatResponse = serde_json::from_str(raw).unwrap();
        match OpenAiCompletions::parse_outcome(body).unwrap() {
            ChatOutcome::ToolCall { arguments, .. } => {
                assert!(arguments.as_object().unwrap().is_empty());
            }
            ChatOutcome::Text(_) => panic!("expected tool call"),
        }
    }

    #[test]
    fn test_parse_malformed_arguments_rejected() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "tool_calls": [{ "function": { "name": "x", "arguments": "not json" } }]
                }
            }]
        }"#;
        let body: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            OpenAiCompletions::parse_outcome(body),
            Err(LlmError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_empty_choices_rejected() {
        let body: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            OpenAiCompletions::parse_outcome(body),
            Err(LlmError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_from_config_requires_key() {
        let mut config = CompletionConfig::default();
        assert!(OpenAiCompletions::from_config(&config).is_none());
        config.api_key = Some("sk-test".to_string());
        assert!(OpenAiCompletions::from_config(&config).is_some());
    }
}
