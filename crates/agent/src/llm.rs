//! Chat-model provider access.
//!
//! `ChatModel` is the seam the orchestrator plans against:
//! `OpenAiChatModel` speaks the chat-completions wire format with tool
//! calling, and `ScriptedChatModel` replays canned turns so the whole
//! orchestrator test suite runs offline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A tool call exactly as the provider returned it. Arguments are kept
/// as raw JSON; schema validation happens in `tools::ToolInvocation`.
#[derive(Clone, Debug, PartialEq)]
pub struct RawToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<RawToolCall>,
    pub usage: TokenUsage,
}

/// Planning-context message in provider order.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant { content: Option<String>, tool_calls: Vec<RawToolCall> },
    ToolResult { tool_call_id: String, content: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat api error ({code}): {message}")]
    Api { code: u16, message: String },
    #[error("malformed chat response: {0}")]
    MalformedResponse(String),
    #[error("chat api key is missing")]
    MissingApiKey,
    #[error("all {attempts} chat attempts failed: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ModelTurn, LlmError>;

    fn model(&self) -> &str;
}

#[derive(Clone, Debug)]
pub struct ChatModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

pub struct OpenAiChatModel {
    client: Client,
    config: ChatModelConfig,
}

impl OpenAiChatModel {
    pub fn new(config: ChatModelConfig) -> Result<Self, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self { client, config })
    }

    async fn complete_once(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ModelTurn, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let mut body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": messages.iter().map(wire_message).collect::<Vec<Value>>(),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(wire_tool).collect());
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ProviderErrorResponse>(&body)
                .ok()
                .and_then(|payload| payload.error)
                .map(|detail| detail.message)
                .unwrap_or(body);
            return Err(LlmError::Api { code: status.as_u16(), message });
        }

        let payload: ChatCompletionResponse = response.json().await?;
        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::MalformedResponse("response has no choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| RawToolCall {
                id: call.id,
                name: call.function.name,
                // Unparseable argument payloads stay raw and fail schema
                // validation later, which feeds the re-prompt path.
                arguments: serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments)),
            })
            .collect();

        let usage = payload
            .usage
            .map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            })
            .unwrap_or_default();

        Ok(ModelTurn { content: choice.message.content, tool_calls, usage })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ModelTurn, LlmError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries as usize);

        match Retry::spawn(retry_strategy, || self.complete_once(messages, tools)).await {
            Ok(turn) => Ok(turn),
            Err(error) => {
                tracing::error!(
                    event_name = "agent.llm.retry_exhausted",
                    attempts = self.config.max_retries,
                    error = %error,
                    "chat provider kept failing"
                );
                Err(LlmError::RetryExhausted {
                    attempts: self.config.max_retries,
                    last_error: error.to_string(),
                })
            }
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System { content } => json!({ "role": "system", "content": content }),
        ChatMessage::User { content } => json!({ "role": "user", "content": content }),
        ChatMessage::Assistant { content, tool_calls } => {
            let mut value = json!({ "role": "assistant", "content": content });
            if !tool_calls.is_empty() {
                value["tool_calls"] = Value::Array(
                    tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                },
                            })
                        })
                        .collect(),
                );
            }
            value
        }
        ChatMessage::ToolResult { tool_call_id, content } => {
            json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content })
        }
    }
}

fn wire_tool(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
}

/// Replays a fixed sequence of model turns and records every request so
/// tests can assert what the orchestrator sent.
#[derive(Default)]
pub struct ScriptedChatModel {
    turns: tokio::sync::Mutex<std::collections::VecDeque<ModelTurn>>,
    requests: tokio::sync::Mutex<Vec<Vec<ChatMessage>>>,
    delay: Option<Duration>,
}

impl ScriptedChatModel {
    pub fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            turns: tokio::sync::Mutex::new(turns.into()),
            requests: tokio::sync::Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn recorded_requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().await.clone()
    }

    pub fn reply(content: &str) -> ModelTurn {
        ModelTurn {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            usage: TokenUsage { prompt_tokens: 100, completion_tokens: 25 },
        }
    }

    pub fn tool_calls(calls: Vec<(&str, Value)>) -> ModelTurn {
        ModelTurn {
            content: None,
            tool_calls: calls
                .into_iter()
                .enumerate()
                .map(|(index, (name, arguments))| RawToolCall {
                    id: format!("call_{index}"),
                    name: name.to_string(),
                    arguments,
                })
                .collect(),
            usage: TokenUsage { prompt_tokens: 120, completion_tokens: 18 },
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<ModelTurn, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.requests.lock().await.push(messages.to_vec());
        self.turns
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| LlmError::MalformedResponse("script ran out of turns".to_string()))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
