use crate::application::stream::extract_bytes;
use crate::types::ChatMessage;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDeclaration>,
}

/// A tool advertised to the model, straight from the discovered schema.
#[derive(Debug, Clone)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One streamed unit from the model: a piece of text, zero or more tool
/// requests, and the end-of-message marker.
#[derive(Debug, Clone, Default)]
pub struct ModelDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub done: bool,
}

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("model provider returned invalid response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn user_message(&self) -> String {
        match self {
            ModelError::Network(err) => {
                if err.is_connect() {
                    "Cannot reach the model service. Check that the provider is running and reachable."
                        .to_string()
                } else if err.is_timeout() {
                    "The model service took too long to answer. Try again shortly.".to_string()
                } else if let Some(status) = err.status() {
                    match status {
                        StatusCode::NOT_FOUND => {
                            "Model endpoint not found (404). Check that the provider serves /api/chat."
                                .to_string()
                        }
                        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                            "The model service is currently unavailable. Try again later."
                                .to_string()
                        }
                        _ => format!(
                            "The model request failed with status {}. Try again later.",
                            status.as_u16()
                        ),
                    }
                } else {
                    "A network error occurred while contacting the model service.".to_string()
                }
            }
            ModelError::InvalidResponse(_) => {
                "The model service returned a response that could not be processed.".to_string()
            }
        }
    }
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ModelDelta, ModelError>> + Send>>;

/// A chat model that streams its answer and may request tool calls.
#[async_trait]
pub trait StreamingModel: Send + Sync {
    async fn stream_chat(&self, request: ModelRequest) -> Result<DeltaStream, ModelError>;
}

/// Ollama-compatible provider speaking newline-delimited JSON over
/// `/api/chat` with `stream: true`.
#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            http: client,
            base_url: base_url.into(),
        }
    }

    pub fn with_request_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self::with_client(base_url, client)
    }

    fn endpoint(&self, path: &str) -> String {
        let trimmed = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{trimmed}/{path}")
    }
}

#[async_trait]
impl StreamingModel for OllamaClient {
    async fn stream_chat(&self, request: ModelRequest) -> Result<DeltaStream, ModelError> {
        let url = self.endpoint("/api/chat");
        let payload = OllamaChatRequest::from(&request);
        info!(
            model = request.model.as_str(),
            url = %url,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Opening streaming chat with model provider"
        );

        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()));
        let state = LineDecoder {
            inner: Box::pin(bytes),
            buffer: String::new(),
            queue: VecDeque::new(),
            finished: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(line) = state.queue.pop_front() {
                    match parse_stream_line(&line) {
                        Some(delta) => return Some((Ok(delta), state)),
                        None => continue,
                    }
                }
                if state.finished {
                    return None;
                }
                match state.inner.next().await {
                    Some(Ok(bytes)) => {
                        state.buffer.push_str(&extract_bytes(&bytes));
                        while let Some(at) = state.buffer.find('\n') {
                            let line = state.buffer[..at].trim().to_string();
                            state.buffer.drain(..=at);
                            if !line.is_empty() {
                                state.queue.push_back(line);
                            }
                        }
                    }
                    Some(Err(source)) => {
                        state.finished = true;
                        return Some((Err(ModelError::Network(source)), state));
                    }
                    None => {
                        state.finished = true;
                        let rest = state.buffer.trim().to_string();
                        state.buffer.clear();
                        if !rest.is_empty() {
                            state.queue.push_back(rest);
                        }
                        if state.queue.is_empty() {
                            return None;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

struct LineDecoder {
    inner: Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>,
    buffer: String,
    queue: VecDeque<String>,
    finished: bool,
}

/// One NDJSON line to one delta. Malformed lines are logged and skipped so
/// a single garbled chunk cannot kill the whole answer.
fn parse_stream_line(line: &str) -> Option<ModelDelta> {
    let chunk: OllamaStreamChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(source) => {
            warn!(line, %source, "Skipping malformed stream line from model provider");
            return None;
        }
    };

    let mut delta = ModelDelta {
        done: chunk.done.unwrap_or(false),
        ..ModelDelta::default()
    };
    if let Some(message) = chunk.message {
        if let Some(content) = message.content {
            if !content.is_empty() {
                delta.content = Some(content);
            }
        }
        for call in message.tool_calls.unwrap_or_default() {
            delta.tool_calls.push(ToolCallRequest {
                name: call.function.name,
                arguments: call.function.arguments,
            });
        }
    }
    Some(delta)
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaToolDeclaration>,
}

impl From<&ModelRequest> for OllamaChatRequest {
    fn from(value: &ModelRequest) -> Self {
        Self {
            model: value.model.clone(),
            messages: value
                .messages
                .iter()
                .map(|msg| OllamaChatMessage {
                    role: msg.role.as_str().to_string(),
                    content: Some(msg.content.clone()),
                    tool_calls: None,
                })
                .collect(),
            stream: true,
            tools: value
                .tools
                .iter()
                .map(|tool| OllamaToolDeclaration {
                    kind: "function".to_string(),
                    function: OllamaFunctionDeclaration {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaToolDeclaration {
    #[serde(rename = "type")]
    kind: String,
    function: OllamaFunctionDeclaration,
}

#[derive(Debug, Serialize)]
struct OllamaFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    #[serde(default)]
    message: Option<OllamaChatMessage>,
    #[serde(default)]
    done: Option<bool>,
}
