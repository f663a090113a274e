mod executor;

pub use executor::{DEFAULT_MAX_TOOL_STEPS, ToolLoopExecutor};

use crate::infrastructure::model::ModelError;
use crate::types::ChatMessage;
use async_trait::async_trait;
use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// The conversation handed to the agent loop: a correlation id, the prior
/// messages, and the current timestamp so the model can answer
/// time-sensitive questions.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub today: String,
}

impl ConversationState {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::with_history(vec![ChatMessage::new(
            crate::types::MessageRole::User,
            prompt,
        )])
    }

    pub fn with_history(messages: Vec<ChatMessage>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages,
            today: Utc::now().to_rfc3339(),
        }
    }
}

/// Which stream the agent loop emitted a chunk on: incremental deltas or
/// full-state snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkChannel {
    Incremental,
    Snapshot,
}

/// One raw event from the agent loop. The payload is deliberately loose
/// (a channel-tagged tuple, a mapping, or anything else) and is only given
/// shape by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentChunk {
    pub channel: ChunkChannel,
    pub payload: Value,
}

impl AgentChunk {
    pub fn token(text: impl Into<String>) -> Self {
        Self {
            channel: ChunkChannel::Incremental,
            payload: json!(["messages", [{ "content": text.into() }]]),
        }
    }

    pub fn tool_call(name: &str, arguments: &Value) -> Self {
        Self {
            channel: ChunkChannel::Snapshot,
            payload: json!({ "tool_call": { "name": name, "arguments": arguments } }),
        }
    }

    pub fn state(messages: &[ChatMessage], done: bool) -> Self {
        Self {
            channel: ChunkChannel::Snapshot,
            payload: json!({ "messages": messages, "done": done }),
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = AgentChunk> + Send>>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl AgentError {
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Model(err) => err.user_message(),
        }
    }
}

/// The seam in front of the reasoning loop. The bridge does not re-derive
/// the loop's policy; it only consumes the chunk sequence an executor
/// emits for one conversation.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn stream(&self, conversation: ConversationState) -> Result<ChunkStream, AgentError>;
}
