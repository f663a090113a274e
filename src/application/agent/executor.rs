use super::{AgentChunk, AgentError, AgentExecutor, ChunkStream, ConversationState};
use crate::application::bridge::ToolInventory;
use crate::infrastructure::model::{
    ModelRequest, StreamingModel, ToolCallRequest, ToolDeclaration,
};
use crate::types::{ChatMessage, MessageRole};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_TOOL_STEPS: usize = 8;

/// Relays one conversation through a streaming model with native
/// tool-calling. Text deltas are forwarded as incremental chunks the
/// moment they arrive; when the model names a tool, the matching
/// [`CallableTool`](crate::application::bridge::CallableTool) runs over its
/// own fresh session and the result is fed back as a `tool` message. The
/// loop is bounded by `max_tool_steps`.
pub struct ToolLoopExecutor<M: StreamingModel> {
    model: Arc<M>,
    model_name: String,
    system_prompt: Option<String>,
    tools: Arc<ToolInventory>,
    max_tool_steps: usize,
}

impl<M: StreamingModel + 'static> ToolLoopExecutor<M> {
    pub fn new(model: M, model_name: impl Into<String>, tools: Arc<ToolInventory>) -> Self {
        Self {
            model: Arc::new(model),
            model_name: model_name.into(),
            system_prompt: None,
            tools,
            max_tool_steps: DEFAULT_MAX_TOOL_STEPS,
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn with_max_tool_steps(mut self, steps: usize) -> Self {
        self.max_tool_steps = steps;
        self
    }

    fn seed_messages(&self, conversation: &ConversationState) -> Vec<ChatMessage> {
        let mut system = self.system_prompt.clone().unwrap_or_default();
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str(&format!("Today is {}.", conversation.today));

        let mut messages = Vec::with_capacity(conversation.messages.len() + 1);
        messages.push(ChatMessage::new(MessageRole::System, system));
        messages.extend(conversation.messages.iter().cloned());
        messages
    }
}

#[async_trait]
impl<M: StreamingModel + 'static> AgentExecutor for ToolLoopExecutor<M> {
    async fn stream(&self, conversation: ConversationState) -> Result<ChunkStream, AgentError> {
        let (tx, rx) = mpsc::channel(32);
        let driver = LoopDriver {
            model: Arc::clone(&self.model),
            model_name: self.model_name.clone(),
            tools: Arc::clone(&self.tools),
            messages: self.seed_messages(&conversation),
            conversation: conversation.id,
            remaining_steps: self.max_tool_steps,
        };
        tokio::spawn(driver.run(tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

struct LoopDriver<M: StreamingModel> {
    model: Arc<M>,
    model_name: String,
    tools: Arc<ToolInventory>,
    messages: Vec<ChatMessage>,
    conversation: String,
    remaining_steps: usize,
}

impl<M: StreamingModel> LoopDriver<M> {
    async fn run(mut self, tx: mpsc::Sender<AgentChunk>) {
        info!(
            conversation = %self.conversation,
            model = %self.model_name,
            tools = self.tools.len(),
            "Agent run started"
        );
        let declarations: Vec<ToolDeclaration> = self
            .tools
            .tools()
            .iter()
            .map(|tool| ToolDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters().clone(),
            })
            .collect();

        loop {
            let request = ModelRequest {
                model: self.model_name.clone(),
                messages: self.messages.clone(),
                tools: declarations.clone(),
            };
            let mut deltas = match self.model.stream_chat(request).await {
                Ok(deltas) => deltas,
                Err(error) => {
                    warn!(%error, "Model provider failed; ending agent stream");
                    let _ = tx.send(AgentChunk::state(&self.messages, true)).await;
                    return;
                }
            };

            let mut assistant_text = String::new();
            let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
            while let Some(delta) = deltas.next().await {
                match delta {
                    Ok(delta) => {
                        if let Some(content) = delta.content {
                            assistant_text.push_str(&content);
                            // A closed receiver is not a reason to stop: any
                            // tool work already under way must still finish
                            // and release its session.
                            let _ = tx.send(AgentChunk::token(content)).await;
                        }
                        tool_calls.extend(delta.tool_calls);
                        if delta.done {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "Model stream yielded an error chunk");
                    }
                }
            }

            if tool_calls.is_empty() {
                self.messages
                    .push(ChatMessage::new(MessageRole::Assistant, assistant_text));
                info!("Agent returned final response");
                let _ = tx.send(AgentChunk::state(&self.messages, true)).await;
                return;
            }

            let requested: Vec<_> = tool_calls
                .iter()
                .map(|call| json!({ "name": call.name, "arguments": call.arguments }))
                .collect();
            self.messages.push(ChatMessage::new(
                MessageRole::Assistant,
                json!({ "tool_calls": requested }).to_string(),
            ));

            for call in tool_calls {
                if self.remaining_steps == 0 {
                    warn!("Agent exceeded the maximum number of tool interactions");
                    let _ = tx.send(AgentChunk::state(&self.messages, true)).await;
                    return;
                }
                self.remaining_steps -= 1;

                let _ = tx.send(AgentChunk::tool_call(&call.name, &call.arguments)).await;
                let result = self.execute(&call).await;
                self.messages
                    .push(ChatMessage::new(MessageRole::Tool, result.to_string()));
            }

            if tx.is_closed() {
                debug!("Caller disconnected; stopping after in-flight tool calls finished");
                return;
            }
        }
    }

    async fn execute(&self, call: &ToolCallRequest) -> serde_json::Value {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return json!({
                "tool": call.name,
                "success": false,
                "error": format!("unknown tool '{}'", call.name),
            });
        };

        match tool.invoke(call.arguments.clone()).await {
            Ok(output) => {
                info!(tool = %call.name, success = true, "Tool executed");
                json!({ "tool": call.name, "success": true, "output": output })
            }
            // Typed failures stay recoverable: the model sees them as the
            // tool result and can adjust instead of the request dying.
            Err(error) => {
                warn!(tool = %call.name, %error, "Tool invocation failed");
                json!({ "tool": call.name, "success": false, "error": error.to_string() })
            }
        }
    }
}
