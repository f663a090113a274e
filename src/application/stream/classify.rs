use crate::application::agent::{AgentChunk, ChunkChannel};
use serde_json::Value;

/// Every chunk the agent loop can emit, reduced to a closed set of shapes.
/// Downstream code matches exhaustively; unknown payloads land in
/// `Unrecognized` with the raw value preserved for logging.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// An incremental piece of assistant text.
    Token(String),
    /// A mid-stream full-state snapshot.
    Snapshot(Value),
    /// The agent asked for a tool invocation.
    ToolCall { name: String, arguments: Value },
    /// The final full-state snapshot; the stream is over.
    Terminal(Value),
    /// Anything else, kept verbatim. Never an error.
    Unrecognized(Value),
}

/// Classifies one chunk. Pure and total: no payload shape can fail it.
///
/// Priority: incremental text first, then snapshot state, then tool-call
/// records, then the catch-all.
pub fn classify(chunk: &AgentChunk) -> AgentEvent {
    match chunk.channel {
        ChunkChannel::Incremental => {
            if let Some(text) = incremental_text(&chunk.payload) {
                return AgentEvent::Token(text);
            }
        }
        ChunkChannel::Snapshot => {
            if let Some(map) = chunk.payload.as_object() {
                if map.contains_key("messages") {
                    return if is_terminal(&chunk.payload) {
                        AgentEvent::Terminal(chunk.payload.clone())
                    } else {
                        AgentEvent::Snapshot(chunk.payload.clone())
                    };
                }
            }
        }
    }

    if let Some((name, arguments)) = tool_record(&chunk.payload) {
        return AgentEvent::ToolCall { name, arguments };
    }

    AgentEvent::Unrecognized(chunk.payload.clone())
}

/// Incremental payloads arrive either as the channel-tagged tuple
/// `["messages", [ { content } ]]` or as a bare mapping with a `content`
/// or `delta` string.
fn incremental_text(payload: &Value) -> Option<String> {
    if let Some(items) = payload.as_array() {
        if items.first().and_then(Value::as_str) == Some("messages") {
            let chunks = items.get(1)?.as_array()?;
            let first = chunks.first()?;
            if let Some(text) = first.as_str() {
                return Some(text.to_string());
            }
            return message_text(first);
        }
        return None;
    }
    message_text(payload)
}

fn message_text(payload: &Value) -> Option<String> {
    let map = payload.as_object()?;
    for key in ["content", "delta"] {
        if let Some(text) = map.get(key).and_then(Value::as_str) {
            return Some(text.to_string());
        }
    }
    None
}

fn is_terminal(payload: &Value) -> bool {
    payload
        .get("done")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || payload.get("final").is_some()
}

fn tool_record(payload: &Value) -> Option<(String, Value)> {
    let map = payload.as_object()?;
    let record = map.get("tool_call").and_then(Value::as_object).or({
        if map.contains_key("name") && map.contains_key("arguments") {
            Some(map)
        } else {
            None
        }
    })?;
    let name = record.get("name")?.as_str()?.to_string();
    let arguments = record.get("arguments").cloned().unwrap_or(Value::Null);
    Some((name, arguments))
}
