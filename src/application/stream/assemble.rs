use super::classify::{AgentEvent, classify};
use super::extract::{extract_text, strip_json_fence};
use crate::application::agent::AgentChunk;
use futures::{Stream, StreamExt, pin_mut};
use serde_json::Value;
use tracing::debug;

/// Drains the whole chunk sequence and returns one assembled answer.
/// Fragments are appended in emission order with their newlines stripped.
/// When the agent never produced an incremental token, the final snapshot's
/// text stands in, so snapshot-only providers still get an answer out.
pub async fn collect_buffered<S>(chunks: S) -> String
where
    S: Stream<Item = AgentChunk>,
{
    pin_mut!(chunks);
    let mut collected = String::new();
    let mut saw_token = false;
    let mut last_terminal: Option<Value> = None;

    while let Some(chunk) = chunks.next().await {
        match classify(&chunk) {
            AgentEvent::Token(text) => {
                saw_token = true;
                let fragment = extract_text(&Value::String(text));
                collected.push_str(&fragment.replace('\n', ""));
            }
            AgentEvent::Terminal(state) => last_terminal = Some(state),
            AgentEvent::ToolCall { name, .. } => {
                debug!(tool = %name, "Agent requested a tool mid-response");
            }
            AgentEvent::Snapshot(_) => {}
            AgentEvent::Unrecognized(raw) => {
                debug!(payload = %raw, "Skipping unrecognized agent chunk");
            }
        }
    }

    if !saw_token {
        if let Some(state) = last_terminal {
            collected = terminal_text(&state).replace('\n', "");
        }
    }
    collected
}

/// Forwards one plain-text fragment per chunk as soon as it is classified;
/// nothing is buffered beyond the fragment in flight. Events that carry no
/// user-facing text degrade to an empty fragment, which is elided rather
/// than written, so one bad chunk never ends the stream.
pub fn fragment_stream<S>(chunks: S) -> impl Stream<Item = String>
where
    S: Stream<Item = AgentChunk>,
{
    chunks.filter_map(|chunk| async move {
        let fragment = match classify(&chunk) {
            AgentEvent::Token(text) => extract_text(&Value::String(text)),
            AgentEvent::ToolCall { name, .. } => {
                debug!(tool = %name, "Agent requested a tool mid-stream");
                String::new()
            }
            AgentEvent::Snapshot(_) | AgentEvent::Terminal(_) => String::new(),
            AgentEvent::Unrecognized(raw) => {
                debug!(payload = %raw, "Skipping unrecognized agent chunk");
                String::new()
            }
        };
        if fragment.is_empty() {
            None
        } else {
            Some(fragment)
        }
    })
}

/// Buffered answers go out best-effort decoded: fence-stripped, then parsed
/// as JSON when they parse, verbatim otherwise.
pub fn finalize_response(text: &str) -> Value {
    let unwrapped = strip_json_fence(text.trim());
    match serde_json::from_str::<Value>(unwrapped) {
        Ok(value) => value,
        Err(_) => Value::String(text.to_string()),
    }
}

fn terminal_text(state: &Value) -> String {
    let last = state
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| messages.last());
    match last {
        Some(message) => extract_text(message),
        None => String::new(),
    }
}
