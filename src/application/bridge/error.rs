use std::time::Duration;
use thiserror::Error;

use super::schema::ArgumentError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to launch MCP server '{server}': {source}")]
    Launch {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("MCP server '{server}' failed the initialize handshake: {reason}")]
    Handshake { server: String, reason: String },
    #[error("MCP server '{server}' transport error: {message}")]
    Transport { server: String, message: String },
    #[error("MCP server '{server}' returned invalid JSON: {source}")]
    InvalidJson {
        server: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("MCP server '{server}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
    #[error("MCP server '{server}' did not respond within {timeout:?}")]
    Timeout { server: String, timeout: Duration },
    #[error("session with MCP server '{server}' is closed")]
    Closed { server: String },
}

#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error(transparent)]
    Arguments(#[from] ArgumentError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("tool '{tool}' reported a failure: {detail}")]
    Tool { tool: String, detail: String },
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("tool name '{name}' is exposed by both '{first}' and '{second}'")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },
    #[error("tool discovery aborted at server '{server}': {source}")]
    Aborted {
        server: String,
        #[source]
        source: SessionError,
    },
}
