use super::error::SessionError;
use super::ToolSchema;
use crate::config::ServerSpec;
use serde_json::{Value, json};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

const PROTOCOL_VERSION: &str = "2025-06-18";
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Spawned,
    Initialized,
    Closed,
}

/// One transient connection to an MCP server: spawn, handshake, a request
/// or two, teardown. A session is exclusively owned by the invocation that
/// opened it and is never reused; `kill_on_drop` guarantees the child and
/// its pipes are released on every exit path, including early returns.
pub struct StdioSession {
    server: String,
    child: Child,
    writer: BufWriter<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
    phase: SessionPhase,
    next_id: u64,
    timeout: Duration,
}

/// A tool call result with the provider's application-level error flag
/// preserved, so the bridge can surface it as a typed failure instead of a
/// crash.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub is_error: bool,
    pub content: Value,
}

impl StdioSession {
    pub async fn open(spec: &ServerSpec, timeout: Duration) -> Result<Self, SessionError> {
        debug!(server = %spec.id, command = %spec.command, "Spawning MCP server");
        let mut command = Command::new(&spec.command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if !spec.args.is_empty() {
            command.args(&spec.args);
        }
        if let Some(dir) = &spec.workdir {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| SessionError::Launch {
            server: spec.id.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| SessionError::Transport {
            server: spec.id.clone(),
            message: "failed to capture server stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| SessionError::Transport {
            server: spec.id.clone(),
            message: "failed to capture server stdout".to_string(),
        })?;

        Ok(Self {
            server: spec.id.clone(),
            child,
            writer: BufWriter::new(stdin),
            lines: BufReader::new(stdout).lines(),
            phase: SessionPhase::Spawned,
            next_id: 1,
            timeout,
        })
    }

    /// Performs the `initialize` handshake followed by the
    /// `notifications/initialized` notification. Protocol violations and
    /// timeouts during the handshake are handshake errors, not generic
    /// transport noise.
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Spawned {
            return Err(SessionError::Closed {
                server: self.server.clone(),
            });
        }

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {}
        });
        match self.request("initialize", params).await {
            Ok(_) => {}
            Err(err @ (SessionError::Timeout { .. } | SessionError::Launch { .. })) => {
                return Err(err);
            }
            Err(source) => {
                self.phase = SessionPhase::Closed;
                return Err(SessionError::Handshake {
                    server: self.server.clone(),
                    reason: source.to_string(),
                });
            }
        }
        if let Err(source) = self.notify("notifications/initialized", json!({})).await {
            self.phase = SessionPhase::Closed;
            return Err(SessionError::Handshake {
                server: self.server.clone(),
                reason: source.to_string(),
            });
        }
        self.phase = SessionPhase::Initialized;
        Ok(())
    }

    pub async fn list_tools(&mut self) -> Result<Vec<ToolSchema>, SessionError> {
        self.require_initialized()?;
        let result = self.request("tools/list", json!({})).await?;

        let mut schemas = Vec::new();
        if let Some(tools) = result.get("tools").and_then(Value::as_array) {
            for tool in tools {
                match serde_json::from_value::<ToolSchema>(tool.clone()) {
                    Ok(schema) => schemas.push(schema),
                    Err(source) => warn!(
                        server = %self.server,
                        %source,
                        "Skipping malformed tool entry from MCP server"
                    ),
                }
            }
        }
        Ok(schemas)
    }

    pub async fn call_tool(
        &mut self,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolOutcome, SessionError> {
        self.require_initialized()?;
        let params = json!({
            "name": tool,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            }
        });
        let result = self.request("tools/call", params).await?;
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let content = result.get("content").cloned().unwrap_or(result);
        Ok(ToolOutcome { is_error, content })
    }

    /// Graceful teardown. Sessions dropped on an error path are reaped by
    /// `kill_on_drop` instead.
    pub async fn close(mut self) {
        self.phase = SessionPhase::Closed;
        if let Err(err) = self.child.kill().await {
            debug!(
                server = %self.server,
                %err,
                "failed to kill MCP server process (may have already exited)"
            );
        }
        let _ = self.child.wait().await;
    }

    fn require_initialized(&self) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Initialized {
            return Err(SessionError::Closed {
                server: self.server.clone(),
            });
        }
        Ok(())
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, SessionError> {
        let id = format!("req-{}", self.next_id);
        self.next_id += 1;
        self.write_message(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        }))
        .await?;
        self.await_response(&id).await
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<(), SessionError> {
        self.write_message(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        }))
        .await
    }

    /// Reads lines until the response matching `id` arrives. Notifications
    /// and unrelated traffic are skipped, inbound `ping` requests are
    /// answered, and every read carries the per-request timeout.
    async fn await_response(&mut self, id: &str) -> Result<Value, SessionError> {
        loop {
            let line = match timeout(self.timeout, self.lines.next_line()).await {
                Err(_) => {
                    self.phase = SessionPhase::Closed;
                    return Err(SessionError::Timeout {
                        server: self.server.clone(),
                        timeout: self.timeout,
                    });
                }
                Ok(Err(source)) => {
                    self.phase = SessionPhase::Closed;
                    return Err(SessionError::Transport {
                        server: self.server.clone(),
                        message: source.to_string(),
                    });
                }
                Ok(Ok(None)) => {
                    self.phase = SessionPhase::Closed;
                    return Err(SessionError::Transport {
                        server: self.server.clone(),
                        message: "server closed stdout before responding".to_string(),
                    });
                }
                Ok(Ok(Some(line))) => line,
            };

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('\u{1b}') {
                continue;
            }

            let value: Value = match serde_json::from_str(trimmed) {
                Ok(value) => value,
                Err(source) => {
                    warn!(
                        server = %self.server,
                        line = trimmed,
                        %source,
                        "received invalid JSON from MCP server"
                    );
                    continue;
                }
            };

            if value.get("method").is_some() {
                if let Some(request_id) = value.get("id").cloned() {
                    self.answer_server_request(request_id, &value).await?;
                } else {
                    debug!(
                        server = %self.server,
                        method = value.get("method").and_then(serde_json::Value::as_str).unwrap_or_default(),
                        "received notification from server"
                    );
                }
                continue;
            }

            match value.get("id") {
                Some(Value::String(received)) if received == id => {}
                Some(other) => {
                    debug!(
                        server = %self.server,
                        response_id = %other,
                        "received response for unknown request"
                    );
                    continue;
                }
                None => continue,
            }

            if let Some(error) = value.get("error") {
                let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                return Err(SessionError::Rpc {
                    server: self.server.clone(),
                    code,
                    message,
                });
            }

            return Ok(value.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn answer_server_request(
        &mut self,
        id: Value,
        request: &Value,
    ) -> Result<(), SessionError> {
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut payload = if method == "ping" {
            json!({ "jsonrpc": "2.0", "result": {} })
        } else {
            warn!(server = %self.server, method, "server sent unsupported request");
            json!({
                "jsonrpc": "2.0",
                "error": {
                    "code": -32601,
                    "message": format!("client does not implement method '{method}'"),
                }
            })
        };
        if let Value::Object(map) = &mut payload {
            map.insert("id".to_string(), id);
        }
        self.write_message(&payload).await
    }

    async fn write_message(&mut self, message: &Value) -> Result<(), SessionError> {
        let encoded =
            serde_json::to_string(message).map_err(|source| SessionError::InvalidJson {
                server: self.server.clone(),
                source,
            })?;

        let transport = |source: std::io::Error| SessionError::Transport {
            server: self.server.clone(),
            message: source.to_string(),
        };
        self.writer
            .write_all(encoded.as_bytes())
            .await
            .map_err(transport)?;
        self.writer.write_all(b"\n").await.map_err(transport)?;
        self.writer.flush().await.map_err(transport)?;
        Ok(())
    }
}
