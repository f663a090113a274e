use super::error::{SessionError, ToolCallError};
use super::schema::ArgumentValidator;
use super::session::{DEFAULT_SESSION_TIMEOUT, StdioSession, ToolOutcome};
use super::ToolSchema;
use crate::config::ServerSpec;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The session boundary the bridge talks through. The production transport
/// runs one fresh stdio session per call; tests put recording fakes here.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn list_tools(&self, spec: &ServerSpec) -> Result<Vec<ToolSchema>, SessionError>;

    async fn call_tool(
        &self,
        spec: &ServerSpec,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolOutcome, SessionError>;
}

/// Session-per-call transport: every operation spawns, initializes, issues
/// exactly one request, and tears the subprocess down again. A hung or
/// crashed server invocation cannot leak state into concurrent or later
/// calls.
pub struct StdioTransport {
    timeout: Duration,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionTransport for StdioTransport {
    async fn list_tools(&self, spec: &ServerSpec) -> Result<Vec<ToolSchema>, SessionError> {
        let mut session = StdioSession::open(spec, self.timeout).await?;
        let listed = async {
            session.initialize().await?;
            session.list_tools().await
        }
        .await;
        session.close().await;
        listed
    }

    async fn call_tool(
        &self,
        spec: &ServerSpec,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolOutcome, SessionError> {
        let mut session = StdioSession::open(spec, self.timeout).await?;
        let outcome = async {
            session.initialize().await?;
            session.call_tool(tool, arguments).await
        }
        .await;
        session.close().await;
        outcome
    }
}

/// One provider tool exposed to the agent loop. Immutable; safe to invoke
/// concurrently because every invocation runs over its own session.
pub struct CallableTool {
    name: String,
    description: String,
    parameters: Value,
    validator: ArgumentValidator,
    spec: Arc<ServerSpec>,
    transport: Arc<dyn SessionTransport>,
}

impl CallableTool {
    pub(super) fn new(
        schema: ToolSchema,
        validator: ArgumentValidator,
        spec: Arc<ServerSpec>,
        transport: Arc<dyn SessionTransport>,
    ) -> Self {
        Self {
            name: schema.name,
            description: schema.description.unwrap_or_default(),
            parameters: schema.input_schema,
            validator,
            spec,
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn server(&self) -> &str {
        &self.spec.id
    }

    /// Validates the arguments, runs the call over a fresh session, and
    /// maps a provider-reported failure to a typed error. The session is
    /// closed on every path inside the transport.
    pub async fn invoke(&self, arguments: Value) -> Result<Value, ToolCallError> {
        let arguments = self.validator.validate(&arguments)?;
        debug!(tool = %self.name, server = %self.spec.id, "Dispatching tool call");
        let outcome = self
            .transport
            .call_tool(&self.spec, &self.name, arguments)
            .await?;
        if outcome.is_error {
            return Err(ToolCallError::Tool {
                tool: self.name.clone(),
                detail: render_failure(&outcome.content),
            });
        }
        Ok(outcome.content)
    }
}

/// Pulls the human-readable text out of an MCP error payload, falling back
/// to the raw JSON when no text block is present.
fn render_failure(content: &Value) -> String {
    if let Some(blocks) = content.as_array() {
        for block in blocks {
            let is_text = block
                .get("type")
                .and_then(Value::as_str)
                .map(|kind| kind.eq_ignore_ascii_case("text"))
                .unwrap_or(false);
            if is_text {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        return trimmed.to_string();
                    }
                }
            }
        }
    }
    content.to_string()
}
