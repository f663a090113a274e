mod error;
pub mod schema;
mod session;
mod tool;

pub use error::{DiscoveryError, SessionError, ToolCallError};
pub use schema::{ArgumentError, SchemaError};
pub use session::{DEFAULT_SESSION_TIMEOUT, StdioSession, ToolOutcome};
pub use tool::{CallableTool, SessionTransport, StdioTransport};

pub(crate) use crate::config::{DiscoveryPolicy, ServerSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A tool as advertised by a provider's `tools/list` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// A provider or tool that contributed nothing to the inventory, and why.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryFailure {
    pub server: String,
    pub tool: Option<String>,
    pub reason: String,
}

/// The merged, immutable tool set built once at startup and shared
/// read-only by every request afterwards.
pub struct ToolInventory {
    tools: Vec<Arc<CallableTool>>,
    failures: Vec<DiscoveryFailure>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInventory")
            .field("tools", &self.tools.len())
            .field("failures", &self.failures)
            .field("index", &self.index)
            .finish()
    }
}

impl ToolInventory {
    pub fn tools(&self) -> &[Arc<CallableTool>] {
        &self.tools
    }

    pub fn failures(&self) -> &[DiscoveryFailure] {
        &self.failures
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CallableTool>> {
        self.index.get(name).map(|&at| &self.tools[at])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Builds one [`CallableTool`] per schema advertised by each server. Each
/// server is listed over its own short-lived session; the session is gone
/// by the time the tools exist, so every tool captures the launch spec
/// instead of a connection.
///
/// Under the default best-effort policy a failing server contributes zero
/// tools and a recorded failure without aborting its siblings; fail-fast
/// aborts on the first server failure. A tool whose schema does not
/// compile is dropped alone. A name collision across the merged set is a
/// configuration error.
pub async fn discover(
    specs: &[Arc<ServerSpec>],
    transport: Arc<dyn SessionTransport>,
    policy: DiscoveryPolicy,
) -> Result<ToolInventory, DiscoveryError> {
    let mut tools: Vec<Arc<CallableTool>> = Vec::new();
    let mut failures = Vec::new();
    let mut owners: HashMap<String, String> = HashMap::new();

    for spec in specs {
        info!(server = %spec.id, "Listing tools from MCP server");
        let schemas = match transport.list_tools(spec).await {
            Ok(schemas) => schemas,
            Err(source) => {
                warn!(server = %spec.id, %source, "MCP server failed during discovery");
                if policy == DiscoveryPolicy::FailFast {
                    return Err(DiscoveryError::Aborted {
                        server: spec.id.clone(),
                        source,
                    });
                }
                failures.push(DiscoveryFailure {
                    server: spec.id.clone(),
                    tool: None,
                    reason: source.to_string(),
                });
                continue;
            }
        };

        for schema in schemas {
            if let Some(first) = owners.get(&schema.name) {
                return Err(DiscoveryError::NameCollision {
                    name: schema.name,
                    first: first.clone(),
                    second: spec.id.clone(),
                });
            }
            match schema::compile(&schema.input_schema) {
                Ok(validator) => {
                    owners.insert(schema.name.clone(), spec.id.clone());
                    tools.push(Arc::new(CallableTool::new(
                        schema,
                        validator,
                        Arc::clone(spec),
                        Arc::clone(&transport),
                    )));
                }
                Err(source) => {
                    warn!(
                        server = %spec.id,
                        tool = %schema.name,
                        %source,
                        "Dropping tool with uncompilable schema"
                    );
                    failures.push(DiscoveryFailure {
                        server: spec.id.clone(),
                        tool: Some(schema.name),
                        reason: source.to_string(),
                    });
                }
            }
        }
    }

    info!(
        tool_count = tools.len(),
        failure_count = failures.len(),
        "Tool discovery finished"
    );
    let index = tools
        .iter()
        .enumerate()
        .map(|(at, tool)| (tool.name().to_string(), at))
        .collect();
    Ok(ToolInventory {
        tools,
        failures,
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn spec(id: &str) -> Arc<ServerSpec> {
        Arc::new(ServerSpec {
            id: id.to_string(),
            command: "unused".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            workdir: None,
        })
    }

    fn schema(name: &str) -> ToolSchema {
        ToolSchema {
            name: name.to_string(),
            description: Some(format!("{name} tool")),
            input_schema: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        }
    }

    /// Counts sessions so tests can assert one open/close pair per call.
    struct FakeTransport {
        catalogues: HashMap<String, Result<Vec<ToolSchema>, ()>>,
        outcome: ToolOutcome,
        sessions: AtomicUsize,
        calls: Mutex<Vec<(String, String, Value)>>,
    }

    impl FakeTransport {
        fn new(catalogues: HashMap<String, Result<Vec<ToolSchema>, ()>>) -> Self {
            Self {
                catalogues,
                outcome: ToolOutcome {
                    is_error: false,
                    content: json!([{ "type": "text", "text": "ok" }]),
                },
                sessions: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_outcome(mut self, outcome: ToolOutcome) -> Self {
            self.outcome = outcome;
            self
        }

        fn session_count(&self) -> usize {
            self.sessions.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionTransport for FakeTransport {
        async fn list_tools(&self, spec: &ServerSpec) -> Result<Vec<ToolSchema>, SessionError> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            match self.catalogues.get(&spec.id) {
                Some(Ok(schemas)) => Ok(schemas.clone()),
                _ => Err(SessionError::Handshake {
                    server: spec.id.clone(),
                    reason: "scripted failure".to_string(),
                }),
            }
        }

        async fn call_tool(
            &self,
            spec: &ServerSpec,
            tool: &str,
            arguments: Value,
        ) -> Result<ToolOutcome, SessionError> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            self.calls
                .lock()
                .expect("calls lock")
                .push((spec.id.clone(), tool.to_string(), arguments));
            Ok(self.outcome.clone())
        }
    }

    #[tokio::test]
    async fn merges_tools_from_all_servers() {
        let transport = Arc::new(FakeTransport::new(HashMap::from([
            ("alpha".to_string(), Ok(vec![schema("echo"), schema("read")])),
            ("beta".to_string(), Ok(vec![schema("write")])),
        ])));
        let specs = vec![spec("alpha"), spec("beta")];

        let inventory = discover(&specs, transport.clone(), DiscoveryPolicy::BestEffort)
            .await
            .expect("discover succeeds");

        assert_eq!(inventory.len(), 3);
        assert!(inventory.failures().is_empty());
        assert!(inventory.get("write").is_some());
        // One listing session per server, none left behind.
        assert_eq!(transport.session_count(), 2);
    }

    #[tokio::test]
    async fn failing_server_does_not_block_healthy_sibling() {
        let transport = Arc::new(FakeTransport::new(HashMap::from([
            ("broken".to_string(), Err(())),
            ("healthy".to_string(), Ok(vec![schema("echo")])),
        ])));
        let specs = vec![spec("broken"), spec("healthy")];

        let inventory = discover(&specs, transport, DiscoveryPolicy::BestEffort)
            .await
            .expect("discover succeeds");

        assert_eq!(inventory.len(), 1);
        assert!(inventory.get("echo").is_some());
        assert_eq!(inventory.failures().len(), 1);
        assert_eq!(inventory.failures()[0].server, "broken");
        assert!(inventory.failures()[0].tool.is_none());
    }

    #[tokio::test]
    async fn fail_fast_aborts_on_first_failure() {
        let transport = Arc::new(FakeTransport::new(HashMap::from([
            ("broken".to_string(), Err(())),
            ("healthy".to_string(), Ok(vec![schema("echo")])),
        ])));
        let specs = vec![spec("broken"), spec("healthy")];

        let error = discover(&specs, transport, DiscoveryPolicy::FailFast)
            .await
            .expect_err("discovery must abort");
        assert!(matches!(error, DiscoveryError::Aborted { server, .. } if server == "broken"));
    }

    #[tokio::test]
    async fn duplicate_tool_name_is_flagged() {
        let transport = Arc::new(FakeTransport::new(HashMap::from([
            ("alpha".to_string(), Ok(vec![schema("echo")])),
            ("beta".to_string(), Ok(vec![schema("echo")])),
        ])));
        let specs = vec![spec("alpha"), spec("beta")];

        let error = discover(&specs, transport, DiscoveryPolicy::BestEffort)
            .await
            .expect_err("collision must be flagged");
        assert!(matches!(
            error,
            DiscoveryError::NameCollision { name, .. } if name == "echo"
        ));
    }

    #[tokio::test]
    async fn uncompilable_schema_drops_that_tool_only() {
        let bad = ToolSchema {
            name: "bad".to_string(),
            description: None,
            input_schema: json!({ "type": "array" }),
        };
        let transport = Arc::new(FakeTransport::new(HashMap::from([(
            "alpha".to_string(),
            Ok(vec![schema("echo"), bad]),
        )])));
        let specs = vec![spec("alpha")];

        let inventory = discover(&specs, transport, DiscoveryPolicy::BestEffort)
            .await
            .expect("discover succeeds");

        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.failures().len(), 1);
        assert_eq!(inventory.failures()[0].tool.as_deref(), Some("bad"));
    }

    #[tokio::test]
    async fn invoke_validates_before_opening_a_session() {
        let transport = Arc::new(FakeTransport::new(HashMap::from([(
            "alpha".to_string(),
            Ok(vec![schema("echo")]),
        )])));
        let specs = vec![spec("alpha")];
        let inventory = discover(&specs, transport.clone(), DiscoveryPolicy::BestEffort)
            .await
            .expect("discover succeeds");
        let sessions_after_discovery = transport.session_count();

        let tool = inventory.get("echo").expect("echo tool");
        let error = tool.invoke(json!({})).await.expect_err("must fail");
        assert!(matches!(
            error,
            ToolCallError::Arguments(ArgumentError::MissingRequired { .. })
        ));
        // Rejected arguments never reach the subprocess.
        assert_eq!(transport.session_count(), sessions_after_discovery);
    }

    #[tokio::test]
    async fn invoke_runs_one_session_per_call() {
        let transport = Arc::new(FakeTransport::new(HashMap::from([(
            "alpha".to_string(),
            Ok(vec![schema("echo")]),
        )])));
        let specs = vec![spec("alpha")];
        let inventory = discover(&specs, transport.clone(), DiscoveryPolicy::BestEffort)
            .await
            .expect("discover succeeds");
        let baseline = transport.session_count();

        let tool = inventory.get("echo").expect("echo tool");
        tool.invoke(json!({ "text": "one" })).await.expect("first call");
        tool.invoke(json!({ "text": "two" })).await.expect("second call");

        assert_eq!(transport.session_count(), baseline + 2);
        let calls = transport.calls.lock().expect("calls lock");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, "echo");
    }

    #[tokio::test]
    async fn provider_reported_failure_is_typed() {
        let transport = Arc::new(
            FakeTransport::new(HashMap::from([(
                "alpha".to_string(),
                Ok(vec![schema("echo")]),
            )]))
            .with_outcome(ToolOutcome {
                is_error: true,
                content: json!([{ "type": "text", "text": "upstream exploded" }]),
            }),
        );
        let specs = vec![spec("alpha")];
        let inventory = discover(&specs, transport, DiscoveryPolicy::BestEffort)
            .await
            .expect("discover succeeds");

        let tool = inventory.get("echo").expect("echo tool");
        let error = tool
            .invoke(json!({ "text": "boom" }))
            .await
            .expect_err("must fail");
        assert!(matches!(
            error,
            ToolCallError::Tool { detail, .. } if detail == "upstream exploded"
        ));
    }
}
