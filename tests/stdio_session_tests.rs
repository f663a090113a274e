//! End-to-end session tests against a shell-scripted MCP server speaking
//! newline-delimited JSON-RPC on its stdio.

#![cfg(unix)]

use heron::bridge::{
    SessionError, SessionTransport, StdioSession, StdioTransport, ToolCallError, discover,
};
use heron::config::{DiscoveryPolicy, ServerSpec};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Answers initialize, tools/list, and tools/call by matching the method
/// name in the incoming line, then keeps reading until the bridge kills it.
const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":"req-1","result":{"protocolVersion":"2025-06-18","capabilities":{}}}'
      ;;
    *'"tools/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":"req-2","result":{"tools":[{"name":"echo","description":"Echo text back.","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]}}]}}'
      ;;
    *'"tools/call"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":"req-2","result":{"isError":false,"content":[{"type":"text","text":"pong"}]}}'
      ;;
  esac
done
"#;

const FAILING_SERVER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":"req-1","error":{"code":-32600,"message":"unsupported client"}}'
      ;;
  esac
done
"#;

fn shell_spec(id: &str, script: &str) -> Arc<ServerSpec> {
    Arc::new(ServerSpec {
        id: id.to_string(),
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        env: BTreeMap::new(),
        workdir: None,
    })
}

#[tokio::test]
async fn transport_lists_tools_over_a_fresh_session() {
    let spec = shell_spec("fake", FAKE_SERVER);
    let transport = StdioTransport::with_timeout(Duration::from_secs(5));

    let schemas = transport.list_tools(&spec).await.expect("list tools");
    assert_eq!(schemas.len(), 1);
    assert_eq!(schemas[0].name, "echo");
    assert_eq!(schemas[0].description.as_deref(), Some("Echo text back."));
}

#[tokio::test]
async fn discover_and_invoke_round_trip() {
    let specs = vec![shell_spec("fake", FAKE_SERVER)];
    let transport = Arc::new(StdioTransport::with_timeout(Duration::from_secs(5)));

    let inventory = discover(&specs, transport, DiscoveryPolicy::BestEffort)
        .await
        .expect("discover");
    assert_eq!(inventory.len(), 1);

    let tool = inventory.get("echo").expect("echo tool");
    let content = tool
        .invoke(json!({ "text": "ping" }))
        .await
        .expect("invoke succeeds");
    assert_eq!(content, json!([{ "type": "text", "text": "pong" }]));
}

#[tokio::test]
async fn invalid_arguments_fail_before_any_subprocess_runs() {
    let specs = vec![shell_spec("fake", FAKE_SERVER)];
    let transport = Arc::new(StdioTransport::with_timeout(Duration::from_secs(5)));
    let inventory = discover(&specs, transport, DiscoveryPolicy::BestEffort)
        .await
        .expect("discover");

    let tool = inventory.get("echo").expect("echo tool");
    let error = tool
        .invoke(json!({ "text": 42 }))
        .await
        .expect_err("must fail validation");
    assert!(matches!(error, ToolCallError::Arguments(_)));
}

#[tokio::test]
async fn missing_executable_is_a_launch_error() {
    let spec = Arc::new(ServerSpec {
        id: "ghost".to_string(),
        command: "heron-test-no-such-binary".to_string(),
        args: Vec::new(),
        env: BTreeMap::new(),
        workdir: None,
    });
    let transport = StdioTransport::with_timeout(Duration::from_secs(5));

    let error = transport.list_tools(&spec).await.expect_err("must fail");
    assert!(matches!(error, SessionError::Launch { .. }));
}

#[tokio::test]
async fn rpc_error_during_initialize_is_a_handshake_failure() {
    let spec = shell_spec("grumpy", FAILING_SERVER);
    let transport = StdioTransport::with_timeout(Duration::from_secs(5));

    let error = transport.list_tools(&spec).await.expect_err("must fail");
    assert!(matches!(error, SessionError::Handshake { .. }));
}

#[tokio::test]
async fn unresponsive_server_times_out() {
    let spec = shell_spec("silent", "cat >/dev/null");
    let transport = StdioTransport::with_timeout(Duration::from_millis(200));

    let error = transport.list_tools(&spec).await.expect_err("must fail");
    assert!(matches!(error, SessionError::Timeout { .. }));
}

#[tokio::test]
async fn session_refuses_requests_before_initialize() {
    let spec = shell_spec("fake", FAKE_SERVER);
    let mut session = StdioSession::open(&spec, Duration::from_secs(5))
        .await
        .expect("open session");

    let error = session.list_tools().await.expect_err("must fail");
    assert!(matches!(error, SessionError::Closed { .. }));
    session.close().await;
}

#[tokio::test]
async fn best_effort_discovery_survives_a_broken_server() {
    let specs = vec![
        shell_spec("grumpy", FAILING_SERVER),
        shell_spec("fake", FAKE_SERVER),
    ];
    let transport = Arc::new(StdioTransport::with_timeout(Duration::from_secs(5)));

    let inventory = discover(&specs, transport, DiscoveryPolicy::BestEffort)
        .await
        .expect("discover");
    assert_eq!(inventory.len(), 1);
    assert!(inventory.get("echo").is_some());
    assert_eq!(inventory.failures().len(), 1);
    assert_eq!(inventory.failures()[0].server, "grumpy");
}
