// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use serde_json::{json, Value};

use super::*;
use crate::test_support::{delivery_harness, DeliveryHarness};

async fn broker_server(agents: &[&str]) -> anyhow::Result<(axum_test::TestServer, DeliveryHarness)> {
    let harness = delivery_harness(agents).await?;
    let state = Arc::new(BrokerState {
        registry: harness.registry.clone(),
        mailbox: harness.mailbox.clone(),
        delivery: harness.delivery.clone(),
    });
    let server = axum_test::TestServer::new(build_router(state))?;
    Ok((server, harness))
}

fn rpc(method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1})
}

fn tool_call(name: &str, arguments: Value) -> Value {
    rpc("tools/call", json!({"name": name, "arguments": arguments}))
}

/// Extract the text content of a tools/call result.
fn result_text(body: &Value) -> String {
    body["result"]["content"][0]["text"].as_str().unwrap_or_default().to_owned()
}

#[tokio::test]
async fn initialize_advertises_protocol_version() -> anyhow::Result<()> {
    let (server, _h) = broker_server(&["alice"]).await?;
    let resp = server.post("/mcp/alice").json(&rpc("initialize", json!({}))).await;
    let body: Value = resp.json();

    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(body["result"]["serverInfo"]["name"], "aviary-orchestrator");
    assert_eq!(body["id"], 1);
    Ok(())
}

#[tokio::test]
async fn tools_list_has_fixed_catalog() -> anyhow::Result<()> {
    let (server, _h) = broker_server(&["alice"]).await?;
    let resp = server.post("/mcp/alice").json(&rpc("tools/list", json!({}))).await;
    let body: Value = resp.json();

    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .map(|tools| tools.iter().filter_map(|t| t["name"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(names, vec!["send_message", "check_messages", "list_agents", "broadcast_message"]);
    Ok(())
}

#[tokio::test]
async fn unknown_method_is_rpc_error() -> anyhow::Result<()> {
    let (server, _h) = broker_server(&["alice"]).await?;
    let resp = server.post("/mcp/alice").json(&rpc("resources/list", json!({}))).await;
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], -32601);
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_internal_error() -> anyhow::Result<()> {
    let (server, _h) = broker_server(&["alice"]).await?;
    let resp = server
        .post("/mcp/alice")
        .content_type("application/json")
        .text("{not json")
        .await;
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], -32603);
    Ok(())
}

#[tokio::test]
async fn send_message_round_trip() -> anyhow::Result<()> {
    let (server, h) = broker_server(&["alice", "bob"]).await?;
    let resp = server
        .post("/mcp/alice")
        .json(&tool_call("send_message", json!({"to": "bob", "message": "Hi"})))
        .await;
    let body: Value = resp.json();
    assert_eq!(result_text(&body), "Message sent to bob");

    // Exactly one mailbox entry and one [MESSAGE] pane line.
    assert_eq!(h.mailbox.count("bob").await, 1);
    let sent = h.panes.sent_lines().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("from alice"));
    Ok(())
}

#[tokio::test]
async fn send_message_requires_fields() -> anyhow::Result<()> {
    let (server, _h) = broker_server(&["alice", "bob"]).await?;
    let resp = server
        .post("/mcp/alice")
        .json(&tool_call("send_message", json!({"to": "bob"})))
        .await;
    let body: Value = resp.json();
    assert_eq!(result_text(&body), "Error: 'to' and 'message' are required parameters");
    assert!(body.get("error").is_none());
    Ok(())
}

#[tokio::test]
async fn send_message_to_unknown_agent() -> anyhow::Result<()> {
    let (server, _h) = broker_server(&["alice"]).await?;
    let resp = server
        .post("/mcp/alice")
        .json(&tool_call("send_message", json!({"to": "ghost", "message": "x"})))
        .await;
    let body: Value = resp.json();
    assert_eq!(result_text(&body), "Error: Agent 'ghost' not found");
    Ok(())
}

#[tokio::test]
async fn check_messages_drains_in_order() -> anyhow::Result<()> {
    let (server, h) = broker_server(&["alice", "bob"]).await?;
    h.delivery.send_message_to_agent("bob", "alice", "first", crate::mailbox::Priority::Normal).await;
    h.delivery.send_message_to_agent("bob", "alice", "second", crate::mailbox::Priority::Normal).await;

    let resp = server.post("/mcp/bob").json(&tool_call("check_messages", json!({}))).await;
    let body: Value = resp.json();
    let text = result_text(&body);
    assert!(text.starts_with("You have 2 message(s):"));
    let first = text.find("first").ok_or_else(|| anyhow::anyhow!("missing first"))?;
    let second = text.find("second").ok_or_else(|| anyhow::anyhow!("missing second"))?;
    assert!(first < second);

    // Drained: a second check is empty.
    let resp = server.post("/mcp/bob").json(&tool_call("check_messages", json!({}))).await;
    let body: Value = resp.json();
    assert_eq!(result_text(&body), "No new messages");
    Ok(())
}

#[tokio::test]
async fn check_messages_respects_limit() -> anyhow::Result<()> {
    let (server, h) = broker_server(&["alice", "bob"]).await?;
    for i in 0..5 {
        h.mailbox
            .append(
                "bob",
                crate::mailbox::Message::new(
                    "alice",
                    "bob",
                    format!("msg {i}"),
                    crate::mailbox::Priority::Normal,
                    None,
                ),
            )
            .await;
    }

    let resp = server
        .post("/mcp/bob")
        .json(&tool_call("check_messages", json!({"limit": 2})))
        .await;
    let body: Value = resp.json();
    let text = result_text(&body);
    // The two most recent messages are shown; the mailbox is drained.
    assert!(text.starts_with("You have 2 message(s):"));
    assert!(text.contains("msg 3"));
    assert!(text.contains("msg 4"));
    assert_eq!(h.mailbox.count("bob").await, 0);
    Ok(())
}

#[tokio::test]
async fn list_agents_includes_everyone() -> anyhow::Result<()> {
    let (server, _h) = broker_server(&["alice", "bob"]).await?;
    let resp = server.post("/mcp/alice").json(&tool_call("list_agents", json!({}))).await;
    let body: Value = resp.json();
    assert_eq!(result_text(&body), "Available agents (2): alice, bob");
    Ok(())
}

#[tokio::test]
async fn broadcast_excludes_sender() -> anyhow::Result<()> {
    let (server, h) = broker_server(&["leader", "alice", "bob"]).await?;
    let resp = server
        .post("/mcp/leader")
        .json(&tool_call("broadcast_message", json!({"message": "status?"})))
        .await;
    let body: Value = resp.json();
    assert_eq!(result_text(&body), "Broadcast sent to 2 agents");

    assert_eq!(h.mailbox.count("leader").await, 0);
    for name in ["alice", "bob"] {
        let messages = h.mailbox.drain(name).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "[BROADCAST] status?");
        assert_eq!(messages[0].sender, "leader");
    }
    Ok(())
}

#[tokio::test]
async fn unknown_tool_is_result_text_not_protocol_error() -> anyhow::Result<()> {
    let (server, _h) = broker_server(&["alice"]).await?;
    let resp = server.post("/mcp/alice").json(&tool_call("frobnicate", json!({}))).await;
    let body: Value = resp.json();
    assert_eq!(result_text(&body), "Unknown tool: frobnicate");
    assert!(body.get("error").is_none());
    Ok(())
}

#[tokio::test]
async fn sse_message_endpoint_processes_requests() -> anyhow::Result<()> {
    let (server, _h) = broker_server(&["alice"]).await?;
    let resp = server.post("/mcp/alice/messages").json(&rpc("initialize", json!({}))).await;
    let body: Value = resp.json();
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    Ok(())
}

#[tokio::test]
async fn streaming_body_gets_parse_errors_per_line() -> anyhow::Result<()> {
    let (server, _h) = broker_server(&["alice"]).await?;
    let payload = format!("{}\nnot json\n", rpc("tools/list", json!({})));
    let resp = server
        .post("/mcp/alice/messages")
        .add_header(
            axum::http::header::ACCEPT,
            axum::http::HeaderValue::from_static("text/event-stream"),
        )
        .content_type("application/jsonl")
        .text(payload)
        .await;
    let text = resp.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: Value = serde_json::from_str(lines[0])?;
    assert!(first["result"]["tools"].is_array());
    let second: Value = serde_json::from_str(lines[1])?;
    assert_eq!(second["error"]["code"], -32700);
    Ok(())
}

#[tokio::test]
async fn oauth_discovery_surface() -> anyhow::Result<()> {
    let (server, _h) = broker_server(&["alice"]).await?;

    let resp = server.get("/.well-known/oauth-protected-resource").await;
    let body: Value = resp.json();
    let auth_server = body["authorization_server"].as_str().unwrap_or_default();
    assert!(auth_server.ends_with("/.well-known/oauth-authorization-server"));

    let resp = server.get("/.well-known/oauth-authorization-server").await;
    let body: Value = resp.json();
    assert!(body["token_endpoint"].as_str().unwrap_or_default().ends_with("/token"));
    assert_eq!(body["code_challenge_methods_supported"][0], "S256");

    let resp = server.post("/register").json(&json!({"redirect_uris": ["http://localhost:7777"]})).await;
    let body: Value = resp.json();
    assert!(body["client_id"].as_str().unwrap_or_default().starts_with("client_"));
    assert_eq!(body["redirect_uris"][0], "http://localhost:7777");

    let resp = server.post("/token").json(&json!({})).await;
    let body: Value = resp.json();
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["access_token"].as_str().unwrap_or_default().starts_with("token_"));
    Ok(())
}

#[tokio::test]
async fn authorize_redirects_with_code_and_state() -> anyhow::Result<()> {
    let (server, _h) = broker_server(&["alice"]).await?;
    let resp = server
        .get("/authorize")
        .add_query_param("redirect_uri", "http://localhost/cb")
        .add_query_param("state", "xyz")
        .await;
    resp.assert_status(axum::http::StatusCode::FOUND);
    let location = resp
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    assert!(location.starts_with("http://localhost/cb?code=code_"));
    assert!(location.ends_with("&state=xyz"));
    Ok(())
}
