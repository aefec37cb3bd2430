// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 request processing and the inter-agent tool catalog.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::RpcErrorCode;
use crate::mailbox::Priority;

use super::sse;
use super::BrokerState;

/// Advertised MCP protocol version.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Default number of messages returned by `check_messages`.
const DEFAULT_CHECK_LIMIT: usize = 10;

/// A parsed `tools/call` invocation. Unknown names are carried through so
/// dispatch stays a total match.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    SendMessage { to: Option<String>, message: Option<String> },
    CheckMessages { limit: usize },
    ListAgents,
    BroadcastMessage { message: Option<String> },
    Unknown(String),
}

impl ToolCall {
    /// Parse the `params` of a `tools/call` request.
    pub fn parse(params: &Value) -> Self {
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let string_arg = |key: &str| {
            args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()).map(|s| s.to_owned())
        };

        match name {
            "send_message" => {
                Self::SendMessage { to: string_arg("to"), message: string_arg("message") }
            }
            "check_messages" => Self::CheckMessages {
                limit: args
                    .get("limit")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_CHECK_LIMIT),
            },
            "list_agents" => Self::ListAgents,
            "broadcast_message" => Self::BroadcastMessage { message: string_arg("message") },
            other => Self::Unknown(other.to_owned()),
        }
    }
}

/// `POST /mcp/{agent}` — standard JSON-RPC request/response, or a JSONL
/// request stream when the client sends `Accept: text/event-stream`.
///
/// The body is parsed manually so malformed JSON maps to a JSON-RPC error
/// instead of a transport-level rejection.
pub async fn handle_request(
    State(state): State<Arc<BrokerState>>,
    Path(agent): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if sse::wants_stream(&headers) {
        return sse::handle_stream(&state, &agent, &body).await;
    }

    let request: Value = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            error!(agent, error = %e, "unparseable rpc body");
            return Json(rpc_error(Value::Null, RpcErrorCode::Internal, &e.to_string()))
                .into_response();
        }
    };
    Json(process_request(&state, &agent, &request).await).into_response()
}

/// Process one JSON-RPC request for an agent.
pub async fn process_request(state: &BrokerState, agent: &str, request: &Value) -> Value {
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
    let id = request.get("id").cloned().unwrap_or(Value::Null);

    info!(agent, method, "mcp request");

    match method {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {
                    "name": "aviary-orchestrator",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        ),
        "tools/list" => rpc_result(id, json!({"tools": tool_catalog()})),
        "tools/call" => {
            let call = ToolCall::parse(&params);
            let text = invoke_tool(state, agent, call).await;
            rpc_result(id, json!({"content": [{"type": "text", "text": text}]}))
        }
        _ => rpc_error(id, RpcErrorCode::MethodNotFound, RpcErrorCode::MethodNotFound.message()),
    }
}

/// Dispatch a tool call on behalf of `agent`. Tool-level failures are
/// returned as result text, never as protocol errors.
async fn invoke_tool(state: &BrokerState, agent: &str, call: ToolCall) -> String {
    match call {
        ToolCall::SendMessage { to, message } => {
            let (Some(to), Some(message)) = (to, message) else {
                return "Error: 'to' and 'message' are required parameters".to_owned();
            };
            let Some(resolved) = state.registry.resolve_name(&to).await else {
                return format!("Error: Agent '{to}' not found");
            };
            if state.delivery.send_message_to_agent(&resolved, agent, &message, Priority::Normal).await
            {
                format!("Message sent to {to}")
            } else {
                format!("Failed to send message to {to}")
            }
        }
        ToolCall::CheckMessages { limit } => {
            let messages = state.mailbox.drain(agent).await;
            if messages.is_empty() {
                return "No new messages".to_owned();
            }
            let start = messages.len().saturating_sub(limit);
            let shown = &messages[start..];
            let mut out = format!("You have {} message(s):\n", shown.len());
            for (i, msg) in shown.iter().enumerate() {
                out.push_str(&format!(
                    "{}. From: {} - {} [{}]\n",
                    i + 1,
                    msg.sender,
                    msg.body,
                    msg.timestamp
                ));
            }
            out.trim_end().to_owned()
        }
        ToolCall::ListAgents => {
            let mut names = state.registry.names().await;
            if names.is_empty() {
                return "No agents registered".to_owned();
            }
            names.sort();
            format!("Available agents ({}): {}", names.len(), names.join(", "))
        }
        ToolCall::BroadcastMessage { message } => {
            let Some(message) = message else {
                return "Error: 'message' is required parameter".to_owned();
            };
            let mut count = 0;
            for name in state.registry.names().await {
                if name == agent {
                    continue;
                }
                let body = format!("[BROADCAST] {message}");
                let msg = crate::mailbox::Message::new(agent, &name, body, Priority::Normal, None);
                state.mailbox.append(&name, msg).await;
                count += 1;
            }
            format!("Broadcast sent to {count} agents")
        }
        ToolCall::Unknown(name) => format!("Unknown tool: {name}"),
    }
}

/// The fixed tool catalog advertised to every agent.
fn tool_catalog() -> Value {
    json!([
        {
            "name": "send_message",
            "description": "Send a message to another agent",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "to": {"type": "string", "description": "Recipient agent"},
                    "message": {"type": "string", "description": "Message content"}
                },
                "required": ["to", "message"]
            }
        },
        {
            "name": "check_messages",
            "description": "Check your mailbox",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "default": 10}
                }
            }
        },
        {
            "name": "list_agents",
            "description": "List all available agents",
            "inputSchema": {"type": "object", "properties": {}}
        },
        {
            "name": "broadcast_message",
            "description": "Send message to all agents",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "message": {"type": "string"}
                },
                "required": ["message"]
            }
        }
    ])
}

/// Build a JSON-RPC success envelope.
pub fn rpc_result(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "result": result, "id": id})
}

/// Build a JSON-RPC error envelope.
pub fn rpc_error(id: Value, code: RpcErrorCode, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {"code": code.code(), "message": message},
        "id": id
    })
}
