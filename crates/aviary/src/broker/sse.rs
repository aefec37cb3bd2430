// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSE companion channel: long-lived event stream per agent plus a POST
//! endpoint for request bodies. Some MCP clients insist on this transport
//! shape even when they only ever use plain request/response.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::header;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::RpcErrorCode;

use super::rpc::{process_request, rpc_error};
use super::BrokerState;

/// Interval between keepalive comments on an idle SSE channel.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// `GET /mcp/{agent}` — open the event stream.
///
/// Emits a `connected` event, then keepalives until the client goes away.
pub async fn connect(
    Path(agent): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(agent, "sse channel opened");

    let connected = Event::default()
        .event("connected")
        .data(json!({"message": "Connected to MCP server"}).to_string());
    let events = stream::once(async move { Ok(connected) }).chain(stream::pending());

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEPALIVE_INTERVAL).text("keepalive"))
}

/// `POST /mcp/{agent}/messages` — request bodies for the SSE channel.
///
/// A body with `Accept: text/event-stream` is treated as a stream of JSONL
/// requests; each line is answered in order, with `-32700` for lines that
/// fail to parse. Otherwise the body is one JSON-RPC request.
pub async fn message(
    State(state): State<Arc<BrokerState>>,
    Path(agent): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if wants_stream(&headers) {
        return handle_stream(&state, &agent, &body).await;
    }

    let request: Value = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            error!(agent, error = %e, "sse message body unparseable");
            return Json(rpc_error(Value::Null, RpcErrorCode::Internal, &e.to_string()))
                .into_response();
        }
    };
    Json(process_request(&state, &agent, &request).await).into_response()
}

/// True when the client asked for the streaming request style.
pub fn wants_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}

/// Answer a JSONL stream of requests line by line.
pub async fn handle_stream(state: &BrokerState, agent: &str, body: &str) -> Response {
    let mut out = String::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Value>(line) {
            Ok(request) => process_request(state, agent, &request).await,
            Err(_) => {
                rpc_error(Value::Null, RpcErrorCode::ParseError, RpcErrorCode::ParseError.message())
            }
        };
        out.push_str(&response.to_string());
        out.push('\n');
    }
    ([(header::CONTENT_TYPE, "application/jsonl")], out).into_response()
}
