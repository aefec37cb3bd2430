// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC broker: the HTTP surface agents reach through their MCP proxy.
//!
//! One server handles every agent; each agent gets its own URL path
//! `/mcp/{agent}` so the caller's identity comes from the route, not the
//! payload. Authentication is deliberately permissive (opaque tokens, no
//! verification) because the server binds only to loopback.

mod oauth;
mod rpc;
mod sse;

pub use rpc::{process_request, ToolCall};

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::agent::AgentRegistry;
use crate::delivery::DeliveryEngine;
use crate::mailbox::Mailbox;

/// Shared state for all broker routes.
pub struct BrokerState {
    pub registry: Arc<AgentRegistry>,
    pub mailbox: Arc<Mailbox>,
    pub delivery: Arc<DeliveryEngine>,
}

/// Build the broker router with all MCP and OAuth-discovery routes.
pub fn build_router(state: Arc<BrokerState>) -> Router {
    Router::new()
        .route("/.well-known/oauth-protected-resource", get(oauth::protected_resource))
        .route("/.well-known/oauth-authorization-server", get(oauth::authorization_server))
        .route("/register", post(oauth::register))
        .route("/authorize", get(oauth::authorize))
        .route("/token", post(oauth::token))
        .route("/mcp/{agent}", get(sse::connect).post(rpc::handle_request))
        .route("/mcp/{agent}/messages", post(sse::message))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `127.0.0.1:port` and serve the broker until `shutdown` fires.
///
/// Returns the spawned server task; the bind itself happens before return
/// so a port conflict surfaces to the caller.
pub async fn serve(
    state: Arc<BrokerState>,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let router = build_router(state);
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!(port, "broker listening on http://localhost:{port}");

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await;
    });
    Ok(handle)
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
