// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal OAuth discovery surface.
//!
//! MCP clients that insist on OAuth get a complete-looking flow: discovery
//! metadata, dynamic registration, an authorize redirect, and opaque bearer
//! tokens. Nothing is verified; the broker binds only to loopback and the
//! tokens exist to satisfy the client's state machine.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::Query;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// `GET /.well-known/oauth-protected-resource`
pub async fn protected_resource(headers: HeaderMap) -> Json<Value> {
    let base = base_url(&headers);
    Json(json!({
        "authorization_server": format!("{base}/.well-known/oauth-authorization-server"),
    }))
}

/// `GET /.well-known/oauth-authorization-server`
pub async fn authorization_server(headers: HeaderMap) -> Json<Value> {
    let base = base_url(&headers);
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "registration_endpoint": format!("{base}/register"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "client_credentials"],
        "token_endpoint_auth_methods_supported": ["none"],
        "code_challenge_methods_supported": ["S256"],
    }))
}

/// `POST /register` — dynamic client registration. Any request is accepted.
pub async fn register(body: String) -> Json<Value> {
    let parsed: Value = serde_json::from_str(&body).unwrap_or_default();
    let redirect_uris = parsed
        .get("redirect_uris")
        .cloned()
        .unwrap_or_else(|| json!(["http://localhost"]));

    Json(json!({
        "client_id": format!("client_{}", Uuid::new_v4().simple()),
        "client_id_issued_at": unix_now(),
        "grant_types": ["authorization_code", "client_credentials"],
        "token_endpoint_auth_method": "none",
        "redirect_uris": redirect_uris,
        "response_types": ["code"],
    }))
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// `GET /authorize` — issue a code and bounce back to the client.
pub async fn authorize(Query(query): Query<AuthorizeQuery>) -> Response {
    let code = format!("code_{}", unix_now());

    if let Some(redirect_uri) = query.redirect_uri.filter(|u| !u.is_empty()) {
        let separator = if redirect_uri.contains('?') { '&' } else { '?' };
        let state = query.state.unwrap_or_default();
        let location = format!("{redirect_uri}{separator}code={code}&state={state}");
        return (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
    }

    Json(json!({"code": code})).into_response()
}

/// `POST /token` — hand out an opaque bearer token.
pub async fn token() -> Json<Value> {
    Json(json!({
        "access_token": format!("token_{}", Uuid::new_v4().simple()),
        "token_type": "Bearer",
        "expires_in": 3600,
    }))
}
