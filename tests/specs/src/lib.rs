// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end scenario tests.
//!
//! Runs the broker on a real loopback listener and exercises it with raw
//! HTTP/1.1 requests, the way an agent's MCP proxy would.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use aviary::broker::{self, BrokerState};
use aviary::test_support::{delivery_harness, DeliveryHarness};

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A broker served on a real port, over fake panes.
pub struct BrokerFixture {
    pub port: u16,
    pub harness: DeliveryHarness,
    shutdown: CancellationToken,
}

impl BrokerFixture {
    /// Start a broker hosting the given agents.
    pub async fn start(agents: &[&str]) -> anyhow::Result<Self> {
        let harness = delivery_harness(agents).await?;
        let state = Arc::new(BrokerState {
            registry: harness.registry.clone(),
            mailbox: harness.mailbox.clone(),
            delivery: harness.delivery.clone(),
        });

        let port = free_port()?;
        let shutdown = CancellationToken::new();
        broker::serve(state, port, shutdown.clone()).await?;
        Ok(Self { port, harness, shutdown })
    }

    /// Invoke a broker tool as `agent` and return the result text.
    pub async fn call_tool(
        &self,
        agent: &str,
        name: &str,
        arguments: Value,
    ) -> anyhow::Result<String> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments},
            "id": 1
        });
        let response = http_post_json(self.port, &format!("/mcp/{agent}"), &request).await?;
        response["result"]["content"][0]["text"]
            .as_str()
            .map(|s| s.to_owned())
            .ok_or_else(|| anyhow::anyhow!("no text content in response: {response}"))
    }
}

impl Drop for BrokerFixture {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Make a raw HTTP/1.1 POST with a JSON body, returning the parsed JSON
/// response body.
pub async fn http_post_json(port: u16, path: &str, body: &Value) -> anyhow::Result<Value> {
    let payload = body.to_string();
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await?;
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8(buf)?;

    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b)
        .ok_or_else(|| anyhow::anyhow!("malformed http response"))?;
    Ok(serde_json::from_str(body.trim())?)
}
