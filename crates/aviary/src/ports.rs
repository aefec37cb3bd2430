// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loopback port discovery for the broker listener.

use std::net::TcpListener;

use tracing::info;

/// Check whether a loopback TCP port can currently be bound.
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Find an available port starting from `preferred`, scanning at most
/// `max_attempts` consecutive ports.
///
/// Returns `preferred` itself when it is free; otherwise the first free port
/// in `[preferred, preferred + max_attempts)`. Fails after the whole range
/// has been scanned.
pub fn find_available_port(preferred: u16, max_attempts: u16) -> anyhow::Result<u16> {
    for offset in 0..max_attempts {
        let port = preferred.saturating_add(offset);
        if is_port_available(port) {
            if offset > 0 {
                info!(preferred, port, "preferred port unavailable, using fallback");
            }
            return Ok(port);
        }
    }
    anyhow::bail!(
        "no available port in range {}-{}",
        preferred,
        preferred.saturating_add(max_attempts.saturating_sub(1))
    )
}

/// Find a port for a named service, logging the chosen port.
pub fn find_service_port(service: &str, default_port: u16) -> anyhow::Result<u16> {
    let port = find_available_port(default_port, 10)?;
    info!(service, port, "service port selected");
    Ok(port)
}

#[cfg(test)]
#[path = "ports_tests.rs"]
mod tests;
