// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent identity and the shared registry.
//!
//! Agents are registered before the supervisor starts; registration order
//! determines pane index. The registry is the single source of truth for
//! who exists; the broker, delivery engine, and poll loops all read it.
//! Lock order when combined with other supervisor locks: agents → mailbox
//! → interrupt.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::transcript::TranscriptMonitor;

/// One registered agent.
#[derive(Debug, Clone)]
pub struct Agent {
    pub name: String,
    /// Transcript file stem; a placeholder until launch reports the real id.
    pub transcript_id: String,
    pub pane_index: usize,
    pub system_prompt: String,
    pub working_dir: Option<String>,
    pub transcript_path: Option<PathBuf>,
    /// Seconds since the Unix epoch of the last observed command.
    pub last_active: f64,
    /// Bound after the transcript file first appears.
    pub monitor: Option<Arc<Mutex<TranscriptMonitor>>>,
}

/// Serializable agent descriptor for `list_agents` responses.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(rename = "session_id")]
    pub transcript_id: String,
    pub pane_index: usize,
    pub last_active: f64,
    pub mailbox_count: usize,
}

/// Registration-ordered registry of agents, keyed by unique name.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    inner: RwLock<IndexMap<String, Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new agent. The pane index is the registration position.
    /// Duplicate names fail.
    pub async fn register(
        &self,
        name: &str,
        transcript_id: &str,
        system_prompt: &str,
        working_dir: Option<&str>,
    ) -> anyhow::Result<usize> {
        let mut inner = self.inner.write().await;
        if inner.contains_key(name) {
            anyhow::bail!("agent '{name}' already registered - duplicate names not allowed");
        }
        let pane_index = inner.len();
        inner.insert(
            name.to_owned(),
            Agent {
                name: name.to_owned(),
                transcript_id: transcript_id.to_owned(),
                pane_index,
                system_prompt: system_prompt.to_owned(),
                working_dir: working_dir.map(|s| s.to_owned()),
                transcript_path: None,
                last_active: unix_now(),
                monitor: None,
            },
        );
        info!(agent = name, pane = pane_index, "registered agent");
        Ok(pane_index)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn names(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Clone of one agent by exact name.
    pub async fn get(&self, name: &str) -> Option<Agent> {
        self.inner.read().await.get(name).cloned()
    }

    /// Resolve a name case-insensitively, returning the registered form.
    pub async fn resolve_name(&self, name: &str) -> Option<String> {
        let inner = self.inner.read().await;
        if inner.contains_key(name) {
            return Some(name.to_owned());
        }
        inner.keys().find(|k| k.eq_ignore_ascii_case(name)).cloned()
    }

    /// Clones of all agents in registration order.
    pub async fn snapshot(&self) -> Vec<Agent> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Record the launched transcript identity for an agent.
    pub async fn set_transcript(&self, name: &str, transcript_id: &str, path: PathBuf) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get_mut(name) {
            Some(agent) => {
                agent.transcript_id = transcript_id.to_owned();
                agent.transcript_path = Some(path);
                true
            }
            None => false,
        }
    }

    /// Bind the transcript monitor once the file exists.
    pub async fn bind_monitor(&self, name: &str, monitor: TranscriptMonitor) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get_mut(name) {
            Some(agent) => {
                agent.monitor = Some(Arc::new(Mutex::new(monitor)));
                true
            }
            None => false,
        }
    }

    pub async fn touch_last_active(&self, name: &str) {
        let mut inner = self.inner.write().await;
        if let Some(agent) = inner.get_mut(name) {
            agent.last_active = unix_now();
        }
    }

    /// Drop all agents. Used by supervisor stop.
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

pub(crate) fn unix_now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
