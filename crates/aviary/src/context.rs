// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Team context registry: the durable record of which agents belong to
//! which named team, their transcript identifiers, and working directory.
//!
//! Contexts outlive the supervisor process: a resumed team is rebuilt from
//! this file. Reads are tolerant of corruption (treated as empty); every
//! write goes through a temp file and an atomic rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Registry file location under the user's home.
const REGISTRY_DIR: &str = ".claude-orc";
const REGISTRY_FILE: &str = "team_contexts.json";

/// One agent's slot in a team context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextAgent {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default = "ContextAgent::default_model")]
    pub model: String,
    #[serde(default)]
    pub pane_index: Option<usize>,
    #[serde(default)]
    pub transcript_id: String,
}

impl ContextAgent {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            model: Self::default_model(),
            pane_index: None,
            transcript_id: String::new(),
        }
    }

    /// Model assignment is a constant default; callers override per agent.
    pub fn default_model() -> String {
        "sonnet".to_owned()
    }
}

/// A named team context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamContext {
    pub context_name: String,
    pub tmux_session: String,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub agents: Vec<ContextAgent>,
    #[serde(default)]
    pub orchestrator_config: Map<String, Value>,
    /// Fields written by other (possibly newer) tools, preserved round-trip.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Persistent registry of team contexts.
///
/// All writes are serialized through one in-process lock; the file is the
/// inter-process source of truth.
pub struct ContextRegistry {
    path: PathBuf,
    contexts: Mutex<BTreeMap<String, TeamContext>>,
}

impl ContextRegistry {
    /// Open the default registry at `~/.claude-orc/team_contexts.json`.
    pub fn open_default() -> anyhow::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| anyhow::anyhow!("HOME not set; cannot locate context registry"))?;
        Self::open(Path::new(&home).join(REGISTRY_DIR).join(REGISTRY_FILE))
    }

    /// Open a registry at an explicit path (used by tests).
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contexts = load_registry(&path);
        Ok(Self { path, contexts: Mutex::new(contexts) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a new context. Fails on duplicate names.
    pub async fn create(
        &self,
        context_name: &str,
        agents: Vec<ContextAgent>,
        tmux_session: &str,
        working_dir: Option<&str>,
        orchestrator_config: Map<String, Value>,
    ) -> anyhow::Result<TeamContext> {
        let mut contexts = self.contexts.lock().await;
        if contexts.contains_key(context_name) {
            anyhow::bail!("context '{context_name}' already exists");
        }
        let context = TeamContext {
            context_name: context_name.to_owned(),
            tmux_session: tmux_session.to_owned(),
            created_at: timestamp_string(),
            updated_at: None,
            working_dir: working_dir.map(|s| s.to_owned()),
            agents,
            orchestrator_config,
            extra: Map::new(),
        };
        contexts.insert(context_name.to_owned(), context.clone());
        self.save(&contexts)?;
        info!(context = context_name, agents = context.agents.len(), "created context");
        Ok(context)
    }

    pub async fn get(&self, context_name: &str) -> Option<TeamContext> {
        self.contexts.lock().await.get(context_name).cloned()
    }

    pub async fn list(&self) -> BTreeMap<String, TeamContext> {
        self.contexts.lock().await.clone()
    }

    /// Partial update. Only known fields are accepted; unknown fields fail
    /// the whole update. `updatedAt` is always refreshed.
    pub async fn update(
        &self,
        context_name: &str,
        fields: Map<String, Value>,
    ) -> anyhow::Result<TeamContext> {
        let mut contexts = self.contexts.lock().await;
        let context = contexts
            .get_mut(context_name)
            .ok_or_else(|| anyhow::anyhow!("context '{context_name}' not found"))?;

        for (key, value) in fields {
            match key.as_str() {
                "tmuxSession" => {
                    context.tmux_session =
                        value.as_str().map(|s| s.to_owned()).unwrap_or_default();
                }
                "workingDir" => {
                    context.working_dir = value.as_str().map(|s| s.to_owned());
                }
                "agents" => {
                    context.agents = serde_json::from_value(value)?;
                }
                "orchestratorConfig" => {
                    context.orchestrator_config = match value {
                        Value::Object(map) => map,
                        _ => anyhow::bail!("orchestratorConfig must be an object"),
                    };
                }
                other => anyhow::bail!("unknown context field: {other}"),
            }
        }
        context.updated_at = Some(timestamp_string());
        let updated = context.clone();
        self.save(&contexts)?;
        Ok(updated)
    }

    /// Record a new transcript id for one agent (fork resolution).
    pub async fn update_agent_transcript(
        &self,
        context_name: &str,
        agent_name: &str,
        transcript_id: &str,
    ) -> anyhow::Result<bool> {
        let mut contexts = self.contexts.lock().await;
        let Some(context) = contexts.get_mut(context_name) else {
            return Ok(false);
        };
        let Some(agent) = context.agents.iter_mut().find(|a| a.name == agent_name) else {
            return Ok(false);
        };
        agent.transcript_id = transcript_id.to_owned();
        context.updated_at = Some(timestamp_string());
        self.save(&contexts)?;
        Ok(true)
    }

    /// Delete a context. Returns whether it existed.
    pub async fn delete(&self, context_name: &str) -> anyhow::Result<bool> {
        let mut contexts = self.contexts.lock().await;
        if contexts.remove(context_name).is_none() {
            return Ok(false);
        }
        self.save(&contexts)?;
        info!(context = context_name, "deleted context");
        Ok(true)
    }

    /// Resume a context: verify its tmux session and every recorded
    /// transcript still exist, refresh `updatedAt`, and return it.
    pub async fn resume(&self, context_name: &str) -> anyhow::Result<TeamContext> {
        let context = self
            .get(context_name)
            .await
            .ok_or_else(|| anyhow::anyhow!("context '{context_name}' not found"))?;

        if !tmux_session_exists(&context.tmux_session).await {
            anyhow::bail!(
                "tmux session '{}' for context '{context_name}' is gone",
                context.tmux_session
            );
        }

        if let Some(ref working_dir) = context.working_dir {
            let mut missing = Vec::new();
            for agent in &context.agents {
                if agent.transcript_id.is_empty() {
                    continue;
                }
                let dir = crate::fork::session_directory(context_name, &agent.name, working_dir);
                let transcript = dir.join(format!("{}.jsonl", agent.transcript_id));
                if !transcript.is_file() {
                    missing.push(agent.name.clone());
                }
            }
            if !missing.is_empty() {
                anyhow::bail!(
                    "missing transcripts for context '{context_name}': {}",
                    missing.join(", ")
                );
            }
        }

        let mut contexts = self.contexts.lock().await;
        let stored = contexts
            .get_mut(context_name)
            .ok_or_else(|| anyhow::anyhow!("context '{context_name}' vanished during resume"))?;
        stored.updated_at = Some(timestamp_string());
        let resumed = stored.clone();
        self.save(&contexts)?;
        info!(context = context_name, "resumed context");
        Ok(resumed)
    }

    /// Remove a context after logging the resources an operator would tear
    /// down by hand.
    pub async fn cleanup(&self, context_name: &str) -> anyhow::Result<bool> {
        let Some(context) = self.get(context_name).await else {
            return Ok(false);
        };
        info!(
            context = context_name,
            tmux_session = %context.tmux_session,
            "cleaning up context"
        );
        self.delete(context_name).await
    }

    /// Remove every context whose tmux session is gone. Returns the names
    /// of the contexts that were dropped.
    pub async fn cleanup_stale(&self) -> anyhow::Result<Vec<String>> {
        let names: Vec<(String, String)> = self
            .list()
            .await
            .into_iter()
            .map(|(name, context)| (name, context.tmux_session))
            .collect();

        let mut removed = Vec::new();
        for (name, session) in names {
            if tmux_session_exists(&session).await {
                continue;
            }
            warn!(context = %name, tmux_session = %session, "removing stale context");
            if self.delete(&name).await? {
                removed.push(name);
            }
        }
        Ok(removed)
    }

    /// Write the registry atomically: temp file in the same directory, then
    /// rename over the target.
    fn save(&self, contexts: &BTreeMap<String, TeamContext>) -> anyhow::Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut tmp, contexts)?;
        tmp.persist(&self.path)
            .map_err(|e| anyhow::anyhow!("failed to persist registry: {e}"))?;
        Ok(())
    }
}

/// Load the registry, treating a missing or corrupted file as empty.
fn load_registry(path: &Path) -> BTreeMap<String, TeamContext> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read context registry");
            return BTreeMap::new();
        }
    };
    match serde_json::from_str(&data) {
        Ok(contexts) => contexts,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupted context registry, starting empty");
            BTreeMap::new()
        }
    }
}

/// Probe for a live tmux session without touching the adapter.
async fn tmux_session_exists(session: &str) -> bool {
    tokio::process::Command::new("tmux")
        .args(["has-session", "-t", session])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Registry timestamps are Unix seconds rendered as strings.
fn timestamp_string() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
