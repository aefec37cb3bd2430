// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-fork detection.
//!
//! When an agent's child process resumes, it may start appending to a new
//! transcript file whose early lines still carry the previous sessionId.
//! The detector resolves the currently-active transcript for each recorded
//! id by walking the agent's session directory newest-first and testing
//! lineage. It never fabricates an id: a stored transcript that cannot be
//! found and has no descendant is an error for the caller to handle.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::{ContextAgent, ContextRegistry};

/// Only the first lines of a transcript are parsed for lineage.
const LINEAGE_SCAN_LINES: usize = 10;

/// Settle delay after a filesystem event before re-resolving, letting the
/// file write complete.
const EVENT_SETTLE: Duration = Duration::from_millis(500);

/// Polling cadence when filesystem events are unavailable (and as a
/// backstop when they are).
const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Lineage metadata parsed from a transcript's early lines.
#[derive(Debug, Clone)]
pub struct TranscriptLineage {
    /// The file stem, which is the transcript's own id.
    pub transcript_id: String,
    /// True when the sessionId changed between early lines (a fork point).
    pub session_changed: bool,
    /// Distinct sessionIds observed, in order of first appearance.
    pub session_ids: Vec<String>,
}

/// Session directory for an agent, per the launcher's naming convention:
/// `~/.claude/projects/ccbox-{context}-{agent}-{workdir with / as -}`.
///
/// The escaped working directory keeps its leading dash (`/a/b` → `-a-b`);
/// that is the form the launcher creates on disk.
pub fn session_directory(context_name: &str, agent_name: &str, working_dir: &str) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_default();
    session_directory_in(Path::new(&home).join(".claude").join("projects"), context_name, agent_name, working_dir)
}

/// As [`session_directory`], rooted at an explicit projects directory.
pub fn session_directory_in(
    projects_dir: PathBuf,
    context_name: &str,
    agent_name: &str,
    working_dir: &str,
) -> PathBuf {
    let agent = agent_name.to_lowercase().replace(' ', "-");
    let escaped = working_dir.replace('/', "-");
    projects_dir.join(format!("ccbox-{context_name}-{agent}-{escaped}"))
}

/// Parse a transcript's early lines for lineage information.
pub fn parse_transcript_lineage(path: &Path) -> anyhow::Result<TranscriptLineage> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("transcript path has no stem: {}", path.display()))?
        .to_owned();

    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut session_ids: Vec<String> = Vec::new();
    let mut session_changed = false;
    let mut prev: Option<String> = None;

    for line in reader.lines().take(LINEAGE_SCAN_LINES) {
        let line = line?;
        let Ok(record) = serde_json::from_str::<Value>(&line) else { continue };
        let Some(session_id) = record.get("sessionId").and_then(Value::as_str) else { continue };

        if !session_ids.iter().any(|s| s == session_id) {
            session_ids.push(session_id.to_owned());
        }
        if prev.as_deref().is_some_and(|p| p != session_id) {
            session_changed = true;
            debug!(
                file = %path.display(),
                from = prev.as_deref().unwrap_or_default(),
                to = session_id,
                "fork point observed in transcript"
            );
        }
        prev = Some(session_id.to_owned());
    }

    Ok(TranscriptLineage { transcript_id: stem, session_changed, session_ids })
}

/// Is the transcript at `path` a descendant of `parent_id`?
///
/// True when the parent id appears among the sessionIds observed on the
/// file's early lines.
pub fn verify_descendant(parent_id: &str, path: &Path) -> anyhow::Result<bool> {
    let lineage = parse_transcript_lineage(path)?;
    Ok(lineage.session_ids.iter().any(|s| s == parent_id))
}

/// Resolves active transcripts for team contexts.
pub struct ForkDetector {
    projects_dir: PathBuf,
    registry: std::sync::Arc<ContextRegistry>,
}

impl ForkDetector {
    pub fn new(registry: std::sync::Arc<ContextRegistry>) -> Self {
        let home = std::env::var("HOME").unwrap_or_default();
        Self::with_projects_dir(Path::new(&home).join(".claude").join("projects"), registry)
    }

    /// Root the detector at an explicit projects directory (tests).
    pub fn with_projects_dir(
        projects_dir: PathBuf,
        registry: std::sync::Arc<ContextRegistry>,
    ) -> Self {
        Self { projects_dir, registry }
    }

    fn agent_session_dir(&self, context_name: &str, agent_name: &str, working_dir: &str) -> PathBuf {
        session_directory_in(self.projects_dir.clone(), context_name, agent_name, working_dir)
    }

    /// Find the currently-active transcript id for an agent.
    ///
    /// Walks `*.jsonl` files newest-first: the stored id's own file means it
    /// is still current; otherwise the first newer descendant wins. A stored
    /// id that is neither found nor superseded is an error.
    pub fn find_active_transcript(
        &self,
        context_name: &str,
        agent: &ContextAgent,
        working_dir: &str,
    ) -> anyhow::Result<String> {
        let dir = self.agent_session_dir(context_name, &agent.name, working_dir);
        if !dir.is_dir() {
            anyhow::bail!("session directory not found for agent '{}': {}", agent.name, dir.display());
        }

        let mut files: Vec<(PathBuf, SystemTime)> = std::fs::read_dir(&dir)?
            .flatten()
            .filter(|entry| {
                entry.path().extension().and_then(|e| e.to_str()) == Some("jsonl")
            })
            .filter_map(|entry| {
                let mtime = entry.metadata().ok()?.modified().ok()?;
                Some((entry.path(), mtime))
            })
            .collect();
        if files.is_empty() {
            anyhow::bail!("no transcript files in {} for agent '{}'", dir.display(), agent.name);
        }
        files.sort_by(|a, b| b.1.cmp(&a.1));

        debug!(agent = %agent.name, files = files.len(), "checking transcripts for fork");

        for (path, _) in &files {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if stem == agent.transcript_id {
                debug!(agent = %agent.name, id = %agent.transcript_id, "stored transcript still current");
                return Ok(agent.transcript_id.clone());
            }

            match verify_descendant(&agent.transcript_id, path) {
                Ok(true) => {
                    info!(
                        agent = %agent.name,
                        from = %agent.transcript_id,
                        to = stem,
                        "fork detected: descendant transcript found"
                    );
                    return Ok(stem.to_owned());
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(file = %path.display(), error = %e, "descendant check failed");
                }
            }
        }

        anyhow::bail!(
            "stored transcript {} not found for agent '{}' in {} (checked {} files)",
            agent.transcript_id,
            agent.name,
            dir.display(),
            files.len()
        )
    }

    /// Check every agent in a context, recording any forks in the registry.
    ///
    /// Returns agent name → new transcript id for agents that moved. Agents
    /// whose session directory is missing are skipped with a warning.
    pub async fn check_context_sessions(
        &self,
        context_name: &str,
    ) -> anyhow::Result<HashMap<String, String>> {
        let context = self
            .registry
            .get(context_name)
            .await
            .ok_or_else(|| anyhow::anyhow!("context '{context_name}' not found"))?;
        let working_dir = context
            .working_dir
            .clone()
            .ok_or_else(|| anyhow::anyhow!("context '{context_name}' has no working_dir"))?;

        let mut updates = HashMap::new();
        for agent in &context.agents {
            if agent.transcript_id.is_empty() {
                debug!(agent = %agent.name, "no transcript id stored, skipping");
                continue;
            }
            let active = match self.find_active_transcript(context_name, agent, &working_dir) {
                Ok(active) => active,
                Err(e) => {
                    warn!(agent = %agent.name, error = %e, "session check skipped");
                    continue;
                }
            };
            if active != agent.transcript_id {
                info!(
                    agent = %agent.name,
                    from = %agent.transcript_id,
                    to = %active,
                    "session fork detected"
                );
                if self
                    .registry
                    .update_agent_transcript(context_name, &agent.name, &active)
                    .await?
                {
                    updates.insert(agent.name.clone(), active);
                } else {
                    error!(agent = %agent.name, "failed to record fork in registry");
                }
            }
        }
        Ok(updates)
    }

    /// Watch a context's session directories and re-resolve on changes.
    ///
    /// Uses `notify` filesystem events when a watcher can be established,
    /// with a fixed polling interval as a backstop; falls back to pure
    /// polling otherwise. Runs until `shutdown` is cancelled.
    pub fn spawn_monitor(
        self: std::sync::Arc<Self>,
        context_name: String,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
            let watcher = self.setup_watchers(&context_name, wake_tx).await;
            match watcher {
                Some(_) => info!(context = %context_name, "fork monitor using filesystem events"),
                None => info!(
                    context = %context_name,
                    interval = ?POLL_INTERVAL,
                    "fork monitor polling"
                ),
            }

            let mut interval = tokio::time::interval(POLL_INTERVAL);
            // Skip the immediate first tick.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = wake_rx.recv() => {
                        // Let the file write complete before re-resolving.
                        tokio::time::sleep(EVENT_SETTLE).await;
                    }
                    _ = interval.tick() => {}
                }

                match self.check_context_sessions(&context_name).await {
                    Ok(updates) if !updates.is_empty() => {
                        info!(context = %context_name, ?updates, "session forks recorded");
                    }
                    Ok(_) => {}
                    Err(e) => error!(context = %context_name, error = %e, "fork check failed"),
                }
            }
            info!(context = %context_name, "fork monitor stopped");
        })
    }

    /// Watch each agent's session directory for `.jsonl` changes.
    /// Returns the watcher handle (must be kept alive) or `None` when no
    /// directory could be watched.
    async fn setup_watchers(
        &self,
        context_name: &str,
        wake_tx: mpsc::Sender<()>,
    ) -> Option<notify::RecommendedWatcher> {
        use notify::{RecursiveMode, Watcher};

        let context = self.registry.get(context_name).await?;
        let working_dir = context.working_dir.clone()?;

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let relevant = match &res {
                Ok(event) => event
                    .paths
                    .iter()
                    .any(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl")),
                Err(_) => false,
            };
            if relevant {
                let _ = wake_tx.try_send(());
            }
        })
        .ok()?;

        let mut watched = 0;
        for agent in &context.agents {
            let dir = self.agent_session_dir(context_name, &agent.name, &working_dir);
            if dir.is_dir() && watcher.watch(&dir, RecursiveMode::NonRecursive).is_ok() {
                debug!(dir = %dir.display(), "watching session directory");
                watched += 1;
            } else {
                warn!(agent = %agent.name, dir = %dir.display(), "no session directory to watch");
            }
        }

        if watched == 0 {
            return None;
        }
        Some(watcher)
    }
}

#[cfg(test)]
#[path = "fork_tests.rs"]
mod tests;
