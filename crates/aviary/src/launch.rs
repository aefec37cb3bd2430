// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent launching.
//!
//! The core does not fork the agent binary itself: it types a launcher
//! invocation into the agent's pane and waits for the child's UI to come
//! up. The launcher command shape is a capability passed to the supervisor
//! at construction time, so embedders can substitute their own.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::tmux::TmuxAdapter;

/// How long to wait for the child's UI after sending the launch command.
const READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Poll cadence while waiting for readiness.
const READY_POLL: Duration = Duration::from_millis(500);

/// Everything needed to build one agent's launch command.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub agent_name: String,
    pub transcript_id: String,
    pub system_prompt: String,
    pub resume: bool,
    pub mcp_config_path: Option<PathBuf>,
}

/// Builds the shell command that starts an agent. The supervisor receives
/// an implementation at construction time instead of patching launch
/// internals.
pub trait LaunchCommandBuilder: Send + Sync {
    /// The shell-ready launch command for a spec.
    fn build_command(&self, spec: &LaunchSpec) -> String;

    /// Whether the launcher's backing script is present.
    fn verify(&self) -> bool;
}

/// Default launcher: the containerized Claude launch script.
#[derive(Debug, Clone)]
pub struct ClaudeLaunchCommand {
    pub script_path: PathBuf,
    pub container_mode: String,
}

impl Default for ClaudeLaunchCommand {
    fn default() -> Self {
        Self {
            script_path: PathBuf::from("../scripts/docker-claude-code.sh"),
            container_mode: "isolated".to_owned(),
        }
    }
}

impl LaunchCommandBuilder for ClaudeLaunchCommand {
    fn build_command(&self, spec: &LaunchSpec) -> String {
        let mut parts = vec![
            "env".to_owned(),
            format!("CLAUDE_INSTANCE={}", spec.agent_name),
            format!("CLAUDE_CONTAINER_MODE={}", self.container_mode),
            self.script_path.display().to_string(),
            "run".to_owned(),
            "--session-id".to_owned(),
            spec.transcript_id.clone(),
        ];
        if spec.resume {
            parts.push("--resume".to_owned());
        }
        parts.push("--append-system-prompt".to_owned());
        parts.push(shell_quote(&spec.system_prompt));
        if let Some(ref path) = spec.mcp_config_path {
            parts.push("--mcp-config".to_owned());
            parts.push(path.display().to_string());
            parts.push("--debug".to_owned());
        }
        parts.join(" ")
    }

    fn verify(&self) -> bool {
        self.script_path.exists()
    }
}

/// The per-agent MCP proxy configuration pointing at the broker.
pub fn mcp_proxy_config(proxy_path: &Path, agent_name: &str, port: u16) -> Value {
    json!({
        "mcpServers": {
            "orchestrator": {
                "command": "python3",
                "args": [proxy_path.display().to_string()],
                "env": {
                    "AGENT_NAME": agent_name,
                    "ORCHESTRATOR_URL": format!("http://localhost:{port}"),
                }
            }
        }
    })
}

/// Launches agents into panes and waits for their UI.
pub struct AgentLauncher {
    tmux: Arc<TmuxAdapter>,
    builder: Arc<dyn LaunchCommandBuilder>,
    /// Directory for synthesized MCP config files (the run's scratch dir).
    mcp_config_dir: Option<PathBuf>,
}

impl AgentLauncher {
    pub fn new(tmux: Arc<TmuxAdapter>, builder: Arc<dyn LaunchCommandBuilder>) -> Self {
        Self { tmux, builder, mcp_config_dir: None }
    }

    pub fn with_mcp_config_dir(mut self, dir: PathBuf) -> Self {
        self.mcp_config_dir = Some(dir);
        self
    }

    /// Launch an agent into its pane.
    ///
    /// When `transcript_id` is given the child resumes that session;
    /// otherwise a fresh id is generated. Returns the transcript id the
    /// child was started with.
    pub async fn launch_agent(
        &self,
        pane: usize,
        agent_name: &str,
        system_prompt: &str,
        working_dir: Option<&str>,
        mcp_config: Option<&Value>,
        transcript_id: Option<&str>,
    ) -> anyhow::Result<String> {
        let resume = transcript_id.is_some();
        let transcript_id = match transcript_id {
            Some(id) => {
                info!(agent = agent_name, id, "resuming agent session");
                id.to_owned()
            }
            None => {
                let id = Uuid::new_v4().to_string();
                info!(agent = agent_name, id = %id, "launching agent with new session");
                id
            }
        };

        if !self.builder.verify() {
            anyhow::bail!("launcher script not found for agent '{agent_name}'");
        }

        let mcp_config_path = match mcp_config {
            Some(config) => Some(self.write_mcp_config(agent_name, config)?),
            None => None,
        };

        if let Some(dir) = working_dir {
            self.tmux.send_to_pane(pane, &format!("cd {}", shell_quote(dir))).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let spec = LaunchSpec {
            agent_name: agent_name.to_owned(),
            transcript_id: transcript_id.clone(),
            system_prompt: system_prompt.to_owned(),
            resume,
            mcp_config_path,
        };
        let command = self.builder.build_command(&spec);
        info!(agent = agent_name, pane, "sending launch command");
        if !self.tmux.send_to_pane(pane, &command).await {
            anyhow::bail!("failed to inject launch command for agent '{agent_name}'");
        }

        if self.wait_for_ready(pane, agent_name).await {
            Ok(transcript_id)
        } else {
            anyhow::bail!("agent '{agent_name}' did not become ready in pane {pane}")
        }
    }

    /// Write a per-agent MCP config file into the scratch directory.
    fn write_mcp_config(&self, agent_name: &str, config: &Value) -> anyhow::Result<PathBuf> {
        let dir = self
            .mcp_config_dir
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("mcp config directory not set"))?;
        std::fs::create_dir_all(dir)?;
        let suffix = Uuid::new_v4().simple().to_string();
        let path = dir.join(format!("mcp_{agent_name}_{}.json", &suffix[..8]));
        std::fs::write(&path, serde_json::to_string_pretty(config)?)?;
        Ok(path)
    }

    /// Poll the pane until the child's UI is up, auto-answering the theme
    /// and workspace-trust dialogs.
    async fn wait_for_ready(&self, pane: usize, agent_name: &str) -> bool {
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;

        while tokio::time::Instant::now() < deadline {
            let Some(content) = self.tmux.capture_pane(pane, -50).await else {
                tokio::time::sleep(READY_POLL).await;
                continue;
            };

            if content.contains("Dark mode")
                && content.contains("Light mode")
                && (content.contains("Preview") || content.contains("To change this later"))
            {
                info!(agent = agent_name, "answering theme dialog");
                self.tmux.send_to_pane(pane, "1").await;
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            if content.contains("Do you trust the files in this folder?") {
                info!(agent = agent_name, "answering trust dialog");
                self.tmux.send_to_pane(pane, "1").await;
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            if content.contains("Browser didn't open?")
                || content.contains("Paste code here if prompted")
                || content.contains("oauth/authorize")
            {
                warn!(agent = agent_name, "child is asking for interactive authentication");
            }

            if content.contains("Invalid MCP configuration") {
                error!(agent = agent_name, "mcp configuration rejected by child");
                return false;
            }

            let ready = ["Welcome to Claude Code", "Tips for getting started:", "│ >", "Try \""]
                .iter()
                .any(|marker| content.contains(marker));
            if ready || content.contains("| >") {
                info!(agent = agent_name, "agent ready");
                return true;
            }

            tokio::time::sleep(READY_POLL).await;
        }

        error!(agent = agent_name, "timed out waiting for agent to start");
        false
    }
}

/// Quote a string for the shell: single quotes with embedded quotes escaped.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:".contains(c)) {
        return s.to_owned();
    }
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

#[cfg(test)]
#[path = "launch_tests.rs"]
mod tests;
