// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::layout::LayoutKind;
use crate::supervisor::SupervisorConfig;

/// Fleet supervisor for terminal-hosted AI agents.
#[derive(Debug, Parser)]
#[command(name = "aviary", version, about)]
pub struct Config {
    /// Tmux session name for the fleet.
    #[arg(long, env = "AVIARY_SESSION", default_value = "aviary-agents")]
    pub session: String,

    /// Broker port for agent MCP tools. Omit to run without the broker.
    #[arg(long, env = "AVIARY_MCP_PORT")]
    pub mcp_port: Option<u16>,

    /// Agents to launch, as NAME=SYSTEM_PROMPT. Repeatable.
    #[arg(long = "agent", value_name = "NAME=PROMPT")]
    pub agents: Vec<String>,

    /// Working directory for the agents.
    #[arg(long, env = "AVIARY_WORKDIR")]
    pub working_dir: Option<String>,

    /// Pane layout: horizontal, vertical, grid, main-horizontal, main-vertical.
    #[arg(long, env = "AVIARY_LAYOUT", default_value = "horizontal")]
    pub layout: String,

    /// Transcript poll interval in milliseconds.
    #[arg(long, env = "AVIARY_POLL_MS", default_value = "500")]
    pub poll_ms: u64,

    /// State poll interval in milliseconds.
    #[arg(long, env = "AVIARY_MONITOR_MS", default_value = "500")]
    pub monitor_ms: u64,

    /// Disable the state poll loop (pane annotations, idle reminders).
    #[arg(long, env = "AVIARY_NO_STATE_MONITOR")]
    pub no_state_monitor: bool,

    /// Launcher script that starts one agent process.
    #[arg(long, env = "AVIARY_LAUNCHER")]
    pub launcher_script: Option<PathBuf>,

    /// MCP stdio proxy script staged into the run's scratch directory.
    #[arg(long, env = "AVIARY_MCP_PROXY")]
    pub mcp_proxy: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "AVIARY_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "AVIARY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agents.is_empty() {
            anyhow::bail!("at least one --agent NAME=PROMPT is required");
        }
        let specs = self.agent_specs()?;
        for (i, (name, _)) in specs.iter().enumerate() {
            if specs[..i].iter().any(|(other, _)| other == name) {
                anyhow::bail!("duplicate agent name: {name}");
            }
        }
        self.layout_kind()?;
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    /// Parse `--agent NAME=PROMPT` pairs.
    pub fn agent_specs(&self) -> anyhow::Result<Vec<(String, String)>> {
        self.agents
            .iter()
            .map(|spec| {
                spec.split_once('=')
                    .map(|(name, prompt)| (name.trim().to_owned(), prompt.to_owned()))
                    .filter(|(name, _)| !name.is_empty())
                    .ok_or_else(|| anyhow::anyhow!("invalid agent spec (want NAME=PROMPT): {spec}"))
            })
            .collect()
    }

    /// Parse the layout name into a [`LayoutKind`].
    pub fn layout_kind(&self) -> anyhow::Result<LayoutKind> {
        match self.layout.as_str() {
            "horizontal" => Ok(LayoutKind::Horizontal),
            "vertical" => Ok(LayoutKind::Vertical),
            "grid" => Ok(LayoutKind::Grid { rows: None, cols: None }),
            "main-horizontal" => Ok(LayoutKind::MainHorizontal { main_pct: 70 }),
            "main-vertical" => Ok(LayoutKind::MainVertical { main_pct: 70 }),
            other => anyhow::bail!("unknown layout: {other}"),
        }
    }

    /// Translate into the supervisor's config value.
    pub fn supervisor_config(&self) -> anyhow::Result<SupervisorConfig> {
        Ok(SupervisorConfig {
            session_name: self.session.clone(),
            poll_interval: Duration::from_millis(self.poll_ms),
            monitor_interval: Duration::from_millis(self.monitor_ms),
            layout: self.layout_kind()?,
            state_monitoring: !self.no_state_monitor,
            mcp_proxy_source: self.mcp_proxy.clone(),
            ..SupervisorConfig::default()
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
