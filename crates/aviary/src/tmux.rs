// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tmux adapter: a narrow, deterministic interface to the tmux CLI.
//!
//! All terminal I/O for the fleet goes through this adapter: session and
//! pane creation, keystroke injection, screen capture, and per-pane
//! annotations. Mid-run command failures are logged and surfaced as `false`
//! so poll loops can retry on the next tick; only session creation is
//! propagated as a hard error.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::layout::{LayoutConfig, LayoutPlan};

/// Delay between injecting literal text and the Enter key.
///
/// Hard requirement: without it the child's input tokenizer can race the
/// keystroke stream and swallow the newline.
const SEND_ENTER_DELAY: Duration = Duration::from_millis(50);

/// Window size floor applied when creating sessions with many panes.
const LARGE_SESSION_COLS: u16 = 120;
const LARGE_SESSION_ROWS: u16 = 40;

/// Pane-border format showing the agent name, state dot, and message count.
const PANE_BORDER_FORMAT: &str = "#{?@agent_name,#{?pane_active,#[reverse],}#{@pane_color_code}[#{@agent_name}#{?@state_dot,#{@state_dot},}]#[default]#{?@msg_count, (#{@msg_count} msgs),} ,}#{pane_title}";

/// One pane of the managed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxPane {
    pub index: usize,
    pub width: u16,
    pub height: u16,
    pub active: bool,
}

/// Adapter for one named tmux session.
pub struct TmuxAdapter {
    session: String,
    /// When set, every tmux invocation uses `-S <path>` to address an
    /// isolated server instead of the user's default.
    socket: Option<PathBuf>,
}

impl TmuxAdapter {
    pub fn new(session: impl Into<String>) -> Self {
        Self { session: session.into(), socket: None }
    }

    /// Target an isolated tmux server socket (used by tests).
    pub fn with_socket(session: impl Into<String>, socket: PathBuf) -> Self {
        Self { session: session.into(), socket: Some(socket) }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Build a `tokio::process::Command` for tmux, prepending `-S <socket>` if set.
    fn tmux_cmd(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("tmux");
        if let Some(ref s) = self.socket {
            cmd.arg("-S").arg(s);
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Pane target string, e.g. `team:0.2`.
    fn pane_target(&self, pane: usize) -> String {
        format!("{}:0.{pane}", self.session)
    }

    /// Run a tmux command, returning `true` on zero exit status.
    async fn run(&self, args: &[&str]) -> bool {
        debug!(?args, "tmux");
        match self.tmux_cmd().args(args).output().await {
            Ok(out) if out.status.success() => true,
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                warn!(?args, stderr = %stderr.trim(), "tmux command failed");
                false
            }
            Err(e) => {
                error!(?args, error = %e, "failed to invoke tmux");
                false
            }
        }
    }

    /// Run a tmux command and capture stdout, or `None` on failure.
    async fn run_capture(&self, args: &[&str]) -> Option<String> {
        match self.tmux_cmd().args(args).output().await {
            Ok(out) if out.status.success() => {
                Some(String::from_utf8_lossy(&out.stdout).into_owned())
            }
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                warn!(?args, stderr = %stderr.trim(), "tmux command failed");
                None
            }
            Err(e) => {
                error!(?args, error = %e, "failed to invoke tmux");
                None
            }
        }
    }

    /// Check whether the managed session exists. No side effects.
    pub async fn session_exists(&self) -> bool {
        match self
            .tmux_cmd()
            .args(["has-session", "-t", &self.session])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    /// Create the session with `num_panes` panes arranged per `layout`.
    ///
    /// Fails without mutation when the session already exists and `force` is
    /// false; with `force`, the existing session is destroyed first. Applies
    /// the layout after all splits, then configures pane borders, mouse mode,
    /// and pane-switching accelerators.
    pub async fn create_session(
        &self,
        num_panes: usize,
        force: bool,
        layout: &LayoutConfig,
    ) -> anyhow::Result<()> {
        if self.session_exists().await {
            if !force {
                anyhow::bail!(
                    "tmux session '{}' already exists (attach, kill it, or pass force)",
                    self.session
                );
            }
            warn!(session = %self.session, "force mode: killing existing session");
            self.kill_session().await;
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        // Sessions with many panes need a window size floor or the later
        // splits fail with "no space for new pane".
        let created = if num_panes >= 5 {
            self.run(&[
                "new-session",
                "-d",
                "-s",
                &self.session,
                "-x",
                &LARGE_SESSION_COLS.to_string(),
                "-y",
                &LARGE_SESSION_ROWS.to_string(),
                "bash",
            ])
            .await
        } else {
            self.run(&["new-session", "-d", "-s", &self.session, "bash"]).await
        };
        if !created {
            anyhow::bail!("failed to create tmux session '{}'", self.session);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        if !self.session_exists().await {
            anyhow::bail!("tmux session '{}' vanished after creation", self.session);
        }

        self.configure_session(num_panes).await;

        let plan = layout.plan()?;
        if num_panes > 1 {
            self.apply_layout(&plan).await?;
        }

        info!(session = %self.session, panes = num_panes, "created tmux session");
        Ok(())
    }

    /// Window options: pane borders, blue border style, mouse mode, status
    /// bar, and pane-switching accelerators.
    async fn configure_session(&self, num_panes: usize) {
        let window = format!("{}:0", self.session);

        self.run(&["set-option", "-t", &self.session, "pane-border-status", "top"]).await;
        self.run(&["set-option", "-w", "-t", &window, "pane-border-format", PANE_BORDER_FORMAT])
            .await;
        self.refresh_border_style().await;
        self.run(&["set-option", "-g", "mouse", "on"]).await;

        // Alt+digit and prefix+digit accelerators for up to nine panes.
        for pane in 0..num_panes.min(9) {
            let select = format!("select-pane -t {}:0.{pane}", self.session);
            let alt = format!("M-{}", pane + 1);
            self.run(&["bind-key", "-n", &alt, &select]).await;
            let digit = (pane + 1).to_string();
            self.run(&["bind-key", &digit, &select]).await;
        }
        // F1..F3 for the first three panes.
        for pane in 0..num_panes.min(3) {
            let key = format!("F{}", pane + 1);
            let select = format!("select-pane -t {}:0.{pane}", self.session);
            self.run(&["bind-key", "-n", &key, &select]).await;
        }

        self.run(&["set-option", "-t", &self.session, "status", "on"]).await;
        self.run(&["set-option", "-t", &self.session, "status-interval", "2"]).await;
        self.run(&["set-option", "-t", &self.session, "status-left", "[Aviary] "]).await;
        self.run(&["set-option", "-t", &self.session, "status-left-length", "20"]).await;
        self.run(&["set-option", "-t", &self.session, "status-right", "Agents: Initializing..."])
            .await;
        self.run(&["set-option", "-t", &self.session, "status-right-length", "80"]).await;
    }

    /// Execute a layout plan's split operations in order.
    async fn apply_layout(&self, plan: &LayoutPlan) -> anyhow::Result<()> {
        for op in &plan.ops {
            let args = op.to_args(&self.session);
            let refs: Vec<&str> = args.iter().map(String::as_str).collect();
            if !self.run(&refs).await {
                anyhow::bail!("layout command failed: tmux {}", args.join(" "));
            }
        }
        Ok(())
    }

    /// Inject `text` literally into a pane, wait, then inject Enter.
    ///
    /// The delay is part of the contract (see [`SEND_ENTER_DELAY`]).
    pub async fn send_to_pane(&self, pane: usize, text: &str) -> bool {
        let target = self.pane_target(pane);
        if !self.run(&["send-keys", "-t", &target, "-l", text]).await {
            return false;
        }
        tokio::time::sleep(SEND_ENTER_DELAY).await;
        self.run(&["send-keys", "-t", &target, "Enter"]).await
    }

    /// Inject text without Enter.
    pub async fn type_in_pane(&self, pane: usize, text: &str) -> bool {
        let target = self.pane_target(pane);
        self.run(&["send-keys", "-t", &target, "-l", text]).await
    }

    /// Send a command line and Enter without the literal-mode delay.
    pub async fn send_command(&self, pane: usize, command: &str) -> bool {
        let target = self.pane_target(pane);
        if !self.run(&["send-keys", "-t", &target, command]).await {
            return false;
        }
        self.run(&["send-keys", "-t", &target, "Enter"]).await
    }

    /// Capture the visible pane content, plus `history_limit` scrollback
    /// lines when non-zero (negative values follow tmux `-S` semantics).
    pub async fn capture_pane(&self, pane: usize, history_limit: i32) -> Option<String> {
        let target = self.pane_target(pane);
        let limit;
        let mut args = vec!["capture-pane", "-t", &target, "-p"];
        if history_limit != 0 {
            limit = history_limit.to_string();
            args.push("-S");
            args.push(&limit);
        }
        self.run_capture(&args).await
    }

    /// Set the user-visible pane title.
    pub async fn set_pane_title(&self, pane: usize, title: &str) -> bool {
        let target = self.pane_target(pane);
        self.run(&["select-pane", "-t", &target, "-T", title]).await
    }

    /// Set a per-pane `@key` annotation.
    pub async fn set_pane_option(&self, pane: usize, key: &str, value: &str) -> bool {
        let target = self.pane_target(pane);
        let option = format!("@{key}");
        self.run(&["set-option", "-p", "-t", &target, &option, value]).await
    }

    /// Record the agent name owning a pane (shown in the border format).
    pub async fn set_pane_agent_name(&self, pane: usize, agent_name: &str) -> bool {
        self.set_pane_option(pane, "agent_name", agent_name).await
    }

    /// Update the per-pane state indicator: header color code, state dot,
    /// and a refreshed title carrying the state label.
    pub async fn set_pane_state_indicator(&self, pane: usize, state: &str) -> bool {
        let color = match state {
            "idle" => "green",
            "busy" => "yellow",
            "writing" => "cyan",
            "error" => "red",
            "quit" => "colour237",
            "initializing" => "blue",
            "unknown" => "colour245",
            _ => "default",
        };
        let color_code =
            if color == "default" { "#[default]".to_owned() } else { format!("#[fg={color}]") };
        let dot = match state {
            "idle" => " ✓",
            "busy" => " ●",
            "writing" => " ✎",
            "error" => " ⚠",
            "quit" => " ✕",
            "initializing" => " ◌",
            _ => " ?",
        };

        let mut ok = self.set_pane_option(pane, "pane_color_code", &color_code).await;
        ok &= self.set_pane_option(pane, "state_dot", dot).await;

        // Refresh the stored title with the state label when the agent name
        // annotation is available.
        let target = self.pane_target(pane);
        if let Some(out) = self.run_capture(&["show-options", "-p", "-t", &target, "@agent_name"]).await
        {
            if let Some((_, name)) = out.trim().split_once(' ').or_else(|| out.trim().split_once('=')) {
                let name = name.trim_matches('"');
                let title = format!("{name} [{}]", state.to_uppercase());
                ok &= self.set_pane_option(pane, "pane_title", &title).await;
            }
        }
        ok
    }

    /// Update the unread message count annotation for a pane.
    pub async fn set_pane_message_count(&self, pane: usize, count: usize) -> bool {
        self.set_pane_option(pane, "msg_count", &count.to_string()).await
    }

    /// Flag a pane as busy (`1`) or not (`0`).
    pub async fn set_pane_activity(&self, pane: usize, busy: bool) -> bool {
        self.set_pane_option(pane, "is_busy", if busy { "1" } else { "0" }).await
    }

    /// Keep the window-level border style uniform blue. Tmux has no per-pane
    /// border color, so per-state display lives in the border format instead.
    pub async fn refresh_border_style(&self) -> bool {
        let window = format!("{}:0", self.session);
        let mut ok =
            self.run(&["set-option", "-w", "-t", &window, "pane-border-style", "fg=blue"]).await;
        ok &= self
            .run(&["set-option", "-w", "-t", &window, "pane-active-border-style", "fg=blue,bold"])
            .await;
        ok
    }

    /// Update the status bar with per-agent colored state letters.
    pub async fn update_status_bar(&self, agent_states: &[(String, String)]) -> bool {
        let status = render_status_bar(agent_states);
        let mut ok =
            self.run(&["set-option", "-t", &self.session, "status-right", &status]).await;
        ok &= self.run(&["set-option", "-t", &self.session, "status-right-length", "30"]).await;
        ok
    }

    /// Current window dimensions as (cols, rows).
    pub async fn window_size(&self) -> Option<(usize, usize)> {
        let out = self
            .run_capture(&[
                "display-message",
                "-p",
                "-t",
                &self.session,
                "#{window_width}x#{window_height}",
            ])
            .await?;
        parse_window_size(&out)
    }

    /// Enumerate the session's panes.
    pub async fn list_panes(&self) -> Vec<TmuxPane> {
        let out = match self
            .run_capture(&[
                "list-panes",
                "-t",
                &self.session,
                "-F",
                "#{pane_index}:#{pane_width}:#{pane_height}:#{pane_active}",
            ])
            .await
        {
            Some(out) => out,
            None => return vec![],
        };
        parse_pane_listing(&out)
    }

    /// Force-kill the session. Best-effort.
    pub async fn kill_session(&self) -> bool {
        let ok = self.run(&["kill-session", "-t", &self.session]).await;
        if ok {
            info!(session = %self.session, "killed tmux session");
        }
        ok
    }
}

/// Render the status-right string with one colored letter per agent.
fn render_status_bar(agent_states: &[(String, String)]) -> String {
    if agent_states.is_empty() {
        return "No agents".to_owned();
    }
    let mut parts = Vec::with_capacity(agent_states.len());
    for (name, state) in agent_states {
        let color = match state.as_str() {
            "idle" => "#[fg=white]",
            "busy" => "#[fg=yellow]",
            "writing" => "#[fg=cyan]",
            "error" => "#[fg=red,bold]",
            "quit" => "#[fg=colour237]",
            "initializing" => "#[fg=blue]",
            "unknown" => "#[fg=colour245]",
            _ => "#[fg=default]",
        };
        let letter = name.chars().next().map(|c| c.to_uppercase().to_string()).unwrap_or_default();
        parts.push(format!("{color}{letter}#[default]"));
    }
    format!("Agents: {}", parts.join(" "))
}

/// Parse `display-message` output in `WIDTHxHEIGHT` format.
fn parse_window_size(out: &str) -> Option<(usize, usize)> {
    let (w, h) = out.trim().split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

/// Parse `list-panes` output in `index:width:height:active` format.
fn parse_pane_listing(out: &str) -> Vec<TmuxPane> {
    out.lines()
        .filter_map(|line| {
            let mut parts = line.trim().split(':');
            let index = parts.next()?.parse().ok()?;
            let width = parts.next()?.parse().ok()?;
            let height = parts.next()?.parse().ok()?;
            let active = parts.next()? == "1";
            Some(TmuxPane { index, width, height, active })
        })
        .collect()
}

#[cfg(test)]
#[path = "tmux_tests.rs"]
mod tests;
