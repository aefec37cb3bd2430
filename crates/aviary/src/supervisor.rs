// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor: owns the agent registry and coordinates launch, the
//! poll loops, and ordered shutdown.
//!
//! Lock order when multiple locks are needed: agents → mailbox → interrupt.
//! The delivery engine's lock is a leaf and is never held together with
//! any of these. No lock is held across a sleep.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentInfo, AgentRegistry};
use crate::broker::{self, BrokerState};
use crate::command::{AgentCommand, CommandExtractor};
use crate::delivery::{DeliveryEngine, PaneWriter};
use crate::launch::{mcp_proxy_config, AgentLauncher, LaunchCommandBuilder};
use crate::layout::{LayoutConfig, LayoutKind};
use crate::mailbox::{Mailbox, Message, Priority};
use crate::state::{AgentState, StateMonitor};
use crate::tmux::TmuxAdapter;
use crate::transcript::TranscriptMonitor;

/// How long stop() waits for each worker before abandoning it.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Supervisor configuration. Plain values; capabilities (launch command,
/// pane I/O) are passed to [`Supervisor::new`] separately.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub session_name: String,
    /// Transcript poll cadence.
    pub poll_interval: Duration,
    /// State poll cadence (enhanced monitoring).
    pub monitor_interval: Duration,
    /// Minimum gap between interrupt lines to the same recipient.
    pub interrupt_cooldown: Duration,
    /// Estimated-line threshold for context_status warnings.
    pub context_threshold: u64,
    /// Directory where agent transcripts appear.
    pub transcript_dir: PathBuf,
    /// Pane layout shape; the agent count is filled in at start.
    pub layout: LayoutKind,
    /// Settle time after launch before binding transcript monitors.
    pub stabilization: Duration,
    /// Run the state-poll loop (pane annotations, reminders).
    pub state_monitoring: bool,
    /// Thin proxy script to copy into the run's scratch directory.
    pub mcp_proxy_source: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            session_name: "aviary-agents".to_owned(),
            poll_interval: Duration::from_millis(500),
            monitor_interval: Duration::from_millis(500),
            interrupt_cooldown: Duration::from_secs(2),
            context_threshold: 10_000,
            transcript_dir: default_transcript_dir(),
            layout: LayoutKind::Horizontal,
            stabilization: Duration::from_secs(5),
            state_monitoring: true,
            mcp_proxy_source: None,
        }
    }
}

/// Claude writes transcripts under `~/.claude/projects/<escaped cwd>/`.
pub fn default_transcript_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_default();
    let cwd = std::env::current_dir().unwrap_or_default();
    let escaped = cwd.display().to_string().replace('/', "-");
    PathBuf::from(home).join(".claude").join("projects").join(escaped)
}

/// Scratch directories for one run.
#[derive(Debug, Clone)]
struct ScratchDir {
    root: PathBuf,
    bin: PathBuf,
    mcp_configs: PathBuf,
}

/// Central coordinator for a fleet of agents in one tmux session.
pub struct Supervisor {
    config: SupervisorConfig,
    tmux: Arc<TmuxAdapter>,
    /// Keystroke sink for command responses; the tmux adapter in
    /// production, a recorder in tests.
    panes: Arc<dyn PaneWriter>,
    registry: Arc<AgentRegistry>,
    mailbox: Arc<Mailbox>,
    state: Arc<StateMonitor>,
    delivery: Arc<DeliveryEngine>,
    launcher_builder: Arc<dyn LaunchCommandBuilder>,
    extractor: CommandExtractor,
    /// Recipient → last interrupt instant.
    interrupts: Mutex<HashMap<String, Instant>>,
    shutdown: Mutex<CancellationToken>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    scratch: Mutex<Option<ScratchDir>>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        tmux: Arc<TmuxAdapter>,
        launcher_builder: Arc<dyn LaunchCommandBuilder>,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(AgentRegistry::new());
        let mailbox = Arc::new(Mailbox::new());
        let state = Arc::new(StateMonitor::new(tmux.clone())?);
        let delivery = Arc::new(DeliveryEngine::new(
            registry.clone(),
            mailbox.clone(),
            state.clone(),
            tmux.clone(),
        ));
        Ok(Self {
            config,
            panes: tmux.clone(),
            tmux,
            registry,
            mailbox,
            state,
            delivery,
            launcher_builder,
            extractor: CommandExtractor::new()?,
            interrupts: Mutex::new(HashMap::new()),
            shutdown: Mutex::new(CancellationToken::new()),
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            scratch: Mutex::new(None),
        })
    }

    /// Replace the keystroke sink. Test seam.
    pub fn with_pane_writer(mut self, panes: Arc<dyn PaneWriter>) -> Self {
        self.panes = panes;
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    pub fn state_monitor(&self) -> &Arc<StateMonitor> {
        &self.state
    }

    pub fn delivery(&self) -> &Arc<DeliveryEngine> {
        &self.delivery
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Register an agent before start. The transcript id is a placeholder
    /// until launch reports the real one.
    pub async fn register_agent(
        &self,
        name: &str,
        transcript_id: &str,
        system_prompt: &str,
        working_dir: Option<&str>,
    ) -> anyhow::Result<()> {
        if self.is_running() {
            anyhow::bail!("cannot register agents while the supervisor is running");
        }
        self.registry.register(name, transcript_id, system_prompt, working_dir).await?;
        Ok(())
    }

    /// Start the fleet: create the session, launch every agent, bind
    /// transcript monitors, and spawn the poll loops.
    ///
    /// With `mcp_port` set, each agent gets an MCP proxy configuration
    /// pointing at the broker, and the broker itself is served.
    pub async fn start(self: Arc<Self>, mcp_port: Option<u16>) -> anyhow::Result<()> {
        if self.is_running() {
            anyhow::bail!("supervisor already running");
        }
        if self.registry.is_empty().await {
            anyhow::bail!("no agents registered");
        }

        let shutdown = CancellationToken::new();
        *self.shutdown.lock().await = shutdown.clone();

        match Arc::clone(&self).start_inner(mcp_port, &shutdown).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Leave the host clean: no orphan session, no orphan port.
                error!(error = %e, "start failed, undoing partial state");
                self.stop().await;
                Err(e)
            }
        }
    }

    async fn start_inner(
        self: Arc<Self>,
        mcp_port: Option<u16>,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<()> {
        let scratch = create_scratch_dir()?;
        info!(dir = %scratch.root.display(), "created run scratch directory");
        *self.scratch.lock().await = Some(scratch.clone());

        let agents = self.registry.snapshot().await;
        let num_panes = agents.len();
        let layout = LayoutConfig::new(self.config.layout.clone(), num_panes);
        self.tmux.create_session(num_panes, false, &layout).await?;

        // UI annotations before anything slow happens.
        let mut initial_states = Vec::with_capacity(num_panes);
        for agent in &agents {
            self.tmux.set_pane_title(agent.pane_index, &format!("Agent: {}", agent.name)).await;
            self.tmux.set_pane_agent_name(agent.pane_index, &agent.name).await;
            self.tmux.set_pane_message_count(agent.pane_index, 0).await;
            self.tmux.set_pane_activity(agent.pane_index, false).await;
            initial_states.push((agent.name.clone(), "initializing".to_owned()));
        }
        self.tmux.refresh_border_style().await;
        self.tmux.update_status_bar(&initial_states).await;

        self.running.store(true, Ordering::Release);

        // The state poller starts before launch so startup dialogs and
        // early states are observed.
        if self.config.state_monitoring {
            let this = Arc::clone(&self);
            let sd = shutdown.clone();
            self.workers.lock().await.push(tokio::spawn(async move {
                this.state_poll_loop(sd).await;
            }));
        }

        // Stage the proxy script for cross-container access.
        let proxy_path = scratch.bin.join("mcp_proxy.py");
        if let Some(ref source) = self.config.mcp_proxy_source {
            if let Err(e) = std::fs::copy(source, &proxy_path) {
                warn!(error = %e, "could not stage mcp proxy script");
            }
        }

        let launcher = AgentLauncher::new(self.tmux.clone(), self.launcher_builder.clone())
            .with_mcp_config_dir(scratch.mcp_configs.clone());

        for agent in &agents {
            let mcp_config = mcp_port.map(|port| mcp_proxy_config(&proxy_path, &agent.name, port));
            let transcript_id = launcher
                .launch_agent(
                    agent.pane_index,
                    &agent.name,
                    &agent.system_prompt,
                    agent.working_dir.as_deref(),
                    mcp_config.as_ref(),
                    None,
                )
                .await?;

            let transcript_path = self.config.transcript_dir.join(format!("{transcript_id}.jsonl"));
            self.registry.set_transcript(&agent.name, &transcript_id, transcript_path).await;
            info!(agent = %agent.name, id = %transcript_id, "agent launched");
        }

        // One-line initialization message per agent; this also nudges the
        // child into creating its transcript file.
        for agent in &agents {
            let text = if mcp_port.is_some() {
                format!(
                    "System initialized. You are {} agent with MCP tools available. Use 'list_agents' to see other agents.",
                    agent.name
                )
            } else {
                format!("System initialized. You are {} agent. Ready to receive commands.", agent.name)
            };
            if !self.tmux.send_to_pane(agent.pane_index, &text).await {
                warn!(agent = %agent.name, "failed to send initialization message");
            }
        }

        if mcp_port.is_some() {
            for agent in &agents {
                let welcome = Message::new(
                    "System",
                    &agent.name,
                    format!(
                        "Welcome {}! You have MCP tools available. Try 'list_agents' to see who else is online.",
                        agent.name
                    ),
                    Priority::Normal,
                    None,
                );
                self.mailbox.append(&agent.name, welcome).await;
            }
        }

        info!("waiting for transcript files");
        tokio::time::sleep(self.config.stabilization).await;

        let bound = self.bind_monitors().await;
        if bound == 0 {
            error!("no agents have working transcript monitors");
        } else {
            info!(bound, total = num_panes, "transcript monitors bound");
        }

        let this = Arc::clone(&self);
        let sd = shutdown.clone();
        self.workers.lock().await.push(tokio::spawn(async move {
            this.transcript_poll_loop(sd).await;
        }));

        if let Some(port) = mcp_port {
            let state = Arc::new(BrokerState {
                registry: self.registry.clone(),
                mailbox: self.mailbox.clone(),
                delivery: self.delivery.clone(),
            });
            let handle = broker::serve(state, port, shutdown.clone()).await?;
            self.workers.lock().await.push(handle);
        }

        info!("supervisor started");
        Ok(())
    }

    /// Bind a transcript monitor to each agent whose file exists, retrying
    /// briefly for files that are slow to appear.
    async fn bind_monitors(&self) -> usize {
        let mut bound = 0;
        for agent in self.registry.snapshot().await {
            let Some(path) = agent.transcript_path.clone() else {
                warn!(agent = %agent.name, "no transcript path recorded");
                continue;
            };
            let mut attached = false;
            for attempt in 0..3 {
                if path.exists() {
                    self.registry
                        .bind_monitor(&agent.name, TranscriptMonitor::new(&path, &agent.name))
                        .await;
                    debug!(agent = %agent.name, "transcript monitor bound");
                    attached = true;
                    break;
                }
                warn!(agent = %agent.name, attempt = attempt + 1, "transcript file not found yet");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            if attached {
                bound += 1;
            }
        }
        bound
    }

    /// Stop everything: signal the loops, join workers with a bounded
    /// timeout, kill the session, and clear per-run state. Best-effort:
    /// teardown continues past individual failures.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.shutdown.lock().await.cancel();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for mut worker in workers {
            if tokio::time::timeout(WORKER_JOIN_TIMEOUT, &mut worker).await.is_err() {
                warn!("worker did not stop in time, aborting");
                worker.abort();
            }
        }

        self.tmux.kill_session().await;

        self.registry.clear().await;
        self.mailbox.clear().await;
        self.interrupts.lock().await.clear();
        *self.scratch.lock().await = None;

        info!("supervisor stopped");
    }

    /// Transcript poll loop: read new records from every monitor, extract
    /// embedded commands, and dispatch them.
    async fn transcript_poll_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        info!("transcript poll loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let agents = self.registry.snapshot().await;
            let mut queue: Vec<AgentCommand> = Vec::new();

            for agent in &agents {
                let Some(monitor) = agent.monitor.clone() else { continue };
                let messages = {
                    let mut monitor = monitor.lock().await;
                    match monitor.get_new_messages() {
                        Ok(messages) => messages,
                        Err(e) => {
                            error!(agent = %agent.name, error = %e, "transcript read failed");
                            continue;
                        }
                    }
                };
                if messages.is_empty() {
                    continue;
                }
                debug!(agent = %agent.name, count = messages.len(), "new transcript messages");

                let commands = self.extractor.extract_commands(&messages, &agent.name);
                if !commands.is_empty() {
                    info!(agent = %agent.name, count = commands.len(), "commands extracted");
                    self.registry.touch_last_active(&agent.name).await;
                }
                queue.extend(commands);
            }

            for command in queue.drain(..) {
                self.process_command(command).await;
            }
        }

        info!("transcript poll loop stopped");
    }

    /// Dispatch one extracted command to its handler. Handler failures are
    /// logged and never abort the loop.
    pub async fn process_command(&self, command: AgentCommand) {
        info!(kind = %command.kind, agent = %command.agent_name, "processing command");
        let outcome = match command.kind.as_str() {
            "send_message" => self.handle_send_message(&command).await,
            "list_agents" => self.handle_list_agents(&command).await,
            "mailbox_check" => self.handle_mailbox_check(&command).await,
            "context_status" => self.handle_context_status(&command).await,
            other => {
                warn!(kind = other, "unknown command type");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            error!(kind = %command.kind, error = %e, "command handling failed");
        }
    }

    /// `send_message`: normalize, then interrupt or mailbox + notification.
    async fn handle_send_message(&self, command: &AgentCommand) -> anyhow::Result<()> {
        let to = command
            .to
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("send_message command missing required 'to' field"))?;

        let target_name = self
            .registry
            .resolve_name(to)
            .await
            .ok_or_else(|| anyhow::anyhow!("unknown target agent: {to}"))?;
        let target = self
            .registry
            .get(&target_name)
            .await
            .ok_or_else(|| anyhow::anyhow!("unknown target agent: {to}"))?;

        let title = command.title.clone().unwrap_or_else(|| "Message".to_owned());
        let message = Message {
            sender: command.from.clone(),
            to: target_name.clone(),
            body: command.content.clone(),
            priority: command.priority,
            timestamp: crate::agent::unix_now(),
            title: Some(title.clone()),
        };
        info!(from = %message.sender, to = %message.to, title = %title, "message prepared");

        if command.priority == Priority::High {
            let mut interrupts = self.interrupts.lock().await;
            let cooled_down = interrupts
                .get(&target_name)
                .map(|last| last.elapsed() >= self.config.interrupt_cooldown)
                .unwrap_or(true);
            if cooled_down {
                interrupts.insert(target_name.clone(), Instant::now());
                drop(interrupts);

                let mut text = format!("[INTERRUPT FROM: {}] {title}", message.sender);
                if !message.body.is_empty() {
                    text.push('\n');
                    text.push_str(&message.body);
                }
                self.panes.send_line(target.pane_index, &text).await;
                info!(to = %target_name, "sent interrupt");
                return Ok(());
            }
            drop(interrupts);
            info!(to = %target_name, "interrupt on cooldown, delivering to mailbox");
        }

        let sender = message.sender.clone();
        self.mailbox.append(&target_name, message).await;
        let notification = format!(
            "\n[MAILBOX NOTIFICATION] You have a new message from {sender} - Title: {title}\nUse <orc-command name=\"mailbox_check\"></orc-command> to retrieve your messages.\n"
        );
        self.panes.send_line(target.pane_index, &notification).await;
        Ok(())
    }

    /// `list_agents`: JSON array of agent descriptors to the caller's pane.
    async fn handle_list_agents(&self, command: &AgentCommand) -> anyhow::Result<()> {
        let agents = self.registry.snapshot().await;
        let mut listing = Vec::with_capacity(agents.len());
        for agent in &agents {
            listing.push(AgentInfo {
                name: agent.name.clone(),
                transcript_id: agent.transcript_id.clone(),
                pane_index: agent.pane_index,
                last_active: agent.last_active,
                mailbox_count: self.mailbox.count(&agent.name).await,
            });
        }

        let caller = self
            .registry
            .get(&command.agent_name)
            .await
            .ok_or_else(|| anyhow::anyhow!("requesting agent {} not found", command.agent_name))?;
        let response =
            format!("[ORC RESPONSE: list_agents]\n{}", serde_json::to_string_pretty(&listing)?);
        self.panes.send_line(caller.pane_index, &response).await;
        Ok(())
    }

    /// `mailbox_check`: drain and render the caller's mailbox.
    async fn handle_mailbox_check(&self, command: &AgentCommand) -> anyhow::Result<()> {
        let caller = self
            .registry
            .get(&command.agent_name)
            .await
            .ok_or_else(|| anyhow::anyhow!("requesting agent {} not found", command.agent_name))?;

        let messages = self.mailbox.drain(&command.agent_name).await;
        let response = if messages.is_empty() {
            "[ORC RESPONSE: mailbox]\nNo new messages.".to_owned()
        } else {
            let mut out = format!("[ORC RESPONSE: mailbox]\nYou have {} messages:\n", messages.len());
            for (i, msg) in messages.iter().enumerate() {
                out.push_str(&format!("\n--- Message {} ---\n", i + 1));
                out.push_str(&format!("From: {}\n", msg.sender));
                out.push_str(&format!("Title: {}\n", msg.title.as_deref().unwrap_or("No title")));
                out.push_str(&format!("Time: {}\n", msg.timestamp));
                out.push_str(&format!("Priority: {}\n", msg.priority.as_str()));
                if !msg.body.is_empty() {
                    out.push_str(&format!("Content:\n{}\n", msg.body));
                }
            }
            out
        };

        self.panes.send_line(caller.pane_index, &response).await;
        Ok(())
    }

    /// `context_status`: transcript size and a rough line estimate.
    async fn handle_context_status(&self, command: &AgentCommand) -> anyhow::Result<()> {
        let caller = self
            .registry
            .get(&command.agent_name)
            .await
            .ok_or_else(|| anyhow::anyhow!("requesting agent {} not found", command.agent_name))?;
        let monitor = caller
            .monitor
            .clone()
            .ok_or_else(|| anyhow::anyhow!("agent {} has no monitor", command.agent_name))?;

        let file_size = monitor.lock().await.file_size();
        let estimated_lines = file_size / 100;

        let mut response = format!(
            "[ORC RESPONSE: context_status]\nSession file size: {file_size} bytes\nEstimated context usage: {estimated_lines} lines\n"
        );
        if estimated_lines > self.config.context_threshold {
            response.push_str(
                "\nWARNING: Approaching context limit.\nConsider starting a new session with --resume flag.\n",
            );
        }

        self.panes.send_line(caller.pane_index, &response).await;
        Ok(())
    }

    /// State poll loop: refresh per-agent state, pane annotations, the
    /// status bar, and idle reminders.
    async fn state_poll_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.monitor_interval);
        let mut previous_states: HashMap<String, AgentState> = HashMap::new();
        let mut previous_counts: HashMap<String, usize> = HashMap::new();
        info!("state poll loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let agents = self.registry.snapshot().await;
            let mut states = Vec::with_capacity(agents.len());

            for agent in &agents {
                let state = self.state.update_agent_state(&agent.name, agent.pane_index).await;
                states.push((agent.name.clone(), state.as_str().to_owned()));

                if previous_states.get(&agent.name) != Some(&state) {
                    previous_states.insert(agent.name.clone(), state);
                    self.tmux.set_pane_state_indicator(agent.pane_index, state.as_str()).await;
                    let busy = matches!(state, AgentState::Busy | AgentState::Writing);
                    self.tmux.set_pane_activity(agent.pane_index, busy).await;
                }

                let count = self.mailbox.count(&agent.name).await;
                if previous_counts.get(&agent.name) != Some(&count) {
                    previous_counts.insert(agent.name.clone(), count);
                    self.tmux.set_pane_message_count(agent.pane_index, count).await;
                }
            }

            self.delivery.check_and_deliver_pending_reminders().await;

            if !states.is_empty() {
                self.tmux.update_status_bar(&states).await;
            }
        }

        info!("state poll loop stopped");
    }

    /// Block until an agent is observed idle, up to `timeout`.
    pub async fn wait_for_agent_idle(&self, agent_name: &str, timeout: Duration) -> bool {
        let Some(agent) = self.registry.get(agent_name).await else { return false };
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let state = self.state.update_agent_state(agent_name, agent.pane_index).await;
            if state == AgentState::Idle {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        false
    }

    /// Direct line to an agent's pane (external controllers).
    pub async fn send_to_agent(&self, agent_name: &str, text: &str) -> anyhow::Result<bool> {
        let agent = self
            .registry
            .get(agent_name)
            .await
            .ok_or_else(|| anyhow::anyhow!("unknown agent: {agent_name}"))?;
        Ok(self.panes.send_line(agent.pane_index, text).await)
    }

    /// Status of one agent, including transcript size when monitored.
    pub async fn agent_status(&self, agent_name: &str) -> Option<serde_json::Value> {
        let agent = self.registry.get(agent_name).await?;
        let mailbox_count = self.mailbox.count(agent_name).await;
        let file_size = match agent.monitor {
            Some(ref monitor) => monitor.lock().await.file_size(),
            None => 0,
        };
        Some(serde_json::json!({
            "name": agent.name,
            "session_id": agent.transcript_id,
            "pane_index": agent.pane_index,
            "last_active": agent.last_active,
            "mailbox_count": mailbox_count,
            "session_file_size": file_size,
        }))
    }
}

/// Create `/tmp/aviary/orc-<id>/{bin,mcp_configs}` for this run.
fn create_scratch_dir() -> anyhow::Result<ScratchDir> {
    let run_id: u32 = rand::rng().random_range(100_000..1_000_000);
    let root = PathBuf::from("/tmp/aviary").join(format!("orc-{run_id}"));
    let bin = root.join("bin");
    let mcp_configs = root.join("mcp_configs");
    std::fs::create_dir_all(&bin)?;
    std::fs::create_dir_all(&mcp_configs)?;
    Ok(ScratchDir { root, bin, mcp_configs })
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
