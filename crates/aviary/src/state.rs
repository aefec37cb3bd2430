// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent state tracking.
//!
//! The monitor captures each agent's pane through the tmux adapter,
//! classifies the text, and keeps a small status record per agent. The
//! first observation of an agent is always `Initializing` regardless of
//! classifier output; subsequent observations update freely.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::anomaly::{detect_ui_anomalies, AnomalyHistory, AnomalyHistoryConfig};
use crate::classify::StatePatterns;
use crate::mailbox::Message;
use crate::tmux::TmuxAdapter;

/// Scrollback lines included in each state capture.
const CAPTURE_HISTORY: i32 = -50;

/// Source of captured pane text. Implemented by the tmux adapter; tests
/// substitute scripted content.
pub trait PaneSource: Send + Sync {
    fn capture(
        &self,
        pane: usize,
        history_limit: i32,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;
}

impl PaneSource for TmuxAdapter {
    fn capture(
        &self,
        pane: usize,
        history_limit: i32,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(self.capture_pane(pane, history_limit))
    }
}

/// Classified agent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Busy,
    /// Text typed into the prompt but not yet sent.
    Writing,
    Error,
    Quit,
    Initializing,
    Unknown,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Writing => "writing",
            Self::Error => "error",
            Self::Quit => "quit",
            Self::Initializing => "initializing",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status record for one monitored agent.
#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub state: AgentState,
    pub last_update: SystemTime,
    pub first_seen: Instant,
    pub pending_messages: VecDeque<Message>,
    pub messages_sent_while_busy: usize,
}

impl AgentStatus {
    fn new(state: AgentState) -> Self {
        Self {
            state,
            last_update: SystemTime::now(),
            first_seen: Instant::now(),
            pending_messages: VecDeque::new(),
            messages_sent_while_busy: 0,
        }
    }
}

/// Serializable per-agent summary entry.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStateSummary {
    pub state: AgentState,
    pub last_update: f64,
    pub pending_messages: usize,
    pub messages_while_busy: usize,
}

/// Monitors agent states in tmux panes.
pub struct StateMonitor {
    panes: Arc<dyn PaneSource>,
    patterns: StatePatterns,
    statuses: Mutex<HashMap<String, AgentStatus>>,
    anomalies: Mutex<AnomalyHistory>,
}

impl StateMonitor {
    pub fn new(panes: Arc<dyn PaneSource>) -> anyhow::Result<Self> {
        Self::with_anomaly_config(panes, AnomalyHistoryConfig::default())
    }

    pub fn with_anomaly_config(
        panes: Arc<dyn PaneSource>,
        config: AnomalyHistoryConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            panes,
            patterns: StatePatterns::new()?,
            statuses: Mutex::new(HashMap::new()),
            anomalies: Mutex::new(AnomalyHistory::new(config)),
        })
    }

    /// Capture the agent's pane, classify it, and update the stored status.
    ///
    /// Returns the stored state: `Initializing` on the very first
    /// observation, the classifier's output afterwards.
    pub async fn update_agent_state(&self, agent_name: &str, pane: usize) -> AgentState {
        let content = match self.panes.capture(pane, CAPTURE_HISTORY).await {
            Some(content) if !content.is_empty() => content,
            _ => {
                warn!(agent = agent_name, pane, "could not capture pane");
                return AgentState::Unknown;
            }
        };
        debug!(agent = agent_name, bytes = content.len(), "captured pane content");

        let findings = detect_ui_anomalies(&content);

        let age = {
            let statuses = self.statuses.lock().await;
            statuses.get(agent_name).map(|s| s.first_seen.elapsed())
        };
        let state = self.patterns.classify(&content, age);

        if !findings.is_empty() {
            debug!(agent = agent_name, count = findings.len(), "ui anomalies detected");
            if state == AgentState::Unknown {
                debug!(
                    agent = agent_name,
                    "unknown state with ui anomalies; the ui may have changed shape"
                );
            }
            let mut anomalies = self.anomalies.lock().await;
            anomalies.record(agent_name, &findings, Some(state.as_str()));
        }

        let mut statuses = self.statuses.lock().await;
        match statuses.get_mut(agent_name) {
            None => {
                // First observation always latches Initializing.
                statuses.insert(agent_name.to_owned(), AgentStatus::new(AgentState::Initializing));
                AgentState::Initializing
            }
            Some(status) => {
                let old = status.state;
                status.state = state;
                status.last_update = SystemTime::now();
                if old != state {
                    info!(agent = agent_name, from = %old, to = %state, "agent state changed");
                    if state == AgentState::Idle && !status.pending_messages.is_empty() {
                        info!(
                            agent = agent_name,
                            pending = status.pending_messages.len(),
                            "agent now idle with pending messages"
                        );
                    }
                }
                state
            }
        }
    }

    /// Current stored state, if the agent has been observed.
    pub async fn agent_state(&self, agent_name: &str) -> Option<AgentState> {
        self.statuses.lock().await.get(agent_name).map(|s| s.state)
    }

    pub async fn is_agent_busy(&self, agent_name: &str) -> bool {
        self.agent_state(agent_name).await == Some(AgentState::Busy)
    }

    pub async fn is_agent_idle(&self, agent_name: &str) -> bool {
        self.agent_state(agent_name).await == Some(AgentState::Idle)
    }

    /// Queue a message for an agent observed busy.
    pub async fn queue_message_for_agent(&self, agent_name: &str, message: Message) {
        let mut statuses = self.statuses.lock().await;
        let status = statuses
            .entry(agent_name.to_owned())
            .or_insert_with(|| AgentStatus::new(AgentState::Unknown));
        status.pending_messages.push_back(message);
        status.messages_sent_while_busy += 1;
        info!(
            agent = agent_name,
            total = status.pending_messages.len(),
            "queued message for busy agent"
        );
    }

    /// Drain and return the pending queue for an agent.
    pub async fn take_pending_messages(&self, agent_name: &str) -> Vec<Message> {
        let mut statuses = self.statuses.lock().await;
        match statuses.get_mut(agent_name) {
            Some(status) => {
                status.messages_sent_while_busy = 0;
                status.pending_messages.drain(..).collect()
            }
            None => vec![],
        }
    }

    pub async fn has_pending_messages(&self, agent_name: &str) -> bool {
        self.statuses
            .lock()
            .await
            .get(agent_name)
            .is_some_and(|s| !s.pending_messages.is_empty())
    }

    /// Summary of all tracked agents.
    pub async fn summary(&self) -> HashMap<String, AgentStateSummary> {
        let statuses = self.statuses.lock().await;
        statuses
            .iter()
            .map(|(name, status)| {
                (
                    name.clone(),
                    AgentStateSummary {
                        state: status.state,
                        last_update: unix_seconds(status.last_update),
                        pending_messages: status.pending_messages.len(),
                        messages_while_busy: status.messages_sent_while_busy,
                    },
                )
            })
            .collect()
    }

    /// Run `f` with the anomaly history (query, summary, export).
    pub async fn with_anomaly_history<R>(&self, f: impl FnOnce(&AnomalyHistory) -> R) -> R {
        let anomalies = self.anomalies.lock().await;
        f(&anomalies)
    }

    /// Classify raw pane text without touching stored statuses. Used by
    /// diagnostics and tests.
    pub fn classify_content(&self, content: &str, age: Option<Duration>) -> AgentState {
        self.patterns.classify(content, age)
    }
}

fn unix_seconds(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
