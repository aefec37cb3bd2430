// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message delivery with agent-state awareness.
//!
//! All keystroke injections announcing messages go through this engine so
//! two concurrent broker calls can never interleave garbled text into one
//! pane. The delivery lock is a leaf: it is never held together with any
//! other supervisor lock.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info};

use crate::agent::AgentRegistry;
use crate::mailbox::{Mailbox, Message, Priority};
use crate::state::{AgentState, StateMonitor};
use crate::tmux::TmuxAdapter;

/// Minimum gap between notifications injected into the same agent's pane.
const NOTIFICATION_GAP: Duration = Duration::from_millis(200);

/// Sink for keystroke injection. Implemented by the tmux adapter; tests
/// substitute a recorder.
pub trait PaneWriter: Send + Sync {
    /// Inject a line followed by Enter.
    fn send_line<'a>(
        &'a self,
        pane: usize,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Inject text without Enter.
    fn type_text<'a>(
        &'a self,
        pane: usize,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

impl PaneWriter for TmuxAdapter {
    fn send_line<'a>(
        &'a self,
        pane: usize,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(self.send_to_pane(pane, text))
    }

    fn type_text<'a>(
        &'a self,
        pane: usize,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(self.type_in_pane(pane, text))
    }
}

/// Notification line formats. The prefix is configurable; the bodies match
/// what agents are instructed to watch for.
#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub prefix: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { prefix: "[MESSAGE]".to_owned() }
    }
}

impl NotificationSettings {
    /// New-message notification injected right after a mailbox append.
    pub fn notification(&self, sender: &str) -> String {
        format!(
            "{} You have a new message from {sender}. Check it when convenient using 'check_messages' - no need to interrupt your current task unless urgent.",
            self.prefix
        )
    }

    /// Reminder for idle agents with unread mail.
    pub fn idle_reminder(&self, count: usize) -> String {
        format!(
            "{} Reminder: You have {count} unread message(s) in your mailbox. Use 'check_messages' to read them.",
            self.prefix
        )
    }

    /// Summary for messages that accumulated while the agent was busy.
    pub fn queued_while_busy(&self, count: usize) -> String {
        format!(
            "{} You received {count} messages while busy. Use 'check_messages' to read them.",
            self.prefix
        )
    }
}

/// Sequences notifications and reminders into agent panes.
pub struct DeliveryEngine {
    registry: Arc<AgentRegistry>,
    mailbox: Arc<Mailbox>,
    state: Arc<StateMonitor>,
    panes: Arc<dyn PaneWriter>,
    settings: NotificationSettings,
    /// Serializes every delivery so keystrokes never interleave. A leaf
    /// lock: nothing else is acquired while it is held. Guards the
    /// per-recipient pacing state.
    delivery_lock: Mutex<HashMap<String, Instant>>,
    reminder_sent: Mutex<HashMap<String, bool>>,
}

impl DeliveryEngine {
    pub fn new(
        registry: Arc<AgentRegistry>,
        mailbox: Arc<Mailbox>,
        state: Arc<StateMonitor>,
        panes: Arc<dyn PaneWriter>,
    ) -> Self {
        Self {
            registry,
            mailbox,
            state,
            panes,
            settings: NotificationSettings::default(),
            delivery_lock: Mutex::new(HashMap::new()),
            reminder_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: NotificationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Deliver a message: always append to the recipient's mailbox, then
    /// inject a one-line notification into its pane. A ≥200 ms gap between
    /// notifications to the same agent is enforced.
    pub async fn send_message_to_agent(
        &self,
        to: &str,
        from: &str,
        body: &str,
        priority: Priority,
    ) -> bool {
        let Some(agent) = self.registry.get(to).await else {
            error!(agent = to, "recipient not found");
            return false;
        };

        let message = Message::new(from, to, body, priority, None);
        self.mailbox.append(&agent.name, message).await;

        // A fresh message re-arms the idle reminder.
        self.reminder_sent.lock().await.insert(agent.name.clone(), false);

        // Leaf lock: acquired only after all other state is updated.
        let mut pacing = self.delivery_lock.lock().await;
        if let Some(last) = pacing.get(&agent.name) {
            let elapsed = last.elapsed();
            if elapsed < NOTIFICATION_GAP {
                tokio::time::sleep(NOTIFICATION_GAP - elapsed).await;
            }
        }
        let notification = self.settings.notification(from);
        let ok = self.panes.send_line(agent.pane_index, &notification).await;
        pacing.insert(agent.name.clone(), Instant::now());
        drop(pacing);

        if ok {
            info!(to = %agent.name, from, "delivered message notification");
        } else {
            error!(to = %agent.name, "failed to inject notification");
        }
        ok
    }

    /// Check every agent and send one idle reminder per unread batch.
    ///
    /// An idle agent with a non-empty mailbox gets exactly one reminder;
    /// the flag is cleared when the mailbox empties or new mail arrives.
    pub async fn check_and_deliver_pending_reminders(&self) {
        let agents = self.registry.snapshot().await;
        for agent in agents {
            let state = self.state.update_agent_state(&agent.name, agent.pane_index).await;
            if state != AgentState::Idle {
                continue;
            }

            let count = self.mailbox.count(&agent.name).await;
            if count > 0 {
                let already_sent = {
                    let sent = self.reminder_sent.lock().await;
                    sent.get(&agent.name).copied().unwrap_or(false)
                };
                if already_sent {
                    continue;
                }

                let reminder = self.settings.idle_reminder(count);
                {
                    let _delivery = self.delivery_lock.lock().await;
                    self.panes.send_line(agent.pane_index, &reminder).await;
                }
                self.reminder_sent.lock().await.insert(agent.name.clone(), true);
                info!(agent = %agent.name, count, "sent idle reminder");
            } else {
                self.reminder_sent.lock().await.insert(agent.name.clone(), false);
            }
        }
    }

    /// Type text into an agent's input field without submitting it.
    pub async fn send_text_to_agent_input(&self, agent_name: &str, text: &str) -> bool {
        let Some(agent) = self.registry.get(agent_name).await else {
            error!(agent = agent_name, "agent not found");
            return false;
        };
        let _delivery = self.delivery_lock.lock().await;
        self.panes.type_text(agent.pane_index, text).await
    }

    /// Send a full command line (with Enter) to an agent.
    pub async fn send_command_to_agent(&self, agent_name: &str, command: &str) -> bool {
        let Some(agent) = self.registry.get(agent_name).await else {
            error!(agent = agent_name, "agent not found");
            return false;
        };
        let _delivery = self.delivery_lock.lock().await;
        self.panes.send_line(agent.pane_index, command).await
    }
}

#[cfg(test)]
#[path = "delivery_tests.rs"]
mod tests;
