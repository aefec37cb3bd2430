// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent message mailboxes.
//!
//! Messages await explicit retrieval via `check_messages`; reading drains
//! the mailbox. All operations serialize under a single lock so the broker,
//! delivery engine, and supervisor observe one linear order. Insertion
//! order is the observable message order.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Message priority. `High` is advisory: the mailbox still receives the
/// message; the interrupt path is the supervisor's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    /// Lenient parse: anything that is not `high` is `normal`.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("high") {
            Self::High
        } else {
            Self::Normal
        }
    }
}

/// An immutable inter-agent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "from")]
    pub sender: String,
    pub to: String,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(default)]
    pub priority: Priority,
    /// Seconds since the Unix epoch, assigned server-side.
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        to: impl Into<String>,
        body: impl Into<String>,
        priority: Priority,
        title: Option<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            to: to.into(),
            body: body.into(),
            priority,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            title,
        }
    }
}

/// Agent name → ordered FIFO of pending messages.
#[derive(Debug, Default)]
pub struct Mailbox {
    inner: Mutex<HashMap<String, VecDeque<Message>>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to an agent's queue.
    pub async fn append(&self, agent_name: &str, message: Message) {
        let mut inner = self.inner.lock().await;
        inner.entry(agent_name.to_owned()).or_default().push_back(message);
    }

    /// Drain and return all pending messages, preserving insertion order.
    pub async fn drain(&self, agent_name: &str) -> Vec<Message> {
        let mut inner = self.inner.lock().await;
        match inner.get_mut(agent_name) {
            Some(queue) => queue.drain(..).collect(),
            None => vec![],
        }
    }

    /// Number of pending messages for an agent.
    pub async fn count(&self, agent_name: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.get(agent_name).map(VecDeque::len).unwrap_or(0)
    }

    pub async fn has_pending(&self, agent_name: &str) -> bool {
        self.count(agent_name).await > 0
    }

    /// Remove all queues. Used by supervisor stop.
    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }
}

#[cfg(test)]
#[path = "mailbox_tests.rs"]
mod tests;
