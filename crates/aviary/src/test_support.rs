// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fake pane I/O and fixture builders.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent::AgentRegistry;
use crate::delivery::{DeliveryEngine, PaneWriter};
use crate::mailbox::Mailbox;
use crate::state::{PaneSource, StateMonitor};

/// A pane showing Claude's empty input prompt.
pub const IDLE_SCREEN: &str = "\
╭──────────────────────────╮
│ >                        │
╰──────────────────────────╯";

/// A pane showing the spinner/prompt-box busy structure.
pub const BUSY_SCREEN: &str = "\
✳ Cogitating… (3s · ↓ 120 tokens · esc to interrupt)

╭──────────────────────────╮
│ >                        │
╰──────────────────────────╯";

/// In-memory pane fabric: records injected keystrokes and serves a settable
/// screen to captures. One screen is shared by all panes.
#[derive(Default)]
pub struct FakePanes {
    screen: Mutex<String>,
    pub sent: Mutex<Vec<(usize, String)>>,
    pub typed: Mutex<Vec<(usize, String)>>,
}

impl FakePanes {
    pub fn new(screen: &str) -> Arc<Self> {
        Arc::new(Self {
            screen: Mutex::new(screen.to_owned()),
            sent: Mutex::new(Vec::new()),
            typed: Mutex::new(Vec::new()),
        })
    }

    pub async fn set_screen(&self, content: &str) {
        *self.screen.lock().await = content.to_owned();
    }

    pub async fn sent_lines(&self) -> Vec<(usize, String)> {
        self.sent.lock().await.clone()
    }

    pub async fn typed_text(&self) -> Vec<(usize, String)> {
        self.typed.lock().await.clone()
    }
}

impl PaneWriter for FakePanes {
    fn send_line<'a>(
        &'a self,
        pane: usize,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            self.sent.lock().await.push((pane, text.to_owned()));
            true
        })
    }

    fn type_text<'a>(
        &'a self,
        pane: usize,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            self.typed.lock().await.push((pane, text.to_owned()));
            true
        })
    }
}

impl PaneSource for FakePanes {
    fn capture(
        &self,
        _pane: usize,
        _history_limit: i32,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async move {
            let screen = self.screen.lock().await.clone();
            if screen.is_empty() {
                None
            } else {
                Some(screen)
            }
        })
    }
}

/// A delivery-engine fixture over fake panes.
pub struct DeliveryHarness {
    pub panes: Arc<FakePanes>,
    pub registry: Arc<AgentRegistry>,
    pub mailbox: Arc<Mailbox>,
    pub state: Arc<StateMonitor>,
    pub delivery: Arc<DeliveryEngine>,
}

/// Build a harness with the given agents registered, panes showing the
/// idle prompt.
pub async fn delivery_harness(agents: &[&str]) -> anyhow::Result<DeliveryHarness> {
    let panes = Arc::new(FakePanes::default());
    panes.set_screen(IDLE_SCREEN).await;

    let registry = Arc::new(AgentRegistry::new());
    for agent in agents {
        registry.register(agent, "placeholder", "prompt", None).await?;
    }
    let mailbox = Arc::new(Mailbox::new());
    let state = Arc::new(StateMonitor::new(panes.clone())?);
    let delivery = Arc::new(DeliveryEngine::new(
        registry.clone(),
        mailbox.clone(),
        state.clone(),
        panes.clone(),
    ));
    Ok(DeliveryHarness { panes, registry, mailbox, state, delivery })
}

/// Advance an agent past the initialization latch.
pub async fn settle_state(harness: &DeliveryHarness, agent: &str) {
    if let Some(a) = harness.registry.get(agent).await {
        harness.state.update_agent_state(agent, a.pane_index).await;
        harness.state.update_agent_state(agent, a.pane_index).await;
    }
}
