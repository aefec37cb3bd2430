// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::launch::ClaudeLaunchCommand;
use crate::test_support::FakePanes;
use crate::transcript::TranscriptKind;

fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        session_name: "aviary-test".to_owned(),
        stabilization: Duration::from_millis(10),
        ..SupervisorConfig::default()
    }
}

struct Fixture {
    supervisor: Arc<Supervisor>,
    panes: Arc<FakePanes>,
}

async fn fixture(agents: &[&str]) -> anyhow::Result<Fixture> {
    let panes = FakePanes::new(crate::test_support::IDLE_SCREEN);
    let tmux = Arc::new(TmuxAdapter::new("aviary-test"));
    let supervisor = Supervisor::new(
        test_config(),
        tmux,
        Arc::new(ClaudeLaunchCommand::default()),
    )?
    .with_pane_writer(panes.clone());

    for agent in agents {
        supervisor.register_agent(agent, "placeholder", "prompt", None).await?;
    }
    Ok(Fixture { supervisor: Arc::new(supervisor), panes })
}

fn command(kind: &str, agent: &str) -> AgentCommand {
    AgentCommand {
        uuid: "u1".to_owned(),
        timestamp: "0".to_owned(),
        sender_kind: TranscriptKind::Assistant,
        agent_name: agent.to_owned(),
        kind: kind.to_owned(),
        from: agent.to_owned(),
        to: None,
        title: None,
        content: String::new(),
        priority: Priority::Normal,
        raw_content: String::new(),
    }
}

fn send_command(from: &str, to: &str, content: &str, priority: Priority) -> AgentCommand {
    let mut cmd = command("send_message", from);
    cmd.to = Some(to.to_owned());
    cmd.content = content.to_owned();
    cmd.priority = priority;
    cmd
}

#[tokio::test]
async fn start_requires_agents() -> anyhow::Result<()> {
    let f = fixture(&[]).await?;
    let err = Arc::clone(&f.supervisor).start(None).await;
    assert!(err.is_err());
    assert!(!f.supervisor.is_running());
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_rejected() -> anyhow::Result<()> {
    let f = fixture(&["alice"]).await?;
    assert!(f.supervisor.register_agent("alice", "p", "s", None).await.is_err());
    Ok(())
}

#[tokio::test]
async fn send_message_lands_in_mailbox_with_notification() -> anyhow::Result<()> {
    let f = fixture(&["alice", "bob"]).await?;
    f.supervisor
        .process_command(send_command("alice", "bob", "hello there", Priority::Normal))
        .await;

    let messages = f.supervisor.mailbox().drain("bob").await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "hello there");
    assert_eq!(messages[0].sender, "alice");
    assert_eq!(messages[0].title.as_deref(), Some("Message"));

    let sent = f.panes.sent_lines().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 1); // bob's pane
    assert!(sent[0].1.contains("[MAILBOX NOTIFICATION] You have a new message from alice"));
    Ok(())
}

#[tokio::test]
async fn send_message_resolves_names_case_insensitively() -> anyhow::Result<()> {
    let f = fixture(&["alice", "Bob"]).await?;
    f.supervisor.process_command(send_command("alice", "bob", "hi", Priority::Normal)).await;

    assert_eq!(f.supervisor.mailbox().count("Bob").await, 1);
    Ok(())
}

#[tokio::test]
async fn send_message_without_target_is_dropped() -> anyhow::Result<()> {
    let f = fixture(&["alice", "bob"]).await?;
    let mut cmd = command("send_message", "alice");
    cmd.content = "orphan".to_owned();
    f.supervisor.process_command(cmd).await;

    assert_eq!(f.supervisor.mailbox().count("bob").await, 0);
    assert!(f.panes.sent_lines().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn high_priority_interrupts_then_cools_down() -> anyhow::Result<()> {
    let f = fixture(&["alice", "bob"]).await?;

    let mut cmd = send_command("alice", "bob", "drop everything", Priority::High);
    cmd.title = Some("urgent".to_owned());
    f.supervisor.process_command(cmd.clone()).await;

    // First high-priority message goes out as an interrupt line.
    let sent = f.panes.sent_lines().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.starts_with("[INTERRUPT FROM: alice] urgent"));
    assert!(sent[0].1.contains("drop everything"));
    assert_eq!(f.supervisor.mailbox().count("bob").await, 0);

    // Within the cooldown the second one falls back to the mailbox.
    f.supervisor.process_command(cmd).await;
    assert_eq!(f.supervisor.mailbox().count("bob").await, 1);
    let sent = f.panes.sent_lines().await;
    assert_eq!(sent.len(), 2);
    assert!(sent[1].1.contains("[MAILBOX NOTIFICATION]"));
    Ok(())
}

#[tokio::test]
async fn list_agents_responds_to_caller_pane() -> anyhow::Result<()> {
    let f = fixture(&["alice", "bob"]).await?;
    f.supervisor.mailbox().append("bob", Message::new("x", "bob", "m", Priority::Normal, None)).await;

    f.supervisor.process_command(command("list_agents", "bob")).await;

    let sent = f.panes.sent_lines().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 1); // bob asked, bob receives
    assert!(sent[0].1.starts_with("[ORC RESPONSE: list_agents]\n"));

    let json_part = sent[0].1.trim_start_matches("[ORC RESPONSE: list_agents]\n");
    let listing: serde_json::Value = serde_json::from_str(json_part)?;
    assert_eq!(listing[0]["name"], "alice");
    assert_eq!(listing[1]["name"], "bob");
    assert_eq!(listing[1]["mailbox_count"], 1);
    assert_eq!(listing[0]["pane_index"], 0);
    Ok(())
}

#[tokio::test]
async fn mailbox_check_drains_and_formats() -> anyhow::Result<()> {
    let f = fixture(&["alice", "bob"]).await?;
    f.supervisor.process_command(send_command("alice", "bob", "first", Priority::Normal)).await;

    f.supervisor.process_command(command("mailbox_check", "bob")).await;

    let sent = f.panes.sent_lines().await;
    let response = &sent[1].1;
    assert!(response.starts_with("[ORC RESPONSE: mailbox]\nYou have 1 messages:"));
    assert!(response.contains("From: alice"));
    assert!(response.contains("Content:\nfirst"));

    // Drained: a second check reports empty.
    f.supervisor.process_command(command("mailbox_check", "bob")).await;
    let sent = f.panes.sent_lines().await;
    assert!(sent[2].1.contains("No new messages."));
    Ok(())
}

#[tokio::test]
async fn context_status_reports_file_size() -> anyhow::Result<()> {
    let f = fixture(&["alice"]).await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("t.jsonl");
    std::fs::write(&path, vec![b'x'; 1000])?;
    f.supervisor
        .registry()
        .bind_monitor("alice", TranscriptMonitor::new(&path, "alice"))
        .await;

    f.supervisor.process_command(command("context_status", "alice")).await;

    let sent = f.panes.sent_lines().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.starts_with("[ORC RESPONSE: context_status]"));
    assert!(sent[0].1.contains("Session file size: 1000 bytes"));
    assert!(sent[0].1.contains("Estimated context usage: 10 lines"));
    assert!(!sent[0].1.contains("WARNING"));
    Ok(())
}

#[tokio::test]
async fn context_status_warns_near_threshold() -> anyhow::Result<()> {
    let f = fixture(&["alice"]).await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("t.jsonl");
    // 10_001 estimated lines.
    let file = std::fs::File::create(&path)?;
    file.set_len(1_000_100)?;
    f.supervisor
        .registry()
        .bind_monitor("alice", TranscriptMonitor::new(&path, "alice"))
        .await;

    f.supervisor.process_command(command("context_status", "alice")).await;

    let sent = f.panes.sent_lines().await;
    assert!(sent[0].1.contains("WARNING: Approaching context limit."));
    Ok(())
}

#[tokio::test]
async fn unknown_command_is_ignored() -> anyhow::Result<()> {
    let f = fixture(&["alice"]).await?;
    f.supervisor.process_command(command("frobnicate", "alice")).await;
    assert!(f.panes.sent_lines().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn transcript_commands_flow_to_mailbox() -> anyhow::Result<()> {
    let f = fixture(&["alice", "bob"]).await?;

    // alice's transcript carries an embedded send_message to bob.
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("alice.jsonl");
    let record = serde_json::json!({
        "uuid": "u1",
        "sessionId": "alice-session",
        "type": "assistant",
        "message": {"content": [{
            "type": "text",
            "text": "On it. <orc-command name=\"send_message\" to=\"bob\" title=\"status\">done</orc-command>"
        }]}
    });
    std::fs::write(&path, format!("{record}\n"))?;
    f.supervisor.registry().bind_monitor("alice", TranscriptMonitor::new(&path, "alice")).await;

    // One poll iteration by hand: read, extract, dispatch.
    let agent = f.supervisor.registry().get("alice").await.ok_or_else(|| anyhow::anyhow!("missing"))?;
    let monitor = agent.monitor.ok_or_else(|| anyhow::anyhow!("no monitor"))?;
    let messages = monitor.lock().await.get_new_messages()?;
    let extractor = crate::command::CommandExtractor::new()?;
    let commands = extractor.extract_commands(&messages, "alice");
    assert_eq!(commands.len(), 1);
    for command in commands {
        f.supervisor.process_command(command).await;
    }

    let inbox = f.supervisor.mailbox().drain("bob").await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].sender, "alice");
    assert_eq!(inbox[0].title.as_deref(), Some("status"));
    assert_eq!(inbox[0].body, "done");
    Ok(())
}

#[tokio::test]
async fn wait_for_idle_on_unknown_agent() -> anyhow::Result<()> {
    let f = fixture(&[]).await?;
    assert!(!f.supervisor.wait_for_agent_idle("ghost", Duration::from_millis(50)).await);
    Ok(())
}
