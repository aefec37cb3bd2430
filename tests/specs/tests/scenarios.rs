// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios exercising the broker, classifier, fork detector,
//! and embedded-command extraction together.

use serde_json::{json, Map};

use aviary::classify::StatePatterns;
use aviary::command::CommandExtractor;
use aviary::context::{ContextAgent, ContextRegistry};
use aviary::fork::{session_directory_in, ForkDetector};
use aviary::state::AgentState;
use aviary::transcript::parse_transcript_record;

use specs::BrokerFixture;

#[tokio::test]
async fn two_agent_greeting() -> anyhow::Result<()> {
    let broker = BrokerFixture::start(&["alice", "bob"]).await?;

    // alice asks who is online.
    let listing = broker.call_tool("alice", "list_agents", json!({})).await?;
    assert_eq!(listing, "Available agents (2): alice, bob");

    // alice greets bob.
    let sent = broker
        .call_tool("alice", "send_message", json!({"to": "bob", "message": "Hi"}))
        .await?;
    assert_eq!(sent, "Message sent to bob");

    // bob's pane shows the notification line.
    let lines = broker.harness.panes.sent_lines().await;
    assert!(lines
        .iter()
        .any(|(pane, line)| *pane == 1 && line.contains("[MESSAGE] You have a new message from alice")));

    // bob reads his mailbox: one message with body "Hi".
    let inbox = broker.call_tool("bob", "check_messages", json!({})).await?;
    assert!(inbox.starts_with("You have 1 message(s):"));
    assert!(inbox.contains("From: alice - Hi"));
    Ok(())
}

#[tokio::test]
async fn broadcast_reaches_everyone_but_sender() -> anyhow::Result<()> {
    let broker = BrokerFixture::start(&["leader", "alice", "bob"]).await?;

    let report = broker
        .call_tool("leader", "broadcast_message", json!({"message": "status?"}))
        .await?;
    assert_eq!(report, "Broadcast sent to 2 agents");

    for agent in ["alice", "bob"] {
        let messages = broker.harness.mailbox.drain(agent).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "[BROADCAST] status?");
    }
    assert_eq!(broker.harness.mailbox.count("leader").await, 0);
    Ok(())
}

#[test]
fn busy_suppression_shapes() -> anyhow::Result<()> {
    let patterns = StatePatterns::new()?;

    let busy = "\
✳ Cogitating… (2s)

╭─────────╮
│ >       │
╰─────────╯";
    assert_eq!(patterns.classify(busy, None), AgentState::Busy);

    let idle = "\
╭─────────╮
│ >       │
╰─────────╯";
    assert_eq!(patterns.classify(idle, None), AgentState::Idle);

    let writing = "\
╭──────────────────╮
│ > hello world    │
╰──────────────────╯";
    assert_eq!(patterns.classify(writing, None), AgentState::Writing);
    Ok(())
}

#[tokio::test]
async fn fork_detection_scenarios() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let projects = tmp.path().join("projects");
    let session_dir = session_directory_in(projects.clone(), "team-A", "dev", "/work");
    std::fs::create_dir_all(&session_dir)?;

    let registry = std::sync::Arc::new(ContextRegistry::open(tmp.path().join("registry.json"))?);
    let mut dev = ContextAgent::new("dev", "developer");
    dev.transcript_id = "S1".to_owned();
    registry.create("team-A", vec![dev.clone()], "aviary-team-a", Some("/work"), Map::new()).await?;
    let detector = ForkDetector::with_projects_dir(projects, registry);

    let record = |sid: &str, uuid: &str| {
        json!({"uuid": uuid, "sessionId": sid, "type": "user", "message": {"content": "x"}})
            .to_string()
    };

    // S2.jsonl's early records carry S1 then S2: S2 is the active descendant.
    std::fs::write(session_dir.join("S1.jsonl"), format!("{}\n", record("S1", "a")))?;
    std::fs::write(
        session_dir.join("S2.jsonl"),
        format!("{}\n{}\n{}\n", record("S1", "b"), record("S1", "c"), record("S2", "d")),
    )?;
    let old = std::time::SystemTime::now() - std::time::Duration::from_secs(60);
    std::fs::OpenOptions::new()
        .write(true)
        .open(session_dir.join("S1.jsonl"))?
        .set_modified(old)?;

    assert_eq!(detector.find_active_transcript("team-A", &dev, "/work")?, "S2");

    // Without the S1 lineage (and without S1.jsonl) the resolver refuses to guess.
    std::fs::write(session_dir.join("S2.jsonl"), format!("{}\n", record("S2", "d")))?;
    std::fs::remove_file(session_dir.join("S1.jsonl"))?;
    assert!(detector.find_active_transcript("team-A", &dev, "/work").is_err());

    // With only S1.jsonl on disk, S1 is still current.
    std::fs::remove_file(session_dir.join("S2.jsonl"))?;
    std::fs::write(session_dir.join("S1.jsonl"), format!("{}\n", record("S1", "a")))?;
    assert_eq!(detector.find_active_transcript("team-A", &dev, "/work")?, "S1");
    Ok(())
}

#[test]
fn embedded_command_forms_agree() -> anyhow::Result<()> {
    let extractor = CommandExtractor::new()?;
    let parse = |content: &str| -> anyhow::Result<_> {
        let record = json!({
            "uuid": "u1",
            "sessionId": "s1",
            "type": "user",
            "message": {"content": content}
        });
        let message =
            parse_transcript_record(&record).ok_or_else(|| anyhow::anyhow!("record dropped"))?;
        let commands = extractor.extract_commands(&[message], "a");
        commands.into_iter().next().ok_or_else(|| anyhow::anyhow!("no command"))
    };

    let attr =
        parse(r#"<orc-command name="send_message" from="a" to="b" title="hi">body</orc-command>"#)?;
    assert_eq!(attr.from, "a");
    assert_eq!(attr.to.as_deref(), Some("b"));
    assert_eq!(attr.title.as_deref(), Some("hi"));
    assert_eq!(attr.content, "body");

    let nested = parse(
        "<orc-command name=\"send_message\"><from>a</from><to>b</to><title>hi</title><content>body</content></orc-command>",
    )?;
    assert_eq!((nested.from, nested.to, nested.title, nested.content), (
        attr.from.clone(),
        attr.to.clone(),
        attr.title.clone(),
        attr.content.clone(),
    ));

    // Mixed form prefers attributes.
    let mixed = parse(
        "<orc-command name=\"send_message\" to=\"attr\"><to>nested</to>body</orc-command>",
    )?;
    assert_eq!(mixed.to.as_deref(), Some("attr"));
    assert_eq!(mixed.content, "body");
    Ok(())
}

#[test]
fn port_exhaustion() -> anyhow::Result<()> {
    // Occupy a port with a test socket.
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let occupied = listener.local_addr()?.port();

    assert!(aviary::ports::find_available_port(occupied, 1).is_err());

    let found = aviary::ports::find_available_port(occupied, 20)?;
    assert!(found > occupied);
    Ok(())
}
