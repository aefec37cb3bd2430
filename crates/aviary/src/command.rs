// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Embedded-command extraction.
//!
//! Agents issue commands in-band by emitting
//! `<orc-command name="TYPE" …>inner</orc-command>` tags into their
//! transcript (`type=` is accepted as a synonym of `name=`). For
//! `send_message`, the fields {from, to, title, content, priority} may
//! appear as attributes of the opening tag or as nested child tags;
//! attributes win when both are present.

use regex::Regex;
use tracing::debug;

use crate::mailbox::Priority;
use crate::transcript::{TranscriptKind, TranscriptMessage};

/// A command extracted from a transcript message.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCommand {
    /// UUID of the transcript record the command was found in.
    pub uuid: String,
    pub timestamp: String,
    pub sender_kind: TranscriptKind,
    /// The agent whose transcript carried the command.
    pub agent_name: String,
    /// Command type, e.g. `send_message`, `mailbox_check`.
    pub kind: String,
    /// Originating agent; defaults to the owning agent when absent.
    pub from: String,
    pub to: Option<String>,
    pub title: Option<String>,
    pub content: String,
    pub priority: Priority,
    /// Inner text of the tag, before field-tag removal.
    pub raw_content: String,
}

/// Compiled extraction patterns. Built once and shared.
pub struct CommandExtractor {
    command: Regex,
    opening_tag: Regex,
    attribute: Regex,
    field_from: Regex,
    field_to: Regex,
    field_title: Regex,
    field_content: Regex,
    field_priority: Regex,
}

impl CommandExtractor {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            command: Regex::new(
                r#"(?is)<orc-command\s+(?:name|type)=["']([^"']+)["'](?:\s+[^>]+)?>(.*?)</orc-command>"#,
            )?,
            opening_tag: Regex::new(r"(?is)<orc-command\s+([^>]+)>")?,
            attribute: Regex::new(r#"(\w+)=["']([^"']+)["']"#)?,
            field_from: Regex::new(r"(?s)<from>(.*?)</from>")?,
            field_to: Regex::new(r"(?s)<to>(.*?)</to>")?,
            field_title: Regex::new(r"(?s)<title>(.*?)</title>")?,
            field_content: Regex::new(r"(?s)<content>(.*?)</content>")?,
            field_priority: Regex::new(r"(?s)<priority>(.*?)</priority>")?,
        })
    }

    /// Extract all commands from a batch of transcript messages.
    pub fn extract_commands(
        &self,
        messages: &[TranscriptMessage],
        agent_name: &str,
    ) -> Vec<AgentCommand> {
        let mut commands = Vec::new();
        for message in messages {
            for capture in self.command.captures_iter(&message.content) {
                let (Some(kind), Some(inner), Some(full)) =
                    (capture.get(1), capture.get(2), capture.get(0))
                else {
                    continue;
                };

                let mut command = AgentCommand {
                    uuid: message.uuid.clone(),
                    timestamp: message.timestamp.clone(),
                    sender_kind: message.kind,
                    agent_name: agent_name.to_owned(),
                    kind: kind.as_str().to_owned(),
                    from: agent_name.to_owned(),
                    to: None,
                    title: None,
                    content: String::new(),
                    priority: Priority::Normal,
                    raw_content: inner.as_str().trim().to_owned(),
                };

                if command.kind == "send_message" {
                    self.fill_send_message_fields(&mut command, full.as_str());
                }

                debug!(agent = agent_name, kind = %command.kind, "extracted embedded command");
                commands.push(command);
            }
        }
        commands
    }

    /// Resolve `send_message` fields. Per field: opening-tag attribute if
    /// present, else nested child tag, else the default.
    fn fill_send_message_fields(&self, command: &mut AgentCommand, full_match: &str) {
        let attrs = self.parse_attributes(full_match);
        let inner = command.raw_content.clone();

        let nested = |re: &Regex| {
            re.captures(&inner)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_owned())
        };

        if let Some(from) = attrs.iter().find(|(k, _)| k == "from").map(|(_, v)| v.clone()) {
            command.from = from;
        } else if let Some(from) = nested(&self.field_from) {
            command.from = from;
        }

        command.to = attrs
            .iter()
            .find(|(k, _)| k == "to")
            .map(|(_, v)| v.clone())
            .or_else(|| nested(&self.field_to));
        command.title = attrs
            .iter()
            .find(|(k, _)| k == "title")
            .map(|(_, v)| v.clone())
            .or_else(|| nested(&self.field_title));

        let priority = attrs
            .iter()
            .find(|(k, _)| k == "priority")
            .map(|(_, v)| v.clone())
            .or_else(|| nested(&self.field_priority));
        if let Some(priority) = priority {
            command.priority = Priority::parse(&priority);
        }

        // Content has no attribute form: nested tag, else the inner text
        // with any nested field tags removed.
        command.content = nested(&self.field_content).unwrap_or_else(|| {
            let mut content = inner.clone();
            for re in [
                &self.field_from,
                &self.field_to,
                &self.field_title,
                &self.field_content,
                &self.field_priority,
            ] {
                content = re.replace_all(&content, "").into_owned();
            }
            content.trim().to_owned()
        });
    }

    /// Attributes of the opening tag, minus the command-type attribute.
    fn parse_attributes(&self, full_match: &str) -> Vec<(String, String)> {
        let Some(tag) = self.opening_tag.captures(full_match).and_then(|c| c.get(1)) else {
            return vec![];
        };
        self.attribute
            .captures_iter(tag.as_str())
            .filter_map(|c| {
                let key = c.get(1)?.as_str();
                if key == "name" || key == "type" {
                    return None;
                }
                Some((key.to_owned(), c.get(2)?.as_str().to_owned()))
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
