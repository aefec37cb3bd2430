// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transcript monitoring: incremental tail of an agent's append-only
//! JSONL session log.
//!
//! Each agent process writes its conversation to a transcript file; that
//! file is the only durable record of what the agent said. The monitor
//! tracks a byte offset and a set of seen record UUIDs so every record is
//! yielded at most once, in file order.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

/// Record kind in a transcript file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    User,
    Assistant,
    System,
}

impl TranscriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// A parsed transcript record.
#[derive(Debug, Clone)]
pub struct TranscriptMessage {
    pub uuid: String,
    pub transcript_id: String,
    pub kind: TranscriptKind,
    /// Timestamp as recorded in the transcript (ISO string or epoch number).
    pub timestamp: String,
    pub content: String,
    pub raw: Value,
}

/// Tails one agent's transcript file.
#[derive(Debug)]
pub struct TranscriptMonitor {
    path: PathBuf,
    agent_name: String,
    last_position: u64,
    seen: HashSet<String>,
}

impl TranscriptMonitor {
    pub fn new(path: impl Into<PathBuf>, agent_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            agent_name: agent_name.into(),
            last_position: 0,
            seen: HashSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Current byte offset into the transcript. Never decreases while the
    /// file exists.
    pub fn last_position(&self) -> u64 {
        self.last_position
    }

    /// Read records appended since the last call, preserving file order and
    /// skipping UUIDs already yielded.
    ///
    /// A missing file is not an error; the transcript may not exist yet.
    pub fn get_new_messages(&mut self) -> anyhow::Result<Vec<TranscriptMessage>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "transcript not found yet");
                return Ok(vec![]);
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.last_position))?;

        let mut messages = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line)?;
            if bytes_read == 0 {
                break;
            }
            // A line without a trailing newline is still being written;
            // leave the offset before it and re-read on the next poll.
            if !line.ends_with('\n') {
                break;
            }
            self.last_position += bytes_read as u64;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let data: Value = match serde_json::from_str(trimmed) {
                Ok(data) => data,
                Err(e) => {
                    debug!(agent = %self.agent_name, error = %e, "skipping malformed jsonl line");
                    continue;
                }
            };

            if let Some(uuid) = data.get("uuid").and_then(Value::as_str) {
                if !self.seen.insert(uuid.to_owned()) {
                    continue;
                }
            }

            if let Some(message) = parse_transcript_record(&data) {
                messages.push(message);
            }
        }

        Ok(messages)
    }

    /// Current transcript file size in bytes (0 when absent).
    pub fn file_size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Clear the offset and dedup set. Test use only.
    pub fn reset(&mut self) {
        self.last_position = 0;
        self.seen.clear();
    }
}

/// Parse one JSONL record into a [`TranscriptMessage`].
///
/// Records whose `type` is not user/assistant/system, or whose extracted
/// content is empty, are dropped.
pub fn parse_transcript_record(data: &Value) -> Option<TranscriptMessage> {
    let kind = TranscriptKind::parse(data.get("type")?.as_str()?)?;
    let message = data.get("message");

    let content = match kind {
        TranscriptKind::User => {
            let raw_content = message.and_then(|m| m.get("content"));
            match raw_content {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(items)) => {
                    let mut out = String::new();
                    for item in items {
                        if item.get("type").and_then(Value::as_str) == Some("tool_result") {
                            let inner = item.get("content").map(stringify).unwrap_or_default();
                            out.push_str(&format!("[Tool Result: {inner}]\n"));
                        } else {
                            out.push_str(&stringify(item));
                            out.push('\n');
                        }
                    }
                    out
                }
                _ => String::new(),
            }
        }
        TranscriptKind::Assistant => {
            let blocks = message.and_then(|m| m.get("content")).and_then(Value::as_array);
            let mut out = String::new();
            if let Some(blocks) = blocks {
                for block in blocks {
                    if block.get("type").and_then(Value::as_str) == Some("text") {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            out.push_str(text);
                        }
                    }
                }
            }
            out
        }
        TranscriptKind::System => message
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    };

    if content.is_empty() {
        return None;
    }

    Some(TranscriptMessage {
        uuid: data.get("uuid").and_then(Value::as_str).unwrap_or_default().to_owned(),
        transcript_id: data.get("sessionId").and_then(Value::as_str).unwrap_or_default().to_owned(),
        kind,
        timestamp: data.get("timestamp").map(stringify).unwrap_or_default(),
        content,
        raw: data.clone(),
    })
}

/// Render a JSON value as plain text: strings verbatim, everything else as
/// compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "transcript_tests.rs"]
mod tests;
