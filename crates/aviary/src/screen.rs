// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Box model for captured pane text.
//!
//! Claude renders its UI with rounded box-drawing characters. This module
//! locates those boxes and classifies them by content so the state
//! classifier and the anomaly detector can reason about structure instead
//! of raw glyphs.

/// Maximum number of lines a box may span before the scan gives up on it.
const MAX_BOX_LINES: usize = 10;

/// Content classification of a located box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxKind {
    /// The startup welcome banner.
    Welcome,
    /// The input prompt box (interior begins with `>`).
    Input,
    /// A delivered-message box.
    Message,
    /// Tips, notes, warnings.
    Info,
    /// Settings/permissions/model dialogs.
    Dialog,
    Empty,
    Unknown,
}

/// A box located in captured pane text. Line numbers index into the capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenBox {
    pub top: usize,
    pub middle: Vec<usize>,
    /// Missing when the box has no bottom border (dialogs legitimately omit
    /// it; anything else is an anomaly).
    pub bottom: Option<usize>,
    pub kind: BoxKind,
}

/// True if the line starts a box: `╭──…╮` at column zero.
pub fn is_box_top(line: &str) -> bool {
    let mut chars = line.chars();
    if chars.next() != Some('╭') {
        return false;
    }
    let mut saw_dash = false;
    for c in chars {
        match c {
            '─' => saw_dash = true,
            '╮' => return saw_dash,
            _ => return false,
        }
    }
    false
}

/// True if the line is a box interior row: starts with `│` and closes with
/// another `│` later on.
pub fn is_box_middle(line: &str) -> bool {
    let mut chars = line.chars();
    chars.next() == Some('│') && chars.any(|c| c == '│')
}

/// True if the line closes a box: `╰──…╯` at column zero.
pub fn is_box_bottom(line: &str) -> bool {
    let mut chars = line.chars();
    if chars.next() != Some('╰') {
        return false;
    }
    let mut saw_dash = false;
    for c in chars {
        match c {
            '─' => saw_dash = true,
            '╯' => return saw_dash,
            _ => return false,
        }
    }
    false
}

/// Strip `│` borders and surrounding whitespace from an interior row.
pub fn interior_text(line: &str) -> &str {
    let trimmed = line.trim();
    trimmed
        .strip_prefix('│')
        .and_then(|rest| rest.strip_suffix('│'))
        .unwrap_or(trimmed)
        .trim()
}

/// Locate all boxes in the captured lines, classifying each by content.
pub fn find_boxes(lines: &[String]) -> Vec<ScreenBox> {
    let mut boxes = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if !is_box_top(&lines[i]) {
            i += 1;
            continue;
        }

        let top = i;
        let mut middle = Vec::new();
        let mut bottom = None;
        i += 1;
        while i < lines.len() && i < top + MAX_BOX_LINES {
            if is_box_middle(&lines[i]) {
                middle.push(i);
                i += 1;
            } else if is_box_bottom(&lines[i]) {
                bottom = Some(i);
                break;
            } else {
                break;
            }
        }

        let kind = classify_box(lines, &middle);
        boxes.push(ScreenBox { top, middle, bottom, kind });
        i += 1;
    }
    boxes
}

/// Joined interior content of a box, space-separated.
pub fn box_content(lines: &[String], middle: &[usize]) -> String {
    let parts: Vec<&str> =
        middle.iter().filter_map(|&idx| lines.get(idx)).map(|l| interior_text(l)).collect();
    parts.join(" ")
}

/// Classify a box by its joined interior content.
fn classify_box(lines: &[String], middle: &[usize]) -> BoxKind {
    let content = box_content(lines, middle);
    let trimmed = content.trim();

    if content.contains("Welcome to Claude Code") {
        BoxKind::Welcome
    } else if trimmed.starts_with('>') {
        // Any input box with a `>` prompt: empty, a command, or mid-typing.
        BoxKind::Input
    } else if content.contains("MESSAGE") || content.contains("message") {
        BoxKind::Message
    } else if ["Tip:", "Note:", "Warning:", "Error:"].iter().any(|k| content.contains(k)) {
        BoxKind::Info
    } else if content.contains("Permissions:")
        && (content.contains("Allow") || content.contains("Deny"))
    {
        BoxKind::Dialog
    } else if [
        "Settings",
        "Configure Claude Code",
        "Agents",
        "Create new agent",
        "Hook Configuration",
        "Select Model",
    ]
    .iter()
    .any(|k| content.contains(k))
    {
        BoxKind::Dialog
    } else if trimmed.is_empty() {
        BoxKind::Empty
    } else {
        BoxKind::Unknown
    }
}

/// Known dialog screens legitimately render without a bottom border.
pub fn is_known_dialog_content(content: &str) -> bool {
    [
        "Settings",
        "Configure Claude Code",
        "Agents",
        "Create new agent",
        "Hook Configuration",
        "Hooks are shell commands",
        "Select Model",
        "Switch between Claude models",
    ]
    .iter()
    .any(|k| content.contains(k))
}

#[cfg(test)]
#[path = "screen_tests.rs"]
mod tests;
