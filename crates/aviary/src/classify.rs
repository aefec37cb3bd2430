// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pane-text state classification.
//!
//! Claude's terminal UI has no machine-readable status channel, so agent
//! state is inferred from the rendered screen: the prompt box, the spinner
//! line above it, quit/error phrases, and startup banners. The classifier
//! is an explicit multi-phase scan (locate the last prompt box, inspect the
//! blank separator, inspect the spinner window, validate fillers) so each
//! phase's failure is observable rather than buried in one regex.

use std::time::Duration;

use regex::Regex;

use crate::state::AgentState;

/// Agents younger than this may still be classified as initializing.
pub const INITIALIZATION_WINDOW: Duration = Duration::from_secs(3);

/// Spinner gerunds Claude cycles through while processing.
const BUSY_GERUNDS: &str = "Accomplishing|Actioning|Actualizing|Analyzing|Baking|Booping|Brewing|Calculating|Cerebrating|Channelling|Churning|Clauding|Coalescing|Cogitating|Combobulating|Computing|Concocting|Conjuring|Considering|Contemplating|Cooking|Crafting|Creating|Crunching|Deciphering|Deliberating|Determining|Discombobulating|Divining|Doing|Effecting|Elucidating|Enchanting|Envisioning|Finagling|Flibbertigibbeting|Forging|Forming|Frolicking|Generating|Germinating|Hatching|Herding|Honking|Hustling|Ideating|Imagining|Incubating|Inferring|Jiving|Manifesting|Marinating|Meandering|Moseying|Mulling|Mustering|Musing|Noodling|Percolating|Perusing|Philosophising|Polishing|Pondering|Pontificating|Processing|Puttering|Puzzling|Reticulating|Reviewing|Ruminating|Scheming|Schlepping|Shimmying|Shucking|Simmering|Smooshing|Spelunking|Spinning|Stewing|Sussing|Synthesizing|Thinking|Tinkering|Transmuting|Unfurling|Unravelling|Vibing|Wandering|Whirring|Wibbling|Wizarding|Working|Wrangling";

/// Substrings allowed between the spinner line and the blank line above the
/// prompt box without invalidating the busy pattern: token counts, interrupt
/// hints, message notifications, reminders, continuation marks, tips.
const BUSY_FILLERS: &[&str] = &[
    "tokens",
    "interrupt",
    "↓",
    "esc",
    "[MESSAGE]",
    "check_messages",
    "You have a new message",
    "Reminder:",
    "⎿",
    "Tip:",
    "/statusline",
];

/// Which scan phase produced a classification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyPhase {
    QuitPhrase,
    ErrorPhrase,
    Startup,
    /// The spinner/blank/box busy structure matched.
    SpinnerAboveBox,
    /// A complete prompt box was inspected for typed text.
    BoxInterior,
    /// Only a bare `│ > …` fragment was visible.
    MinimalPrompt,
    /// No phase matched.
    Fallthrough,
}

/// A classification verdict plus the phase that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyTrace {
    pub state: AgentState,
    pub phase: ClassifyPhase,
    /// Line index of the prompt box the box phases operated on.
    pub box_top: Option<usize>,
}

impl ClassifyTrace {
    fn fallthrough(state: AgentState) -> Self {
        Self { state, phase: ClassifyPhase::Fallthrough, box_top: None }
    }
}

/// Compiled classifier patterns. Built once and shared across agents.
pub struct StatePatterns {
    busy: Regex,
    errors: Vec<Regex>,
    quits: Vec<Regex>,
    feedback: Vec<Regex>,
    init: Vec<Regex>,
    /// An active prompt box rendered after a quit phrase means the agent
    /// recovered (or never quit).
    recovery_box: Regex,
    recovery_spinner: Regex,
    bash_prompts: Vec<Regex>,
}

fn compile_all(patterns: &[&str]) -> anyhow::Result<Vec<Regex>> {
    patterns.iter().map(|p| Ok(Regex::new(p)?)).collect()
}

impl StatePatterns {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            busy: Regex::new(&format!(r"(?i)^.\s+(?:{BUSY_GERUNDS})…"))?,
            errors: compile_all(&[
                r"(?i)Error:",
                r"(?i)Failed:",
                r"(?i)Exception:",
                r"(?i)Traceback",
                r"(?i)MCP error",
                r"(?i)Cannot connect",
            ])?,
            quits: compile_all(&[
                r"(?i)Goodbye!",
                r"(?i)Session ended",
                r"(?i)Claude exited",
                r"(?im)^\[Process.*terminated\]$",
                r"(?im)^Process exited with",
            ])?,
            feedback: compile_all(&[
                r"(?i)How is Claude doing this session\?",
                r"(?i)1:\s*Bad\s+2:\s*Fine\s+3:\s*Good\s+0:\s*Dismiss",
                r"(?i)✓ Thanks for helping make Claude better!",
                r"(?i)Thanks for helping make Claude better",
            ])?,
            init: compile_all(&[
                r"(?i)Starting Claude",
                r"(?i)Initializing",
                r"(?i)Loading",
                r"(?i)Connecting",
                r"(?i)Welcome to Claude",
                r"(?i)Claude Code v\d+\.\d+",
            ])?,
            recovery_box: Regex::new(r"(?s)╭.*╮.*\n.*│.*>.*│.*\n.*╰.*╯")?,
            recovery_spinner: Regex::new(
                r"(?:Accomplishing|Working|Processing|Thinking|Analyzing)…",
            )?,
            bash_prompts: compile_all(&[r"^\w+@\w+:.*\$$", r"^\$$", r"^#$"])?,
        })
    }

    /// Classify captured pane content into an agent state.
    ///
    /// `agent_age` is the time since the agent was first observed; `None`
    /// disables the initialization window. Deterministic for a given input.
    pub fn classify(&self, pane_content: &str, agent_age: Option<Duration>) -> AgentState {
        self.explain(pane_content, agent_age).state
    }

    /// Classify and report which scan phase decided, for diagnostics.
    ///
    /// The busy classifier is a multi-phase scan; when a screen ends up
    /// `Unknown` the trace shows how far the scan got (e.g. a prompt box was
    /// found but had no bottom border).
    pub fn explain(&self, pane_content: &str, agent_age: Option<Duration>) -> ClassifyTrace {
        if pane_content.trim().is_empty() {
            return ClassifyTrace::fallthrough(AgentState::Unknown);
        }

        let all_lines: Vec<&str> = pane_content.trim().lines().collect();
        let recent_start = all_lines.len().saturating_sub(20);
        let recent_content = all_lines[recent_start..].join("\n");
        let last_few_start = all_lines.len().saturating_sub(5);
        let last_few = all_lines[last_few_start..].join("\n");

        // Remove feedback-UI noise before error/busy analysis; quit and
        // initialization checks run on the raw capture.
        let filtered_recent = self.strip_feedback(&recent_content);
        let filtered_last_few = self.strip_feedback(&last_few);

        if let Some(state) = self.check_quit(&recent_content) {
            return ClassifyTrace { state, phase: ClassifyPhase::QuitPhrase, box_top: None };
        }
        if let Some(state) = self.check_error(&filtered_last_few) {
            return ClassifyTrace { state, phase: ClassifyPhase::ErrorPhrase, box_top: None };
        }
        if let Some(state) = self.check_initializing(&recent_content, agent_age) {
            return ClassifyTrace { state, phase: ClassifyPhase::Startup, box_top: None };
        }

        let lines: Vec<&str> = filtered_recent.lines().collect();
        if let Some(top) = find_last_input_box_top(&lines) {
            if self.is_busy_structure(&lines, top) {
                return ClassifyTrace {
                    state: AgentState::Busy,
                    phase: ClassifyPhase::SpinnerAboveBox,
                    box_top: Some(top),
                };
            }
            if let Some(state) = classify_box_interior(&lines, top) {
                return ClassifyTrace {
                    state,
                    phase: ClassifyPhase::BoxInterior,
                    box_top: Some(top),
                };
            }
        }

        // Fallback: a minimal `│ > …` fragment without a complete box.
        if filtered_last_few.contains('│') && filtered_last_few.contains('>') {
            if let Some(state) = classify_minimal_prompt(&filtered_last_few) {
                return ClassifyTrace { state, phase: ClassifyPhase::MinimalPrompt, box_top: None };
            }
        }

        ClassifyTrace::fallthrough(AgentState::Unknown)
    }

    fn strip_feedback(&self, content: &str) -> String {
        let mut out = content.to_owned();
        for pattern in &self.feedback {
            out = pattern.replace_all(&out, "").into_owned();
        }
        out
    }

    /// Quit phrases, unless an active prompt box or a processing indicator
    /// appears after the match. Recovery takes precedence over quit.
    fn check_quit(&self, recent: &str) -> Option<AgentState> {
        for pattern in &self.quits {
            let m = match pattern.find(recent) {
                Some(m) => m,
                None => continue,
            };
            let after = &recent[m.start()..];
            if self.recovery_box.is_match(after) || self.recovery_spinner.is_match(after) {
                continue;
            }
            return Some(AgentState::Quit);
        }
        None
    }

    /// Error phrase in the last lines with no prompt indicator alongside.
    fn check_error(&self, last_few: &str) -> Option<AgentState> {
        if has_prompt_indicator(last_few) {
            return None;
        }
        for pattern in &self.errors {
            if pattern.is_match(last_few) {
                return Some(AgentState::Error);
            }
        }
        None
    }

    fn check_initializing(&self, recent: &str, agent_age: Option<Duration>) -> Option<AgentState> {
        let age = agent_age?;
        if age >= INITIALIZATION_WINDOW {
            return None;
        }
        for pattern in &self.init {
            if pattern.is_match(recent) && !self.recovery_box.is_match(recent) {
                return Some(AgentState::Initializing);
            }
        }
        if self.contains_only_bash_prompts(recent) {
            return Some(AgentState::Initializing);
        }
        None
    }

    /// Busy requires: blank line directly above the prompt box, a spinner
    /// line within the 4 lines above that blank, and only allowed fillers
    /// between the spinner and the blank.
    fn is_busy_structure(&self, lines: &[&str], box_top: usize) -> bool {
        if box_top < 2 {
            return false;
        }
        if !lines[box_top - 1].trim().is_empty() {
            return false;
        }

        let window_start = box_top.saturating_sub(5);
        let mut indicator_line = None;
        for idx in window_start..box_top - 1 {
            if self.busy.is_match(lines[idx].trim()) {
                indicator_line = Some(idx);
                break;
            }
        }
        let indicator_line = match indicator_line {
            Some(idx) => idx,
            None => return false,
        };

        for idx in indicator_line + 1..box_top - 1 {
            let line = lines[idx].trim();
            if !line.is_empty() && !BUSY_FILLERS.iter().any(|f| line.contains(f)) {
                return false;
            }
        }
        true
    }

    /// A young agent showing only shell prompts has not started Claude yet.
    fn contains_only_bash_prompts(&self, content: &str) -> bool {
        let non_empty: Vec<&str> =
            content.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if non_empty.is_empty() {
            return true;
        }
        let tail_start = non_empty.len().saturating_sub(3);
        let tail = &non_empty[tail_start..];
        let hits =
            tail.iter().filter(|line| self.bash_prompts.iter().any(|p| p.is_match(line))).count();
        hits >= 2.min(tail.len())
    }
}

/// `│` followed by `>` (ignoring whitespace) anywhere in the text.
fn has_prompt_indicator(text: &str) -> bool {
    let mut rest = text;
    while let Some(pos) = rest.find('│') {
        let after = &rest[pos + '│'.len_utf8()..];
        if after.trim_start().starts_with('>') {
            return true;
        }
        rest = after;
    }
    false
}

/// Find the top line of the LAST input prompt box: a line carrying box-top
/// glyphs with a `>` interior row within the next three lines. Welcome and
/// message boxes above the input box are skipped by taking the last match.
fn find_last_input_box_top(lines: &[&str]) -> Option<usize> {
    let mut top = None;
    for (i, line) in lines.iter().enumerate() {
        if !(line.contains('╭') && line.contains('╮') && line.contains('─')) {
            continue;
        }
        let window_end = (i + 4).min(lines.len());
        let is_input =
            lines[i + 1..window_end].iter().any(|l| l.contains('│') && l.contains('>'));
        if is_input {
            top = Some(i);
        }
    }
    top
}

/// With no spinner above the box, decide Writing vs Idle from the box
/// interior: any typed text after `>` (or a non-empty continuation row)
/// means Writing. Returns `None` when the box has no bottom border, leaving
/// the decision to the minimal-prompt fallback.
fn classify_box_interior(lines: &[&str], top: usize) -> Option<AgentState> {
    let bottom = lines[top + 1..]
        .iter()
        .position(|l| l.contains('╰') && l.contains('╯'))
        .map(|offset| top + 1 + offset)?;

    for line in &lines[top + 1..bottom] {
        if line.contains('│') && line.contains('>') {
            if let Some(text) = prompt_line_text(line) {
                // Claude's grayed-out startup suggestions read as empty.
                if !text.is_empty() && !text.starts_with("Try \"") {
                    return Some(AgentState::Writing);
                }
            }
        } else if line.contains('│') {
            let interior = crate::screen::interior_text(line);
            if !interior.is_empty() {
                return Some(AgentState::Writing);
            }
        }
    }
    Some(AgentState::Idle)
}

/// Text typed after the `>` marker on a prompt row, with the closing border
/// stripped.
fn prompt_line_text(line: &str) -> Option<String> {
    let (_, rest) = line.split_once('>')?;
    let text = match rest.rfind('│') {
        Some(pos) => &rest[..pos],
        None => rest,
    };
    Some(text.trim().to_owned())
}

/// Fallback classification for a bare `│ > …` prompt fragment.
fn classify_minimal_prompt(last_few: &str) -> Option<AgentState> {
    for line in last_few.lines().rev() {
        let pos = match line.find('│') {
            Some(pos) => pos,
            None => continue,
        };
        let after = line[pos + '│'.len_utf8()..].trim_start();
        let rest = match after.strip_prefix('>') {
            Some(rest) => rest,
            None => continue,
        };
        let closed = rest.contains('│');
        let text = match rest.rfind('│') {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        };
        if !text.is_empty() && !text.starts_with("Try \"") {
            return Some(AgentState::Writing);
        }
        // Only a clearly empty, closed prompt maps to Idle.
        if text.is_empty() && closed {
            return Some(AgentState::Idle);
        }
    }
    None
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
