// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::{ClassifyPhase, StatePatterns, INITIALIZATION_WINDOW};
use crate::state::AgentState;

fn patterns() -> StatePatterns {
    StatePatterns::new().expect("patterns compile")
}

const IDLE_SCREEN: &str = "\
Some earlier output

╭──────────────────────────╮
│ >                        │
╰──────────────────────────╯
  ? for shortcuts";

const BUSY_SCREEN: &str = "\
Some earlier output

✳ Cogitating… (3s · ↓ 120 tokens · esc to interrupt)

╭──────────────────────────╮
│ >                        │
╰──────────────────────────╯";

const WRITING_SCREEN: &str = "\
╭──────────────────────────╮
│ > draft a reply to bob   │
╰──────────────────────────╯";

#[test]
fn busy_requires_spinner_blank_and_box() {
    let p = patterns();
    assert_eq!(p.classify(BUSY_SCREEN, None), AgentState::Busy);
}

#[test]
fn idle_prompt_without_spinner() {
    let p = patterns();
    assert_eq!(p.classify(IDLE_SCREEN, None), AgentState::Idle);
}

#[test]
fn typed_text_means_writing() {
    let p = patterns();
    assert_eq!(p.classify(WRITING_SCREEN, None), AgentState::Writing);
}

#[test]
fn classification_is_deterministic() {
    let p = patterns();
    let first = p.classify(BUSY_SCREEN, None);
    for _ in 0..10 {
        assert_eq!(p.classify(BUSY_SCREEN, None), first);
    }
}

#[test]
fn busy_rejected_when_no_blank_line_above_box() {
    let screen = "\
✳ Pondering… (2s)
╭──────────────────────────╮
│ >                        │
╰──────────────────────────╯";
    let p = patterns();
    // Spinner present but the required blank separator is missing.
    assert_eq!(p.classify(screen, None), AgentState::Idle);
}

#[test]
fn busy_rejected_when_unrelated_content_between_spinner_and_box() {
    let screen = "\
✳ Pondering… (2s)
completely unrelated output line

╭──────────────────────────╮
│ >                        │
╰──────────────────────────╯";
    let p = patterns();
    assert_eq!(p.classify(screen, None), AgentState::Idle);
}

#[test]
fn busy_allows_filler_lines() {
    let screen = "\
✳ Germinating… (5s)
  ↓ 145 tokens
  esc to interrupt

╭──────────────────────────╮
│ >                        │
╰──────────────────────────╯";
    let p = patterns();
    assert_eq!(p.classify(screen, None), AgentState::Busy);
}

#[test]
fn startup_suggestion_reads_as_empty() {
    let screen = "\
╭────────────────────────────────╮
│ > Try \"fix the build errors\"  │
╰────────────────────────────────╯";
    let p = patterns();
    assert_eq!(p.classify(screen, None), AgentState::Idle);
}

#[test]
fn last_input_box_wins_over_welcome_banner() {
    let screen = "\
╭──────────────────────────╮
│ Welcome to Claude Code!  │
│ > Try \"help\" to start    │
╰──────────────────────────╯

╭──────────────────────────╮
│ > typed text             │
╰──────────────────────────╯";
    let p = patterns();
    assert_eq!(p.classify(screen, None), AgentState::Writing);
}

#[yare::parameterized(
    cogitating = { "✳ Cogitating… (3s)" },
    thinking = { "· Thinking… (12s · ↓ 1.2k tokens)" },
    flibbertigibbeting = { "✻ Flibbertigibbeting… (1s" },
    wrangling = { "* Wrangling… " },
)]
fn spinner_variants_classify_busy(spinner: &str) {
    let screen = format!(
        "{spinner}\n\n╭──────────╮\n│ >        │\n╰──────────╯"
    );
    let p = patterns();
    assert_eq!(p.classify(&screen, None), AgentState::Busy);
}

#[test]
fn gerund_without_ellipsis_is_not_busy() {
    let screen = "✳ Thinking hard\n\n╭──────────╮\n│ >        │\n╰──────────╯";
    let p = patterns();
    assert_ne!(p.classify(screen, None), AgentState::Busy);
}

#[yare::parameterized(
    goodbye = { "Goodbye!" },
    session_ended = { "Session ended" },
    exited = { "Claude exited" },
    process_terminated = { "[Process 1234 terminated]" },
)]
fn quit_phrases_detected(phrase: &str) {
    let p = patterns();
    let screen = format!("some output\n{phrase}\n");
    assert_eq!(p.classify(&screen, None), AgentState::Quit);
}

#[test]
fn quit_overridden_by_later_prompt_box() {
    let screen = "\
Goodbye!
╭──────────────────────────╮
│ >                        │
╰──────────────────────────╯";
    let p = patterns();
    assert_eq!(p.classify(screen, None), AgentState::Idle);
}

#[test]
fn quit_overridden_by_later_spinner() {
    let screen = "Session ended\nThinking…\n";
    let p = patterns();
    assert_ne!(p.classify(screen, None), AgentState::Quit);
}

#[test]
fn error_without_prompt() {
    let p = patterns();
    assert_eq!(p.classify("MCP error: connection refused\n", None), AgentState::Error);
}

#[test]
fn error_with_prompt_means_recovered() {
    let screen = "\
Error: transient failure
╭──────────────────────────╮
│ >                        │
╰──────────────────────────╯";
    let p = patterns();
    assert_ne!(p.classify(screen, None), AgentState::Error);
}

#[test]
fn young_agent_with_banner_is_initializing() {
    let p = patterns();
    let screen = "Starting Claude...\n";
    let age = Some(Duration::from_secs(1));
    assert_eq!(p.classify(screen, age), AgentState::Initializing);
}

#[test]
fn old_agent_with_banner_is_not_initializing() {
    let p = patterns();
    let screen = "Starting Claude...\n";
    let age = Some(INITIALIZATION_WINDOW);
    assert_ne!(p.classify(screen, age), AgentState::Initializing);
}

#[test]
fn young_agent_with_bash_prompt_only() {
    let p = patterns();
    let screen = "user@host:~/work$\n$\n";
    assert_eq!(p.classify(screen, Some(Duration::from_millis(500))), AgentState::Initializing);
}

#[test]
fn young_agent_with_prompt_box_already_initialized() {
    let p = patterns();
    // A visible prompt box overrides the initialization banner.
    let screen = "\
Welcome to Claude
╭──────────────────────────╮
│ >                        │
╰──────────────────────────╯";
    assert_eq!(p.classify(screen, Some(Duration::from_secs(1))), AgentState::Idle);
}

#[test]
fn minimal_prompt_fallback() {
    let p = patterns();
    assert_eq!(p.classify("│ > │", None), AgentState::Idle);
    assert_eq!(p.classify("│ > half-typed thought", None), AgentState::Writing);
}

#[test]
fn empty_capture_is_unknown() {
    let p = patterns();
    assert_eq!(p.classify("", None), AgentState::Unknown);
    assert_eq!(p.classify("   \n  ", None), AgentState::Unknown);
}

#[test]
fn garbage_is_unknown() {
    let p = patterns();
    assert_eq!(p.classify("completely unrelated text\nwith no ui glyphs", None), AgentState::Unknown);
}

#[test]
fn trace_reports_deciding_phase() {
    let p = patterns();

    let trace = p.explain(BUSY_SCREEN, None);
    assert_eq!(trace.phase, ClassifyPhase::SpinnerAboveBox);
    assert_eq!(trace.box_top, Some(4));

    let trace = p.explain(IDLE_SCREEN, None);
    assert_eq!(trace.phase, ClassifyPhase::BoxInterior);

    let trace = p.explain("Goodbye!\n", None);
    assert_eq!(trace.phase, ClassifyPhase::QuitPhrase);

    let trace = p.explain("│ > │", None);
    assert_eq!(trace.phase, ClassifyPhase::MinimalPrompt);

    let trace = p.explain("nothing interesting", None);
    assert_eq!(trace.phase, ClassifyPhase::Fallthrough);
    assert_eq!(trace.state, AgentState::Unknown);
}

#[test]
fn feedback_ui_lines_are_ignored() {
    let screen = "\
How is Claude doing this session?
1: Bad  2: Fine  3: Good  0: Dismiss

╭──────────────────────────╮
│ >                        │
╰──────────────────────────╯";
    let p = patterns();
    assert_eq!(p.classify(screen, None), AgentState::Idle);
}
