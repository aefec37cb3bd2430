// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn zero_agents_yields_empty_plan() -> anyhow::Result<()> {
    let plan = LayoutConfig::new(LayoutKind::Horizontal, 0).plan()?;
    assert!(plan.ops.is_empty());
    assert!(plan.shortcuts.is_empty());
    Ok(())
}

#[test]
fn horizontal_splits_then_evens_out() -> anyhow::Result<()> {
    let plan = LayoutConfig::new(LayoutKind::Horizontal, 3).plan()?;
    assert_eq!(plan.ops.len(), 3); // 2 splits + even-horizontal

    let args: Vec<Vec<String>> = plan.ops.iter().map(|op| op.to_args("team")).collect();
    assert_eq!(args[0], vec!["split-window", "-t", "team:0", "-h"]);
    assert_eq!(args[2], vec!["select-layout", "-t", "team:0", "even-horizontal"]);
    Ok(())
}

#[test]
fn single_pane_needs_no_splits() -> anyhow::Result<()> {
    let plan = LayoutConfig::new(LayoutKind::Vertical, 1).plan()?;
    assert!(plan.ops.is_empty());
    assert_eq!(plan.shortcuts.len(), 1);
    Ok(())
}

#[test]
fn grid_auto_dimensions() {
    let config = LayoutConfig::new(LayoutKind::Grid { rows: None, cols: None }, 5);
    assert_eq!(config.grid_dims(), Some((2, 3)));

    let config = LayoutConfig::new(LayoutKind::Grid { rows: None, cols: None }, 9);
    assert_eq!(config.grid_dims(), Some((3, 3)));

    let config = LayoutConfig::new(LayoutKind::Grid { rows: None, cols: None }, 10);
    assert_eq!(config.grid_dims(), Some((3, 4)));
}

#[test]
fn grid_uses_tiled_layout() -> anyhow::Result<()> {
    let plan = LayoutConfig::new(LayoutKind::Grid { rows: Some(2), cols: Some(2) }, 4).plan()?;
    assert_eq!(plan.ops.len(), 4); // 3 splits + tiled
    let last = plan.ops.last().map(|op| op.to_args("s"));
    assert_eq!(last, Some(vec![
        "select-layout".to_owned(),
        "-t".to_owned(),
        "s:0".to_owned(),
        "tiled".to_owned(),
    ]));
    Ok(())
}

#[test]
fn grid_capacity_validated() {
    let config = LayoutConfig::new(LayoutKind::Grid { rows: Some(1), cols: Some(2) }, 4);
    assert!(config.validate().is_err());
}

#[test]
fn main_vertical_first_split_takes_remaining_width() -> anyhow::Result<()> {
    let plan = LayoutConfig::new(LayoutKind::MainVertical { main_pct: 70 }, 3).plan()?;
    let args = plan.ops[0].to_args("s");
    assert_eq!(args, vec!["split-window", "-t", "s:0", "-h", "-p", "30"]);
    // Secondary panes split the right-hand strip.
    let args = plan.ops[1].to_args("s");
    assert_eq!(args, vec!["split-window", "-t", "s:0.1", "-v"]);
    Ok(())
}

#[test]
fn main_pct_bounds_enforced() {
    assert!(LayoutConfig::new(LayoutKind::MainHorizontal { main_pct: 0 }, 2).validate().is_err());
    assert!(LayoutConfig::new(LayoutKind::MainHorizontal { main_pct: 100 }, 2).validate().is_err());
    assert!(LayoutConfig::new(LayoutKind::MainHorizontal { main_pct: 50 }, 2).validate().is_ok());
}

#[test]
fn custom_requires_splits() {
    let config = LayoutConfig::new(LayoutKind::Custom { splits: vec![] }, 2);
    assert!(config.validate().is_err());
}

#[test]
fn custom_split_defaults_to_half() -> anyhow::Result<()> {
    let splits = vec![CustomSplit {
        target_pane: 0,
        direction: SplitDirection::Vertical,
        size_pct: None,
    }];
    let plan = LayoutConfig::new(LayoutKind::Custom { splits }, 2).plan()?;
    let args = plan.ops[0].to_args("s");
    assert_eq!(args, vec!["split-window", "-t", "s:0.0", "-v", "-p", "50"]);
    Ok(())
}

#[test]
fn shortcuts_cover_function_keys_and_alt_digits() {
    let config = LayoutConfig::new(LayoutKind::Horizontal, 5);
    let shortcuts = config.shortcuts();
    assert_eq!(shortcuts.get(&0), Some(&vec!["F1".to_owned(), "Alt+1".to_owned()]));
    assert_eq!(shortcuts.get(&2), Some(&vec!["F3".to_owned(), "Alt+3".to_owned()]));
    assert_eq!(shortcuts.get(&4), Some(&vec!["Alt+5".to_owned()]));
}

#[test]
fn shortcuts_cap_at_nine_panes() {
    let shortcuts = LayoutConfig::new(LayoutKind::Horizontal, 12).shortcuts();
    assert_eq!(shortcuts.len(), 9);
    assert!(!shortcuts.contains_key(&9));
}

#[test]
fn fit_layout_prefers_a_row_then_a_column() {
    // Three 80-col panes fit side by side in 250 columns.
    assert_eq!(fit_layout(3, 250, 24).kind, LayoutKind::Horizontal);
    // Too narrow for a row, tall enough for a column.
    assert_eq!(fit_layout(3, 100, 80).kind, LayoutKind::Vertical);
    // Neither fits, fall back to the recommended grid.
    assert_eq!(fit_layout(4, 100, 30).kind, LayoutKind::Grid { rows: Some(2), cols: Some(2) });
}

#[test]
fn recommended_layout_scales_with_team_size() {
    assert_eq!(recommended_layout(2).kind, LayoutKind::Horizontal);
    assert_eq!(recommended_layout(4).kind, LayoutKind::Grid { rows: Some(2), cols: Some(2) });
    assert_eq!(recommended_layout(8).kind, LayoutKind::Grid { rows: Some(3), cols: Some(3) });
    assert_eq!(recommended_layout(12).kind, LayoutKind::Grid { rows: None, cols: None });
}
