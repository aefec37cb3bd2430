// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pane layout planning.
//!
//! Translates a desired layout into the ordered sequence of tmux split
//! operations that produce it. The planner only *describes* the splits;
//! the tmux adapter executes them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Direction for splitting a pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    /// Side by side (`split-window -h`).
    Horizontal,
    /// Top/bottom (`split-window -v`).
    Vertical,
}

impl SplitDirection {
    fn flag(&self) -> &'static str {
        match self {
            Self::Horizontal => "-h",
            Self::Vertical => "-v",
        }
    }
}

/// A user-defined split operation for custom layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomSplit {
    /// Which existing pane to split.
    pub target_pane: usize,
    pub direction: SplitDirection,
    /// Size of the new pane as a percentage (defaults to 50).
    pub size_pct: Option<u8>,
}

/// Layout shape for a session's panes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum LayoutKind {
    /// All panes left-to-right.
    Horizontal,
    /// All panes stacked.
    Vertical,
    /// Even grid; dimensions auto-derived when unset (cols = ⌈√N⌉).
    Grid { rows: Option<usize>, cols: Option<usize> },
    /// One large pane on top, the rest share the bottom.
    MainHorizontal { main_pct: u8 },
    /// One large pane on the left, the rest share the right.
    MainVertical { main_pct: u8 },
    /// User-ordered split operations.
    Custom { splits: Vec<CustomSplit> },
}

impl Default for LayoutKind {
    fn default() -> Self {
        Self::Horizontal
    }
}

/// A fully-resolved layout for a known number of agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub kind: LayoutKind,
    pub agent_count: usize,
}

/// One abstract split command, rendered as tmux arguments by [`LayoutPlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitOp {
    /// `split-window -t <target> [-h|-v] [-p <pct>]`
    Split { target_pane: Option<usize>, direction: Option<SplitDirection>, size_pct: Option<u8> },
    /// `select-layout -t <window> <name>`
    SelectLayout { name: &'static str },
}

impl SplitOp {
    /// Render this operation as tmux arguments for the given session.
    ///
    /// The returned vector does not include the leading `tmux`.
    pub fn to_args(&self, session: &str) -> Vec<String> {
        match self {
            Self::Split { target_pane, direction, size_pct } => {
                let target = match target_pane {
                    Some(pane) => format!("{session}:0.{pane}"),
                    None => format!("{session}:0"),
                };
                let mut args = vec!["split-window".to_owned(), "-t".to_owned(), target];
                if let Some(direction) = direction {
                    args.push(direction.flag().to_owned());
                }
                if let Some(pct) = size_pct {
                    args.push("-p".to_owned());
                    args.push(pct.to_string());
                }
                args
            }
            Self::SelectLayout { name } => vec![
                "select-layout".to_owned(),
                "-t".to_owned(),
                format!("{session}:0"),
                (*name).to_owned(),
            ],
        }
    }
}

/// The planner's output: ordered split operations plus shortcut hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    pub ops: Vec<SplitOp>,
    /// Pane index → primary shortcut label (F-keys for the first three,
    /// Alt+digit for all panes up to nine).
    pub shortcuts: BTreeMap<usize, Vec<String>>,
}

impl LayoutConfig {
    pub fn new(kind: LayoutKind, agent_count: usize) -> Self {
        Self { kind, agent_count }
    }

    /// Resolved grid dimensions: explicit values, else cols = ⌈√N⌉ and
    /// rows = ⌈N / cols⌉.
    pub fn grid_dims(&self) -> Option<(usize, usize)> {
        match self.kind {
            LayoutKind::Grid { rows, cols } => {
                if self.agent_count == 0 {
                    return Some((0, 0));
                }
                let cols = cols.unwrap_or_else(|| (self.agent_count as f64).sqrt().ceil() as usize);
                let rows = rows.unwrap_or_else(|| self.agent_count.div_ceil(cols.max(1)));
                Some((rows, cols))
            }
            _ => None,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        match &self.kind {
            LayoutKind::MainHorizontal { main_pct } | LayoutKind::MainVertical { main_pct } => {
                if *main_pct == 0 || *main_pct >= 100 {
                    anyhow::bail!("main pane size must be between 1-99, got {main_pct}");
                }
            }
            LayoutKind::Custom { splits } => {
                if splits.is_empty() {
                    anyhow::bail!("custom layout requires at least one split");
                }
                for split in splits {
                    if let Some(pct) = split.size_pct {
                        if pct == 0 || pct > 100 {
                            anyhow::bail!("split size must be between 1-100, got {pct}");
                        }
                    }
                }
            }
            LayoutKind::Grid { .. } => {
                if let Some((rows, cols)) = self.grid_dims() {
                    if rows * cols < self.agent_count {
                        anyhow::bail!(
                            "grid {rows}x{cols} cannot hold {} agents",
                            self.agent_count
                        );
                    }
                }
            }
            LayoutKind::Horizontal | LayoutKind::Vertical => {}
        }
        Ok(())
    }

    /// Plan the split operations for this layout.
    ///
    /// Zero agents yield an empty plan; a single agent needs no splits but
    /// still gets its shortcut entry.
    pub fn plan(&self) -> anyhow::Result<LayoutPlan> {
        self.validate()?;

        if self.agent_count == 0 {
            return Ok(LayoutPlan { ops: vec![], shortcuts: BTreeMap::new() });
        }

        let ops = match &self.kind {
            LayoutKind::Horizontal => even_row_ops(self.agent_count, SplitDirection::Horizontal),
            LayoutKind::Vertical => even_row_ops(self.agent_count, SplitDirection::Vertical),
            LayoutKind::Grid { .. } => {
                let mut ops: Vec<SplitOp> = (1..self.agent_count)
                    .map(|_| SplitOp::Split { target_pane: None, direction: None, size_pct: None })
                    .collect();
                ops.push(SplitOp::SelectLayout { name: "tiled" });
                ops
            }
            LayoutKind::MainHorizontal { main_pct } => {
                main_axis_ops(self.agent_count, *main_pct, SplitDirection::Vertical)
            }
            LayoutKind::MainVertical { main_pct } => {
                main_axis_ops(self.agent_count, *main_pct, SplitDirection::Horizontal)
            }
            LayoutKind::Custom { splits } => splits
                .iter()
                .map(|s| SplitOp::Split {
                    target_pane: Some(s.target_pane),
                    direction: Some(s.direction),
                    size_pct: Some(s.size_pct.unwrap_or(50)),
                })
                .collect(),
        };

        Ok(LayoutPlan { ops, shortcuts: self.shortcuts() })
    }

    /// Keyboard shortcuts for the layout: F1..F3 for the first three panes,
    /// Alt+1..Alt+9 for all panes up to nine.
    pub fn shortcuts(&self) -> BTreeMap<usize, Vec<String>> {
        let mut map = BTreeMap::new();
        for pane in 0..self.agent_count.min(9) {
            let mut keys = Vec::new();
            if pane < 3 {
                keys.push(format!("F{}", pane + 1));
            }
            keys.push(format!("Alt+{}", pane + 1));
            map.insert(pane, keys);
        }
        map
    }

    /// Minimum terminal size (cols, rows) for the layout to stay readable.
    pub fn min_terminal_size(&self) -> (usize, usize) {
        const MIN_PANE_COLS: usize = 80;
        const MIN_PANE_ROWS: usize = 24;

        match &self.kind {
            LayoutKind::Horizontal => (MIN_PANE_COLS * self.agent_count.max(1), MIN_PANE_ROWS),
            LayoutKind::Vertical => (MIN_PANE_COLS, MIN_PANE_ROWS * self.agent_count.max(1)),
            LayoutKind::Grid { .. } => {
                let (rows, cols) = self.grid_dims().unwrap_or((1, 1));
                (MIN_PANE_COLS * cols.max(1), MIN_PANE_ROWS * rows.max(1))
            }
            _ => (MIN_PANE_COLS * 2, MIN_PANE_ROWS * 2),
        }
    }
}

/// Splits for a single row/column of evenly-sized panes.
fn even_row_ops(count: usize, direction: SplitDirection) -> Vec<SplitOp> {
    let mut ops: Vec<SplitOp> = (1..count)
        .map(|_| SplitOp::Split { target_pane: None, direction: Some(direction), size_pct: None })
        .collect();
    if count > 1 {
        let name = match direction {
            SplitDirection::Horizontal => "even-horizontal",
            SplitDirection::Vertical => "even-vertical",
        };
        ops.push(SplitOp::SelectLayout { name });
    }
    ops
}

/// Splits for main-horizontal / main-vertical layouts: one large pane plus a
/// shared strip of secondary panes.
fn main_axis_ops(count: usize, main_pct: u8, first_split: SplitDirection) -> Vec<SplitOp> {
    if count < 2 {
        return vec![];
    }
    let remaining = 100 - main_pct;
    let mut ops = vec![SplitOp::Split {
        target_pane: None,
        direction: Some(first_split),
        size_pct: Some(remaining),
    }];
    let secondary_direction = match first_split {
        SplitDirection::Vertical => SplitDirection::Horizontal,
        SplitDirection::Horizontal => SplitDirection::Vertical,
    };
    for _ in 2..count {
        ops.push(SplitOp::Split {
            target_pane: Some(1),
            direction: Some(secondary_direction),
            size_pct: None,
        });
    }
    if count > 2 {
        let name = match first_split {
            SplitDirection::Vertical => "main-horizontal",
            SplitDirection::Horizontal => "main-vertical",
        };
        ops.push(SplitOp::SelectLayout { name });
    }
    ops
}

/// Choose a layout that fits the terminal: a single row if it is wide
/// enough, a single column if tall enough, else the recommended grid.
pub fn fit_layout(agent_count: usize, term_cols: usize, term_rows: usize) -> LayoutConfig {
    let horizontal = LayoutConfig::new(LayoutKind::Horizontal, agent_count);
    let (cols, rows) = horizontal.min_terminal_size();
    if cols <= term_cols && rows <= term_rows {
        return horizontal;
    }

    let vertical = LayoutConfig::new(LayoutKind::Vertical, agent_count);
    let (cols, rows) = vertical.min_terminal_size();
    if cols <= term_cols && rows <= term_rows {
        return vertical;
    }

    recommended_layout(agent_count)
}

/// Recommended layout for an agent count: rows for small teams, grids beyond.
pub fn recommended_layout(agent_count: usize) -> LayoutConfig {
    let kind = match agent_count {
        0..=3 => LayoutKind::Horizontal,
        4 => LayoutKind::Grid { rows: Some(2), cols: Some(2) },
        5..=6 => LayoutKind::Grid { rows: Some(2), cols: Some(3) },
        7..=9 => LayoutKind::Grid { rows: Some(3), cols: Some(3) },
        _ => LayoutKind::Grid { rows: None, cols: None },
    };
    LayoutConfig::new(kind, agent_count)
}

#[cfg(test)]
#[path = "layout_tests.rs"]
mod tests;
