// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UI anomaly detection and bounded anomaly history.
//!
//! Structural oddities in captured pane text (boxes without a bottom border,
//! duplicate input boxes, unrecognized box content, stray box-drawing
//! glyphs) usually mean the UI changed shape under the classifier. Each
//! finding is recorded so detection patterns can be updated from evidence
//! instead of guesswork.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::screen::{box_content, find_boxes, is_known_dialog_content, BoxKind};

/// Classified anomaly kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    MultipleInputBoxes,
    IncompleteBox,
    UnknownBoxType,
    TooManyBoxes,
    Other,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultipleInputBoxes => "multiple_input_boxes",
            Self::IncompleteBox => "incomplete_box",
            Self::UnknownBoxType => "unknown_box_type",
            Self::TooManyBoxes => "too_many_boxes",
            Self::Other => "other",
        }
    }

    /// Classify a finding's content string.
    fn from_content(content: &str) -> Self {
        if content.contains("Multiple input boxes") {
            Self::MultipleInputBoxes
        } else if content.contains("Incomplete prompt box") {
            Self::IncompleteBox
        } else if content.contains("Unrecognized box type") {
            Self::UnknownBoxType
        } else if content.contains("Too many prompt boxes") {
            Self::TooManyBoxes
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw finding from [`detect_ui_anomalies`], before history bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyFinding {
    pub line_num: usize,
    pub content: String,
    pub context: Vec<String>,
}

/// A recorded anomaly with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRecord {
    /// Seconds since the Unix epoch at record time.
    pub timestamp: f64,
    pub agent_name: String,
    pub anomaly_type: AnomalyType,
    pub line_num: usize,
    pub content: String,
    pub context: Vec<String>,
    /// Pane state at detection time, when known.
    pub pane_state: Option<String>,
}

/// Retention configuration for [`AnomalyHistory`].
#[derive(Debug, Clone)]
pub struct AnomalyHistoryConfig {
    pub max_records_per_agent: usize,
    pub max_total_records: usize,
    pub retention: Duration,
}

impl Default for AnomalyHistoryConfig {
    fn default() -> Self {
        Self {
            max_records_per_agent: 1000,
            max_total_records: 5000,
            retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Query filter for stored anomalies.
#[derive(Debug, Clone, Default)]
pub struct AnomalyQuery {
    pub agent_name: Option<String>,
    pub anomaly_type: Option<AnomalyType>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub limit: Option<usize>,
}

/// Summary statistics over stored anomalies.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnomalySummary {
    pub total_records: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_agent: BTreeMap<String, usize>,
    pub oldest_record: Option<f64>,
    pub newest_record: Option<f64>,
}

/// Export format for anomaly reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
}

/// Bounded per-agent anomaly history: per-agent cap, global cap with
/// oldest-first eviction across agents, and time-based purge.
#[derive(Debug, Default)]
pub struct AnomalyHistory {
    config: AnomalyHistoryConfig,
    history: HashMap<String, VecDeque<AnomalyRecord>>,
    total: usize,
}

impl AnomalyHistory {
    pub fn new(config: AnomalyHistoryConfig) -> Self {
        Self { config, history: HashMap::new(), total: 0 }
    }

    pub fn total_records(&self) -> usize {
        self.total
    }

    /// Record new findings for an agent and apply retention.
    pub fn record(&mut self, agent_name: &str, findings: &[AnomalyFinding], pane_state: Option<&str>) {
        if findings.is_empty() {
            return;
        }
        let timestamp = unix_now();
        let queue = self.history.entry(agent_name.to_owned()).or_default();

        for finding in findings {
            if queue.len() >= self.config.max_records_per_agent {
                queue.pop_front();
                self.total = self.total.saturating_sub(1);
            }
            queue.push_back(AnomalyRecord {
                timestamp,
                agent_name: agent_name.to_owned(),
                anomaly_type: AnomalyType::from_content(&finding.content),
                line_num: finding.line_num,
                content: finding.content.clone(),
                context: finding.context.clone(),
                pane_state: pane_state.map(|s| s.to_owned()),
            });
            self.total += 1;
        }
        debug!(agent = agent_name, count = findings.len(), "recorded ui anomalies");

        self.apply_retention();
    }

    /// Enforce the time window and the global cap, oldest-first.
    fn apply_retention(&mut self) {
        let cutoff = unix_now() - self.config.retention.as_secs_f64();
        for queue in self.history.values_mut() {
            while queue.front().is_some_and(|r| r.timestamp < cutoff) {
                queue.pop_front();
                self.total = self.total.saturating_sub(1);
            }
        }

        while self.total > self.config.max_total_records {
            // Evict the globally oldest record across all agents.
            let oldest_agent = self
                .history
                .iter()
                .filter_map(|(name, queue)| queue.front().map(|r| (name.clone(), r.timestamp)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(name, _)| name);
            match oldest_agent {
                Some(name) => {
                    if let Some(queue) = self.history.get_mut(&name) {
                        queue.pop_front();
                        self.total = self.total.saturating_sub(1);
                    }
                }
                None => break,
            }
        }
    }

    /// Query stored records with optional filters. Default limit 100.
    pub fn query(&self, query: &AnomalyQuery) -> Vec<AnomalyRecord> {
        let limit = query.limit.unwrap_or(100);
        let mut results = Vec::new();

        let agents: Vec<&String> = match &query.agent_name {
            Some(name) => self.history.keys().filter(|k| *k == name).collect(),
            None => self.history.keys().collect(),
        };

        for agent in agents {
            let Some(queue) = self.history.get(agent) else { continue };
            for record in queue {
                if query.anomaly_type.is_some_and(|t| t != record.anomaly_type) {
                    continue;
                }
                if query.start_time.is_some_and(|t| record.timestamp < t) {
                    continue;
                }
                if query.end_time.is_some_and(|t| record.timestamp > t) {
                    continue;
                }
                results.push(record.clone());
                if results.len() >= limit {
                    return results;
                }
            }
        }
        results
    }

    /// Summary statistics, optionally restricted to one agent.
    pub fn summary(&self, agent_name: Option<&str>) -> AnomalySummary {
        let mut summary = AnomalySummary::default();

        for (agent, queue) in &self.history {
            if agent_name.is_some_and(|n| n != agent.as_str()) {
                continue;
            }
            if queue.is_empty() {
                continue;
            }
            summary.total_records += queue.len();
            summary.by_agent.insert(agent.clone(), queue.len());
            for record in queue {
                *summary.by_type.entry(record.anomaly_type.as_str().to_owned()).or_default() += 1;
                if summary.oldest_record.is_none_or(|t| record.timestamp < t) {
                    summary.oldest_record = Some(record.timestamp);
                }
                if summary.newest_record.is_none_or(|t| record.timestamp > t) {
                    summary.newest_record = Some(record.timestamp);
                }
            }
        }
        summary
    }

    /// Export a report over the (optionally filtered) records.
    pub fn export(&self, format: ReportFormat, agent_name: Option<&str>) -> anyhow::Result<String> {
        let records = self.query(&AnomalyQuery {
            agent_name: agent_name.map(|s| s.to_owned()),
            limit: Some(10_000),
            ..AnomalyQuery::default()
        });

        match format {
            ReportFormat::Json => {
                let report = serde_json::json!({
                    "summary": self.summary(agent_name),
                    "records": records,
                });
                Ok(serde_json::to_string_pretty(&report)?)
            }
            ReportFormat::Csv => {
                let mut lines = vec!["timestamp,agent_name,anomaly_type,line_num,content".to_owned()];
                for r in &records {
                    lines.push(format!(
                        "{},{},{},{},\"{}\"",
                        r.timestamp,
                        r.agent_name,
                        r.anomaly_type,
                        r.line_num,
                        r.content.replace('"', "\"\"")
                    ));
                }
                Ok(lines.join("\n"))
            }
            ReportFormat::Text => {
                let summary = self.summary(agent_name);
                let mut lines = vec![
                    "Anomaly Report".to_owned(),
                    "=".repeat(60),
                    format!("Total Records: {}", summary.total_records),
                ];
                lines.push("\nAnomalies by Type:".to_owned());
                for (atype, count) in &summary.by_type {
                    lines.push(format!("  {atype}: {count}"));
                }
                lines.push("\nAnomalies by Agent:".to_owned());
                for (agent, count) in &summary.by_agent {
                    lines.push(format!("  {agent}: {count}"));
                }
                lines.push(format!("\n{}", "=".repeat(60)));
                lines.push("Detailed Records:".to_owned());
                lines.push("=".repeat(60));
                for r in &records {
                    lines.push(format!("\n[{}] {} - {}", r.timestamp, r.agent_name, r.anomaly_type));
                    lines.push(format!("  Line {}: {}", r.line_num, r.content));
                    if !r.context.is_empty() {
                        lines.push("  Context:".to_owned());
                        for ctx in r.context.iter().take(3) {
                            lines.push(format!("    {ctx}"));
                        }
                    }
                }
                Ok(lines.join("\n"))
            }
        }
    }
}

/// Scan captured pane text for structural oddities.
///
/// Focuses on UI structure, not content: incomplete boxes (unless they are a
/// known dialog), duplicate input boxes, unrecognized box content, and box
/// glyphs outside any tracked box.
pub fn detect_ui_anomalies(pane_content: &str) -> Vec<AnomalyFinding> {
    let lines: Vec<String> = pane_content.lines().map(|l| l.to_owned()).collect();
    let boxes = find_boxes(&lines);
    let mut findings = Vec::new();

    // Incomplete boxes. Dialog screens legitimately render without a bottom
    // border, so those are excluded.
    for b in &boxes {
        if b.bottom.is_none() && !is_known_dialog_content(&box_content(&lines, &b.middle)) {
            findings.push(AnomalyFinding {
                line_num: b.top,
                content: format!("Incomplete prompt box starting at line {}", b.top),
                context: lines[b.top..(b.top + 5).min(lines.len())].to_vec(),
            });
        }
    }

    let complete: Vec<_> = boxes.iter().filter(|b| b.bottom.is_some()).collect();

    // Exactly one input box is expected.
    let input_count = complete.iter().filter(|b| b.kind == BoxKind::Input).count();
    if input_count > 1 {
        if let Some(second) = complete.iter().filter(|b| b.kind == BoxKind::Input).nth(1) {
            findings.push(AnomalyFinding {
                line_num: second.top,
                content: format!("Multiple input boxes detected ({input_count} found)"),
                context: vec![],
            });
        }
    }

    // Unrecognized box content. Only the first is reported.
    if let Some(unknown) = complete.iter().find(|b| b.kind == BoxKind::Unknown) {
        let end = unknown.bottom.unwrap_or(unknown.top);
        findings.push(AnomalyFinding {
            line_num: unknown.top,
            content: "Unrecognized box type".to_owned(),
            context: lines[unknown.top..=end.min(lines.len().saturating_sub(1))].to_vec(),
        });
    }

    // Stray structural glyphs outside any complete box.
    const UNEXPECTED_GLYPHS: &[char] = &['┌', '┐', '└', '┘', '├', '┤', '┬', '┴', '┼'];
    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let inside_box = complete
            .iter()
            .any(|b| b.bottom.is_some_and(|bottom| b.top <= i && i <= bottom));
        if inside_box {
            continue;
        }

        let heavy_separator = line.chars().count() > 10
            && line.chars().all(|c| matches!(c, '═' | '━' | '┃' | '┏' | '┓' | '┗' | '┛'));
        if heavy_separator || line.chars().any(|c| UNEXPECTED_GLYPHS.contains(&c)) {
            findings.push(AnomalyFinding {
                line_num: i,
                content: line.to_owned(),
                context: lines[i.saturating_sub(2)..(i + 3).min(lines.len())].to_vec(),
            });
        }
    }

    findings
}

fn unix_now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

#[cfg(test)]
#[path = "anomaly_tests.rs"]
mod tests;
