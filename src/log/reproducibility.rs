//! Run audit log
//!
//! Every pipeline stage of a run is recorded with:
//! - Timestamp
//! - Stage name
//! - What was done
//! - The parameters it used
//! - Sequential order
//!
//! The log can be exported as human-readable text or JSON.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// A single log entry representing one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Sequential entry number (1-based)
    pub sequence: usize,
    pub timestamp: DateTime<Local>,
    /// Pipeline stage name
    pub stage: String,
    pub description: String,
    /// Parameters in effect, `key=value` separated by spaces
    pub parameters: String,
}

impl LogEntry {
    /// Format as human-readable text line
    pub fn to_text(&self) -> String {
        format!(
            "[{:03}] {} | {} | {}\n      Parameters: {}",
            self.sequence,
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.stage,
            self.description,
            if self.parameters.is_empty() {
                "(none)"
            } else {
                &self.parameters
            }
        )
    }
}

/// Ordered record of every stage of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: String,
    pub run_start: DateTime<Local>,
    /// Image the run was started from
    pub source: String,
    pub software_version: String,
    pub entries: Vec<LogEntry>,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            run_start: Local::now(),
            source: String::new(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            entries: Vec::new(),
        }
    }

    pub fn set_source(&mut self, source: &str) {
        self.source = source.to_string();
    }

    /// Record a stage
    pub fn add_entry(&mut self, stage: &str, description: &str, parameters: &str) {
        let seq = self.entries.len() + 1;
        self.entries.push(LogEntry {
            sequence: seq,
            timestamp: Local::now(),
            stage: stage.to_string(),
            description: description.to_string(),
            parameters: parameters.to_string(),
        });
        log::info!("[RUN {:03}] {}: {}", seq, stage, description);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last entry for a stage, if the run got there
    pub fn last_for(&self, stage: &str) -> Option<&LogEntry> {
        self.entries.iter().rev().find(|e| e.stage == stage)
    }

    /// Export as human-readable text
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("═══════════════════════════════════════════════════════════════\n");
        out.push_str("  Sensor Strip Assay Run Log\n");
        out.push_str("═══════════════════════════════════════════════════════════════\n");
        out.push_str(&format!("  Run ID:      {}\n", self.run_id));
        out.push_str(&format!(
            "  Started:     {}\n",
            self.run_start.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!("  Source:      {}\n", self.source));
        out.push_str(&format!("  Software:    scentinel v{}\n", self.software_version));
        out.push_str(&format!("  Stages:      {}\n", self.entries.len()));
        out.push_str("───────────────────────────────────────────────────────────────\n\n");

        for entry in &self.entries {
            out.push_str(&entry.to_text());
            out.push_str("\n\n");
        }

        out.push_str("═══════════════════════════════════════════════════════════════\n");
        out
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("JSON error: {}", e))
    }

    pub fn save_text(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_text())
    }

    pub fn save_json(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_json())
    }

    /// Save as JSON when the path ends in `.json`, text otherwise
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let is_json = path
            .extension()
            .map(|e| e.to_string_lossy().eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            self.save_json(path)
        } else {
            self.save_text(path)
        }
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}
