//! Summary of a finished check run.

use crate::checker::Buckets;
use crate::types::{RunId, Target};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One reported target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    /// The target in its line form (original line when there is one).
    pub line: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReportEntry {
    fn from_target(target: &Target) -> Self {
        Self {
            line: target.to_string(),
            host: target.host.clone(),
            port: target.port,
            error: None,
        }
    }
}

/// Everything a run produced, ready for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub id: RunId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Targets in the input list.
    pub total: usize,
    /// Targets that completed without being cancelled.
    pub checked: usize,
    /// Whether the run was stopped before the list was exhausted.
    pub stopped: bool,
    pub duration_ms: u64,
    pub on: Vec<ReportEntry>,
    pub off: Vec<ReportEntry>,
    pub errors: Vec<ReportEntry>,
}

impl CheckReport {
    /// Start a report for a run over `total` targets.
    pub fn new(total: usize) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            started_at: now,
            completed_at: now,
            total,
            checked: 0,
            stopped: false,
            duration_ms: 0,
            on: Vec::new(),
            off: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Fill in the buckets of the finished run.
    pub fn finalize(mut self, buckets: &Buckets, stopped: bool, duration_ms: u64) -> Self {
        self.completed_at = Utc::now();
        self.duration_ms = duration_ms;
        self.stopped = stopped;
        self.checked = buckets.checked;
        self.on = buckets.on.iter().map(ReportEntry::from_target).collect();
        self.off = buckets.off.iter().map(ReportEntry::from_target).collect();
        self.errors = buckets
            .errors
            .iter()
            .map(|failed| ReportEntry {
                error: Some(failed.error.to_string()),
                ..ReportEntry::from_target(&failed.target)
            })
            .collect();
        self
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{}/{} checked - {} on, {} off, {} errors [{:.2}s]{}",
            self.checked,
            self.total,
            self.on.len(),
            self.off.len(),
            self.errors.len(),
            self.duration_ms as f64 / 1000.0,
            if self.stopped { " (stopped)" } else { "" }
        )
    }
}
