//! Pipeline run metrics.
//!
//! Counters are filled in by the pipeline as each stage runs and surfaced in
//! the CLI report. Nothing here affects classification.

use std::time::Duration;

/// Counters and timing for one stage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageMetrics {
    pub level: u32,
    /// Elapsed time for the stage, including store reads and writes.
    pub duration: Duration,
    /// Bucket / sheet / parent scopes that had rules and keywords.
    pub scopes: usize,
    /// Scopes skipped for lack of rules or rows.
    pub skipped_scopes: usize,
    /// Keywords fed into the matching pass.
    pub keywords: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub rules_compiled: usize,
    pub rule_errors: usize,
    pub warnings: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunMetrics {
    /// Total elapsed time for the run.
    pub total: Duration,
    pub stages: Vec<StageMetrics>,
}

impl RunMetrics {
    pub fn matched(&self) -> usize {
        self.stages.iter().map(|s| s.matched).sum()
    }

    pub fn unmatched(&self) -> usize {
        self.stages.iter().map(|s| s.unmatched).sum()
    }

    pub fn warnings(&self) -> usize {
        self.stages.iter().map(|s| s.warnings).sum()
    }

    pub fn stage(&self, level: u32) -> Option<&StageMetrics> {
        self.stages.iter().find(|s| s.level == level)
    }
}
