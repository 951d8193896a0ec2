//! Staged classification pipeline.
//!
//! A run walks the levels declared by the rule set in order. Each stage reads
//! what the previous stage wrote to the [`StageStore`], classifies it against
//! the rules of its level scoped to the bucket / sheet / parent being
//! processed, and writes (or annotates) the result for the next stage.
//!
//! ```text
//! seed ── KeywordBatch::seed ── stage 1 ── write bucket/Sheet1 ─┐
//!                                                                │
//!              ┌──────────── read bucket/Sheet1 ─────────────────┘
//!              v
//!           stage 2 ── write bucket/<sheet> ───────────────────┐
//!                                                                │
//!              ┌──────────── read bucket/<sheet> ────────────────┘
//!              v
//!           stage 3 ── annotate 阶段3 + tag
//!              │
//!           stage N>3 ── filter rows on 阶段{N-1} ∈ parents ── annotate 阶段N
//! ```
//!
//! The parts:
//!
//! - `state.rs`: [`PipelineState`], the explicit level state machine.
//! - `store.rs`: the [`StageStore`] boundary and [`MemoryStore`].
//! - `stages.rs`: what each stage does.

#[path = "pipeline/stages.rs"]
mod stages;
#[path = "pipeline/state.rs"]
mod state;
#[path = "pipeline/store.rs"]
mod store;

pub use state::{Phase, PipelineState};
pub use store::{MemoryStore, OutputHandle, OutputRecord, StageRow, StageStore};

use crate::config::Options;
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Diagnostics, Severity, Tee, TraceSink};
use crate::engine::RunMetrics;
use crate::error::{ClassificationError, Result};
use crate::model::{ClassificationResult, KeywordBatch, StageOutcome, StageStatus};
use crate::rules::RuleSet;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::time::Instant;

/// Everything a run produced, whether it finished or not.
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    /// One outcome per stage that ran (or a single warning for an empty seed).
    pub outcomes: Vec<StageOutcome>,
    /// Level -> what that stage classified.
    pub results: BTreeMap<u32, ClassificationResult>,
    pub diagnostics: Diagnostics,
    pub metrics: RunMetrics,
    /// The fatal error behind a `fail` outcome.
    pub error: Option<ClassificationError>,
}

impl RunReport {
    pub fn last_outcome(&self) -> Option<&StageOutcome> {
        self.outcomes.last()
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.outcomes.iter().all(|o| o.status != StageStatus::Fail)
    }

    pub fn result(&self, level: u32) -> Option<&ClassificationResult> {
        self.results.get(&level)
    }
}

/// A validated rule set plus run options.
#[derive(Debug, Clone)]
pub struct Pipeline {
    rules: RuleSet,
    options: Options,
}

impl Pipeline {
    /// Pair `rules` with `options`, rejecting combinations no run could use:
    /// a rule set without level-1 rules, or level-2 rules whose target sheet
    /// is the wildcard (stage 2 creates sheets, it has none to expand into).
    pub fn new(rules: RuleSet, options: Options) -> Result<Self> {
        options.validate()?;
        if rules.at_level(1).is_empty() {
            return Err(ClassificationError::schema("rule set has no level-1 rules"));
        }
        let problems: Vec<String> = rules
            .at_level(2)
            .into_iter()
            .filter(|r| r.target_sheet.as_deref() == Some(options.wildcard.as_str()))
            .map(|r| {
                format!(
                    "rule '{}' (level 2, bucket '{}'): target_sheet cannot be the wildcard '{}'",
                    r.expression, r.output_bucket, options.wildcard
                )
            })
            .collect();
        if !problems.is_empty() {
            return Err(ClassificationError::SchemaValidation { problems });
        }
        Ok(Self { rules, options })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn max_level(&self) -> u32 {
        self.rules.max_level()
    }

    /// Run every stage over `seed`, persisting through `store`.
    ///
    /// Never returns early with an error: a fatal condition ends the run with
    /// a `fail` outcome and the error kept in [`RunReport::error`].
    pub fn run<I, S>(&self, seed: I, store: &mut dyn StageStore) -> RunReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_with_sink(seed, store, &mut TraceSink)
    }

    /// [`Pipeline::run`], handing every diagnostic to `sink` as it is
    /// reported. The report still carries the full list.
    pub fn run_with_sink<I, S>(&self, seed: I, store: &mut dyn StageStore, sink: &mut dyn DiagnosticSink) -> RunReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let started_at = Local::now();
        let clock = Instant::now();
        let mut report = RunReport {
            started_at,
            outcomes: Vec::new(),
            results: BTreeMap::new(),
            diagnostics: Diagnostics::new(),
            metrics: RunMetrics::default(),
            error: None,
        };
        let mut sink = Tee::new(sink);

        let batch = KeywordBatch::seed(seed, &mut sink);
        let mut state = PipelineState::new(self.max_level());
        tracing::info!(keywords = batch.len(), max_level = state.max_level(), "pipeline started");

        if batch.is_empty() {
            let message = "seed keyword list is empty after cleaning";
            sink.report(Diagnostic::warning(DiagnosticKind::StageProgress, message));
            report.outcomes.push(state.abandon(message));
            report.diagnostics = sink.into_collected();
            report.metrics.total = clock.elapsed();
            return report;
        }

        let mut runner = stages::StageRunner::new(&self.rules, &self.options, store);
        state.start();
        while let Phase::Stage(level) = state.phase() {
            let stage_clock = Instant::now();
            let warnings_before = sink.collected().count(Severity::Warning);
            let span = tracing::info_span!("stage", level);
            let _enter = span.enter();

            match runner.run_stage(level, &batch, &mut sink) {
                Ok(mut run) => {
                    run.metrics.duration = stage_clock.elapsed();
                    run.metrics.warnings = sink.collected().count(Severity::Warning) - warnings_before;
                    let message = format!(
                        "level {level}: {} matched, {} unmatched, {} outputs",
                        run.metrics.matched, run.metrics.unmatched, run.outputs
                    );
                    tracing::info!(matched = run.metrics.matched, outputs = run.outputs, "stage complete");
                    sink.report(Diagnostic::info(DiagnosticKind::StageProgress, &message).at_level(level));
                    report.metrics.stages.push(run.metrics);
                    report.results.insert(level, run.result);
                    report.outcomes.push(state.complete(message));
                }
                Err(err) => {
                    tracing::error!(error = %err, "stage failed");
                    sink.report(Diagnostic::error(DiagnosticKind::StageProgress, err.to_string()).at_level(level));
                    report.outcomes.push(state.fail(err.to_string()));
                    report.error = Some(err);
                }
            }
        }

        report.diagnostics = sink.into_collected();
        report.metrics.total = clock.elapsed();
        tracing::info!(stages = report.outcomes.len(), elapsed = ?report.metrics.total, "pipeline finished");
        report
    }
}
