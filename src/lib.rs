//! Rule-expression keyword classification with a cascading, multi-level
//! pipeline.
//!
//! Two entry points:
//!
//! - [`classify`]: match a keyword list against a flat list of rule
//!   expressions (first match wins).
//! - [`Pipeline`]: run leveled workflow rules stage by stage, each stage
//!   reading the previous stage's output from a [`StageStore`].

extern crate self as kwcascade;

#[macro_use]
mod macros;
mod api;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod expr;
pub mod model;
pub mod pipeline;
pub mod rules;

pub use api::{FlatClassification, classify, classify_with_sink, run_pipeline};
pub use config::Options;
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Diagnostics, FnSink, Severity};
pub use engine::{CompiledRules, KeywordMatch, RunMetrics, StageMetrics};
pub use error::{ClassificationError, Result, RuleSyntaxError, StoreError};
pub use model::{
    ClassificationResult, ClassifiedKeyword, KeywordBatch, StageOutcome, StageStatus, UnmatchedKeyword,
    matched_rule_column,
};
pub use pipeline::{
    MemoryStore, OutputHandle, OutputRecord, Phase, Pipeline, PipelineState, RunReport, StageRow, StageStore,
};
pub use rules::{RequiredFields, Rule, RuleQuery, RuleSet, expand_wildcards};

/// `next_level` value that ends a run.
pub const TERMINAL_LEVEL: u32 = 9999;

/// Default wildcard bucket/sheet value: "every one discovered so far".
pub const WILDCARD: &str = "全";
/// Default bucket for seed keywords no level-1 rule matched.
pub const UNMATCHED_BUCKET: &str = "未分类关键词";
/// Default sheet for keywords unmatched at level 2 and beyond.
pub const UNMATCHED_SHEET: &str = "未匹配关键词";
/// Default sheet holding each stage-1 bucket's keywords.
pub const SEED_SHEET: &str = "Sheet1";
