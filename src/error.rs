//! Error types for the classifier and the staged pipeline.
//!
//! Only unrecoverable conditions live here. Per-rule and per-scope anomalies
//! (a rule that fails to parse, a scope with no rules or no rows) are reported
//! through a [`DiagnosticSink`](crate::DiagnosticSink) and never surface as an
//! `Err`.

use std::fmt;

/// A rule expression that could not be parsed.
///
/// `position` is a char offset into `rule`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSyntaxError {
    pub rule: String,
    pub position: usize,
    pub reason: String,
}

impl RuleSyntaxError {
    pub(crate) fn new(rule: &str, position: usize, reason: impl Into<String>) -> Self {
        Self { rule: rule.to_string(), position, reason: reason.into() }
    }
}

impl fmt::Display for RuleSyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule '{}' failed to parse at {}: {}", self.rule, self.position, self.reason)
    }
}

impl std::error::Error for RuleSyntaxError {}

/// Failures reported by a [`StageStore`](crate::StageStore) implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no stage output for handle {0}")]
    UnknownHandle(String),

    #[error("output {handle} has no sheet named {sheet}")]
    MissingSheet { handle: String, sheet: String },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("rule syntax error: {0}")]
    RuleSyntax(#[from] RuleSyntaxError),

    /// A rule or keyword batch violates a required-field or uniqueness invariant.
    #[error("schema validation failed: {}", .problems.join("; "))]
    SchemaValidation { problems: Vec<String> },

    /// A recorded match refers to a rule the stage never compiled, or a
    /// parent expression has no match at the previous level.
    #[error("consistency error at level {level}: {message}")]
    Consistency { level: u32, message: String },

    #[error("level {level} produced no matched output")]
    EmptyOutput { level: u32 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClassificationError {
    pub(crate) fn schema(problem: impl Into<String>) -> Self {
        Self::SchemaValidation { problems: vec![problem.into()] }
    }

    pub(crate) fn consistency(level: u32, message: impl Into<String>) -> Self {
        Self::Consistency { level, message: message.into() }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, ClassificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_errors_join_all_problems() {
        let err = ClassificationError::SchemaValidation { problems: vec!["a".into(), "b".into()] };
        assert_eq!(err.to_string(), "schema validation failed: a; b");
    }

    #[test]
    fn syntax_error_display_names_rule_and_position() {
        let err = RuleSyntaxError::new("a+", 2, "expected a term");
        assert_eq!(err.to_string(), "rule 'a+' failed to parse at 2: expected a term");
    }
}
