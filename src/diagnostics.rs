//! Recoverable anomalies collected while compiling rules and running stages.
//!
//! Anything that should not stop a batch (a rule that does not parse, a scope
//! with nothing to classify, a wildcard with no concrete target) is reported
//! here instead of being returned as an error. Every report is mirrored to
//! `tracing` so a subscriber sees the same stream.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// A rule expression failed to parse and was skipped.
    RuleSyntax,
    /// A bucket/sheet/parent scope had no rules or no input rows.
    ScopeEmpty,
    /// A wildcard rule had nothing discovered to expand into.
    WildcardUnresolved,
    /// Invisible or control characters were stripped from a keyword or rule.
    Sanitized,
    /// A level-2 rule targets the seed or unmatched sheet and was dropped.
    ReservedSheet,
    StageProgress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub level: Option<u32>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self { severity, kind, level: None, message: message.into() }
    }

    pub fn at_level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, kind, message)
    }

    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, kind, message)
    }

    pub fn info(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, kind, message)
    }

    fn trace(&self) {
        let level = self.level.unwrap_or(0);
        match self.severity {
            Severity::Info => tracing::debug!(kind = ?self.kind, level, "{}", self.message),
            Severity::Warning => tracing::warn!(kind = ?self.kind, level, "{}", self.message),
            Severity::Error => tracing::error!(kind = ?self.kind, level, "{}", self.message),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            Some(level) => write!(f, "[{}] level {}: {}", self.severity.as_str(), level, self.message),
            None => write!(f, "[{}] {}", self.severity.as_str(), self.message),
        }
    }
}

/// Receiver for recoverable anomalies.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// Ordered in-memory sink.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|d| d.severity == severity).count()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.kind == kind)
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}

impl DiagnosticSink for Diagnostics {
    fn report(&mut self, diagnostic: Diagnostic) {
        diagnostic.trace();
        self.entries.push(diagnostic);
    }
}

/// Adapts a closure into a sink, for callers that forward reports elsewhere
/// (a UI log pane, a channel).
pub struct FnSink<F>(pub F);

impl<F: FnMut(&Diagnostic)> DiagnosticSink for FnSink<F> {
    fn report(&mut self, diagnostic: Diagnostic) {
        diagnostic.trace();
        (self.0)(&diagnostic);
    }
}

/// Sink that only emits the tracing event.
pub(crate) struct TraceSink;

impl DiagnosticSink for TraceSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        diagnostic.trace();
    }
}

/// Keeps a copy of every report and passes the report on to `forward` as it
/// arrives.
pub(crate) struct Tee<'a> {
    collected: Diagnostics,
    forward: &'a mut dyn DiagnosticSink,
}

impl<'a> Tee<'a> {
    pub(crate) fn new(forward: &'a mut dyn DiagnosticSink) -> Self {
        Self { collected: Diagnostics::new(), forward }
    }

    pub(crate) fn collected(&self) -> &Diagnostics {
        &self.collected
    }

    pub(crate) fn into_collected(self) -> Diagnostics {
        self.collected
    }
}

impl DiagnosticSink for Tee<'_> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.collected.entries.push(diagnostic.clone());
        self.forward.report(diagnostic);
    }
}
