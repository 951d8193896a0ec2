//! Rule compilation.
//!
//! Matching is split into two phases:
//!
//! 1. **Compile** (this module): parse every rule text into a [`Predicate`],
//!    dropping the ones that do not parse.
//! 2. **Run** (see `classify.rs`): test keywords against the compiled list in
//!    declared order.
//!
//! ## Invariants
//!
//! - `CompiledRules::rules` keeps the order the texts were given in, minus the
//!   rules that failed to compile.

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::error::RuleSyntaxError;
use crate::expr::{self, Predicate};

#[derive(Debug)]
pub struct CompiledRule {
    pub text: String,
    pub predicate: Predicate,
}

/// Compiled, ordered rule list for one matching scope.
#[derive(Debug)]
pub struct CompiledRules {
    pub(crate) rules: Vec<CompiledRule>,
    pub(crate) errors: Vec<RuleSyntaxError>,
    case_sensitive: bool,
}

impl CompiledRules {
    /// Compile `texts` in order.
    ///
    /// A text that fails to parse is reported to `sink` and left out; the
    /// remaining rules keep their relative order.
    pub fn new<I, S>(texts: I, case_sensitive: bool, sink: &mut dyn DiagnosticSink) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        let mut errors = Vec::new();

        for text in texts {
            let text = text.as_ref();
            match expr::compile(text, case_sensitive) {
                Ok(predicate) => {
                    rules.push(CompiledRule { text: text.to_string(), predicate });
                }
                Err(err) => {
                    sink.report(Diagnostic::error(DiagnosticKind::RuleSyntax, err.to_string()));
                    errors.push(err);
                }
            }
        }

        tracing::debug!(compiled = rules.len(), failed = errors.len(), case_sensitive, "rules compiled");
        CompiledRules { rules, errors, case_sensitive }
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Rules that failed to compile, in input order.
    pub fn errors(&self) -> &[RuleSyntaxError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.text.as_str())
    }
}
