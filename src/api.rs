use crate::config::Options;
use crate::diagnostics::{DiagnosticSink, Diagnostics, Tee, TraceSink};
use crate::engine::{CompiledRules, KeywordMatch};
use crate::error::{Result, RuleSyntaxError};
use crate::model::{KeywordBatch, clean_texts};
use crate::pipeline::{Pipeline, RunReport, StageStore};
use crate::rules::RuleSet;
use std::time::{Duration, Instant};

/// Result from [`classify`].
#[derive(Debug, Clone)]
pub struct FlatClassification {
    /// One entry per cleaned keyword, in input order.
    pub matches: Vec<KeywordMatch>,
    /// Matched label per keyword (empty when nothing matched), joined with
    /// the configured separator.
    pub labels: Vec<String>,
    /// Rules that failed to parse and were skipped.
    pub errors: Vec<RuleSyntaxError>,
    pub diagnostics: Diagnostics,
    pub elapsed: Duration,
}

impl FlatClassification {
    pub fn matched(&self) -> impl Iterator<Item = &KeywordMatch> {
        self.matches.iter().filter(|m| m.is_match())
    }

    pub fn unmatched(&self) -> impl Iterator<Item = &KeywordMatch> {
        self.matches.iter().filter(|m| !m.is_match())
    }

    /// Label assigned to `keyword`, if it was part of the batch.
    pub fn label_of(&self, keyword: &str) -> Option<&str> {
        self.matches.iter().position(|m| m.keyword == keyword).map(|i| self.labels[i].as_str())
    }
}

/// Classify `keywords` against a flat, ordered list of rule expressions.
///
/// Rule texts are cleaned the same way keywords are (invisible characters
/// stripped, trimmed, empties and repeats dropped) before compiling. A rule
/// that fails to parse is skipped and listed in
/// [`FlatClassification::errors`].
///
/// # Example
/// ```
/// use kwcascade::{Options, classify};
///
/// let out = classify(["redapple", "banana"], ["apple"], &Options::default()).unwrap();
/// assert_eq!(out.labels, vec!["apple".to_string(), String::new()]);
/// ```
pub fn classify<K, KS, R, RS>(keywords: K, expressions: R, options: &Options) -> Result<FlatClassification>
where
    K: IntoIterator<Item = KS>,
    KS: AsRef<str>,
    R: IntoIterator<Item = RS>,
    RS: AsRef<str>,
{
    classify_with_sink(keywords, expressions, options, &mut TraceSink)
}

/// [`classify`], with every diagnostic also passed to `sink` as it is
/// raised. [`FlatClassification::diagnostics`] still holds the full list.
pub fn classify_with_sink<K, KS, R, RS>(
    keywords: K,
    expressions: R,
    options: &Options,
    sink: &mut dyn DiagnosticSink,
) -> Result<FlatClassification>
where
    K: IntoIterator<Item = KS>,
    KS: AsRef<str>,
    R: IntoIterator<Item = RS>,
    RS: AsRef<str>,
{
    options.validate()?;
    let clock = Instant::now();
    let mut sink = Tee::new(sink);

    let texts = clean_texts(expressions, None, &mut sink);
    let compiled = CompiledRules::new(&texts, options.case_sensitive, &mut sink);
    let batch = KeywordBatch::seed(keywords, &mut sink);

    let matches = compiled.classify(batch.keywords());
    let labels = matches.iter().map(|m| m.label(&options.separator)).collect();
    let errors = compiled.errors().to_vec();
    tracing::debug!(keywords = batch.len(), rules = compiled.len(), failed = errors.len(), "flat classification");

    Ok(FlatClassification { matches, labels, errors, diagnostics: sink.into_collected(), elapsed: clock.elapsed() })
}

/// Validate `options` against `rules` and run the staged pipeline over
/// `seed`.
///
/// Setup problems (bad options, no level-1 rules) are returned as `Err`;
/// anything that goes wrong once stages are running is in the report.
pub fn run_pipeline<I, S>(rules: RuleSet, seed: I, options: Options, store: &mut dyn StageStore) -> Result<RunReport>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let pipeline = Pipeline::new(rules, options)?;
    Ok(pipeline.run(seed, store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassificationError, Diagnostic, DiagnosticKind, FnSink, MemoryStore, Rule};

    #[test]
    fn flat_labels_follow_first_match() {
        let out = classify(
            ["redapple", "greenapple", "banana", "apple pie"],
            ["apple+pie", "apple", "banana"],
            &Options::default(),
        )
        .unwrap();

        let labels: Vec<&str> = out.labels.iter().map(String::as_str).collect();
        assert_eq!(labels, vec!["apple", "apple", "banana", "apple+pie"]);
        assert_eq!(out.matched().count(), 4);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn bad_rules_are_listed_and_skipped() {
        let out = classify(["apple", "pear"], ["(apple", "pear", "a+"], &Options::default()).unwrap();
        assert_eq!(out.errors.len(), 2);
        assert_eq!(out.errors[0].rule, "(apple");
        assert_eq!(out.label_of("apple"), Some(""));
        assert_eq!(out.label_of("pear"), Some("pear"));
        assert_eq!(out.diagnostics.of_kind(DiagnosticKind::RuleSyntax).count(), 2);
    }

    #[test]
    fn sink_sees_each_diagnostic_as_it_is_raised() {
        let mut seen = Vec::new();
        let out = {
            let mut sink = FnSink(|d: &Diagnostic| seen.push(d.kind));
            classify_with_sink(["apple\u{200B}"], ["(apple", "apple"], &Options::default(), &mut sink).unwrap()
        };
        assert_eq!(seen, vec![DiagnosticKind::RuleSyntax, DiagnosticKind::Sanitized]);
        let collected: Vec<DiagnosticKind> = out.diagnostics.entries().iter().map(|d| d.kind).collect();
        assert_eq!(collected, seen);
        assert_eq!(out.label_of("apple"), Some("apple"));
    }

    #[test]
    fn rule_texts_are_cleaned_before_compiling() {
        let out = classify(["apple"], ["  apple\u{200B} ", "apple", ""], &Options::default()).unwrap();
        assert_eq!(out.labels, vec!["apple".to_string()]);
        assert_eq!(out.diagnostics.of_kind(DiagnosticKind::Sanitized).count(), 1);
    }

    #[test]
    fn keywords_are_cleaned_and_deduplicated() {
        let out = classify(["kiwi", " kiwi ", "", "\u{FEFF}kiwi"], ["kiwi"], &Options::default()).unwrap();
        assert_eq!(out.matches.len(), 1);
    }

    #[test]
    fn case_sensitivity_applies_to_every_rule() {
        let insensitive = classify(["Apple"], ["apple"], &Options::default()).unwrap();
        assert_eq!(insensitive.unmatched().count(), 0);

        let sensitive = classify(["Apple"], ["apple"], &Options::default().with_case_sensitive(true)).unwrap();
        assert_eq!(sensitive.unmatched().count(), 1);
    }

    #[test]
    fn invalid_separator_is_rejected() {
        let opts = Options { separator: String::new(), ..Options::default() };
        assert!(matches!(classify(["a"], ["a"], &opts), Err(ClassificationError::Config(_))));
    }

    #[test]
    fn run_pipeline_rejects_missing_level_one() {
        let rules = RuleSet::new(vec![Rule::seed("S2", "red", "fruit").at_level(2).with_sheet("red")]).unwrap();
        let mut store = MemoryStore::new();
        let err = run_pipeline(rules, ["red apple"], Options::default(), &mut store).unwrap_err();
        assert!(matches!(err, ClassificationError::SchemaValidation { .. }));
    }

    #[test]
    fn run_pipeline_returns_the_report() {
        let rules = RuleSet::new(vec![Rule::seed("S1", "apple", "fruit")]).unwrap();
        let mut store = MemoryStore::new();
        let report = run_pipeline(rules, ["apple"], Options::default(), &mut store).unwrap();
        assert!(report.succeeded());
        assert_eq!(store.keywords("fruit", "Sheet1"), vec!["apple"]);
    }
}
