use super::store::{OutputHandle, OutputRecord, StageRow, StageStore};
use crate::config::Options;
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::engine::{CompiledRules, StageMetrics};
use crate::error::{ClassificationError, Result};
use crate::model::{ClassificationResult, ClassifiedKeyword, KeywordBatch, UnmatchedKeyword};
use crate::rules::{Rule, RuleSet, expand_wildcards};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

/// What one stage produced.
pub(crate) struct StageRun {
    pub result: ClassificationResult,
    /// Outputs newly written or annotated with matches.
    pub outputs: usize,
    pub metrics: StageMetrics,
}

/// The slice of keywords and rules a matching pass runs over.
#[derive(Debug, Clone, Copy, Default)]
struct Scope<'s> {
    bucket: Option<&'s str>,
    sheet: Option<&'s str>,
    parent: Option<&'s str>,
}

impl fmt::Display for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(b) = self.bucket {
            parts.push(format!("bucket '{b}'"));
        }
        if let Some(s) = self.sheet {
            parts.push(format!("sheet '{s}'"));
        }
        if let Some(p) = self.parent {
            parts.push(format!("parent '{p}'"));
        }
        if parts.is_empty() { f.write_str("seed keywords") } else { f.write_str(&parts.join(" / ")) }
    }
}

pub(crate) struct StageRunner<'a> {
    rules: &'a RuleSet,
    options: &'a Options,
    store: &'a mut dyn StageStore,
    /// Bucket -> output written by stage 1.
    outputs: BTreeMap<String, OutputHandle>,
    /// Bucket -> sheets stage 2 wrote matched keywords to. These are the only
    /// scopes later stages see.
    produced: BTreeMap<String, Vec<String>>,
}

impl<'a> StageRunner<'a> {
    pub fn new(rules: &'a RuleSet, options: &'a Options, store: &'a mut dyn StageStore) -> Self {
        Self { rules, options, store, outputs: BTreeMap::new(), produced: BTreeMap::new() }
    }

    pub fn run_stage(&mut self, level: u32, seed: &KeywordBatch, sink: &mut dyn DiagnosticSink) -> Result<StageRun> {
        match level {
            1 => self.seed_stage(seed, sink),
            2 => self.sheet_stage(sink),
            _ => self.refine_stage(level, sink),
        }
    }

    /// Level 1: route the seed keywords into buckets.
    fn seed_stage(&mut self, seed: &KeywordBatch, sink: &mut dyn DiagnosticSink) -> Result<StageRun> {
        let mut metrics = StageMetrics { level: 1, ..StageMetrics::default() };
        let rules = self.rules.at_level(1);
        let result = self.classify_scope(1, Scope::default(), &rules, seed, sink, &mut metrics)?;
        if !result.has_matches() {
            return Err(ClassificationError::EmptyOutput { level: 1 });
        }

        let mut outputs = 0;
        for (bucket, keywords) in result.group_by_bucket() {
            let records: Vec<OutputRecord> = keywords.into_iter().cloned().map(OutputRecord::Classified).collect();
            let handle = self.store.write_sheet(bucket, &self.options.seed_sheet, &records)?;
            tracing::debug!(bucket, handle = %handle, rows = records.len(), "bucket written");
            self.outputs.insert(bucket.to_string(), handle);
            outputs += 1;
        }
        self.write_unmatched(&result)?;

        Ok(StageRun { result, outputs, metrics })
    }

    /// Level 2: split each bucket's keywords into named sheets.
    fn sheet_stage(&mut self, sink: &mut dyn DiagnosticSink) -> Result<StageRun> {
        let mut metrics = StageMetrics { level: 2, ..StageMetrics::default() };
        let discovered = self.discovered(2);
        let rules = self.expanded_rules(2, &discovered, sink);
        let rules = self.drop_reserved_targets(rules, sink);

        let mut result = ClassificationResult::default();
        let outputs = self.outputs.clone();
        for (bucket, handle) in &outputs {
            let scope = Scope { bucket: Some(bucket.as_str()), ..Scope::default() };
            let scope_rules: Vec<&Rule> = rules.iter().filter(|r| r.output_bucket == *bucket).collect();
            if scope_rules.is_empty() {
                skip_scope(2, scope, "no rules", sink, &mut metrics);
                continue;
            }

            let seed_sheet = self.options.seed_sheet.as_str();
            let rows = self.store.read_sheet(handle, seed_sheet)?;
            let keywords = rows.iter().map(|r| r.keyword.as_str());
            let batch = KeywordBatch::new(keywords, Some(bucket.as_str()), Some(seed_sheet), 2, sink)?;
            if batch.is_empty() {
                skip_scope(2, scope, "no keywords", sink, &mut metrics);
                continue;
            }

            result.extend(self.classify_scope(2, scope, &scope_rules, &batch, sink, &mut metrics)?);
        }

        let mut written = 0;
        for ((bucket, sheet), keywords) in result.group_by_bucket_and_sheet() {
            let records: Vec<OutputRecord> = keywords.into_iter().cloned().map(OutputRecord::Classified).collect();
            self.store.write_sheet(bucket, sheet, &records)?;
            tracing::debug!(bucket, sheet, rows = records.len(), "sheet written");
            self.produced.entry(bucket.to_string()).or_default().push(sheet.to_string());
            written += 1;
        }
        self.write_unmatched(&result)?;

        if written == 0 {
            return Err(ClassificationError::EmptyOutput { level: 2 });
        }
        Ok(StageRun { result, outputs: written, metrics })
    }

    /// Level 3 and beyond: tag the rows of every (bucket, sheet), and past
    /// level 3 only the rows whose previous-level match is a declared parent.
    fn refine_stage(&mut self, level: u32, sink: &mut dyn DiagnosticSink) -> Result<StageRun> {
        let mut metrics = StageMetrics { level, ..StageMetrics::default() };
        let discovered = self.discovered(level);
        let rules = self.expanded_rules(level, &discovered, sink);

        let mut scopes: Vec<(&str, &str, OutputHandle, Vec<StageRow>)> = Vec::new();
        for (bucket, sheets) in &discovered {
            let Some(handle) = self.outputs.get(bucket).cloned() else { continue };
            for sheet in sheets {
                let rows = self.store.read_sheet(&handle, sheet)?;
                scopes.push((bucket.as_str(), sheet.as_str(), handle.clone(), rows));
            }
        }

        let parents: Vec<Option<&str>> = if level > 3 {
            let declared = distinct_parents(&rules);
            let previous = level - 1;
            let seen: HashSet<&str> =
                scopes.iter().flat_map(|(_, _, _, rows)| rows.iter().filter_map(|r| r.matched_at(previous))).collect();
            if let Some(missing) = declared.iter().find(|p| !seen.contains(**p)) {
                return Err(ClassificationError::consistency(
                    level,
                    format!("parent rule '{missing}' matched no keyword at level {previous}"),
                ));
            }
            declared.into_iter().map(Some).collect()
        } else {
            vec![None]
        };

        let mut result = ClassificationResult::default();
        let mut annotated = 0;
        for (bucket, sheet, handle, rows) in &scopes {
            for parent in &parents {
                let scope = Scope { bucket: Some(*bucket), sheet: Some(*sheet), parent: *parent };
                let scope_rules: Vec<&Rule> = rules
                    .iter()
                    .filter(|r| r.output_bucket == *bucket && r.target_sheet.as_deref() == Some(*sheet))
                    .filter(|r| parent.is_none() || r.parent_expression.as_deref() == *parent)
                    .collect();
                if scope_rules.is_empty() {
                    skip_scope(level, scope, "no rules", sink, &mut metrics);
                    continue;
                }

                let eligible = rows
                    .iter()
                    .filter(|r| parent.is_none() || r.matched_at(level - 1) == *parent)
                    .map(|r| r.keyword.as_str());
                let batch = KeywordBatch::new(eligible, Some(*bucket), Some(*sheet), level, sink)?;
                if batch.is_empty() {
                    skip_scope(level, scope, "no keywords", sink, &mut metrics);
                    continue;
                }

                let scope_result = self.classify_scope(level, scope, &scope_rules, &batch, sink, &mut metrics)?;
                if scope_result.has_matches() {
                    self.store.annotate(handle, sheet, level, &scope_result.matched)?;
                    annotated += 1;
                }
                result.extend(scope_result);
            }
        }

        if annotated == 0 {
            return Err(ClassificationError::EmptyOutput { level });
        }
        Ok(StageRun { result, outputs: annotated, metrics })
    }

    /// Compile `rules`, classify `batch`, and map every match back to the
    /// rule that produced it.
    fn classify_scope(
        &self,
        level: u32,
        scope: Scope<'_>,
        rules: &[&Rule],
        batch: &KeywordBatch,
        sink: &mut dyn DiagnosticSink,
        metrics: &mut StageMetrics,
    ) -> Result<ClassificationResult> {
        let compiled = CompiledRules::new(rules.iter().map(|r| r.expression.as_str()), self.options.case_sensitive, sink);
        metrics.scopes += 1;
        metrics.keywords += batch.len();
        metrics.rules_compiled += compiled.len();
        metrics.rule_errors += compiled.errors().len();

        let mut by_expression: HashMap<&str, &Rule> = HashMap::new();
        for &rule in rules {
            by_expression.entry(rule.expression.as_str()).or_insert(rule);
        }

        let mut result = ClassificationResult::default();
        for m in compiled.classify(batch.keywords()) {
            match m.matched {
                Some(text) => {
                    let rule = by_expression.get(text.as_str()).copied().ok_or_else(|| {
                        ClassificationError::consistency(
                            level,
                            format!("keyword '{}' matched '{text}', which is not a rule of {scope}", m.keyword),
                        )
                    })?;
                    result.matched.push(self.classified(m.keyword, text, level, rule));
                }
                None => result.unmatched.push(UnmatchedKeyword::route(&m.keyword, batch, self.options)),
            }
        }

        metrics.matched += result.matched.len();
        metrics.unmatched += result.unmatched.len();
        tracing::debug!(level, %scope, matched = result.matched.len(), unmatched = result.unmatched.len(), "scope classified");
        Ok(result)
    }

    fn classified(&self, keyword: String, matched_rule: String, level: u32, rule: &Rule) -> ClassifiedKeyword {
        ClassifiedKeyword {
            keyword,
            matched_rule,
            level,
            bucket: rule.output_bucket.clone(),
            sheet: rule.target_sheet.clone().unwrap_or_else(|| self.options.seed_sheet.clone()),
            tag: if level >= 3 { rule.tag.clone() } else { None },
            parent: if level > 3 { rule.parent_expression.clone() } else { None },
        }
    }

    /// Bucket -> sheets a stage fans out over. Stage 2 reads each bucket's
    /// seed sheet; later stages only the sheets stage 2 filled with matches,
    /// so keywords routed to an unmatched sheet are never classified again.
    fn discovered(&self, level: u32) -> BTreeMap<String, Vec<String>> {
        if level <= 2 {
            self.outputs.keys().map(|bucket| (bucket.clone(), vec![self.options.seed_sheet.clone()])).collect()
        } else {
            self.produced.clone()
        }
    }

    fn expanded_rules(
        &self,
        level: u32,
        discovered: &BTreeMap<String, Vec<String>>,
        sink: &mut dyn DiagnosticSink,
    ) -> Vec<Rule> {
        let rules = self.rules.at_level(level);
        let expanded = expand_wildcards(&rules, discovered, &self.options.wildcard, sink);
        tracing::debug!(level, declared = rules.len(), expanded = expanded.len(), "rules expanded");
        expanded
    }

    /// Level-2 rules write whole sheets, so they may not target the sheets the
    /// pipeline itself owns.
    fn drop_reserved_targets(&self, rules: Vec<Rule>, sink: &mut dyn DiagnosticSink) -> Vec<Rule> {
        let reserved = [self.options.seed_sheet.as_str(), self.options.unmatched_sheet.as_str()];
        rules
            .into_iter()
            .filter(|r| {
                let target = r.target_sheet.as_deref().unwrap_or("");
                if reserved.contains(&target) {
                    sink.report(
                        Diagnostic::warning(
                            DiagnosticKind::ReservedSheet,
                            format!("rule '{}' in bucket '{}' targets reserved sheet '{target}'", r.expression, r.output_bucket),
                        )
                        .at_level(2),
                    );
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    fn write_unmatched(&mut self, result: &ClassificationResult) -> Result<()> {
        for ((bucket, sheet), keywords) in result.unmatched_by_bucket_and_sheet() {
            let records: Vec<OutputRecord> = keywords.into_iter().cloned().map(OutputRecord::Unmatched).collect();
            self.store.write_sheet(bucket, sheet, &records)?;
            tracing::debug!(bucket, sheet, rows = records.len(), "unmatched written");
        }
        Ok(())
    }
}

fn distinct_parents(rules: &[Rule]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    rules.iter().filter_map(|r| r.parent_expression.as_deref()).filter(|p| seen.insert(*p)).collect()
}

fn skip_scope(level: u32, scope: Scope<'_>, reason: &str, sink: &mut dyn DiagnosticSink, metrics: &mut StageMetrics) {
    metrics.skipped_scopes += 1;
    sink.report(Diagnostic::warning(DiagnosticKind::ScopeEmpty, format!("{scope}: {reason}, skipped")).at_level(level));
}
