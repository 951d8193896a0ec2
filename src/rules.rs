//! Workflow rules: loading, validation, queries and wildcard expansion.

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Diagnostics};
use crate::error::{ClassificationError, Result};
use crate::model::sanitize_reported;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

/// One classification directive.
///
/// Field aliases accept the column names used by existing rule workbooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub level: u32,
    #[serde(alias = "source_sheet_name")]
    pub source_group: String,
    #[serde(alias = "rule")]
    pub expression: String,
    #[serde(alias = "output_name")]
    pub output_bucket: String,
    #[serde(default, alias = "classified_sheet_name")]
    pub target_sheet: Option<String>,
    #[serde(default, alias = "rule_tag")]
    pub tag: Option<String>,
    #[serde(default, alias = "parent_rule")]
    pub parent_expression: Option<String>,
}

bitflags::bitflags! {
    /// Optional rule fields that become mandatory as the level rises.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequiredFields: u8 {
        const TARGET_SHEET = 1 << 0;
        const TAG          = 1 << 1;
        const PARENT       = 1 << 2;
    }
}

impl RequiredFields {
    pub fn for_level(level: u32) -> Self {
        let mut req = RequiredFields::empty();
        if level > 1 {
            req |= RequiredFields::TARGET_SHEET;
        }
        if level >= 3 {
            req |= RequiredFields::TAG;
        }
        if level > 3 {
            req |= RequiredFields::PARENT;
        }
        req
    }
}

impl Rule {
    /// Convenience constructor for a level-1 rule.
    pub fn seed(source_group: &str, expression: &str, output_bucket: &str) -> Self {
        Self {
            level: 1,
            source_group: source_group.to_string(),
            expression: expression.to_string(),
            output_bucket: output_bucket.to_string(),
            target_sheet: None,
            tag: None,
            parent_expression: None,
        }
    }

    pub fn with_sheet(mut self, sheet: &str) -> Self {
        self.target_sheet = Some(sheet.to_string());
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent_expression = Some(parent.to_string());
        self
    }

    pub fn at_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn present_fields(&self) -> RequiredFields {
        let mut present = RequiredFields::empty();
        present.set(RequiredFields::TARGET_SHEET, self.target_sheet.is_some());
        present.set(RequiredFields::TAG, self.tag.is_some());
        present.set(RequiredFields::PARENT, self.parent_expression.is_some());
        present
    }

    /// Fields required at this rule's level but left unset.
    pub fn missing_fields(&self) -> RequiredFields {
        RequiredFields::for_level(self.level) - self.present_fields()
    }

    /// Identity used for the load-time uniqueness check.
    pub fn unique_key(&self) -> (&str, &str, &str, &str) {
        (
            &self.output_bucket,
            &self.expression,
            self.target_sheet.as_deref().unwrap_or(""),
            self.tag.as_deref().unwrap_or(""),
        )
    }

    fn describe(&self) -> String {
        format!("rule '{}' (level {}, bucket '{}')", self.expression, self.level, self.output_bucket)
    }

    fn validate(&self, problems: &mut Vec<String>) {
        if self.level == 0 {
            problems.push(format!("{}: level must be at least 1", self.describe()));
        }
        for (field, value) in [
            ("source_group", Some(&self.source_group)),
            ("expression", Some(&self.expression)),
            ("output_bucket", Some(&self.output_bucket)),
            ("target_sheet", self.target_sheet.as_ref()),
            ("tag", self.tag.as_ref()),
            ("parent_expression", self.parent_expression.as_ref()),
        ] {
            if value.is_some_and(|v| v.is_empty()) {
                problems.push(format!("{}: {field} must not be empty", self.describe()));
            }
        }

        let missing = self.missing_fields();
        if missing.contains(RequiredFields::TARGET_SHEET) {
            problems.push(format!("{}: level {} requires target_sheet", self.describe(), self.level));
        }
        if missing.contains(RequiredFields::TAG) {
            problems.push(format!("{}: level {} requires tag", self.describe(), self.level));
        }
        if missing.contains(RequiredFields::PARENT) {
            problems.push(format!("{}: level {} requires parent_expression", self.describe(), self.level));
        }
    }
}

/// Exact-match filter over rule fields; unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleQuery {
    pub level: Option<u32>,
    pub source_group: Option<String>,
    pub expression: Option<String>,
    pub output_bucket: Option<String>,
    pub target_sheet: Option<String>,
    pub tag: Option<String>,
    pub parent_expression: Option<String>,
}

impl RuleQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn source_group(mut self, group: &str) -> Self {
        self.source_group = Some(group.to_string());
        self
    }

    pub fn expression(mut self, expression: &str) -> Self {
        self.expression = Some(expression.to_string());
        self
    }

    pub fn bucket(mut self, bucket: &str) -> Self {
        self.output_bucket = Some(bucket.to_string());
        self
    }

    pub fn sheet(mut self, sheet: &str) -> Self {
        self.target_sheet = Some(sheet.to_string());
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn parent(mut self, parent: &str) -> Self {
        self.parent_expression = Some(parent.to_string());
        self
    }

    pub fn matches(&self, rule: &Rule) -> bool {
        fn eq(want: &Option<String>, have: Option<&str>) -> bool {
            want.as_deref().is_none_or(|w| have == Some(w))
        }
        self.level.is_none_or(|l| l == rule.level)
            && eq(&self.source_group, Some(&rule.source_group))
            && eq(&self.expression, Some(&rule.expression))
            && eq(&self.output_bucket, Some(&rule.output_bucket))
            && eq(&self.target_sheet, rule.target_sheet.as_deref())
            && eq(&self.tag, rule.tag.as_deref())
            && eq(&self.parent_expression, rule.parent_expression.as_deref())
    }
}

/// Validated, read-only rule collection. Order within a level is matching
/// priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        Self::with_diagnostics(rules, &mut Diagnostics::new())
    }

    /// Clean and validate `rules`. Every problem found is collected into a
    /// single [`ClassificationError::SchemaValidation`].
    pub fn with_diagnostics(rules: Vec<Rule>, sink: &mut dyn DiagnosticSink) -> Result<Self> {
        if rules.is_empty() {
            return Err(ClassificationError::schema("rule set is empty"));
        }

        let rules: Vec<Rule> = rules.into_iter().map(|r| clean_rule(r, sink)).collect();

        let mut problems = Vec::new();
        for rule in &rules {
            rule.validate(&mut problems);
        }

        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for rule in &rules {
            let key = rule.unique_key();
            if !seen.insert(key) && reported.insert(key) {
                problems.push(format!(
                    "duplicate rule: bucket '{}', expression '{}', sheet '{}', tag '{}'",
                    key.0, key.1, key.2, key.3
                ));
            }
        }

        for rule in &rules {
            let Some(parent) = rule.parent_expression.as_deref() else { continue };
            if rule.level < 2 {
                continue;
            }
            let parent_level = rule.level - 1;
            if !rules.iter().any(|r| r.level == parent_level && r.expression == parent) {
                problems.push(format!(
                    "{}: parent_expression '{parent}' is not a rule at level {parent_level}",
                    rule.describe()
                ));
            }
        }

        if !problems.is_empty() {
            return Err(ClassificationError::SchemaValidation { problems });
        }

        tracing::debug!(rules = rules.len(), "rule set loaded");
        Ok(Self { rules })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let rules: Vec<Rule> = serde_json::from_str(json)?;
        Self::new(rules)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn select(&self, query: &RuleQuery) -> Vec<&Rule> {
        self.rules.iter().filter(|r| query.matches(r)).collect()
    }

    pub fn filter<F>(&self, mut predicate: F) -> Vec<&Rule>
    where
        F: FnMut(&Rule) -> bool,
    {
        self.rules.iter().filter(|r| predicate(r)).collect()
    }

    pub fn at_level(&self, level: u32) -> Vec<&Rule> {
        self.filter(|r| r.level == level)
    }

    pub fn by_level(&self) -> BTreeMap<u32, Vec<&Rule>> {
        let mut out: BTreeMap<u32, Vec<&Rule>> = BTreeMap::new();
        for rule in &self.rules {
            out.entry(rule.level).or_default().push(rule);
        }
        out
    }

    pub fn children_of(&self, parent: &str) -> Vec<&Rule> {
        self.filter(|r| r.parent_expression.as_deref() == Some(parent))
    }

    /// Distinct parent expressions declared at `level`, in first-seen order.
    pub fn parent_expressions(&self, level: u32) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.rules
            .iter()
            .filter(|r| r.level == level)
            .filter_map(|r| r.parent_expression.as_deref())
            .filter(|p| seen.insert(*p))
            .collect()
    }

    pub fn max_level(&self) -> u32 {
        self.rules.iter().map(|r| r.level).max().unwrap_or(0)
    }

    pub fn expressions(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.expression.as_str()).collect()
    }
}

fn clean_rule(mut rule: Rule, sink: &mut dyn DiagnosticSink) -> Rule {
    let level = Some(rule.level);
    rule.expression = sanitize_reported(&rule.expression, level, sink).trim().to_string();
    rule.parent_expression =
        rule.parent_expression.map(|p| sanitize_reported(&p, level, sink).trim().to_string());
    rule.source_group = rule.source_group.trim().to_string();
    rule.output_bucket = rule.output_bucket.trim().to_string();
    rule.target_sheet = rule.target_sheet.map(|s| s.trim().to_string());
    rule.tag = rule.tag.map(|t| t.trim().to_string());
    rule
}

/// Replace wildcard bucket/sheet values with every concrete value discovered
/// so far.
///
/// `discovered` maps each bucket to its sheets. A wildcard bucket fans out
/// over every key; a wildcard sheet fans out over the sheets of the rule's
/// (possibly just expanded) bucket. Expanded copies take the place of their
/// source rule so declared priority is kept, and a copy identical to an
/// earlier rule is dropped.
pub fn expand_wildcards(
    rules: &[&Rule],
    discovered: &BTreeMap<String, Vec<String>>,
    wildcard: &str,
    sink: &mut dyn DiagnosticSink,
) -> Vec<Rule> {
    let mut out: Vec<Rule> = Vec::with_capacity(rules.len());
    let mut seen: BTreeSet<(String, String, String, String)> = BTreeSet::new();
    let mut push = |rule: Rule, out: &mut Vec<Rule>| {
        let (b, e, s, t) = rule.unique_key();
        if seen.insert((b.to_string(), e.to_string(), s.to_string(), t.to_string())) {
            out.push(rule);
        }
    };

    for rule in rules {
        let wild_bucket = rule.output_bucket == wildcard;
        let wild_sheet = rule.target_sheet.as_deref() == Some(wildcard);
        if !wild_bucket && !wild_sheet {
            push((*rule).clone(), &mut out);
            continue;
        }

        let buckets: Vec<&str> =
            if wild_bucket { discovered.keys().map(String::as_str).collect() } else { vec![rule.output_bucket.as_str()] };

        let mut produced = 0usize;
        for bucket in buckets {
            let mut copy = (*rule).clone();
            copy.output_bucket = bucket.to_string();
            if wild_sheet {
                let Some(sheets) = discovered.get(bucket) else {
                    sink.report(
                        Diagnostic::warning(
                            DiagnosticKind::WildcardUnresolved,
                            format!("rule '{}': bucket '{bucket}' has no discovered sheets", rule.expression),
                        )
                        .at_level(rule.level),
                    );
                    continue;
                };
                for sheet in sheets {
                    let mut sheet_copy = copy.clone();
                    sheet_copy.target_sheet = Some(sheet.clone());
                    push(sheet_copy, &mut out);
                    produced += 1;
                }
            } else {
                push(copy, &mut out);
                produced += 1;
            }
        }

        if produced == 0 {
            sink.report(
                Diagnostic::warning(
                    DiagnosticKind::WildcardUnresolved,
                    format!("wildcard rule '{}' expanded to nothing", rule.expression),
                )
                .at_level(rule.level),
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level2(expr: &str, bucket: &str, sheet: &str) -> Rule {
        Rule::seed("Sheet2", expr, bucket).at_level(2).with_sheet(sheet)
    }

    #[test]
    fn required_fields_grow_with_level() {
        assert_eq!(RequiredFields::for_level(1), RequiredFields::empty());
        assert_eq!(RequiredFields::for_level(2), RequiredFields::TARGET_SHEET);
        assert_eq!(RequiredFields::for_level(3), RequiredFields::TARGET_SHEET | RequiredFields::TAG);
        assert_eq!(RequiredFields::for_level(4), RequiredFields::all());
    }

    #[test]
    fn missing_required_fields_fail_validation() {
        let err = RuleSet::new(vec![
            Rule::seed("Sheet1", "apple", "fruit"),
            Rule::seed("Sheet2", "red", "fruit").at_level(2),
            Rule::seed("Sheet3", "round", "fruit").at_level(3).with_sheet("red"),
        ])
        .unwrap_err();
        let ClassificationError::SchemaValidation { problems } = err else { panic!("expected schema error") };
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("requires target_sheet"));
        assert!(problems[1].contains("requires tag"));
    }

    #[test]
    fn duplicate_rules_are_rejected() {
        let err = RuleSet::new(vec![
            Rule::seed("Sheet1", "apple", "fruit"),
            Rule::seed("Sheet1", "pear", "fruit"),
            Rule::seed("other", "apple", "fruit"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate rule"), "{err}");

        // Same expression with a different tag is a distinct rule.
        let ok = RuleSet::new(vec![
            Rule::seed("Sheet1", "apple", "fruit"),
            level2("red", "fruit", "red"),
            level2("red", "fruit", "red").at_level(3).with_tag("a"),
            level2("red", "fruit", "red").at_level(3).with_tag("b"),
        ]);
        assert!(ok.is_ok());
    }

    #[test]
    fn parent_must_exist_one_level_up() {
        let rules = vec![
            Rule::seed("Sheet1", "apple", "fruit"),
            level2("red", "fruit", "red"),
            level2("round", "fruit", "red").at_level(3).with_tag("shape"),
            level2("big", "fruit", "red").at_level(4).with_tag("size").with_parent("square"),
        ];
        let err = RuleSet::new(rules).unwrap_err();
        assert!(err.to_string().contains("parent_expression 'square'"), "{err}");
    }

    #[test]
    fn expressions_are_sanitized_on_load() {
        let mut sink = Diagnostics::new();
        let set = RuleSet::with_diagnostics(vec![Rule::seed("Sheet1", " app\u{200B}le ", "fruit")], &mut sink).unwrap();
        assert_eq!(set.expressions(), vec!["apple"]);
        assert_eq!(sink.of_kind(DiagnosticKind::Sanitized).count(), 1);
    }

    #[test]
    fn json_loading_accepts_workbook_column_names() {
        let set = RuleSet::from_json_str(
            r#"[
                {"level": 1, "source_sheet_name": "Sheet1", "rule": "apple", "output_name": "fruit"},
                {"level": 2, "source_group": "Sheet2", "expression": "red", "output_bucket": "fruit",
                 "target_sheet": "red"}
            ]"#,
        )
        .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.max_level(), 2);
        assert_eq!(set.rules()[1].target_sheet.as_deref(), Some("red"));
    }

    #[test]
    fn queries() {
        let set = RuleSet::new(vec![
            Rule::seed("Sheet1", "apple", "fruit"),
            Rule::seed("Sheet1", "carrot", "veg"),
            level2("red", "fruit", "red"),
            level2("round", "fruit", "red").at_level(3).with_tag("shape"),
            level2("big", "fruit", "red").at_level(4).with_tag("size").with_parent("round"),
            level2("small", "fruit", "red").at_level(4).with_tag("size").with_parent("round"),
        ])
        .unwrap();

        assert_eq!(set.max_level(), 4);
        assert_eq!(set.at_level(1).len(), 2);
        assert_eq!(set.by_level().keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(set.children_of("round").len(), 2);
        assert_eq!(set.parent_expressions(4), vec!["round"]);
        assert_eq!(set.select(&RuleQuery::new().bucket("fruit").level(1)).len(), 1);
        assert_eq!(set.select(&RuleQuery::new().sheet("red").tag("size")).len(), 2);
        assert_eq!(set.filter(|r| r.level > 2).len(), 3);
    }

    #[test]
    fn wildcard_sheet_expands_per_discovered_sheet() {
        let rule = level2("apple", "fruit", "全");
        let discovered = BTreeMap::from([(
            "fruit".to_string(),
            vec!["Sheet1".to_string(), "Sheet2".to_string(), "Sheet3".to_string()],
        )]);
        let mut sink = Diagnostics::new();
        let out = expand_wildcards(&[&rule], &discovered, "全", &mut sink);
        let sheets: Vec<_> = out.iter().map(|r| r.target_sheet.as_deref().unwrap_or("")).collect();
        assert_eq!(sheets, vec!["Sheet1", "Sheet2", "Sheet3"]);
        assert!(sink.is_empty());
    }

    #[test]
    fn wildcard_bucket_and_sheet_take_the_cross_product() {
        let rule = level2("apple", "全", "全").at_level(3).with_tag("t");
        let plain = level2("pear", "veg", "green").at_level(3).with_tag("t");
        let discovered = BTreeMap::from([
            ("fruit".to_string(), vec!["red".to_string(), "green".to_string()]),
            ("veg".to_string(), vec!["green".to_string()]),
        ]);
        let mut sink = Diagnostics::new();
        let out = expand_wildcards(&[&rule, &plain], &discovered, "全", &mut sink);
        let scopes: Vec<_> = out
            .iter()
            .map(|r| (r.expression.as_str(), r.output_bucket.as_str(), r.target_sheet.as_deref().unwrap_or("")))
            .collect();
        assert_eq!(
            scopes,
            vec![
                ("apple", "fruit", "red"),
                ("apple", "fruit", "green"),
                ("apple", "veg", "green"),
                ("pear", "veg", "green"),
            ]
        );
    }

    #[test]
    fn unresolved_wildcards_are_reported() {
        let rule = level2("apple", "ghost", "全");
        let mut sink = Diagnostics::new();
        let out = expand_wildcards(&[&rule], &BTreeMap::new(), "全", &mut sink);
        assert!(out.is_empty());
        assert_eq!(sink.of_kind(DiagnosticKind::WildcardUnresolved).count(), 2);
    }
}
