//! Keyword batches, per-stage results and the stage control signal.
//!
//! Everything here is validated when it is built and read-only afterwards.

use crate::config::Options;
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::error::{ClassificationError, Result};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

/// Grouping key used when a record carries no sheet.
pub const DEFAULT_SHEET_KEY: &str = "默认sheet";
/// Grouping key used when a record carries no parent rule.
pub const NO_PARENT_KEY: &str = "无父规则";

// --- Text cleaning -----------------------------------------------------------

/// Strip zero-width / bidi-format characters and control characters.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    let invisible = regex!(r"[\x{200B}-\x{200F}\x{202A}-\x{202E}\x{2060}-\x{2064}\x{FEFF}\p{Cc}]");
    invisible.replace_all(text, "")
}

/// [`sanitize`], reporting what was removed.
pub(crate) fn sanitize_reported(text: &str, level: Option<u32>, sink: &mut dyn DiagnosticSink) -> String {
    match sanitize(text) {
        Cow::Borrowed(clean) => clean.to_string(),
        Cow::Owned(clean) => {
            let removed: Vec<String> = text
                .chars()
                .filter(|c| !clean.contains(*c))
                .map(|c| format!("U+{:04X}", c as u32))
                .collect();
            let mut diag = Diagnostic::info(
                DiagnosticKind::Sanitized,
                format!("removed invisible characters {} from {:?}", removed.join(","), text),
            );
            if let Some(level) = level {
                diag = diag.at_level(level);
            }
            sink.report(diag);
            clean
        }
    }
}

/// Drop repeats, keeping the first occurrence of each value in place.
pub fn dedup_preserving_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}

/// Sanitize, trim, drop empties, dedup.
pub(crate) fn clean_texts<I, S>(raw: I, level: Option<u32>, sink: &mut dyn DiagnosticSink) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    dedup_preserving_order(
        raw.into_iter()
            .map(|s| sanitize_reported(s.as_ref(), level, sink).trim().to_string())
            .filter(|s| !s.is_empty()),
    )
}

// --- Keyword batch -----------------------------------------------------------

/// Keywords awaiting classification at one level, with their provenance.
///
/// At level 1 the batch is the operator's seed list and carries no origin.
/// Past level 1 the origin bucket is required; past level 2 the origin sheet
/// is too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordBatch {
    keywords: Vec<String>,
    origin_bucket: Option<String>,
    origin_sheet: Option<String>,
    level: u32,
}

impl KeywordBatch {
    pub fn new<I, S>(
        raw: I,
        origin_bucket: Option<&str>,
        origin_sheet: Option<&str>,
        level: u32,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut problems = Vec::new();
        if level == 0 {
            problems.push("keyword batch level must be at least 1".to_string());
        }
        if origin_bucket.is_some_and(|b| b.is_empty()) {
            problems.push("origin bucket must not be empty".to_string());
        }
        if origin_sheet.is_some_and(|s| s.is_empty()) {
            problems.push("origin sheet must not be empty".to_string());
        }
        if level > 1 && origin_bucket.is_none() {
            problems.push(format!("keyword batch at level {level} has no origin bucket"));
        }
        if level > 2 && origin_sheet.is_none() {
            problems.push(format!("keyword batch at level {level} has no origin sheet"));
        }
        if !problems.is_empty() {
            return Err(ClassificationError::SchemaValidation { problems });
        }

        Ok(Self {
            keywords: clean_texts(raw, Some(level), sink),
            origin_bucket: origin_bucket.map(str::to_string),
            origin_sheet: origin_sheet.map(str::to_string),
            level,
        })
    }

    /// Level-1 batch from the operator's keyword list.
    pub fn seed<I, S>(raw: I, sink: &mut dyn DiagnosticSink) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self { keywords: clean_texts(raw, Some(1), sink), origin_bucket: None, origin_sheet: None, level: 1 }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn origin_bucket(&self) -> Option<&str> {
        self.origin_bucket.as_deref()
    }

    pub fn origin_sheet(&self) -> Option<&str> {
        self.origin_sheet.as_deref()
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

// --- Records -----------------------------------------------------------------

/// Column holding the rule a keyword matched at `level`.
pub fn matched_rule_column(level: u32) -> String {
    format!("阶段{level}")
}

pub fn tag_column(level: u32) -> String {
    format!("阶段{level}规则标签")
}

pub fn parent_column(level: u32) -> String {
    format!("阶段{}父级规则", level.saturating_sub(1))
}

/// A keyword and the one rule that claimed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedKeyword {
    pub keyword: String,
    pub matched_rule: String,
    pub level: u32,
    pub bucket: String,
    pub sheet: String,
    /// Present from level 3.
    pub tag: Option<String>,
    /// Present past level 3.
    pub parent: Option<String>,
}

impl ClassifiedKeyword {
    pub fn tag_column(&self) -> String {
        tag_column(self.level)
    }

    pub fn parent_column(&self) -> String {
        parent_column(self.level)
    }

    pub fn matched_column(&self) -> String {
        matched_rule_column(self.level)
    }
}

/// A keyword no rule claimed at `level`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedKeyword {
    pub keyword: String,
    pub level: u32,
    /// Where the record is written.
    pub bucket: String,
    pub sheet: String,
    /// Sheet the keyword was read from.
    pub origin_sheet: String,
}

impl UnmatchedKeyword {
    /// Route an unmatched keyword: seed keywords go to the shared unmatched
    /// bucket, keywords read from a bucket go back to that bucket's unmatched
    /// sheet.
    pub fn route(keyword: &str, batch: &KeywordBatch, options: &Options) -> Self {
        let (bucket, sheet) = match batch.origin_bucket() {
            None => (options.unmatched_bucket.clone(), options.seed_sheet.clone()),
            Some(bucket) => (bucket.to_string(), options.unmatched_sheet.clone()),
        };
        Self {
            keyword: keyword.to_string(),
            level: batch.level(),
            bucket,
            sheet,
            origin_sheet: batch.origin_sheet().unwrap_or(&options.seed_sheet).to_string(),
        }
    }
}

// --- Classification result ---------------------------------------------------

/// Matched and unmatched keywords from one or more scopes of a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationResult {
    pub matched: Vec<ClassifiedKeyword>,
    pub unmatched: Vec<UnmatchedKeyword>,
}

type Grouped<'a, K, T> = BTreeMap<K, Vec<&'a T>>;

impl ClassificationResult {
    pub fn new(matched: Vec<ClassifiedKeyword>, unmatched: Vec<UnmatchedKeyword>) -> Self {
        Self { matched, unmatched }
    }

    pub fn is_empty(&self) -> bool {
        self.matched.is_empty() && self.unmatched.is_empty()
    }

    pub fn has_matches(&self) -> bool {
        !self.matched.is_empty()
    }

    pub fn extend(&mut self, other: ClassificationResult) {
        self.matched.extend(other.matched);
        self.unmatched.extend(other.unmatched);
    }

    pub fn group_by_bucket(&self) -> Grouped<'_, &str, ClassifiedKeyword> {
        let mut out: Grouped<'_, &str, ClassifiedKeyword> = BTreeMap::new();
        for kw in &self.matched {
            out.entry(kw.bucket.as_str()).or_default().push(kw);
        }
        out
    }

    pub fn group_by_bucket_and_sheet(&self) -> Grouped<'_, (&str, &str), ClassifiedKeyword> {
        let mut out: Grouped<'_, (&str, &str), ClassifiedKeyword> = BTreeMap::new();
        for kw in &self.matched {
            out.entry((kw.bucket.as_str(), sheet_key(&kw.sheet))).or_default().push(kw);
        }
        out
    }

    pub fn group_by_bucket_sheet_and_parent(&self) -> Grouped<'_, (&str, &str, &str), ClassifiedKeyword> {
        let mut out: Grouped<'_, (&str, &str, &str), ClassifiedKeyword> = BTreeMap::new();
        for kw in &self.matched {
            let parent = kw.parent.as_deref().unwrap_or(NO_PARENT_KEY);
            out.entry((kw.bucket.as_str(), sheet_key(&kw.sheet), parent)).or_default().push(kw);
        }
        out
    }

    pub fn unmatched_by_bucket(&self) -> Grouped<'_, &str, UnmatchedKeyword> {
        let mut out: Grouped<'_, &str, UnmatchedKeyword> = BTreeMap::new();
        for kw in &self.unmatched {
            out.entry(kw.bucket.as_str()).or_default().push(kw);
        }
        out
    }

    pub fn unmatched_by_bucket_and_sheet(&self) -> Grouped<'_, (&str, &str), UnmatchedKeyword> {
        let mut out: Grouped<'_, (&str, &str), UnmatchedKeyword> = BTreeMap::new();
        for kw in &self.unmatched {
            out.entry((kw.bucket.as_str(), sheet_key(&kw.sheet))).or_default().push(kw);
        }
        out
    }

    /// Keyword -> matched rule, for annotating stored rows.
    pub fn keyword_to_rule(&self) -> BTreeMap<&str, &str> {
        self.matched.iter().map(|kw| (kw.keyword.as_str(), kw.matched_rule.as_str())).collect()
    }
}

fn sheet_key(sheet: &str) -> &str {
    if sheet.is_empty() { DEFAULT_SHEET_KEY } else { sheet }
}

// --- Stage outcome -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageStatus {
    Success,
    Fail,
    Warning,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Warning => "warning",
        }
    }
}

/// Per-stage control signal. `next_level == TERMINAL_LEVEL` ends the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub status: StageStatus,
    pub level: u32,
    pub next_level: u32,
    pub message: Option<String>,
}

impl StageOutcome {
    /// Build an outcome, enforcing that a failure carries a message.
    pub fn new(status: StageStatus, level: u32, next_level: u32, message: Option<String>) -> Result<Self> {
        if status == StageStatus::Fail && message.as_deref().is_none_or(str::is_empty) {
            return Err(ClassificationError::schema(format!("fail outcome at level {level} requires a message")));
        }
        Ok(Self { status, level, next_level, message })
    }

    /// Stage completed; continue with `level + 1` unless that exceeds `max_level`.
    pub fn success(level: u32, max_level: u32, message: impl Into<String>) -> Self {
        let next_level = if level + 1 > max_level { crate::TERMINAL_LEVEL } else { level + 1 };
        Self { status: StageStatus::Success, level, next_level, message: Some(message.into()) }
    }

    pub fn warning(level: u32, next_level: u32, message: impl Into<String>) -> Self {
        Self { status: StageStatus::Warning, level, next_level, message: Some(message.into()) }
    }

    pub fn fail(level: u32, message: impl Into<String>) -> Self {
        Self { status: StageStatus::Fail, level, next_level: crate::TERMINAL_LEVEL, message: Some(message.into()) }
    }

    pub fn is_terminal(&self) -> bool {
        self.next_level == crate::TERMINAL_LEVEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;

    #[test]
    fn dedup_keeps_first_seen_order() {
        let out = dedup_preserving_order(["x", "y", "x", "z"].map(String::from));
        assert_eq!(out, vec!["x", "y", "z"]);
    }

    #[test]
    fn sanitize_strips_invisible_and_control_characters() {
        assert_eq!(sanitize("key\u{200B}word"), "keyword");
        assert_eq!(sanitize("\u{FEFF}a\u{202E}b\u{2063}"), "ab");
        assert_eq!(sanitize("a\u{0007}b"), "ab");
        assert!(matches!(sanitize("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn seed_batch_sanitizes_before_dedup() {
        let mut sink = Diagnostics::new();
        let batch = KeywordBatch::seed(["keyword\u{200B}", "keyword", "  ", " other ", ""], &mut sink);
        assert_eq!(batch.keywords(), ["keyword", "other"]);
        assert_eq!(sink.of_kind(DiagnosticKind::Sanitized).count(), 1);
    }

    #[test]
    fn batch_provenance_is_required_past_level_one() {
        let mut sink = Diagnostics::new();
        assert!(KeywordBatch::new(["a"], None, None, 1, &mut sink).is_ok());
        assert!(KeywordBatch::new(["a"], None, None, 2, &mut sink).is_err());
        assert!(KeywordBatch::new(["a"], Some("fruit"), None, 2, &mut sink).is_ok());
        assert!(KeywordBatch::new(["a"], Some("fruit"), None, 3, &mut sink).is_err());
        assert!(KeywordBatch::new(["a"], Some("fruit"), Some("red"), 3, &mut sink).is_ok());
        assert!(KeywordBatch::new(["a"], Some(""), None, 2, &mut sink).is_err());
    }

    #[test]
    fn unmatched_routing_depends_on_origin() {
        let opts = Options::default();
        let mut sink = Diagnostics::new();

        let seed = KeywordBatch::seed(["banana"], &mut sink);
        let un = UnmatchedKeyword::route("banana", &seed, &opts);
        assert_eq!((un.bucket.as_str(), un.sheet.as_str(), un.origin_sheet.as_str()), ("未分类关键词", "Sheet1", "Sheet1"));

        let batch = KeywordBatch::new(["kiwi"], Some("fruit"), Some("green"), 3, &mut sink).unwrap();
        let un = UnmatchedKeyword::route("kiwi", &batch, &opts);
        assert_eq!((un.bucket.as_str(), un.sheet.as_str(), un.origin_sheet.as_str()), ("fruit", "未匹配关键词", "green"));
    }

    fn kw(keyword: &str, bucket: &str, sheet: &str, parent: Option<&str>) -> ClassifiedKeyword {
        ClassifiedKeyword {
            keyword: keyword.into(),
            matched_rule: "r".into(),
            level: 4,
            bucket: bucket.into(),
            sheet: sheet.into(),
            tag: Some("t".into()),
            parent: parent.map(String::from),
        }
    }

    #[test]
    fn grouping_views() {
        let result = ClassificationResult::new(
            vec![
                kw("a", "b1", "s1", Some("p1")),
                kw("b", "b1", "s2", None),
                kw("c", "b2", "s1", Some("p1")),
                kw("d", "b1", "s1", Some("p2")),
            ],
            vec![],
        );

        let by_bucket = result.group_by_bucket();
        assert_eq!(by_bucket.keys().copied().collect::<Vec<_>>(), vec!["b1", "b2"]);
        assert_eq!(by_bucket["b1"].len(), 3);

        let by_sheet = result.group_by_bucket_and_sheet();
        assert_eq!(by_sheet[&("b1", "s1")].len(), 2);

        let by_parent = result.group_by_bucket_sheet_and_parent();
        assert_eq!(by_parent.len(), 4);
        assert_eq!(by_parent[&("b1", "s2", NO_PARENT_KEY)][0].keyword, "b");
    }

    #[test]
    fn column_names() {
        let k = kw("a", "b", "s", None);
        assert_eq!(k.tag_column(), "阶段4规则标签");
        assert_eq!(k.parent_column(), "阶段3父级规则");
        assert_eq!(k.matched_column(), "阶段4");
    }

    #[test]
    fn outcomes() {
        assert_eq!(StageOutcome::success(1, 1, "done").next_level, crate::TERMINAL_LEVEL);
        assert_eq!(StageOutcome::success(1, 3, "done").next_level, 2);
        assert!(StageOutcome::fail(2, "boom").is_terminal());
        assert!(StageOutcome::new(StageStatus::Fail, 2, crate::TERMINAL_LEVEL, None).is_err());
        assert!(StageOutcome::new(StageStatus::Fail, 2, crate::TERMINAL_LEVEL, Some(String::new())).is_err());
        assert!(StageOutcome::new(StageStatus::Warning, 0, crate::TERMINAL_LEVEL, None).is_ok());
    }
}
