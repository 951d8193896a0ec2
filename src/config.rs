//! Run-wide configuration.
//!
//! Case sensitivity and the label separator apply to every rule; the remaining
//! fields name the sentinel buckets/sheets used when routing keywords.

use crate::error::{ClassificationError, Result};
use serde::Deserialize;
use std::path::Path;

/// Characters with meaning in the rule grammar (or in the exported tables)
/// that cannot double as a label separator.
const RESERVED_SEPARATOR_CHARS: &[char] = &['[', ']', '(', ')', '<', '>', '|', '+', ',', '.'];

/// Options shared by the flat classifier and the staged pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Compare keywords and rule words verbatim instead of lowercasing both.
    pub case_sensitive: bool,
    /// Joins matched labels when more than one is reported for a keyword.
    pub separator: String,
    /// Field value meaning "every bucket/sheet discovered so far".
    pub wildcard: String,
    /// Bucket receiving stage-1 keywords that matched nothing.
    pub unmatched_bucket: String,
    /// Sheet receiving keywords unmatched at stage 2 or later.
    pub unmatched_sheet: String,
    /// Sheet every stage-1 bucket output is written to.
    pub seed_sheet: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            separator: "&".to_string(),
            wildcard: crate::WILDCARD.to_string(),
            unmatched_bucket: crate::UNMATCHED_BUCKET.to_string(),
            unmatched_sheet: crate::UNMATCHED_SHEET.to_string(),
            seed_sheet: crate::SEED_SHEET.to_string(),
        }
    }
}

impl Options {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Options = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Reject separators that would be ambiguous with the grammar or with
    /// keyword text, and empty sentinel names.
    pub fn validate(&self) -> Result<()> {
        validate_separator(&self.separator)?;
        for (field, value) in [
            ("wildcard", &self.wildcard),
            ("unmatched_bucket", &self.unmatched_bucket),
            ("unmatched_sheet", &self.unmatched_sheet),
            ("seed_sheet", &self.seed_sheet),
        ] {
            if value.trim().is_empty() {
                return Err(ClassificationError::Config(format!("{field} must not be empty")));
            }
        }
        if self.unmatched_sheet == self.seed_sheet {
            return Err(ClassificationError::Config("unmatched_sheet and seed_sheet must differ".to_string()));
        }
        Ok(())
    }
}

pub fn validate_separator(separator: &str) -> Result<()> {
    if separator.is_empty() {
        return Err(ClassificationError::Config("separator must not be empty".to_string()));
    }
    if let Some(c) = separator.chars().find(|c| c.is_whitespace() || RESERVED_SEPARATOR_CHARS.contains(c)) {
        return Err(ClassificationError::Config(format!("separator {separator:?} contains reserved character {c:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_routing_sentinels() {
        let opts = Options::default();
        assert!(!opts.case_sensitive);
        assert_eq!(opts.separator, "&");
        assert_eq!(opts.wildcard, "全");
        assert_eq!(opts.unmatched_bucket, "未分类关键词");
        assert_eq!(opts.unmatched_sheet, "未匹配关键词");
        assert_eq!(opts.seed_sheet, "Sheet1");
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let opts = Options::from_json_str(r#"{"case_sensitive": true, "separator": "/"}"#).unwrap();
        assert!(opts.case_sensitive);
        assert_eq!(opts.separator, "/");
        assert_eq!(opts.wildcard, "全");
    }

    #[test]
    fn rejects_reserved_separators() {
        for bad in ["", " ", ",", ".", "+", "|", "a b", "<"] {
            assert!(validate_separator(bad).is_err(), "{bad:?} should be rejected");
        }
        for good in ["&", "/", ";", "、"] {
            assert!(validate_separator(good).is_ok(), "{good:?} should be accepted");
        }
    }

    #[test]
    fn invalid_json_options_are_errors() {
        assert!(matches!(Options::from_json_str(r#"{"separator": ","}"#), Err(ClassificationError::Config(_))));
        assert!(matches!(Options::from_json_str("{"), Err(ClassificationError::Json(_))));
    }
}
