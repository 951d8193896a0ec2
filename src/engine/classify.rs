use super::compiled_rules::CompiledRules;
use crate::expr::fold_case;

/// Result of matching one keyword: the text of the rule that claimed it, if
/// any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch {
    pub keyword: String,
    pub matched: Option<String>,
}

impl KeywordMatch {
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }

    /// Matched labels joined with `separator`; empty when nothing matched.
    pub fn label(&self, separator: &str) -> String {
        self.matched.iter().map(String::as_str).collect::<Vec<_>>().join(separator)
    }
}

impl CompiledRules {
    /// First rule (in declared order) whose predicate holds for `keyword`.
    pub fn first_match(&self, keyword: &str) -> Option<&str> {
        let folded = fold_case(keyword, self.case_sensitive());
        self.rules.iter().find(|r| r.predicate.matches_folded(&folded)).map(|r| r.text.as_str())
    }

    /// Run every keyword through the rules; output order follows `keywords`.
    pub fn classify<S: AsRef<str>>(&self, keywords: &[S]) -> Vec<KeywordMatch> {
        keywords
            .iter()
            .map(|k| {
                let keyword = k.as_ref();
                KeywordMatch { keyword: keyword.to_string(), matched: self.first_match(keyword).map(str::to_string) }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;

    fn compile(texts: &[&str]) -> CompiledRules {
        CompiledRules::new(texts.iter().copied(), false, &mut Diagnostics::new())
    }

    #[test]
    fn first_match_wins() {
        let rules = compile(&["a", "a+b"]);
        assert_eq!(rules.first_match("ab"), Some("a"));
    }

    #[test]
    fn unmatched_keywords_get_an_empty_label() {
        let rules = compile(&["apple"]);
        let out = rules.classify(&["redapple", "banana"]);
        assert_eq!(out[0].label("&"), "apple");
        assert!(!out[1].is_match());
        assert_eq!(out[1].label("&"), "");
    }

    #[test]
    fn case_is_folded_once_per_keyword() {
        let rules = compile(&["[apple]", "pie"]);
        assert_eq!(rules.first_match("APPLE"), Some("[apple]"));
        assert_eq!(rules.first_match("ApplePIE"), Some("pie"));
    }

    #[test]
    fn rules_that_failed_to_compile_never_match() {
        let rules = compile(&["a+", "b"]);
        assert_eq!(rules.first_match("a"), None);
        assert_eq!(rules.first_match("ab"), Some("b"));
    }
}
