use super::{Expr, parse};
use crate::error::RuleSyntaxError;
use std::borrow::Cow;
use std::fmt;

type Test = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// A compiled rule: a pure test over a keyword.
///
/// Literals are case-folded once at compile time; in case-insensitive mode the
/// keyword is folded on entry to [`Predicate::matches`]. Callers testing one
/// keyword against many predicates can fold it once with [`fold_case`] and use
/// [`Predicate::matches_folded`].
pub struct Predicate {
    test: Test,
    case_sensitive: bool,
}

impl Predicate {
    pub fn matches(&self, keyword: &str) -> bool {
        (self.test)(&fold_case(keyword, self.case_sensitive))
    }

    /// Test a keyword that has already gone through [`fold_case`] with the
    /// same case policy.
    pub fn matches_folded(&self, folded: &str) -> bool {
        (self.test)(folded)
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate").field("test", &"<function>").field("case_sensitive", &self.case_sensitive).finish()
    }
}

pub fn fold_case(text: &str, case_sensitive: bool) -> Cow<'_, str> {
    if case_sensitive { Cow::Borrowed(text) } else { Cow::Owned(text.to_lowercase()) }
}

/// Parse and compile a rule in one step.
pub fn compile(rule: &str, case_sensitive: bool) -> Result<Predicate, RuleSyntaxError> {
    let expr = parse(rule)?;
    Ok(compile_expr(&expr, case_sensitive))
}

pub fn compile_expr(expr: &Expr, case_sensitive: bool) -> Predicate {
    Predicate { test: build(expr, case_sensitive), case_sensitive }
}

fn build(expr: &Expr, case_sensitive: bool) -> Test {
    let lit = |w: &str| fold_case(w, case_sensitive).into_owned();
    match expr {
        Expr::Or(a, b) => {
            let (a, b) = (build(a, case_sensitive), build(b, case_sensitive));
            Box::new(move |k: &str| a(k) || b(k))
        }
        Expr::And(a, b) => {
            let (a, b) = (build(a, case_sensitive), build(b, case_sensitive));
            Box::new(move |k: &str| a(k) && b(k))
        }
        Expr::Exact(w) => {
            let w = lit(w);
            Box::new(move |k: &str| k == w)
        }
        Expr::Term(w) => {
            let w = lit(w);
            Box::new(move |k: &str| k.contains(w.as_str()))
        }
        Expr::Negate(e) => {
            let e = build(e, case_sensitive);
            Box::new(move |k: &str| !e(k))
        }
        Expr::TermExclude(w, e) => {
            let w = lit(w);
            let e = build(e, case_sensitive);
            Box::new(move |k: &str| k.contains(w.as_str()) && !e(k))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_examples() {
        // (rule, keyword, expected) in case-insensitive mode
        let cases: Vec<(&str, &str, bool)> = vec![
            ("[apple]", "Apple", true),
            ("[app]", "Apple", false),
            ("[apple]", "apples", false),
            ("apple", "redapple", true),
            ("apple<pie>", "applepie", false),
            ("apple<pie>", "applecake", true),
            ("apple<pie|tart>", "appletart", false),
            ("<pie>", "applecake", true),
            ("<pie>", "applepie", false),
            ("a|b+c", "xax", true),
            ("a|b+c", "xbx", false),
            ("a|b+c", "xbcx", true),
            ("(a|b)+c", "ac", true),
            ("(a|b)+c", "a", false),
            ("苹果+红", "红苹果", true),
            ("苹果+红", "青苹果", false),
        ];
        for (rule, keyword, expected) in cases {
            let pred = compile(rule, false).unwrap();
            assert_eq!(pred.matches(keyword), expected, "rule {rule:?} on {keyword:?}");
        }
    }

    #[test]
    fn case_sensitive_mode_compares_verbatim() {
        let pred = compile("[Apple]", true).unwrap();
        assert!(pred.matches("Apple"));
        assert!(!pred.matches("apple"));

        let pred = compile("APPLE", false).unwrap();
        assert!(pred.matches("green apple"));
        assert!(pred.matches_folded(&fold_case("GREEN APPLE", false)));
    }

    #[test]
    fn syntax_errors_surface_from_compile() {
        let err = compile("a+", false).unwrap_err();
        assert_eq!(err.rule, "a+");
    }
}
