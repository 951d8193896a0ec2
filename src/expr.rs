//! Rule expression language.
//!
//! A rule is a small boolean formula over substring tests:
//!
//! ```text
//! expr  := and ('|' and)*
//! and   := atom ('+' atom)*
//! atom  := '[' WORD ']'          exact match
//!        | WORD '<' expr '>'     WORD present and expr false
//!        | WORD                  WORD present
//!        | '<' expr '>'          expr false
//!        | '(' expr ')'
//! ```
//!
//! `WORD` is any run of characters other than `[]<>|+()` and whitespace;
//! whitespace between tokens is ignored.
//!
//! The parts:
//!
//! - `lexer.rs`: text to tokens (with char offsets for error reporting).
//! - `parser.rs`: recursive-descent parser producing an [`Expr`] tree.
//! - `compile.rs`: folds an [`Expr`] into a [`Predicate`] closure.

#[path = "expr/compile.rs"]
mod compile;
#[path = "expr/lexer.rs"]
mod lexer;
#[path = "expr/parser.rs"]
mod parser;

pub use compile::{Predicate, compile, compile_expr, fold_case};
pub use parser::parse;

/// Parsed rule expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    /// `[word]`
    Exact(String),
    /// `word`
    Term(String),
    /// `<expr>`
    Negate(Box<Expr>),
    /// `word<expr>`
    TermExclude(String, Box<Expr>),
}
