use super::Expr;
use super::lexer::{Token, TokenKind, tokenize};
use crate::error::RuleSyntaxError;

/// Parse a rule into an expression tree.
///
/// `|` binds loosest, then `+`, then atoms. Both operators are
/// left-associative.
pub fn parse(rule: &str) -> Result<Expr, RuleSyntaxError> {
    let tokens = tokenize(rule)?;
    if tokens.is_empty() {
        return Err(RuleSyntaxError::new(rule, 0, "empty expression"));
    }

    let mut parser = Parser { rule, tokens, cursor: 0 };
    let expr = parser.or_expr()?;
    if let Some(tok) = parser.peek() {
        return Err(RuleSyntaxError::new(rule, tok.pos, format!("unexpected {}", tok.kind.describe())));
    }
    Ok(expr)
}

struct Parser<'a> {
    rule: &'a str,
    tokens: Vec<Token>,
    cursor: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn end_pos(&self) -> usize {
        self.rule.chars().count()
    }

    fn error_here(&self, expected: &str) -> RuleSyntaxError {
        match self.peek() {
            Some(tok) => {
                RuleSyntaxError::new(self.rule, tok.pos, format!("expected {expected}, found {}", tok.kind.describe()))
            }
            None => RuleSyntaxError::new(self.rule, self.end_pos(), format!("expected {expected}, found end of rule")),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), RuleSyntaxError> {
        if self.peek_kind() == Some(&kind) {
            self.cursor += 1;
            Ok(())
        } else {
            Err(self.error_here(&kind.describe()))
        }
    }

    fn or_expr(&mut self) -> Result<Expr, RuleSyntaxError> {
        let mut lhs = self.and_expr()?;
        while self.peek_kind() == Some(&TokenKind::Pipe) {
            self.cursor += 1;
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, RuleSyntaxError> {
        let mut lhs = self.atom()?;
        while self.peek_kind() == Some(&TokenKind::Plus) {
            self.cursor += 1;
            let rhs = self.atom()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn atom(&mut self) -> Result<Expr, RuleSyntaxError> {
        let Some(tok) = self.peek().cloned() else {
            return Err(self.error_here("a term"));
        };

        match tok.kind {
            TokenKind::LBracket => {
                self.cursor += 1;
                let word = match self.peek_kind() {
                    Some(TokenKind::Word(w)) => w.clone(),
                    _ => return Err(self.error_here("a word inside '[ ]'")),
                };
                self.cursor += 1;
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::Exact(word))
            }
            TokenKind::Word(word) => {
                self.cursor += 1;
                if self.peek_kind() == Some(&TokenKind::LAngle) {
                    self.cursor += 1;
                    let excluded = self.or_expr()?;
                    self.expect(TokenKind::RAngle)?;
                    Ok(Expr::TermExclude(word, Box::new(excluded)))
                } else {
                    Ok(Expr::Term(word))
                }
            }
            TokenKind::LAngle => {
                self.cursor += 1;
                let inner = self.or_expr()?;
                self.expect(TokenKind::RAngle)?;
                Ok(Expr::Negate(Box::new(inner)))
            }
            TokenKind::LParen => {
                self.cursor += 1;
                let inner = self.or_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => Err(self.error_here("a term")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(w: &str) -> Box<Expr> {
        Box::new(Expr::Term(w.to_string()))
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(parse("a|b+c").unwrap(), Expr::Or(term("a"), Box::new(Expr::And(term("b"), term("c")))));
    }

    #[test]
    fn operators_are_left_associative() {
        assert_eq!(parse("a+b+c").unwrap(), Expr::And(Box::new(Expr::And(term("a"), term("b"))), term("c")));
    }

    #[test]
    fn atoms() {
        assert_eq!(parse("[apple]").unwrap(), Expr::Exact("apple".into()));
        assert_eq!(parse("apple<pie>").unwrap(), Expr::TermExclude("apple".into(), term("pie")));
        assert_eq!(parse("<pie>").unwrap(), Expr::Negate(term("pie")));
        assert_eq!(parse("(a|b)+c").unwrap(), Expr::And(Box::new(Expr::Or(term("a"), term("b"))), term("c")));
        assert_eq!(
            parse(" apple < pie | tart > ").unwrap(),
            Expr::TermExclude("apple".into(), Box::new(Expr::Or(term("pie"), term("tart"))))
        );
    }

    #[test]
    fn malformed_rules_report_a_position() {
        let cases: Vec<(&str, usize)> = vec![
            ("", 0),
            ("a+", 2),
            ("|a", 0),
            ("[a", 2),
            ("[]", 1),
            ("(a|b", 4),
            ("a<b", 3),
            ("a)b", 1),
            ("a b", 2),
        ];
        for (rule, position) in cases {
            let err = parse(rule).expect_err(rule);
            assert_eq!(err.position, position, "rule {rule:?}: {err}");
            assert_eq!(err.rule, rule);
        }
    }
}
