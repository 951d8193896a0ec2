use crate::error::RuleSyntaxError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    LBracket,
    RBracket,
    LAngle,
    RAngle,
    LParen,
    RParen,
    Pipe,
    Plus,
    Word(String),
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            TokenKind::LBracket => "'['".to_string(),
            TokenKind::RBracket => "']'".to_string(),
            TokenKind::LAngle => "'<'".to_string(),
            TokenKind::RAngle => "'>'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Pipe => "'|'".to_string(),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Word(w) => format!("word '{w}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Char offset of the token's first character.
    pub pos: usize,
}

/// Split a rule into tokens, skipping whitespace.
pub(crate) fn tokenize(rule: &str) -> Result<Vec<Token>, RuleSyntaxError> {
    let word = regex!(r"^[^\[\]<>|+()\s]+");
    let mut tokens = Vec::new();
    let mut byte = 0;
    let mut pos = 0;

    while let Some(c) = rule[byte..].chars().next() {
        let punct = match c {
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            '<' => Some(TokenKind::LAngle),
            '>' => Some(TokenKind::RAngle),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '|' => Some(TokenKind::Pipe),
            '+' => Some(TokenKind::Plus),
            _ => None,
        };

        if let Some(kind) = punct {
            tokens.push(Token { kind, pos });
            byte += c.len_utf8();
            pos += 1;
        } else if c.is_whitespace() {
            byte += c.len_utf8();
            pos += 1;
        } else {
            let m = word
                .find(&rule[byte..])
                .ok_or_else(|| RuleSyntaxError::new(rule, pos, format!("unexpected character {c:?}")))?;
            let text = m.as_str();
            tokens.push(Token { kind: TokenKind::Word(text.to_string()), pos });
            byte += text.len();
            pos += text.chars().count();
        }
    }

    Ok(tokens)
}
