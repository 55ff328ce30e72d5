//! Expression tokenizer
//!
//! Tokens are produced on demand so the parser can stop at the closing `}`
//! of a `${..}` interpolation without looking at the text that follows it.

use super::error::{Result, TemplateError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    In,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    AndAnd,
    OrOr,
    Dot,
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
}

impl TokenKind {
    /// Short description for error messages
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Str(s) => format!("string {s:?}"),
            TokenKind::Ident(name) => format!("identifier {name}"),
            TokenKind::True => "'true'".to_string(),
            TokenKind::False => "'false'".to_string(),
            TokenKind::Null => "'null'".to_string(),
            TokenKind::In => "'in'".to_string(),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::StarStar => "'**'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::Bang => "'!'".to_string(),
            TokenKind::EqEq => "'=='".to_string(),
            TokenKind::NotEq => "'!='".to_string(),
            TokenKind::Lt => "'<'".to_string(),
            TokenKind::Gt => "'>'".to_string(),
            TokenKind::LtEq => "'<='".to_string(),
            TokenKind::GtEq => "'>='".to_string(),
            TokenKind::AndAnd => "'&&'".to_string(),
            TokenKind::OrOr => "'||'".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::LBracket => "'['".to_string(),
            TokenKind::RBracket => "']'".to_string(),
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
}

pub struct Lexer<'s> {
    src: &'s str,
    pos: usize,
}

impl<'s> Lexer<'s> {
    /// Start tokenizing `src` at byte offset `pos`
    pub fn new(src: &'s str, pos: usize) -> Self {
        Self { src, pos }
    }

    pub fn next_token(&mut self) -> Result<Option<Token>> {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.pos >= bytes.len() {
            return Ok(None);
        }

        let start = self.pos;
        let c = bytes[start];
        let next = bytes.get(start + 1).copied();

        let (kind, len) = match c {
            b'0'..=b'9' => return self.number(start).map(Some),
            b'"' | b'\'' => return self.string(start, c).map(Some),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => return Ok(Some(self.word(start))),
            b'*' if next == Some(b'*') => (TokenKind::StarStar, 2),
            b'*' => (TokenKind::Star, 1),
            b'=' if next == Some(b'=') => (TokenKind::EqEq, 2),
            b'!' if next == Some(b'=') => (TokenKind::NotEq, 2),
            b'!' => (TokenKind::Bang, 1),
            b'<' if next == Some(b'=') => (TokenKind::LtEq, 2),
            b'<' => (TokenKind::Lt, 1),
            b'>' if next == Some(b'=') => (TokenKind::GtEq, 2),
            b'>' => (TokenKind::Gt, 1),
            b'&' if next == Some(b'&') => (TokenKind::AndAnd, 2),
            b'|' if next == Some(b'|') => (TokenKind::OrOr, 2),
            b'+' => (TokenKind::Plus, 1),
            b'-' => (TokenKind::Minus, 1),
            b'/' => (TokenKind::Slash, 1),
            b'.' => (TokenKind::Dot, 1),
            b',' => (TokenKind::Comma, 1),
            b':' => (TokenKind::Colon, 1),
            b'(' => (TokenKind::LParen, 1),
            b')' => (TokenKind::RParen, 1),
            b'[' => (TokenKind::LBracket, 1),
            b']' => (TokenKind::RBracket, 1),
            b'{' => (TokenKind::LBrace, 1),
            b'}' => (TokenKind::RBrace, 1),
            _ => {
                let ch = self.src[start..].chars().next().unwrap_or('?');
                return Err(TemplateError::syntax(format!(
                    "unexpected character '{ch}' at offset {start}"
                )));
            }
        };

        self.pos = start + len;
        Ok(Some(Token {
            kind,
            start,
            end: self.pos,
        }))
    }

    fn number(&mut self, start: usize) -> Result<Token> {
        let bytes = self.src.as_bytes();
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        // Fraction only when a digit follows the dot, so `a[1].b` still lexes
        if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
            end += 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }

        let text = &self.src[start..end];
        let value: f64 = text
            .parse()
            .map_err(|_| TemplateError::syntax(format!("invalid number '{text}'")))?;
        self.pos = end;
        Ok(Token {
            kind: TokenKind::Number(value),
            start,
            end,
        })
    }

    fn string(&mut self, start: usize, quote: u8) -> Result<Token> {
        let body_start = start + 1;
        let close = self.src.as_bytes()[body_start..]
            .iter()
            .position(|&b| b == quote)
            .ok_or_else(|| {
                TemplateError::syntax(format!("unterminated string starting at offset {start}"))
            })?;

        let body_end = body_start + close;
        self.pos = body_end + 1;
        Ok(Token {
            kind: TokenKind::Str(self.src[body_start..body_end].to_string()),
            start,
            end: self.pos,
        })
    }

    fn word(&mut self, start: usize) -> Token {
        let bytes = self.src.as_bytes();
        let mut end = start;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }
        self.pos = end;

        let kind = match &self.src[start..end] {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "in" => TokenKind::In,
            ident => TokenKind::Ident(ident.to_string()),
        };
        Token { kind, start, end }
    }
}
