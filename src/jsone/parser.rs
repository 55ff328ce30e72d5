//! Expression parser (Pratt style)
//!
//! Precedence, loosest first:
//!
//! ```text
//! ||
//! &&
//! in
//! == !=
//! < > <= >=
//! + -
//! * /
//! **            (right associative)
//! ! - +         (unary)
//! . [] ()       (postfix)
//! ```

use super::error::{Result, TemplateError};
use super::lexer::{Lexer, Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Dot(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Slice(Box<Expr>, Option<Box<Expr>>, Option<Box<Expr>>),
    Call(Box<Expr>, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    In,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::In => "in",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::LtEq => "<=",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "**",
        }
    }
}

const UNARY_BP: u8 = 17;
const POSTFIX_BP: u8 = 19;

/// (left bp, right bp, operator) for infix tokens
fn infix_binding(kind: &TokenKind) -> Option<(u8, u8, BinaryOp)> {
    let entry = match kind {
        TokenKind::OrOr => (1, 2, BinaryOp::Or),
        TokenKind::AndAnd => (3, 4, BinaryOp::And),
        TokenKind::In => (5, 6, BinaryOp::In),
        TokenKind::EqEq => (7, 8, BinaryOp::Eq),
        TokenKind::NotEq => (7, 8, BinaryOp::NotEq),
        TokenKind::Lt => (9, 10, BinaryOp::Lt),
        TokenKind::Gt => (9, 10, BinaryOp::Gt),
        TokenKind::LtEq => (9, 10, BinaryOp::LtEq),
        TokenKind::GtEq => (9, 10, BinaryOp::GtEq),
        TokenKind::Plus => (11, 12, BinaryOp::Add),
        TokenKind::Minus => (11, 12, BinaryOp::Sub),
        TokenKind::Star => (13, 14, BinaryOp::Mul),
        TokenKind::Slash => (13, 14, BinaryOp::Div),
        TokenKind::StarStar => (16, 15, BinaryOp::Pow),
        _ => return None,
    };
    Some(entry)
}

fn is_postfix(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Dot | TokenKind::LBracket | TokenKind::LParen
    )
}

/// Parse a complete expression; trailing tokens are an error
pub fn parse_expression(src: &str) -> Result<Expr> {
    let mut parser = Parser::new(src, 0);
    let expr = parser.expression(0)?;
    if let Some(token) = parser.next()? {
        return Err(TemplateError::syntax(format!(
            "unexpected {} at offset {} in '{}'",
            token.kind.describe(),
            token.start,
            src
        )));
    }
    Ok(expr)
}

/// Parse the expression of a `${..}` that starts at byte `start`
///
/// Returns the expression and the offset just past the closing `}`.
pub fn parse_interpolation(src: &str, start: usize) -> Result<(Expr, usize)> {
    let mut parser = Parser::new(src, start);
    let expr = parser.expression(0)?;
    match parser.next()? {
        Some(Token {
            kind: TokenKind::RBrace,
            end,
            ..
        }) => Ok((expr, end)),
        _ => Err(TemplateError::syntax(format!(
            "unterminated ${{..}} expression in '{src}'"
        ))),
    }
}

struct Parser<'s> {
    lexer: Lexer<'s>,
    peeked: Option<Token>,
}

impl<'s> Parser<'s> {
    fn new(src: &'s str, start: usize) -> Self {
        Self {
            lexer: Lexer::new(src, start),
            peeked: None,
        }
    }

    fn peek(&mut self) -> Result<Option<&Token>> {
        if self.peeked.is_none() {
            self.peeked = self.lexer.next_token()?;
        }
        Ok(self.peeked.as_ref())
    }

    fn next(&mut self) -> Result<Option<Token>> {
        match self.peeked.take() {
            Some(token) => Ok(Some(token)),
            None => self.lexer.next_token(),
        }
    }

    fn peek_is(&mut self, kind: &TokenKind) -> Result<bool> {
        Ok(self.peek()?.is_some_and(|t| &t.kind == kind))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        match self.next()? {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(TemplateError::syntax(format!(
                "expected {} but found {} at offset {}",
                kind.describe(),
                token.kind.describe(),
                token.start
            ))),
            None => Err(TemplateError::syntax(format!(
                "expected {} but reached end of expression",
                kind.describe()
            ))),
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr> {
        let mut lhs = self.prefix()?;

        loop {
            let kind = match self.peek()? {
                Some(token) => token.kind.clone(),
                None => break,
            };

            if is_postfix(&kind) {
                if POSTFIX_BP < min_bp {
                    break;
                }
                self.next()?;
                lhs = self.postfix(lhs, &kind)?;
                continue;
            }

            let Some((lbp, rbp, op)) = infix_binding(&kind) else {
                break;
            };
            if lbp < min_bp {
                break;
            }
            self.next()?;
            let rhs = self.expression(rbp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr> {
        let Some(token) = self.next()? else {
            return Err(TemplateError::syntax("unexpected end of expression"));
        };

        let expr = match token.kind {
            TokenKind::Number(n) => Expr::Number(n),
            TokenKind::Str(s) => Expr::String(s),
            TokenKind::Ident(name) => Expr::Ident(name),
            TokenKind::True => Expr::Bool(true),
            TokenKind::False => Expr::Bool(false),
            TokenKind::Null => Expr::Null,
            TokenKind::Bang => Expr::Unary(UnaryOp::Not, Box::new(self.expression(UNARY_BP)?)),
            TokenKind::Minus => Expr::Unary(UnaryOp::Neg, Box::new(self.expression(UNARY_BP)?)),
            TokenKind::Plus => Expr::Unary(UnaryOp::Pos, Box::new(self.expression(UNARY_BP)?)),
            TokenKind::LParen => {
                let inner = self.expression(0)?;
                self.expect(TokenKind::RParen)?;
                inner
            }
            TokenKind::LBracket => Expr::Array(self.list(TokenKind::RBracket)?),
            TokenKind::LBrace => self.object()?,
            other => {
                return Err(TemplateError::syntax(format!(
                    "unexpected {} at offset {}",
                    other.describe(),
                    token.start
                )))
            }
        };
        Ok(expr)
    }

    fn postfix(&mut self, lhs: Expr, kind: &TokenKind) -> Result<Expr> {
        match kind {
            TokenKind::Dot => match self.next()? {
                Some(Token {
                    kind: TokenKind::Ident(name),
                    ..
                }) => Ok(Expr::Dot(Box::new(lhs), name)),
                Some(token) => Err(TemplateError::syntax(format!(
                    "expected identifier after '.' but found {}",
                    token.kind.describe()
                ))),
                None => Err(TemplateError::syntax(
                    "expected identifier after '.' but reached end of expression",
                )),
            },
            TokenKind::LParen => Ok(Expr::Call(Box::new(lhs), self.list(TokenKind::RParen)?)),
            _ => self.subscript(lhs),
        }
    }

    /// `a[i]`, `a[i:j]`, `a[:j]`, `a[i:]`
    fn subscript(&mut self, lhs: Expr) -> Result<Expr> {
        let target = Box::new(lhs);

        if self.peek_is(&TokenKind::Colon)? {
            self.next()?;
            let end = self.slice_end()?;
            return Ok(Expr::Slice(target, None, end));
        }

        let index = self.expression(0)?;
        if self.peek_is(&TokenKind::Colon)? {
            self.next()?;
            let end = self.slice_end()?;
            return Ok(Expr::Slice(target, Some(Box::new(index)), end));
        }

        self.expect(TokenKind::RBracket)?;
        Ok(Expr::Index(target, Box::new(index)))
    }

    fn slice_end(&mut self) -> Result<Option<Box<Expr>>> {
        if self.peek_is(&TokenKind::RBracket)? {
            self.next()?;
            return Ok(None);
        }
        let end = self.expression(0)?;
        self.expect(TokenKind::RBracket)?;
        Ok(Some(Box::new(end)))
    }

    /// Comma separated expressions up to `close` (already past the opener)
    fn list(&mut self, close: TokenKind) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.peek_is(&close)? {
            self.next()?;
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            if self.peek_is(&TokenKind::Comma)? {
                self.next()?;
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }

    fn object(&mut self) -> Result<Expr> {
        let mut entries = Vec::new();
        if self.peek_is(&TokenKind::RBrace)? {
            self.next()?;
            return Ok(Expr::Object(entries));
        }
        loop {
            let key = match self.next()? {
                Some(Token {
                    kind: TokenKind::Ident(name) | TokenKind::Str(name),
                    ..
                }) => name,
                Some(token) => {
                    return Err(TemplateError::syntax(format!(
                        "object keys must be identifiers or strings, found {}",
                        token.kind.describe()
                    )))
                }
                None => return Err(TemplateError::syntax("unterminated object literal")),
            };
            self.expect(TokenKind::Colon)?;
            entries.push((key, self.expression(0)?));

            if self.peek_is(&TokenKind::Comma)? {
                self.next()?;
                continue;
            }
            self.expect(TokenKind::RBrace)?;
            return Ok(Expr::Object(entries));
        }
    }
}
