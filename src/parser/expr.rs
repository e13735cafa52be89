use crate::ast::{AssignOp, BinOp, IncDec, LogicOp, Node, NodeKind, UnOp};
use crate::token::{Pos, TokenKind};

use super::{ParseResult, Parser};

/// Infix/postfix binding power and right-associativity for a token, per
/// the precedence table. `None` means the token ends the expression.
fn infix_power(kind: TokenKind) -> Option<(u8, bool)> {
    use TokenKind::*;
    Some(match kind {
        Or => (1, false),
        And => (2, false),
        DotDot => (4, false),
        Assign | PlusEq | MinusEq | StarEq | SlashEq | DotEq => (5, true),
        Question => (6, true),
        PipePipe => (7, false),
        AmpAmp => (8, false),
        Eq | NotEq => (9, false),
        Less | LessEq | Greater | GreaterEq => (10, false),
        CaretCaret | Tilde => (11, false),
        Plus | Minus => (12, false),
        Star | Slash => (13, false),
        StarStar | Caret => (14, true),
        Percent => (14, false),
        PlusPlus | MinusMinus | LBracket => (16, false),
        LParen => (17, false),
        Dot => (18, false),
        _ => return None,
    })
}

/// Expand backslash escapes in a double-quoted string body.
pub fn unescape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Single-quoted bodies only unescape the quote and the backslash.
fn unescape_single(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && matches!(chars.peek(), Some('\'') | Some('\\')) {
            out.push(chars.next().unwrap());
        } else {
            out.push(c);
        }
    }
    out
}

impl Parser {
    /// Pratt expression parser: parse a prefix form, then fold in infix
    /// and postfix forms while their precedence exceeds `min_prec`.
    pub(crate) fn parse_expr(&mut self, min_prec: u8) -> ParseResult<Node> {
        let mut lhs = self.parse_prefix()?;
        loop {
            let Some(token) = self.peek().cloned() else { break };
            let Some((prec, right)) = infix_power(token.kind) else { break };
            if prec <= min_prec {
                break;
            }
            self.next_token();
            lhs = self.parse_infix(lhs, token.kind, token.pos, prec, right)?;
        }
        Ok(lhs)
    }

    fn parse_infix(
        &mut self,
        lhs: Node,
        kind: TokenKind,
        pos: Pos,
        prec: u8,
        right: bool,
    ) -> ParseResult<Node> {
        use TokenKind::*;
        let rhs_prec = if right { prec - 1 } else { prec };
        let node = match kind {
            Assign | PlusEq | MinusEq | StarEq | SlashEq | DotEq => {
                let op = match kind {
                    Assign => AssignOp::Assign,
                    PlusEq => AssignOp::Add,
                    MinusEq => AssignOp::Sub,
                    StarEq => AssignOp::Mul,
                    SlashEq => AssignOp::Div,
                    _ => AssignOp::Concat,
                };
                let value = self.parse_expr(rhs_prec)?;
                NodeKind::Assign {
                    op,
                    target: Box::new(lhs),
                    value: Box::new(value),
                }
            }
            Question => {
                let then = self.parse_expr(0)?;
                self.expect(Colon, "':' in ternary")?;
                let els = self.parse_expr(rhs_prec)?;
                NodeKind::Cond {
                    cond: Box::new(lhs),
                    then: Box::new(then),
                    els: Some(Box::new(els)),
                }
            }
            Or | PipePipe | And | AmpAmp => {
                let op = if matches!(kind, Or | PipePipe) {
                    LogicOp::Or
                } else {
                    LogicOp::And
                };
                let rhs = self.parse_expr(rhs_prec)?;
                NodeKind::Logical {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                }
            }
            DotDot => {
                let to = self.parse_expr(rhs_prec)?;
                NodeKind::Range {
                    from: Box::new(lhs),
                    to: Box::new(to),
                }
            }
            PlusPlus => NodeKind::Postfix {
                op: IncDec::Inc,
                target: Box::new(lhs),
            },
            MinusMinus => NodeKind::Postfix {
                op: IncDec::Dec,
                target: Box::new(lhs),
            },
            LBracket => {
                let key = self.parse_expr(0)?;
                self.expect(RBracket, "']' after index")?;
                NodeKind::Access {
                    target: Box::new(lhs),
                    key: Box::new(key),
                }
            }
            LParen => {
                let args = self.parse_call_args()?;
                NodeKind::Call {
                    target: Box::new(lhs),
                    args,
                }
            }
            Dot => {
                let field = self.expect(Ident, "field name after '.'")?;
                NodeKind::Dot {
                    target: Box::new(lhs),
                    field: field.lexeme,
                }
            }
            _ => {
                let op = match kind {
                    Eq => BinOp::Eq,
                    NotEq => BinOp::NotEq,
                    Less => BinOp::Less,
                    LessEq => BinOp::LessEq,
                    Greater => BinOp::Greater,
                    GreaterEq => BinOp::GreaterEq,
                    CaretCaret => BinOp::Concat,
                    Tilde => BinOp::IndexOf,
                    Plus => BinOp::Add,
                    Minus => BinOp::Sub,
                    Star => BinOp::Mul,
                    Slash => BinOp::Div,
                    StarStar | Caret => BinOp::Pow,
                    Percent => BinOp::Rem,
                    other => {
                        return Err(crate::error::ParseError::new(
                            format!("{} is not an infix operator", other),
                            pos,
                            1,
                        ))
                    }
                };
                let rhs = self.parse_expr(rhs_prec)?;
                NodeKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                }
            }
        };
        Ok(Node::new(node, pos))
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Node>> {
        let mut args = Vec::new();
        loop {
            if self.check(TokenKind::RParen) {
                break;
            }
            args.push(self.parse_call_arg()?);
            if self.consume(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')' after arguments")?;
        Ok(args)
    }

    /// One argument; `name = expr` is a named argument, anything else an
    /// ordinary expression. Disambiguated by backtracking.
    fn parse_call_arg(&mut self) -> ParseResult<Node> {
        if self.check(TokenKind::Ident) {
            self.checkpoint();
            let name = self.next_token().expect("checked ident");
            if self.consume(TokenKind::Assign).is_some() {
                self.commit();
                let value = self.parse_expr(0)?;
                return Ok(Node::new(
                    NodeKind::NamedArg {
                        name: name.lexeme,
                        value: Box::new(value),
                    },
                    name.pos,
                ));
            }
            self.restore();
        }
        self.parse_expr(0)
    }

    pub(crate) fn parse_prefix(&mut self) -> ParseResult<Node> {
        use TokenKind::*;
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("an expression"));
        };
        let pos = token.pos;
        match token.kind {
            Int => {
                self.next_token();
                let value: i64 = token
                    .lexeme
                    .parse()
                    .map_err(|_| crate::error::ParseError::new(
                        format!("integer literal '{}' is out of range", token.lexeme),
                        pos,
                        token.lexeme.len(),
                    ))?;
                Ok(Node::new(NodeKind::IntLit(value), pos))
            }
            Hex => {
                self.next_token();
                let digits = &token.lexeme[2..];
                let value = i64::from_str_radix(digits, 16).map_err(|_| {
                    crate::error::ParseError::new(
                        format!("hex literal '{}' is out of range", token.lexeme),
                        pos,
                        token.lexeme.len(),
                    )
                })?;
                Ok(Node::new(NodeKind::IntLit(value), pos))
            }
            Flt => {
                self.next_token();
                let value: f64 = token.lexeme.parse().map_err(|_| {
                    crate::error::ParseError::new(
                        format!("malformed number '{}'", token.lexeme),
                        pos,
                        token.lexeme.len(),
                    )
                })?;
                Ok(Node::new(NodeKind::RealLit(value), pos))
            }
            DquoteString => {
                self.next_token();
                let body = &token.lexeme[1..token.lexeme.len() - 1];
                Ok(Node::new(NodeKind::StrLit(unescape_string(body)), pos))
            }
            SquoteString => {
                self.next_token();
                let body = &token.lexeme[1..token.lexeme.len() - 1];
                Ok(Node::new(NodeKind::StrLit(unescape_single(body)), pos))
            }
            DquoteStringI | SquoteStringI => {
                self.next_token();
                // Strip `$"` and the closing quote; segments are parsed
                // when the value is produced.
                let body = &token.lexeme[2..token.lexeme.len() - 1];
                Ok(Node::new(NodeKind::InterpLit(body.to_string()), pos))
            }
            Ident => {
                self.next_token();
                self.parse_qualified(token.lexeme, pos)
            }
            // A type name in expression position names its cast builtin.
            Type => {
                self.next_token();
                Ok(Node::new(NodeKind::Ident(token.lexeme), pos))
            }
            LParen => {
                self.next_token();
                self.parse_group(pos)
            }
            LBracket => {
                self.next_token();
                self.parse_array_literal(pos)
            }
            LBrace => {
                self.next_token();
                self.parse_map_literal(pos)
            }
            Bang => {
                self.next_token();
                let expr = self.parse_expr(15)?;
                Ok(Node::new(
                    NodeKind::Unary {
                        op: UnOp::Not,
                        expr: Box::new(expr),
                    },
                    pos,
                ))
            }
            Not => {
                self.next_token();
                let expr = self.parse_expr(3)?;
                Ok(Node::new(
                    NodeKind::Unary {
                        op: UnOp::Not,
                        expr: Box::new(expr),
                    },
                    pos,
                ))
            }
            Plus | Minus => {
                self.next_token();
                let op = if token.kind == Plus { UnOp::Pos } else { UnOp::Neg };
                let expr = self.parse_expr(15)?;
                Ok(Node::new(
                    NodeKind::Unary {
                        op,
                        expr: Box::new(expr),
                    },
                    pos,
                ))
            }
            PlusPlus | MinusMinus => {
                self.next_token();
                let op = if token.kind == PlusPlus { IncDec::Inc } else { IncDec::Dec };
                let target = self.parse_expr(15)?;
                Ok(Node::new(
                    NodeKind::Prefix {
                        op,
                        target: Box::new(target),
                    },
                    pos,
                ))
            }
            Keyword => self.parse_keyword_form(token),
            Other => Err(crate::error::ParseError::new(
                format!("unexpected character '{}'", token.lexeme),
                pos,
                token.lexeme.chars().count(),
            )),
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// `a`, or `a::b::c` as a qualified identifier.
    fn parse_qualified(&mut self, first: String, pos: Pos) -> ParseResult<Node> {
        let mut segments = vec![first];
        while self.consume(TokenKind::ColonColon).is_some() {
            let seg = self.expect(TokenKind::Ident, "identifier after '::'")?;
            segments.push(seg.lexeme);
        }
        if segments.len() == 1 {
            return Ok(Node::new(NodeKind::Ident(segments.pop().unwrap()), pos));
        }
        let name = segments.pop().unwrap();
        Ok(Node::new(
            NodeKind::QualIdent {
                module: segments.join("::"),
                name,
            },
            pos,
        ))
    }

    /// `( expr )` is grouping; `( e1; e2; … )` is a block evaluating to
    /// its last expression in a child scope.
    fn parse_group(&mut self, pos: Pos) -> ParseResult<Node> {
        let first = self.parse_expr(0)?;
        if !self.check(TokenKind::Term) {
            self.expect(TokenKind::RParen, "')' after expression")?;
            return Ok(first);
        }
        let mut body = vec![first];
        loop {
            while self.consume(TokenKind::Term).is_some() {}
            if self.check(TokenKind::RParen) {
                break;
            }
            body.push(self.parse_expr(0)?);
            if !self.check(TokenKind::RParen) {
                self.expect(TokenKind::Term, "';' between block expressions")?;
            }
        }
        self.expect(TokenKind::RParen, "')' to close block")?;
        Ok(Node::new(NodeKind::Block(body), pos))
    }

    fn parse_array_literal(&mut self, pos: Pos) -> ParseResult<Node> {
        let mut items = Vec::new();
        loop {
            if self.check(TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_expr(0)?);
            if self.consume(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RBracket, "']' to close array")?;
        Ok(Node::new(NodeKind::ArrayLit(items), pos))
    }

    /// `{ key: value, … }`; keys are string literals or identifiers
    /// naming declared String variables.
    fn parse_map_literal(&mut self, pos: Pos) -> ParseResult<Node> {
        let mut entries = Vec::new();
        loop {
            if self.check(TokenKind::RBrace) {
                break;
            }
            let key = self.parse_expr(0)?;
            self.expect(TokenKind::Colon, "':' after map key")?;
            let value = self.parse_expr(0)?;
            entries.push((key, value));
            if self.consume(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}' to close map")?;
        Ok(Node::new(NodeKind::MapLit(entries), pos))
    }
}
