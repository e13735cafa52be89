use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{Catch, FuncDef, Node, NodeKind, Param};
use crate::error::ParseError;
use crate::token::{Pos, Token, TokenKind};
use crate::types::Type;

use super::{ParseResult, Parser};

/// Whether a token can begin an expression, for the optional operands of
/// `return` and `last`.
fn starts_expression(token: &Token) -> bool {
    use TokenKind::*;
    match token.kind {
        Int | Hex | Flt | DquoteString | SquoteString | DquoteStringI | SquoteStringI | Ident
        | TokenKind::Type | LParen | LBracket | LBrace | Bang | Not | Plus | Minus | PlusPlus
        | MinusMinus => true,
        Keyword => matches!(
            token.lexeme.as_str(),
            "null" | "true" | "false" | "fn" | "if" | "while" | "try" | "exists" | "delete"
                | "keys" | "values" | "throw" | "return" | "next" | "last"
        ),
        _ => false,
    }
}

impl Parser {
    pub(crate) fn parse_keyword_form(&mut self, token: Token) -> ParseResult<Node> {
        self.next_token();
        let pos = token.pos;
        match token.lexeme.as_str() {
            "null" => Ok(Node::new(NodeKind::NullLit, pos)),
            "true" => Ok(Node::new(NodeKind::BoolLit(true), pos)),
            "false" => Ok(Node::new(NodeKind::BoolLit(false), pos)),
            "fn" => self.parse_fn(pos),
            "var" => self.parse_var(pos),
            "return" => {
                let value = self.parse_optional_operand()?;
                Ok(Node::new(NodeKind::Return(value), pos))
            }
            "while" => {
                self.expect(TokenKind::LParen, "'(' after 'while'")?;
                let cond = self.parse_expr(0)?;
                self.expect(TokenKind::RParen, "')' after loop condition")?;
                let body = self.parse_expr(0)?;
                Ok(Node::new(
                    NodeKind::While {
                        cond: Box::new(cond),
                        body: Box::new(body),
                    },
                    pos,
                ))
            }
            "next" => Ok(Node::new(NodeKind::Next, pos)),
            "last" => {
                let value = self.parse_optional_operand()?;
                Ok(Node::new(NodeKind::Last(value), pos))
            }
            "if" => {
                let cond = self.parse_expr(0)?;
                self.expect_keyword("then", "'then' after condition")?;
                let then = self.parse_expr(0)?;
                let els = match self.consume_keyword("else") {
                    Some(_) => Some(Box::new(self.parse_expr(0)?)),
                    None => None,
                };
                Ok(Node::new(
                    NodeKind::Cond {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        els,
                    },
                    pos,
                ))
            }
            "exists" => {
                let target = self.parse_expr(15)?;
                Ok(Node::new(NodeKind::Exists(Box::new(target)), pos))
            }
            "delete" => {
                let target = self.parse_expr(15)?;
                Ok(Node::new(NodeKind::Delete(Box::new(target)), pos))
            }
            "keys" => {
                let target = self.parse_expr(15)?;
                Ok(Node::new(NodeKind::Keys(Box::new(target)), pos))
            }
            "values" => {
                let target = self.parse_expr(15)?;
                Ok(Node::new(NodeKind::Values(Box::new(target)), pos))
            }
            "try" => self.parse_try(pos),
            "throw" => {
                let value = self.parse_expr(0)?;
                Ok(Node::new(NodeKind::Throw(Box::new(value)), pos))
            }
            "type" => self.parse_type_decl(pos),
            "module" => {
                let path = self.parse_module_path()?;
                Ok(Node::new(NodeKind::ModuleDecl(path), pos))
            }
            "import" => {
                let path = self.parse_module_path()?;
                let alias = match self.consume_keyword("as") {
                    Some(_) => Some(self.expect(TokenKind::Ident, "module alias")?.lexeme),
                    None => None,
                };
                Ok(Node::new(NodeKind::Import { path, alias }, pos))
            }
            "else" => Err(ParseError::new("'else' without a matching 'if'", pos, 4)),
            other => Err(ParseError::new(
                format!("unexpected keyword '{}'", other),
                pos,
                other.len(),
            )),
        }
    }

    fn expect_keyword(&mut self, word: &str, context: &str) -> ParseResult<Token> {
        match self.consume_keyword(word) {
            Some(token) => Ok(token),
            None => Err(self.unexpected(context)),
        }
    }

    fn parse_optional_operand(&mut self) -> ParseResult<Option<Box<Node>>> {
        if self.peek().map_or(false, starts_expression) {
            Ok(Some(Box::new(self.parse_expr(0)?)))
        } else {
            Ok(None)
        }
    }

    /// `fn name? (params)? (-> type)? body`, parameters being
    /// `name (: type)? (= default)?` with defaults only at the tail.
    fn parse_fn(&mut self, pos: Pos) -> ParseResult<Node> {
        let name = self.consume(TokenKind::Ident).map(|t| t.lexeme);
        let mut params = Vec::new();
        if self.consume(TokenKind::LParen).is_some() {
            let mut saw_default = false;
            loop {
                if self.check(TokenKind::RParen) {
                    break;
                }
                let pname = self.expect(TokenKind::Ident, "parameter name")?;
                let ty = match self.consume(TokenKind::Colon) {
                    Some(_) => self.parse_type_expr()?,
                    None => Type::any(),
                };
                let default = match self.consume(TokenKind::Assign) {
                    Some(_) => Some(self.parse_expr(0)?),
                    None => None,
                };
                if default.is_none() && saw_default {
                    return Err(ParseError::new(
                        format!(
                            "parameter '{}' without a default may not follow defaulted parameters",
                            pname.lexeme
                        ),
                        pname.pos,
                        pname.lexeme.len(),
                    ));
                }
                saw_default |= default.is_some();
                params.push(Param {
                    name: pname.lexeme,
                    ty,
                    default,
                });
                if self.consume(TokenKind::Comma).is_none() {
                    break;
                }
            }
            self.expect(TokenKind::RParen, "')' after parameters")?;
        }
        let ret = match self.consume(TokenKind::RArrow) {
            Some(_) => self.parse_type_expr()?,
            None => Type::any(),
        };
        let body = self.parse_expr(0)?;
        let def = FuncDef {
            name,
            params: RefCell::new(params),
            ret: RefCell::new(ret),
            body: RefCell::new(body),
        };
        Ok(Node::new(NodeKind::FuncDef(Rc::new(def)), pos))
    }

    /// `var name (: type)? (= init)?`.
    fn parse_var(&mut self, pos: Pos) -> ParseResult<Node> {
        let name = self.expect(TokenKind::Ident, "variable name")?;
        let ty = match self.consume(TokenKind::Colon) {
            Some(_) => self.parse_type_expr()?,
            None => Type::any(),
        };
        let init = match self.consume(TokenKind::Assign) {
            Some(_) => Some(Box::new(self.parse_expr(0)?)),
            None => None,
        };
        Ok(Node::new(
            NodeKind::VarDecl {
                name: name.lexeme,
                ty,
                init,
            },
            pos,
        ))
    }

    /// `try body (catch ("text") handler)* catch handler`. A
    /// parenthesized expression after `catch` is a condition only when
    /// a handler expression follows it; otherwise it was the handler.
    fn parse_try(&mut self, pos: Pos) -> ParseResult<Node> {
        let body = self.parse_expr(0)?;
        let mut catches = Vec::new();
        while self.consume_keyword("catch").is_some() {
            let mut cond = None;
            if self.check(TokenKind::LParen) {
                self.checkpoint();
                self.next_token();
                match self.parse_expr(0) {
                    Ok(parsed) => {
                        let closed = self.consume(TokenKind::RParen).is_some();
                        let has_handler = self.peek().map_or(false, starts_expression);
                        if closed && has_handler {
                            self.commit();
                            cond = Some(parsed);
                        } else {
                            self.restore();
                        }
                    }
                    Err(_) => self.restore(),
                }
            }
            let handler = self.parse_expr(0)?;
            catches.push(Catch { cond, handler });
        }
        if catches.is_empty() {
            return Err(ParseError::new("'try' requires at least one 'catch'", pos, 3));
        }
        Ok(Node::new(
            NodeKind::Try {
                body: Box::new(body),
                catches,
            },
            pos,
        ))
    }

    /// `type Name : Parent` (nominal subtype), `type Name = T` (alias),
    /// or bare `type Name` (subtype of Any). The new name joins the
    /// parser's recognition set immediately.
    fn parse_type_decl(&mut self, pos: Pos) -> ParseResult<Node> {
        let name = self.expect(TokenKind::Ident, "new type name")?;
        let mut parent = None;
        let mut alias = None;
        if self.consume(TokenKind::Colon).is_some() {
            parent = Some(self.expect(TokenKind::Type, "parent type name")?.lexeme);
        } else if self.consume(TokenKind::Assign).is_some() {
            alias = Some(self.parse_type_expr()?);
        }
        self.add_type_name(&name.lexeme);
        Ok(Node::new(
            NodeKind::TypeDecl {
                name: name.lexeme,
                parent,
                alias,
            },
            pos,
        ))
    }

    fn parse_type_atom(&mut self) -> ParseResult<Type> {
        let token = self.expect(TokenKind::Type, "a type name")?;
        Ok(Type::Simple(token.lexeme))
    }

    /// A type annotation: a name or a `|`-joined union of names.
    pub(crate) fn parse_type_expr(&mut self) -> ParseResult<Type> {
        let mut members = vec![self.parse_type_atom()?];
        while self.consume(TokenKind::Pipe).is_some() {
            members.push(self.parse_type_atom()?);
        }
        if members.len() == 1 {
            Ok(members.pop().unwrap())
        } else {
            Ok(Type::union_of(members))
        }
    }

    fn parse_module_path(&mut self) -> ParseResult<String> {
        let first = self.expect(TokenKind::Ident, "module name")?;
        let mut segments = vec![first.lexeme];
        while self.consume(TokenKind::ColonColon).is_some() {
            segments.push(self.expect(TokenKind::Ident, "module path segment")?.lexeme);
        }
        Ok(segments.join("::"))
    }
}
