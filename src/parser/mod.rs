mod expr;
mod forms;

pub use expr::unescape_string;

#[cfg(test)]
mod tests;

use std::collections::HashSet;

use crate::ast::{Node, NodeKind};
use crate::error::{ParseError, ParseErrors};
use crate::lexer::Lexer;
use crate::token::{Pos, Token, TokenKind, KEYWORDS};

pub(crate) type ParseResult<T> = Result<T, ParseError>;

/// Parse errors tolerated before the parser gives up.
pub const MAX_PARSE_ERRORS: usize = 3;

/// Backtracking token-stream parser.
///
/// Tokens are pulled lazily from the lexer into `read`; `current` indexes
/// the next unconsumed one. IDENT tokens are upgraded to KEYWORD or TYPE
/// against the recognition sets as they arrive, so `type` declarations
/// extend what later input may name. Checkpoints save `current` for
/// speculative parses.
pub struct Parser {
    lexer: Lexer,
    read: Vec<Token>,
    current: usize,
    checkpoints: Vec<usize>,
    errors: Vec<ParseError>,
    keywords: HashSet<String>,
    type_names: HashSet<String>,
    max_errors: usize,
}

impl Parser {
    pub fn new(lexer: Lexer, type_names: HashSet<String>) -> Self {
        Parser {
            lexer,
            read: Vec::new(),
            current: 0,
            checkpoints: Vec::new(),
            errors: Vec::new(),
            keywords: KEYWORDS.iter().map(|k| k.to_string()).collect(),
            type_names,
            max_errors: MAX_PARSE_ERRORS,
        }
    }

    pub fn from_source(source: &str, type_names: HashSet<String>) -> Self {
        Parser::new(Lexer::from_source(source), type_names)
    }

    /// Names declared by `type` during this parse, for the caller to
    /// fold back into the type system's recognition set.
    pub fn add_type_name(&mut self, name: &str) {
        self.type_names.insert(name.to_string());
    }

    fn pull(&mut self) -> bool {
        match self.lexer.next() {
            Some(mut token) => {
                if token.kind == TokenKind::Ident {
                    if self.keywords.contains(&token.lexeme) {
                        token.kind = TokenKind::Keyword;
                    } else if self.type_names.contains(&token.lexeme) {
                        token.kind = TokenKind::Type;
                    }
                }
                self.read.push(token);
                true
            }
            None => false,
        }
    }

    /// Next unconsumed token, without advancing.
    pub(crate) fn peek(&mut self) -> Option<&Token> {
        while self.read.len() <= self.current {
            if !self.pull() {
                return None;
            }
        }
        self.read.get(self.current)
    }

    /// Position for diagnostics: the next token's, or EOF.
    pub(crate) fn here(&mut self) -> Pos {
        self.peek().map(|t| t.pos).unwrap_or(Pos::EOF)
    }

    pub(crate) fn at_end(&mut self) -> bool {
        self.peek().is_none()
    }

    /// Consume and return the next token.
    pub(crate) fn next_token(&mut self) -> Option<Token> {
        let token = self.peek()?.clone();
        self.current += 1;
        Some(token)
    }

    pub(crate) fn check(&mut self, kind: TokenKind) -> bool {
        self.peek().map_or(false, |t| t.kind == kind)
    }

    pub(crate) fn check_keyword(&mut self, word: &str) -> bool {
        self.peek()
            .map_or(false, |t| t.kind == TokenKind::Keyword && t.lexeme == word)
    }

    /// Consume the next token only when its kind matches; otherwise the
    /// position is untouched.
    pub(crate) fn consume(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            self.next_token()
        } else {
            None
        }
    }

    pub(crate) fn consume_keyword(&mut self, word: &str) -> Option<Token> {
        if self.check_keyword(word) {
            self.next_token()
        } else {
            None
        }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind, context: &str) -> ParseResult<Token> {
        if let Some(token) = self.consume(kind) {
            return Ok(token);
        }
        Err(self.unexpected(context))
    }

    pub(crate) fn unexpected(&mut self, context: &str) -> ParseError {
        match self.peek().cloned() {
            Some(token) => ParseError::new(
                format!("expected {}, found {} '{}'", context, token.kind, token.lexeme),
                token.pos,
                token.lexeme.chars().count(),
            ),
            None => ParseError::new(format!("expected {}, found end of input", context), Pos::EOF, 1),
        }
    }

    // Speculative parsing. `checkpoint` pushes the current position,
    // `commit` pops it, `restore` pops and rewinds.

    pub(crate) fn checkpoint(&mut self) {
        self.checkpoints.push(self.current);
    }

    pub(crate) fn commit(&mut self) {
        self.checkpoints.pop();
    }

    pub(crate) fn restore(&mut self) {
        if let Some(at) = self.checkpoints.pop() {
            self.current = at;
        }
    }

    /// Record a diagnostic and discard input through the next statement
    /// terminator. Live checkpoint frames are rewritten to the recovery
    /// point so an enclosing speculative parse cannot rewind past it.
    fn recover(&mut self, error: ParseError) {
        log::debug!("parse recovery at {}: {}", error.pos, error.message);
        self.errors.push(error);
        while let Some(token) = self.next_token() {
            if token.kind == TokenKind::Term {
                break;
            }
        }
        let at = self.current;
        for frame in &mut self.checkpoints {
            *frame = at;
        }
    }

    /// Start rule: collect statements into a program node, recovering
    /// from up to `max_errors` diagnostics.
    pub fn parse_program(&mut self) -> Result<Node, ParseErrors> {
        let mut body = Vec::new();
        loop {
            while self.consume(TokenKind::Term).is_some() {}
            if self.at_end() {
                break;
            }
            if self.errors.len() >= self.max_errors {
                let message = format!("aborting after {} errors", self.errors.len());
                let pos = self.here();
                self.errors.push(ParseError::new(message, pos, 1));
                break;
            }
            match self.parse_statement() {
                Ok(node) => {
                    if !node.is_nop() {
                        body.push(node);
                    }
                    if !self.at_end() && self.consume(TokenKind::Term).is_none() {
                        let error = self.unexpected("';' after expression");
                        self.recover(error);
                    }
                }
                Err(error) => self.recover(error),
            }
        }
        if self.errors.is_empty() {
            Ok(Node::new(NodeKind::Program(body), Pos::new(1, 1)))
        } else {
            Err(ParseErrors(std::mem::take(&mut self.errors)))
        }
    }

    pub(crate) fn parse_statement(&mut self) -> ParseResult<Node> {
        self.parse_expr(0)
    }
}
