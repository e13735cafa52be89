use once_cell::sync::Lazy;
use regex::Regex;

use crate::token::{Pos, Token, TokenKind};

/// The token table, tried in order at the current position. First match
/// wins, so the multi-character operators sit above their prefixes and
/// the word operators sit above IDENT.
static RULES: Lazy<Vec<(TokenKind, Regex)>> = Lazy::new(|| {
    use TokenKind::*;
    let table: &[(TokenKind, &str)] = &[
        (CommentEol, r"#.*"),
        (CommentInline, r"/\*.*?\*/"),
        (CommentMulti, r"/\*.*"),
        (DquoteStringI, r#"\$"(?:\\.|[^"\\])*""#),
        (SquoteStringI, r"\$'(?:\\.|[^'\\])*'"),
        (DquoteString, r#""(?:\\.|[^"\\])*""#),
        (SquoteString, r"'(?:\\.|[^'\\])*'"),
        (EqTilde, r"=~"),
        (BangTilde, r"!~"),
        (NotEq, r"!="),
        (GreaterEq, r">="),
        (LessEq, r"<="),
        (Eq, r"=="),
        (SlashEq, r"/="),
        (StarEq, r"\*="),
        (MinusEq, r"-="),
        (PlusEq, r"\+="),
        (DotEq, r"\.="),
        (PlusPlus, r"\+\+"),
        (StarStar, r"\*\*"),
        (MinusMinus, r"--"),
        (RArrow, r"->"),
        (Assign, r"="),
        (Plus, r"\+"),
        (Minus, r"-"),
        (Greater, r">"),
        (Less, r"<"),
        (Bang, r"!"),
        (Question, r"\?"),
        (ColonColon, r"::"),
        (Colon, r":"),
        (Tilde, r"~"),
        (PipePipe, r"\|\|"),
        (Pipe, r"\|"),
        (AmpAmp, r"&&"),
        (CaretCaret, r"\^\^"),
        (Caret, r"\^"),
        (Percent, r"%"),
        (Pound, r"#"),
        (Comma, r","),
        (Star, r"\*"),
        (Slash, r"/"),
        (Bslash, r"\\"),
        (LBracket, r"\["),
        (RBracket, r"\]"),
        (LParen, r"\("),
        (RParen, r"\)"),
        (LBrace, r"\{"),
        (RBrace, r"\}"),
        (DotDot, r"\.\."),
        (Dot, r"\."),
        (Not, r"not\b"),
        (And, r"and\b"),
        (Or, r"or\b"),
        (Ident, r"[A-Za-z_][A-Za-z0-9_]*"),
        (Hex, r"0[xX][0-9a-fA-F]+"),
        (Flt, r"(?:[0-9]+\.[0-9]+(?:[eE][-+]?[0-9]+)?|[0-9]+[eE][-+]?[0-9]+)"),
        (Int, r"[0-9]+"),
        (Term, r";"),
        (Whitespace, r"[ \t\r\n]+"),
        (Other, r"."),
    ];
    table
        .iter()
        .map(|(kind, pat)| {
            let re = Regex::new(&format!("^(?:{})", pat)).expect("token pattern");
            (*kind, re)
        })
        .collect()
});

/// Lazy tokenizer over a line iterator.
///
/// Whitespace and comments are consumed and discarded; everything else is
/// emitted as a `Token` carrying the line/col of its first character. A
/// `/*` with no terminator on its line switches into a sub-mode that eats
/// whole lines until `*/` is found. Anything unclassifiable falls through
/// to the OTHER catch-all, which the parser reports as unexpected.
pub struct Lexer {
    lines: Vec<String>,
    line_idx: usize,
    /// Byte offset into the current line.
    col: usize,
    in_comment: bool,
}

impl Lexer {
    pub fn new<I>(lines: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Lexer {
            lines: lines.into_iter().map(Into::into).collect(),
            line_idx: 0,
            col: 0,
            in_comment: false,
        }
    }

    pub fn from_source(source: &str) -> Self {
        Lexer::new(source.lines().map(str::to_string))
    }

    /// Rewind to the start of the input, leaving the comment sub-mode.
    pub fn reset(&mut self) {
        log::trace!("lexer reset");
        self.line_idx = 0;
        self.col = 0;
        self.in_comment = false;
    }

    fn scan(&mut self) -> Option<Token> {
        loop {
            let line = self.lines.get(self.line_idx)?;
            if self.col >= line.len() {
                self.line_idx += 1;
                self.col = 0;
                continue;
            }

            if self.in_comment {
                match line[self.col..].find("*/") {
                    Some(off) => {
                        self.col += off + 2;
                        self.in_comment = false;
                    }
                    None => {
                        self.line_idx += 1;
                        self.col = 0;
                    }
                }
                continue;
            }

            let rest = &line[self.col..];
            let (kind, m) = RULES
                .iter()
                .find_map(|(kind, re)| re.find(rest).map(|m| (*kind, m)))
                .expect("OTHER matches any character");

            let pos = Pos::new(
                self.line_idx as u32 + 1,
                line[..self.col].chars().count() as u32 + 1,
            );
            let lexeme = m.as_str().to_string();
            self.col += m.end();

            match kind {
                TokenKind::Whitespace | TokenKind::CommentEol | TokenKind::CommentInline => {
                    continue;
                }
                TokenKind::CommentMulti => {
                    self.in_comment = true;
                    continue;
                }
                _ => return Some(Token::new(kind, lexeme, pos)),
            }
        }
    }
}

impl Iterator for Lexer {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.scan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::from_source(source).map(|t| t.kind).collect()
    }

    #[test]
    fn arithmetic_expression() {
        use TokenKind::*;
        assert_eq!(
            kinds("1 + 4 * 3;"),
            vec![Int, Plus, Int, Star, Int, Term]
        );
    }

    #[test]
    fn compound_operators_win_over_prefixes() {
        use TokenKind::*;
        assert_eq!(kinds("a += 1"), vec![Ident, PlusEq, Int]);
        assert_eq!(kinds("a ** 2"), vec![Ident, StarStar, Int]);
        assert_eq!(kinds("a .. b"), vec![Ident, DotDot, Ident]);
        assert_eq!(kinds("x++"), vec![Ident, PlusPlus]);
        assert_eq!(kinds("-> ="), vec![RArrow, Assign]);
    }

    #[test]
    fn word_operators_are_not_identifiers() {
        use TokenKind::*;
        assert_eq!(kinds("a and b or not c"), vec![Ident, And, Ident, Or, Not, Ident]);
        // A word merely starting with an operator stays an identifier.
        assert_eq!(kinds("android"), vec![Ident]);
    }

    #[test]
    fn numeric_classes() {
        use TokenKind::*;
        assert_eq!(kinds("0x1F 3.25 1e9 42"), vec![Hex, Flt, Flt, Int]);
        // A range between integers must not lex as a float.
        assert_eq!(kinds("1..5"), vec![Int, DotDot, Int]);
    }

    #[test]
    fn string_classes() {
        use TokenKind::*;
        assert_eq!(
            kinds(r#""plain" $"interp {x}" 'single'"#),
            vec![DquoteString, DquoteStringI, SquoteString]
        );
        let toks: Vec<Token> = Lexer::from_source(r#""say \"hi\"""#).collect();
        assert_eq!(toks[0].kind, DquoteString);
        assert_eq!(toks[0].lexeme, r#""say \"hi\"""#);
    }

    #[test]
    fn comments_are_discarded() {
        use TokenKind::*;
        assert_eq!(kinds("1 # trailing"), vec![Int]);
        assert_eq!(kinds("1 /* inline */ 2"), vec![Int, Int]);
        assert_eq!(kinds("1 /* open\nstill comment\nend */ 2"), vec![Int, Int]);
    }

    #[test]
    fn positions_are_line_and_col() {
        let toks: Vec<Token> = Lexer::from_source("ab\n  cd").collect();
        assert_eq!(toks[0].pos, Pos::new(1, 1));
        assert_eq!(toks[1].pos, Pos::new(2, 3));
    }

    #[test]
    fn unclassified_input_becomes_other() {
        use TokenKind::*;
        assert_eq!(kinds("a @ b"), vec![Ident, Other, Ident]);
    }

    #[test]
    fn reset_rewinds_to_the_start() {
        let mut lexer = Lexer::from_source("a b");
        assert_eq!(lexer.next().unwrap().lexeme, "a");
        lexer.reset();
        assert_eq!(lexer.next().unwrap().lexeme, "a");
    }
}
