use std::fmt;
use thiserror::Error;

use crate::style::Style;
use crate::token::Pos;

/// One recovered-from parse diagnostic.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub pos: Pos,
    /// Width of the offending lexeme, for underlining.
    pub len: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, pos: Pos, len: usize) -> Self {
        ParseError {
            message: message.into(),
            pos,
            len: len.max(1),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error at {}: {}", self.pos, self.message)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))]
pub struct ParseErrors(pub Vec<ParseError>);

#[derive(Debug, Clone, Error)]
#[error("Validation error at {pos}: {message}")]
pub struct ValidateError {
    pub message: String,
    pub pos: Pos,
}

impl ValidateError {
    pub fn new(message: impl Into<String>, pos: Pos) -> Self {
        ValidateError {
            message: message.into(),
            pos,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Import error in module {module}: {message}")]
pub struct ImportError {
    pub module: String,
    pub message: String,
    pub pos: Pos,
}

/// Evaluator failures. `Exception` is the catchable kind raised by
/// `throw` (and by the host's numeric errors); `Error` is fatal, which
/// includes the recursion and iteration limits.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("Runtime error at {pos}: {message}")]
    Error { message: String, pos: Pos },
    #[error("Unhandled exception: {0}")]
    Exception(String),
}

impl RuntimeError {
    pub fn fatal(message: impl Into<String>, pos: Pos) -> Self {
        RuntimeError::Error {
            message: message.into(),
            pos,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PlangError {
    #[error("{0}")]
    Parse(#[from] ParseErrors),
    #[error("{0}")]
    Validate(#[from] ValidateError),
    #[error("{0}")]
    Import(#[from] ImportError),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
}

impl PlangError {
    /// Full diagnostic with source snippets, for the CLI.
    pub fn render(&self, source: &str) -> String {
        match self {
            PlangError::Parse(errors) => errors
                .0
                .iter()
                .map(|e| render_snippet(source, &e.to_string(), e.pos, e.len))
                .collect::<Vec<_>>()
                .join("\n\n"),
            PlangError::Validate(e) => render_snippet(source, &e.to_string(), e.pos, 1),
            PlangError::Import(e) => render_snippet(source, &e.to_string(), e.pos, 1),
            PlangError::Runtime(RuntimeError::Error { message, pos }) => {
                render_snippet(source, &format!("Runtime error: {}", message), *pos, 1)
            }
            PlangError::Runtime(e) => format!("{}: {}", Style::bold_red("error"), e),
        }
    }
}

/// Underline the offending position in its source line, with a line
/// number gutter.
fn render_snippet(source: &str, message: &str, pos: Pos, len: usize) -> String {
    let header = format!("{}: {}", Style::bold_red("error"), message);
    if pos.is_eof() {
        return header;
    }
    let line = match source.lines().nth(pos.line as usize - 1) {
        Some(line) => line,
        None => return header,
    };
    let col = pos.col.saturating_sub(1) as usize;
    let underline = format!("{}{}", " ".repeat(col), "^".repeat(len.max(1)));
    format!(
        "{}\n\n{} {} {}\n     {} {}",
        header,
        Style::blue(&format!("{:4}", pos.line)),
        Style::blue("|"),
        line,
        Style::blue("|"),
        Style::red(&underline),
    )
}
