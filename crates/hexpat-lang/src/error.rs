// Error types for the pattern language
//
// Each pipeline stage reports its own error type; all of them collapse into
// `Error`, which is what the run entry points hand back to the host.

use crate::eval::console::LogEntry;
use crate::span::Span;
use std::fmt;

/// The pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Preprocessing,
    Lexical,
    Parse,
    Validation,
    Evaluation,
    Interrupted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Preprocessing => "preprocessor",
            ErrorKind::Lexical => "lexer",
            ErrorKind::Parse => "parser",
            ErrorKind::Validation => "validator",
            ErrorKind::Evaluation => "evaluator",
            ErrorKind::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// A hard error surfaced by any stage. `line` is 1-based, 0 when unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub line: u32,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, line: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{} error: {}", self.kind, self.message)
        } else {
            write!(f, "{} error at line {}: {}", self.kind, self.line, self.message)
        }
    }
}

impl std::error::Error for Error {}

/// Preprocessor error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessError {
    pub message: String,
    pub line: u32,
}

impl PreprocessError {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for PreprocessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for PreprocessError {}

/// Lexer error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl LexError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lex error at line {}: {}", self.span.line, self.message)
    }
}

impl std::error::Error for LexError {}

/// Parse error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    pub expected: Option<String>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            expected: None,
        }
    }

    pub fn expected(message: impl Into<String>, expected: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            expected: Some(expected.into()),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at line {}: {}", self.span.line, self.message)?;
        if let Some(ref expected) = self.expected {
            write!(f, " (expected {})", expected)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
    pub span: Span,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation error at line {}: {}", self.span.line, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Evaluation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    pub message: String,
    pub span: Option<Span>,
    /// Set when the run observed its cancellation token.
    pub interrupted: bool,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: None,
            interrupted: false,
        }
    }

    pub fn with_span(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span: Some(span),
            interrupted: false,
        }
    }

    pub fn interrupted() -> Self {
        Self {
            message: "evaluation interrupted".to_string(),
            span: None,
            interrupted: true,
        }
    }

    /// Set span if not already present
    pub fn with_span_if_none(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    pub fn line(&self) -> u32 {
        self.span.map_or(0, |s| s.line)
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) if span.line > 0 => {
                write!(f, "eval error at line {}: {}", span.line, self.message)
            }
            _ => write!(f, "eval error: {}", self.message),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<PreprocessError> for Error {
    fn from(e: PreprocessError) -> Self {
        Error::new(ErrorKind::Preprocessing, e.line, e.message)
    }
}

impl From<LexError> for Error {
    fn from(e: LexError) -> Self {
        Error::new(ErrorKind::Lexical, e.span.line, e.message)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        let message = match e.expected {
            Some(expected) => format!("{} (expected {})", e.message, expected),
            None => e.message,
        };
        Error::new(ErrorKind::Parse, e.span.line, message)
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::new(ErrorKind::Validation, e.span.line, e.message)
    }
}

impl From<EvalError> for Error {
    fn from(e: EvalError) -> Self {
        let kind = if e.interrupted {
            ErrorKind::Interrupted
        } else {
            ErrorKind::Evaluation
        };
        Error::new(kind, e.line(), e.message)
    }
}

/// A failed run: the error plus every console entry logged before it.
#[derive(Debug, Clone)]
pub struct RunError {
    pub error: Error,
    pub console: Vec<LogEntry>,
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }

    pub fn line(&self) -> u32 {
        self.error.line
    }

    pub fn message(&self) -> &str {
        &self.error.message
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_errors_keep_line() {
        let e: Error = PreprocessError::new("unknown preprocessor directive", 7).into();
        assert_eq!(e.kind, ErrorKind::Preprocessing);
        assert_eq!(e.line, 7);

        let e: Error = LexError::new("invalid integer literal", Span::new(0, 1, 3)).into();
        assert_eq!(e.kind, ErrorKind::Lexical);
        assert_eq!(e.line, 3);
    }

    #[test]
    fn test_parse_error_expected_is_folded_into_message() {
        let e: Error = ParseError::expected("unexpected token", "';'", Span::new(0, 1, 2)).into();
        assert_eq!(e.kind, ErrorKind::Parse);
        assert_eq!(e.message, "unexpected token (expected ';')");
    }

    #[test]
    fn test_interrupted_eval_error_maps_to_interrupted_kind() {
        let e: Error = EvalError::interrupted().into();
        assert_eq!(e.kind, ErrorKind::Interrupted);
        let e: Error = EvalError::new("division by zero").into();
        assert_eq!(e.kind, ErrorKind::Evaluation);
        assert_eq!(e.line, 0);
    }

    #[test]
    fn test_with_span_if_none_does_not_override() {
        let e = EvalError::with_span("x", Span::new(0, 1, 4)).with_span_if_none(Span::new(5, 6, 9));
        assert_eq!(e.line(), 4);
        let e = EvalError::new("x").with_span_if_none(Span::new(5, 6, 9));
        assert_eq!(e.line(), 9);
    }

    #[test]
    fn test_error_display() {
        let e = Error::new(ErrorKind::Evaluation, 12, "read out of bounds");
        assert_eq!(e.to_string(), "evaluator error at line 12: read out of bounds");
        let e = Error::new(ErrorKind::Interrupted, 0, "evaluation interrupted");
        assert_eq!(e.to_string(), "interrupted error: evaluation interrupted");
    }
}
