use std::fmt;

/// Position of a token within the source expression, used to annotate
/// [`KarlError`] the way the interpreter's exceptions carry a position
/// (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// `KarlError` is the one typed-exception boundary in the expression
/// engine (SPEC_FULL.md error handling section): only syntax errors raise
/// it. Evaluation-time issues (index out of bounds, unknown function,
/// division by zero) resolve to `0`/uncreated and log at warning level
/// instead of faulting (spec.md §4.2).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("karl: {message} (at {position})")]
pub struct KarlError {
    pub message: String,
    pub position: Position,
}

impl KarlError {
    pub fn new(message: impl Into<String>, position: Position) -> Self {
        KarlError {
            message: message.into(),
            position,
        }
    }
}

pub type KarlResult<T> = Result<T, KarlError>;

/// Alias kept for callers used to the original's "exception" naming
/// (SPEC_FULL.md error handling section).
pub type KarlException = KarlError;
