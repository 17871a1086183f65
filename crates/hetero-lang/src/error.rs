//! Diagnostics produced while lexing, parsing or translating kernel source.

use std::fmt;
use thiserror::Error;

/// Line/column of a token, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LangError {
    #[error("{location}: {message}")]
    Lex { location: Location, message: String },

    #[error("{location}: expected {expected}, found {found}")]
    UnexpectedToken {
        location: Location,
        expected: String,
        found: String,
    },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String },

    #[error("kernel '{0}' not found in source")]
    KernelNotFound(String),

    /// Semantic rule violated during translation or compilation.
    #[error("{kernel}: {message}")]
    Semantic { kernel: String, message: String },
}

impl LangError {
    pub fn semantic(kernel: impl Into<String>, message: impl Into<String>) -> Self {
        LangError::Semantic {
            kernel: kernel.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LangError>;
