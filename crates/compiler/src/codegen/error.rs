//! Code generation error types.
//!
//! Lowering failures are compiler bugs, not user errors: anything a user
//! can cause is reported through the diagnostics sink and never aborts
//! emission. What remains here is a broken emitter invariant, a literal
//! whose bytes are not UTF-8, or a failure writing the C text itself,
//! all propagated with `?`.

use crate::utf8::Utf8Error;
use std::fmt;

#[derive(Debug)]
pub enum CodeGenError {
    /// An emitter invariant did not hold, e.g. the analyzer promised a
    /// native loop shape the tree does not match.
    Lowering { detail: String },
    /// A string or rune literal carried bytes that are not valid UTF-8.
    InvalidLiteral(Utf8Error),
    /// Writing C text failed.
    Format(fmt::Error),
}

impl CodeGenError {
    /// A broken lowering invariant, with context for the bug report.
    pub(crate) fn lowering(detail: impl Into<String>) -> Self {
        CodeGenError::Lowering {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeGenError::Lowering { detail } => {
                write!(f, "internal lowering error: {}", detail)
            }
            CodeGenError::InvalidLiteral(e) => write!(f, "invalid literal: {}", e),
            CodeGenError::Format(e) => write!(f, "failed to write C output: {}", e),
        }
    }
}

impl std::error::Error for CodeGenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodeGenError::Lowering { .. } => None,
            CodeGenError::InvalidLiteral(e) => Some(e),
            CodeGenError::Format(e) => Some(e),
        }
    }
}

impl From<fmt::Error> for CodeGenError {
    fn from(e: fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}

impl From<Utf8Error> for CodeGenError {
    fn from(e: Utf8Error) -> Self {
        CodeGenError::InvalidLiteral(e)
    }
}
