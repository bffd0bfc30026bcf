//! Compile-time error type: a hand-rolled enum (manual `Display` +
//! `std::error::Error` + `From` impls) rather than a derive-macro error
//! crate, covering unexpected token, unbalanced expression, unclosed
//! bracket/brace/paren, reserved-name misuse, and too-deep function
//! nesting.

use crate::lexer::{LexError, Span};
use std::fmt;

#[derive(Debug)]
pub enum CompileError {
    Lex(LexError),
    /// Unexpected token, unbalanced expression, or an unclosed
    /// bracket/brace/paren.
    Syntax { message: String, span: Span },
    /// A reserved name used where a binding name is required.
    ReservedName { name: String, span: Span },
    /// Function nesting exceeded the compiler's fixed depth limit — see
    /// `emitter::MAX_FUNCTION_NESTING`.
    TooDeepNesting { span: Span },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lex(e) => write!(f, "{e}"),
            CompileError::Syntax { message, span } => {
                write!(f, "{message} at line {}, col {}", span.line, span.col)
            }
            CompileError::ReservedName { name, span } => write!(
                f,
                "'{name}' is a reserved name at line {}, col {}",
                span.line, span.col
            ),
            CompileError::TooDeepNesting { span } => write!(
                f,
                "function nesting too deep at line {}, col {}",
                span.line, span.col
            ),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}
