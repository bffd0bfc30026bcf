//! Lexer, parser, and bytecode emitter for the Weft scripting engine.
//!
//! `weft_compiler::compile` is the single public entry point: source text
//! in, a [`opcode::Module`] out, ready for `weft-runtime` to load.

pub mod ast;
pub mod disasm;
pub mod emitter;
pub mod error;
pub mod lexer;
pub mod opcode;
pub mod parser;

use error::CompileError;
use opcode::Module;

pub fn compile(src: &str) -> Result<Module, CompileError> {
    let program = parser::Parser::parse(src)?;
    Ok(emitter::Emitter::compile(&program))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_small_program() {
        let module = compile("x = 1\nwhile x < 5\n  x = x + 1\nend\nreturn x").unwrap();
        assert!(!module.chunks.is_empty());
        assert_eq!(module.entry, 0);
    }

    #[test]
    fn reports_syntax_errors() {
        let err = compile("if true").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }
}
