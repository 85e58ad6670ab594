//! Bytecode compiler for Corvid.
//!
//! Transforms source text directly into bytecode that can be executed by the VM.
//!
//! # Module Structure
//!
//! - `chunk`: Opcodes, chunks and the line table
//! - `codegen`: Single-pass Pratt compiler
//!   - `codegen::rules`: Precedence ladder and parse rule table
//!   - `codegen::scope`: Local variable resolution
//! - `disassembler`: Human-readable chunk listings

pub mod chunk;
mod codegen;
pub mod disassembler;

use thiserror::Error;

pub use chunk::{Chunk, ChunkLimit, JumpPatch, LineStart, OpCode};
pub use codegen::compile;

/// A compile error. Compilation stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[line {line}] Error{}: {message}", location(.lexeme, .at_end))]
pub struct CompileError {
    /// Module being compiled
    pub module: String,
    /// Line of the offending token
    pub line: usize,
    /// Source text of the offending token, if there was one
    pub lexeme: Option<String>,
    /// Set when the error was found at end of input
    pub at_end: bool,
    /// Human-readable description
    pub message: String,
}

fn location(lexeme: &Option<String>, at_end: &bool) -> String {
    match lexeme {
        Some(lexeme) => format!(" at '{}'", lexeme),
        None if *at_end => " at end".to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(lexeme: Option<&str>, at_end: bool) -> CompileError {
        CompileError {
            module: "main".into(),
            line: 3,
            lexeme: lexeme.map(String::from),
            at_end,
            message: "Expect ';' after value.".into(),
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            error(Some("}"), false).to_string(),
            "[line 3] Error at '}': Expect ';' after value."
        );
        assert_eq!(
            error(None, true).to_string(),
            "[line 3] Error at end: Expect ';' after value."
        );
        assert_eq!(error(None, false).to_string(), "[line 3] Error: Expect ';' after value.");
    }
}
