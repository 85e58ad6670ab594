//! Lexical analysis (tokenization) for Corvid source code.
//!
//! The scanner transforms source text into an ordered vector of tokens,
//! terminated by [`TokenKind::Eof`], which the compiler consumes.
//!
//! ## Usage
//!
//! ```rust
//! use corvid_engine::lexer::{Scanner, TokenKind};
//!
//! let tokens = Scanner::new("var x = 42;").scan_tokens().unwrap();
//! assert_eq!(tokens[0].kind, TokenKind::Var);
//! assert_eq!(tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
//! ```

mod scanner;
mod token;

pub use scanner::{ScanError, Scanner};
pub use token::{Span, Token, TokenKind};
