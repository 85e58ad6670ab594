//! The scanner that produces tokens from source text.

use super::{Span, Token, TokenKind};
use thiserror::Error;

/// A lexical error. Scanning stops at the first one.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[line {line}] Error: {message}")]
pub struct ScanError {
    /// Line the offending character was found on
    pub line: usize,
    /// Human-readable description
    pub message: String,
}

/// A scanner that tokenizes Corvid source code.
pub struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    line: usize,
}

impl<'a> Scanner<'a> {
    /// Creates a new scanner for the given source code.
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
        }
    }

    /// Scans the whole source, returning every token up to and including `Eof`.
    pub fn scan_tokens(mut self) -> Result<Vec<Token>, ScanError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    /// Returns the next token from the source.
    pub fn next_token(&mut self) -> Result<Token, ScanError> {
        self.skip_whitespace_and_comments();

        let start = self.current_pos;
        let line = self.line;

        let Some((_pos, ch)) = self.advance() else {
            return Ok(Token::new(TokenKind::Eof, Span::new(start, start), line));
        };

        let kind = match ch {
            // Single-character tokens
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '-' => TokenKind::Minus,
            '+' => TokenKind::Plus,
            ';' => TokenKind::Semicolon,
            '/' => TokenKind::Slash,
            '*' => TokenKind::Star,
            '%' => TokenKind::Percent,
            ':' => TokenKind::Colon,

            // One or two character tokens
            '!' => self.either('=', TokenKind::BangEqual, TokenKind::Bang),
            '=' => self.either('=', TokenKind::EqualEqual, TokenKind::Equal),
            '<' => self.either('=', TokenKind::LessEqual, TokenKind::Less),
            '>' => self.either('=', TokenKind::GreaterEqual, TokenKind::Greater),

            '"' => self.scan_string(line)?,
            '0'..='9' => self.scan_number(ch),
            _ if is_id_start(ch) => self.scan_identifier(ch),

            _ => {
                return Err(ScanError {
                    line,
                    message: format!("Unexpected character '{}'.", ch),
                });
            }
        };

        Ok(Token::new(kind, Span::new(start, self.current_pos), line))
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((pos, ch)) = result {
            self.current_pos = pos + ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
            }
        }
        result
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn peek_next(&self) -> Option<char> {
        let mut iter = self.chars.clone();
        iter.next();
        iter.next().map(|(_, ch)| ch)
    }

    fn either(&mut self, expected: char, matched: TokenKind, single: TokenKind) -> TokenKind {
        if self.peek() == Some(expected) {
            self.advance();
            matched
        } else {
            single
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\n' | '\r') => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_string(&mut self, start_line: usize) -> Result<TokenKind, ScanError> {
        let mut value = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(ScanError {
                        line: start_line.max(self.line),
                        message: "Unterminated string.".to_string(),
                    });
                }
                Some((_, '"')) => break,
                Some((_, ch)) => value.push(ch),
            }
        }

        Ok(TokenKind::String(value))
    }

    fn scan_number(&mut self, first: char) -> TokenKind {
        let mut value = String::from(first);

        while let Some(ch) = self.peek().filter(char::is_ascii_digit) {
            value.push(ch);
            self.advance();
        }

        // A dot only belongs to the number when a digit follows it.
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            value.push('.');
            self.advance();
            while let Some(ch) = self.peek().filter(char::is_ascii_digit) {
                value.push(ch);
                self.advance();
            }
        }

        // Digits with at most one interior dot always parse.
        TokenKind::Number(value.parse::<f64>().unwrap_or(f64::NAN))
    }

    fn scan_identifier(&mut self, first: char) -> TokenKind {
        let mut name = String::from(first);

        while let Some(ch) = self.peek() {
            if is_id_continue(ch) {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        TokenKind::keyword(&name).unwrap_or(TokenKind::Identifier(name))
    }
}

/// Checks if a character can start an identifier.
fn is_id_start(ch: char) -> bool {
    ch == '_' || unicode_xid::UnicodeXID::is_xid_start(ch)
}

/// Checks if a character can continue an identifier.
fn is_id_continue(ch: char) -> bool {
    ch == '_' || unicode_xid::UnicodeXID::is_xid_continue(ch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source)
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_tokens() {
        let kinds = kinds("{ } ( ) [ ] , . ; : % ");
        assert_eq!(
            kinds,
            vec![
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBracket,
                TokenKind::RightBracket,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Semicolon,
                TokenKind::Colon,
                TokenKind::Percent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_two_char_operators() {
        let kinds = kinds("! != = == < <= > >=");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let kinds = kinds("42 3.14 7.");
        assert!(matches!(kinds[0], TokenKind::Number(n) if n == 42.0));
        assert!(matches!(kinds[1], TokenKind::Number(n) if n == 3.14));
        assert!(matches!(kinds[2], TokenKind::Number(n) if n == 7.0));
        assert_eq!(kinds[3], TokenKind::Dot);
    }

    #[test]
    fn test_number_method_call() {
        let kinds = kinds("1.len");
        assert!(matches!(kinds[0], TokenKind::Number(n) if n == 1.0));
        assert_eq!(kinds[1], TokenKind::Dot);
        assert!(matches!(&kinds[2], TokenKind::Identifier(s) if s == "len"));
    }

    #[test]
    fn test_strings() {
        let kinds = kinds(r#""hello" "a\nb""#);
        assert!(matches!(&kinds[0], TokenKind::String(s) if s == "hello"));
        assert!(matches!(&kinds[1], TokenKind::String(s) if s == "a\\nb"));
    }

    #[test]
    fn test_multiline_string_advances_line() {
        let tokens = Scanner::new("\"one\ntwo\" x").scan_tokens().unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn test_keywords() {
        let kinds = kinds("class fun var import as static null this");
        assert_eq!(kinds[0], TokenKind::Class);
        assert_eq!(kinds[1], TokenKind::Fun);
        assert_eq!(kinds[2], TokenKind::Var);
        assert_eq!(kinds[3], TokenKind::Import);
        assert_eq!(kinds[4], TokenKind::As);
        assert_eq!(kinds[5], TokenKind::Static);
        assert_eq!(kinds[6], TokenKind::Null);
        assert_eq!(kinds[7], TokenKind::This);
    }

    #[test]
    fn test_unicode_identifiers() {
        let kinds = kinds("café _private x1");
        assert!(matches!(&kinds[0], TokenKind::Identifier(s) if s == "café"));
        assert!(matches!(&kinds[1], TokenKind::Identifier(s) if s == "_private"));
        assert!(matches!(&kinds[2], TokenKind::Identifier(s) if s == "x1"));
    }

    #[test]
    fn test_comments_and_lines() {
        let tokens = Scanner::new("a // comment\nb\n\nc").scan_tokens().unwrap();
        assert_eq!(tokens.iter().map(|t| t.line).collect::<Vec<_>>(), vec![1, 2, 4, 4]);
    }

    #[test]
    fn test_slash_is_not_comment() {
        let kinds = kinds("a / b");
        assert_eq!(kinds[1], TokenKind::Slash);
    }

    #[test]
    fn test_spans() {
        let source = "var value = 10;";
        let tokens = Scanner::new(source).scan_tokens().unwrap();
        assert_eq!(tokens[1].lexeme(source), "value");
        assert_eq!(tokens[3].lexeme(source), "10");
    }

    #[test]
    fn test_unexpected_character() {
        let err = Scanner::new("var a = 1;\n@").scan_tokens().unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.message, "Unexpected character '@'.");
    }

    #[test]
    fn test_unterminated_string() {
        let err = Scanner::new("\"never closed").scan_tokens().unwrap_err();
        assert_eq!(err.message, "Unterminated string.");
    }
}
