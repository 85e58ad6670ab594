//! Precedence ladder and Pratt parse rule table.

use crate::lexer::TokenKind;

/// Binding power of an operator, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    /// The next-tighter level, used for left-associative operands.
    pub fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

/// A parse routine the compiler dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFn {
    Grouping,
    ArrayLiteral,
    Unary,
    Number,
    String,
    Literal,
    Variable,
    This,
    Binary,
    And,
    Or,
    Call,
    Dot,
    Subscript,
}

/// Prefix and infix handlers for a token kind, plus its infix precedence.
#[derive(Debug, Clone, Copy)]
pub struct ParseRule {
    pub prefix: Option<ParseFn>,
    pub infix: Option<ParseFn>,
    pub precedence: Precedence,
}

impl ParseRule {
    const fn new(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> Self {
        Self {
            prefix,
            infix,
            precedence,
        }
    }
}

/// Looks up the rule for a token kind.
pub fn rule(kind: &TokenKind) -> ParseRule {
    use ParseFn as F;
    use Precedence as P;

    match kind {
        TokenKind::LeftParen => ParseRule::new(Some(F::Grouping), Some(F::Call), P::Call),
        TokenKind::LeftBracket => ParseRule::new(Some(F::ArrayLiteral), Some(F::Subscript), P::Call),
        TokenKind::Dot => ParseRule::new(None, Some(F::Dot), P::Call),
        TokenKind::Minus => ParseRule::new(Some(F::Unary), Some(F::Binary), P::Term),
        TokenKind::Plus => ParseRule::new(None, Some(F::Binary), P::Term),
        TokenKind::Slash | TokenKind::Star | TokenKind::Percent => {
            ParseRule::new(None, Some(F::Binary), P::Factor)
        }
        TokenKind::Bang => ParseRule::new(Some(F::Unary), None, P::None),
        TokenKind::BangEqual | TokenKind::EqualEqual => {
            ParseRule::new(None, Some(F::Binary), P::Equality)
        }
        TokenKind::Greater | TokenKind::GreaterEqual | TokenKind::Less | TokenKind::LessEqual => {
            ParseRule::new(None, Some(F::Binary), P::Comparison)
        }
        TokenKind::Identifier(_) => ParseRule::new(Some(F::Variable), None, P::None),
        TokenKind::String(_) => ParseRule::new(Some(F::String), None, P::None),
        TokenKind::Number(_) => ParseRule::new(Some(F::Number), None, P::None),
        TokenKind::And => ParseRule::new(None, Some(F::And), P::And),
        TokenKind::Or => ParseRule::new(None, Some(F::Or), P::Or),
        TokenKind::True | TokenKind::False | TokenKind::Null => {
            ParseRule::new(Some(F::Literal), None, P::None)
        }
        TokenKind::This => ParseRule::new(Some(F::This), None, P::None),
        _ => ParseRule::new(None, None, P::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        assert!(Precedence::Assignment < Precedence::Or);
        assert!(Precedence::Term < Precedence::Factor);
        assert!(Precedence::Unary < Precedence::Call);
        assert_eq!(Precedence::Term.next(), Precedence::Factor);
        assert_eq!(Precedence::Primary.next(), Precedence::Primary);
    }

    #[test]
    fn test_rules() {
        let minus = rule(&TokenKind::Minus);
        assert_eq!(minus.prefix, Some(ParseFn::Unary));
        assert_eq!(minus.infix, Some(ParseFn::Binary));
        assert_eq!(minus.precedence, Precedence::Term);

        let bracket = rule(&TokenKind::LeftBracket);
        assert_eq!(bracket.prefix, Some(ParseFn::ArrayLiteral));
        assert_eq!(bracket.infix, Some(ParseFn::Subscript));

        let semicolon = rule(&TokenKind::Semicolon);
        assert!(semicolon.prefix.is_none() && semicolon.infix.is_none());
    }
}
