//! Coercion of raw script cells into typed tokens.

use std::fmt;

/// One coerced script cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Token {
    /// Returns the numeric value of an `Integer` or `Float` token.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Token::Integer(n) => Some(*n as f64),
            Token::Float(x) => Some(*x),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Integer(n) => write!(f, "{}", n),
            Token::Float(x) => write!(f, "{}", x),
            Token::Bool(b) => write!(f, "{}", b),
            Token::Text(s) => f.write_str(s),
        }
    }
}

/// Coerces a raw cell. Total: anything that is not a number or a boolean
/// literal comes back as `Text`.
///
/// Order is integer, then float, then case-insensitive `true`/`false`.
pub fn coerce(raw: &str) -> Token {
    if let Ok(n) = raw.parse::<i64>() {
        return Token::Integer(n);
    }
    if let Ok(x) = raw.parse::<f64>() {
        // "inf" and "nan" parse as floats but are register names or text here.
        if x.is_finite() {
            return Token::Float(x);
        }
    }
    if raw.eq_ignore_ascii_case("true") {
        Token::Bool(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Token::Bool(false)
    } else {
        Token::Text(raw.to_string())
    }
}
