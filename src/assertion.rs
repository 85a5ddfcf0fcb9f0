//! Pass/fail expressions attached to script commands.
//!
//! The grammar is deliberately tiny and cannot reach anything except the
//! bound result `x`:
//!
//! ```text
//! assertion := operand [ op operand ]
//! op        := "<" | "<=" | ">" | ">=" | "==" | "!="
//! operand   := "x" [ "[" index "]" ] | number | "true" | "false" | quoted-string
//! ```
//!
//! A lone operand is tested for truthiness.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// The identifier the command result is bound to.
pub const RESULT_IDENTIFIER: &str = "x";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AssertionError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("name '{0}' is not defined")]
    UnknownIdentifier(String),
    #[error("type error: {0}")]
    TypeMismatch(String),
    #[error("no result to evaluate")]
    NoResult,
    #[error("index {0} out of range")]
    IndexOutOfRange(usize),
}

/// A command result as seen by an assertion.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The operation failed and produced nothing.
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    List(Vec<i64>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Text(_) => "str",
            Value::List(_) => "list",
        }
    }

    fn truthy(&self) -> Result<bool, AssertionError> {
        match self {
            Value::Null => Err(AssertionError::NoResult),
            Value::Int(n) => Ok(*n != 0),
            Value::Float(x) => Ok(*x != 0.0),
            Value::Bool(b) => Ok(*b),
            Value::Text(s) => Ok(!s.is_empty()),
            Value::List(items) => Ok(!items.is_empty()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("(null)"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(s) => f.write_str(s),
            Value::List(items) => {
                let items: Vec<String> = items.iter().map(|n| n.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Result(Option<usize>),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Ident(String),
    Number(String),
    Str(String),
    Op(CompareOp),
    Open,
    Close,
}

/// A parsed assertion, ready to be evaluated against any number of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    source: String,
    left: Operand,
    comparison: Option<(CompareOp, Operand)>,
}

impl Assertion {
    pub fn parse(source: &str) -> Result<Self, AssertionError> {
        let lexemes = lex(source)?;
        let mut pos = 0;
        let left = parse_operand(&lexemes, &mut pos)?;
        let comparison = match lexemes.get(pos) {
            None => None,
            Some(Lexeme::Op(op)) => {
                pos += 1;
                Some((*op, parse_operand(&lexemes, &mut pos)?))
            }
            Some(other) => {
                return Err(AssertionError::Syntax(format!(
                    "expected a comparison, found {:?}",
                    other
                )))
            }
        };
        if pos != lexemes.len() {
            return Err(AssertionError::Syntax(format!(
                "unexpected trailing input in '{}'",
                source
            )));
        }
        Ok(Self {
            source: source.to_string(),
            left,
            comparison,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates against `x`.
    pub fn evaluate(&self, x: &Value) -> Result<bool, AssertionError> {
        let left = resolve(&self.left, x)?;
        match &self.comparison {
            None => left.truthy(),
            Some((op, right)) => compare(*op, &left, &resolve(right, x)?),
        }
    }
}

/// Parses and evaluates in one step.
pub fn evaluate(source: &str, x: &Value) -> Result<bool, AssertionError> {
    Assertion::parse(source)?.evaluate(x)
}

fn resolve(operand: &Operand, x: &Value) -> Result<Value, AssertionError> {
    match operand {
        Operand::Literal(value) => Ok(value.clone()),
        Operand::Result(None) => match x {
            Value::Null => Err(AssertionError::NoResult),
            other => Ok(other.clone()),
        },
        Operand::Result(Some(index)) => match x {
            Value::Null => Err(AssertionError::NoResult),
            Value::List(items) => items
                .get(*index)
                .map(|n| Value::Int(*n))
                .ok_or(AssertionError::IndexOutOfRange(*index)),
            other => Err(AssertionError::TypeMismatch(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        },
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, AssertionError> {
    let mismatch = || {
        AssertionError::TypeMismatch(format!(
            "'{}' not supported between '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))
    };

    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let a = as_f64(left);
            let b = as_f64(right);
            a.partial_cmp(&b).ok_or_else(mismatch)?
        }
        (Value::Bool(a), Value::Bool(b)) if is_equality(op) => a.cmp(b),
        (Value::Text(a), Value::Text(b)) if is_equality(op) => a.cmp(b),
        (Value::List(a), Value::List(b)) if is_equality(op) => a.cmp(b),
        _ => return Err(mismatch()),
    };
    Ok(op.holds(ordering))
}

fn is_equality(op: CompareOp) -> bool {
    matches!(op, CompareOp::Eq | CompareOp::Ne)
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(n) => *n as f64,
        Value::Float(x) => *x,
        _ => f64::NAN,
    }
}

fn lex(source: &str) -> Result<Vec<Lexeme>, AssertionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut lexemes = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            lexemes.push(Lexeme::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() || c == '.' || (c == '-' && next_is_numeric(&chars, i)) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            lexemes.push(Lexeme::Number(chars[start..i].iter().collect()));
        } else if c == '"' || c == '\'' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|&d| d == c)
                .map(|offset| start + offset)
                .ok_or_else(|| AssertionError::Syntax("unterminated string".to_string()))?;
            lexemes.push(Lexeme::Str(chars[start..end].iter().collect()));
            i = end + 1;
        } else if c == '[' {
            lexemes.push(Lexeme::Open);
            i += 1;
        } else if c == ']' {
            lexemes.push(Lexeme::Close);
            i += 1;
        } else {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            let (op, width) = match two.as_str() {
                "<=" => (CompareOp::Le, 2),
                ">=" => (CompareOp::Ge, 2),
                "==" => (CompareOp::Eq, 2),
                "!=" => (CompareOp::Ne, 2),
                _ => match c {
                    '<' => (CompareOp::Lt, 1),
                    '>' => (CompareOp::Gt, 1),
                    _ => {
                        return Err(AssertionError::Syntax(format!(
                            "unexpected character '{}'",
                            c
                        )))
                    }
                },
            };
            lexemes.push(Lexeme::Op(op));
            i += width;
        }
    }

    if lexemes.is_empty() {
        return Err(AssertionError::Syntax("empty assertion".to_string()));
    }
    Ok(lexemes)
}

fn next_is_numeric(chars: &[char], i: usize) -> bool {
    chars
        .get(i + 1)
        .is_some_and(|c| c.is_ascii_digit() || *c == '.')
}

fn parse_operand(lexemes: &[Lexeme], pos: &mut usize) -> Result<Operand, AssertionError> {
    let lexeme = lexemes
        .get(*pos)
        .ok_or_else(|| AssertionError::Syntax("expected an operand".to_string()))?;
    *pos += 1;

    match lexeme {
        Lexeme::Ident(name) if name == RESULT_IDENTIFIER => {
            if lexemes.get(*pos) != Some(&Lexeme::Open) {
                return Ok(Operand::Result(None));
            }
            let index = match (lexemes.get(*pos + 1), lexemes.get(*pos + 2)) {
                (Some(Lexeme::Number(digits)), Some(Lexeme::Close)) => digits
                    .parse::<usize>()
                    .map_err(|_| AssertionError::Syntax(format!("bad index '{}'", digits)))?,
                _ => return Err(AssertionError::Syntax("malformed index".to_string())),
            };
            *pos += 3;
            Ok(Operand::Result(Some(index)))
        }
        Lexeme::Ident(name) if name.eq_ignore_ascii_case("true") => {
            Ok(Operand::Literal(Value::Bool(true)))
        }
        Lexeme::Ident(name) if name.eq_ignore_ascii_case("false") => {
            Ok(Operand::Literal(Value::Bool(false)))
        }
        Lexeme::Ident(name) => Err(AssertionError::UnknownIdentifier(name.clone())),
        Lexeme::Number(text) => {
            if let Ok(n) = text.parse::<i64>() {
                Ok(Operand::Literal(Value::Int(n)))
            } else if let Ok(x) = text.parse::<f64>() {
                Ok(Operand::Literal(Value::Float(x)))
            } else {
                Err(AssertionError::Syntax(format!("bad number '{}'", text)))
            }
        }
        Lexeme::Str(text) => Ok(Operand::Literal(Value::Text(text.clone()))),
        other => Err(AssertionError::Syntax(format!(
            "expected an operand, found {:?}",
            other
        ))),
    }
}
