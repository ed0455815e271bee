//! Sandboxed expression language for edge conditions and transforms.
//!
//! Expressions are parsed into a small tagged tree and interpreted against a
//! single named binding; there is no host-language evaluation, no function
//! calls, no assignment and no arithmetic. The surface is pure data access
//! plus comparison:
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := cmp ("&&" cmp)*
//! cmp     := unary (("==" | "!=" | "<" | "<=" | ">" | ">=") unary)?
//! unary   := "!" unary | "-" number | primary
//! primary := number | string | "true" | "false" | "null" | path | "(" expr ")"
//! path    := ident ("." (ident | integer))*
//! ```
//!
//! A path whose first segment equals the binding name addresses the bound
//! value itself (`output.score`); any other root identifier is looked up as a
//! field of the bound value, so editor-style conditions like
//! `confidence > 0.8` work unchanged. Missing paths resolve to null.

use serde_json::{Number, Value as JsonValue};
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

/// Parse or evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    /// The source text is not a well-formed expression.
    Parse { message: String, position: usize },
    /// The expression is well-formed but cannot be evaluated on this data.
    Eval { message: String },
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { message, position } => {
                write!(f, "parse error at offset {position}: {message}")
            }
            Self::Eval { message } => write!(f, "evaluation error: {message}"),
        }
    }
}

impl std::error::Error for ExprError {}

/// One step of a dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object field access.
    Key(String),
    /// Array element access.
    Index(usize),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Logical connectives. Both short-circuit and yield booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(JsonValue),
    Path(Vec<PathSegment>),
    Not(Box<Expr>),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logic {
        op: LogicOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// The single variable an expression is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct Binding<'a> {
    name: &'a str,
    value: &'a JsonValue,
}

impl<'a> Binding<'a> {
    /// Binds `value` under `name`.
    #[must_use]
    pub fn new(name: &'a str, value: &'a JsonValue) -> Self {
        Self { name, value }
    }

    fn resolve(&self, segments: &[PathSegment]) -> Option<&'a JsonValue> {
        let Some((first, rest)) = segments.split_first() else {
            return None;
        };
        match first {
            PathSegment::Key(key) if key == self.name => walk(self.value, rest),
            _ => walk(self.value, segments),
        }
    }
}

fn walk<'v>(mut current: &'v JsonValue, segments: &[PathSegment]) -> Option<&'v JsonValue> {
    for segment in segments {
        current = match segment {
            PathSegment::Key(key) => current.get(key.as_str())?,
            PathSegment::Index(index) => current.get(*index)?,
        };
    }
    Some(current)
}

/// Parses and evaluates `source` in one call.
///
/// # Errors
///
/// Returns a parse error for malformed source, or an evaluation error for
/// untyped comparisons (e.g. ordering a string against a number).
pub fn evaluate_source(source: &str, binding: &Binding<'_>) -> Result<JsonValue, ExprError> {
    evaluate(&parse(source)?, binding)
}

/// JS-style truthiness: null, false, 0 and "" are false; every other number,
/// non-empty string, array and object is true.
#[must_use]
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

/// Evaluates a parsed expression against the binding.
///
/// # Errors
///
/// Returns an evaluation error for ordering comparisons on mixed or
/// unordered types.
pub fn evaluate(expr: &Expr, binding: &Binding<'_>) -> Result<JsonValue, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(segments) => Ok(binding
            .resolve(segments)
            .cloned()
            .unwrap_or(JsonValue::Null)),
        Expr::Not(inner) => Ok(JsonValue::Bool(!is_truthy(&evaluate(inner, binding)?))),
        Expr::Logic { op, lhs, rhs } => {
            let left = is_truthy(&evaluate(lhs, binding)?);
            let outcome = match op {
                // Short-circuit: the right side is not evaluated when the
                // left side already decides.
                LogicOp::And => left && is_truthy(&evaluate(rhs, binding)?),
                LogicOp::Or => left || is_truthy(&evaluate(rhs, binding)?),
            };
            Ok(JsonValue::Bool(outcome))
        }
        Expr::Compare { op, lhs, rhs } => {
            let left = evaluate(lhs, binding)?;
            let right = evaluate(rhs, binding)?;
            let outcome = match op {
                CompareOp::Eq => values_equal(&left, &right),
                CompareOp::Ne => !values_equal(&left, &right),
                CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
                    order_values(*op, &left, &right)?
                }
            };
            Ok(JsonValue::Bool(outcome))
        }
    }
}

fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        // Numbers compare by value, so 1 == 1.0.
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn order_values(op: CompareOp, a: &JsonValue, b: &JsonValue) -> Result<bool, ExprError> {
    let ordering = match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            }
        }
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        _ => None,
    };

    let Some(ordering) = ordering else {
        return Err(ExprError::Eval {
            message: format!(
                "cannot order {} against {}",
                type_name(a),
                type_name(b)
            ),
        });
    };

    Ok(match op {
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Le => ordering.is_le(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Ge => ordering.is_ge(),
        CompareOp::Eq | CompareOp::Ne => unreachable!("handled by values_equal"),
    })
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    EqEq,
    BangEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Minus,
    Dot,
    LParen,
    RParen,
}

fn parse_failure(message: impl Into<String>, position: usize) -> ExprError {
    ExprError::Parse {
        message: message.into(),
        position,
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars: Peekable<CharIndices<'_>> = source.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            _ if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push((Token::LParen, pos));
            }
            ')' => {
                chars.next();
                tokens.push((Token::RParen, pos));
            }
            '.' => {
                chars.next();
                tokens.push((Token::Dot, pos));
            }
            '-' => {
                chars.next();
                tokens.push((Token::Minus, pos));
            }
            '=' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        chars.next();
                        tokens.push((Token::EqEq, pos));
                    }
                    _ => return Err(parse_failure("expected '==' (assignment is not supported)", pos)),
                }
            }
            '!' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    tokens.push((Token::BangEq, pos));
                } else {
                    tokens.push((Token::Bang, pos));
                }
            }
            '<' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    tokens.push((Token::Le, pos));
                } else {
                    tokens.push((Token::Lt, pos));
                }
            }
            '>' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    tokens.push((Token::Ge, pos));
                } else {
                    tokens.push((Token::Gt, pos));
                }
            }
            '&' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '&')) => {
                        chars.next();
                        tokens.push((Token::AndAnd, pos));
                    }
                    _ => return Err(parse_failure("expected '&&'", pos)),
                }
            }
            '|' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '|')) => {
                        chars.next();
                        tokens.push((Token::OrOr, pos));
                    }
                    _ => return Err(parse_failure("expected '||'", pos)),
                }
            }
            '\'' | '"' => {
                tokens.push((lex_string(&mut chars, source)?, pos));
            }
            _ if c.is_ascii_digit() => {
                tokens.push((lex_number(&mut chars)?, pos));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Ident(ident), pos));
            }
            _ => return Err(parse_failure(format!("unexpected character '{c}'"), pos)),
        }
    }

    Ok(tokens)
}

fn lex_string(
    chars: &mut Peekable<CharIndices<'_>>,
    source: &str,
) -> Result<Token, ExprError> {
    let Some((start, quote)) = chars.next() else {
        return Err(parse_failure("expected string", source.len()));
    };
    let mut text = String::new();

    while let Some((_, c)) = chars.next() {
        if c == quote {
            return Ok(Token::Str(text));
        }
        if c == '\\' {
            match chars.next() {
                Some((_, escaped)) => text.push(escaped),
                None => break,
            }
        } else {
            text.push(c);
        }
    }

    Err(parse_failure("unterminated string literal", start))
}

fn lex_number(chars: &mut Peekable<CharIndices<'_>>) -> Result<Token, ExprError> {
    let mut digits = String::new();
    let mut start = 0;
    let mut is_float = false;

    if let Some(&(pos, _)) = chars.peek() {
        start = pos;
    }

    while let Some(&(_, c)) = chars.peek() {
        if c.is_ascii_digit() {
            digits.push(c);
            chars.next();
        } else if c == '.' && !is_float {
            // Only consume the dot when a digit follows; otherwise it is a
            // path separator (`items.0.name`).
            let mut lookahead = chars.clone();
            lookahead.next();
            match lookahead.peek() {
                Some(&(_, next)) if next.is_ascii_digit() => {
                    is_float = true;
                    digits.push('.');
                    chars.next();
                }
                _ => break,
            }
        } else {
            break;
        }
    }

    if is_float {
        digits
            .parse::<f64>()
            .map(Token::Float)
            .map_err(|_| parse_failure(format!("invalid number '{digits}'"), start))
    } else {
        digits
            .parse::<i64>()
            .map(Token::Int)
            .map_err(|_| parse_failure(format!("invalid number '{digits}'"), start))
    }
}

/// Parses an expression into its tree form.
///
/// # Errors
///
/// Returns a parse error describing the offending offset.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let expr = parser.parse_or()?;
    match parser.peek() {
        Some((_, pos)) => Err(parse_failure("unexpected trailing input", *pos)),
        None => Ok(expr),
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().map(|(t, _)| t) == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Logic {
                op: LogicOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.parse_comparison()?;
            lhs = Expr::Logic {
                op: LogicOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn comparison_op(&self) -> Option<CompareOp> {
        match self.peek() {
            Some((Token::EqEq, _)) => Some(CompareOp::Eq),
            Some((Token::BangEq, _)) => Some(CompareOp::Ne),
            Some((Token::Lt, _)) => Some(CompareOp::Lt),
            Some((Token::Le, _)) => Some(CompareOp::Le),
            Some((Token::Gt, _)) => Some(CompareOp::Gt),
            Some((Token::Ge, _)) => Some(CompareOp::Ge),
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_unary()?;
        let Some(op) = self.comparison_op() else {
            return Ok(lhs);
        };
        self.pos += 1;
        let rhs = self.parse_unary()?;

        if let Some(chained) = self.comparison_op() {
            let position = self.peek().map_or(self.end, |(_, p)| *p);
            return Err(parse_failure(
                format!("chained comparisons are not supported ({chained:?})"),
                position,
            ));
        }

        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Bang) {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat(&Token::Minus) {
            let position = self.peek().map_or(self.end, |(_, p)| *p);
            return match self.next() {
                Some((Token::Int(i), _)) => Ok(Expr::Literal(JsonValue::from(-i))),
                Some((Token::Float(x), _)) => float_literal(-x, position),
                _ => Err(parse_failure("'-' must be followed by a number", position)),
            };
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let position = self.peek().map_or(self.end, |(_, p)| *p);
        match self.next() {
            Some((Token::Int(i), _)) => Ok(Expr::Literal(JsonValue::from(i))),
            Some((Token::Float(x), pos)) => float_literal(x, pos),
            Some((Token::Str(s), _)) => Ok(Expr::Literal(JsonValue::String(s))),
            Some((Token::Ident(ident), pos)) => match ident.as_str() {
                "true" => Ok(Expr::Literal(JsonValue::Bool(true))),
                "false" => Ok(Expr::Literal(JsonValue::Bool(false))),
                "null" => Ok(Expr::Literal(JsonValue::Null)),
                _ => self.parse_path(ident, pos),
            },
            Some((Token::LParen, pos)) => {
                let inner = self.parse_or()?;
                if self.eat(&Token::RParen) {
                    Ok(inner)
                } else {
                    Err(parse_failure("expected ')'", pos))
                }
            }
            Some((token, pos)) => {
                Err(parse_failure(format!("unexpected token {token:?}"), pos))
            }
            None => Err(parse_failure("unexpected end of expression", position)),
        }
    }

    fn parse_path(&mut self, root: String, root_pos: usize) -> Result<Expr, ExprError> {
        let mut segments = vec![PathSegment::Key(root)];

        while self.eat(&Token::Dot) {
            let position = self.peek().map_or(root_pos, |(_, p)| *p);
            match self.next() {
                Some((Token::Ident(key), _)) => segments.push(PathSegment::Key(key)),
                Some((Token::Int(index), pos)) => {
                    let index = usize::try_from(index).map_err(|_| {
                        parse_failure("array index must be non-negative", pos)
                    })?;
                    segments.push(PathSegment::Index(index));
                }
                _ => {
                    return Err(parse_failure(
                        "expected identifier or array index after '.'",
                        position,
                    ));
                }
            }
        }

        Ok(Expr::Path(segments))
    }
}

fn float_literal(x: f64, position: usize) -> Result<Expr, ExprError> {
    Number::from_f64(x)
        .map(|n| Expr::Literal(JsonValue::Number(n)))
        .ok_or_else(|| parse_failure("number is not representable", position))
}
