//! Expression language shared by guards and value providers.
//!
//! Expressions read the machine context and the triggering event:
//!
//! - `ctx.field`, `ctx.field.nested` - context lookup
//! - `event.name` - name of the triggering event
//! - `event.data`, `event.data.field` - triggering event payload
//! - `42`, `-1.5`, `"text"`, `true`, `false`, `null` - literals
//! - `a + b`, `a - b`, `a * b`, `a / b`, `a % b` - arithmetic (numbers; `+` also joins strings)
//! - `a == b`, `a != b` - equality (any values)
//! - `a > b`, `a >= b`, `a < b`, `a <= b` - ordering (numbers)
//! - `!expr` - logical NOT
//! - `expr && expr` - logical AND (higher precedence than OR)
//! - `expr || expr` - logical OR
//! - `(expr)` - grouping for precedence control
//!
//! Examples:
//! - `ctx.amount > 100 && ctx.approved`
//! - `(ctx.a || ctx.b) && !ctx.c`
//! - `ctx.count + 1`
//! - `event.data.code == 404`
//!
//! Referencing a path that does not exist is a resolution error, not `null`.

use crate::context::{lookup_in, type_name, Context};
use crate::error::{CoreError, ResolutionError};
use crate::event::Event;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};
use std::fmt;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

/// A parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value.
    Literal(Value),
    /// Context path (without the `ctx.` prefix).
    Context(String),
    /// `event.name`.
    EventName,
    /// Path into the event payload (without the `event.data` prefix, `""` for the payload).
    EventData(String),
    /// Logical NOT.
    Not(Box<Expr>),
    /// Arithmetic negation.
    Neg(Box<Expr>),
    /// Logical AND.
    And(Box<Expr>, Box<Expr>),
    /// Logical OR.
    Or(Box<Expr>, Box<Expr>),
    /// Comparison or arithmetic.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parses an expression from a string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid("empty expression"));
        }

        let mut parser = Parser::new(s);
        let expr = parser.parse_expr()?;
        parser.skip_whitespace();
        if parser.pos < s.len() {
            return Err(invalid(format!(
                "unexpected input at position {}: '{}'",
                parser.pos,
                &s[parser.pos..]
            )));
        }
        Ok(expr)
    }

    /// Evaluates the expression against a context and optional event.
    pub fn evaluate(&self, ctx: &Context, event: Option<&Event>) -> Result<Value, ResolutionError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Context(path) => ctx.lookup(path).cloned(),
            Expr::EventName => event
                .map(|e| Value::String(e.name.clone()))
                .ok_or_else(|| ResolutionError::NoEvent {
                    path: "event.name".to_string(),
                }),
            Expr::EventData(path) => {
                let event = event.ok_or_else(|| ResolutionError::NoEvent {
                    path: self.to_string(),
                })?;
                lookup_in(&event.data, path)
                    .cloned()
                    .ok_or_else(|| ResolutionError::MissingPath {
                        path: self.to_string(),
                    })
            }
            Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.evaluate(ctx, event)?))),
            Expr::Neg(inner) => {
                let value = inner.evaluate(ctx, event)?;
                negate(&value, &self.to_string())
            }
            Expr::And(left, right) => {
                if !is_truthy(&left.evaluate(ctx, event)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(is_truthy(&right.evaluate(ctx, event)?)))
            }
            Expr::Or(left, right) => {
                if is_truthy(&left.evaluate(ctx, event)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(is_truthy(&right.evaluate(ctx, event)?)))
            }
            Expr::Binary(op, left, right) => {
                let a = left.evaluate(ctx, event)?;
                let b = right.evaluate(ctx, event)?;
                apply_binary(*op, &a, &b, &self.to_string())
            }
        }
    }

    /// Evaluates the expression and reduces the result to a boolean.
    pub fn test(&self, ctx: &Context, event: Option<&Event>) -> Result<bool, ResolutionError> {
        self.evaluate(ctx, event).map(|v| is_truthy(&v))
    }

    fn is_compound(&self) -> bool {
        matches!(self, Expr::And(..) | Expr::Or(..) | Expr::Binary(..))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Context(path) => write!(f, "ctx.{}", path),
            Expr::EventName => f.write_str("event.name"),
            Expr::EventData(path) if path.is_empty() => f.write_str("event.data"),
            Expr::EventData(path) => write!(f, "event.data.{}", path),
            Expr::Not(inner) => {
                f.write_str("!")?;
                fmt_operand(inner, f)
            }
            Expr::Neg(inner) => {
                f.write_str("-")?;
                fmt_operand(inner, f)
            }
            Expr::And(left, right) => {
                fmt_operand(left, f)?;
                f.write_str(" && ")?;
                fmt_operand(right, f)
            }
            Expr::Or(left, right) => {
                fmt_operand(left, f)?;
                f.write_str(" || ")?;
                fmt_operand(right, f)
            }
            Expr::Binary(op, left, right) => {
                fmt_operand(left, f)?;
                write!(f, " {} ", op.symbol())?;
                fmt_operand(right, f)
            }
        }
    }
}

fn fmt_operand(expr: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if expr.is_compound() {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

/// A parsed expression that remembers its source text.
///
/// Serializes as the source string, so definitions round-trip unchanged.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    expr: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, CoreError> {
        Ok(Self {
            expr: Expr::parse(source)?,
            source: source.trim().to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn evaluate(&self, ctx: &Context, event: Option<&Event>) -> Result<Value, ResolutionError> {
        self.expr.evaluate(ctx, event)
    }

    pub fn test(&self, ctx: &Context, event: Option<&Event>) -> Result<bool, ResolutionError> {
        self.expr.test(ctx, event)
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Expression {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let source = String::deserialize(deserializer)?;
        Expression::parse(&source).map_err(serde::de::Error::custom)
    }
}

/// Truthiness used by guards and logical operators.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a
                .as_f64()
                .zip(b.as_f64())
                .map(|(a, b)| (a - b).abs() < f64::EPSILON)
                .unwrap_or(false),
        },
        _ => a == b,
    }
}

fn number<'a>(value: &'a Value, at: &str) -> Result<&'a Number, ResolutionError> {
    match value {
        Value::Number(n) => Ok(n),
        other => Err(ResolutionError::TypeMismatch {
            at: at.to_string(),
            expected: "number",
            found: type_name(other),
        }),
    }
}

fn to_f64(n: &Number, at: &str) -> Result<f64, ResolutionError> {
    n.as_f64().ok_or_else(|| ResolutionError::NonFinite { at: at.to_string() })
}

fn float_value(f: f64, at: &str) -> Result<Value, ResolutionError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ResolutionError::NonFinite { at: at.to_string() })
}

fn negate(value: &Value, at: &str) -> Result<Value, ResolutionError> {
    let n = number(value, at)?;
    if let Some(i) = n.as_i64().and_then(i64::checked_neg) {
        return Ok(Value::from(i));
    }
    float_value(-to_f64(n, at)?, at)
}

fn apply_binary(op: BinaryOp, a: &Value, b: &Value, at: &str) -> Result<Value, ResolutionError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(a, b))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(a, b))),
        BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => {
            let x = to_f64(number(a, at)?, at)?;
            let y = to_f64(number(b, at)?, at)?;
            let result = match op {
                BinaryOp::Gt => x > y,
                BinaryOp::Ge => x >= y,
                BinaryOp::Lt => x < y,
                _ => x <= y,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add => match (a, b) {
            (Value::String(x), Value::String(y)) => Ok(Value::String(format!("{}{}", x, y))),
            _ => arithmetic(op, a, b, at),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, a, b, at),
    }
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value, at: &str) -> Result<Value, ResolutionError> {
    let x = number(a, at)?;
    let y = number(b, at)?;

    // Integers stay integers while the result is exact.
    if let (Some(i), Some(j)) = (x.as_i64(), y.as_i64()) {
        if j == 0 && matches!(op, BinaryOp::Div | BinaryOp::Rem) {
            return Err(ResolutionError::DivisionByZero { at: at.to_string() });
        }
        let exact = match op {
            BinaryOp::Add => i.checked_add(j),
            BinaryOp::Sub => i.checked_sub(j),
            BinaryOp::Mul => i.checked_mul(j),
            BinaryOp::Div if i.checked_rem(j) == Some(0) => i.checked_div(j),
            BinaryOp::Rem => i.checked_rem(j),
            _ => None,
        };
        if let Some(result) = exact {
            return Ok(Value::from(result));
        }
    }

    let x = to_f64(x, at)?;
    let y = to_f64(y, at)?;
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::Rem if y == 0.0 => {
            return Err(ResolutionError::DivisionByZero { at: at.to_string() })
        }
        BinaryOp::Div => x / y,
        _ => x % y,
    };
    float_value(result, at)
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidExpression {
        reason: reason.into(),
    }
}

/// Simple recursive descent parser for expressions.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_expr(&mut self) -> Result<Expr, CoreError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.peek_str("||") {
            self.pos += 2;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.peek_str("&&") {
            self.pos += 2;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CoreError> {
        self.skip_whitespace();

        if self.peek_char() == Some('!') && !self.peek_str("!=") {
            self.pos += 1;
            let inner = self.parse_unary()?; // allows !!ctx.a
            return Ok(Expr::Not(Box::new(inner)));
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, CoreError> {
        let left = self.parse_additive()?;
        self.skip_whitespace();

        let op = if self.peek_str("==") {
            Some((BinaryOp::Eq, 2))
        } else if self.peek_str("!=") {
            Some((BinaryOp::Ne, 2))
        } else if self.peek_str(">=") {
            Some((BinaryOp::Ge, 2))
        } else if self.peek_str("<=") {
            Some((BinaryOp::Le, 2))
        } else if self.peek_char() == Some('>') {
            Some((BinaryOp::Gt, 1))
        } else if self.peek_char() == Some('<') {
            Some((BinaryOp::Lt, 1))
        } else {
            None
        };

        // No operator: the operand itself (truthy check when used as a guard)
        let Some((op, width)) = op else {
            return Ok(left);
        };
        self.pos += width;
        let right = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_additive(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek_char() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.parse_negation()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek_char() {
                Some('*') => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                Some('%') => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_negation()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_negation(&mut self) -> Result<Expr, CoreError> {
        self.skip_whitespace();

        if self.peek_char() == Some('-') {
            self.pos += 1;
            let inner = self.parse_negation()?;
            // Fold negative number literals
            if let Expr::Literal(Value::Number(n)) = &inner {
                if let Ok(Value::Number(negated)) = negate(&Value::Number(n.clone()), "") {
                    return Ok(Expr::Literal(Value::Number(negated)));
                }
            }
            return Ok(Expr::Neg(Box::new(inner)));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, CoreError> {
        self.skip_whitespace();

        match self.peek_char() {
            Some('(') => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.skip_whitespace();
                if self.peek_char() != Some(')') {
                    return Err(invalid("expected ')'"));
                }
                self.pos += 1;
                Ok(expr)
            }
            Some('"') => self.parse_string().map(|s| Expr::Literal(Value::String(s))),
            Some(c) if c.is_ascii_digit() => self.parse_number().map(Expr::Literal),
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_word(),
            Some(c) => Err(invalid(format!("unexpected character '{}'", c))),
            None => Err(invalid("unexpected end of expression")),
        }
    }

    fn parse_word(&mut self) -> Result<Expr, CoreError> {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let word = &self.input[start..self.pos];
        match word {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" => return Ok(Expr::Literal(Value::Null)),
            "event.name" => return Ok(Expr::EventName),
            "event.data" => return Ok(Expr::EventData(String::new())),
            _ => {}
        }

        if let Some(field) = word.strip_prefix("ctx.") {
            return field_path(field).map(Expr::Context);
        }
        if let Some(field) = word.strip_prefix("event.data.") {
            return field_path(field).map(Expr::EventData);
        }
        if word.starts_with("event") {
            return Err(invalid(format!(
                "unknown event field '{}': use 'event.name' or 'event.data'",
                word
            )));
        }

        Err(invalid(format!(
            "unknown identifier '{}': fields must start with 'ctx.' or 'event.'",
            word
        )))
    }

    fn parse_string(&mut self) -> Result<String, CoreError> {
        self.pos += 1; // opening quote

        let mut out = String::new();
        let mut chars = self.input[self.pos..].char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += offset + 1;
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, other)) => out.push(other),
                    None => break,
                },
                other => out.push(other),
            }
        }

        Err(invalid("unterminated string"))
    }

    fn parse_number(&mut self) -> Result<Value, CoreError> {
        let start = self.pos;
        let mut is_float = false;

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else {
                break;
            }
        }

        let num_str = &self.input[start..self.pos];
        if !is_float {
            if let Ok(i) = num_str.parse::<i64>() {
                return Ok(Value::from(i));
            }
        }
        num_str
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid(format!("invalid number: '{}'", num_str)))
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}

fn field_path(field: &str) -> Result<String, CoreError> {
    if field.is_empty() || field.split('.').any(str::is_empty) {
        return Err(invalid(format!("invalid field path '{}'", field)));
    }
    Ok(field.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(src: &str, ctx: Value) -> Result<Value, ResolutionError> {
        let ctx = Context::from_value(ctx).unwrap();
        Expr::parse(src).unwrap().evaluate(&ctx, None)
    }

    fn check(src: &str, ctx: Value) -> bool {
        let ctx = Context::from_value(ctx).unwrap();
        Expr::parse(src).unwrap().test(&ctx, None).unwrap()
    }

    #[test]
    fn test_truthy_check() {
        assert!(check("ctx.enabled", json!({"enabled": true})));
        assert!(!check("ctx.enabled", json!({"enabled": false})));
        assert!(!check("ctx.enabled", json!({"enabled": null})));
    }

    #[test]
    fn test_missing_field_is_error() {
        let result = eval("ctx.enabled", json!({}));
        assert_eq!(
            result,
            Err(ResolutionError::MissingPath {
                path: "enabled".to_string()
            })
        );
        assert!(eval("ctx.order.customer.verified", json!({"order": {}})).is_err());
    }

    #[test]
    fn test_equality() {
        assert!(check("ctx.status == \"active\"", json!({"status": "active"})));
        assert!(!check("ctx.status == \"active\"", json!({"status": "inactive"})));
        assert!(check("ctx.status != \"inactive\"", json!({"status": "active"})));
        assert!(check("ctx.count == 42", json!({"count": 42})));
        assert!(check("ctx.rate == 0.5", json!({"rate": 0.5})));
        assert!(check("ctx.flag == false", json!({"flag": false})));
        assert!(check("ctx.value == null", json!({"value": null})));
        assert!(check("ctx.tags == ctx.copy", json!({"tags": [1, 2], "copy": [1, 2]})));
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(check("ctx.amount > 100", json!({"amount": 150})));
        assert!(!check("ctx.amount > 100", json!({"amount": 100})));
        assert!(check("ctx.amount >= 100", json!({"amount": 100})));
        assert!(check("ctx.count < 10", json!({"count": 5})));
        assert!(check("ctx.count <= 10", json!({"count": 10})));
        assert!(check("ctx.temp > -10", json!({"temp": 0})));
        assert!(!check("ctx.temp > -10", json!({"temp": -15})));
    }

    #[test]
    fn test_comparison_with_non_numeric() {
        let result = eval("ctx.value > 10", json!({"value": "not a number"}));
        assert!(matches!(
            result,
            Err(ResolutionError::TypeMismatch {
                expected: "number",
                found: "string",
                ..
            })
        ));
    }

    #[test]
    fn test_logical_operators() {
        assert!(check("ctx.a && ctx.b", json!({"a": true, "b": true})));
        assert!(!check("ctx.a && ctx.b", json!({"a": true, "b": false})));
        assert!(check("ctx.a || ctx.b", json!({"a": false, "b": true})));
        assert!(check("!ctx.disabled", json!({"disabled": false})));
        assert!(check("!!ctx.a", json!({"a": true})));
        assert!(check("!(ctx.a && ctx.b)", json!({"a": true, "b": false})));
    }

    #[test]
    fn test_short_circuit_skips_missing_paths() {
        assert!(!check("ctx.a && ctx.missing", json!({"a": false})));
        assert!(check("ctx.a || ctx.missing", json!({"a": true})));
    }

    #[test]
    fn test_precedence() {
        // && binds tighter than ||
        let src = "ctx.a && ctx.b || ctx.c";
        assert!(check(src, json!({"a": false, "b": false, "c": true})));
        assert!(!check(src, json!({"a": true, "b": false, "c": false})));

        let src = "(ctx.a || ctx.b) && ctx.c";
        assert!(!check(src, json!({"a": true, "b": true, "c": false})));
        assert!(check(src, json!({"a": false, "b": true, "c": true})));

        assert_eq!(eval("1 + 2 * 3", json!({})).unwrap(), json!(7));
        assert_eq!(eval("(1 + 2) * 3", json!({})).unwrap(), json!(9));
        assert!(check("ctx.n + 1 > 2 && ctx.ok", json!({"n": 2, "ok": true})));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("ctx.count + 1", json!({"count": 41})).unwrap(), json!(42));
        assert_eq!(eval("10 - 15", json!({})).unwrap(), json!(-5));
        assert_eq!(eval("7 / 2", json!({})).unwrap(), json!(3.5));
        assert_eq!(eval("8 / 2", json!({})).unwrap(), json!(4));
        assert_eq!(eval("7 % 3", json!({})).unwrap(), json!(1));
        assert_eq!(eval("-ctx.n", json!({"n": 3})).unwrap(), json!(-3));
        assert_eq!(eval("ctx.price * 1.5", json!({"price": 2})).unwrap(), json!(3.0));
        assert_eq!(
            eval("ctx.first + \" \" + ctx.last", json!({"first": "Ada", "last": "L"})).unwrap(),
            json!("Ada L")
        );
    }

    #[test]
    fn test_division_by_zero() {
        assert!(matches!(
            eval("ctx.n / 0", json!({"n": 1})),
            Err(ResolutionError::DivisionByZero { .. })
        ));
        assert!(matches!(
            eval("1.5 % 0", json!({})),
            Err(ResolutionError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn test_event_references() {
        let ctx = Context::new();
        let event = Event::with_data("LOADED", json!({"code": 200, "body": {"id": 7}}));

        let expr = Expr::parse("event.data.code == 200").unwrap();
        assert!(expr.test(&ctx, Some(&event)).unwrap());

        let expr = Expr::parse("event.name").unwrap();
        assert_eq!(expr.evaluate(&ctx, Some(&event)).unwrap(), json!("LOADED"));

        let expr = Expr::parse("event.data.body.id").unwrap();
        assert_eq!(expr.evaluate(&ctx, Some(&event)).unwrap(), json!(7));

        let expr = Expr::parse("event.data").unwrap();
        assert_eq!(expr.evaluate(&ctx, Some(&event)).unwrap(), event.data);

        let result = expr.evaluate(&ctx, None);
        assert!(matches!(result, Err(ResolutionError::NoEvent { .. })));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(eval(r#""say \"hi\"""#, json!({})).unwrap(), json!("say \"hi\""));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expr::parse("").is_err());
        assert!(Expr::parse("   ").is_err());
        assert!(Expr::parse("foo.bar").is_err());
        assert!(Expr::parse("ctx.").is_err());
        assert!(Expr::parse("ctx.a..b").is_err());
        assert!(Expr::parse("(ctx.a && ctx.b").is_err());
        assert!(Expr::parse("!(ctx.a && ctx.b").is_err());
        assert!(Expr::parse("ctx.name == \"unclosed").is_err());
        assert!(Expr::parse("ctx.value > abc").is_err());
        assert!(Expr::parse("ctx.a ctx.b").is_err());
        assert!(Expr::parse("event.payload").is_err());
        assert!(matches!(
            Expr::parse("ctx.a >"),
            Err(CoreError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn test_display_renders_structure() {
        let expr = Expr::parse("ctx.a + 1 > 2 && !ctx.b").unwrap();
        assert_eq!(expr.to_string(), "((ctx.a + 1) > 2) && !ctx.b");
    }

    #[test]
    fn test_expression_serde_uses_source() {
        let expr: Expression = serde_json::from_value(json!("ctx.count >= 3")).unwrap();
        assert_eq!(expr.source(), "ctx.count >= 3");
        assert_eq!(serde_json::to_value(&expr).unwrap(), json!("ctx.count >= 3"));

        let result: Result<Expression, _> = serde_json::from_value(json!("ctx."));
        assert!(result.is_err());
    }
}
