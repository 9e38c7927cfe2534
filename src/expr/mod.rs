//! Restricted expression evaluator for edge gates, condition nodes,
//! transform nodes and chain step conditions
//!
//! Expressions are parsed with a small recursive-descent parser over a fixed
//! grammar of comparisons, boolean operators and arithmetic. Identifiers
//! (dotted paths allowed) resolve against the run state as typed JSON lookups,
//! so user-supplied expressions can never reach an interpreter or perform I/O.
//! No function calls, no object construction, no side effects.

use crate::error::EngineError;
use serde_json::{Map, Number, Value};

/// Evaluate a condition expression against the state snapshot.
///
/// An empty or whitespace-only expression is always true (the edge/step is
/// taken unconditionally). Any parse or evaluation error surfaces as `false`;
/// this function never fails.
pub fn eval_condition(expr: &str, state: &Map<String, Value>) -> bool {
    if expr.trim().is_empty() {
        return true;
    }
    match eval(expr, state) {
        Ok(value) => truthy(&value),
        Err(e) => {
            tracing::debug!("condition '{}' failed to evaluate: {}", expr, e);
            false
        }
    }
}

/// Evaluate a transform expression against the state snapshot.
///
/// Returns the computed value, or a `TransformEvaluation` error the caller is
/// expected to swallow into an `{"error": ..}` node result.
pub fn eval_transform(expr: &str, state: &Map<String, Value>) -> Result<Value, EngineError> {
    eval(expr, state).map_err(EngineError::TransformEvaluation)
}

/// Like `eval_condition`, but reports the evaluation error instead of
/// swallowing it, for callers that record diagnostics (condition nodes).
/// An empty expression is still unconditionally true.
pub fn eval_condition_checked(expr: &str, state: &Map<String, Value>) -> Result<bool, EngineError> {
    if expr.trim().is_empty() {
        return Ok(true);
    }
    eval(expr, state)
        .map(|v| truthy(&v))
        .map_err(EngineError::ConditionEvaluation)
}

/// JSON truthiness: false, null, 0, "", [] and {} are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn eval(expr: &str, state: &Map<String, Value>) -> Result<Value, String> {
    let tokens = lex(expr)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_or()?;
    parser.expect_end()?;
    ast.eval(state)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    Or,
    And,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Dot,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err("single '=' is not a valid operator".to_string());
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err("single '&' is not a valid operator".to_string());
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err("single '|' is not a valid operator".to_string());
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some(&esc) => s.push(esc),
                                None => return Err("unterminated string escape".to_string()),
                            }
                            i += 2;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    // A '.' only belongs to the number when followed by a digit,
                    // otherwise it is a path separator.
                    if chars[i] == '.'
                        && !chars.get(i + 1).map(|c| c.is_ascii_digit()).unwrap_or(false)
                    {
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number literal '{}'", text))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            _ => return Err(format!("unexpected character '{}'", c)),
        }
    }
    Ok(tokens)
}

/// Compiled expression tree. Leaf lookups carry the full dotted path.
#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Lookup(Vec<String>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> Result<(), String> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(format!("unexpected trailing token {:?}", t)),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_cmp()?;
        while self.eat(&Token::And) {
            let right = self.parse_cmp()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr, String> {
        let left = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_add()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_add(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_mul()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Not) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        if self.eat(&Token::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Literal(json_number(n)?)),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(first)) => {
                let mut path = vec![first];
                while self.eat(&Token::Dot) {
                    match self.bump() {
                        Some(Token::Ident(seg)) => path.push(seg),
                        other => return Err(format!("expected identifier after '.', got {:?}", other)),
                    }
                }
                Ok(Expr::Lookup(path))
            }
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err("missing closing parenthesis".to_string());
                }
                Ok(inner)
            }
            other => Err(format!("unexpected token {:?}", other)),
        }
    }
}

impl Expr {
    fn eval(&self, state: &Map<String, Value>) -> Result<Value, String> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Lookup(path) => {
                let mut current = match state.get(&path[0]) {
                    Some(v) => v,
                    None => return Ok(Value::Null),
                };
                for segment in &path[1..] {
                    current = match current.get(segment) {
                        Some(v) => v,
                        None => return Ok(Value::Null),
                    };
                }
                Ok(current.clone())
            }
            Expr::Unary(op, inner) => {
                let v = inner.eval(state)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&v))),
                    UnaryOp::Neg => match v.as_f64() {
                        Some(n) => json_number(-n),
                        None => Err(format!("cannot negate {}", type_name(&v))),
                    },
                }
            }
            Expr::Binary(op, left, right) => {
                // Short-circuit the boolean operators before evaluating the
                // right-hand side.
                match op {
                    BinaryOp::And => {
                        let l = left.eval(state)?;
                        if !truthy(&l) {
                            return Ok(Value::Bool(false));
                        }
                        let r = right.eval(state)?;
                        return Ok(Value::Bool(truthy(&r)));
                    }
                    BinaryOp::Or => {
                        let l = left.eval(state)?;
                        if truthy(&l) {
                            return Ok(Value::Bool(true));
                        }
                        let r = right.eval(state)?;
                        return Ok(Value::Bool(truthy(&r)));
                    }
                    _ => {}
                }
                let l = left.eval(state)?;
                let r = right.eval(state)?;
                match op {
                    BinaryOp::Eq => Ok(Value::Bool(json_eq(&l, &r))),
                    BinaryOp::Ne => Ok(Value::Bool(!json_eq(&l, &r))),
                    BinaryOp::Lt => compare(&l, &r, |o| o == std::cmp::Ordering::Less),
                    BinaryOp::Le => compare(&l, &r, |o| o != std::cmp::Ordering::Greater),
                    BinaryOp::Gt => compare(&l, &r, |o| o == std::cmp::Ordering::Greater),
                    BinaryOp::Ge => compare(&l, &r, |o| o != std::cmp::Ordering::Less),
                    BinaryOp::Add => {
                        // String concatenation when either side is a string.
                        if l.is_string() || r.is_string() {
                            return Ok(Value::String(format!(
                                "{}{}",
                                display(&l),
                                display(&r)
                            )));
                        }
                        arith(&l, &r, "+", |a, b| a + b)
                    }
                    BinaryOp::Sub => arith(&l, &r, "-", |a, b| a - b),
                    BinaryOp::Mul => arith(&l, &r, "*", |a, b| a * b),
                    BinaryOp::Div => arith(&l, &r, "/", |a, b| a / b),
                    BinaryOp::Rem => arith(&l, &r, "%", |a, b| a % b),
                    BinaryOp::And | BinaryOp::Or => unreachable!(),
                }
            }
        }
    }
}

/// JSON equality with numeric comparison normalized through f64, so that
/// `1 == 1.0` holds the way users expect.
fn json_eq(l: &Value, r: &Value) -> bool {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

fn compare(
    l: &Value,
    r: &Value,
    check: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value, String> {
    let ordering = match (l, r) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .ok_or_else(|| "cannot compare NaN".to_string())?,
            _ => {
                return Err(format!(
                    "cannot compare {} with {}",
                    type_name(l),
                    type_name(r)
                ))
            }
        },
    };
    Ok(Value::Bool(check(ordering)))
}

fn arith(l: &Value, r: &Value, op: &str, f: impl Fn(f64, f64) -> f64) -> Result<Value, String> {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => json_number(f(a, b)),
        _ => Err(format!(
            "operator '{}' requires numbers, got {} and {}",
            op,
            type_name(l),
            type_name(r)
        )),
    }
}

fn json_number(n: f64) -> Result<Value, String> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Ok(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| format!("non-finite number result: {}", n))
}

fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
