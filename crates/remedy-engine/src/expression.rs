//! Condition expression language: lexer, parser and evaluator.
//!
//! A small Python-flavoured subset evaluated against a single binding, `state`.
//! There are no calls other than `.get(..)` on a mapping and no names other
//! than `state`, so evaluating an expression can only read the current state.
//!
//! Grammar:
//! ```text
//! expr     ::= or
//! or       ::= and ( 'or' and )*
//! and      ::= not ( 'and' not )*
//! not      ::= 'not' not | compare
//! compare  ::= sum ( CmpOp sum )*
//! CmpOp    ::= '==' | '!=' | '<' | '<=' | '>' | '>=' | 'in' | 'not' 'in'
//! sum      ::= term ( ( '+' | '-' ) term )*
//! term     ::= unary ( ( '*' | '/' | '%' ) unary )*
//! unary    ::= '-' unary | postfix
//! postfix  ::= primary ( '[' expr ']' | '.get(' expr [ ',' expr ] ')' | '.' ident )*
//! primary  ::= Number | String | 'True' | 'False' | 'None' | 'state' | '(' expr ')'
//! ```

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use serde_json::{Map, Number, Value};

use remedy_types::{RemedyError, Result, State};

/// The one name an expression may reference.
pub const STATE_BINDING: &str = "state";

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    State,
    Subscript(Box<Expr>, Box<Expr>),
    Attribute(Box<Expr>, String),
    Get {
        target: Box<Expr>,
        key: Box<Expr>,
        default: Option<Box<Expr>>,
    },
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `a < b <= c` keeps every operand so each is evaluated at most once.
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Sym(&'static str),
}

const SYMBOLS: &[&str] = &[
    "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "(", ")", "[", "]", ".", ",",
];

fn tokenize(src: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let mut is_float = false;
            if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                is_float = true;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    is_float = true;
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let token = if is_float {
                text.parse().map(Token::Float).map_err(|_| format!("invalid number '{text}'"))?
            } else {
                match text.parse() {
                    Ok(n) => Token::Int(n),
                    Err(_) => text
                        .parse()
                        .map(Token::Float)
                        .map_err(|_| format!("invalid number '{text}'"))?,
                }
            };
            tokens.push(token);
        } else if c == '\'' || c == '"' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err("unterminated string literal".into());
                };
                i += 1;
                if ch == quote {
                    break;
                }
                if ch == '\\' {
                    let Some(&escaped) = chars.get(i) else {
                        return Err("unterminated string literal".into());
                    };
                    i += 1;
                    s.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                } else {
                    s.push(ch);
                }
            }
            tokens.push(Token::Str(s));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let sym = SYMBOLS
                .iter()
                .find(|s| rest.starts_with(**s))
                .ok_or_else(|| format!("unexpected character '{c}'"))?;
            i += sym.chars().count();
            tokens.push(Token::Sym(*sym));
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Deepest nesting the parser accepts. Each parenthesis, subscript, unary
/// operator and chained binary operator adds one level.
const MAX_DEPTH: usize = 64;

type ParseResult = std::result::Result<Expr, String>;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn nest(&mut self) -> std::result::Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(format!("expression nested too deeply (limit {MAX_DEPTH})"));
        }
        Ok(())
    }
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_sym(&self, sym: &str) -> bool {
        matches!(self.peek(), Some(Token::Sym(s)) if *s == sym)
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == word)
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if self.at_sym(sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &str) -> std::result::Result<(), String> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(match self.peek() {
                Some(token) => format!("expected '{sym}', found {}", describe(token)),
                None => format!("expected '{sym}', found end of input"),
            })
        }
    }

    fn parse_or(&mut self) -> ParseResult {
        let saved = self.depth;
        let mut left = self.parse_and()?;
        while self.at_keyword("or") {
            self.pos += 1;
            self.nest()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = saved;
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult {
        let saved = self.depth;
        let mut left = self.parse_not()?;
        while self.at_keyword("and") {
            self.pos += 1;
            self.nest()?;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = saved;
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult {
        if self.at_keyword("not") {
            self.pos += 1;
            self.nest()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn compare_op(&mut self) -> Option<CmpOp> {
        let (op, width) = match self.peek()? {
            Token::Sym("==") => (CmpOp::Eq, 1),
            Token::Sym("!=") => (CmpOp::NotEq, 1),
            Token::Sym("<") => (CmpOp::Lt, 1),
            Token::Sym("<=") => (CmpOp::LtE, 1),
            Token::Sym(">") => (CmpOp::Gt, 1),
            Token::Sym(">=") => (CmpOp::GtE, 1),
            Token::Ident(w) if w == "in" => (CmpOp::In, 1),
            Token::Ident(w)
                if w == "not"
                    && matches!(self.peek_at(1), Some(Token::Ident(n)) if n == "in") =>
            {
                (CmpOp::NotIn, 2)
            }
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn parse_compare(&mut self) -> ParseResult {
        let first = self.parse_sum()?;
        let mut rest = Vec::new();
        while let Some(op) = self.compare_op() {
            rest.push((op, self.parse_sum()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn parse_sum(&mut self) -> ParseResult {
        let saved = self.depth;
        let mut left = self.parse_term()?;
        loop {
            let op = if self.eat_sym("+") {
                BinOp::Add
            } else if self.eat_sym("-") {
                BinOp::Sub
            } else {
                break;
            };
            self.nest()?;
            let right = self.parse_term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth = saved;
        Ok(left)
    }

    fn parse_term(&mut self) -> ParseResult {
        let saved = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_sym("*") {
                BinOp::Mul
            } else if self.eat_sym("/") {
                BinOp::Div
            } else if self.eat_sym("%") {
                BinOp::Mod
            } else {
                break;
            };
            self.nest()?;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth = saved;
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult {
        if self.eat_sym("-") {
            self.nest()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult {
        let saved = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_sym("[") {
                self.nest()?;
                let index = self.parse_or()?;
                self.expect_sym("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_sym(".") {
                self.nest()?;
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    Some(token) => {
                        return Err(format!("expected attribute name, found {}", describe(&token)))
                    }
                    None => return Err("expected attribute name, found end of input".into()),
                };
                if name == "get" && self.eat_sym("(") {
                    let key = self.parse_or()?;
                    let default = if self.eat_sym(",") {
                        Some(Box::new(self.parse_or()?))
                    } else {
                        None
                    };
                    self.expect_sym(")")?;
                    expr = Expr::Get {
                        target: Box::new(expr),
                        key: Box::new(key),
                        default,
                    };
                } else if self.at_sym("(") {
                    return Err(format!("call to '{name}' is not allowed"));
                } else {
                    expr = Expr::Attribute(Box::new(expr), name);
                }
            } else if self.at_sym("(") {
                return Err("calls are not allowed".into());
            } else {
                break;
            }
        }
        self.depth = saved;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::from(n))),
            Some(Token::Float(f)) => Number::from_f64(f)
                .map(|n| Expr::Literal(Value::Number(n)))
                .ok_or_else(|| format!("invalid number {f}")),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(name)) => match name.as_str() {
                "True" => Ok(Expr::Literal(Value::Bool(true))),
                "False" => Ok(Expr::Literal(Value::Bool(false))),
                "None" => Ok(Expr::Literal(Value::Null)),
                STATE_BINDING => Ok(Expr::State),
                _ => Err(format!("name '{name}' is not defined")),
            },
            Some(Token::Sym("(")) => {
                self.nest()?;
                let inner = self.parse_or()?;
                self.expect_sym(")")?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(token) => Err(format!("unexpected {}", describe(&token))),
            None => Err("unexpected end of input".into()),
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Int(n) => format!("number {n}"),
        Token::Float(f) => format!("number {f}"),
        Token::Str(s) => format!("string '{s}'"),
        Token::Ident(name) => format!("'{name}'"),
        Token::Sym(sym) => format!("'{sym}'"),
    }
}

fn make_error(expression: &str, message: impl Into<String>) -> RemedyError {
    RemedyError::ExpressionEvaluation {
        expression: expression.to_string(),
        message: message.into(),
    }
}

/// Parse an expression string into an [`Expr`].
pub fn parse_expression(src: &str) -> Result<Expr> {
    let tokens = tokenize(src).map_err(|m| make_error(src, m))?;
    if tokens.is_empty() {
        return Err(make_error(src, "empty expression"));
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_or().map_err(|m| make_error(src, m))?;
    if let Some(token) = parser.peek() {
        return Err(make_error(src, format!("unexpected {}", describe(token))));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

type EvalResult = std::result::Result<Value, String>;

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

/// Numeric view of a value. Booleans count as 0/1 here, as in Python arithmetic.
fn num(value: &Value) -> Option<Num> {
    match value {
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Number(n) => n
            .as_i64()
            .map(Num::Int)
            .or_else(|| n.as_f64().map(Num::Float)),
        _ => None,
    }
}

fn float_value(f: f64) -> EvalResult {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| format!("result {f} is not a finite number"))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Truthiness of a value: empty containers, zero, `None` and `False` are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (num(a), num(b)) {
        (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn order(op: CmpOp, a: &Value, b: &Value) -> std::result::Result<Ordering, String> {
    let ordering = match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => match (num(a), num(b)) {
            (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()),
            _ => None,
        },
    };
    ordering.ok_or_else(|| {
        format!(
            "'{op}' not supported between '{}' and '{}'",
            type_name(a),
            type_name(b)
        )
    })
}

fn contains(container: &Operand<'_>, item: &Value) -> std::result::Result<bool, String> {
    if let Operand::State(map) = container {
        return Ok(item.as_str().is_some_and(|k| map.contains_key(k)));
    }
    match container.value().as_ref() {
        Value::String(haystack) => match item {
            Value::String(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(format!(
                "'in <string>' requires string as left operand, not '{}'",
                type_name(other)
            )),
        },
        Value::Array(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Object(map) => Ok(item.as_str().is_some_and(|k| map.contains_key(k))),
        other => Err(format!("argument of type '{}' is not iterable", type_name(other))),
    }
}

fn compare(
    op: CmpOp,
    left: &Operand<'_>,
    right: &Operand<'_>,
) -> std::result::Result<bool, String> {
    let ordering = || order(op, &left.value(), &right.value());
    Ok(match op {
        CmpOp::Eq => values_equal(&left.value(), &right.value()),
        CmpOp::NotEq => !values_equal(&left.value(), &right.value()),
        CmpOp::Lt => ordering()? == Ordering::Less,
        CmpOp::LtE => ordering()? != Ordering::Greater,
        CmpOp::Gt => ordering()? == Ordering::Greater,
        CmpOp::GtE => ordering()? != Ordering::Less,
        CmpOp::In => contains(right, &left.value())?,
        CmpOp::NotIn => !contains(right, &left.value())?,
    })
}

fn arithmetic(op: BinOp, a: &Value, b: &Value) -> EvalResult {
    if let (BinOp::Add, Value::String(x), Value::String(y)) = (op, a, b) {
        return Ok(Value::String(format!("{x}{y}")));
    }
    let (Some(x), Some(y)) = (num(a), num(b)) else {
        return Err(format!(
            "unsupported operand types for {}: '{}' and '{}'",
            match op {
                BinOp::Add => "+",
                BinOp::Sub => "-",
                BinOp::Mul => "*",
                BinOp::Div => "/",
                BinOp::Mod => "%",
            },
            type_name(a),
            type_name(b)
        ));
    };

    if let (Num::Int(x), Num::Int(y)) = (x, y) {
        let exact = match op {
            BinOp::Add => x.checked_add(y),
            BinOp::Sub => x.checked_sub(y),
            BinOp::Mul => x.checked_mul(y),
            BinOp::Mod if y == 0 => return Err("integer modulo by zero".into()),
            // Python's remainder takes the sign of the divisor.
            BinOp::Mod => x
                .checked_rem(y)
                .map(|r| if r != 0 && (r < 0) != (y < 0) { r + y } else { r }),
            BinOp::Div => None,
        };
        if let Some(n) = exact {
            return Ok(Value::from(n));
        }
    }

    let (x, y) = (x.as_f64(), y.as_f64());
    match op {
        BinOp::Add => float_value(x + y),
        BinOp::Sub => float_value(x - y),
        BinOp::Mul => float_value(x * y),
        BinOp::Div if y == 0.0 => Err("division by zero".into()),
        BinOp::Div => float_value(x / y),
        BinOp::Mod if y == 0.0 => Err("float modulo".into()),
        BinOp::Mod => float_value(x - y * (x / y).floor()),
    }
}

/// An intermediate result that borrows from the state or the expression
/// wherever it can, so lookups never copy the rows they pass through.
enum Operand<'a> {
    State(&'a Map<String, Value>),
    Borrowed(&'a Value),
    Owned(Value),
}

type OperandResult<'a> = std::result::Result<Operand<'a>, String>;

impl<'a> Operand<'a> {
    /// The operand as a JSON value. Only the bare `state` binding is copied.
    fn value(&self) -> Cow<'_, Value> {
        match self {
            Operand::State(map) => Cow::Owned(Value::Object((*map).clone())),
            Operand::Borrowed(value) => Cow::Borrowed(*value),
            Operand::Owned(value) => Cow::Borrowed(value),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Operand::State(map) => Value::Object(map.clone()),
            Operand::Borrowed(value) => value.clone(),
            Operand::Owned(value) => value,
        }
    }

    fn is_mapping(&self) -> bool {
        match self {
            Operand::State(_) => true,
            Operand::Borrowed(value) => value.is_object(),
            Operand::Owned(value) => value.is_object(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Operand::State(_) => "dict",
            Operand::Borrowed(value) => type_name(value),
            Operand::Owned(value) => type_name(value),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Operand::State(map) => !map.is_empty(),
            Operand::Borrowed(value) => truthy(value),
            Operand::Owned(value) => truthy(value),
        }
    }

    /// Value stored under `key` when the operand is a mapping.
    fn member(self, key: &str) -> Option<Operand<'a>> {
        match self {
            Operand::State(map) | Operand::Borrowed(Value::Object(map)) => {
                map.get(key).map(Operand::Borrowed)
            }
            Operand::Owned(Value::Object(mut map)) => map.remove(key).map(Operand::Owned),
            _ => None,
        }
    }

    /// Element at `pos` when the operand is a list.
    fn element(self, pos: usize) -> Option<Operand<'a>> {
        match self {
            Operand::Borrowed(Value::Array(items)) => items.get(pos).map(Operand::Borrowed),
            Operand::Owned(Value::Array(mut items)) if pos < items.len() => {
                Some(Operand::Owned(items.swap_remove(pos)))
            }
            _ => None,
        }
    }

    fn list_len(&self) -> Option<usize> {
        match self {
            Operand::Borrowed(Value::Array(items)) => Some(items.len()),
            Operand::Owned(Value::Array(items)) => Some(items.len()),
            _ => None,
        }
    }
}

fn subscript<'a>(target: Operand<'a>, index: &Value) -> OperandResult<'a> {
    if target.is_mapping() {
        let key = index
            .as_str()
            .ok_or_else(|| format!("key {index} is not a string"))?;
        return target
            .member(key)
            .ok_or_else(|| format!("key '{key}' not found"));
    }
    let Some(len) = target.list_len() else {
        return Err(format!("'{}' object is not subscriptable", target.type_name()));
    };
    let Some(Num::Int(i)) = num(index).filter(|_| !index.is_boolean()) else {
        return Err(format!(
            "list indices must be integers, not '{}'",
            type_name(index)
        ));
    };
    let len = len as i64;
    let pos = if i < 0 { i + len } else { i };
    if !(0..len).contains(&pos) {
        return Err(format!("list index {i} out of range"));
    }
    target
        .element(pos as usize)
        .ok_or_else(|| format!("list index {i} out of range"))
}

fn eval<'a>(expr: &'a Expr, state: &'a Map<String, Value>) -> OperandResult<'a> {
    match expr {
        Expr::Literal(value) => Ok(Operand::Borrowed(value)),
        Expr::State => Ok(Operand::State(state)),
        Expr::Subscript(target, index) => {
            let target = eval(target, state)?;
            let index = eval(index, state)?;
            subscript(target, &index.value())
        }
        Expr::Attribute(target, name) => {
            let target = eval(target, state)?;
            if !target.is_mapping() {
                return Err(format!(
                    "'{}' object has no attribute '{name}'",
                    target.type_name()
                ));
            }
            target
                .member(name)
                .ok_or_else(|| format!("key '{name}' not found"))
        }
        Expr::Get {
            target,
            key,
            default,
        } => {
            let target = eval(target, state)?;
            if !target.is_mapping() {
                return Err(format!(
                    "'{}' object has no attribute 'get'",
                    target.type_name()
                ));
            }
            let key = eval(key, state)?;
            let found = match key.value().as_str() {
                Some(k) => target.member(k),
                None => None,
            };
            match (found, default) {
                (Some(found), _) => Ok(found),
                (None, Some(default)) => eval(default, state),
                (None, None) => Ok(Operand::Owned(Value::Null)),
            }
        }
        Expr::Neg(inner) => {
            let operand = eval(inner, state)?;
            let value = operand.value();
            let negated = match num(&value) {
                Some(Num::Int(i)) => match i.checked_neg() {
                    Some(n) => Ok(Value::from(n)),
                    None => float_value(-(i as f64)),
                },
                Some(Num::Float(f)) => float_value(-f),
                None => Err(format!("bad operand type for unary -: '{}'", type_name(&value))),
            };
            negated.map(Operand::Owned)
        }
        Expr::Not(inner) => Ok(Operand::Owned(Value::Bool(!eval(inner, state)?.truthy()))),
        Expr::Binary(op, left, right) => {
            let left = eval(left, state)?;
            let right = eval(right, state)?;
            arithmetic(*op, &left.value(), &right.value()).map(Operand::Owned)
        }
        Expr::Compare(first, rest) => {
            let mut left = eval(first, state)?;
            for (op, operand) in rest {
                let right = eval(operand, state)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Operand::Owned(Value::Bool(false)));
                }
                left = right;
            }
            Ok(Operand::Owned(Value::Bool(true)))
        }
        Expr::And(left, right) => {
            let left = eval(left, state)?;
            if left.truthy() {
                eval(right, state)
            } else {
                Ok(left)
            }
        }
        Expr::Or(left, right) => {
            let left = eval(left, state)?;
            if left.truthy() {
                Ok(left)
            } else {
                eval(right, state)
            }
        }
    }
}

/// Evaluate a parsed expression with `state` as its only binding.
///
/// `source` is used for error reporting.
pub fn evaluate(expr: &Expr, source: &str, state: &State) -> Result<Value> {
    eval(expr, state.as_map())
        .map(Operand::into_value)
        .map_err(|m| make_error(source, m))
}

/// Parse and evaluate `source`, returning the truthiness of the result.
pub fn evaluate_condition(source: &str, state: &State) -> Result<bool> {
    let expr = parse_expression(source)?;
    eval(&expr, state.as_map())
        .map(|operand| operand.truthy())
        .map_err(|m| make_error(source, m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: Value) -> State {
        State::from_value(value).unwrap()
    }

    fn eval_str(src: &str, s: &State) -> Value {
        let expr = parse_expression(src).unwrap();
        evaluate(&expr, src, s).unwrap()
    }

    #[test]
    fn canonical_loop_condition() {
        let src = "state['anomaly_count'] > state.get('threshold', 0)";
        assert!(!evaluate_condition(src, &state(json!({"anomaly_count": 0}))).unwrap());
        assert!(evaluate_condition(src, &state(json!({"anomaly_count": 3}))).unwrap());
        assert!(!evaluate_condition(src, &state(json!({"anomaly_count": 3, "threshold": 5}))).unwrap());
        assert!(evaluate_condition(src, &state(json!({"anomaly_count": 3, "threshold": 2.5}))).unwrap());
    }

    #[test]
    fn missing_subscript_key_fails() {
        let err = evaluate_condition("state['anomaly_count'] > 0", &State::new()).unwrap_err();
        match err {
            RemedyError::ExpressionEvaluation { expression, message } => {
                assert_eq!(expression, "state['anomaly_count'] > 0");
                assert!(message.contains("anomaly_count"), "got: {message}");
            }
            other => panic!("expected ExpressionEvaluation, got: {other:?}"),
        }
    }

    #[test]
    fn names_other_than_state_are_rejected() {
        for src in ["os.system('ls')", "x > 1", "__import__('os')", "len(state) > 0"] {
            let err = parse_expression(src).unwrap_err();
            assert!(
                matches!(err, RemedyError::ExpressionEvaluation { .. }),
                "{src} should fail"
            );
        }
    }

    #[test]
    fn calls_other_than_get_are_rejected() {
        assert!(parse_expression("state.keys()").is_err());
        assert!(parse_expression("state['f'](1)").is_err());
    }

    #[test]
    fn unbalanced_and_trailing_input_is_rejected() {
        assert!(parse_expression("(state['a'] > 1").is_err());
        assert!(parse_expression("state['a'] > 1)").is_err());
        assert!(parse_expression("state['a").is_err());
        assert!(parse_expression("state['a'] >").is_err());
        assert!(parse_expression("").is_err());
        assert!(parse_expression("state = 1").is_err());
    }

    #[test]
    fn arithmetic_follows_python() {
        let s = State::new();
        assert_eq!(eval_str("1 + 2 * 3", &s), json!(7));
        assert_eq!(eval_str("(1 + 2) * 3", &s), json!(9));
        assert_eq!(eval_str("7 / 2", &s), json!(3.5));
        assert_eq!(eval_str("-7 % 3", &s), json!(2));
        assert_eq!(eval_str("7 % -3", &s), json!(-2));
        assert_eq!(eval_str("True + 1", &s), json!(2));
        assert_eq!(eval_str("'a' + 'b'", &s), json!("ab"));
        assert_eq!(eval_str("--3", &s), json!(3));
        assert_eq!(eval_str("1.5e1", &s), json!(15.0));
        assert!(evaluate_condition("1 / 0", &s).is_err());
        assert!(evaluate_condition("'a' - 1", &s).is_err());
    }

    #[test]
    fn comparisons_chain() {
        let s = state(json!({"n": 5}));
        assert!(evaluate_condition("1 < state['n'] <= 5", &s).unwrap());
        assert!(!evaluate_condition("1 < state['n'] < 5", &s).unwrap());
        assert!(evaluate_condition("state['n'] == 5.0", &s).unwrap());
        assert!(evaluate_condition("'b' > 'a'", &s).unwrap());
        assert!(evaluate_condition("None < 1", &s).is_err());
    }

    #[test]
    fn boolean_operators_short_circuit() {
        let s = state(json!({"flag": false}));
        // The right side would fail on a missing key if evaluated.
        assert!(!evaluate_condition("state['flag'] and state['missing']", &s).unwrap());
        assert!(evaluate_condition("not state['flag'] or state['missing']", &s).unwrap());
        assert_eq!(eval_str("0 or 'x'", &s), json!("x"));
        assert_eq!(eval_str("1 and 2", &s), json!(2));
    }

    #[test]
    fn membership_and_access() {
        let s = state(json!({
            "data": [{"x": 1}, {"x": 2}],
            "options": {"use_zscore": true},
            "name": "remedy"
        }));
        assert!(evaluate_condition("'data' in state", &s).unwrap());
        assert!(evaluate_condition("'rules' not in state", &s).unwrap());
        assert!(evaluate_condition("state.options.use_zscore", &s).unwrap());
        assert!(evaluate_condition("state['data'][-1]['x'] == 2", &s).unwrap());
        assert!(evaluate_condition("'med' in state['name']", &s).unwrap());
        assert!(evaluate_condition("2 in [1, 2]", &s).is_err());
        assert!(evaluate_condition("state['data'][5]", &s).is_err());
        assert_eq!(eval_str("state.get('missing')", &s), Value::Null);
    }

    #[test]
    fn truthiness_of_result() {
        let s = state(json!({"empty": [], "zero": 0, "text": "t"}));
        assert!(!evaluate_condition("state['empty']", &s).unwrap());
        assert!(!evaluate_condition("state['zero']", &s).unwrap());
        assert!(evaluate_condition("state['text']", &s).unwrap());
        assert!(evaluate_condition("state", &s).unwrap());
        assert!(!evaluate_condition("None", &s).unwrap());
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let deep = [
            format!("{}True", "not ".repeat(200_000)),
            format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000)),
            format!("{}1", "-".repeat(50_000)),
            format!("state{}", "['a']".repeat(1_000)),
            format!("1{}", " + 1".repeat(100_000)),
            format!("True{}", " and True".repeat(100_000)),
        ];
        for src in &deep {
            match evaluate_condition(src, &State::new()) {
                Err(RemedyError::ExpressionEvaluation { message, .. }) => {
                    assert!(message.contains("nested too deeply"), "got: {message}")
                }
                other => panic!("expected ExpressionEvaluation, got: {other:?}"),
            }
        }
    }

    #[test]
    fn moderate_nesting_still_parses() {
        let s = state(json!({"a": {"a": {"a": 3}}}));
        assert!(evaluate_condition("not not not not True", &s).unwrap());
        assert!(evaluate_condition("((((state['a']['a']['a'])))) == 3", &s).unwrap());
        assert_eq!(eval_str("--3", &s), json!(3));
        assert_eq!(eval_str("1 + 1 + 1 + 1 + 1", &s), json!(5));
    }

    #[test]
    fn lookups_return_the_stored_values() {
        let s = state(json!({
            "data": [{"x": 1}, {"x": 2}],
            "options": {"z_thresh": 2.5}
        }));
        assert_eq!(eval_str("state", &s), s.clone().into_value());
        assert_eq!(eval_str("state['data']", &s), json!([{"x": 1}, {"x": 2}]));
        assert_eq!(eval_str("state.get('options')['z_thresh']", &s), json!(2.5));
        assert_eq!(eval_str("state.get('rules', state['data'][0])", &s), json!({"x": 1}));
        assert_eq!(eval_str("state.get('rules') or state['data'][1]", &s), json!({"x": 2}));
        assert!(evaluate_condition("state['data'][0] == state['data'][0]", &s).unwrap());
    }
}
