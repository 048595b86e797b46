//! Expression parsing and numeric evaluation for the native engine

use super::rational::Rational;
use super::{NResult, NativeError};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    Pi,
    E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Ln,
    Sqrt,
    Abs,
}

impl Func {
    fn from_name(name: &str) -> Option<Func> {
        let func = match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" | "arcsin" => Func::Asin,
            "acos" | "arccos" => Func::Acos,
            "atan" | "arctan" => Func::Atan,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "exp" => Func::Exp,
            "log" | "ln" => Func::Ln,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            _ => return None,
        };
        Some(func)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(Rational),
    Var(String),
    Const(Constant),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

impl Expr {
    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        self.collect_vars(&mut vars);
        vars
    }

    fn collect_vars(&self, vars: &mut BTreeSet<String>) {
        match self {
            Expr::Var(name) => {
                vars.insert(name.clone());
            }
            Expr::Num(_) | Expr::Const(_) => {}
            Expr::Neg(inner) | Expr::Call(_, inner) => inner.collect_vars(vars),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) | Expr::Pow(a, b) => {
                a.collect_vars(vars);
                b.collect_vars(vars);
            }
        }
    }

    pub fn is_constant(&self) -> bool {
        self.free_vars().is_empty()
    }
}

//
// ================= Tokenizer =================
//

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Rational),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(text: &str) -> NResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // scientific notation: 1e-5, 2.5E3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(Rational::from_decimal(&literal)?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Op('^'));
                i += 2;
            }
            '+' | '-' | '*' | '/' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '−' => {
                tokens.push(Token::Op('-'));
                i += 1;
            }
            '×' | '·' => {
                tokens.push(Token::Op('*'));
                i += 1;
            }
            '÷' => {
                tokens.push(Token::Op('/'));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            other => {
                return Err(NativeError::Parse(format!(
                    "unexpected character '{}' in {}",
                    other, text
                )))
            }
        }
    }
    Ok(tokens)
}

//
// ================= Parser =================
//

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> NResult<Expr> {
        let mut left = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.term()?;
            left = if op == '+' {
                Expr::Add(Box::new(left), Box::new(right))
            } else {
                Expr::Sub(Box::new(left), Box::new(right))
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> NResult<Expr> {
        let mut left = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Op('*')) => {
                    self.pos += 1;
                    let right = self.unary()?;
                    left = Expr::Mul(Box::new(left), Box::new(right));
                }
                Some(Token::Op('/')) => {
                    self.pos += 1;
                    let right = self.unary()?;
                    left = Expr::Div(Box::new(left), Box::new(right));
                }
                // implicit multiplication: 2x, 3(x + 1), x sin(x)
                Some(Token::Num(_)) | Some(Token::Ident(_)) | Some(Token::LParen) => {
                    let right = self.power()?;
                    left = Expr::Mul(Box::new(left), Box::new(right));
                }
                _ => return Ok(left),
            }
        }
    }

    fn unary(&mut self) -> NResult<Expr> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> NResult<Expr> {
        let base = self.primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::Pow(Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> NResult<Expr> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Ident(name)) => {
                let lower = name.to_lowercase();
                if let Some(func) = Func::from_name(&lower) {
                    if let Some(Token::LParen) = self.peek() {
                        self.pos += 1;
                        let arg = self.expr()?;
                        self.expect_rparen()?;
                        return Ok(Expr::Call(func, Box::new(arg)));
                    }
                }
                Ok(match lower.as_str() {
                    "pi" => Expr::Const(Constant::Pi),
                    "e" => Expr::Const(Constant::E),
                    _ => Expr::Var(name),
                })
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            other => Err(NativeError::Parse(format!("unexpected token {:?}", other))),
        }
    }

    fn expect_rparen(&mut self) -> NResult<()> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            other => Err(NativeError::Parse(format!("expected ')', found {:?}", other))),
        }
    }
}

pub fn parse_expression(text: &str) -> NResult<Expr> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(NativeError::Parse("empty expression".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(NativeError::Parse(format!(
            "trailing input after position {} in {}",
            parser.pos, text
        )));
    }
    Ok(expr)
}

/// `lhs = rhs` becomes `lhs - rhs`; anything else is taken as `expr = 0`.
pub fn parse_equation(text: &str) -> NResult<Expr> {
    let normalized = text.replace("==", "=");
    match normalized.split_once('=') {
        Some((lhs, rhs)) => {
            if rhs.contains('=') {
                return Err(NativeError::Parse(format!("more than one '=' in {}", text)));
            }
            Ok(Expr::Sub(
                Box::new(parse_expression(lhs)?),
                Box::new(parse_expression(rhs)?),
            ))
        }
        None => parse_expression(&normalized),
    }
}

//
// ================= Evaluation =================
//

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Exact(Rational),
    Approx(f64),
}

impl Value {
    pub fn to_f64(&self) -> f64 {
        match self {
            Value::Exact(r) => r.to_f64(),
            Value::Approx(f) => *f,
        }
    }

    pub fn as_exact(&self) -> Option<Rational> {
        match self {
            Value::Exact(r) => Some(*r),
            Value::Approx(_) => None,
        }
    }

    fn approx(value: f64) -> NResult<Value> {
        if value.is_finite() {
            Ok(Value::Approx(value))
        } else {
            Err(NativeError::Undefined("result is not a finite number".to_string()))
        }
    }

    fn combine(
        self,
        other: Value,
        exact: fn(Rational, Rational) -> NResult<Rational>,
        approx: fn(f64, f64) -> f64,
    ) -> NResult<Value> {
        if let (Value::Exact(a), Value::Exact(b)) = (self, other) {
            match exact(a, b) {
                Ok(r) => return Ok(Value::Exact(r)),
                Err(NativeError::Overflow) => {}
                Err(e) => return Err(e),
            }
        }
        Value::approx(approx(self.to_f64(), other.to_f64()))
    }

    pub fn add(self, other: Value) -> NResult<Value> {
        self.combine(other, Rational::add, |a, b| a + b)
    }

    pub fn sub(self, other: Value) -> NResult<Value> {
        self.combine(other, Rational::sub, |a, b| a - b)
    }

    pub fn mul(self, other: Value) -> NResult<Value> {
        self.combine(other, Rational::mul, |a, b| a * b)
    }

    pub fn div(self, other: Value) -> NResult<Value> {
        if other.to_f64() == 0.0 {
            return Err(NativeError::DivisionByZero);
        }
        self.combine(other, Rational::div, |a, b| a / b)
    }

    pub fn neg(self) -> NResult<Value> {
        match self {
            Value::Exact(r) => match r.neg() {
                Ok(n) => Ok(Value::Exact(n)),
                Err(_) => Value::approx(-r.to_f64()),
            },
            Value::Approx(f) => Ok(Value::Approx(-f)),
        }
    }

    pub fn pow(self, exponent: Value) -> NResult<Value> {
        if let (Value::Exact(base), Value::Exact(exp)) = (self, exponent) {
            // integer and half-integer powers stay exact
            let exact_power = || i64::try_from(exp.numer()).map_err(|_| NativeError::Overflow);
            if exp.is_integer() {
                let power = exact_power()?;
                if base.is_zero() && exp.is_negative() {
                    return Err(NativeError::DivisionByZero);
                }
                if let Ok(r) = base.pow(power) {
                    return Ok(Value::Exact(r));
                }
            } else if exp.denom() == 2 {
                let power = exact_power()?;
                if let Some(root) = base.sqrt_exact() {
                    if let Ok(r) = root.pow(power) {
                        return Ok(Value::Exact(r));
                    }
                }
            }
        }

        let (b, e) = (self.to_f64(), exponent.to_f64());
        if b < 0.0 && e.fract() != 0.0 {
            return Err(NativeError::Undefined(format!(
                "{}^{} has no real value",
                b, e
            )));
        }
        if b == 0.0 && e < 0.0 {
            return Err(NativeError::DivisionByZero);
        }
        Value::approx(b.powf(e))
    }
}

pub fn eval(expr: &Expr, env: &HashMap<String, Value>) -> NResult<Value> {
    match expr {
        Expr::Num(n) => Ok(Value::Exact(*n)),
        Expr::Var(name) => env
            .get(name)
            .copied()
            .ok_or_else(|| NativeError::Unsupported(format!("free symbol {}", name))),
        Expr::Const(Constant::Pi) => Ok(Value::Approx(std::f64::consts::PI)),
        Expr::Const(Constant::E) => Ok(Value::Approx(std::f64::consts::E)),
        Expr::Neg(inner) => eval(inner, env)?.neg(),
        Expr::Add(a, b) => eval(a, env)?.add(eval(b, env)?),
        Expr::Sub(a, b) => eval(a, env)?.sub(eval(b, env)?),
        Expr::Mul(a, b) => eval(a, env)?.mul(eval(b, env)?),
        Expr::Div(a, b) => eval(a, env)?.div(eval(b, env)?),
        Expr::Pow(a, b) => eval(a, env)?.pow(eval(b, env)?),
        Expr::Call(func, arg) => apply(*func, eval(arg, env)?),
    }
}

pub fn eval_constant(expr: &Expr) -> NResult<Value> {
    eval(expr, &HashMap::new())
}

fn apply(func: Func, arg: Value) -> NResult<Value> {
    // exact special points
    if let Value::Exact(r) = arg {
        match func {
            Func::Abs => return r.abs().map(Value::Exact),
            Func::Sqrt => {
                if let Some(root) = r.sqrt_exact() {
                    return Ok(Value::Exact(root));
                }
            }
            Func::Sin | Func::Tan | Func::Asin | Func::Atan | Func::Sinh | Func::Tanh
                if r.is_zero() =>
            {
                return Ok(Value::Exact(Rational::ZERO))
            }
            Func::Cos | Func::Cosh | Func::Exp if r.is_zero() => {
                return Ok(Value::Exact(Rational::ONE))
            }
            Func::Ln if r == Rational::ONE => return Ok(Value::Exact(Rational::ZERO)),
            _ => {}
        }
    }

    let x = arg.to_f64();
    let undefined = |what: &str| Err(NativeError::Undefined(format!("{} at {}", what, x)));
    let value = match func {
        Func::Sin => x.sin(),
        Func::Cos => x.cos(),
        Func::Tan => x.tan(),
        Func::Asin if !(-1.0..=1.0).contains(&x) => return undefined("asin"),
        Func::Asin => x.asin(),
        Func::Acos if !(-1.0..=1.0).contains(&x) => return undefined("acos"),
        Func::Acos => x.acos(),
        Func::Atan => x.atan(),
        Func::Sinh => x.sinh(),
        Func::Cosh => x.cosh(),
        Func::Tanh => x.tanh(),
        Func::Exp => x.exp(),
        Func::Ln if x <= 0.0 => return undefined("log"),
        Func::Ln => x.ln(),
        Func::Sqrt if x < 0.0 => return undefined("sqrt"),
        Func::Sqrt => x.sqrt(),
        Func::Abs => x.abs(),
    };
    Value::approx(value)
}

/// Shortest readable rendering of a float; integral values print without a
/// fractional part.
pub fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
