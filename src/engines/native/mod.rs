//! In-process exact engine
//!
//! Covers the part of every operation that has a closed form over the
//! rationals: polynomial calculus, rational-root factoring, quadratic
//! surds, rational-function limits, finite sums and matrix algebra.
//! Anything beyond that is reported as unsupported so the next adapter
//! gets a chance.

pub mod expr;
pub mod matrix;
pub mod poly;
pub mod rational;

use crate::engines::{classify_output, EngineAdapter, RawOutput};
use crate::error::ResolutionError;
use crate::models::{Command, ExecutionResult, Operation};
use async_trait::async_trait;
use expr::{eval, eval_constant, format_float, parse_equation, parse_expression, Expr, Value};
use matrix::{solve_linear, Matrix};
use poly::{LimitValue, Poly, RationalFn};
use rational::Rational;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::debug;

const MAX_SUM_TERMS: i128 = 100_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NativeError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("exact arithmetic overflow")]
    Overflow,

    #[error("undefined: {0}")]
    Undefined(String),
}

pub type NResult<T> = std::result::Result<T, NativeError>;

impl From<NativeError> for ResolutionError {
    fn from(err: NativeError) -> Self {
        ResolutionError::ExecutionException(err.to_string())
    }
}

#[derive(Debug, Default, Clone)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EngineAdapter for NativeEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn run(&self, command: &Command) -> ExecutionResult {
        match compute(command) {
            Ok(raw) => classify_output(self.name(), command.operation, raw),
            Err(err) => {
                debug!(engine = "native", operation = %command.operation, error = %err, "Native engine declined");
                ExecutionResult::failed(self.name(), &err.into(), None)
            }
        }
    }
}

/// Runs `command` to completion on the calling thread.
pub fn compute(command: &Command) -> NResult<RawOutput> {
    match command.operation {
        Operation::Evaluate => evaluate(command),
        Operation::Simplify => simplify(command),
        Operation::Factor => factor(command),
        Operation::Differentiate => differentiate(command),
        Operation::Integrate => integrate(command),
        Operation::Solve => solve(command),
        Operation::Limit => limit(command),
        Operation::Sum => sum(command),
        Operation::Determinant => {
            let det = Matrix::parse(&command.expression)?.determinant()?;
            Ok(exact_output(det))
        }
        Operation::Invert => {
            let inverse = Matrix::parse(&command.expression)?.inverse()?;
            let decimal = (!inverse.is_integral()).then(|| inverse.decimal_display());
            Ok(RawOutput::new(inverse.display(), decimal))
        }
        Operation::Taylor => taylor(command),
    }
}

//
// ================= Helpers =================
//

fn exact_output(value: Rational) -> RawOutput {
    let decimal = (!value.is_integer()).then(|| format_float(value.to_f64()));
    RawOutput::new(value.to_string(), decimal)
}

fn value_output(value: Value) -> RawOutput {
    match value {
        Value::Exact(r) => exact_output(r),
        Value::Approx(f) => RawOutput::new(format_float(f), None),
    }
}

/// The requested variable when it occurs (or nothing occurs), otherwise the
/// single free symbol of the expression.
fn pick_variable(expr: &Expr, requested: &str) -> NResult<String> {
    let free = expr.free_vars();
    if free.is_empty() || free.contains(requested) {
        return Ok(requested.to_string());
    }
    match free.len() {
        1 => Ok(free.into_iter().next().unwrap_or_default()),
        _ => Err(NativeError::Unsupported(format!(
            "several free symbols: {}",
            free.into_iter().collect::<Vec<_>>().join(", ")
        ))),
    }
}

#[derive(Debug, Clone, Copy)]
enum Point {
    Finite(Value),
    PosInfinity,
    NegInfinity,
}

fn parse_point(text: &str) -> NResult<Point> {
    let compact: String = text.split_whitespace().collect::<String>().to_lowercase();
    match compact.as_str() {
        "infinity" | "+infinity" | "inf" | "+inf" | "oo" | "+oo" => Ok(Point::PosInfinity),
        "-infinity" | "-inf" | "-oo" | "minf" => Ok(Point::NegInfinity),
        _ => Ok(Point::Finite(eval_constant(&parse_expression(text)?)?)),
    }
}

fn finite_point(text: &str, what: &str) -> NResult<Value> {
    match parse_point(text)? {
        Point::Finite(v) => Ok(v),
        _ => Err(NativeError::Unsupported(format!("{} with an infinite bound", what))),
    }
}

fn polynomial(command: &Command) -> NResult<(Poly, String)> {
    let expr = parse_expression(&command.expression)?;
    let var = pick_variable(&expr, command.variable())?;
    Ok((Poly::from_expr(&expr, &var)?, var))
}

//
// ================= Operations =================
//

fn evaluate(command: &Command) -> NResult<RawOutput> {
    let value = eval_constant(&parse_expression(&command.expression)?)?;
    let mut output = value_output(value);
    output.decimal = Some(format_float(value.to_f64()));
    Ok(output)
}

fn simplify(command: &Command) -> NResult<RawOutput> {
    let expr = parse_expression(&command.expression)?;
    if expr.is_constant() {
        return Ok(value_output(eval_constant(&expr)?));
    }
    let var = pick_variable(&expr, command.variable())?;
    match Poly::from_expr(&expr, &var) {
        Ok(p) => Ok(RawOutput::new(p.display(&var), None)),
        Err(NativeError::Unsupported(_)) => {
            let reduced = RationalFn::from_expr(&expr, &var)?.reduced()?;
            Ok(RawOutput::new(reduced.display(&var), None))
        }
        Err(e) => Err(e),
    }
}

fn factor(command: &Command) -> NResult<RawOutput> {
    let (p, var) = polynomial(command)?;
    if let Some(c) = p.as_constant() {
        return Ok(exact_output(c));
    }

    let (content, primitive) = p.primitive()?;
    let (roots, _) = primitive.split_rational_roots()?;

    let mut factors: Vec<(String, usize)> = Vec::new();
    let mut rest = primitive;
    for root in &roots {
        let linear = Poly::from_coeffs(vec![
            Rational::integer(root.numer()).neg()?,
            Rational::integer(root.denom()),
        ]);
        rest = rest.div_rem(&linear)?.0;
        let text = linear_factor(*root, &var);
        if let Some((last, count)) = factors.last_mut() {
            if *last == text {
                *count += 1;
                continue;
            }
        }
        factors.push((text, 1));
    }

    let mut parts: Vec<String> = factors
        .into_iter()
        .map(|(text, count)| if count > 1 { format!("{}^{}", text, count) } else { text })
        .collect();
    if rest.as_constant() != Some(Rational::ONE) {
        parts.push(format!("({})", rest.display(&var)));
    }

    let prefix = if content == Rational::ONE {
        String::new()
    } else if content == Rational::integer(-1) {
        "-".to_string()
    } else {
        format!("{}*", content)
    };
    Ok(RawOutput::new(format!("{}{}", prefix, parts.join("*")), None))
}

/// `x`, `(x - 2)`, `(x + 1)` or `(2*x - 1)` for the root `p/q`.
fn linear_factor(root: Rational, var: &str) -> String {
    if root.is_zero() {
        return var.to_string();
    }
    let lead = if root.denom() == 1 {
        var.to_string()
    } else {
        format!("{}*{}", root.denom(), var)
    };
    let sign = if root.is_negative() { '+' } else { '-' };
    format!("({} {} {})", lead, sign, root.numer().unsigned_abs())
}

fn differentiate(command: &Command) -> NResult<RawOutput> {
    let (p, var) = polynomial(command)?;
    Ok(RawOutput::new(p.derivative()?.display(&var), None))
}

fn integrate(command: &Command) -> NResult<RawOutput> {
    let (p, var) = polynomial(command)?;
    let antiderivative = p.antiderivative()?;
    match command.bounds() {
        Some((a, b)) => {
            let lower = finite_point(a, "improper integral")?;
            let upper = finite_point(b, "improper integral")?;
            let value = antiderivative.eval_value(upper)?.sub(antiderivative.eval_value(lower)?)?;
            Ok(value_output(value))
        }
        None => Ok(RawOutput::new(antiderivative.display(&var), None)),
    }
}

fn solve(command: &Command) -> NResult<RawOutput> {
    let parts = command.expression_parts();
    if parts.len() > 1 {
        return solve_system(&parts);
    }

    let expr = parse_equation(&command.expression)?;
    let var = pick_variable(&expr, command.variable())?;
    let f = RationalFn::from_expr(&expr, &var)?.reduced()?;

    if let Some(c) = f.num.as_constant() {
        if c.is_zero() {
            return Err(NativeError::Unsupported("identity holds for every value".to_string()));
        }
        return Ok(RawOutput::new("[]".to_string(), None));
    }

    let (found, rest) = f.num.split_rational_roots()?;
    let mut roots: Vec<Rational> = Vec::new();
    for r in found {
        if !f.den.eval(r)?.is_zero() && roots.last() != Some(&r) {
            roots.push(r);
        }
    }

    let mut symbolic: Vec<String> = roots.iter().map(Rational::to_string).collect();
    let mut decimals: Vec<String> = roots.iter().map(|r| format_float(r.to_f64())).collect();
    let mut exact = roots.iter().all(Rational::is_integer);

    match rest.degree() {
        Some(0) | None => {}
        Some(2) => {
            for (text, approx) in quadratic_roots(&rest)? {
                symbolic.push(text);
                decimals.push(approx);
            }
            exact = false;
        }
        Some(d) => {
            return Err(NativeError::Unsupported(format!(
                "cannot solve a degree {} factor exactly",
                d
            )))
        }
    }

    let decimal = (!exact).then(|| format!("[{}]", decimals.join(", ")));
    Ok(RawOutput::new(format!("[{}]", symbolic.join(", ")), decimal))
}

/// Roots of an irreducible quadratic as surds, with decimal renderings.
fn quadratic_roots(p: &Poly) -> NResult<Vec<(String, String)>> {
    let (_, q) = p.primitive()?;
    let (a, b, c) = (q.coeff(2).numer(), q.coeff(1).numer(), q.coeff(0).numer());
    let disc = b
        .checked_mul(b)
        .and_then(|bb| a.checked_mul(c).and_then(|ac| ac.checked_mul(4)).and_then(|ac4| bb.checked_sub(ac4)))
        .ok_or(NativeError::Overflow)?;

    let imaginary = disc < 0;
    let (square, radicand) = split_square(disc.checked_abs().ok_or(NativeError::Overflow)?);
    let g = gcd3(b, square, 2 * a);
    let (b, s, d) = (b / g, square / g, 2 * a / g);

    let sqrt_part = match (s, radicand) {
        (1, 1) => String::new(),
        (s, 1) => s.to_string(),
        (1, k) => format!("sqrt({})", k),
        (s, k) => format!("{}*sqrt({})", s, k),
    };
    let sqrt_part = match (imaginary, sqrt_part.is_empty()) {
        (true, true) => "i".to_string(),
        (true, false) if radicand == 1 => format!("{}i", sqrt_part),
        (true, false) => format!("{}*i", sqrt_part),
        (false, true) => "1".to_string(),
        (false, false) => sqrt_part,
    };

    let re = -(b as f64) / d as f64;
    let im = s as f64 * (radicand as f64).sqrt() / d as f64;

    let mut roots = Vec::new();
    for sign in ['-', '+'] {
        let numerator = if b == 0 {
            if sign == '-' {
                format!("-{}", sqrt_part)
            } else {
                sqrt_part.clone()
            }
        } else {
            format!("{} {} {}", -b, sign, sqrt_part)
        };
        let text = match (d, b == 0) {
            (1, _) => numerator,
            (_, true) => format!("{}/{}", numerator, d),
            (_, false) => format!("({})/{}", numerator, d),
        };
        let offset = if sign == '-' { -im } else { im };
        let approx = if imaginary {
            let sign = if offset < 0.0 { '-' } else { '+' };
            format!("{} {} {}i", format_float(re), sign, format_float(offset.abs()))
        } else {
            format_float(re + offset)
        };
        roots.push((text, approx));
    }
    Ok(roots)
}

/// `n = s^2 * k` with `s` as large as a bounded trial search finds.
fn split_square(n: i128) -> (i128, i128) {
    let mut square = 1;
    let mut rest = n;
    let mut f: i128 = 2;
    while f * f <= rest && f < 1_000_000 {
        while rest % (f * f) == 0 {
            rest /= f * f;
            square *= f;
        }
        f += 1;
    }
    (square, rest)
}

fn gcd3(a: i128, b: i128, c: i128) -> i128 {
    fn gcd(a: i128, b: i128) -> i128 {
        if b == 0 {
            a.abs()
        } else {
            gcd(b, a % b)
        }
    }
    gcd(gcd(a, b), c).max(1)
}

fn solve_system(parts: &[String]) -> NResult<RawOutput> {
    let equations = parts
        .iter()
        .map(|p| parse_equation(p))
        .collect::<NResult<Vec<_>>>()?;
    let vars: Vec<String> = equations
        .iter()
        .flat_map(|e| e.free_vars())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if vars.is_empty() {
        return Err(NativeError::Unsupported("system has no unknowns".to_string()));
    }

    let rows = equations
        .iter()
        .map(|e| linear_row(e, &vars))
        .collect::<NResult<Vec<_>>>()?;
    let solution = solve_linear(rows, vars.len())?;

    let pairs = |render: &dyn Fn(&Rational) -> String| {
        let body: Vec<String> = vars
            .iter()
            .zip(&solution)
            .map(|(v, r)| format!("{}: {}", v, render(r)))
            .collect();
        format!("{{{}}}", body.join(", "))
    };
    let symbolic = pairs(&|r| r.to_string());
    let decimal = (!solution.iter().all(Rational::is_integer)).then(|| pairs(&|r| format_float(r.to_f64())));
    Ok(RawOutput::new(symbolic, decimal))
}

/// Coefficients `[a1 .. an | -c]` of `a·v + c`, recovered by probing and
/// then checked at two further points.
fn linear_row(expr: &Expr, vars: &[String]) -> NResult<Vec<Rational>> {
    let at = |point: &[i128]| -> NResult<Rational> {
        let env: HashMap<String, Value> = vars
            .iter()
            .zip(point)
            .map(|(v, x)| (v.clone(), Value::Exact(Rational::integer(*x))))
            .collect();
        eval(expr, &env)?
            .as_exact()
            .ok_or_else(|| NativeError::Unsupported("non-rational coefficient".to_string()))
    };

    let n = vars.len();
    let origin = at(&vec![0; n])?;
    let mut row = Vec::with_capacity(n + 1);
    for i in 0..n {
        let mut unit = vec![0; n];
        unit[i] = 1;
        row.push(at(&unit)?.sub(origin)?);
    }

    for probe in [
        (0..n).map(|i| i as i128 + 2).collect::<Vec<_>>(),
        (0..n).map(|i| (i * i) as i128 + 3).collect::<Vec<_>>(),
    ] {
        let mut predicted = origin;
        for (a, x) in row.iter().zip(&probe) {
            predicted = predicted.add(a.mul(Rational::integer(*x))?)?;
        }
        if at(&probe)? != predicted {
            return Err(NativeError::Unsupported("system is not linear".to_string()));
        }
    }

    row.push(origin.neg()?);
    Ok(row)
}

fn limit(command: &Command) -> NResult<RawOutput> {
    let expr = parse_expression(&command.expression)?;
    let var = pick_variable(&expr, command.variable())?;
    let point = parse_point(command.start_point().unwrap_or("0"))?;

    let value = match (RationalFn::from_expr(&expr, &var), point) {
        (Ok(f), Point::PosInfinity) => f.reduced()?.limit_at_infinity(true)?,
        (Ok(f), Point::NegInfinity) => f.reduced()?.limit_at_infinity(false)?,
        (Ok(f), Point::Finite(Value::Exact(a))) => f.limit_at(a, command.limit_direction())?,
        (_, Point::Finite(at)) => {
            // continuous at the point: plain substitution
            let mut env = HashMap::new();
            env.insert(var.clone(), at);
            return Ok(value_output(eval(&expr, &env)?));
        }
        (Err(e), _) => return Err(e),
    };

    Ok(match value {
        LimitValue::Finite(r) => exact_output(r),
        LimitValue::PosInfinity => RawOutput::new("infinity".to_string(), None),
        LimitValue::NegInfinity => RawOutput::new("-infinity".to_string(), None),
    })
}

fn sum(command: &Command) -> NResult<RawOutput> {
    let expr = parse_expression(&command.expression)?;
    let var = pick_variable(&expr, command.variable())?;
    let (a, b) = command
        .bounds()
        .ok_or_else(|| NativeError::Unsupported("sum needs both bounds".to_string()))?;

    let integer_bound = |text: &str| -> NResult<i128> {
        match finite_point(text, "infinite series")? {
            Value::Exact(r) if r.is_integer() => Ok(r.numer()),
            _ => Err(NativeError::Unsupported(format!("sum bound {} is not an integer", text))),
        }
    };
    let (lower, upper) = (integer_bound(a)?, integer_bound(b)?);
    if upper.saturating_sub(lower) >= MAX_SUM_TERMS {
        return Err(NativeError::Unsupported("too many terms to add directly".to_string()));
    }

    let mut total = Value::Exact(Rational::ZERO);
    let mut env = HashMap::new();
    for k in lower..=upper {
        env.insert(var.clone(), Value::Exact(Rational::integer(k)));
        total = total.add(eval(&expr, &env)?)?;
    }
    Ok(value_output(total))
}

fn taylor(command: &Command) -> NResult<RawOutput> {
    let (p, var) = polynomial(command)?;
    let center = match finite_point(command.start_point().unwrap_or("0"), "expansion point")? {
        Value::Exact(r) => r,
        Value::Approx(_) => {
            return Err(NativeError::Unsupported("irrational expansion point".to_string()))
        }
    };

    let expanded = p.shift(center)?.truncate(command.taylor_order() as usize);
    let base = if center.is_zero() {
        var
    } else if center.is_negative() {
        format!("({} + {})", var, center.neg()?)
    } else {
        format!("({} - {})", var, center)
    };
    Ok(RawOutput::new(expanded.display(&base), None))
}
