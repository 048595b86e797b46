//! Univariate polynomials and rational functions with rational coefficients

use super::expr::{eval_constant, Expr, Value};
use super::rational::Rational;
use super::{NResult, NativeError};
use crate::models::LimitDirection;

const MAX_POWER: i128 = 64;
const MAX_ROOT_SEARCH: i128 = 1_000_000_000_000;

/// Coefficients low → high, no trailing zeros. The zero polynomial is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Poly {
    coeffs: Vec<Rational>,
}

impl Poly {
    pub fn zero() -> Self {
        Self { coeffs: Vec::new() }
    }

    pub fn constant(c: Rational) -> Self {
        Self::from_coeffs(vec![c])
    }

    pub fn monomial(c: Rational, power: usize) -> Self {
        let mut coeffs = vec![Rational::ZERO; power + 1];
        coeffs[power] = c;
        Self::from_coeffs(coeffs)
    }

    pub fn from_coeffs(mut coeffs: Vec<Rational>) -> Self {
        while coeffs.last().map_or(false, Rational::is_zero) {
            coeffs.pop();
        }
        Self { coeffs }
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs.is_empty()
    }

    /// `None` for the zero polynomial.
    pub fn degree(&self) -> Option<usize> {
        self.coeffs.len().checked_sub(1)
    }

    pub fn coeff(&self, power: usize) -> Rational {
        self.coeffs.get(power).copied().unwrap_or(Rational::ZERO)
    }

    pub fn leading(&self) -> Rational {
        self.coeffs.last().copied().unwrap_or(Rational::ZERO)
    }

    pub fn as_constant(&self) -> Option<Rational> {
        match self.degree() {
            None => Some(Rational::ZERO),
            Some(0) => Some(self.coeffs[0]),
            _ => None,
        }
    }

    pub fn add(&self, other: &Poly) -> NResult<Poly> {
        let len = self.coeffs.len().max(other.coeffs.len());
        let mut coeffs = Vec::with_capacity(len);
        for k in 0..len {
            coeffs.push(self.coeff(k).add(other.coeff(k))?);
        }
        Ok(Poly::from_coeffs(coeffs))
    }

    pub fn sub(&self, other: &Poly) -> NResult<Poly> {
        self.add(&other.scale(Rational::integer(-1))?)
    }

    pub fn scale(&self, factor: Rational) -> NResult<Poly> {
        let coeffs = self
            .coeffs
            .iter()
            .map(|c| c.mul(factor))
            .collect::<NResult<Vec<_>>>()?;
        Ok(Poly::from_coeffs(coeffs))
    }

    pub fn mul(&self, other: &Poly) -> NResult<Poly> {
        if self.is_zero() || other.is_zero() {
            return Ok(Poly::zero());
        }
        let mut coeffs = vec![Rational::ZERO; self.coeffs.len() + other.coeffs.len() - 1];
        for (i, a) in self.coeffs.iter().enumerate() {
            for (j, b) in other.coeffs.iter().enumerate() {
                coeffs[i + j] = coeffs[i + j].add(a.mul(*b)?)?;
            }
        }
        Ok(Poly::from_coeffs(coeffs))
    }

    pub fn pow(&self, exp: usize) -> NResult<Poly> {
        let mut result = Poly::constant(Rational::ONE);
        for _ in 0..exp {
            result = result.mul(self)?;
        }
        Ok(result)
    }

    pub fn derivative(&self) -> NResult<Poly> {
        let coeffs = self
            .coeffs
            .iter()
            .enumerate()
            .skip(1)
            .map(|(k, c)| c.mul(Rational::integer(k as i128)))
            .collect::<NResult<Vec<_>>>()?;
        Ok(Poly::from_coeffs(coeffs))
    }

    /// Antiderivative with zero constant term.
    pub fn antiderivative(&self) -> NResult<Poly> {
        let mut coeffs = vec![Rational::ZERO];
        for (k, c) in self.coeffs.iter().enumerate() {
            coeffs.push(c.div(Rational::integer(k as i128 + 1))?);
        }
        Ok(Poly::from_coeffs(coeffs))
    }

    pub fn eval(&self, at: Rational) -> NResult<Rational> {
        let mut acc = Rational::ZERO;
        for c in self.coeffs.iter().rev() {
            acc = acc.mul(at)?.add(*c)?;
        }
        Ok(acc)
    }

    pub fn eval_value(&self, at: Value) -> NResult<Value> {
        if let Value::Exact(r) = at {
            match self.eval(r) {
                Ok(v) => return Ok(Value::Exact(v)),
                Err(NativeError::Overflow) => {}
                Err(e) => return Err(e),
            }
        }
        let x = at.to_f64();
        let value = self.coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c.to_f64());
        Ok(Value::Approx(value))
    }

    /// Synthetic division by `(x - root)`: quotient and remainder.
    pub fn div_linear(&self, root: Rational) -> NResult<(Poly, Rational)> {
        if self.is_zero() {
            return Ok((Poly::zero(), Rational::ZERO));
        }
        let n = self.coeffs.len();
        let mut quotient = vec![Rational::ZERO; n - 1];
        let mut carry = Rational::ZERO;
        for k in (0..n).rev() {
            let value = self.coeffs[k].add(carry.mul(root)?)?;
            if k == 0 {
                return Ok((Poly::from_coeffs(quotient), value));
            }
            quotient[k - 1] = value;
            carry = value;
        }
        Ok((Poly::from_coeffs(quotient), carry))
    }

    pub fn div_rem(&self, divisor: &Poly) -> NResult<(Poly, Poly)> {
        let divisor_degree = divisor.degree().ok_or(NativeError::DivisionByZero)?;
        let lead = divisor.leading();
        let mut quotient = Poly::zero();
        let mut remainder = self.clone();

        while let Some(d) = remainder.degree() {
            if d < divisor_degree {
                break;
            }
            let term = Poly::monomial(remainder.leading().div(lead)?, d - divisor_degree);
            quotient = quotient.add(&term)?;
            remainder = remainder.sub(&divisor.mul(&term)?)?;
        }
        Ok((quotient, remainder))
    }

    /// Monic greatest common divisor.
    pub fn gcd(&self, other: &Poly) -> NResult<Poly> {
        let (mut a, mut b) = (self.clone(), other.clone());
        while !b.is_zero() {
            let (_, r) = a.div_rem(&b)?;
            a = b;
            b = r;
        }
        if a.is_zero() {
            return Ok(a);
        }
        a.scale(a.leading().recip()?)
    }

    /// `P(x + shift)`: the coefficients of the Taylor expansion about `shift`.
    pub fn shift(&self, shift: Rational) -> NResult<Poly> {
        let linear = Poly::from_coeffs(vec![shift, Rational::ONE]);
        let mut result = Poly::zero();
        for c in self.coeffs.iter().rev() {
            result = result.mul(&linear)?.add(&Poly::constant(*c))?;
        }
        Ok(result)
    }

    pub fn truncate(&self, terms: usize) -> Poly {
        Poly::from_coeffs(self.coeffs.iter().take(terms).copied().collect())
    }

    /// Integer coefficients with gcd 1 and a positive leading coefficient,
    /// together with the rational content such that `self = content * primitive`.
    pub fn primitive(&self) -> NResult<(Rational, Poly)> {
        if self.is_zero() {
            return Ok((Rational::ZERO, Poly::zero()));
        }
        let mut lcm_den: i128 = 1;
        let mut gcd_num: i128 = 0;
        for c in &self.coeffs {
            let g = gcd_i128(lcm_den, c.denom());
            lcm_den = (lcm_den / g)
                .checked_mul(c.denom())
                .ok_or(NativeError::Overflow)?;
            gcd_num = gcd_i128(gcd_num, c.numer());
        }
        let mut content = Rational::new(gcd_num, lcm_den)?;
        if self.leading().is_negative() {
            content = content.neg()?;
        }
        Ok((content, self.scale(content.recip()?)?))
    }

    /// Rational roots with multiplicity (ascending) and the quotient left over.
    pub fn split_rational_roots(&self) -> NResult<(Vec<Rational>, Poly)> {
        let mut roots = Vec::new();
        let mut rest = self.clone();

        while rest.degree().map_or(false, |d| d >= 1) && rest.coeff(0).is_zero() {
            rest = rest.div_linear(Rational::ZERO)?.0;
            roots.push(Rational::ZERO);
        }

        'search: while rest.degree().map_or(false, |d| d >= 1) {
            let (_, primitive) = rest.primitive()?;
            let a0 = primitive.coeff(0).numer().checked_abs().ok_or(NativeError::Overflow)?;
            let an = primitive.leading().numer().checked_abs().ok_or(NativeError::Overflow)?;
            if a0 > MAX_ROOT_SEARCH || an > MAX_ROOT_SEARCH {
                break;
            }
            for p in divisors(a0) {
                for q in divisors(an) {
                    for sign in [1, -1] {
                        let candidate = Rational::new(sign * p, q)?;
                        if primitive.eval(candidate)?.is_zero() {
                            rest = rest.div_linear(candidate)?.0;
                            roots.push(candidate);
                            continue 'search;
                        }
                    }
                }
            }
            break;
        }

        roots.sort();
        Ok((roots, rest))
    }

    /// Readable form with `base` as the indeterminate, highest power first.
    pub fn display(&self, base: &str) -> String {
        if self.is_zero() {
            return "0".to_string();
        }
        let mut out = String::new();
        for power in (0..self.coeffs.len()).rev() {
            let c = self.coeffs[power];
            if c.is_zero() {
                continue;
            }
            let term = term_string(c.numer().unsigned_abs(), c.denom(), power, base);
            if out.is_empty() {
                if c.is_negative() {
                    out.push('-');
                }
            } else {
                out.push_str(if c.is_negative() { " - " } else { " + " });
            }
            out.push_str(&term);
        }
        out
    }

    pub fn from_expr(expr: &Expr, var: &str) -> NResult<Poly> {
        match expr {
            Expr::Num(n) => Ok(Poly::constant(*n)),
            Expr::Var(name) if name == var => Ok(Poly::monomial(Rational::ONE, 1)),
            Expr::Var(name) => Err(NativeError::Unsupported(format!(
                "free symbol {} while expanding in {}",
                name, var
            ))),
            Expr::Const(_) | Expr::Call(..) => constant_term(expr),
            Expr::Neg(inner) => Poly::from_expr(inner, var)?.scale(Rational::integer(-1)),
            Expr::Add(a, b) => Poly::from_expr(a, var)?.add(&Poly::from_expr(b, var)?),
            Expr::Sub(a, b) => Poly::from_expr(a, var)?.sub(&Poly::from_expr(b, var)?),
            Expr::Mul(a, b) => Poly::from_expr(a, var)?.mul(&Poly::from_expr(b, var)?),
            Expr::Div(a, b) => {
                let denominator = Poly::from_expr(b, var)?;
                match denominator.as_constant() {
                    Some(c) if c.is_zero() => Err(NativeError::DivisionByZero),
                    Some(c) => Poly::from_expr(a, var)?.scale(c.recip()?),
                    None => Err(NativeError::Unsupported(
                        "division by a polynomial is not a polynomial".to_string(),
                    )),
                }
            }
            Expr::Pow(base, exponent) => {
                let power = integer_exponent(exponent)?;
                if !(0..=MAX_POWER).contains(&power) {
                    return Err(NativeError::Unsupported(format!(
                        "exponent {} outside polynomial range",
                        power
                    )));
                }
                Poly::from_expr(base, var)?.pow(power as usize)
            }
        }
    }
}

fn term_string(numer: u128, denom: i128, power: usize, base: &str) -> String {
    if power == 0 {
        return Rational::new(numer as i128, denom)
            .map(|r| r.to_string())
            .unwrap_or_else(|_| format!("{}/{}", numer, denom));
    }
    let indeterminate = if power == 1 {
        base.to_string()
    } else {
        format!("{}^{}", base, power)
    };
    let mut term = if numer == 1 {
        indeterminate
    } else {
        format!("{}*{}", numer, indeterminate)
    };
    if denom != 1 {
        term = format!("{}/{}", term, denom);
    }
    term
}

fn constant_term(expr: &Expr) -> NResult<Poly> {
    if !expr.is_constant() {
        return Err(NativeError::Unsupported(
            "transcendental term is not a polynomial".to_string(),
        ));
    }
    match eval_constant(expr)? {
        Value::Exact(r) => Ok(Poly::constant(r)),
        Value::Approx(_) => Err(NativeError::Unsupported(
            "irrational coefficient".to_string(),
        )),
    }
}

fn integer_exponent(exponent: &Expr) -> NResult<i128> {
    if !exponent.is_constant() {
        return Err(NativeError::Unsupported("symbolic exponent".to_string()));
    }
    match eval_constant(exponent)? {
        Value::Exact(r) if r.is_integer() => Ok(r.numer()),
        _ => Err(NativeError::Unsupported("non-integer exponent".to_string())),
    }
}

fn gcd_i128(a: i128, b: i128) -> i128 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn divisors(n: i128) -> Vec<i128> {
    if n == 0 {
        return vec![1];
    }
    let mut small = Vec::new();
    let mut large = Vec::new();
    let mut d = 1;
    while d * d <= n {
        if n % d == 0 {
            small.push(d);
            if d != n / d {
                large.push(n / d);
            }
        }
        d += 1;
    }
    small.extend(large.into_iter().rev());
    small
}

//
// ================= Rational functions =================
//

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitValue {
    Finite(Rational),
    PosInfinity,
    NegInfinity,
}

/// `num / den`, both polynomials in the same variable.
#[derive(Debug, Clone, PartialEq)]
pub struct RationalFn {
    pub num: Poly,
    pub den: Poly,
}

impl RationalFn {
    fn poly(p: Poly) -> Self {
        Self {
            num: p,
            den: Poly::constant(Rational::ONE),
        }
    }

    pub fn from_expr(expr: &Expr, var: &str) -> NResult<RationalFn> {
        match expr {
            Expr::Num(_) | Expr::Var(_) | Expr::Const(_) | Expr::Call(..) => {
                Ok(Self::poly(Poly::from_expr(expr, var)?))
            }
            Expr::Neg(inner) => {
                let f = Self::from_expr(inner, var)?;
                Ok(Self {
                    num: f.num.scale(Rational::integer(-1))?,
                    den: f.den,
                })
            }
            Expr::Add(a, b) | Expr::Sub(a, b) => {
                let (f, g) = (Self::from_expr(a, var)?, Self::from_expr(b, var)?);
                let left = f.num.mul(&g.den)?;
                let right = g.num.mul(&f.den)?;
                let num = if matches!(expr, Expr::Add(..)) {
                    left.add(&right)?
                } else {
                    left.sub(&right)?
                };
                Ok(Self {
                    num,
                    den: f.den.mul(&g.den)?,
                })
            }
            Expr::Mul(a, b) => {
                let (f, g) = (Self::from_expr(a, var)?, Self::from_expr(b, var)?);
                Ok(Self {
                    num: f.num.mul(&g.num)?,
                    den: f.den.mul(&g.den)?,
                })
            }
            Expr::Div(a, b) => {
                let (f, g) = (Self::from_expr(a, var)?, Self::from_expr(b, var)?);
                if g.num.is_zero() {
                    return Err(NativeError::DivisionByZero);
                }
                Ok(Self {
                    num: f.num.mul(&g.den)?,
                    den: f.den.mul(&g.num)?,
                })
            }
            Expr::Pow(base, exponent) => {
                let power = integer_exponent(exponent)?;
                if power.unsigned_abs() > MAX_POWER.unsigned_abs() {
                    return Err(NativeError::Unsupported(format!(
                        "exponent {} outside rational-function range",
                        power
                    )));
                }
                let f = Self::from_expr(base, var)?;
                let n = power.unsigned_abs() as usize;
                if power >= 0 {
                    Ok(Self {
                        num: f.num.pow(n)?,
                        den: f.den.pow(n)?,
                    })
                } else {
                    if f.num.is_zero() {
                        return Err(NativeError::DivisionByZero);
                    }
                    Ok(Self {
                        num: f.den.pow(n)?,
                        den: f.num.pow(n)?,
                    })
                }
            }
        }
    }

    /// Common factors cancelled, denominator monic.
    pub fn reduced(&self) -> NResult<RationalFn> {
        let g = self.num.gcd(&self.den)?;
        let (mut num, mut den) = if g.is_zero() || g.degree() == Some(0) {
            (self.num.clone(), self.den.clone())
        } else {
            (self.num.div_rem(&g)?.0, self.den.div_rem(&g)?.0)
        };
        let lead = den.leading().recip()?;
        num = num.scale(lead)?;
        den = den.scale(lead)?;
        Ok(Self { num, den })
    }

    pub fn display(&self, var: &str) -> String {
        match self.den.as_constant() {
            Some(c) if c == Rational::ONE => self.num.display(var),
            _ => format!(
                "{}/{}",
                parenthesize(self.num.display(var)),
                parenthesize(self.den.display(var))
            ),
        }
    }

    /// Limit at a finite point, two-sided unless `side` is given.
    pub fn limit_at(&self, point: Rational, side: Option<LimitDirection>) -> NResult<LimitValue> {
        let (mut num, mut den) = (self.num.clone(), self.den.clone());
        loop {
            if num.is_zero() {
                return Ok(LimitValue::Finite(Rational::ZERO));
            }
            let d = den.eval(point)?;
            let n = num.eval(point)?;
            if !d.is_zero() {
                return Ok(LimitValue::Finite(n.div(d)?));
            }
            if n.is_zero() {
                num = num.div_linear(point)?.0;
                den = den.div_linear(point)?.0;
                continue;
            }

            // pole: the sign from the right is that of n/q(point); from the
            // left it flips for odd orders
            let mut order = 0;
            while den.eval(point)?.is_zero() {
                den = den.div_linear(point)?.0;
                order += 1;
            }
            let from_right_negative = n.div(den.eval(point)?)?.is_negative();
            let negative = match side {
                None if order % 2 == 1 => {
                    return Err(NativeError::Undefined(format!(
                        "limit does not exist at {}: one-sided limits differ",
                        point
                    )))
                }
                Some(LimitDirection::Left) if order % 2 == 1 => !from_right_negative,
                _ => from_right_negative,
            };
            return Ok(if negative {
                LimitValue::NegInfinity
            } else {
                LimitValue::PosInfinity
            });
        }
    }

    pub fn limit_at_infinity(&self, positive: bool) -> NResult<LimitValue> {
        let (Some(dn), Some(dd)) = (self.num.degree(), self.den.degree()) else {
            return Ok(LimitValue::Finite(Rational::ZERO));
        };
        let ratio = self.num.leading().div(self.den.leading())?;
        if dn < dd {
            return Ok(LimitValue::Finite(Rational::ZERO));
        }
        if dn == dd {
            return Ok(LimitValue::Finite(ratio));
        }
        let mut sign = ratio.signum();
        if !positive && (dn - dd) % 2 == 1 {
            sign = -sign;
        }
        Ok(if sign < 0 {
            LimitValue::NegInfinity
        } else {
            LimitValue::PosInfinity
        })
    }
}

fn parenthesize(text: String) -> String {
    if text.contains(' ') {
        format!("({})", text)
    } else {
        text
    }
}
