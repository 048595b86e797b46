//! Exact rationals over `i128`. Every operation is checked; overflow is
//! reported rather than wrapped so callers can drop to floating point.

use super::{NResult, NativeError};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i128,
    den: i128,
}

fn gcd(a: i128, b: i128) -> i128 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    // a == 2^127 only for gcd(MIN, 0) / gcd(MIN, MIN)
    i128::try_from(a).unwrap_or(1)
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, den: 1 };
    pub const ONE: Rational = Rational { num: 1, den: 1 };

    pub fn new(num: i128, den: i128) -> NResult<Self> {
        if den == 0 {
            return Err(NativeError::DivisionByZero);
        }
        let g = gcd(num, den).max(1);
        let (mut n, mut d) = (num / g, den / g);
        if d < 0 {
            n = n.checked_neg().ok_or(NativeError::Overflow)?;
            d = d.checked_neg().ok_or(NativeError::Overflow)?;
        }
        Ok(Self { num: n, den: d })
    }

    pub fn integer(n: i128) -> Self {
        Self { num: n, den: 1 }
    }

    /// Parses `12`, `0.25`, `3.` and `1.5e-3` exactly.
    pub fn from_decimal(text: &str) -> NResult<Self> {
        let lower = text.to_lowercase();
        let (mantissa, exponent) = match lower.split_once('e') {
            Some((m, e)) => (
                m.to_string(),
                e.parse::<i32>()
                    .map_err(|_| NativeError::Parse(format!("bad exponent in {}", text)))?,
            ),
            None => (lower.clone(), 0),
        };

        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((i, f)) => (i.to_string(), f.to_string()),
            None => (mantissa.clone(), String::new()),
        };
        let digits = format!("{}{}", int_part, frac_part);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(NativeError::Parse(format!("bad number {}", text)));
        }

        let num: i128 = digits.parse().map_err(|_| NativeError::Overflow)?;
        let scale = i64::from(exponent) - frac_part.len() as i64;
        let ten = Rational::integer(10);
        Rational::integer(num).mul(ten.pow(scale)?)
    }

    pub fn numer(&self) -> i128 {
        self.num
    }

    pub fn denom(&self) -> i128 {
        self.den
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    pub fn is_integer(&self) -> bool {
        self.den == 1
    }

    pub fn is_negative(&self) -> bool {
        self.num < 0
    }

    pub fn neg(self) -> NResult<Self> {
        Ok(Self {
            num: self.num.checked_neg().ok_or(NativeError::Overflow)?,
            den: self.den,
        })
    }

    pub fn abs(self) -> NResult<Self> {
        if self.is_negative() {
            self.neg()
        } else {
            Ok(self)
        }
    }

    pub fn add(self, other: Self) -> NResult<Self> {
        let g = gcd(self.den, other.den);
        let lcm = (self.den / g)
            .checked_mul(other.den)
            .ok_or(NativeError::Overflow)?;
        let left = self
            .num
            .checked_mul(lcm / self.den)
            .ok_or(NativeError::Overflow)?;
        let right = other
            .num
            .checked_mul(lcm / other.den)
            .ok_or(NativeError::Overflow)?;
        Rational::new(left.checked_add(right).ok_or(NativeError::Overflow)?, lcm)
    }

    pub fn sub(self, other: Self) -> NResult<Self> {
        self.add(other.neg()?)
    }

    pub fn mul(self, other: Self) -> NResult<Self> {
        let g1 = gcd(self.num, other.den).max(1);
        let g2 = gcd(other.num, self.den).max(1);
        let num = (self.num / g1)
            .checked_mul(other.num / g2)
            .ok_or(NativeError::Overflow)?;
        let den = (self.den / g2)
            .checked_mul(other.den / g1)
            .ok_or(NativeError::Overflow)?;
        Rational::new(num, den)
    }

    pub fn recip(self) -> NResult<Self> {
        if self.is_zero() {
            return Err(NativeError::DivisionByZero);
        }
        Rational::new(self.den, self.num)
    }

    pub fn div(self, other: Self) -> NResult<Self> {
        self.mul(other.recip()?)
    }

    pub fn pow(self, exp: i64) -> NResult<Self> {
        if exp < 0 {
            return self.recip()?.pow(exp.checked_neg().ok_or(NativeError::Overflow)?);
        }
        if exp > 512 {
            return Err(NativeError::Overflow);
        }
        let mut base = self;
        let mut result = Rational::ONE;
        let mut e = exp;
        while e > 0 {
            if e & 1 == 1 {
                result = result.mul(base)?;
            }
            e >>= 1;
            if e > 0 {
                base = base.mul(base)?;
            }
        }
        Ok(result)
    }

    /// Square root when it is itself rational.
    pub fn sqrt_exact(self) -> Option<Self> {
        if self.is_negative() {
            return None;
        }
        let n = isqrt(self.num)?;
        let d = isqrt(self.den)?;
        Rational::new(n, d).ok()
    }

    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    pub fn signum(&self) -> i32 {
        self.num.signum() as i32
    }
}

/// Exact integer square root, `None` when `n` is not a perfect square.
fn isqrt(n: i128) -> Option<i128> {
    if n < 0 {
        return None;
    }
    let mut r = (n as f64).sqrt() as i128;
    while r > 0 && r.checked_mul(r).map_or(true, |sq| sq > n) {
        r -= 1;
    }
    while (r + 1).checked_mul(r + 1).map_or(false, |sq| sq <= n) {
        r += 1;
    }
    (r * r == n).then_some(r)
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        match (
            self.num.checked_mul(other.den),
            other.num.checked_mul(self.den),
        ) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self
                .to_f64()
                .partial_cmp(&other.to_f64())
                .unwrap_or(Ordering::Equal),
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: i128, d: i128) -> Rational {
        Rational::new(n, d).unwrap()
    }

    #[test]
    fn test_reduction_and_sign() {
        assert_eq!(r(4, -6), r(-2, 3));
        assert_eq!(r(-2, 3).to_string(), "-2/3");
        assert_eq!(r(10, 5).to_string(), "2");
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(r(1, 3).add(r(1, 6)).unwrap(), r(1, 2));
        assert_eq!(r(2, 3).mul(r(9, 4)).unwrap(), r(3, 2));
        assert_eq!(r(1, 2).div(r(1, 4)).unwrap(), Rational::integer(2));
        assert_eq!(r(2, 3).pow(-2).unwrap(), r(9, 4));
        assert!(matches!(r(1, 2).div(Rational::ZERO), Err(NativeError::DivisionByZero)));
    }

    #[test]
    fn test_decimal_parsing() {
        assert_eq!(Rational::from_decimal("0.25").unwrap(), r(1, 4));
        assert_eq!(Rational::from_decimal("1.5e-3").unwrap(), r(3, 2000));
        assert_eq!(Rational::from_decimal("12").unwrap(), Rational::integer(12));
    }

    #[test]
    fn test_overflow_is_reported() {
        let big = Rational::integer(i128::MAX);
        assert!(matches!(big.add(Rational::ONE), Err(NativeError::Overflow)));
    }

    #[test]
    fn test_sqrt_exact() {
        assert_eq!(r(9, 4).sqrt_exact(), Some(r(3, 2)));
        assert_eq!(Rational::integer(2).sqrt_exact(), None);
    }
}
