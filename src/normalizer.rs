//! Result normalizer
//!
//! Turns raw backend text into a presentation-ready answer. Every numeric
//! heuristic is a named predicate so it can be tested on its own.

use crate::models::{split_top_level, ExecutionResult, FormattedResult, Operation};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref LONG_DECIMAL: Regex = Regex::new(r"\d+\.\d{5,}").unwrap();
    static ref IMPLICIT_MUL: Regex = Regex::new(r"(\d)\*([A-Za-z(])").unwrap();
    static ref LONG_DIGIT_RUN: Regex = Regex::new(r"\d{10,}").unwrap();
    static ref MATRIX_WRAPPER: Regex = Regex::new(r"^(?:Matrix|ImmutableMatrix)\((.*)\)$").unwrap();
    static ref MAXIMA_MATRIX: Regex = Regex::new(r"^matrix\((.*)\)$").unwrap();
    static ref TOKEN_WORD: Regex = Regex::new(r"%?[A-Za-z_][A-Za-z0-9_]*").unwrap();
}

/// Backend spellings of constants mapped to one display vocabulary.
fn canonical_token(token: &str) -> Option<&'static str> {
    let mapped = match token {
        "%i" | "I" => "i",
        "%pi" => "pi",
        "%e" | "E" => "e",
        "oo" | "inf" => "infinity",
        "minf" => "-infinity",
        "zoo" => "complex infinity",
        _ => return None,
    };
    Some(mapped)
}

pub fn canonical_tokens(text: &str) -> String {
    let replaced = text.replace("**", "^");
    TOKEN_WORD
        .replace_all(&replaced, |caps: &Captures| {
            let token = &caps[0];
            canonical_token(token).map_or_else(|| token.to_string(), str::to_string)
        })
        .into_owned()
}

/// Numbers with more than four decimals are rounded to four.
pub fn round_long_decimals(text: &str) -> String {
    LONG_DECIMAL
        .replace_all(text, |caps: &Captures| {
            let literal = &caps[0];
            match literal.parse::<f64>() {
                Ok(value) => trim_zeros(format!("{:.4}", value)),
                Err(_) => literal.to_string(),
            }
        })
        .into_owned()
}

/// `2*i` → `2i`, `3*sqrt(2)` → `3sqrt(2)`.
pub fn strip_implicit_multiplication(text: &str) -> String {
    IMPLICIT_MUL.replace_all(text, "$1$2").into_owned()
}

/// Symbolic text with a run of ten or more digits and no decimal point.
pub fn is_ugly_fraction(text: &str) -> bool {
    !text.contains('.') && LONG_DIGIT_RUN.is_match(text)
}

/// Six decimals, or scientific notation for very large or very small values.
pub fn readable_decimal(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude > 1e9 || (magnitude > 0.0 && magnitude < 1e-4) {
        format!("{:.6e}", value)
    } else {
        trim_zeros(format!("{:.6}", value))
    }
}

/// Whether the decimal rendering should be shown first.
pub fn prefer_decimal(symbolic: &str, decimal: Option<&str>, operation: Operation) -> bool {
    let Some(decimal) = decimal.map(str::trim).filter(|d| !d.is_empty()) else {
        return false;
    };
    if decimal == symbolic.trim() || operation.is_symbolic() {
        return false;
    }
    if is_bracketed(symbolic.trim()) {
        return same_list_shape(symbolic, decimal);
    }
    is_plain_scalar(decimal) || is_complex_decimal(decimal)
}

fn is_bracketed(text: &str) -> bool {
    (text.starts_with('[') && text.ends_with(']')) || (text.starts_with('{') && text.ends_with('}'))
}

fn is_plain_scalar(text: &str) -> bool {
    text.parse::<f64>().map_or(false, f64::is_finite)
}

fn same_list_shape(symbolic: &str, decimal: &str) -> bool {
    let (s, d) = (symbolic.trim(), decimal.trim());
    if !is_bracketed(s) || !is_bracketed(d) || s.chars().next() != d.chars().next() {
        return false;
    }
    let count = |t: &str| split_top_level(&t[1..t.len() - 1], ',').len();
    count(s) == count(d)
}

fn is_complex_decimal(text: &str) -> bool {
    text.contains('.')
        && text
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == "i" || (word.ends_with('i') && word[..word.len() - 1].parse::<f64>().is_ok()))
}

fn trim_zeros(text: String) -> String {
    if !text.contains('.') {
        return text;
    }
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `[a,b]` → `[a, b]`; `[[a,b],[c,d]]` and matrix wrappers → `[a, b; c, d]`.
pub fn format_structure(text: &str) -> String {
    let trimmed = text.trim();

    let unwrapped = MATRIX_WRAPPER
        .captures(trimmed)
        .map(|c| c[1].to_string())
        .or_else(|| MAXIMA_MATRIX.captures(trimmed).map(|c| format!("[{}]", &c[1])));
    let body = unwrapped.as_deref().unwrap_or(trimmed);

    let Some(inner) = body.strip_prefix('[').and_then(|t| t.strip_suffix(']')) else {
        return trimmed.to_string();
    };
    let items = split_top_level(inner, ',');

    let is_matrix = !items.is_empty() && items.iter().all(|item| item.starts_with('[') && item.ends_with(']'));
    if is_matrix {
        let rows: Vec<String> = items
            .iter()
            .map(|row| split_top_level(&row[1..row.len() - 1], ',').join(", "))
            .collect();
        return format!("[{}]", rows.join("; "));
    }

    // a one-element list around a solution mapping: [{x: 1, y: 2}]
    if items.len() == 1 && items[0].starts_with('{') && items[0].ends_with('}') {
        let pairs = split_top_level(&items[0][1..items[0].len() - 1], ',');
        return format!("{{{}}}", pairs.join(", "));
    }

    format!("[{}]", items.join(", "))
}

fn display_form(text: &str) -> String {
    let cleaned = canonical_tokens(text.trim());
    let structured = format_structure(&cleaned);
    round_long_decimals(&strip_implicit_multiplication(&structured))
}

/// Presentation form of a successful engine result.
pub fn normalize(result: &ExecutionResult, operation: Operation) -> FormattedResult {
    let exact = display_form(&result.symbolic);
    let decimal = result
        .decimal_approx
        .as_deref()
        .map(display_form)
        .filter(|d| !d.is_empty());

    if is_ugly_fraction(&exact) {
        let value = result
            .decimal_approx
            .as_deref()
            .and_then(|d| d.trim().parse::<f64>().ok());
        if let Some(value) = value {
            return FormattedResult {
                primary: readable_decimal(value),
                exact,
                decimal,
            };
        }
    }

    let primary = match &decimal {
        Some(d) if prefer_decimal(&exact, Some(d.as_str()), operation) => d.clone(),
        _ => exact.clone(),
    };
    FormattedResult {
        primary,
        exact,
        decimal,
    }
}

/// Presentation form of a free-text answer (generative fallback). Only
/// numbers are touched; the prose is left alone.
pub fn normalize_text(answer: &str) -> FormattedResult {
    let exact = round_long_decimals(answer.trim());
    FormattedResult {
        primary: exact.clone(),
        exact,
        decimal: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn result(symbolic: &str, decimal: Option<&str>) -> ExecutionResult {
        ExecutionResult::solved("test", symbolic.to_string(), decimal.map(str::to_string))
    }

    #[test]
    fn test_definite_integral_prefers_decimal() {
        let formatted = normalize(&result("125/3", Some("41.6666666666667")), Operation::Integrate);
        assert_eq!(formatted.primary, "41.6667");
        assert_eq!(formatted.exact, "125/3");
    }

    #[test]
    fn test_symbolic_operations_keep_exact() {
        let formatted = normalize(&result("3*x**2", Some("3.0*x**2")), Operation::Differentiate);
        assert_eq!(formatted.primary, "3x^2");
    }

    #[test]
    fn test_matrix_display() {
        assert_eq!(format_structure("Matrix([[-2, 1], [3/2, -1/2]])"), "[-2, 1; 3/2, -1/2]");
        assert_eq!(format_structure("matrix([1,2],[3,4])"), "[1, 2; 3, 4]");
        assert_eq!(format_structure("[[1,2],[3,4]]"), "[1, 2; 3, 4]");
        assert_eq!(format_structure("[-2,2]"), "[-2, 2]");
        assert_eq!(format_structure("[{x: 2, y: 1}]"), "{x: 2, y: 1}");
    }

    #[test]
    fn test_canonical_tokens_and_implicit_multiplication() {
        assert_eq!(display_form("2*%i + %pi"), "2i + pi");
        assert_eq!(display_form("1 + 2*I"), "1 + 2i");
        assert_eq!(display_form("oo"), "infinity");
        assert_eq!(display_form("x**2"), "x^2");
    }

    #[test]
    fn test_ugly_fraction_uses_readable_decimal() {
        let formatted = normalize(
            &result("12345678901/100000", Some("123456.78901")),
            Operation::Evaluate,
        );
        assert_eq!(formatted.primary, "123456.78901");

        assert!(is_ugly_fraction("3617929876/125"));
        assert!(!is_ugly_fraction("125/3"));
        assert!(!is_ugly_fraction("1234567890.5"));
    }

    #[test]
    fn test_readable_decimal_scientific() {
        assert_eq!(readable_decimal(0.5), "0.5");
        assert_eq!(readable_decimal(2.0e10), "2.000000e10");
        assert_eq!(readable_decimal(1.5e-6), "1.500000e-6");
    }

    #[test]
    fn test_prefer_decimal_shapes() {
        assert!(prefer_decimal("[-sqrt(2), sqrt(2)]", Some("[-1.4142, 1.4142]"), Operation::Solve));
        assert!(!prefer_decimal("[-sqrt(2), sqrt(2)]", Some("-1.4142"), Operation::Solve));
        assert!(prefer_decimal("(-1 - sqrt(3)i)/2", Some("-0.5 - 0.866i"), Operation::Solve));
        assert!(!prefer_decimal("-2", Some("-2"), Operation::Determinant));
        assert!(!prefer_decimal("-2", None, Operation::Determinant));
    }

    #[test]
    fn test_fallback_text() {
        let formatted = normalize_text("  The answer is 3.14159265 ");
        assert_eq!(formatted.primary, "The answer is 3.1416");
        assert!(formatted.decimal.is_none());
    }

    proptest! {
        #[test]
        fn prop_rounded_numbers_have_at_most_four_decimals(value in -1.0e6f64..1.0e6f64) {
            let text = format!("{:.9}", value);
            let rounded = round_long_decimals(&text);
            let decimals = rounded.split('.').nth(1).map_or(0, str::len);
            prop_assert!(decimals <= 4);
            let back: f64 = rounded.parse().unwrap();
            prop_assert!((back - value).abs() <= 5.1e-5);
        }

        #[test]
        fn prop_text_with_decimal_point_is_never_ugly(digits in "[0-9]{10,20}") {
            let with_point = format!("{}.5", digits);
            prop_assert!(!is_ugly_fraction(&with_point));
            prop_assert!(is_ugly_fraction(&digits));
        }

        #[test]
        fn prop_readable_decimal_round_trips(value in -1.0e12f64..1.0e12f64) {
            let text = readable_decimal(value);
            let back: f64 = text.parse().unwrap();
            let tolerance = if value.abs() > 1e9 { value.abs() * 1e-6 } else { 1e-6 };
            prop_assert!((back - value).abs() <= tolerance);
        }
    }
}
