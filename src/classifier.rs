//! Operation Classifier
//!
//! Picks the operation a natural-language math query is asking for, by
//! keyword scoring:
//! - "integrate x^2 from 0 to 5" → integrate
//! - "derivative of sin(x)" → differentiate
//! - "x^2 - 4 = 0" → solve (no keyword, but an equation)

use crate::models::Operation;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Keyword patterns in tie-break order: earlier entries win equal scores.
    static ref KEYWORDS: Vec<(Operation, Regex)> = vec![
        (Operation::Taylor, Regex::new(r"(?i)\b(taylor|maclaurin|power series|series expansion)\b").unwrap()),
        (Operation::Determinant, Regex::new(r"(?i)\b(determinant|det)\b").unwrap()),
        (Operation::Invert, Regex::new(r"(?i)\b(inverse|invert|inv)\b").unwrap()),
        (Operation::Limit, Regex::new(r"(?i)\b(limit|lim|approaches|tends to)\b").unwrap()),
        (Operation::Sum, Regex::new(r"(?i)\b(sum|summation|sigma)\b").unwrap()),
        (Operation::Integrate, Regex::new(r"(?i)\b(integrate|integral|antiderivative|area under)\b").unwrap()),
        (Operation::Differentiate, Regex::new(r"(?i)\b(differentiate|derivative|d/d[a-z])\b").unwrap()),
        (Operation::Factor, Regex::new(r"(?i)\b(factor|factorise|factorize|factorization)\b").unwrap()),
        (Operation::Solve, Regex::new(r"(?i)\b(solve|roots|zeros|zeroes)\b").unwrap()),
        (Operation::Simplify, Regex::new(r"(?i)\b(simplify|expand|reduce)\b").unwrap()),
        (Operation::Evaluate, Regex::new(r"(?i)\b(evaluate|calculate|compute|value)\b").unwrap()),
    ];
}

/// Operation classifier
pub struct OperationClassifier;

impl OperationClassifier {
    /// Best-scoring operation for `query`.
    pub fn classify(query: &str) -> Operation {
        let mut best: Option<(Operation, usize)> = None;

        for (operation, pattern) in KEYWORDS.iter() {
            let score = pattern.find_iter(query).count();
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((*operation, score));
            }
        }

        match best {
            Some((operation, _)) => operation,
            None if contains_equation(query) => Operation::Solve,
            None => Operation::Evaluate,
        }
    }
}

/// A single `=` (not `==`, `<=`, `>=`, `!=`).
fn contains_equation(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        b == b'='
            && !matches!(bytes.get(i + 1), Some(b'='))
            && !matches!(i.checked_sub(1).and_then(|j| bytes.get(j)), Some(b'=' | b'<' | b'>' | b'!'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_queries() {
        let cases = vec![
            ("integrate x^2 from 0 to 5", Operation::Integrate),
            ("what is the antiderivative of cos(x)", Operation::Integrate),
            ("derivative of sin(x)*x^2", Operation::Differentiate),
            ("d/dx x^3", Operation::Differentiate),
            ("factor x^2 - 4", Operation::Factor),
            ("limit of sin(x)/x as x approaches 0", Operation::Limit),
            ("sum of k^2 for k = 1 to 10", Operation::Sum),
            ("determinant of [[1,2],[3,4]]", Operation::Determinant),
            ("inverse of [[1,2],[3,4]]", Operation::Invert),
            ("taylor series of exp(x) around 0", Operation::Taylor),
            ("simplify (x^2 - 1)/(x - 1)", Operation::Simplify),
            ("solve x^2 - 4 = 0", Operation::Solve),
        ];

        for (query, expected) in cases {
            assert_eq!(OperationClassifier::classify(query), expected, "{}", query);
        }
    }

    #[test]
    fn test_no_keyword() {
        assert_eq!(OperationClassifier::classify("x^2 - 4 = 0"), Operation::Solve);
        assert_eq!(OperationClassifier::classify("2 + 3*4"), Operation::Evaluate);
        assert_eq!(OperationClassifier::classify("x == 2"), Operation::Evaluate);
    }

    #[test]
    fn test_whole_words_only() {
        // "summer" and "indefinite" are not keywords
        assert_eq!(OperationClassifier::classify("summer 2 + 2"), Operation::Evaluate);
        assert_eq!(OperationClassifier::classify("indefinite integral of x"), Operation::Integrate);
    }
}
