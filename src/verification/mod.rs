//! Result validation
//!
//! A validator judges whether a normalized candidate actually answers the
//! query. The orchestrator applies the availability policy: a validator that
//! errors or times out counts as a pass.

use crate::engines::{echo_marker, failure_keyword};
use crate::models::{FormattedResult, Operation, ValidationVerdict};
use crate::Result;
use async_trait::async_trait;
use tracing::info;

pub mod gemini;
pub use gemini::GeminiValidator;

/// Trait for result judges (LLM or rules)
#[async_trait]
pub trait ResultValidator: Send + Sync {
    async fn validate(&self, query: &str, candidate: &FormattedResult) -> Result<ValidationVerdict>;
}

/// Trait for a single deterministic check
pub trait VerificationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn verify(&self, query: &str, candidate: &FormattedResult) -> VerificationCheckResult;
}

pub struct VerificationCheckResult {
    pub passed: bool,
    pub details: String,
}

impl VerificationCheckResult {
    fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

/// Validator that enforces every registered rule
pub struct RuleValidator {
    rules: Vec<Box<dyn VerificationRule>>,
}

impl RuleValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn VerificationRule>) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Runs all rules synchronously; every rule must pass.
    pub fn check(&self, query: &str, candidate: &FormattedResult) -> ValidationVerdict {
        let issues: Vec<String> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let result = rule.verify(query, candidate);
                (!result.passed).then(|| format!("{}: {}", rule.name(), result.details))
            })
            .collect();

        info!(
            rule_count = self.rules.len(),
            verified = issues.is_empty(),
            "Verification completed"
        );

        if issues.is_empty() {
            ValidationVerdict::valid()
        } else {
            ValidationVerdict::rejected(issues.join("; "))
        }
    }
}

impl Default for RuleValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultValidator for RuleValidator {
    async fn validate(&self, query: &str, candidate: &FormattedResult) -> Result<ValidationVerdict> {
        Ok(self.check(query, candidate))
    }
}

//
// ========== Rules ==========
//

/// Rule: the answer must contain something
pub struct NonEmptyAnswerRule;

impl VerificationRule for NonEmptyAnswerRule {
    fn name(&self) -> &'static str {
        "non_empty_answer"
    }

    fn verify(&self, _query: &str, candidate: &FormattedResult) -> VerificationCheckResult {
        if candidate.primary.trim().is_empty() {
            VerificationCheckResult::fail("answer is empty")
        } else {
            VerificationCheckResult::pass("answer present")
        }
    }
}

/// Rule: no unevaluated call wrapper or failure keyword in the exact form
pub struct NoUnresolvedMarkersRule;

impl VerificationRule for NoUnresolvedMarkersRule {
    fn name(&self) -> &'static str {
        "no_unresolved_markers"
    }

    fn verify(&self, _query: &str, candidate: &FormattedResult) -> VerificationCheckResult {
        let text = &candidate.exact;

        if let Some(marker) = Operation::ALL.iter().find_map(|op| echo_marker(*op, text)) {
            return VerificationCheckResult::fail(format!("contains unevaluated {}", marker));
        }
        match failure_keyword(text) {
            Some(word) => VerificationCheckResult::fail(format!("contains '{}'", word)),
            None => VerificationCheckResult::pass("fully evaluated"),
        }
    }
}

/// Rule: a numeric decimal must be finite, unless the exact answer is itself infinite
pub struct FiniteDecimalRule;

impl VerificationRule for FiniteDecimalRule {
    fn name(&self) -> &'static str {
        "finite_decimal"
    }

    fn verify(&self, _query: &str, candidate: &FormattedResult) -> VerificationCheckResult {
        let Some(value) = candidate
            .decimal
            .as_deref()
            .and_then(|d| d.trim().parse::<f64>().ok())
        else {
            return VerificationCheckResult::pass("no scalar decimal");
        };

        if value.is_finite() || (value.is_infinite() && candidate.exact.contains("infinity")) {
            VerificationCheckResult::pass(format!("decimal {}", value))
        } else {
            VerificationCheckResult::fail(format!("decimal {} is not finite", value))
        }
    }
}

/// Create a default validator with the standard rules
pub fn create_default_validator() -> RuleValidator {
    let mut validator = RuleValidator::new();
    validator.add_rule(Box::new(NonEmptyAnswerRule));
    validator.add_rule(Box::new(NoUnresolvedMarkersRule));
    validator.add_rule(Box::new(FiniteDecimalRule));
    validator
}

//
// ================= Tests =================
//
