//! Core data models for the resolution pipeline

use crate::error::ResolutionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_VARIABLE: &str = "x";
pub const DEFAULT_TAYLOR_ORDER: u32 = 6;
const MAX_TAYLOR_ORDER: u32 = 50;

//
// ================= Operation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Integrate,
    Differentiate,
    Solve,
    Simplify,
    Factor,
    Limit,
    Sum,
    Evaluate,
    Determinant,
    Invert,
    Taylor,
}

impl Operation {
    pub const ALL: [Operation; 11] = [
        Operation::Integrate,
        Operation::Differentiate,
        Operation::Solve,
        Operation::Simplify,
        Operation::Factor,
        Operation::Limit,
        Operation::Sum,
        Operation::Evaluate,
        Operation::Determinant,
        Operation::Invert,
        Operation::Taylor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Integrate => "integrate",
            Operation::Differentiate => "differentiate",
            Operation::Solve => "solve",
            Operation::Simplify => "simplify",
            Operation::Factor => "factor",
            Operation::Limit => "limit",
            Operation::Sum => "sum",
            Operation::Evaluate => "evaluate",
            Operation::Determinant => "determinant",
            Operation::Invert => "invert",
            Operation::Taylor => "taylor",
        }
    }

    /// Operations whose answer is an expression rather than a number.
    pub fn is_symbolic(&self) -> bool {
        matches!(
            self,
            Operation::Differentiate
                | Operation::Simplify
                | Operation::Factor
                | Operation::Taylor
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ResolutionError;

    /// Accepts the canonical names plus the aliases translators commonly emit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_lowercase().as_str() {
            "integrate" | "integral" | "integration" | "antiderivative" => Operation::Integrate,
            "differentiate" | "derivative" | "diff" | "d" => Operation::Differentiate,
            "solve" | "roots" => Operation::Solve,
            "simplify" | "expand" => Operation::Simplify,
            "factor" | "factorize" | "factorise" => Operation::Factor,
            "limit" | "lim" => Operation::Limit,
            "sum" | "summation" => Operation::Sum,
            "evaluate" | "evalf" | "compute" | "calculate" => Operation::Evaluate,
            "determinant" | "det" => Operation::Determinant,
            "invert" | "inverse" | "inv" => Operation::Invert,
            "taylor" | "series" => Operation::Taylor,
            other => return Err(ResolutionError::UnsupportedOperation(other.to_string())),
        };
        Ok(op)
    }
}

//
// ================= Limit direction =================
//

/// Side a one-sided limit approaches from. Absent means two-sided.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LimitDirection {
    #[serde(rename = "+", alias = "right", alias = "plus")]
    Right,
    #[serde(rename = "-", alias = "left", alias = "minus")]
    Left,
}

impl LimitDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitDirection::Right => "+",
            LimitDirection::Left => "-",
        }
    }

    /// Lenient reading of translator output. Two-sided spellings give `None`.
    pub fn parse_optional(text: &str) -> Result<Option<Self>, ResolutionError> {
        let normalized = text.trim().to_lowercase();
        match normalized.as_str() {
            "" | "+-" | "-+" | "both" | "two-sided" | "twosided" => Ok(None),
            "+" | "right" | "plus" | "above" | "from the right" | "from above" => {
                Ok(Some(LimitDirection::Right))
            }
            "-" | "left" | "minus" | "below" | "from the left" | "from below" => {
                Ok(Some(LimitDirection::Left))
            }
            other => Err(ResolutionError::InvalidCommand(format!(
                "unknown limit direction '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for LimitDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Command =================
//

fn default_variable() -> String {
    DEFAULT_VARIABLE.to_string()
}

/// Structured description of what to compute.
///
/// Commands are values: a refinement round produces a new `Command`, it never
/// edits the previous one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub operation: Operation,
    pub expression: String,
    #[serde(default = "default_variable")]
    pub variable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<LimitDirection>,
}

impl Command {
    pub fn new(operation: Operation, expression: impl Into<String>) -> Self {
        Self {
            operation,
            expression: expression.into(),
            variable: default_variable(),
            start: None,
            end: None,
            preferred_engine: None,
            order: None,
            direction: None,
        }
    }

    /// The command used when translation is unavailable: evaluate the raw query.
    pub fn evaluate_verbatim(query: &str) -> Self {
        Self::new(Operation::Evaluate, query)
    }

    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = variable.into();
        self
    }

    pub fn with_bounds(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
    }

    pub fn with_start(mut self, start: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn with_preferred_engine(mut self, engine: impl Into<String>) -> Self {
        self.preferred_engine = Some(engine.into());
        self
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_direction(mut self, direction: LimitDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Both bounds present and non-blank.
    pub fn bounds(&self) -> Option<(&str, &str)> {
        match (non_blank(&self.start), non_blank(&self.end)) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    }

    pub fn start_point(&self) -> Option<&str> {
        non_blank(&self.start)
    }

    pub fn variable(&self) -> &str {
        let v = self.variable.trim();
        if v.is_empty() {
            DEFAULT_VARIABLE
        } else {
            v
        }
    }

    /// One-sided direction, meaningful only for limits.
    pub fn limit_direction(&self) -> Option<LimitDirection> {
        match self.operation {
            Operation::Limit => self.direction,
            _ => None,
        }
    }

    pub fn taylor_order(&self) -> u32 {
        self.order
            .unwrap_or(DEFAULT_TAYLOR_ORDER)
            .clamp(1, MAX_TAYLOR_ORDER)
    }

    /// Comma-separated top-level parts of the expression (brackets respected).
    pub fn expression_parts(&self) -> Vec<String> {
        split_top_level(&self.expression, ',')
    }

    /// Canonical structural equality used to detect a translator that is not
    /// making progress: whitespace in the expression, blank optionals and a
    /// blank variable do not count as differences.
    pub fn same_request(&self, other: &Command) -> bool {
        self.canonical() == other.canonical()
    }

    fn canonical(&self) -> CanonicalCommand {
        CanonicalCommand {
            operation: self.operation,
            expression: self.expression.split_whitespace().collect(),
            variable: self.variable().to_string(),
            start: non_blank(&self.start).map(|s| s.split_whitespace().collect()),
            end: non_blank(&self.end).map(|s| s.split_whitespace().collect()),
            preferred_engine: non_blank(&self.preferred_engine).map(|s| s.to_lowercase()),
            order: match self.operation {
                Operation::Taylor => Some(self.taylor_order()),
                _ => None,
            },
            direction: self.limit_direction(),
        }
    }
}

#[derive(PartialEq, Eq)]
struct CanonicalCommand {
    operation: Operation,
    expression: String,
    variable: String,
    start: Option<String>,
    end: Option<String>,
    preferred_engine: Option<String>,
    order: Option<u32>,
    direction: Option<LimitDirection>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Split on `sep` at bracket depth zero.
pub fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();

    for ch in text.chars() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
        if ch == sep && depth == 0 {
            parts.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(ch);
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {}", self.operation, self.expression, self.variable())?;
        if let Some(start) = self.start_point() {
            write!(f, ", {}", start)?;
        }
        if let Some(end) = non_blank(&self.end) {
            write!(f, ", {}", end)?;
        }
        if let Some(direction) = self.limit_direction() {
            write!(f, ", dir={}", direction)?;
        }
        write!(f, ")")
    }
}

//
// ================= Execution =================
//

/// Uniform outcome of one engine adapter run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    /// Symbolic form as produced by the backend.
    #[serde(rename = "latex")]
    pub symbolic: String,
    pub decimal_approx: Option<String>,
    pub engine_used: String,
    pub error: Option<String>,
    pub raw_output: Option<String>,
}

impl ExecutionResult {
    pub fn solved(engine: &str, symbolic: String, decimal_approx: Option<String>) -> Self {
        Self {
            success: true,
            raw_output: Some(symbolic.clone()),
            symbolic,
            decimal_approx,
            engine_used: engine.to_string(),
            error: None,
        }
    }

    pub fn failed(engine: &str, error: &ResolutionError, raw_output: Option<String>) -> Self {
        Self {
            success: false,
            symbolic: String::new(),
            decimal_approx: None,
            engine_used: engine.to_string(),
            error: Some(error.to_string()),
            raw_output,
        }
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }
}

//
// ================= Validation =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationVerdict {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }
}

//
// ================= Final Result =================
//

/// Presentation-ready answer produced by the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormattedResult {
    /// What should be shown first.
    pub primary: String,
    /// Exact/symbolic form after display cleanup.
    pub exact: String,
    pub decimal: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnswerSource {
    Engine { engine: String },
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub resolution_id: Uuid,
    pub query: String,
    pub answer: FormattedResult,
    pub source: AnswerSource,
    /// The command that produced the answer (absent for fallback answers).
    pub command: Option<Command>,
    pub refinements: u32,
    pub translator_calls: u32,
    pub reasoning_trace: Vec<String>,
    pub execution_time_ms: u64,
    pub resolved_at: DateTime<Utc>,
}
