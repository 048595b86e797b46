//! Engine adapter trait and registry
//!
//! Every backend turns a [`Command`] into its own syntax, runs it and reports
//! a uniform [`ExecutionResult`]. Adapters never return errors: a failure of
//! any kind is folded into `success: false`.

pub mod maxima;
pub mod native;
pub mod process;
pub mod sympy;

use crate::config::ResolverConfig;
use crate::error::ResolutionError;
use crate::models::{Command, ExecutionResult, Operation};
use crate::Result;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::sync::Arc;
use tracing::debug;

pub use maxima::MaximaEngine;
pub use native::NativeEngine;
pub use sympy::SympyEngine;

/// Trait for a single computation backend
#[async_trait::async_trait]
pub trait EngineAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, _operation: Operation) -> bool {
        true
    }

    async fn run(&self, command: &Command) -> ExecutionResult;
}

/// What a backend printed, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    pub symbolic: String,
    pub decimal: Option<String>,
    pub transcript: String,
}

impl RawOutput {
    pub fn new(symbolic: String, decimal: Option<String>) -> Self {
        Self {
            transcript: symbolic.clone(),
            symbolic,
            decimal,
        }
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = transcript.into();
        self
    }
}

//
// ================= Output classification =================
//

/// Substrings that mean the backend handed the request back unevaluated.
pub fn unsolved_markers(operation: Operation) -> &'static [&'static str] {
    match operation {
        Operation::Integrate => &["integrate(", "defint(", "Integral("],
        Operation::Differentiate => &["diff(", "Derivative("],
        Operation::Solve => &["solve(", "ConditionSet(", "roots("],
        Operation::Simplify => &["simplify(", "ratsimp("],
        Operation::Factor => &["factor("],
        Operation::Limit => &["limit(", "Limit("],
        Operation::Sum => &["sum(", "Sum(", "summation("],
        Operation::Evaluate => &["evaluate(", "ev("],
        Operation::Determinant => &["determinant(", "det("],
        Operation::Invert => &["invert(", "inv(", "inverse("],
        Operation::Taylor => &["taylor(", "series("],
    }
}

lazy_static! {
    static ref FAILURE_KEYWORDS: Regex = Regex::new(
        r"(?i)\b(division by zero|cannot solve|nil|undefined|zoo|nan|error|traceback|und|ind)\b"
    )
    .unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap();
    static ref MATH_ALPHABET: Regex = Regex::new(r"^[A-Za-z0-9_\s+\-*/^()\[\],.=!%]*$").unwrap();
    static ref ATTRIBUTE_ACCESS: Regex = Regex::new(r"\.\s*[A-Za-z_]").unwrap();
    static ref PLAIN_VARIABLE: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap();
}

/// Names that reach the host, the filesystem or an evaluator in Python or
/// Maxima. Matched case-insensitively.
const BLOCKED_IDENTIFIERS: &[&str] = &[
    "system", "eval", "exec", "import", "lambda", "open", "compile", "getattr",
    "setattr", "delattr", "globals", "locals", "vars", "sympify", "lambdify",
    "parse_expr", "load", "batch", "batchload", "loadfile", "sconcat", "concat",
    "string", "eval_string", "parse_string", "writefile", "with_stdout",
    "stringout", "save", "lisp", "to_lisp", "run_testsuite", "kill", "quit",
];

//
// ================= Script input screening =================
//

/// Refuses command text that would be code rather than mathematics once it
/// is pasted into a backend script. Runs before any script is rendered.
pub fn screen_script_input(command: &Command) -> Result<()> {
    let variable = command.variable();
    if !PLAIN_VARIABLE.is_match(variable) {
        return Err(ResolutionError::InvalidCommand(format!(
            "variable '{}' is not a plain identifier",
            variable
        )));
    }

    let fields = [
        ("expression", Some(command.expression.as_str())),
        ("variable", Some(variable)),
        ("start", command.start.as_deref()),
        ("end", command.end.as_deref()),
    ];
    for (field, text) in fields {
        if let Some(reason) = text.and_then(unsafe_reason) {
            return Err(ResolutionError::InvalidCommand(format!(
                "{} rejected: {}",
                field, reason
            )));
        }
    }
    Ok(())
}

fn unsafe_reason(text: &str) -> Option<String> {
    if !MATH_ALPHABET.is_match(text) {
        return Some("characters outside the math alphabet".to_string());
    }
    if text.contains("__") {
        return Some("dunder names are not allowed".to_string());
    }
    if ATTRIBUTE_ACCESS.is_match(text) {
        return Some("attribute access is not allowed".to_string());
    }
    IDENTIFIER
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .find(|ident| BLOCKED_IDENTIFIERS.contains(&ident.as_str()))
        .map(|ident| format!("'{}' is not a math function", ident))
}

pub fn echo_marker(operation: Operation, output: &str) -> Option<&'static str> {
    unsolved_markers(operation)
        .iter()
        .copied()
        .find(|marker| output.contains(marker))
}

pub fn failure_keyword(output: &str) -> Option<String> {
    FAILURE_KEYWORDS
        .find(output)
        .map(|m| m.as_str().to_lowercase())
}

/// Turns what a backend printed into an [`ExecutionResult`], applying echo
/// and failure-keyword detection.
pub fn classify_output(engine: &str, operation: Operation, raw: RawOutput) -> ExecutionResult {
    let symbolic = raw.symbolic.trim();

    let failure = if symbolic.is_empty() {
        Some(ResolutionError::ExecutionException(
            "engine produced no result".to_string(),
        ))
    } else if let Some(marker) = echo_marker(operation, symbolic) {
        Some(ResolutionError::EchoedUnsolved(format!(
            "output still contains {}",
            marker
        )))
    } else {
        failure_keyword(symbolic).map(|word| {
            ResolutionError::ExecutionException(format!("output reports '{}'", word))
        })
    };

    if let Some(err) = failure {
        debug!(engine = %engine, operation = %operation, error = %err, "Engine output rejected");
        return ExecutionResult::failed(engine, &err, Some(raw.transcript));
    }

    let decimal = raw
        .decimal
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty() && failure_keyword(d).is_none() && d.as_str() != symbolic);

    ExecutionResult::solved(engine, symbolic.to_string(), decimal).with_raw_output(raw.transcript)
}

/// Replaces whole identifiers found in `map`, leaving everything else as is.
/// The exponent marker of a numeric literal (`1e5`, `2.5e-3`) is not an
/// identifier.
pub fn rewrite_tokens(text: &str, map: &[(&str, &str)]) -> String {
    IDENTIFIER
        .replace_all(text, |caps: &Captures| {
            let ident = &caps[0];
            let start = caps.get(0).map_or(0, |m| m.start());
            let after_digit = text[..start]
                .chars()
                .next_back()
                .map_or(false, |c| c.is_ascii_digit() || c == '.');
            if after_digit && is_exponent_marker(ident, &text[start + ident.len()..]) {
                return ident.to_string();
            }
            map.iter()
                .find(|(from, _)| from.eq_ignore_ascii_case(ident))
                .map(|(_, to)| to.to_string())
                .unwrap_or_else(|| ident.to_string())
        })
        .into_owned()
}

fn is_exponent_marker(ident: &str, rest: &str) -> bool {
    let Some(digits) = ident.strip_prefix(|c: char| c == 'e' || c == 'E') else {
        return false;
    };
    if digits.is_empty() {
        rest.starts_with(|c: char| c == '+' || c == '-')
    } else {
        digits.chars().all(|c| c.is_ascii_digit())
    }
}

//
// ================= Registry =================
//

/// Engine registry in default preference order
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: Vec<Arc<dyn EngineAdapter>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `engine`, replacing any adapter already registered under its name.
    pub fn register(&mut self, engine: Arc<dyn EngineAdapter>) {
        match self.engines.iter().position(|e| e.name() == engine.name()) {
            Some(i) => self.engines[i] = engine,
            None => self.engines.push(engine),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EngineAdapter>> {
        self.engines
            .iter()
            .find(|e| e.name().eq_ignore_ascii_case(name.trim()))
            .cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.engines.iter().map(|e| e.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Keeps only the named engines, in the given order.
    pub fn with_order(self, order: &[String]) -> Self {
        let mut ordered = EngineRegistry::new();
        for name in order {
            match self.get(name) {
                Some(engine) => ordered.register(engine),
                None => debug!(engine = %name, "Ignoring unknown engine in order"),
            }
        }
        ordered
    }

    /// Adapters to try for `command`: the hinted engine first, then the rest
    /// in default order.
    pub fn ordered_for(&self, command: &Command) -> Vec<Arc<dyn EngineAdapter>> {
        let preferred = command
            .preferred_engine
            .as_deref()
            .and_then(|hint| self.get(hint));

        let mut ordered = Vec::with_capacity(self.engines.len());
        if let Some(first) = &preferred {
            ordered.push(Arc::clone(first));
        }
        ordered.extend(
            self.engines
                .iter()
                .filter(|e| preferred.as_ref().map_or(true, |p| p.name() != e.name()))
                .cloned(),
        );
        ordered
    }
}

/// Registry with every built-in adapter, ordered per `config`.
pub fn create_default_registry(config: &ResolverConfig) -> EngineRegistry {
    let mut registry = EngineRegistry::new();
    registry.register(Arc::new(NativeEngine::new()));
    registry.register(Arc::new(
        SympyEngine::new(&config.python_bin).with_timeout(config.engine_timeout),
    ));
    registry.register(Arc::new(
        MaximaEngine::new(&config.maxima_bin).with_timeout(config.engine_timeout),
    ));
    registry.with_order(&config.engine_order)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedEngine(&'static str);

    #[async_trait::async_trait]
    impl EngineAdapter for NamedEngine {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn run(&self, _command: &Command) -> ExecutionResult {
            ExecutionResult::solved(self.0, "1".to_string(), None)
        }
    }

    fn registry() -> EngineRegistry {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(NamedEngine("native")));
        registry.register(Arc::new(NamedEngine("sympy")));
        registry.register(Arc::new(NamedEngine("maxima")));
        registry
    }

    fn raw(text: &str) -> RawOutput {
        RawOutput::new(text.to_string(), None)
    }

    #[test]
    fn test_echo_is_failure() {
        let result = classify_output("sympy", Operation::Integrate, raw("Integral(exp(x**2), x)"));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Integral("));

        let result = classify_output("maxima", Operation::Integrate, raw("'integrate(%e^x^2,x)"));
        assert!(!result.success);
    }

    #[test]
    fn test_failure_keywords() {
        for text in ["nil", "Division by zero", "und", "zoo", "Traceback (most recent call last)"] {
            assert!(!classify_output("any", Operation::Evaluate, raw(text)).success, "{}", text);
        }
        // keywords only count as whole words
        assert!(classify_output("any", Operation::Limit, raw("infinity")).success);
        assert!(classify_output("any", Operation::Simplify, raw("sin(x)*nanometer")).success);
    }

    #[test]
    fn test_success_keeps_decimal() {
        let output = RawOutput::new("125/3".to_string(), Some("41.6666666666667".to_string()))
            .with_transcript("RESULT: 125/3");
        let result = classify_output("sympy", Operation::Integrate, output);
        assert!(result.success);
        assert_eq!(result.symbolic, "125/3");
        assert_eq!(result.decimal_approx.as_deref(), Some("41.6666666666667"));
        assert_eq!(result.raw_output.as_deref(), Some("RESULT: 125/3"));
    }

    #[test]
    fn test_empty_output_is_failure() {
        assert!(!classify_output("sympy", Operation::Solve, raw("   ")).success);
    }

    #[test]
    fn test_rewrite_tokens_whole_words() {
        let map = [("pi", "%pi"), ("e", "%e")];
        assert_eq!(rewrite_tokens("e^x + pi*exp(1)", &map), "%e^x + %pi*exp(1)");
        assert_eq!(rewrite_tokens("2pi + 1.5e-3 + 2e5", &map), "2%pi + 1.5e-3 + 2e5");
    }

    #[test]
    fn test_screening_accepts_ordinary_math() {
        let commands = [
            Command::new(Operation::Integrate, "e^(-x) * sin(2x)").with_bounds("0", "infinity"),
            Command::new(Operation::Solve, "x + y = 3, x - y = 1"),
            Command::new(Operation::Determinant, "[[1, 2], [3, 4]]"),
            Command::new(Operation::Limit, "(1 + 1/n)^n").with_variable("n").with_start("-oo"),
            Command::new(Operation::Evaluate, "1.5e-3 * 5! + %pi"),
            Command::new(Operation::Sum, "k_1^2").with_variable("k_1").with_bounds("1", "10"),
        ];
        for command in commands {
            assert!(screen_script_input(&command).is_ok(), "{}", command);
        }
    }

    #[test]
    fn test_screening_refuses_code() {
        let commands = [
            Command::evaluate_verbatim("__import__('os').system('touch /tmp/x')"),
            Command::evaluate_verbatim("system(\"ls\")"),
            Command::evaluate_verbatim("SYSTEM(sconcat(ls))"),
            Command::evaluate_verbatim("x.func"),
            Command::evaluate_verbatim("1; 2"),
            Command::new(Operation::Differentiate, "x^2").with_variable("x)$system(\"id\")$("),
            Command::new(Operation::Integrate, "x").with_bounds("0", "?system"),
            Command::new(Operation::Limit, "1/x").with_start("a: 5"),
        ];
        for command in commands {
            assert!(
                matches!(screen_script_input(&command), Err(ResolutionError::InvalidCommand(_))),
                "{:?}",
                command
            );
        }
    }

    #[test]
    fn test_preferred_engine_goes_first() {
        let command = Command::new(Operation::Evaluate, "1").with_preferred_engine("Maxima");
        let names: Vec<_> = registry().ordered_for(&command).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["maxima", "native", "sympy"]);

        let unhinted = Command::new(Operation::Evaluate, "1").with_preferred_engine("mathematica");
        let names: Vec<_> = registry().ordered_for(&unhinted).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["native", "sympy", "maxima"]);
    }

    #[test]
    fn test_with_order_filters_and_reorders() {
        let ordered = registry().with_order(&["sympy".to_string(), "native".to_string()]);
        assert_eq!(ordered.names(), vec!["sympy", "native"]);
    }
}
