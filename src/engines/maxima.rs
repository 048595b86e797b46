//! Maxima adapter: renders batch input and runs `maxima --very-quiet`.

use super::process::{tagged_line, ProcessRunner};
use super::{classify_output, rewrite_tokens, screen_script_input, EngineAdapter, RawOutput};
use crate::error::ResolutionError;
use crate::models::{Command, ExecutionResult, LimitDirection, Operation};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const TOKENS: &[(&str, &str)] = &[
    ("pi", "%pi"),
    ("e", "%e"),
    ("infinity", "inf"),
    ("oo", "inf"),
    ("ln", "log"),
];

pub struct MaximaEngine {
    runner: ProcessRunner,
}

impl MaximaEngine {
    pub fn new(maxima_bin: &str) -> Self {
        Self {
            runner: ProcessRunner::new(maxima_bin, &["--very-quiet"], &["--version"]),
        }
    }

    /// Per-run wall-clock limit for the child process.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.runner = self.runner.with_timeout(timeout);
        self
    }

    async fn execute(&self, command: &Command) -> Result<String> {
        let script = build_script(command)?;
        self.runner.ensure_ready().await?;
        self.runner.run_script(&script).await
    }
}

#[async_trait]
impl EngineAdapter for MaximaEngine {
    fn name(&self) -> &'static str {
        "maxima"
    }

    async fn run(&self, command: &Command) -> ExecutionResult {
        match self.execute(command).await {
            Ok(stdout) => {
                let symbolic = tagged_line(&stdout, "RESULT:").unwrap_or_default().to_string();
                let decimal = tagged_line(&stdout, "DECIMAL:").map(str::to_string);
                classify_output(
                    self.name(),
                    command.operation,
                    RawOutput::new(symbolic, decimal).with_transcript(stdout),
                )
            }
            Err(err) => {
                debug!(engine = "maxima", program = %self.runner.program(), error = %err, "Maxima run failed");
                ExecutionResult::failed(self.name(), &err, None)
            }
        }
    }
}

/// Maxima has no implicit multiplication: `2x` → `2*x`, `)(` → `)*(`.
fn explicit_multiplication(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut in_identifier = false;

    for (i, &c) in chars.iter().enumerate() {
        if let Some(&prev) = i.checked_sub(1).and_then(|j| chars.get(j)) {
            let starts_operand = c.is_alphabetic() || c == '(' || c == '%';
            let exponent_marker = (c == 'e' || c == 'E')
                && matches!(chars.get(i + 1), Some(d) if d.is_ascii_digit() || *d == '-' || *d == '+');
            let after_number = prev.is_ascii_digit() && !in_identifier && starts_operand && !exponent_marker;
            let after_group = prev == ')' && (starts_operand || c.is_ascii_digit());
            if after_number || after_group {
                out.push('*');
            }
        }
        in_identifier = if c.is_alphabetic() || c == '_' || c == '%' {
            true
        } else {
            in_identifier && c.is_ascii_digit()
        };
        out.push(c);
    }
    out
}

fn maxima_expr(text: &str) -> String {
    explicit_multiplication(&rewrite_tokens(text.trim(), TOKENS).replace("==", "="))
}

fn maxima_point(text: Option<&str>) -> String {
    let raw = text.unwrap_or("0");
    let compact: String = raw.split_whitespace().collect::<String>().to_lowercase();
    match compact.as_str() {
        "-infinity" | "-inf" | "-oo" | "minf" => "minf".to_string(),
        _ => maxima_expr(raw),
    }
}

pub fn build_script(command: &Command) -> Result<String> {
    screen_script_input(command)?;
    let expr = maxima_expr(&command.expression);
    let var = command.variable();

    let body = match command.operation {
        Operation::Integrate => match command.bounds() {
            Some((a, b)) => format!(
                "defint({}, {}, {}, {})",
                expr,
                var,
                maxima_point(Some(a)),
                maxima_point(Some(b))
            ),
            None => format!("integrate({}, {})", expr, var),
        },
        Operation::Differentiate => format!("diff({}, {})", expr, var),
        Operation::Solve => {
            let parts = command.expression_parts();
            if parts.len() > 1 {
                let equations: Vec<String> = parts.iter().map(|p| maxima_expr(p)).collect();
                let list = format!("[{}]", equations.join(", "));
                format!("solve({}, listofvars({}))", list, list)
            } else {
                format!("solve({}, {})", expr, var)
            }
        }
        Operation::Simplify => format!("ratsimp({})", expr),
        Operation::Factor => format!("factor({})", expr),
        Operation::Limit => {
            let point = maxima_point(command.start_point());
            match command.limit_direction() {
                Some(LimitDirection::Right) => format!("limit({}, {}, {}, plus)", expr, var, point),
                Some(LimitDirection::Left) => format!("limit({}, {}, {}, minus)", expr, var, point),
                None => format!("limit({}, {}, {})", expr, var, point),
            }
        }
        Operation::Sum => {
            let (a, b) = command.bounds().ok_or_else(|| {
                ResolutionError::InvalidCommand("sum needs start and end bounds".to_string())
            })?;
            format!(
                "ev(sum({}, {}, {}, {}), simpsum)",
                expr,
                var,
                maxima_point(Some(a)),
                maxima_point(Some(b))
            )
        }
        Operation::Evaluate => expr,
        Operation::Determinant => format!("determinant(apply('matrix, {}))", expr),
        Operation::Invert => format!("invert(apply('matrix, {}))", expr),
        Operation::Taylor => format!(
            "ratdisrep(taylor({}, {}, {}, {}))",
            expr,
            var,
            maxima_point(command.start_point()),
            command.taylor_order() - 1
        ),
    };

    Ok(format!(
        "display2d:false$\nr: {}$\nprint(\"RESULT:\", r)$\nprint(\"DECIMAL:\", float(r))$\nquit()$\n",
        body
    ))
}
