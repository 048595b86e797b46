//! SymPy adapter: renders a Python script and runs it with the configured
//! interpreter.

use super::process::{tagged_line, ProcessRunner};
use super::{classify_output, rewrite_tokens, screen_script_input, EngineAdapter, RawOutput};
use crate::error::ResolutionError;
use crate::models::{Command, ExecutionResult, Operation};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const TOKENS: &[(&str, &str)] = &[
    ("infinity", "oo"),
    ("inf", "oo"),
    ("e", "E"),
    ("ln", "log"),
];

const PRELUDE: &str = r#"import sympy as _sympy
from sympy import *
from sympy.parsing.sympy_parser import parse_expr, standard_transformations, implicit_multiplication_application, convert_xor

_T = standard_transformations + (implicit_multiplication_application, convert_xor)
_BLOCKED = {"sympify", "S", "lambdify", "parse_expr", "var", "init_session", "preview", "plot", "pprint", "print_function"}
_G = {k: getattr(_sympy, k) for k in dir(_sympy) if not k.startswith("_") and k not in _BLOCKED}
_G["__builtins__"] = {}

def P(s):
    return parse_expr(s, local_dict={}, global_dict=_G, transformations=_T)

def Q(s):
    s = s.replace("==", "=")
    if "=" in s:
        lhs, rhs = s.split("=", 1)
        return Eq(P(lhs), P(rhs))
    return P(s)

def approx(r):
    try:
        if isinstance(r, (list, tuple)):
            return "[" + ", ".join(approx(x) for x in r) + "]"
        if isinstance(r, dict):
            return "{" + ", ".join(str(k) + ": " + approx(x) for k, x in r.items()) + "}"
        return str(N(r))
    except Exception:
        return ""
"#;

pub struct SympyEngine {
    runner: ProcessRunner,
}

impl SympyEngine {
    pub fn new(python_bin: &str) -> Self {
        Self {
            runner: ProcessRunner::new(python_bin, &["-"], &["-c", "import sympy"]),
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
impl EngineAdapter for SympyEngine {
    fn name(&self) -> &'static str {
        "sympy"
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
                debug!(engine = "sympy", program = %self.runner.program(), error = %err, "SymPy run failed");
                ExecutionResult::failed(self.name(), &err, None)
            }
        }
    }
}

/// Python string literal for `text` after logical-token rewriting.
fn literal(text: &str) -> String {
    let mapped = rewrite_tokens(text.trim(), TOKENS);
    serde_json::to_string(&mapped).unwrap_or_else(|_| "\"\"".to_string())
}

fn point(text: Option<&str>) -> String {
    format!("P({})", literal(text.unwrap_or("0")))
}

pub fn build_script(command: &Command) -> Result<String> {
    screen_script_input(command)?;
    let expr = format!("P({})", literal(&command.expression));
    let var = "v";

    let body = match command.operation {
        Operation::Integrate => match command.bounds() {
            Some((a, b)) => format!(
                "integrate({}, ({}, {}, {}))",
                expr,
                var,
                point(Some(a)),
                point(Some(b))
            ),
            None => format!("integrate({}, {})", expr, var),
        },
        Operation::Differentiate => format!("diff({}, {})", expr, var),
        Operation::Solve => {
            let parts = command.expression_parts();
            if parts.len() > 1 {
                let equations: Vec<String> = parts
                    .iter()
                    .map(|p| format!("Q({})", literal(p)))
                    .collect();
                format!("solve([{}], dict=True)", equations.join(", "))
            } else {
                format!("solve(Q({}), {})", literal(&command.expression), var)
            }
        }
        Operation::Simplify => format!("simplify({})", expr),
        Operation::Factor => format!("factor({})", expr),
        Operation::Limit => match command.limit_direction() {
            Some(side) => format!(
                "limit({}, {}, {}, dir=\"{}\")",
                expr,
                var,
                point(command.start_point()),
                side
            ),
            None => format!("limit({}, {}, {})", expr, var, point(command.start_point())),
        },
        Operation::Sum => {
            let (a, b) = command.bounds().ok_or_else(|| {
                ResolutionError::InvalidCommand("sum needs start and end bounds".to_string())
            })?;
            format!(
                "summation({}, ({}, {}, {}))",
                expr,
                var,
                point(Some(a)),
                point(Some(b))
            )
        }
        Operation::Evaluate => format!("{}.doit()", expr),
        Operation::Determinant => format!("Matrix({}).det()", expr),
        Operation::Invert => format!("Matrix({}).inv()", expr),
        Operation::Taylor => format!(
            "series({}, {}, {}, {}).removeO()",
            expr,
            var,
            point(command.start_point()),
            command.taylor_order()
        ),
    };

    Ok(format!(
        "{prelude}\nv = Symbol({var})\nr = {body}\nprint(\"RESULT: \" + str(r))\nprint(\"DECIMAL: \" + approx(r))\n",
        prelude = PRELUDE,
        var = literal(command.variable()),
        body = body,
    ))
}
