//! Command translator trait and implementations
//!
//! A translator turns free text into a structured [`Command`]. On refinement
//! rounds it also sees the rejected command and every reason collected so far.

use crate::error::ResolutionError;
use crate::gemini::strip_code_fence;
use crate::models::{Command, LimitDirection, Operation, DEFAULT_VARIABLE};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

pub mod gemini;
pub mod keyword;

pub use gemini::GeminiTranslator;
pub use keyword::KeywordTranslator;

/// Context for a refinement round.
#[derive(Debug, Clone, Copy)]
pub struct Refinement<'a> {
    pub previous: &'a Command,
    pub reasons: &'a [String],
}

/// Trait for natural-language → command translation
#[async_trait]
pub trait CommandTranslator: Send + Sync {
    async fn translate(&self, query: &str, refinement: Option<Refinement<'_>>) -> Result<Command>;
}

/// Builds a [`Command`] from loosely typed translator JSON.
///
/// An unknown `operation` is [`ResolutionError::UnsupportedOperation`]; a
/// non-string `expression` is stringified, arrays as compact nested brackets.
pub fn command_from_value(value: &Value) -> Result<Command> {
    let object = value.as_object().ok_or_else(|| {
        ResolutionError::InvalidCommand("command is not a JSON object".to_string())
    })?;

    let operation: Operation = object
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| ResolutionError::InvalidCommand("missing operation".to_string()))?
        .parse()?;

    let expression = object
        .get("expression")
        .filter(|v| !v.is_null())
        .map(value_to_text)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| ResolutionError::InvalidCommand("missing expression".to_string()))?;

    let text_field = |key: &str| {
        object
            .get(key)
            .filter(|v| !v.is_null())
            .map(value_to_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let order = match object.get("order") {
        Some(Value::Number(n)) => n.as_u64().map(|n| n.min(u32::MAX as u64) as u32),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };

    let direction = match text_field("direction") {
        Some(text) => LimitDirection::parse_optional(&text)?,
        None => None,
    };

    Ok(Command {
        operation,
        expression,
        variable: text_field("variable").unwrap_or_else(|| DEFAULT_VARIABLE.to_string()),
        start: text_field("start"),
        end: text_field("end"),
        preferred_engine: text_field("preferredEngine"),
        order,
        direction,
    })
}

/// Text form of any JSON value; `[[1,2],[3,4]]` stays `[[1,2],[3,4]]`.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(value_to_text).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parses a model reply (possibly fenced) into a [`Command`].
pub fn parse_command_response(response: &str) -> Result<Command> {
    let json: Value = serde_json::from_str(strip_code_fence(response)).map_err(|e| {
        ResolutionError::LlmError(format!(
            "Failed to parse translator response: {} | raw={}",
            e, response
        ))
    })?;
    command_from_value(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_matrix_array_is_stringified() {
        let command = command_from_value(&json!({
            "operation": "determinant",
            "expression": [[1, 2], [3, 4]]
        }))
        .unwrap();
        assert_eq!(command.expression, "[[1,2],[3,4]]");
        assert_eq!(command.variable, "x");
    }

    #[test]
    fn test_numbers_become_text() {
        let command = command_from_value(&json!({
            "operation": "integrate",
            "expression": "x^2",
            "start": 0,
            "end": 5.5,
            "order": "4"
        }))
        .unwrap();
        assert_eq!(command.bounds(), Some(("0", "5.5")));
        assert_eq!(command.order, Some(4));

        let evaluated = command_from_value(&json!({"operation": "evaluate", "expression": 42})).unwrap();
        assert_eq!(evaluated.expression, "42");
    }

    #[test]
    fn test_limit_direction_is_read() {
        let command = command_from_value(&json!({
            "operation": "limit",
            "expression": "1/x",
            "start": 0,
            "direction": "right"
        }))
        .unwrap();
        assert_eq!(command.direction, Some(LimitDirection::Right));

        let result = command_from_value(&json!({
            "operation": "limit",
            "expression": "1/x",
            "direction": "diagonal"
        }));
        assert!(matches!(result, Err(ResolutionError::InvalidCommand(_))));
    }

    #[test]
    fn test_unknown_operation_is_unsupported() {
        let result = command_from_value(&json!({"operation": "laplace", "expression": "t"}));
        assert!(matches!(result, Err(ResolutionError::UnsupportedOperation(op)) if op == "laplace"));
    }

    #[test]
    fn test_missing_fields_are_invalid() {
        assert!(matches!(
            command_from_value(&json!({"expression": "x"})),
            Err(ResolutionError::InvalidCommand(_))
        ));
        assert!(matches!(
            command_from_value(&json!({"operation": "solve", "expression": null})),
            Err(ResolutionError::InvalidCommand(_))
        ));
        assert!(matches!(
            command_from_value(&json!(["solve"])),
            Err(ResolutionError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_fenced_response() {
        let command = parse_command_response(
            "```json\n{\"operation\": \"solve\", \"expression\": \"x^2 - 4 = 0\", \"preferredEngine\": \"sympy\"}\n```",
        )
        .unwrap();
        assert_eq!(command.operation, Operation::Solve);
        assert_eq!(command.preferred_engine.as_deref(), Some("sympy"));

        assert!(matches!(parse_command_response("not json"), Err(ResolutionError::LlmError(_))));
    }
}
