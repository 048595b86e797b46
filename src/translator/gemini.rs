//! Gemini-powered command translator
//!
//! Uses Google's Gemini API to turn a math question into a Command

use super::{parse_command_response, CommandTranslator, Refinement};
use crate::gemini::GeminiClient;
use crate::models::{Command, Operation};
use crate::Result;
use async_trait::async_trait;
use tracing::debug;

pub struct GeminiTranslator {
    client: GeminiClient,
}

impl GeminiTranslator {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }

    fn system_prompt() -> String {
        let operations: Vec<&str> = Operation::ALL.iter().map(Operation::as_str).collect();
        format!(
            r#"You are a translator from mathematics questions to computation commands.

Available operations:
- {}

Rules:
- "expression" is ALWAYS a string. Matrices are nested-bracket strings such as "[[1,2],[3,4]]"
- use ^ for powers, explicit * for products, pi and e for the constants, infinity and -infinity for unbounded limits
- integrate: set both "start" and "end" for a definite integral, neither for an indefinite one
- solve: write equations with =, separate the equations of a system with commas
- limit and taylor: the point goes in "start"; taylor may set "order" (number of terms)
- one-sided limit: set "direction" to "+" (from the right) or "-" (from the left); omit it for a two-sided limit
- sum: "start" and "end" are the index bounds, "variable" is the index
- "preferredEngine" is optional: "sympy", "maxima" or "native"
- Return ONLY valid JSON
- No explanation text
- JSON format:

{{
  "operation": "integrate",
  "expression": "x^2",
  "variable": "x",
  "start": "0",
  "end": "5"
}}
"#,
            operations.join("\n- ")
        )
    }

    fn build_prompt(query: &str, refinement: Option<Refinement<'_>>) -> String {
        let base = format!("QUESTION:\n{}", query);

        match refinement {
            Some(refinement) => {
                let previous = serde_json::to_string(refinement.previous)
                    .unwrap_or_else(|_| refinement.previous.to_string());
                format!(
                    "The previous command did not produce an acceptable answer:\n{}\n\nProblems so far:\n- {}\n\nGenerate a DIFFERENT improved command.\n\n{}",
                    previous,
                    refinement.reasons.join("\n- "),
                    base
                )
            }
            None => base,
        }
    }
}

#[async_trait]
impl CommandTranslator for GeminiTranslator {
    async fn translate(&self, query: &str, refinement: Option<Refinement<'_>>) -> Result<Command> {
        let refining = refinement.is_some();
        let prompt = Self::build_prompt(query, refinement);

        let response = self
            .client
            .generate(&prompt, &Self::system_prompt(), 0.1)
            .await?;
        debug!(model = %self.client.model(), refining, "Translator responded");

        parse_command_response(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_lists_operations() {
        let prompt = GeminiTranslator::system_prompt();
        for operation in Operation::ALL {
            assert!(prompt.contains(&format!("- {}", operation)));
        }
    }

    #[test]
    fn test_refinement_prompt_carries_reasons() {
        let previous = Command::new(Operation::Integrate, "e^(x^2)");
        let reasons = vec![
            "sympy: Engine echoed the unsolved input: output still contains Integral(".to_string(),
            "maxima: Engine unavailable: maxima not found".to_string(),
        ];
        let prompt = GeminiTranslator::build_prompt(
            "integrate e^(x^2)",
            Some(Refinement {
                previous: &previous,
                reasons: &reasons,
            }),
        );

        assert!(prompt.contains("\"operation\":\"integrate\""));
        assert!(prompt.contains("- maxima: Engine unavailable"));
        assert!(prompt.ends_with("QUESTION:\nintegrate e^(x^2)"));

        let first = GeminiTranslator::build_prompt("integrate e^(x^2)", None);
        assert_eq!(first, "QUESTION:\nintegrate e^(x^2)");
    }
}
