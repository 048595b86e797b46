//! Gemini-backed result judge

use super::ResultValidator;
use crate::error::ResolutionError;
use crate::gemini::{strip_code_fence, GeminiClient};
use crate::models::{FormattedResult, ValidationVerdict};
use crate::Result;
use async_trait::async_trait;
use tracing::debug;

const SYSTEM_PROMPT: &str = r#"You check answers to mathematics questions.

Decide whether the candidate answer correctly and completely answers the question.
Equivalent forms (exact fraction vs decimal, reordered roots, rewritten expressions) are correct.

Return ONLY valid JSON, no explanation text:
{"isValid": true}
or
{"isValid": false, "reason": "<what is wrong, one sentence>"}"#;

pub struct GeminiValidator {
    client: GeminiClient,
}

impl GeminiValidator {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }

    fn build_prompt(query: &str, candidate: &FormattedResult) -> String {
        let mut prompt = format!("QUESTION:\n{}\n\nCANDIDATE ANSWER:\n{}", query, candidate.primary);
        if candidate.exact != candidate.primary {
            prompt.push_str(&format!("\n\nEXACT FORM:\n{}", candidate.exact));
        }
        prompt
    }
}

#[async_trait]
impl ResultValidator for GeminiValidator {
    async fn validate(&self, query: &str, candidate: &FormattedResult) -> Result<ValidationVerdict> {
        let prompt = Self::build_prompt(query, candidate);
        let response = self.client.generate(&prompt, SYSTEM_PROMPT, 0.0).await?;
        debug!(model = %self.client.model(), "Validator responded");
        parse_verdict(&response)
    }
}

/// Parse `{isValid, reason?}` out of a model reply.
pub fn parse_verdict(response: &str) -> Result<ValidationVerdict> {
    serde_json::from_str(strip_code_fence(response)).map_err(|e| {
        ResolutionError::ValidationUnavailable(format!(
            "unreadable verdict: {} | raw={}",
            e, response
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict() {
        let verdict = parse_verdict("```json\n{\"isValid\": false, \"reason\": \"wrong sign\"}\n```").unwrap();
        assert!(!verdict.is_valid);
        assert_eq!(verdict.reason.as_deref(), Some("wrong sign"));

        assert!(parse_verdict("{\"isValid\": true}").unwrap().is_valid);
    }

    #[test]
    fn test_unreadable_verdict() {
        let result = parse_verdict("Looks right to me!");
        assert!(matches!(result, Err(ResolutionError::ValidationUnavailable(_))));
    }

    #[test]
    fn test_prompt_mentions_exact_form_only_when_different() {
        let candidate = FormattedResult {
            primary: "41.6667".to_string(),
            exact: "125/3".to_string(),
            decimal: Some("41.6667".to_string()),
        };
        let prompt = GeminiValidator::build_prompt("integrate x^2 from 0 to 5", &candidate);
        assert!(prompt.contains("EXACT FORM:\n125/3"));

        let same = FormattedResult {
            primary: "-2".to_string(),
            exact: "-2".to_string(),
            decimal: None,
        };
        assert!(!GeminiValidator::build_prompt("det", &same).contains("EXACT FORM"));
    }
}
