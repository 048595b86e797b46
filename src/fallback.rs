//! Generative fallback solver
//!
//! Called once, after every structured attempt has failed. Its answer is
//! taken as is; only empty or "cannot solve" replies count as failure.

use crate::error::ResolutionError;
use crate::gemini::GeminiClient;
use crate::Result;
use async_trait::async_trait;
use tracing::debug;

/// Sentinel the model is told to return when it has no answer.
pub const CANNOT_SOLVE: &str = "CANNOT_SOLVE";

#[async_trait]
pub trait FallbackSolver: Send + Sync {
    async fn solve(&self, query: &str) -> Result<String>;
}

/// Whether a fallback reply is a refusal rather than an answer.
pub fn is_negative_answer(answer: &str) -> bool {
    let lowered = answer.trim().to_lowercase();
    lowered.is_empty()
        || lowered.contains(&CANNOT_SOLVE.to_lowercase())
        || lowered.starts_with("cannot solve")
        || lowered.starts_with("i cannot solve")
        || lowered.starts_with("i can't solve")
        || lowered.starts_with("unable to solve")
}

const SYSTEM_PROMPT: &str = r#"You are a careful mathematician.

Answer the question directly. Give the final result only: a number, an expression,
a list of solutions or a matrix. No working, no prose, no LaTeX.
If you cannot answer, reply with exactly CANNOT_SOLVE."#;

pub struct GeminiFallbackSolver {
    client: GeminiClient,
}

impl GeminiFallbackSolver {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FallbackSolver for GeminiFallbackSolver {
    async fn solve(&self, query: &str) -> Result<String> {
        let answer = self.client.generate(query, SYSTEM_PROMPT, 0.2).await?;
        debug!(model = %self.client.model(), answer_len = answer.len(), "Fallback answered");
        Ok(answer.trim().to_string())
    }
}

/// Used when no generative model is configured.
pub struct UnavailableFallback;

#[async_trait]
impl FallbackSolver for UnavailableFallback {
    async fn solve(&self, _query: &str) -> Result<String> {
        Err(ResolutionError::FallbackFailed(
            "no generative solver configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_answers() {
        assert!(is_negative_answer(""));
        assert!(is_negative_answer("   "));
        assert!(is_negative_answer("CANNOT_SOLVE"));
        assert!(is_negative_answer("Cannot solve this equation."));
        assert!(is_negative_answer("I can't solve that"));

        assert!(!is_negative_answer("x = 2"));
        assert!(!is_negative_answer("The integral diverges"));
    }

    #[tokio::test]
    async fn test_unavailable_fallback_fails() {
        let result = UnavailableFallback.solve("what is 2+2").await;
        assert!(matches!(result, Err(ResolutionError::FallbackFailed(_))));
    }
}
