//! Error types for the math query resolver

use thiserror::Error;

/// Result type alias for resolver operations
pub type Result<T> = std::result::Result<T, ResolutionError>;

#[derive(Error, Debug)]
pub enum ResolutionError {

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Translation unavailable: {0}")]
    TranslationUnavailable(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Engine echoed the unsolved input: {0}")]
    EchoedUnsolved(String),

    #[error("Engine execution failed: {0}")]
    ExecutionException(String),

    #[error("Validation rejected the answer: {0}")]
    ValidationRejected(String),

    #[error("Validation unavailable: {0}")]
    ValidationUnavailable(String),

    #[error("Refinement budget exhausted after {0} rounds")]
    RefinementExhausted(u32),

    #[error("Fallback solver failed: {0}")]
    FallbackFailed(String),

    #[error("Resolution cancelled")]
    Cancelled,

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
