//! Math Query Resolver
//!
//! Answers natural-language mathematics questions:
//! - Translates the question into a structured command (LLM or offline keywords)
//! - Runs the command on interchangeable computation engines (native, SymPy, Maxima)
//! - Normalizes the first successful result for presentation
//! - Has the answer judged before accepting it
//! - Refines the command a bounded number of times, then falls back to a generative solver
//!
//! PIPELINE:
//! PARSE → ATTEMPT_ENGINES → VALIDATE → (ACCEPT | REFINE) → GENERATIVE_FALLBACK → (ACCEPT | FAIL)

pub mod agent;
pub mod api;
pub mod classifier;
pub mod config;
pub mod engines;
pub mod error;
pub mod execution;
pub mod fallback;
pub mod gemini;
pub mod models;
pub mod normalizer;
pub mod translator;
pub mod verification;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::{Orchestrator, PipelineLimits, ResolveOptions};
pub use config::ResolverConfig;
