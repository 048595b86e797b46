//! Resolver configuration
//!
//! Loaded from the environment (and `.env` when present).

use crate::error::ResolutionError;
use crate::Result;
use std::env;
use std::time::Duration;

pub const DEFAULT_MAX_REFINEMENTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub max_refinements: u32,
    pub translate_timeout: Duration,
    pub validate_timeout: Duration,
    pub fallback_timeout: Duration,
    pub engine_timeout: Duration,
    pub engine_order: Vec<String>,
    pub python_bin: String,
    pub maxima_bin: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: "gemini-2.0-flash".to_string(),
            max_refinements: DEFAULT_MAX_REFINEMENTS,
            translate_timeout: Duration::from_secs(20),
            validate_timeout: Duration::from_secs(5),
            fallback_timeout: Duration::from_secs(45),
            engine_timeout: Duration::from_secs(10),
            engine_order: vec![
                "native".to_string(),
                "sympy".to_string(),
                "maxima".to_string(),
            ],
            python_bin: "python3".to_string(),
            maxima_bin: "maxima".to_string(),
        }
    }
}

impl ResolverConfig {
    /// Build from process environment, falling back to defaults per key.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads keys through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let gemini_api_key = get("GEMINI_API_KEY").filter(|k| k != "your_gemini_api_key_here");

        let engine_order = match get("RESOLVER_ENGINE_ORDER") {
            Some(raw) => {
                let order: Vec<String> = raw
                    .split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                if order.is_empty() {
                    return Err(ResolutionError::Config(
                        "RESOLVER_ENGINE_ORDER names no engines".to_string(),
                    ));
                }
                order
            }
            None => defaults.engine_order,
        };

        Ok(Self {
            gemini_api_key,
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            max_refinements: parse_or(&get, "RESOLVER_MAX_REFINEMENTS", defaults.max_refinements)?,
            translate_timeout: millis_or(&get, "RESOLVER_TRANSLATE_TIMEOUT_MS", defaults.translate_timeout)?,
            validate_timeout: millis_or(&get, "RESOLVER_VALIDATE_TIMEOUT_MS", defaults.validate_timeout)?,
            fallback_timeout: millis_or(&get, "RESOLVER_FALLBACK_TIMEOUT_MS", defaults.fallback_timeout)?,
            engine_timeout: millis_or(&get, "RESOLVER_ENGINE_TIMEOUT_MS", defaults.engine_timeout)?,
            engine_order,
            python_bin: get("SYMPY_PYTHON_BIN").unwrap_or(defaults.python_bin),
            maxima_bin: get("MAXIMA_BIN").unwrap_or(defaults.maxima_bin),
        })
    }
}

fn parse_or<G>(get: &G, key: &str, default: u32) -> Result<u32>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ResolutionError::Config(format!("{} must be a whole number: {}", key, e))),
        None => Ok(default),
    }
}

fn millis_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ResolutionError::Config(format!("{} must be milliseconds: {}", key, e))),
        None => Ok(default),
    }
}
