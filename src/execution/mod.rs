//! Engine attempt runner
//!
//! Tries adapters one at a time in preference order and stops at the first
//! success. No LLM is involved here.

use crate::engines::EngineRegistry;
use crate::error::ResolutionError;
use crate::models::{Command, ExecutionResult};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of one ATTEMPT_ENGINES pass
#[derive(Debug, Clone, Default)]
pub struct EngineAttempt {
    /// First successful result, if any adapter produced one.
    pub result: Option<ExecutionResult>,
    /// `engine: error` for every adapter that did not succeed.
    pub failures: Vec<String>,
    pub tried: Vec<String>,
}

impl EngineAttempt {
    pub fn succeeded(&self) -> bool {
        self.result.is_some()
    }
}

pub struct ExecutionEngine {
    registry: EngineRegistry,
    engine_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(registry: EngineRegistry, engine_timeout: Duration) -> Self {
        Self {
            registry,
            engine_timeout,
        }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    /// Run `command` against each adapter in turn (never concurrently).
    pub async fn attempt(&self, command: &Command) -> EngineAttempt {
        let mut attempt = EngineAttempt::default();

        for engine in self.registry.ordered_for(command) {
            let name = engine.name();

            if !engine.supports(command.operation) {
                let err = ResolutionError::EngineUnavailable(format!(
                    "{} does not support {}",
                    name, command.operation
                ));
                debug!(engine = %name, operation = %command.operation, "Skipping engine");
                attempt.failures.push(format!("{}: {}", name, err));
                continue;
            }

            attempt.tried.push(name.to_string());
            let start = Instant::now();

            let result = match tokio::time::timeout(self.engine_timeout, engine.run(command)).await {
                Ok(result) => result,
                Err(_) => {
                    let err = ResolutionError::ExecutionException(format!(
                        "timed out after {}ms",
                        self.engine_timeout.as_millis()
                    ));
                    ExecutionResult::failed(name, &err, None)
                }
            };

            let elapsed_ms = start.elapsed().as_millis() as u64;

            if result.success {
                info!(engine = %name, operation = %command.operation, elapsed_ms, "Engine succeeded");
                attempt.result = Some(result);
                return attempt;
            }

            let error = result
                .error
                .unwrap_or_else(|| "engine reported failure without detail".to_string());
            warn!(engine = %name, operation = %command.operation, elapsed_ms, error = %error, "Engine failed");
            attempt.failures.push(format!("{}: {}", name, error));
        }

        attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::EngineAdapter;
    use crate::models::Operation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedEngine {
        name: &'static str,
        succeed: bool,
        only: Option<Operation>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedEngine {
        fn new(name: &'static str, succeed: bool) -> Self {
            Self {
                name,
                succeed,
                only: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl EngineAdapter for ScriptedEngine {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supports(&self, operation: Operation) -> bool {
            self.only.map_or(true, |op| op == operation)
        }

        async fn run(&self, _command: &Command) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.succeed {
                ExecutionResult::solved(self.name, "42".to_string(), None)
            } else {
                let err = ResolutionError::EchoedUnsolved("output still contains integrate(".to_string());
                ExecutionResult::failed(self.name, &err, None)
            }
        }
    }

    fn runner(engines: Vec<Arc<ScriptedEngine>>, timeout: Duration) -> ExecutionEngine {
        let mut registry = EngineRegistry::new();
        for engine in engines {
            registry.register(engine);
        }
        ExecutionEngine::new(registry, timeout)
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let first = Arc::new(ScriptedEngine::new("first", false));
        let second = Arc::new(ScriptedEngine::new("second", true));
        let third = Arc::new(ScriptedEngine::new("third", true));
        let engine = runner(vec![first, second, third.clone()], Duration::from_secs(1));

        let attempt = engine.attempt(&Command::new(Operation::Integrate, "x")).await;

        assert_eq!(attempt.result.unwrap().engine_used, "second");
        assert_eq!(attempt.failures.len(), 1);
        assert!(attempt.failures[0].starts_with("first: "));
        assert_eq!(third.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_preferred_engine_runs_first() {
        let first = Arc::new(ScriptedEngine::new("first", true));
        let second = Arc::new(ScriptedEngine::new("second", true));
        let engine = runner(vec![first, second], Duration::from_secs(1));

        let command = Command::new(Operation::Evaluate, "1").with_preferred_engine("second");
        let attempt = engine.attempt(&command).await;
        assert_eq!(attempt.result.unwrap().engine_used, "second");
        assert_eq!(attempt.tried, vec!["second"]);
    }

    #[tokio::test]
    async fn test_unsupported_operation_is_skipped() {
        let mut narrow = ScriptedEngine::new("narrow", true);
        narrow.only = Some(Operation::Determinant);
        let narrow = Arc::new(narrow);
        let engine = runner(vec![narrow.clone()], Duration::from_secs(1));

        let attempt = engine.attempt(&Command::new(Operation::Solve, "x = 1")).await;
        assert!(!attempt.succeeded());
        assert!(attempt.failures[0].contains("does not support solve"));
        assert_eq!(narrow.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_engine_times_out() {
        let mut slow = ScriptedEngine::new("slow", true);
        slow.delay = Duration::from_secs(60);
        let fast = Arc::new(ScriptedEngine::new("fast", true));
        let engine = runner(vec![Arc::new(slow), fast], Duration::from_secs(2));

        let attempt = engine.attempt(&Command::new(Operation::Evaluate, "1")).await;
        assert_eq!(attempt.result.unwrap().engine_used, "fast");
        assert!(attempt.failures[0].contains("timed out"));
    }
}
