//! Resolution orchestrator - implements the pipeline state machine
//!
//! PARSE → ATTEMPT_ENGINES → VALIDATE → (ACCEPT | REFINE) → … →
//! GENERATIVE_FALLBACK → (ACCEPT | FAIL)

use crate::config::ResolverConfig;
use crate::engines::create_default_registry;
use crate::error::ResolutionError;
use crate::execution::{EngineAttempt, ExecutionEngine};
use crate::fallback::{is_negative_answer, FallbackSolver, GeminiFallbackSolver, UnavailableFallback};
use crate::gemini::GeminiClient;
use crate::models::{AnswerSource, Command, FormattedResult, Resolution, ValidationVerdict};
use crate::normalizer::{normalize, normalize_text};
use crate::translator::{CommandTranslator, GeminiTranslator, KeywordTranslator, Refinement};
use crate::verification::{create_default_validator, GeminiValidator, ResultValidator};
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Refinement budget and per-collaborator timeouts
#[derive(Debug, Clone)]
pub struct PipelineLimits {
    pub max_refinements: u32,
    pub translate_timeout: Duration,
    pub validate_timeout: Duration,
    pub fallback_timeout: Duration,
}

impl PipelineLimits {
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            max_refinements: config.max_refinements,
            translate_timeout: config.translate_timeout,
            validate_timeout: config.validate_timeout,
            fallback_timeout: config.fallback_timeout,
        }
    }
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self::from_config(&ResolverConfig::default())
    }
}

/// Per-request caller options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveOptions {
    /// Overrides whatever engine hint the translator produced.
    #[serde(default)]
    pub preferred_engine: Option<String>,
}

impl ResolveOptions {
    fn apply(&self, mut command: Command) -> Command {
        if let Some(engine) = self.preferred_engine.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            command.preferred_engine = Some(engine.to_string());
        }
        command
    }
}

/// Bookkeeping for one request
struct RunState {
    resolution_id: Uuid,
    started: Instant,
    trace: Vec<String>,
    translator_calls: u32,
    refinements: u32,
}

impl RunState {
    fn new() -> Self {
        Self {
            resolution_id: Uuid::new_v4(),
            started: Instant::now(),
            trace: Vec::new(),
            translator_calls: 0,
            refinements: 0,
        }
    }

    fn note(&mut self, entry: impl Into<String>) {
        self.trace.push(entry.into());
    }

    fn finish(
        self,
        query: &str,
        answer: FormattedResult,
        source: AnswerSource,
        command: Option<Command>,
    ) -> Resolution {
        Resolution {
            resolution_id: self.resolution_id,
            query: query.to_string(),
            answer,
            source,
            command,
            refinements: self.refinements,
            translator_calls: self.translator_calls,
            reasoning_trace: self.trace,
            execution_time_ms: self.started.elapsed().as_millis() as u64,
            resolved_at: Utc::now(),
        }
    }
}

/// Runs `fut` under `limit`, abandoning it when `cancel` fires.
async fn guarded<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    on_timeout: fn(String) -> ResolutionError,
    what: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResolutionError::Cancelled),
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(on_timeout(format!("{} timed out after {}ms", what, limit.as_millis()))),
        },
    }
}

/// Main orchestrator that coordinates the entire pipeline
pub struct Orchestrator {
    translator: Box<dyn CommandTranslator>,
    execution_engine: ExecutionEngine,
    validator: Box<dyn ResultValidator>,
    fallback: Box<dyn FallbackSolver>,
    limits: PipelineLimits,
}

impl Orchestrator {
    pub fn new(
        translator: Box<dyn CommandTranslator>,
        execution_engine: ExecutionEngine,
        validator: Box<dyn ResultValidator>,
        fallback: Box<dyn FallbackSolver>,
    ) -> Self {
        Self {
            translator,
            execution_engine,
            validator,
            fallback,
            limits: PipelineLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: PipelineLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Gemini collaborators when an API key is configured, the offline ones otherwise.
    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let execution_engine =
            ExecutionEngine::new(create_default_registry(config), config.engine_timeout);

        let orchestrator = match &config.gemini_api_key {
            Some(key) => {
                let client = GeminiClient::new(key.clone(), config.gemini_model.clone())?;
                info!(model = %config.gemini_model, "Using Gemini collaborators");
                Self::new(
                    Box::new(GeminiTranslator::new(client.clone())),
                    execution_engine,
                    Box::new(GeminiValidator::new(client.clone())),
                    Box::new(GeminiFallbackSolver::new(client)),
                )
            }
            None => {
                warn!("GEMINI_API_KEY not set, using offline translator and rule validator");
                Self::new(
                    Box::new(KeywordTranslator::new()),
                    execution_engine,
                    Box::new(create_default_validator()),
                    Box::new(UnavailableFallback),
                )
            }
        };

        Ok(orchestrator.with_limits(PipelineLimits::from_config(config)))
    }

    pub fn limits(&self) -> &PipelineLimits {
        &self.limits
    }

    pub fn engine_names(&self) -> Vec<&'static str> {
        self.execution_engine.registry().names()
    }

    pub async fn run(&self, query: &str) -> Result<Resolution> {
        self.run_with_options(query, &ResolveOptions::default(), &CancellationToken::new())
            .await
    }

    /// Resolves queries one after another; each gets its own pipeline.
    pub async fn run_batch(&self, queries: &[String]) -> Vec<Result<Resolution>> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            results.push(self.run(query).await);
        }
        results
    }

    /// Run the full resolution pipeline for one query
    pub async fn run_with_options(
        &self,
        query: &str,
        options: &ResolveOptions,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let mut state = RunState::new();
        let request_id = state.resolution_id;

        info!(request_id = %request_id, query = %query, "Resolution started");
        state.note(format!("INPUT: {}", query));

        if cancel.is_cancelled() {
            return Err(ResolutionError::Cancelled);
        }

        // 1️⃣ PARSE
        state.translator_calls += 1;
        let parsed = guarded(
            cancel,
            self.limits.translate_timeout,
            ResolutionError::TranslationUnavailable,
            "translation",
            self.translator.translate(query, None),
        )
        .await;

        let mut command = match parsed {
            Ok(command) => options.apply(command),
            Err(ResolutionError::Cancelled) => return Err(ResolutionError::Cancelled),
            Err(err @ ResolutionError::UnsupportedOperation(_)) => {
                info!(request_id = %request_id, error = %err, "No engine can run this, going to fallback");
                state.note(format!("PARSE: {}", err));
                return self.generative_fallback(query, state, cancel).await;
            }
            Err(err) => {
                warn!(request_id = %request_id, error = %err, "Translator failed, evaluating query verbatim");
                state.note(format!("PARSE: translator failed ({}), evaluating the query verbatim", err));
                options.apply(Command::evaluate_verbatim(query))
            }
        };

        let mut reasons: Vec<String> = Vec::new();

        loop {
            // 2️⃣ ATTEMPT_ENGINES
            state.note(format!("ATTEMPT: {}", command));
            debug!(request_id = %request_id, command = %command, attempt = state.refinements + 1, "Attempting engines");

            let attempt: EngineAttempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResolutionError::Cancelled),
                attempt = self.execution_engine.attempt(&command) => attempt,
            };

            for failure in &attempt.failures {
                state.note(format!("ENGINE: {}", failure));
            }
            reasons.extend(attempt.failures.iter().cloned());

            // 3️⃣ VALIDATE
            match attempt.result {
                Some(result) => {
                    let candidate = normalize(&result, command.operation);
                    state.note(format!("VALIDATE: {} answered {}", result.engine_used, candidate.primary));

                    let verdict = match guarded(
                        cancel,
                        self.limits.validate_timeout,
                        ResolutionError::ValidationUnavailable,
                        "validation",
                        self.validator.validate(query, &candidate),
                    )
                    .await
                    {
                        Ok(verdict) => verdict,
                        Err(ResolutionError::Cancelled) => return Err(ResolutionError::Cancelled),
                        Err(err) => {
                            warn!(request_id = %request_id, error = %err, "Validator unavailable, accepting candidate");
                            state.note(format!("VALIDATE: {}, accepting", err));
                            ValidationVerdict::valid()
                        }
                    };

                    if verdict.is_valid {
                        info!(
                            request_id = %request_id,
                            engine = %result.engine_used,
                            refinements = state.refinements,
                            "Answer accepted"
                        );
                        state.note(format!("ACCEPT: answer from {}", result.engine_used));
                        let source = AnswerSource::Engine {
                            engine: result.engine_used.clone(),
                        };
                        return Ok(state.finish(query, candidate, source, Some(command)));
                    }

                    let rejection = ResolutionError::ValidationRejected(
                        verdict.reason.unwrap_or_else(|| "no reason given".to_string()),
                    );
                    warn!(request_id = %request_id, engine = %result.engine_used, error = %rejection, "Answer rejected");
                    state.note(format!("VALIDATE: {}", rejection));
                    reasons.push(format!("{}: {}", result.engine_used, rejection));
                }
                None => {
                    warn!(request_id = %request_id, tried = ?attempt.tried, "No engine succeeded");
                    state.note("ATTEMPT: no engine succeeded");
                }
            }

            // 4️⃣ REFINE
            if state.refinements >= self.limits.max_refinements {
                let exhausted = ResolutionError::RefinementExhausted(state.refinements);
                info!(request_id = %request_id, "{}", exhausted);
                state.note(format!("REFINE: {}", exhausted));
                break;
            }

            state.translator_calls += 1;
            let refined = guarded(
                cancel,
                self.limits.translate_timeout,
                ResolutionError::TranslationUnavailable,
                "refinement",
                self.translator.translate(
                    query,
                    Some(Refinement {
                        previous: &command,
                        reasons: &reasons,
                    }),
                ),
            )
            .await;

            match refined {
                Ok(next) => {
                    let next = options.apply(next);
                    if next.same_request(&command) {
                        info!(request_id = %request_id, "Translator repeated the previous command");
                        state.note("REFINE: no progress, translator repeated the previous command");
                        break;
                    }
                    state.refinements += 1;
                    debug!(request_id = %request_id, round = state.refinements, command = %next, "Refined command");
                    state.note(format!("REFINE: round {}", state.refinements));
                    command = next;
                }
                Err(ResolutionError::Cancelled) => return Err(ResolutionError::Cancelled),
                Err(err) => {
                    warn!(request_id = %request_id, error = %err, "Refinement failed");
                    state.note(format!("REFINE: translator failed ({})", err));
                    break;
                }
            }
        }

        self.generative_fallback(query, state, cancel).await
    }

    // 5️⃣ GENERATIVE_FALLBACK
    async fn generative_fallback(
        &self,
        query: &str,
        mut state: RunState,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let request_id = state.resolution_id;
        state.note("FALLBACK: asking the generative solver");

        let answer = guarded(
            cancel,
            self.limits.fallback_timeout,
            ResolutionError::FallbackFailed,
            "fallback",
            self.fallback.solve(query),
        )
        .await;

        let failure = match answer {
            Ok(answer) if !is_negative_answer(&answer) => {
                info!(request_id = %request_id, "Fallback answer accepted without validation");
                state.note("ACCEPT: generative fallback answer (not validated)");
                return Ok(state.finish(query, normalize_text(&answer), AnswerSource::Fallback, None));
            }
            Ok(answer) => ResolutionError::FallbackFailed(format!(
                "solver could not answer: '{}'",
                answer.trim()
            )),
            Err(ResolutionError::Cancelled) => return Err(ResolutionError::Cancelled),
            Err(err @ ResolutionError::FallbackFailed(_)) => err,
            Err(err) => ResolutionError::FallbackFailed(err.to_string()),
        };

        // 6️⃣ FAIL
        error!(
            request_id = %request_id,
            error = %failure,
            trace = ?state.trace,
            "Resolution failed"
        );
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::{EngineAdapter, EngineRegistry, NativeEngine};
    use crate::models::{ExecutionResult, Operation};
    use crate::verification::RuleValidator;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    //
    // ========== Mock collaborators ==========
    //

    #[derive(Clone)]
    enum Step {
        Command(Command),
        Unsupported(&'static str),
        Fail,
        Hang,
    }

    /// What the translator was told on each call: the previous command and
    /// the reasons, or `None` for the first parse.
    type SeenRefinements = Arc<Mutex<Vec<Option<(Command, Vec<String>)>>>>;

    /// Plays `steps` in order, repeating the last one.
    struct ScriptedTranslator {
        steps: Vec<Step>,
        calls: Arc<AtomicUsize>,
        seen: SeenRefinements,
    }

    impl ScriptedTranslator {
        fn new(steps: Vec<Step>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    steps,
                    calls: calls.clone(),
                    seen: SeenRefinements::default(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl CommandTranslator for ScriptedTranslator {
        async fn translate(&self, _query: &str, refinement: Option<Refinement<'_>>) -> Result<Command> {
            self.seen
                .lock()
                .unwrap()
                .push(refinement.map(|r| (r.previous.clone(), r.reasons.to_vec())));
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.steps[i.min(self.steps.len() - 1)].clone() {
                Step::Command(command) => Ok(command),
                Step::Unsupported(op) => Err(ResolutionError::UnsupportedOperation(op.to_string())),
                Step::Fail => Err(ResolutionError::LlmError("connection refused".to_string())),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ResolutionError::LlmError("unreachable".to_string()))
                }
            }
        }
    }

    /// Always fails and counts how often it ran.
    struct BrokenEngine {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EngineAdapter for BrokenEngine {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn run(&self, _command: &Command) -> ExecutionResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let err = ResolutionError::EchoedUnsolved("output still contains integrate(".to_string());
            ExecutionResult::failed(self.name(), &err, None)
        }
    }

    enum Judge {
        Reject,
        Error,
        Hang,
    }

    #[async_trait]
    impl ResultValidator for Judge {
        async fn validate(&self, _query: &str, _candidate: &FormattedResult) -> Result<ValidationVerdict> {
            match self {
                Judge::Reject => Ok(ValidationVerdict::rejected("answer looks wrong")),
                Judge::Error => Err(ResolutionError::LlmError("503 Service Unavailable".to_string())),
                Judge::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ValidationVerdict::rejected("too late"))
                }
            }
        }
    }

    struct FixedFallback {
        answer: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FallbackSolver for FixedFallback {
        async fn solve(&self, _query: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.to_string())
        }
    }

    fn native_engine() -> ExecutionEngine {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(NativeEngine::new()));
        ExecutionEngine::new(registry, Duration::from_secs(5))
    }

    fn broken_engine() -> (ExecutionEngine, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(BrokenEngine { runs: runs.clone() }));
        (ExecutionEngine::new(registry, Duration::from_secs(5)), runs)
    }

    fn fallback(answer: &'static str) -> (Box<FixedFallback>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(FixedFallback {
                answer,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    fn scripted_orchestrator(
        steps: Vec<Step>,
        engine: ExecutionEngine,
        validator: Box<dyn ResultValidator>,
        fallback: Box<dyn FallbackSolver>,
    ) -> (Orchestrator, Arc<AtomicUsize>) {
        let (translator, calls) = ScriptedTranslator::new(steps);
        (
            Orchestrator::new(Box::new(translator), engine, validator, fallback),
            calls,
        )
    }

    fn cmd(operation: Operation, expression: &str) -> Step {
        Step::Command(Command::new(operation, expression))
    }

    //
    // ========== Tests ==========
    //

    #[tokio::test]
    async fn test_definite_integral_first_attempt() {
        let step = Step::Command(Command::new(Operation::Integrate, "x^2").with_bounds("0", "5"));
        let (fb, fallback_calls) = fallback("unused");
        let (orchestrator, calls) =
            scripted_orchestrator(vec![step], native_engine(), Box::new(create_default_validator()), fb);

        let resolution = orchestrator.run("integrate x^2 from 0 to 5").await.unwrap();

        assert_eq!(resolution.answer.exact, "125/3");
        assert_eq!(resolution.answer.primary, "41.6667");
        assert_eq!(resolution.source, AnswerSource::Engine { engine: "native".to_string() });
        assert_eq!(resolution.refinements, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
        assert!(!resolution.reasoning_trace.is_empty());
    }

    #[tokio::test]
    async fn test_determinant_and_solve() {
        let (fb, _) = fallback("unused");
        let (orchestrator, _) = scripted_orchestrator(
            vec![cmd(Operation::Determinant, "[[1,2],[3,4]]")],
            native_engine(),
            Box::new(create_default_validator()),
            fb,
        );
        let resolution = orchestrator.run("determinant of [[1,2],[3,4]]").await.unwrap();
        assert_eq!(resolution.answer.primary, "-2");

        let (fb, _) = fallback("unused");
        let (orchestrator, _) = scripted_orchestrator(
            vec![cmd(Operation::Solve, "x^2 - 4 = 0")],
            native_engine(),
            Box::new(create_default_validator()),
            fb,
        );
        let resolution = orchestrator.run("solve x^2 - 4 = 0").await.unwrap();
        assert_eq!(resolution.answer.primary, "[-2, 2]");
    }

    #[tokio::test]
    async fn test_translator_failure_evaluates_verbatim() {
        let (fb, _) = fallback("unused");
        let (orchestrator, _) =
            scripted_orchestrator(vec![Step::Fail], native_engine(), Box::new(RuleValidator::new()), fb);

        let resolution = orchestrator.run("2+3*4").await.unwrap();
        assert_eq!(resolution.answer.primary, "14");
        assert_eq!(resolution.command.unwrap().operation, Operation::Evaluate);
    }

    #[tokio::test]
    async fn test_unsupported_operation_skips_engines() {
        let (engine, runs) = broken_engine();
        let (fb, fallback_calls) = fallback("1/(s^2 + 1)");
        let (orchestrator, calls) = scripted_orchestrator(
            vec![Step::Unsupported("laplace")],
            engine,
            Box::new(RuleValidator::new()),
            fb,
        );

        let resolution = orchestrator.run("laplace transform of sin(t)").await.unwrap();
        assert_eq!(resolution.source, AnswerSource::Fallback);
        assert_eq!(resolution.answer.primary, "1/(s^2 + 1)");
        assert!(resolution.command.is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_identical_refinement_stops_immediately() {
        let (engine, runs) = broken_engine();
        let (fb, fallback_calls) = fallback("sqrt(pi)/2*erfi(x)");
        let (orchestrator, calls) = scripted_orchestrator(
            vec![cmd(Operation::Integrate, "e^(x^2)")],
            engine,
            Box::new(RuleValidator::new()),
            fb,
        );

        let resolution = orchestrator.run("integrate e^(x^2)").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(resolution.refinements, 0);
        assert_eq!(resolution.translator_calls, 2);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolution.source, AnswerSource::Fallback);
    }

    #[tokio::test]
    async fn test_translator_calls_are_bounded() {
        let (engine, runs) = broken_engine();
        let (fb, _) = fallback("42");
        let steps = vec![
            cmd(Operation::Integrate, "a"),
            cmd(Operation::Integrate, "b"),
            cmd(Operation::Integrate, "c"),
            cmd(Operation::Integrate, "d"),
            cmd(Operation::Integrate, "e"),
            cmd(Operation::Integrate, "f"),
        ];
        let (orchestrator, calls) =
            scripted_orchestrator(steps, engine, Box::new(RuleValidator::new()), fb);

        let resolution = orchestrator.run("something hard").await.unwrap();
        let max = orchestrator.limits().max_refinements as usize;
        assert_eq!(calls.load(Ordering::SeqCst), 1 + max);
        assert_eq!(runs.load(Ordering::SeqCst), 1 + max);
        assert_eq!(resolution.refinements as usize, max);
        assert!(resolution.reasoning_trace.iter().any(|t| t.contains("Refinement budget exhausted")));
    }

    #[tokio::test]
    async fn test_rejection_drives_refinement() {
        let (fb, fallback_calls) = fallback("-2");
        let steps = vec![
            cmd(Operation::Determinant, "[[1,2],[3,4]]"),
            cmd(Operation::Determinant, "[[1, 2], [3, 4]]"),
        ];
        let (orchestrator, calls) = scripted_orchestrator(steps, native_engine(), Box::new(Judge::Reject), fb);

        let resolution = orchestrator.run("det").await.unwrap();
        // whitespace-only change counts as no progress
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolution.source, AnswerSource::Fallback);
        assert!(resolution
            .reasoning_trace
            .iter()
            .any(|t| t.contains("Validation rejected the answer: answer looks wrong")));
    }

    #[tokio::test]
    async fn test_refinement_carries_previous_command_and_reasons() {
        let first = Command::new(Operation::Determinant, "[[1,2],[3,4]]");
        let second = Command::new(Operation::Determinant, "[[2,0],[0,2]]");
        let (translator, calls) =
            ScriptedTranslator::new(vec![Step::Command(first.clone()), Step::Command(second.clone())]);
        let seen = translator.seen.clone();

        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(BrokenEngine { runs: runs.clone() }));
        registry.register(Arc::new(NativeEngine::new()));
        let (fb, _) = fallback("-2");
        let orchestrator = Orchestrator::new(
            Box::new(translator),
            ExecutionEngine::new(registry, Duration::from_secs(5)),
            Box::new(Judge::Reject),
            fb,
        );

        orchestrator.run("det").await.unwrap();
        // parse, one refinement with progress, one that repeats
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let seen = seen.lock().unwrap();
        assert!(seen[0].is_none());

        let (previous, reasons) = seen[1].clone().unwrap();
        assert_eq!(previous, first);
        assert!(reasons.iter().any(|r| r.starts_with("broken: ") && r.contains("integrate(")));
        assert!(reasons
            .iter()
            .any(|r| r.starts_with("native: ") && r.contains("Validation rejected")));

        let (previous, later_reasons) = seen[2].clone().unwrap();
        assert_eq!(previous, second);
        assert!(later_reasons.len() > reasons.len());
        assert!(later_reasons.starts_with(&reasons));
    }

    #[tokio::test]
    async fn test_validator_error_fails_open() {
        let (fb, fallback_calls) = fallback("unused");
        let (orchestrator, _) = scripted_orchestrator(
            vec![cmd(Operation::Determinant, "[[1,2],[3,4]]")],
            native_engine(),
            Box::new(Judge::Error),
            fb,
        );

        let resolution = orchestrator.run("det").await.unwrap();
        assert_eq!(resolution.answer.primary, "-2");
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validator_timeout_fails_open() {
        let (fb, _) = fallback("unused");
        let (orchestrator, _) = scripted_orchestrator(
            vec![cmd(Operation::Determinant, "[[1,2],[3,4]]")],
            native_engine(),
            Box::new(Judge::Hang),
            fb,
        );

        let resolution = orchestrator.run("det").await.unwrap();
        assert_eq!(resolution.answer.primary, "-2");
        assert!(resolution.reasoning_trace.iter().any(|t| t.contains("timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_translator_timeout_evaluates_verbatim() {
        let (fb, _) = fallback("unused");
        let (orchestrator, _) =
            scripted_orchestrator(vec![Step::Hang], native_engine(), Box::new(RuleValidator::new()), fb);

        let resolution = orchestrator.run("1/3 + 1/6").await.unwrap();
        assert_eq!(resolution.answer.exact, "1/2");
    }

    #[tokio::test]
    async fn test_negative_fallback_is_failure() {
        let (engine, _) = broken_engine();
        let (fb, _) = fallback("CANNOT_SOLVE");
        let (orchestrator, _) = scripted_orchestrator(
            vec![Step::Unsupported("laplace")],
            engine,
            Box::new(RuleValidator::new()),
            fb,
        );

        let err = orchestrator.run("laplace transform of t").await.unwrap_err();
        assert!(matches!(err, ResolutionError::FallbackFailed(_)));
    }

    #[tokio::test]
    async fn test_unavailable_fallback_is_failure() {
        let (engine, _) = broken_engine();
        let (orchestrator, _) = scripted_orchestrator(
            vec![cmd(Operation::Integrate, "e^(x^2)")],
            engine,
            Box::new(RuleValidator::new()),
            Box::new(UnavailableFallback),
        );

        let err = orchestrator.run("integrate e^(x^2)").await.unwrap_err();
        assert!(matches!(err, ResolutionError::FallbackFailed(_)));
    }

    #[tokio::test]
    async fn test_cancelled_request_produces_nothing() {
        let (fb, fallback_calls) = fallback("unused");
        let (orchestrator, calls) =
            scripted_orchestrator(vec![Step::Hang], native_engine(), Box::new(RuleValidator::new()), fb);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = orchestrator
            .run_with_options("1+1", &ResolveOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_caller_engine_hint_overrides_translator() {
        let (fb, _) = fallback("unused");
        let step = Step::Command(Command::new(Operation::Evaluate, "2^10").with_preferred_engine("sympy"));
        let (orchestrator, _) =
            scripted_orchestrator(vec![step], native_engine(), Box::new(RuleValidator::new()), fb);

        let options = ResolveOptions {
            preferred_engine: Some("native".to_string()),
        };
        let resolution = orchestrator
            .run_with_options("2^10", &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution.command.unwrap().preferred_engine.as_deref(), Some("native"));
        assert_eq!(resolution.answer.primary, "1024");
    }

    #[tokio::test]
    async fn test_batch_runs_each_query() {
        let (fb, _) = fallback("unused");
        let (orchestrator, calls) = scripted_orchestrator(
            vec![cmd(Operation::Evaluate, "1+1")],
            native_engine(),
            Box::new(RuleValidator::new()),
            fb,
        );

        let queries = vec!["1+1".to_string(), "1+1".to_string()];
        let results = orchestrator.run_batch(&queries).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.as_ref().map_or(false, |res| res.answer.primary == "2")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_from_config_without_key_uses_offline_collaborators() {
        let orchestrator = Orchestrator::from_config(&ResolverConfig::default()).unwrap();
        assert_eq!(orchestrator.engine_names(), vec!["native", "sympy", "maxima"]);
        assert_eq!(orchestrator.limits().max_refinements, 3);
    }
}
