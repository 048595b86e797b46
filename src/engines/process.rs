//! Subprocess runner shared by the external CAS adapters

use crate::error::ResolutionError;
use crate::Result;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const PROBE_ATTEMPTS: u32 = 3;
const PROBE_BACKOFF: Duration = Duration::from_millis(200);
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Runs scripts through one interpreter binary. The readiness probe runs at
/// most once per runner; its outcome is reused by every later call.
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
    probe_args: Vec<String>,
    pub(super) timeout: Duration,
    pub(super) ready: OnceCell<bool>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, args: &[&str], probe_args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            probe_args: probe_args.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(30),
            ready: OnceCell::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Fails with `EngineUnavailable` when the probe never succeeded.
    pub async fn ensure_ready(&self) -> Result<()> {
        let ready = *self.ready.get_or_init(|| self.probe()).await;
        if ready {
            Ok(())
        } else {
            Err(ResolutionError::EngineUnavailable(format!(
                "{} did not pass its readiness probe",
                self.program
            )))
        }
    }

    async fn probe(&self) -> bool {
        for attempt in 1..=PROBE_ATTEMPTS {
            let status = tokio::time::timeout(
                PROBE_TIMEOUT,
                Command::new(&self.program)
                    .args(&self.probe_args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .status(),
            )
            .await;

            match status {
                Ok(Ok(status)) if status.success() => {
                    info!(program = %self.program, attempt, "Engine backend ready");
                    return true;
                }
                Ok(Ok(status)) => {
                    debug!(program = %self.program, attempt, %status, "Readiness probe failed")
                }
                Ok(Err(e)) => {
                    debug!(program = %self.program, attempt, error = %e, "Readiness probe could not start")
                }
                Err(_) => debug!(program = %self.program, attempt, "Readiness probe timed out"),
            }

            if attempt < PROBE_ATTEMPTS {
                tokio::time::sleep(PROBE_BACKOFF).await;
            }
        }

        warn!(program = %self.program, attempts = PROBE_ATTEMPTS, "Engine backend unavailable");
        false
    }

    /// Feeds `script` on stdin and returns stdout.
    pub async fn run_script(&self, script: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ResolutionError::EngineUnavailable(format!("failed to start {}: {}", self.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ResolutionError::ExecutionException(format!(
                    "{} timed out after {}ms",
                    self.program,
                    self.timeout.as_millis()
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            return Err(ResolutionError::ExecutionException(if detail.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                detail.to_string()
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Value of the first `TAG:` line in `stdout`.
pub fn tagged_line<'a>(stdout: &'a str, tag: &str) -> Option<&'a str> {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(tag))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_goes_through_stdin() {
        let runner = ProcessRunner::new("sh", &[], &["-c", "true"]);
        runner.ensure_ready().await.unwrap();
        let out = runner.run_script("echo RESULT: 42\n").await.unwrap();
        assert_eq!(tagged_line(&out, "RESULT:"), Some("42"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_execution_failure() {
        let runner = ProcessRunner::new("sh", &[], &[]);
        let err = runner.run_script("echo boom >&2; exit 3\n").await.unwrap_err();
        match err {
            ResolutionError::ExecutionException(detail) => assert_eq!(detail, "boom"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = ProcessRunner::new("sh", &[], &[]).with_timeout(Duration::from_millis(100));
        let err = runner.run_script("sleep 5\n").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let runner = ProcessRunner::new("definitely-not-a-cas-binary", &[], &["--version"]);
        assert!(matches!(
            runner.ensure_ready().await,
            Err(ResolutionError::EngineUnavailable(_))
        ));
        // memoized: the second call does not probe again
        assert!(runner.ready.get().is_some());
        assert!(matches!(
            runner.run_script("1").await,
            Err(ResolutionError::EngineUnavailable(_))
        ));
    }
}
