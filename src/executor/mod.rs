//! Sandboxed executor: runs one version's generated code to completion or
//! timeout in an isolated child process.
//!
//! The executor never retries; retry and heal policy belong entirely to
//! the lifecycle orchestrator.

pub mod wrapper;

use crate::error::ExecutionError;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Interface the orchestrator consumes to run one code payload.
/// Implemented by [`Executor`] for production and by scripted mocks
/// in tests.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Execute a code payload for a block version and return the JSON
    /// payload it printed, or a typed failure.
    async fn execute(
        &self,
        block_id: i64,
        version: u32,
        code: &str,
    ) -> Result<Value, ExecutionError>;
}

/// Child-process executor with artifact materialization and retention.
pub struct Executor {
    artifacts_dir: PathBuf,
    interpreter: String,
    timeout: Duration,
    keep_versions: usize,
}

impl Executor {
    pub fn new(
        artifacts_dir: impl Into<PathBuf>,
        interpreter: &str,
        timeout_secs: u64,
        keep_versions: usize,
    ) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
            interpreter: interpreter.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            keep_versions,
        }
    }

    /// Stable per-block, per-version artifact directory.
    fn version_dir(&self, block_id: i64, version: u32) -> PathBuf {
        self.artifacts_dir
            .join(block_id.to_string())
            .join(format!("v{version}"))
    }

    /// Write the wrapped code and its launcher; rewritten on every run so
    /// re-execution of the same version always sees current artifacts.
    async fn materialize(
        &self,
        block_id: i64,
        version: u32,
        code: &str,
    ) -> Result<PathBuf, ExecutionError> {
        let dir = self.version_dir(block_id, version);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("block_executor.py"), wrapper::wrap(code)).await?;

        let script = dir.join("execute.py");
        tokio::fs::write(&script, wrapper::LAUNCHER).await?;
        Ok(script)
    }

    /// Best-effort retention: keep the most recent `keep_versions` version
    /// directories for a block, delete the rest. Never fails the caller.
    pub fn prune_versions(&self, block_id: i64) {
        let block_dir = self.artifacts_dir.join(block_id.to_string());
        let entries = match std::fs::read_dir(&block_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let mut versions: Vec<(u32, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(n) = name
                .to_string_lossy()
                .strip_prefix('v')
                .and_then(|s| s.parse::<u32>().ok())
            {
                versions.push((n, path));
            }
        }

        versions.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in versions.into_iter().skip(self.keep_versions) {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                debug!("Failed to prune old version dir {:?}: {}", path, e);
            }
        }
    }
}

#[async_trait]
impl CodeRunner for Executor {
    async fn execute(
        &self,
        block_id: i64,
        version: u32,
        code: &str,
    ) -> Result<Value, ExecutionError> {
        let script = self.materialize(block_id, version, code).await?;

        debug!("Executing block {} v{} via {:?}", block_id, version, script);

        let child = Command::new(&self.interpreter)
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            // Dropping the wait future drops the child handle, and
            // kill_on_drop terminates the process.
            Err(_) => return Err(ExecutionError::Timeout(self.timeout.as_secs())),
        };

        let outcome = classify(&output);
        self.prune_versions(block_id);
        outcome
    }
}

/// Parent-side outcome classification of a finished child process.
fn classify(output: &std::process::Output) -> Result<Value, ExecutionError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stderr = if stderr.is_empty() {
            "unknown execution error".to_string()
        } else {
            stderr
        };
        return Err(ExecutionError::NonZeroExit {
            code: output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).map_err(|_| ExecutionError::InvalidOutput(preview(&stdout)))
}

/// Short preview of non-JSON output for error messages.
fn preview(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() <= 200 {
        trimmed.to_string()
    } else {
        let mut end = 200;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Output};

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn zero_exit_with_json_is_success() {
        let result = classify(&output(0, "{\"temp\": 21}\n", "")).unwrap();
        assert_eq!(result["temp"], 21);
    }

    #[test]
    fn non_zero_exit_reports_stderr() {
        let err = classify(&output(1, "", "Traceback: boom")).unwrap_err();
        match err {
            ExecutionError::NonZeroExit { code, stderr } => {
                assert_eq!(code, 1);
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_zero_exit_with_empty_stderr_gets_placeholder() {
        let err = classify(&output(2, "", "  ")).unwrap_err();
        match err {
            ExecutionError::NonZeroExit { stderr, .. } => {
                assert_eq!(stderr, "unknown execution error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_exit_with_non_json_is_invalid_output() {
        let err = classify(&output(0, "hello world", "")).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidOutput(_)));
    }

    #[test]
    fn retention_keeps_most_recent_version_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = Executor::new(tmp.path(), "python3", 30, 5);

        let block_dir = tmp.path().join("7");
        for v in 1..=8 {
            std::fs::create_dir_all(block_dir.join(format!("v{v}"))).unwrap();
        }
        // Unrelated entries are left alone
        std::fs::create_dir_all(block_dir.join("scratch")).unwrap();

        executor.prune_versions(7);

        let mut remaining: Vec<String> = std::fs::read_dir(&block_dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec!["scratch", "v4", "v5", "v6", "v7", "v8"]);
    }

    #[test]
    fn retention_is_a_no_op_for_missing_block_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = Executor::new(tmp.path(), "python3", 30, 5);
        executor.prune_versions(404);
    }
}
