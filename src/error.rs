//! Error taxonomy for the block lifecycle.
//!
//! `ExecutionError` variants are recovered locally during create/update
//! (the block degrades to `error` status) and trigger the bounded auto-heal
//! during refresh. Everything else propagates to the caller.

use thiserror::Error;

/// Typed failure of one sandboxed execution attempt.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The child process exited non-zero; message drawn from stderr.
    #[error("execution failed (exit code {code}): {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    /// The wall-clock timeout elapsed and the child was killed.
    #[error("execution timed out after {0}s")]
    Timeout(u64),

    /// The child exited zero but stdout was not a single JSON document.
    #[error("executor did not produce valid JSON: {0}")]
    InvalidOutput(String),

    /// Materializing artifacts or spawning the child failed.
    #[error("executor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error type surfaced by the lifecycle orchestrator.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("block {0} not found")]
    BlockNotFound(i64),

    #[error("version {version} not found for block {block_id}")]
    VersionNotFound { block_id: i64, version: u32 },

    /// The generation call errored or returned unusable output.
    #[error("oracle failure: {0}")]
    Oracle(String),

    /// Heal precondition violated: no current version or no failure history.
    #[error("nothing to heal: {0}")]
    NothingToHeal(&'static str),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Unexpected store or runtime failure; never retried implicitly.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
