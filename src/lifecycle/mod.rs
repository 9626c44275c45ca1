//! Lifecycle orchestrator: the central state machine for blocks.
//!
//! Create and Update validate fresh oracle output through the executor
//! before advancing `current_version`; Refresh re-runs the current
//! version and feeds the cache; Heal asks the oracle to fix the latest
//! failure and is invoked automatically from the refresh path under a
//! bounded throttle (at most one attempt per rolling window).

use crate::error::{CoreError, CoreResult};
use crate::executor::CodeRunner;
use crate::oracle::Oracle;
use crate::store::Database;
use crate::types::*;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Orchestrates block lifecycle operations over the version store, the
/// code-generation oracle, and the sandboxed executor.
pub struct Orchestrator {
    store: Arc<Mutex<Database>>,
    oracle: Arc<dyn Oracle>,
    runner: Arc<dyn CodeRunner>,
    heal_window: chrono::Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Mutex<Database>>,
        oracle: Arc<dyn Oracle>,
        runner: Arc<dyn CodeRunner>,
        heal_window_secs: u32,
    ) -> Self {
        Self {
            store,
            oracle,
            runner,
            heal_window: chrono::Duration::seconds(i64::from(heal_window_secs)),
        }
    }

    // -----------------------------------------------------------------------
    // Create / Update / Heal
    // -----------------------------------------------------------------------

    /// Create a new block: generate code, persist version 1, validate it
    /// through the executor. A failed validation degrades the block to
    /// `error` status but still returns the block.
    pub async fn create_block(
        &self,
        prompt: &str,
        title: Option<String>,
        refresh_interval: u32,
    ) -> CoreResult<Block> {
        let generated = self
            .oracle
            .generate(prompt, None)
            .await
            .map_err(oracle_err)?;

        let title = title.unwrap_or_else(|| derive_title(prompt));
        let (block_id, version) = {
            let mut store = self.store.lock().await;
            let block = store.insert_block(prompt, &title, refresh_interval, &default_layout())?;
            let version = store.insert_version(block.id, &generated)?;
            (block.id, version)
        };

        let started = Instant::now();
        match self
            .runner
            .execute(block_id, version, &generated.backend_code)
            .await
        {
            Ok(_) => {
                self.store.lock().await.promote_version(block_id, version)?;
                info!("Block {} created (v{})", block_id, version);
            }
            Err(e) => {
                warn!("Validation of block {} v{} failed: {}", block_id, version, e);
                self.store.lock().await.record_validation_failure(
                    block_id,
                    version,
                    &e.to_string(),
                    elapsed_ms(started),
                )?;
            }
        }

        self.require_block(block_id).await
    }

    /// Iterate on a block: generate a successor version with the previous
    /// code as context, validate it, and advance `current_version` only on
    /// success. A failed version persists in history but is never current.
    pub async fn update_block(&self, block_id: i64, prompt: &str) -> CoreResult<Block> {
        let (block, previous) = {
            let store = self.store.lock().await;
            let block = match store.get_block(block_id)? {
                Some(b) if b.status != BlockStatus::Deleted => b,
                _ => return Err(CoreError::BlockNotFound(block_id)),
            };
            let previous = store.get_version(block_id, block.current_version)?;
            (block, previous)
        };

        let context = GenerationContext {
            original_prompt: block.user_prompt.clone(),
            previous_code: previous.map(|v| v.backend_code),
            iteration: prompt.to_string(),
        };
        let generated = self
            .oracle
            .generate(prompt, Some(&context))
            .await
            .map_err(oracle_err)?;

        let version = self
            .store
            .lock()
            .await
            .insert_version(block_id, &generated)?;

        let started = Instant::now();
        match self
            .runner
            .execute(block_id, version, &generated.backend_code)
            .await
        {
            Ok(_) => {
                self.store.lock().await.promote_version(block_id, version)?;
                info!("Block {} updated to v{}", block_id, version);
            }
            Err(e) => {
                warn!("Validation of block {} v{} failed: {}", block_id, version, e);
                self.store.lock().await.record_validation_failure(
                    block_id,
                    version,
                    &e.to_string(),
                    elapsed_ms(started),
                )?;
            }
        }

        self.require_block(block_id).await
    }

    /// Attempt to heal a block from its most recent failure. All heal
    /// outcomes commit and return the (possibly unchanged) block; only a
    /// missing block or a violated precondition is reported as an error.
    pub async fn heal_block(&self, block_id: i64) -> CoreResult<Block> {
        let block = self.require_block(block_id).await?;
        let (current, last_failure) = {
            let store = self.store.lock().await;
            (
                store.get_version(block_id, block.current_version)?,
                store.latest_failure_log(block_id)?,
            )
        };

        let (Some(current), Some(failure)) = (current, last_failure) else {
            return Err(CoreError::NothingToHeal(
                "block has no current version or no failure history",
            ));
        };

        let pre_heal_version = block.current_version;
        let error_message = failure
            .error_message
            .unwrap_or_else(|| "unknown error".to_string());
        info!(
            "Healing block {} (v{}): {}",
            block_id, pre_heal_version, error_message
        );

        let started = Instant::now();
        let outcome: Result<u32, (Option<u32>, String)> = match self
            .oracle
            .heal(&block.user_prompt, &error_message, &current.backend_code)
            .await
        {
            Err(e) => Err((None, format!("{e:#}"))),
            Ok(mut generated) => {
                generated.explanation = format!("Auto-healed: {}", generated.explanation);
                let inserted = {
                    self.store
                        .lock()
                        .await
                        .insert_version(block_id, &generated)
                };
                match inserted {
                    Err(e) => Err((None, format!("{e:#}"))),
                    Ok(version) => match self
                        .runner
                        .execute(block_id, version, &generated.backend_code)
                        .await
                    {
                        Ok(_) => Ok(version),
                        Err(e) => Err((Some(version), e.to_string())),
                    },
                }
            }
        };
        let duration_ms = elapsed_ms(started);

        match outcome {
            Ok(version) => {
                self.store
                    .lock()
                    .await
                    .record_heal_success(block_id, version, duration_ms)?;
                info!("Block {} healed: v{} promoted", block_id, version);
            }
            Err((rejected, message)) => {
                warn!("Heal of block {} failed: {}", block_id, message);
                // The log is tagged with the pre-heal version, which stays
                // authoritative; the rejected version remains in history.
                self.store.lock().await.record_heal_failure(
                    block_id,
                    pre_heal_version,
                    rejected,
                    &message,
                    duration_ms,
                )?;
            }
        }

        self.require_block(block_id).await
    }

    // -----------------------------------------------------------------------
    // Data paths
    // -----------------------------------------------------------------------

    /// Re-execute the current version and cache the result. On failure,
    /// apply the healing throttle: if this is the first failure inside the
    /// trailing window, heal once and retry once; otherwise (or if the
    /// nested attempt fails) re-raise the original failure.
    pub async fn refresh_data(&self, block_id: i64) -> CoreResult<serde_json::Value> {
        let first_err = match self.try_refresh(block_id).await {
            Ok(data) => return Ok(data),
            Err(e) => e,
        };

        if matches!(first_err, CoreError::Execution(_)) {
            let since = Utc::now() - self.heal_window;
            let recent = {
                self.store
                    .lock()
                    .await
                    .count_recent_failures(block_id, since)
            }
            .unwrap_or(u64::MAX);

            // The failure just logged counts toward the window, so 1 means
            // "first failure in the window".
            if recent <= 1 {
                // The retry follows every completed heal attempt, even one
                // that left the block degraded; only a precondition error
                // skips it.
                match self.heal_block(block_id).await {
                    Ok(_) => {
                        if let Ok(data) = self.try_refresh(block_id).await {
                            return Ok(data);
                        }
                    }
                    Err(e) => debug!("Auto-heal of block {} failed: {}", block_id, e),
                }
            } else {
                debug!(
                    "Skipping auto-heal for block {}: {} failures in window",
                    block_id, recent
                );
            }
        }

        Err(first_err)
    }

    /// One refresh execution without heal policy.
    async fn try_refresh(&self, block_id: i64) -> CoreResult<serde_json::Value> {
        let block = self.require_block(block_id).await?;
        let current = {
            self.store
                .lock()
                .await
                .get_version(block_id, block.current_version)?
        }
        .ok_or(CoreError::VersionNotFound {
            block_id,
            version: block.current_version,
        })?;

        let started = Instant::now();
        match self
            .runner
            .execute(block_id, block.current_version, &current.backend_code)
            .await
        {
            Ok(data) => {
                let expires_at =
                    Utc::now() + chrono::Duration::seconds(i64::from(block.refresh_interval));
                self.store.lock().await.record_refresh_success(
                    block_id,
                    block.current_version,
                    &data,
                    expires_at,
                    elapsed_ms(started),
                )?;
                Ok(data)
            }
            Err(e) => {
                warn!(
                    "Refresh of block {} (v{}) failed: {}",
                    block_id, block.current_version, e
                );
                self.store.lock().await.log_fetch_failure(
                    block_id,
                    block.current_version,
                    &e.to_string(),
                    elapsed_ms(started),
                )?;
                Err(CoreError::Execution(e))
            }
        }
    }

    /// Cache-aware data path: serve an unexpired cache row, otherwise
    /// refresh. Unlike [`Self::refresh_data`], this never re-executes
    /// while the cache is live.
    pub async fn get_data(&self, block_id: i64) -> CoreResult<DataEnvelope> {
        self.require_block(block_id).await?;

        if let Some(cached) = { self.store.lock().await.latest_block_data(block_id)? } {
            if !cached.is_expired(Utc::now()) {
                return Ok(DataEnvelope {
                    data: cached.data,
                    cached: true,
                    fetched_at: cached.fetched_at,
                });
            }
        }

        let data = self.refresh_data(block_id).await?;
        Ok(DataEnvelope {
            data,
            cached: false,
            fetched_at: Utc::now(),
        })
    }

    // -----------------------------------------------------------------------
    // Metadata operations
    // -----------------------------------------------------------------------

    /// Soft-delete a block; its versions, cache rows, and logs remain.
    pub async fn delete_block(&self, block_id: i64) -> CoreResult<()> {
        self.require_block(block_id).await?;
        self.store.lock().await.soft_delete(block_id)?;
        info!("Block {} deleted", block_id);
        Ok(())
    }

    /// Pure metadata mutation; no execution involved.
    pub async fn update_layout(&self, block_id: i64, layout: serde_json::Value) -> CoreResult<()> {
        self.require_block(block_id).await?;
        self.store.lock().await.update_layout(block_id, &layout)?;
        Ok(())
    }

    /// All non-deleted blocks.
    pub async fn list_blocks(&self) -> CoreResult<Vec<Block>> {
        Ok(self.store.lock().await.list_blocks()?)
    }

    /// One block by id.
    pub async fn get_block(&self, block_id: i64) -> CoreResult<Block> {
        self.require_block(block_id).await
    }

    /// All versions of a block, newest first.
    pub async fn list_versions(&self, block_id: i64) -> CoreResult<Vec<BlockVersion>> {
        self.require_block(block_id).await?;
        Ok(self.store.lock().await.list_versions(block_id)?)
    }

    /// Execution audit trail of a block, newest first.
    pub async fn list_logs(&self, block_id: i64) -> CoreResult<Vec<ExecutionLog>> {
        self.require_block(block_id).await?;
        Ok(self.store.lock().await.list_logs(block_id)?)
    }

    async fn require_block(&self, block_id: i64) -> CoreResult<Block> {
        let store = self.store.lock().await;
        match store.get_block(block_id)? {
            Some(block) if block.status != BlockStatus::Deleted => Ok(block),
            _ => Err(CoreError::BlockNotFound(block_id)),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn oracle_err(e: anyhow::Error) -> CoreError {
    CoreError::Oracle(format!("{e:#}"))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Default title: the first few words of the prompt, capitalized.
fn derive_title(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .take(4)
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn default_layout() -> serde_json::Value {
    json!({"x": 0, "y": 0, "w": 6, "h": 4})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn sample_code(tag: &str) -> GeneratedCode {
        GeneratedCode {
            backend_code: format!("class BlockExecutor:  # {tag}\n    pass"),
            frontend_code: "export function GeneratedBlock() {}".into(),
            explanation: format!("generated for {tag}"),
        }
    }

    /// Oracle mock: pops scripted results, falls back to success, and
    /// records calls and the last context it saw.
    struct ScriptedOracle {
        replies: StdMutex<VecDeque<anyhow::Result<GeneratedCode>>>,
        generate_calls: AtomicUsize,
        heal_calls: AtomicUsize,
        last_context: StdMutex<Option<GenerationContext>>,
    }

    impl ScriptedOracle {
        fn new() -> Self {
            Self {
                replies: StdMutex::new(VecDeque::new()),
                generate_calls: AtomicUsize::new(0),
                heal_calls: AtomicUsize::new(0),
                last_context: StdMutex::new(None),
            }
        }

        fn push(&self, reply: anyhow::Result<GeneratedCode>) {
            self.replies.lock().unwrap().push_back(reply);
        }

        fn next_reply(&self, tag: &str) -> anyhow::Result<GeneratedCode> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(sample_code(tag)))
        }
    }

    #[async_trait]
    impl Oracle for ScriptedOracle {
        async fn generate(
            &self,
            prompt: &str,
            context: Option<&GenerationContext>,
        ) -> anyhow::Result<GeneratedCode> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_context.lock().unwrap() = context.cloned();
            self.next_reply(prompt)
        }

        async fn heal(
            &self,
            original_prompt: &str,
            _error_message: &str,
            _failed_code: &str,
        ) -> anyhow::Result<GeneratedCode> {
            self.heal_calls.fetch_add(1, Ordering::SeqCst);
            self.next_reply(original_prompt)
        }
    }

    /// Runner mock: pops scripted outcomes, falls back to success.
    struct ScriptedRunner {
        outcomes: StdMutex<VecDeque<Result<Value, ExecutionError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedRunner {
        fn new() -> Self {
            Self {
                outcomes: StdMutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn push_ok(&self, value: Value) {
            self.outcomes.lock().unwrap().push_back(Ok(value));
        }

        fn push_failure(&self, stderr: &str) {
            self.outcomes
                .lock()
                .unwrap()
                .push_back(Err(ExecutionError::NonZeroExit {
                    code: 1,
                    stderr: stderr.into(),
                }));
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CodeRunner for ScriptedRunner {
        async fn execute(
            &self,
            _block_id: i64,
            _version: u32,
            _code: &str,
        ) -> Result<Value, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(serde_json::json!({"ok": true})))
        }
    }

    struct Harness {
        orch: Orchestrator,
        store: Arc<Mutex<Database>>,
        oracle: Arc<ScriptedOracle>,
        runner: Arc<ScriptedRunner>,
    }

    fn harness() -> Harness {
        let store = Arc::new(Mutex::new(Database::open_memory().unwrap()));
        let oracle = Arc::new(ScriptedOracle::new());
        let runner = Arc::new(ScriptedRunner::new());
        let orch = Orchestrator::new(store.clone(), oracle.clone(), runner.clone(), 3600);
        Harness {
            orch,
            store,
            oracle,
            runner,
        }
    }

    #[tokio::test]
    async fn create_success_activates_version_one() {
        let h = harness();
        let block = h
            .orch
            .create_block("NYC weather", None, 3600)
            .await
            .unwrap();

        assert_eq!(block.status, BlockStatus::Active);
        assert_eq!(block.current_version, 1);
        assert_eq!(block.title, "NYC Weather");
        assert_eq!(h.runner.call_count(), 1);

        let store = h.store.lock().await;
        let v1 = store.get_version(block.id, 1).unwrap().unwrap();
        assert_eq!(v1.status, VersionStatus::Active);
    }

    #[tokio::test]
    async fn create_failure_persists_failed_version_one() {
        let h = harness();
        h.runner.push_failure("NameError: undefined");

        let block = h
            .orch
            .create_block("broken widget", None, 3600)
            .await
            .unwrap();

        assert_eq!(block.status, BlockStatus::Error);
        assert_eq!(block.current_version, 1);

        let store = h.store.lock().await;
        let v1 = store.get_version(block.id, 1).unwrap().unwrap();
        assert_eq!(v1.status, VersionStatus::Failed);

        let log = store.latest_failure_log(block.id).unwrap().unwrap();
        assert_eq!(log.execution_type, ExecutionType::Fetch);
        assert_eq!(log.version, 1);
        assert!(log.error_message.unwrap().contains("NameError"));
    }

    #[tokio::test]
    async fn oracle_failure_during_create_is_reported() {
        let h = harness();
        h.oracle.push(Err(anyhow!("model unavailable")));

        let err = h.orch.create_block("anything", None, 3600).await.unwrap_err();
        assert!(matches!(err, CoreError::Oracle(_)));
        assert_eq!(h.runner.call_count(), 0);
    }

    #[tokio::test]
    async fn update_success_advances_current_version() {
        let h = harness();
        let block = h
            .orch
            .create_block("NYC weather", None, 3600)
            .await
            .unwrap();

        let updated = h
            .orch
            .update_block(block.id, "also show humidity")
            .await
            .unwrap();

        assert_eq!(updated.current_version, 2);
        assert_eq!(updated.status, BlockStatus::Active);

        // Iteration context carried the previous backend code
        let ctx = h.oracle.last_context.lock().unwrap().clone().unwrap();
        assert_eq!(ctx.original_prompt, "NYC weather");
        assert_eq!(ctx.iteration, "also show humidity");
        assert!(ctx.previous_code.is_some());

        let store = h.store.lock().await;
        assert_eq!(
            store.get_version(block.id, 1).unwrap().unwrap().status,
            VersionStatus::Deprecated
        );
    }

    #[tokio::test]
    async fn update_failure_keeps_previous_version_current() {
        let h = harness();
        let block = h
            .orch
            .create_block("NYC weather", None, 3600)
            .await
            .unwrap();

        h.runner.push_failure("TypeError");
        let updated = h.orch.update_block(block.id, "break it").await.unwrap();

        assert_eq!(updated.current_version, 1);
        assert_eq!(updated.status, BlockStatus::Error);

        let store = h.store.lock().await;
        let v2 = store.get_version(block.id, 2).unwrap().unwrap();
        assert_eq!(v2.status, VersionStatus::Failed);
        let log = store.latest_failure_log(block.id).unwrap().unwrap();
        assert_eq!(log.version, 2);
    }

    #[tokio::test]
    async fn heal_without_failure_history_is_rejected() {
        let h = harness();
        let block = h
            .orch
            .create_block("NYC weather", None, 3600)
            .await
            .unwrap();

        let err = h.orch.heal_block(block.id).await.unwrap_err();
        assert!(matches!(err, CoreError::NothingToHeal(_)));
    }

    #[tokio::test]
    async fn heal_success_promotes_healed_version() {
        let h = harness();
        h.runner.push_failure("NameError");
        let block = h.orch.create_block("broken", None, 3600).await.unwrap();
        assert_eq!(block.status, BlockStatus::Error);

        let healed = h.orch.heal_block(block.id).await.unwrap();
        assert_eq!(healed.status, BlockStatus::Active);
        assert_eq!(healed.current_version, 2);
        assert_eq!(h.oracle.heal_calls.load(Ordering::SeqCst), 1);

        let store = h.store.lock().await;
        let v2 = store.get_version(block.id, 2).unwrap().unwrap();
        assert!(v2.explanation.starts_with("Auto-healed:"));
        let logs = store.list_logs(block.id).unwrap();
        assert!(logs
            .iter()
            .any(|l| l.execution_type == ExecutionType::Heal && l.success));
    }

    #[tokio::test]
    async fn failed_heal_logs_pre_heal_version() {
        let h = harness();
        h.runner.push_failure("NameError");
        let block = h.orch.create_block("broken", None, 3600).await.unwrap();

        h.runner.push_failure("still broken");
        let healed = h.orch.heal_block(block.id).await.unwrap();

        assert_eq!(healed.current_version, 1);

        let store = h.store.lock().await;
        let log = store.latest_failure_log(block.id).unwrap().unwrap();
        assert_eq!(log.execution_type, ExecutionType::Heal);
        assert_eq!(log.version, 1);
        assert_eq!(
            store.get_version(block.id, 2).unwrap().unwrap().status,
            VersionStatus::Failed
        );
    }

    #[tokio::test]
    async fn get_data_serves_cache_without_re_executing() {
        let h = harness();
        let block = h
            .orch
            .create_block("NYC weather", None, 3600)
            .await
            .unwrap();

        h.runner.push_ok(serde_json::json!({"temp": 21}));
        let first = h.orch.get_data(block.id).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.data["temp"], 21);
        let calls_after_first = h.runner.call_count();

        let second = h.orch.get_data(block.id).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.data, first.data);
        assert_eq!(h.runner.call_count(), calls_after_first);
    }

    #[tokio::test]
    async fn explicit_refresh_always_re_executes() {
        let h = harness();
        let block = h
            .orch
            .create_block("NYC weather", None, 3600)
            .await
            .unwrap();
        let calls_before = h.runner.call_count();

        h.orch.refresh_data(block.id).await.unwrap();
        h.orch.refresh_data(block.id).await.unwrap();
        assert_eq!(h.runner.call_count(), calls_before + 2);
    }

    #[tokio::test]
    async fn expired_cache_triggers_refresh() {
        let h = harness();
        // refresh_interval of zero expires the cache immediately
        let block = h.orch.create_block("NYC weather", None, 0).await.unwrap();

        h.orch.refresh_data(block.id).await.unwrap();
        let calls_after_refresh = h.runner.call_count();

        let envelope = h.orch.get_data(block.id).await.unwrap();
        assert!(!envelope.cached);
        assert_eq!(h.runner.call_count(), calls_after_refresh + 1);
    }

    #[tokio::test]
    async fn first_failure_in_window_heals_and_retries_once() {
        let h = harness();
        let block = h
            .orch
            .create_block("NYC weather", None, 3600)
            .await
            .unwrap();

        // Refresh fails, heal validation passes, retried refresh succeeds
        h.runner.push_failure("connection reset");
        h.runner.push_ok(serde_json::json!({"healed": true}));
        h.runner.push_ok(serde_json::json!({"temp": 19}));

        let data = h.orch.refresh_data(block.id).await.unwrap();
        assert_eq!(data["temp"], 19);
        assert_eq!(h.oracle.heal_calls.load(Ordering::SeqCst), 1);

        let healed = h.orch.get_block(block.id).await.unwrap();
        assert_eq!(healed.current_version, 2);
    }

    #[tokio::test]
    async fn second_failure_in_window_skips_healing() {
        let h = harness();
        let block = h
            .orch
            .create_block("NYC weather", None, 3600)
            .await
            .unwrap();

        // First failure: heal succeeds, retry succeeds
        h.runner.push_failure("flaky upstream");
        h.runner.push_ok(serde_json::json!({"healed": true}));
        h.runner.push_ok(serde_json::json!({"temp": 19}));
        h.orch.refresh_data(block.id).await.unwrap();

        // Second failure within the window: no further automated heal
        h.runner.push_failure("flaky upstream again");
        let err = h.orch.refresh_data(block.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Execution(_)));
        assert_eq!(h.oracle.heal_calls.load(Ordering::SeqCst), 1);

        // Third failure: still throttled
        h.runner.push_failure("and again");
        let err = h.orch.refresh_data(block.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Execution(_)));
        assert_eq!(h.oracle.heal_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_nested_heal_re_raises_original_failure() {
        let h = harness();
        let block = h
            .orch
            .create_block("NYC weather", None, 3600)
            .await
            .unwrap();

        // Refresh fails, heal validation fails, and the retried refresh
        // fails again; the first error is what the caller sees
        h.runner.push_failure("connection reset");
        h.runner.push_failure("heal candidate also broken");
        h.runner.push_failure("retry also failed");

        let err = h.orch.refresh_data(block.id).await.unwrap_err();
        match err {
            CoreError::Execution(ExecutionError::NonZeroExit { stderr, .. }) => {
                assert!(stderr.contains("connection reset"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // create + refresh + heal validation + retried refresh
        assert_eq!(h.runner.call_count(), 4);

        let block = h.orch.get_block(block.id).await.unwrap();
        assert_eq!(block.current_version, 1);
    }

    #[tokio::test]
    async fn retry_follows_heal_even_when_block_stays_degraded() {
        let store = Arc::new(Mutex::new(Database::open_memory().unwrap()));
        let oracle = Arc::new(ScriptedOracle::new());
        let runner = Arc::new(ScriptedRunner::new());
        // Window of zero keeps the throttle out of this scenario
        let orch = Orchestrator::new(store, oracle.clone(), runner.clone(), 0);

        runner.push_failure("NameError");
        let block = orch.create_block("broken", None, 3600).await.unwrap();
        assert_eq!(block.status, BlockStatus::Error);

        // Refresh fails and heal validation fails too, but the retried
        // refresh of the unchanged current version succeeds
        runner.push_failure("still failing");
        runner.push_failure("heal candidate also broken");
        runner.push_ok(serde_json::json!({"temp": 5}));

        let data = orch.refresh_data(block.id).await.unwrap();
        assert_eq!(data["temp"], 5);
        assert_eq!(oracle.heal_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deleted_blocks_are_not_found() {
        let h = harness();
        let block = h
            .orch
            .create_block("NYC weather", None, 3600)
            .await
            .unwrap();

        h.orch.delete_block(block.id).await.unwrap();

        assert!(matches!(
            h.orch.get_data(block.id).await.unwrap_err(),
            CoreError::BlockNotFound(_)
        ));
        assert!(matches!(
            h.orch.update_block(block.id, "change it").await.unwrap_err(),
            CoreError::BlockNotFound(_)
        ));
        assert!(h.orch.list_blocks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn layout_update_touches_no_execution() {
        let h = harness();
        let block = h
            .orch
            .create_block("NYC weather", None, 3600)
            .await
            .unwrap();
        let calls = h.runner.call_count();

        h.orch
            .update_layout(block.id, serde_json::json!({"x": 3, "y": 1, "w": 4, "h": 2}))
            .await
            .unwrap();

        let block = h.orch.get_block(block.id).await.unwrap();
        assert_eq!(block.layout["x"], 3);
        assert_eq!(h.runner.call_count(), calls);
    }

    #[test]
    fn title_derivation_takes_first_words() {
        assert_eq!(derive_title("NYC weather"), "NYC Weather");
        assert_eq!(
            derive_title("bitcoin price in usd with sparkline"),
            "Bitcoin Price In Usd"
        );
    }
}
