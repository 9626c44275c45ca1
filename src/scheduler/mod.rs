//! Background refresh daemon that keeps block caches warm.
//!
//! Every tick it scans active blocks and refreshes the ones whose cache
//! is missing or expired. Per-block failures are logged and never stop
//! the scan; the healing throttle inside the orchestrator still applies.

use crate::lifecycle::Orchestrator;
use crate::store::Database;
use crate::types::BlockStatus;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Background refresh daemon.
pub struct RefreshDaemon {
    orchestrator: Arc<Orchestrator>,
    store: Arc<Mutex<Database>>,
    tick_interval: tokio::time::Duration,
}

impl RefreshDaemon {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        store: Arc<Mutex<Database>>,
        tick_secs: u64,
    ) -> Self {
        Self {
            orchestrator,
            store,
            tick_interval: tokio::time::Duration::from_secs(tick_secs),
        }
    }

    /// Run the refresh loop (call from a tokio::spawn).
    ///
    /// The loop exits cooperatively when `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("Refresh daemon started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {
                    if let Err(e) = self.tick().await {
                        error!("Refresh tick failed: {e}");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("Refresh daemon shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Process one tick: refresh every active block whose cache is stale.
    ///
    /// Individual block failures are logged and do not stop other blocks.
    /// Infrastructure errors (e.g. a failed block listing) are propagated.
    pub async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let due = {
            let store = self.store.lock().await;
            let mut due = Vec::new();
            for block in store.list_blocks()? {
                if block.status != BlockStatus::Active {
                    continue;
                }
                let stale = match store.latest_block_data(block.id)? {
                    Some(cached) => cached.is_expired(now),
                    None => true,
                };
                if stale {
                    due.push(block.id);
                }
            }
            due
        };

        if due.is_empty() {
            return Ok(());
        }
        debug!("Refreshing {} stale block(s)", due.len());

        for block_id in due {
            if let Err(e) = self.orchestrator.refresh_data(block_id).await {
                warn!("Scheduled refresh of block {} failed: {}", block_id, e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use crate::executor::CodeRunner;
    use crate::oracle::Oracle;
    use crate::types::{GeneratedCode, GenerationContext};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticOracle;

    #[async_trait]
    impl Oracle for StaticOracle {
        async fn generate(
            &self,
            _prompt: &str,
            _context: Option<&GenerationContext>,
        ) -> anyhow::Result<GeneratedCode> {
            Ok(GeneratedCode {
                backend_code: "class BlockExecutor:\n    pass".into(),
                frontend_code: String::new(),
                explanation: "static".into(),
            })
        }

        async fn heal(
            &self,
            _original_prompt: &str,
            _error_message: &str,
            _failed_code: &str,
        ) -> anyhow::Result<GeneratedCode> {
            anyhow::bail!("healing disabled in this test")
        }
    }

    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CodeRunner for CountingRunner {
        async fn execute(
            &self,
            _block_id: i64,
            _version: u32,
            _code: &str,
        ) -> Result<Value, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"tick": true}))
        }
    }

    fn daemon(tick_secs: u64) -> (RefreshDaemon, Arc<Orchestrator>, Arc<CountingRunner>) {
        let store = Arc::new(Mutex::new(Database::open_memory().unwrap()));
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
        });
        let orch = Arc::new(Orchestrator::new(
            store.clone(),
            Arc::new(StaticOracle),
            runner.clone(),
            3600,
        ));
        let daemon = RefreshDaemon::new(orch.clone(), store, tick_secs);
        (daemon, orch, runner)
    }

    #[tokio::test]
    async fn tick_refreshes_blocks_without_cache() {
        let (daemon, orch, runner) = daemon(60);
        let block = orch.create_block("NYC weather", None, 3600).await.unwrap();
        let calls_after_create = runner.calls.load(Ordering::SeqCst);

        daemon.tick().await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), calls_after_create + 1);

        let store_data = orch.get_data(block.id).await.unwrap();
        assert!(store_data.cached);
    }

    #[tokio::test]
    async fn tick_skips_blocks_with_live_cache() {
        let (daemon, orch, runner) = daemon(60);
        orch.create_block("NYC weather", None, 3600).await.unwrap();

        daemon.tick().await.unwrap();
        let calls = runner.calls.load(Ordering::SeqCst);

        // Cache is still live, nothing to do
        daemon.tick().await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn tick_refreshes_expired_caches_every_time() {
        let (daemon, orch, runner) = daemon(60);
        // Interval zero makes every cache row immediately stale
        orch.create_block("NYC weather", None, 0).await.unwrap();

        daemon.tick().await.unwrap();
        let calls = runner.calls.load(Ordering::SeqCst);
        daemon.tick().await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), calls + 1);
    }

    #[tokio::test]
    async fn tick_ignores_degraded_blocks() {
        let (daemon, orch, runner) = daemon(60);
        let block = orch.create_block("NYC weather", None, 0).await.unwrap();
        orch.delete_block(block.id).await.unwrap();

        let calls = runner.calls.load(Ordering::SeqCst);
        daemon.tick().await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), calls);
    }
}
