//! Configuration schema for infocentral.toml.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfocentralConfig {
    /// Base URL of the OpenAI-compatible code-generation oracle.
    pub oracle_api_url: String,

    /// API key for the oracle.
    pub oracle_api_key: String,

    /// Model used for generation and healing calls.
    pub oracle_model: String,

    /// Maximum completion tokens per oracle call.
    pub oracle_max_tokens: u32,

    /// Path to the SQLite database.
    pub db_path: String,

    /// Root directory for materialized code artifacts (one subdirectory
    /// per block, one `v<N>` directory per version).
    pub artifacts_dir: String,

    /// Interpreter used to run generated backend code.
    pub interpreter: String,

    /// Hard wall-clock timeout for one execution, in seconds.
    pub execution_timeout_secs: u64,

    /// Version directories retained per block; older ones are pruned.
    pub keep_versions: usize,

    /// Trailing window bounding automatic heal attempts, in seconds.
    pub heal_window_secs: u32,

    /// Cache TTL applied to new blocks when none is given, in seconds.
    pub default_refresh_interval: u32,

    /// Tick interval of the background refresh daemon, in seconds.
    pub scheduler_tick_secs: u64,

    /// Log level (debug, info, warn, error).
    pub log_level: String,
}

impl Default for InfocentralConfig {
    fn default() -> Self {
        Self {
            oracle_api_url: "https://api.openai.com".into(),
            oracle_api_key: String::new(),
            oracle_model: "gpt-4-1106-preview".into(),
            oracle_max_tokens: 4000,
            db_path: "~/.infocentral/dashboard.db".into(),
            artifacts_dir: "~/.infocentral/generated_code/blocks".into(),
            interpreter: "python3".into(),
            execution_timeout_secs: 30,
            keep_versions: 5,
            heal_window_secs: 3600,
            default_refresh_interval: 3600,
            scheduler_tick_secs: 60,
            log_level: "info".into(),
        }
    }
}

impl InfocentralConfig {
    /// Resolve a path that may contain `~` to an absolute path.
    pub fn resolve_path(&self, path: &str) -> String {
        shellexpand::tilde(path).into_owned()
    }

    /// Resolved database path.
    pub fn resolved_db_path(&self) -> String {
        self.resolve_path(&self.db_path)
    }

    /// Resolved artifacts directory.
    pub fn resolved_artifacts_dir(&self) -> String {
        self.resolve_path(&self.artifacts_dir)
    }
}
