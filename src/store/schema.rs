//! Database schema definitions and migrations.

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Full DDL for the block store.
pub const CREATE_SCHEMA: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

-- User-defined dashboard widgets
CREATE TABLE IF NOT EXISTS blocks (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    user_prompt      TEXT NOT NULL,
    title            TEXT NOT NULL,
    current_version  INTEGER NOT NULL DEFAULT 1,
    refresh_interval INTEGER NOT NULL DEFAULT 3600,
    layout_json      TEXT NOT NULL DEFAULT '{}',
    status           TEXT NOT NULL DEFAULT 'active',
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

-- Generated code artifacts, monotonically numbered per block
CREATE TABLE IF NOT EXISTS block_versions (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    block_id      INTEGER NOT NULL REFERENCES blocks(id),
    version       INTEGER NOT NULL,
    backend_code  TEXT NOT NULL DEFAULT '',
    frontend_code TEXT NOT NULL DEFAULT '',
    explanation   TEXT NOT NULL DEFAULT '',
    status        TEXT NOT NULL DEFAULT 'active',
    created_at    TEXT NOT NULL,
    UNIQUE(block_id, version)
);

-- Cached execution results (append-only)
CREATE TABLE IF NOT EXISTS block_data (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    block_id   INTEGER NOT NULL REFERENCES blocks(id),
    data_json  TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

-- Execution audit trail; also feeds the healing throttle
CREATE TABLE IF NOT EXISTS execution_logs (
    id             TEXT PRIMARY KEY,
    block_id       INTEGER NOT NULL REFERENCES blocks(id),
    version        INTEGER NOT NULL,
    execution_type TEXT NOT NULL,
    success        INTEGER NOT NULL,
    error_message  TEXT,
    duration_ms    INTEGER,
    created_at     TEXT NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_blocks_status ON blocks(status);
CREATE INDEX IF NOT EXISTS idx_versions_block ON block_versions(block_id, version);
CREATE INDEX IF NOT EXISTS idx_data_block_fetched ON block_data(block_id, fetched_at);
CREATE INDEX IF NOT EXISTS idx_logs_block_created ON execution_logs(block_id, created_at);
CREATE INDEX IF NOT EXISTS idx_logs_success ON execution_logs(block_id, success);
"#;
