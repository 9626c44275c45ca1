//! SQLite block store with WAL mode and migration support.
//!
//! Every compound lifecycle write (version assignment, promotion, failure
//! recording, cache insertion) commits as a single transaction so one
//! lifecycle step lands entirely or not at all.

use crate::store::schema;
use crate::types::*;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::info;

/// The block store database.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema creation and migrations.
    fn migrate(&mut self) -> Result<()> {
        let version = self.schema_version();

        if version == 0 {
            info!("Creating database schema v{}", schema::SCHEMA_VERSION);
            self.conn
                .execute_batch(schema::CREATE_SCHEMA)
                .context("Failed to create schema")?;
            self.conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![schema::SCHEMA_VERSION],
            )?;
        } else if version < schema::SCHEMA_VERSION {
            self.conn.execute(
                "UPDATE schema_version SET version = ?1",
                params![schema::SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    /// Get the current schema version (0 if uninitialized).
    fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    /// Create a block row. The caller assigns version 1 separately;
    /// `current_version` starts at 1 regardless of that version's outcome.
    pub fn insert_block(
        &self,
        user_prompt: &str,
        title: &str,
        refresh_interval: u32,
        layout: &serde_json::Value,
    ) -> Result<Block> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO blocks (user_prompt, title, refresh_interval, layout_json, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5)",
            params![user_prompt, title, refresh_interval, layout.to_string(), now],
        )?;

        let id = self.conn.last_insert_rowid();
        self.get_block(id)?
            .context("Freshly inserted block is missing")
    }

    /// Get a block by id.
    pub fn get_block(&self, id: i64) -> Result<Option<Block>> {
        let block = self
            .conn
            .query_row(
                "SELECT id, user_prompt, title, current_version, refresh_interval,
                        layout_json, status, created_at, updated_at
                 FROM blocks WHERE id = ?1",
                params![id],
                map_block_row,
            )
            .optional()?;
        Ok(block)
    }

    /// List all non-deleted blocks, oldest first.
    pub fn list_blocks(&self) -> Result<Vec<Block>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_prompt, title, current_version, refresh_interval,
                    layout_json, status, created_at, updated_at
             FROM blocks WHERE status != 'deleted' ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([], map_block_row)?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?);
        }
        Ok(blocks)
    }

    /// Replace a block's layout metadata. Returns false if the block is missing.
    pub fn update_layout(&self, id: i64, layout: &serde_json::Value) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE blocks SET layout_json = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, layout.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Soft-delete a block; versions, cache rows, and logs remain.
    pub fn soft_delete(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE blocks SET status = 'deleted', updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Versions
    // -----------------------------------------------------------------------

    /// Append a new version with an atomically assigned number
    /// (max existing + 1, starting at 1). Returns the assigned number.
    pub fn insert_version(&mut self, block_id: i64, code: &GeneratedCode) -> Result<u32> {
        let tx = self.conn.transaction()?;

        let next: u32 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM block_versions WHERE block_id = ?1",
            params![block_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO block_versions (block_id, version, backend_code, frontend_code, explanation, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6)",
            params![
                block_id,
                next,
                code.backend_code,
                code.frontend_code,
                code.explanation,
                Utc::now().to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(next)
    }

    /// Get one version of a block.
    pub fn get_version(&self, block_id: i64, version: u32) -> Result<Option<BlockVersion>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, block_id, version, backend_code, frontend_code, explanation, status, created_at
                 FROM block_versions WHERE block_id = ?1 AND version = ?2",
                params![block_id, version],
                map_version_row,
            )
            .optional()?;
        Ok(row)
    }

    /// List all versions of a block, newest first.
    pub fn list_versions(&self, block_id: i64) -> Result<Vec<BlockVersion>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, block_id, version, backend_code, frontend_code, explanation, status, created_at
             FROM block_versions WHERE block_id = ?1 ORDER BY version DESC",
        )?;
        let rows = stmt.query_map(params![block_id], map_version_row)?;

        let mut versions = Vec::new();
        for row in rows {
            versions.push(row?);
        }
        Ok(versions)
    }

    /// Advance `current_version` after a successful validation execution:
    /// the block becomes active, the promoted version becomes active, and
    /// the previously active version is deprecated.
    pub fn promote_version(&mut self, block_id: i64, version: u32) -> Result<()> {
        let tx = self.conn.transaction()?;
        apply_promote(&tx, block_id, version)?;
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle outcomes (compound writes)
    // -----------------------------------------------------------------------

    /// Record a failed validation execution during create/update: the block
    /// degrades to `error`, the version is flagged `failed` (but persists
    /// for audit), and a `fetch` failure log is written.
    pub fn record_validation_failure(
        &mut self,
        block_id: i64,
        version: u32,
        error: &str,
        duration_ms: u64,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "UPDATE blocks SET status = 'error', updated_at = ?2 WHERE id = ?1",
            params![block_id, Utc::now().to_rfc3339()],
        )?;
        tx.execute(
            "UPDATE block_versions SET status = 'failed' WHERE block_id = ?1 AND version = ?2",
            params![block_id, version],
        )?;
        insert_log(
            &tx,
            block_id,
            version,
            ExecutionType::Fetch,
            false,
            Some(error),
            Some(duration_ms),
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Record a successful heal: promote the healed version and write a
    /// `heal` success log tagged with the new version.
    pub fn record_heal_success(
        &mut self,
        block_id: i64,
        new_version: u32,
        duration_ms: u64,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;

        apply_promote(&tx, block_id, new_version)?;
        insert_log(
            &tx,
            block_id,
            new_version,
            ExecutionType::Heal,
            true,
            None,
            Some(duration_ms),
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Record a failed heal attempt. The log is tagged with the version
    /// that was current before the attempt; the rejected healed version,
    /// if one was created, is flagged `failed`. `current_version` and the
    /// block status are left untouched.
    pub fn record_heal_failure(
        &mut self,
        block_id: i64,
        pre_heal_version: u32,
        rejected_version: Option<u32>,
        error: &str,
        duration_ms: u64,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;

        if let Some(v) = rejected_version {
            tx.execute(
                "UPDATE block_versions SET status = 'failed' WHERE block_id = ?1 AND version = ?2",
                params![block_id, v],
            )?;
        }
        insert_log(
            &tx,
            block_id,
            pre_heal_version,
            ExecutionType::Heal,
            false,
            Some(error),
            Some(duration_ms),
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Record a successful refresh: cache the payload with its TTL and
    /// write a `fetch` success log.
    pub fn record_refresh_success(
        &mut self,
        block_id: i64,
        version: u32,
        data: &serde_json::Value,
        expires_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO block_data (block_id, data_json, fetched_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                block_id,
                data.to_string(),
                Utc::now().to_rfc3339(),
                expires_at.to_rfc3339(),
            ],
        )?;
        insert_log(
            &tx,
            block_id,
            version,
            ExecutionType::Fetch,
            true,
            None,
            Some(duration_ms),
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Write a `fetch` failure log for the refresh path. Block status and
    /// version rows are untouched: the current version stays authoritative.
    pub fn log_fetch_failure(
        &self,
        block_id: i64,
        version: u32,
        error: &str,
        duration_ms: u64,
    ) -> Result<()> {
        insert_log(
            &self.conn,
            block_id,
            version,
            ExecutionType::Fetch,
            false,
            Some(error),
            Some(duration_ms),
        )
    }

    // -----------------------------------------------------------------------
    // Cache and audit lookups
    // -----------------------------------------------------------------------

    /// Most recent cache row for a block, if any.
    pub fn latest_block_data(&self, block_id: i64) -> Result<Option<BlockData>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, block_id, data_json, fetched_at, expires_at
                 FROM block_data WHERE block_id = ?1
                 ORDER BY fetched_at DESC, id DESC LIMIT 1",
                params![block_id],
                |row| {
                    Ok(BlockData {
                        id: row.get(0)?,
                        block_id: row.get(1)?,
                        data: parse_json(row.get::<_, String>(2)?),
                        fetched_at: parse_ts(row.get::<_, String>(3)?),
                        expires_at: parse_ts(row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Most recent failure log for a block, if any.
    pub fn latest_failure_log(&self, block_id: i64) -> Result<Option<ExecutionLog>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, block_id, version, execution_type, success, error_message, duration_ms, created_at
                 FROM execution_logs WHERE block_id = ?1 AND success = 0
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![block_id],
                map_log_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Number of failure logs for a block newer than `since`. Feeds the
    /// healing throttle.
    pub fn count_recent_failures(&self, block_id: i64, since: DateTime<Utc>) -> Result<u64> {
        let count: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM execution_logs
             WHERE block_id = ?1 AND success = 0 AND created_at > ?2",
            params![block_id, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// List all execution logs for a block, newest first.
    pub fn list_logs(&self, block_id: i64) -> Result<Vec<ExecutionLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, block_id, version, execution_type, success, error_message, duration_ms, created_at
             FROM execution_logs WHERE block_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![block_id], map_log_row)?;

        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }
}

// ---------------------------------------------------------------------------
// Row mapping and write helpers
// ---------------------------------------------------------------------------

fn apply_promote(conn: &Connection, block_id: i64, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE blocks SET current_version = ?2, status = 'active', updated_at = ?3 WHERE id = ?1",
        params![block_id, version, Utc::now().to_rfc3339()],
    )?;
    conn.execute(
        "UPDATE block_versions SET status = 'deprecated'
         WHERE block_id = ?1 AND version != ?2 AND status = 'active'",
        params![block_id, version],
    )?;
    conn.execute(
        "UPDATE block_versions SET status = 'active' WHERE block_id = ?1 AND version = ?2",
        params![block_id, version],
    )?;
    Ok(())
}

fn insert_log(
    conn: &Connection,
    block_id: i64,
    version: u32,
    execution_type: ExecutionType,
    success: bool,
    error: Option<&str>,
    duration_ms: Option<u64>,
) -> Result<()> {
    let id = ulid::Ulid::new().to_string();
    conn.execute(
        "INSERT INTO execution_logs (id, block_id, version, execution_type, success, error_message, duration_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            block_id,
            version,
            execution_type.to_string(),
            success as i32,
            error,
            duration_ms,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn map_block_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        id: row.get(0)?,
        user_prompt: row.get(1)?,
        title: row.get(2)?,
        current_version: row.get(3)?,
        refresh_interval: row.get(4)?,
        layout: parse_json(row.get::<_, String>(5)?),
        status: BlockStatus::parse(&row.get::<_, String>(6)?).unwrap_or(BlockStatus::Error),
        created_at: parse_ts(row.get::<_, String>(7)?),
        updated_at: parse_ts(row.get::<_, String>(8)?),
    })
}

fn map_version_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockVersion> {
    Ok(BlockVersion {
        id: row.get(0)?,
        block_id: row.get(1)?,
        version: row.get(2)?,
        backend_code: row.get(3)?,
        frontend_code: row.get(4)?,
        explanation: row.get(5)?,
        status: VersionStatus::parse(&row.get::<_, String>(6)?).unwrap_or(VersionStatus::Failed),
        created_at: parse_ts(row.get::<_, String>(7)?),
    })
}

fn map_log_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionLog> {
    Ok(ExecutionLog {
        id: row.get(0)?,
        block_id: row.get(1)?,
        version: row.get(2)?,
        execution_type: ExecutionType::parse(&row.get::<_, String>(3)?)
            .unwrap_or(ExecutionType::Fetch),
        success: row.get::<_, i32>(4)? != 0,
        error_message: row.get(5)?,
        duration_ms: row.get(6)?,
        created_at: parse_ts(row.get::<_, String>(7)?),
    })
}

fn parse_ts(s: String) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_json(s: String) -> serde_json::Value {
    serde_json::from_str(&s).unwrap_or_default()
}
