//! Shared types used across the infocentral core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Block lifecycle states
// ---------------------------------------------------------------------------

/// States a block transitions through. `Deleted` is terminal and only
/// reachable via explicit soft-delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    /// Latest execution attempt succeeded.
    Active,
    /// Latest execution attempt failed.
    Error,
    /// Manually disabled, not scheduled for refresh.
    Disabled,
    /// Soft-deleted; history remains queryable.
    Deleted,
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Error => write!(f, "error"),
            Self::Disabled => write!(f, "disabled"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl BlockStatus {
    /// Parse a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "error" => Some(Self::Error),
            "disabled" => Some(Self::Disabled),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// States of one generated code artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// The version `current_version` points at.
    Active,
    /// Superseded by a later promoted version.
    Deprecated,
    /// Validation execution failed; kept for audit.
    Failed,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Deprecated => write!(f, "deprecated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl VersionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "deprecated" => Some(Self::Deprecated),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// What kind of execution an audit log row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    Fetch,
    Heal,
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Heal => write!(f, "heal"),
        }
    }
}

impl ExecutionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fetch" => Some(Self::Fetch),
            "heal" => Some(Self::Heal),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// One user-defined dashboard widget backed by versioned generated code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    pub user_prompt: String,
    pub title: String,
    /// Version currently considered authoritative. Advances only on a
    /// successful execution; there is always a current version.
    pub current_version: u32,
    /// Cache TTL in seconds.
    pub refresh_interval: u32,
    /// Opaque positioning data for the presentation layer.
    pub layout: serde_json::Value,
    pub status: BlockStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One generated code artifact for a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockVersion {
    pub id: i64,
    pub block_id: i64,
    pub version: u32,
    pub backend_code: String,
    pub frontend_code: String,
    pub explanation: String,
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
}

/// One cached execution result. Append-only; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockData {
    pub id: i64,
    pub block_id: i64,
    pub data: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BlockData {
    /// Whether this cache row has passed its TTL.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// One audit record of a single execution attempt. Also feeds the
/// healing throttle (failure count within the trailing window).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: String,
    pub block_id: i64,
    pub version: u32,
    pub execution_type: ExecutionType,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Oracle exchange
// ---------------------------------------------------------------------------

/// Parsed output of one oracle generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub backend_code: String,
    pub frontend_code: String,
    pub explanation: String,
}

/// Context handed to the oracle when iterating on an existing block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationContext {
    pub original_prompt: String,
    pub previous_code: Option<String>,
    pub iteration: String,
}

// ---------------------------------------------------------------------------
// Data retrieval
// ---------------------------------------------------------------------------

/// Payload returned by the cache-aware data path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataEnvelope {
    pub data: serde_json::Value,
    /// True when served from an unexpired cache row.
    pub cached: bool,
    pub fetched_at: DateTime<Utc>,
}
