//! Infocentral — AI-generated dashboard block backend.
//!
//! Blocks are user-described dashboard widgets whose data-fetching code
//! is generated by an LLM oracle, versioned in SQLite, executed in a
//! sandboxed child process, cached with a TTL, and automatically healed
//! when it breaks.

pub mod config;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod oracle;
pub mod scheduler;
pub mod store;
pub mod types;
