//! Audit layer for termgate
//!
//! Provides:
//! - Audit event types (connections, handshakes, bans, shell lifecycle, commands)
//! - The `AuditSink` trait sessions and the gatekeeper write to
//! - Sinks: append-only line log, SQLite, in-memory (tests), null (`--no-log`)

mod audit;
mod file;
mod memory;
mod sqlite;
mod traits;

pub use audit::*;
pub use file::*;
pub use memory::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
