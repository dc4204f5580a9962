//! Database module
//!
//! This module provides the storage core for the comment service:
//!
//! - **core**: per-thread SQLite connection pool, immediate write
//!   transactions, versioned schema migrations, and the [`CommentDatabase`]
//!   composition root
//!
//! # Architecture
//!
//! ```text
//! database/
//! └── core/
//!     ├── pool         # ConnectionPool: one SQLite handle per thread
//!     ├── transaction  # BEGIN IMMEDIATE with commit-or-rollback guarantee
//!     ├── migrate      # MigrationEngine over PRAGMA user_version
//!     └── adapter      # CommentDatabase: bootstrap + collaborator surface
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use commentdb::CommentDatabase;
//!
//! let db = CommentDatabase::open("~/.commentdb/comments.db", None)?;
//! assert_eq!(db.version()?, commentdb::MAX_VERSION);
//!
//! db.transaction(|conn| {
//!     conn.execute("INSERT INTO threads (uri) VALUES (?1)", ["/post"])?;
//!     Ok(())
//! })?;
//! ```
//!
//! Table-specific modules (comments, threads, preferences, spam guard) build
//! on `execute`/`transaction` and never open connections themselves.

pub mod core;

pub use core::{
    CommentDatabase, ConnectionPool, MigrationContext, MigrationEngine, MigrationStep, SqlText,
    MAX_VERSION, VOTER_FINGERPRINT_SEED,
};

use chrono::DateTime;
use serde::Serialize;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Information about the comment database file
#[derive(Debug, Serialize, Clone)]
pub struct DatabaseInfo {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl DatabaseInfo {
    /// Render as pretty-printed JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Collect file-level information about an open database
pub fn database_info(db: &CommentDatabase) -> DatabaseInfo {
    let path = db.path();
    let exists = path.exists();
    let metadata = if exists { path.metadata().ok() } else { None };

    let size_bytes = metadata.as_ref().map(|m| m.len());
    let last_modified = metadata
        .as_ref()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string());

    DatabaseInfo {
        path: display_path(path),
        exists,
        size_bytes,
        schema_version: db.version().ok(),
        last_modified,
    }
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
