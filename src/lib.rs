#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! commentdb - Embedded SQLite storage core for a commenting service
//!
//! commentdb hands out one SQLite connection per worker thread, serializes
//! cross-process writes with IMMEDIATE transactions, and carries a live
//! database forward through incompatible schema generations without data
//! loss or partial migration.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - **[`database`]**: the storage core
//!   - `core::pool`: per-thread connection pool ([`ConnectionPool`])
//!   - `core::transaction`: immediate write transactions
//!   - `core::migrate`: versioned schema migrations ([`MigrationEngine`])
//!   - `core::adapter`: the [`CommentDatabase`] collaborators talk to
//!
//! - **[`bloom`]**: probabilistic voter fingerprints ([`Bloomfilter`])
//!
//! - **[`config`]**: configuration management ([`DatabaseConfig`])
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use commentdb::{CommentDatabase, DatabaseConfig};
//!
//! // Load configuration (TOML file + COMMENTDB_* environment overrides)
//! let config = DatabaseConfig::new(&None)?;
//!
//! // Open the database; a pre-existing file is migrated to the current
//! // schema version, a fresh one is pinned to it directly
//! let db = CommentDatabase::open(&config.db_path, config.session_key)?;
//!
//! // Statements run on the calling thread's own connection
//! let open_threads: u32 = db.query_row(
//!     "SELECT COUNT(*) FROM threads",
//!     [],
//!     |row| row.get(0),
//! )?;
//!
//! // Writes that must be atomic go through an immediate transaction
//! db.transaction(|conn| {
//!     conn.execute("INSERT INTO threads (uri) VALUES (?1)", ["/post"])?;
//!     Ok(())
//! })?;
//! ```

pub mod bloom;
pub mod config;
pub mod database;

// =============================================================================
// Configuration
// =============================================================================

pub use config::DatabaseConfig;

// =============================================================================
// Database Module - Re-export commonly used types
// =============================================================================

pub use database::{
    database_info, CommentDatabase, ConnectionPool, DatabaseInfo, MigrationContext,
    MigrationEngine, MigrationStep, SqlText, MAX_VERSION, VOTER_FINGERPRINT_SEED,
};

// =============================================================================
// Voter fingerprints
// =============================================================================

pub use bloom::Bloomfilter;
