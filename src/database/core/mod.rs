//! Core database infrastructure
//!
//! - **pool**: per-thread SQLite connection management
//! - **transaction**: immediate write transactions with guaranteed rollback
//! - **migrate**: versioned schema migrations over `PRAGMA user_version`
//! - **adapter**: the composition root collaborators talk to

mod adapter;
mod migrate;
mod pool;
mod transaction;

pub use adapter::CommentDatabase;
pub use migrate::{
    MigrationContext, MigrationEngine, MigrationStep, MAX_VERSION, VOTER_FINGERPRINT_SEED,
};
pub use pool::{ConnectionPool, SqlText};
