//! Versioned schema migrations
//!
//! The schema version is SQLite's native `PRAGMA user_version` counter, kept
//! inside the database file itself. Migration steps form an explicit ordered
//! table; each step runs inside one immediate transaction together with its
//! version bump, so the version is the only durable checkpoint. A crash
//! mid-step leaves the version (and the data) at the previous step's state,
//! and the next startup resumes from there.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use tracing::info;

use crate::bloom::Bloomfilter;
use crate::database::core::ConnectionPool;

/// Schema version this build expects
pub const MAX_VERSION: u32 = 3;

/// Fixed seed for rebuilt voter fingerprints (step 0→1)
pub const VOTER_FINGERPRINT_SEED: &str = "127.0.0.0";

/// A single schema migration, identified by the version it upgrades from.
///
/// `apply` runs inside an immediate transaction; the engine bumps
/// `user_version` to `from + 1` in that same transaction.
pub struct MigrationStep {
    /// Version this step upgrades from
    pub from: u32,
    /// Short name, for logging
    pub name: &'static str,
    apply: fn(&Connection, &MigrationContext) -> Result<()>,
}

/// External inputs some migration steps consult
#[derive(Debug, Default, Clone)]
pub struct MigrationContext {
    /// Session key from the service configuration, if defined (step 1→2)
    pub session_key: Option<String>,
}

/// All known steps, in ascending `from` order
const STEPS: &[MigrationStep] = &[
    MigrationStep {
        from: 0,
        name: "rebuild-voter-fingerprints",
        apply: rebuild_voter_fingerprints,
    },
    MigrationStep {
        from: 1,
        name: "persist-session-key",
        apply: persist_session_key,
    },
    MigrationStep {
        from: 2,
        name: "flatten-reply-tree",
        apply: flatten_reply_tree,
    },
];

/// Applies pending migration steps up to a target version.
///
/// Safe to invoke on every startup: when the stored version already meets the
/// target, `migrate` is a no-op.
pub struct MigrationEngine<'a> {
    pool: &'a ConnectionPool,
    ctx: MigrationContext,
}

impl<'a> MigrationEngine<'a> {
    /// Create an engine over the given pool
    pub fn new(pool: &'a ConnectionPool, ctx: MigrationContext) -> Self {
        Self { pool, ctx }
    }

    /// Read the stored schema version
    pub fn version(&self) -> Result<u32> {
        self.pool
            .query_row("PRAGMA user_version", [], |row| row.get(0))
    }

    /// Bring the database up to version `to`
    ///
    /// Steps run strictly in ascending order, each exactly once per database
    /// file, each atomic with its version bump. Any failure aborts that
    /// step's transaction, leaves the version unchanged, and propagates.
    pub fn migrate(&self, to: u32) -> Result<()> {
        let current = self.version()?;
        if current >= to {
            return Ok(());
        }

        info!("migrating database from version {} to {}", current, to);

        for step in STEPS {
            if step.from >= to {
                break;
            }
            // re-read the stored version so a partially-migrated database
            // resumes at the correct step instead of re-running earlier ones
            if self.version()? != step.from {
                continue;
            }

            self.pool.transaction(|conn| {
                (step.apply)(conn, &self.ctx)?;
                set_version(conn, step.from + 1)
            })?;
            info!(
                "applied migration '{}' ({} -> {})",
                step.name,
                step.from,
                step.from + 1
            );
        }

        Ok(())
    }
}

/// Set `PRAGMA user_version`; transactional when run inside a transaction
pub(crate) fn set_version(conn: &Connection, version: u32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)
        .map_err(|e| anyhow!("Failed to set schema version to {}: {}", version, e))
}

/// 0→1: overwrite every stored voter fingerprint with a fresh one built from
/// a fixed seed. Earlier releases leaked prior commenters' addresses into the
/// fingerprint, so the stored images cannot be trusted and are rebuilt
/// wholesale.
fn rebuild_voter_fingerprints(conn: &Connection, _ctx: &MigrationContext) -> Result<()> {
    let fingerprint = Bloomfilter::seeded([VOTER_FINGERPRINT_SEED]);
    let changed = conn
        .execute("UPDATE comments SET voters = ?1", [fingerprint.as_bytes()])
        .map_err(|e| anyhow!("Failed to rebuild voter fingerprints: {}", e))?;
    info!("{} voter fingerprints rebuilt", changed);
    Ok(())
}

/// 1→2: move the session key from the service configuration into the
/// persisted preferences store. A configuration without the key is a
/// legitimate nothing-to-migrate case, not an error.
fn persist_session_key(conn: &Connection, ctx: &MigrationContext) -> Result<()> {
    if let Some(key) = ctx.session_key.as_deref() {
        let changed = conn
            .execute(
                "UPDATE preferences SET value = ?1 WHERE key = ?2",
                params![key, "session-key"],
            )
            .map_err(|e| anyhow!("Failed to persist session key: {}", e))?;
        info!("{} rows changed", changed);
    }
    Ok(())
}

/// 2→3: flatten the reply tree to a single nesting level. Every transitive
/// descendant of a root comment, at any original depth, ends up with the
/// root as its direct parent.
fn flatten_reply_tree(conn: &Connection, _ctx: &MigrationContext) -> Result<()> {
    let roots: Vec<i64> = {
        let mut stmt = conn
            .prepare("SELECT id FROM comments WHERE parent IS NULL")
            .map_err(|e| anyhow!("Failed to query root comments: {}", e))?;
        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to query root comments: {}", e))?;
        rows.collect::<rusqlite::Result<_>>()
            .map_err(|e| anyhow!("Failed to read root comment ids: {}", e))?
    };

    let mut children_stmt = conn
        .prepare("SELECT id FROM comments WHERE parent = ?1")
        .map_err(|e| anyhow!("Failed to prepare descendant query: {}", e))?;

    let mut reparented = 0usize;
    for root in roots {
        // iterative traversal with an explicit work stack; the visited set
        // makes ids reachable via more than one path (corrupted data) rewrite
        // exactly once and keeps cycles from looping
        let mut descendants: HashSet<i64> = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let children: Vec<i64> = children_stmt
                .query_map([id], |row| row.get(0))
                .map_err(|e| anyhow!("Failed to query replies of comment {}: {}", id, e))?
                .collect::<rusqlite::Result<_>>()
                .map_err(|e| anyhow!("Failed to read reply ids of comment {}: {}", id, e))?;
            for child in children {
                if child != root && descendants.insert(child) {
                    stack.push(child);
                }
            }
        }

        for id in &descendants {
            reparented += conn
                .execute(
                    "UPDATE comments SET parent = ?1 WHERE id = ?2",
                    params![root, id],
                )
                .map_err(|e| anyhow!("Failed to reparent comment {}: {}", id, e))?;
        }
    }

    info!("{} replies reparented", reparented);
    Ok(())
}
