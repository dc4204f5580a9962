//! Immediate write transactions
//!
//! SQLite's default DEFERRED transactions take the write lock on first write,
//! which under concurrent writers from multiple processes risks deadlock and
//! corruption. Every write transaction here begins IMMEDIATE instead: the
//! write lock is acquired up front and a second writer blocks until the first
//! commits or rolls back. Reads remain possible throughout.

use anyhow::{anyhow, Result};
use rusqlite::Connection;

/// Rolls back on drop unless disarmed, so an error return, a failed commit,
/// or an unwind out of the block all leave the connection back in autocommit.
struct RollbackGuard<'c> {
    conn: &'c Connection,
    armed: bool,
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

/// Run `f` inside a flat `BEGIN IMMEDIATE` transaction.
///
/// Commits when `f` returns `Ok`, rolls back when it returns `Err`. On every
/// exit path, including a commit failure, the connection ends up back in
/// autocommit mode rather than stuck inside an open transaction.
/// Transactions do not nest; calling this from inside an active transaction
/// is a caller error and fails at `BEGIN`.
pub(crate) fn immediate<T, F>(conn: &Connection, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| anyhow!("Failed to begin immediate transaction: {}", e))?;

    let mut guard = RollbackGuard { conn, armed: true };
    let value = f(conn)?;

    conn.execute_batch("COMMIT")
        .map_err(|e| anyhow!("Failed to commit transaction: {}", e))?;
    guard.armed = false;
    Ok(value)
}
