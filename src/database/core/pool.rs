//! Per-thread SQLite connection pool
//!
//! SQLite connections must not be shared between threads, so the pool keeps
//! one physical connection per calling thread in thread-local storage, opened
//! lazily on first use. A single pool-wide mutex guards open/close
//! bookkeeping; statement execution runs against the calling thread's own
//! handle and never takes the lock.

use anyhow::{anyhow, Result};
use rusqlite::{Connection, Params};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::transaction;

thread_local! {
    // One slot per pool instance, keyed by pool id. Dropping the map at
    // thread exit closes any connections the thread still holds.
    static SLOTS: RefCell<HashMap<u64, Connection>> = RefCell::new(HashMap::new());
}

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);

/// A SQL statement, given either whole or as ordered fragments.
///
/// Fragments are joined with a single space before execution, so multi-line
/// statements can be composed without string concatenation noise at the call
/// site:
///
/// ```rust,ignore
/// pool.execute(
///     [
///         "UPDATE comments SET mode = ?1",
///         "WHERE tid = ?2 AND created < ?3",
///     ],
///     params![mode, tid, cutoff],
/// )?;
/// ```
#[derive(Debug, Clone)]
pub enum SqlText {
    /// A complete statement
    Statement(String),
    /// Ordered fragments, joined with a single space
    Fragments(Vec<String>),
}

impl SqlText {
    /// Render the final statement text
    pub fn into_sql(self) -> String {
        match self {
            SqlText::Statement(sql) => sql,
            SqlText::Fragments(fragments) => fragments.join(" "),
        }
    }
}

impl From<&str> for SqlText {
    fn from(sql: &str) -> Self {
        SqlText::Statement(sql.to_string())
    }
}

impl From<String> for SqlText {
    fn from(sql: String) -> Self {
        SqlText::Statement(sql)
    }
}

impl From<Vec<String>> for SqlText {
    fn from(fragments: Vec<String>) -> Self {
        SqlText::Fragments(fragments)
    }
}

impl From<Vec<&str>> for SqlText {
    fn from(fragments: Vec<&str>) -> Self {
        SqlText::Fragments(fragments.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for SqlText {
    fn from(fragments: [&str; N]) -> Self {
        SqlText::Fragments(fragments.iter().map(|s| s.to_string()).collect())
    }
}

/// Connection pool handing out one SQLite connection per calling thread.
///
/// Connections are opened lazily on first use and live until `close()` is
/// called on the same thread (or the thread exits). rusqlite connections run
/// in autocommit mode with no implicit transactions; write transactions are
/// taken explicitly through [`ConnectionPool::transaction`].
pub struct ConnectionPool {
    id: u64,
    path: PathBuf,
    lock: Mutex<()>,
}

impl ConnectionPool {
    /// Create a pool for the database at `path`
    ///
    /// A leading `~` is expanded to the home directory. No connection is
    /// opened until the first statement runs.
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            path: expand_home(path)?,
            lock: Mutex::new(()),
        })
    }

    /// The database file path (after home expansion)
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new connection for the calling thread
    ///
    /// Replaces any prior handle this thread held for this pool.
    pub fn connect(&self) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("Connection pool lock poisoned"))?;

        let conn = Connection::open(&self.path).map_err(|e| {
            anyhow!(
                "Failed to open database at '{}': {}",
                self.path.display(),
                e
            )
        })?;

        SLOTS.with(|slots| slots.borrow_mut().insert(self.id, conn));
        Ok(())
    }

    /// Close and clear the calling thread's connection
    ///
    /// A no-op if this thread holds no handle. Other threads' handles are
    /// unaffected and close when their owning threads exit.
    pub fn close(&self) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("Connection pool lock poisoned"))?;

        let conn = SLOTS.with(|slots| slots.borrow_mut().remove(&self.id));
        if let Some(conn) = conn {
            conn.close()
                .map_err(|(_, e)| anyhow!("Failed to close database connection: {}", e))?;
        }
        Ok(())
    }

    /// True if the calling thread currently holds a connection
    pub fn is_connected(&self) -> bool {
        SLOTS.with(|slots| slots.borrow().contains_key(&self.id))
    }

    /// Execute a statement with bound parameters, returning the number of
    /// affected rows
    pub fn execute<S, P>(&self, sql: S, params: P) -> Result<usize>
    where
        S: Into<SqlText>,
        P: Params,
    {
        let sql = sql.into().into_sql();
        self.with_connection(|conn| {
            conn.execute(&sql, params)
                .map_err(|e| anyhow!("Failed to execute SQL: {}", e))
        })
    }

    /// Run a single-row query with bound parameters
    pub fn query_row<S, P, T, F>(&self, sql: S, params: P, f: F) -> Result<T>
    where
        S: Into<SqlText>,
        P: Params,
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let sql = sql.into().into_sql();
        self.with_connection(|conn| {
            conn.query_row(&sql, params, f)
                .map_err(|e| anyhow!("Failed to query database: {}", e))
        })
    }

    /// Run `f` against the calling thread's connection, connecting lazily
    /// first if needed
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.ensure_connected()?;
        SLOTS.with(|slots| {
            let slots = slots.borrow();
            let conn = slots
                .get(&self.id)
                .ok_or_else(|| anyhow!("Connection slot vanished for current thread"))?;
            f(conn)
        })
    }

    /// Run `f` inside an immediate write transaction on the calling thread's
    /// connection
    ///
    /// The write lock is acquired up front, commits on `Ok`, rolls back on
    /// `Err` or unwind. See [`transaction`](super::transaction) for the exact
    /// contract.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.with_connection(|conn| transaction::immediate(conn, f))
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.is_connected() {
            self.connect()?;
        }
        Ok(())
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        // Only the dropping thread's slot is reachable here; slots held by
        // other threads close when those threads exit. try_with because the
        // thread-local may already be gone during thread teardown.
        let _ = SLOTS.try_with(|slots| {
            if let Ok(mut slots) = slots.try_borrow_mut() {
                slots.remove(&self.id);
            }
        });
    }
}

/// Expand a leading `~` to the current user's home directory
fn expand_home(path: &str) -> Result<PathBuf> {
    if path == "~" || path.starts_with("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        if path == "~" {
            return Ok(home);
        }
        return Ok(home.join(&path[2..]));
    }
    Ok(PathBuf::from(path))
}
