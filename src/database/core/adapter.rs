//! Comment store composition root
//!
//! `CommentDatabase` owns the connection pool and brings the database file to
//! the expected schema version at construction. Table-specific modules
//! (comments, threads, preferences, spam guard) consume its `execute` and
//! `transaction` surface and never manage connections themselves.

use anyhow::Result;
use rusqlite::{Connection, Params};
use std::path::Path;
use tracing::info;

use super::migrate::{set_version, MigrationContext, MigrationEngine, MAX_VERSION};
use super::pool::{ConnectionPool, SqlText};

/// Tables whose presence marks a pre-existing database
const CORE_TABLES: &str = "('threads', 'comments', 'preferences')";

/// Embedded comment store.
///
/// Construction bootstraps the database file:
///
/// - the core tables are looked up in the catalog to tell a brand-new file
///   from a pre-existing one, then the collaborators' schema DDL runs (the
///   `create_schema` hook of [`CommentDatabase::open_with_schema`]);
/// - a brand-new file is pinned directly to [`MAX_VERSION`] — the hook just
///   created the schema at its current shape, so no migration steps apply;
/// - a pre-existing file is migrated up to [`MAX_VERSION`], step by step,
///   each step atomic with its version bump;
/// - finally the orphan-removal trigger is (re)installed with
///   `CREATE TRIGGER IF NOT EXISTS`, so repeated startups are
///   side-effect-free.
///
/// A migration failure aborts construction: the service must not run against
/// a database it could not bring to the expected schema version.
pub struct CommentDatabase {
    pool: ConnectionPool,
    session_key: Option<String>,
}

impl CommentDatabase {
    /// Open the database at `path` (with home expansion) and bootstrap it
    ///
    /// `session_key` is the optional session key from the service
    /// configuration, consumed by the 1→2 migration step. The schema is
    /// expected to exist already; deployments that create their schema on
    /// startup should use [`CommentDatabase::open_with_schema`].
    pub fn open(path: &str, session_key: Option<String>) -> Result<Self> {
        Self::open_with_schema(path, session_key, |_| Ok(()))
    }

    /// Open the database, running the collaborators' schema DDL during
    /// bootstrap
    ///
    /// `create_schema` runs after the fresh-or-existing catalog check and
    /// before migration, mirroring startup order: its `CREATE TABLE IF NOT
    /// EXISTS` statements lay down a current-shape schema on a fresh file and
    /// are no-ops on an existing one.
    pub fn open_with_schema<F>(
        path: &str,
        session_key: Option<String>,
        create_schema: F,
    ) -> Result<Self>
    where
        F: FnOnce(&ConnectionPool) -> Result<()>,
    {
        let pool = ConnectionPool::open(path)?;
        let db = Self { pool, session_key };
        db.bootstrap(create_schema)?;
        Ok(db)
    }

    fn bootstrap<F>(&self, create_schema: F) -> Result<()>
    where
        F: FnOnce(&ConnectionPool) -> Result<()>,
    {
        let existing: u32 = self.pool.query_row(
            [
                "SELECT COUNT(*) FROM sqlite_master",
                "WHERE type = 'table' AND name IN",
                CORE_TABLES,
            ],
            [],
            |row| row.get(0),
        )?;

        create_schema(&self.pool)?;

        if existing == 0 {
            info!("fresh database, pinning schema version to {}", MAX_VERSION);
            self.pool
                .with_connection(|conn| set_version(conn, MAX_VERSION))?;
        } else {
            self.migration_engine().migrate(MAX_VERSION)?;
        }

        self.install_trigger()?;
        Ok(())
    }

    /// (Re)install the orphan-removal trigger: once the last comment of a
    /// thread is deleted, the thread row goes too.
    fn install_trigger(&self) -> Result<()> {
        // the trigger references the comments relation, which only exists
        // once the collaborators' DDL has run
        let have_comments: u32 = self.pool.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'comments'",
            [],
            |row| row.get(0),
        )?;
        if have_comments == 0 {
            return Ok(());
        }

        self.pool.execute(
            [
                "CREATE TRIGGER IF NOT EXISTS remove_stale_threads",
                "AFTER DELETE ON comments",
                "BEGIN",
                "    DELETE FROM threads WHERE id NOT IN (SELECT tid FROM comments);",
                "END",
            ],
            [],
        )?;
        Ok(())
    }

    fn migration_engine(&self) -> MigrationEngine<'_> {
        MigrationEngine::new(
            &self.pool,
            MigrationContext {
                session_key: self.session_key.clone(),
            },
        )
    }

    /// The stored schema version
    pub fn version(&self) -> Result<u32> {
        self.migration_engine().version()
    }

    /// The database file path (after home expansion)
    pub fn path(&self) -> &Path {
        self.pool.path()
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Execute a statement with bound parameters on the calling thread's
    /// connection
    pub fn execute<S, P>(&self, sql: S, params: P) -> Result<usize>
    where
        S: Into<SqlText>,
        P: Params,
    {
        self.pool.execute(sql, params)
    }

    /// Run a single-row query with bound parameters
    pub fn query_row<S, P, T, F>(&self, sql: S, params: P, f: F) -> Result<T>
    where
        S: Into<SqlText>,
        P: Params,
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        self.pool.query_row(sql, params, f)
    }

    /// Run `f` against the calling thread's connection
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.pool.with_connection(f)
    }

    /// Run `f` inside an immediate write transaction
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.pool.transaction(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::Bloomfilter;
    use crate::database::core::migrate::VOTER_FINGERPRINT_SEED;
    use rusqlite::params;
    use tempfile::TempDir;

    /// The schema collaborators create on a fresh database, reduced to the
    /// columns this core touches
    fn create_current_schema(pool: &ConnectionPool) -> Result<()> {
        pool.execute(
            [
                "CREATE TABLE IF NOT EXISTS threads (",
                "    id INTEGER PRIMARY KEY,",
                "    uri TEXT UNIQUE NOT NULL",
                ")",
            ],
            [],
        )?;
        pool.execute(
            [
                "CREATE TABLE IF NOT EXISTS comments (",
                "    id INTEGER PRIMARY KEY,",
                "    tid INTEGER REFERENCES threads(id),",
                "    parent INTEGER,",
                "    voters BLOB",
                ")",
            ],
            [],
        )?;
        pool.execute(
            "CREATE TABLE IF NOT EXISTS preferences (key TEXT PRIMARY KEY, value TEXT)",
            [],
        )?;
        Ok(())
    }

    fn open_with_current_schema(path: &Path, session_key: Option<String>) -> CommentDatabase {
        CommentDatabase::open_with_schema(
            path.to_str().unwrap(),
            session_key,
            create_current_schema,
        )
        .unwrap()
    }

    /// Lay down a version-0 database the way an old deployment would have
    fn seed_legacy_database(path: &Path, extra_sql: &str) {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE threads (id INTEGER PRIMARY KEY, uri TEXT UNIQUE NOT NULL);
             CREATE TABLE comments (id INTEGER PRIMARY KEY, tid INTEGER, parent INTEGER, voters BLOB);
             CREATE TABLE preferences (key TEXT PRIMARY KEY, value TEXT);",
        )
        .unwrap();
        conn.execute_batch(extra_sql).unwrap();
    }

    #[test]
    fn test_fresh_database_skips_migrations() {
        let dir = TempDir::new().unwrap();
        let db = open_with_current_schema(&dir.path().join("fresh.db"), None);

        assert_eq!(db.version().unwrap(), MAX_VERSION);

        // no step side effects: a comment inserted afterwards keeps its voters
        db.execute("INSERT INTO comments (id, voters) VALUES (1, x'aa')", [])
            .unwrap();
        let voters: Vec<u8> = db
            .query_row("SELECT voters FROM comments WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(voters, vec![0xaa]);
    }

    #[test]
    fn test_open_without_schema_hook() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bare.db");
        let db = CommentDatabase::open(path.to_str().unwrap(), None).unwrap();

        // nothing to migrate and nothing to guard yet, but the version is
        // pinned so later DDL lands on a current-shape database
        assert_eq!(db.version().unwrap(), MAX_VERSION);
    }

    #[test]
    fn test_existing_database_is_migrated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.db");
        seed_legacy_database(
            &path,
            "INSERT INTO comments (id, voters) VALUES (1, x'00');
             INSERT INTO comments (id, parent) VALUES (2, 1);
             INSERT INTO comments (id, parent) VALUES (3, 2);",
        );

        let db = open_with_current_schema(&path, None);
        assert_eq!(db.version().unwrap(), MAX_VERSION);

        let voters: Vec<u8> = db
            .query_row("SELECT voters FROM comments WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(
            voters,
            Bloomfilter::seeded([VOTER_FINGERPRINT_SEED]).as_bytes()
        );

        // nesting flattened: 3 hangs off the root now
        let parent: i64 = db
            .query_row("SELECT parent FROM comments WHERE id = 3", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(parent, 1);
    }

    #[test]
    fn test_reopen_is_side_effect_free() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("twice.db");

        {
            let db = open_with_current_schema(&path, None);
            db.pool().close().unwrap();
        }

        let db = open_with_current_schema(&path, None);
        assert_eq!(db.version().unwrap(), MAX_VERSION);

        // exactly one trigger, even after two bootstraps
        let triggers: u32 = db
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger' AND name = 'remove_stale_threads'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(triggers, 1);
    }

    #[test]
    fn test_orphan_removal_trigger() {
        let dir = TempDir::new().unwrap();
        let db = open_with_current_schema(&dir.path().join("trigger.db"), None);

        db.execute("INSERT INTO threads (id, uri) VALUES (1, '/a')", [])
            .unwrap();
        db.execute("INSERT INTO threads (id, uri) VALUES (2, '/b')", [])
            .unwrap();
        db.execute("INSERT INTO comments (id, tid) VALUES (1, 1)", [])
            .unwrap();
        db.execute("INSERT INTO comments (id, tid) VALUES (2, 2)", [])
            .unwrap();

        db.execute("DELETE FROM comments WHERE id = 2", []).unwrap();

        // thread 2 lost its last comment and was removed; thread 1 survives
        let count: u32 = db
            .query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let remaining: String = db
            .query_row("SELECT uri FROM threads", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, "/a");
    }

    #[test]
    fn test_transaction_surface() {
        let dir = TempDir::new().unwrap();
        let db = open_with_current_schema(&dir.path().join("txn.db"), None);

        db.transaction(|conn| {
            conn.execute("INSERT INTO threads (id, uri) VALUES (1, '/a')", [])?;
            conn.execute(
                "INSERT INTO comments (id, tid) VALUES (?1, ?2)",
                params![1, 1],
            )?;
            Ok(())
        })
        .unwrap();

        let count: u32 = db
            .query_row("SELECT COUNT(*) FROM comments", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_session_key_flows_through_bootstrap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key.db");
        seed_legacy_database(
            &path,
            "INSERT INTO preferences (key, value) VALUES ('session-key', 'old');
             PRAGMA user_version = 1;",
        );

        let db = open_with_current_schema(&path, Some("from-config".to_string()));
        assert_eq!(db.version().unwrap(), MAX_VERSION);

        let value: String = db
            .query_row(
                "SELECT value FROM preferences WHERE key = 'session-key'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(value, "from-config");
    }

    #[test]
    fn test_failed_migration_aborts_construction() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.db");
        // a legacy database missing the column the 0→1 step rewrites
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE threads (id INTEGER PRIMARY KEY, uri TEXT UNIQUE NOT NULL);
                 CREATE TABLE comments (id INTEGER PRIMARY KEY, tid INTEGER, parent INTEGER);
                 CREATE TABLE preferences (key TEXT PRIMARY KEY, value TEXT);",
            )
            .unwrap();
        }

        let result = CommentDatabase::open(path.to_str().unwrap(), None);
        assert!(result.is_err());

        // version untouched, so a fixed build can still migrate later
        let conn = rusqlite::Connection::open(&path).unwrap();
        let version: u32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 0);
    }
}
