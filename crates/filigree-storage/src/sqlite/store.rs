//! [`SqliteStore`] -- SQLite-backed storage implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use filigree_templates::builtin::{builtin_packs, FUTURE_RELEASE_STATE, FUTURE_RELEASE_TITLE, FUTURE_RELEASE_TYPE};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::sqlite::schema;
use crate::sqlite::{migrations, schema::FTS_TABLE_NAME};

/// SQLite-backed implementation of the [`Storage`](crate::traits::Storage) trait.
///
/// Wraps a [`rusqlite::Connection`] in a `Mutex` for thread safety.  All
/// public methods acquire the lock, execute SQL, and release it.
pub struct SqliteStore {
    /// The mutex-protected SQLite connection.
    pub(crate) conn: Mutex<Connection>,
    /// Whether the FTS5 module was available at initialization. When `false`,
    /// search falls back to `LIKE` against the base columns.
    pub(crate) fts_available: bool,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at the given path.
    ///
    /// Enables WAL mode and foreign keys, then initialises the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening SQLite database");

        let conn = Connection::open(path).map_err(|e| {
            StorageError::Connection(format!("failed to open {}: {e}", path.display()))
        })?;

        Self::from_connection(conn)
    }

    /// Opens an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory SQLite database");
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Connection(format!("failed to open in-memory db: {e}")))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let mut store = Self {
            conn: Mutex::new(conn),
            fts_available: false,
        };
        store.configure_connection()?;
        store.fts_available = store.init_schema()?;
        store.seed_builtins()?;
        Ok(store)
    }

    /// Sets connection pragmas (WAL mode, foreign keys, busy timeout).
    fn configure_connection(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StorageError::Connection(format!("failed to set pragmas: {e}")))?;

        Ok(())
    }

    /// Creates all tables and indexes if `user_version` is below
    /// [`schema::CURRENT_SCHEMA_VERSION`], attempts to install the FTS5
    /// mirror, and runs pending migrations. Returns whether FTS5 ended up
    /// available.
    fn init_schema(&self) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))?;

        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version > schema::CURRENT_SCHEMA_VERSION {
            return Err(StorageError::Migration {
                name: "downgrade".into(),
                reason: format!(
                    "database schema version {version} is newer than this build supports ({}); downgrading is not supported",
                    schema::CURRENT_SCHEMA_VERSION
                ),
            });
        }

        if version == 0 {
            for stmt in schema::SCHEMA_STATEMENTS.iter().chain(schema::FILE_TRACKING_STATEMENTS) {
                conn.execute_batch(stmt).map_err(|e| StorageError::Migration {
                    name: "init_schema".into(),
                    reason: format!("{e}\nStatement: {}", truncate(stmt, 120)),
                })?;
            }
            conn.execute_batch(&format!("PRAGMA user_version = {}", schema::CURRENT_SCHEMA_VERSION))?;
        } else if version < schema::CURRENT_SCHEMA_VERSION {
            migrations::run_pending(&conn, version, schema::CURRENT_SCHEMA_VERSION)?;
        } else {
            debug!(version, "schema already at current version, skipping DDL");
        }

        let fts_available = install_fts(&conn);

        info!(version = schema::CURRENT_SCHEMA_VERSION, fts_available, "schema initialized");
        Ok(fts_available)
    }

    /// Seeds built-in packs, their type templates, and the singleton
    /// "Future" release issue. Idempotent via `INSERT OR IGNORE`.
    fn seed_builtins(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        for pack in builtin_packs() {
            conn.execute(
                "INSERT OR IGNORE INTO packs (name, description, enabled, source) VALUES (?1, ?2, 1, 'builtin')",
                rusqlite::params![pack.name, pack.description],
            )?;
            for type_template in &pack.types {
                let definition = serde_json::to_string(type_template)?;
                conn.execute(
                    "INSERT OR IGNORE INTO type_templates (pack_name, type_name, definition) VALUES (?1, ?2, ?3)",
                    rusqlite::params![pack.name, type_template.name, definition],
                )?;
            }
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO issues (id, title, status, issue_type, created_at, updated_at)
             VALUES ('future', ?1, ?2, ?3, ?4, ?4)",
            rusqlite::params![FUTURE_RELEASE_TITLE, FUTURE_RELEASE_STATE, FUTURE_RELEASE_TYPE, now],
        )?;

        Ok(())
    }

    /// Acquires the connection lock. Helper used by all operation modules.
    pub(crate) fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))
    }
}

/// Attempts to install the FTS5 mirror and its sync triggers. Returns `false`
/// without treating it as fatal if the fts5 module isn't compiled in.
fn install_fts(conn: &Connection) -> bool {
    for stmt in schema::FTS_STATEMENTS {
        if let Err(e) = conn.execute_batch(stmt) {
            warn!(error = %e, table = FTS_TABLE_NAME, "fts5 unavailable, falling back to LIKE search");
            return false;
        }
    }
    true
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("fts_available", &self.fts_available)
            .finish_non_exhaustive()
    }
}

/// Truncates a string for error messages.
fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_seeds_builtin_packs() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let count: i32 = conn.query_row("SELECT COUNT(*) FROM packs", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn open_in_memory_seeds_future_release() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let status: String = conn
            .query_row("SELECT status FROM issues WHERE id = 'future'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(status, "future");
    }

    #[test]
    fn schema_version_set_via_user_version() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, schema::CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn opening_a_newer_schema_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("filigree.db");
        SqliteStore::open(&db_path).unwrap();

        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(&format!("PRAGMA user_version = {}", schema::CURRENT_SCHEMA_VERSION + 1)).unwrap();
        }

        let result = SqliteStore::open(&db_path);
        assert!(matches!(result, Err(StorageError::Migration { ref name, .. }) if name == "downgrade"));
    }

    #[test]
    fn reopen_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.seed_builtins().unwrap();
        let conn = store.lock_conn().unwrap();
        let count: i32 = conn.query_row("SELECT COUNT(*) FROM packs", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 3);
    }
}
