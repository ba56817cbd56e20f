//! Schema migration primitives and the pending-migration list.
//!
//! SQLite's `ALTER TABLE` is limited (no `DROP COLUMN` before 3.35, no
//! `ALTER COLUMN`), so non-trivial changes go through [`rebuild_table`]:
//! create the new shape under a temp name, copy rows across, drop the old
//! table, rename. The simple primitives ([`add_column`], [`add_index`],
//! [`drop_index`]) cover the common case directly.

use rusqlite::Connection;

use crate::error::{Result, StorageError};

/// Adds a column to `table` if it doesn't already exist. `column_def` is the
/// column name plus type/constraints, e.g. `"priority INTEGER NOT NULL DEFAULT 2"`.
pub fn add_column(conn: &Connection, table: &str, column_def: &str) -> Result<()> {
    let column_name = column_def
        .split_whitespace()
        .next()
        .ok_or_else(|| StorageError::Migration {
            name: "add_column".into(),
            reason: format!("empty column definition for table {table}"),
        })?;

    if column_exists(conn, table, column_name)? {
        return Ok(());
    }

    conn.execute(
        &format!("ALTER TABLE {table} ADD COLUMN {column_def}"),
        [],
    )
    .map_err(|e| StorageError::Migration {
        name: format!("add_column:{table}.{column_name}"),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Creates an index if it doesn't already exist.
pub fn add_index(conn: &Connection, name: &str, table: &str, columns: &str) -> Result<()> {
    conn.execute(
        &format!("CREATE INDEX IF NOT EXISTS {name} ON {table}({columns})"),
        [],
    )
    .map_err(|e| StorageError::Migration {
        name: format!("add_index:{name}"),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Drops an index if it exists.
pub fn drop_index(conn: &Connection, name: &str) -> Result<()> {
    conn.execute(&format!("DROP INDEX IF EXISTS {name}"), [])
        .map_err(|e| StorageError::Migration {
            name: format!("drop_index:{name}"),
            reason: e.to_string(),
        })?;
    Ok(())
}

/// Rebuilds `table` under the DDL in `create_sql` (which must create a table
/// named `{table}_new`), copies `select_columns` from the old table into the
/// matching columns of the new one, then swaps the old table out.
pub fn rebuild_table(
    conn: &Connection,
    table: &str,
    create_sql: &str,
    select_columns: &str,
) -> Result<()> {
    let new_table = format!("{table}_new");
    conn.execute(create_sql, []).map_err(|e| StorageError::Migration {
        name: format!("rebuild_table:{table}:create"),
        reason: e.to_string(),
    })?;
    conn.execute(
        &format!("INSERT INTO {new_table} SELECT {select_columns} FROM {table}"),
        [],
    )
    .map_err(|e| StorageError::Migration {
        name: format!("rebuild_table:{table}:copy"),
        reason: e.to_string(),
    })?;
    conn.execute(&format!("DROP TABLE {table}"), [])
        .map_err(|e| StorageError::Migration {
            name: format!("rebuild_table:{table}:drop"),
            reason: e.to_string(),
        })?;
    conn.execute(&format!("ALTER TABLE {new_table} RENAME TO {table}"), [])
        .map_err(|e| StorageError::Migration {
            name: format!("rebuild_table:{table}:rename"),
            reason: e.to_string(),
        })?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// A single migration step, keyed by the schema version it applies *from*
/// (so the step for `from_version: 1` takes a v1 database to v2).
pub struct Migration {
    pub from_version: i32,
    pub name: &'static str,
    pub apply: fn(&Connection) -> Result<()>,
}

/// Migrations indexed by "from" version, per the migration runner's
/// from-version lookup. There is exactly one step so far: the v1 schema had
/// no file tracking or scan finding tables; v2 adds them.
pub const MIGRATIONS: &[Migration] = &[Migration {
    from_version: 1,
    name: "add_file_tracking_tables",
    apply: migrate_v1_to_v2,
}];

fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    for stmt in crate::sqlite::schema::FILE_TRACKING_STATEMENTS {
        conn.execute_batch(stmt).map_err(|e| StorageError::Migration {
            name: "add_file_tracking_tables".into(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

/// Runs every migration step needed to take `conn` from `from_version` to
/// `target_version`, one version at a time. Each step runs in its own
/// exclusive transaction: apply, stamp `user_version`, commit; on failure,
/// roll back and return a structured error identifying the failing step. A
/// pending version with no registered step is a hard error rather than a
/// silent skip.
pub fn run_pending(conn: &Connection, from_version: i32, target_version: i32) -> Result<()> {
    let mut version = from_version;
    while version < target_version {
        let next = version + 1;
        let Some(step) = MIGRATIONS.iter().find(|m| m.from_version == version) else {
            return Err(StorageError::Migration {
                name: format!("v{version}_to_v{next}"),
                reason: format!("no migration registered for v{version} -> v{next}"),
            });
        };

        conn.execute_batch("BEGIN EXCLUSIVE")
            .map_err(|e| StorageError::Migration { name: step.name.into(), reason: e.to_string() })?;

        let result = (step.apply)(conn).and_then(|()| {
            conn.execute_batch(&format!("PRAGMA user_version = {next}"))
                .map_err(|e| StorageError::Migration { name: step.name.into(), reason: e.to_string() })
        });

        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT")
                    .map_err(|e| StorageError::Migration { name: step.name.into(), reason: e.to_string() })?;
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK").ok();
                return Err(e);
            }
        }

        version = next;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", [])
            .unwrap();
        conn
    }

    #[test]
    fn add_column_is_idempotent() {
        let conn = conn();
        add_column(&conn, "t", "name TEXT NOT NULL DEFAULT ''").unwrap();
        add_column(&conn, "t", "name TEXT NOT NULL DEFAULT ''").unwrap();
        assert!(column_exists(&conn, "t", "name").unwrap());
    }

    #[test]
    fn add_and_drop_index() {
        let conn = conn();
        add_column(&conn, "t", "name TEXT").unwrap();
        add_index(&conn, "idx_t_name", "t", "name").unwrap();
        drop_index(&conn, "idx_t_name").unwrap();
        // No error on re-drop.
        drop_index(&conn, "idx_t_name").unwrap();
    }

    #[test]
    fn run_pending_applies_registered_step_and_stamps_version() {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in crate::sqlite::schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        run_pending(&conn, 1, 2).unwrap();

        let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, 2);
        // The v1->v2 step's table now exists.
        conn.execute("INSERT INTO file_records (path, created_at, updated_at) VALUES ('a.rs', 'x', 'x')", [])
            .unwrap();
    }

    #[test]
    fn run_pending_fails_when_step_is_unregistered() {
        let conn = Connection::open_in_memory().unwrap();
        let err = run_pending(&conn, 2, 3).unwrap_err();
        assert!(matches!(err, StorageError::Migration { ref name, .. } if name == "v2_to_v3"));
    }

    #[test]
    fn rebuild_table_preserves_rows() {
        let conn = conn();
        conn.execute("INSERT INTO t (id) VALUES (1), (2)", []).unwrap();
        rebuild_table(
            &conn,
            "t",
            "CREATE TABLE t_new (id INTEGER PRIMARY KEY, tag TEXT NOT NULL DEFAULT 'x')",
            "id, 'x'",
        )
        .unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
    }
}
