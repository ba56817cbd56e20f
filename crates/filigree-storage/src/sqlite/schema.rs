//! Table definitions, indexes, and the full-text search mirror.

/// Schema version tracked via `PRAGMA user_version`. Bump this and add a
/// migration in [`crate::sqlite::migrations`] whenever the schema changes in
/// a way that existing databases need to catch up to.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Core table/index DDL, executed unconditionally on every open.
///
/// `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT EXISTS` make this safe
/// to re-run against an already-initialized database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id          TEXT PRIMARY KEY,
        title       TEXT NOT NULL,
        status      TEXT NOT NULL DEFAULT 'open',
        priority    INTEGER NOT NULL DEFAULT 2,
        issue_type  TEXT NOT NULL DEFAULT 'task',
        parent_id   TEXT REFERENCES issues(id) ON DELETE SET NULL,
        assignee    TEXT NOT NULL DEFAULT '',
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL,
        closed_at   TEXT,
        description TEXT NOT NULL DEFAULT '',
        notes       TEXT NOT NULL DEFAULT '',
        fields      TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status)",
    "CREATE INDEX IF NOT EXISTS idx_issues_type ON issues(issue_type)",
    "CREATE INDEX IF NOT EXISTS idx_issues_parent ON issues(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee)",
    "CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority)",
    "CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS dependencies (
        issue_id      TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
        depends_on_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
        kind          TEXT NOT NULL DEFAULT 'blocks',
        created_at    TEXT NOT NULL,
        created_by    TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (issue_id, depends_on_id, kind)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on_id)",
    r#"
    CREATE TABLE IF NOT EXISTS labels (
        issue_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
        label    TEXT NOT NULL,
        PRIMARY KEY (issue_id, label)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label)",
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id   TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
        author     TEXT NOT NULL,
        text       TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id)",
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id   TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
        event_type TEXT NOT NULL,
        actor      TEXT NOT NULL DEFAULT '',
        old_value  TEXT,
        new_value  TEXT,
        comment    TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_issue ON events(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS packs (
        name        TEXT PRIMARY KEY,
        description TEXT NOT NULL DEFAULT '',
        enabled     INTEGER NOT NULL DEFAULT 1,
        source      TEXT NOT NULL DEFAULT 'builtin'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS type_templates (
        pack_name  TEXT NOT NULL REFERENCES packs(name) ON DELETE CASCADE,
        type_name  TEXT NOT NULL,
        definition TEXT NOT NULL,
        PRIMARY KEY (pack_name, type_name)
    )
    "#,
];

/// File tracking and scan-finding tables, introduced in schema v2. Applied
/// directly for a brand-new database (version 0) and via the v1-\>v2 step in
/// [`crate::sqlite::migrations`] for a database created before this version
/// existed.
pub const FILE_TRACKING_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS file_records (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        path       TEXT NOT NULL UNIQUE,
        language   TEXT,
        metadata   TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scan_findings (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id      INTEGER NOT NULL REFERENCES file_records(id) ON DELETE CASCADE,
        issue_id     TEXT REFERENCES issues(id) ON DELETE SET NULL,
        scan_source  TEXT NOT NULL,
        rule_id      TEXT NOT NULL,
        severity     TEXT NOT NULL DEFAULT 'info',
        status       TEXT NOT NULL DEFAULT 'open',
        message      TEXT NOT NULL,
        suggestion   TEXT,
        metadata     TEXT NOT NULL DEFAULT '{}',
        scan_run_id  TEXT NOT NULL,
        line_start   INTEGER NOT NULL DEFAULT -1,
        line_end     INTEGER,
        seen_count   INTEGER NOT NULL DEFAULT 1,
        first_seen   TEXT NOT NULL,
        updated_at   TEXT NOT NULL,
        last_seen_at TEXT NOT NULL,
        UNIQUE (file_id, scan_source, rule_id, line_start)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_scan_findings_issue ON scan_findings(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_scan_findings_status ON scan_findings(status)",
    r#"
    CREATE TABLE IF NOT EXISTS file_associations (
        file_id    INTEGER NOT NULL REFERENCES file_records(id) ON DELETE CASCADE,
        issue_id   TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
        assoc_type TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (file_id, issue_id, assoc_type)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_file_associations_issue ON file_associations(issue_id)",
    r#"
    CREATE TABLE IF NOT EXISTS file_events (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id    INTEGER NOT NULL REFERENCES file_records(id) ON DELETE CASCADE,
        event_type TEXT NOT NULL,
        old_value  TEXT,
        new_value  TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_file_events_file ON file_events(file_id)",
];

/// Full-text search mirror of `issues(title, description, notes)`, kept in
/// sync with triggers. Executed separately from [`SCHEMA_STATEMENTS`] because
/// some SQLite builds lack the `fts5` extension; callers should catch the
/// failure and fall back to `LIKE`-based search rather than treat it as fatal.
pub const FTS_STATEMENTS: &[&str] = &[
    r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS issues_fts USING fts5(
        id UNINDEXED, title, description, notes,
        content='issues', content_rowid='rowid'
    )
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS issues_fts_ai AFTER INSERT ON issues BEGIN
        INSERT INTO issues_fts(rowid, id, title, description, notes)
        VALUES (new.rowid, new.id, new.title, new.description, new.notes);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS issues_fts_ad AFTER DELETE ON issues BEGIN
        INSERT INTO issues_fts(issues_fts, rowid, id, title, description, notes)
        VALUES ('delete', old.rowid, old.id, old.title, old.description, old.notes);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS issues_fts_au AFTER UPDATE ON issues BEGIN
        INSERT INTO issues_fts(issues_fts, rowid, id, title, description, notes)
        VALUES ('delete', old.rowid, old.id, old.title, old.description, old.notes);
        INSERT INTO issues_fts(rowid, id, title, description, notes)
        VALUES (new.rowid, new.id, new.title, new.description, new.notes);
    END
    "#,
];

/// Name of the FTS5 virtual table, used as the probe for "FTS unavailable"
/// fallback handling during search.
pub const FTS_TABLE_NAME: &str = "issues_fts";
