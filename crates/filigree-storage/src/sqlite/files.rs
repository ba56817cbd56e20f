//! File record, scan finding, and file/issue association CRUD for
//! [`SqliteStore`], grounded directly in [`filigree_core::file`].

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use filigree_core::enums::{FindingStatus, Severity};
use filigree_core::file::{dedup_line, AssociationType, FileAssociation, FileEvent, FileRecord, ScanFinding};

use crate::error::Result;
use crate::sqlite::issues::{format_datetime, parse_datetime};
use crate::sqlite::store::SqliteStore;

fn assoc_type_str(assoc_type: AssociationType) -> &'static str {
    match assoc_type {
        AssociationType::BugIn => "bug_in",
        AssociationType::TaskFor => "task_for",
        AssociationType::ScanFinding => "scan_finding",
        AssociationType::MentionedIn => "mentioned_in",
    }
}

fn assoc_type_from_str(s: &str) -> AssociationType {
    match s {
        "bug_in" => AssociationType::BugIn,
        "task_for" => AssociationType::TaskFor,
        "mentioned_in" => AssociationType::MentionedIn,
        _ => AssociationType::ScanFinding,
    }
}

fn scan_file_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let metadata_str: String = row.get("metadata")?;
    Ok(FileRecord {
        id: row.get("id")?,
        path: row.get("path")?,
        language: row.get("language")?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(Value::Null),
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
    })
}

fn scan_finding(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScanFinding> {
    let metadata_str: String = row.get("metadata")?;
    Ok(ScanFinding {
        id: row.get("id")?,
        file_id: row.get("file_id")?,
        issue_id: row.get("issue_id")?,
        scan_source: row.get("scan_source")?,
        rule_id: row.get("rule_id")?,
        severity: Severity::from(row.get::<_, String>("severity")?.as_str()),
        status: FindingStatus::from(row.get::<_, String>("status")?.as_str()),
        message: row.get("message")?,
        suggestion: row.get("suggestion")?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(Value::Null),
        scan_run_id: row.get("scan_run_id")?,
        line_start: row.get("line_start")?,
        line_end: row.get("line_end")?,
        seen_count: row.get("seen_count")?,
        first_seen: parse_datetime(&row.get::<_, String>("first_seen")?),
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
        last_seen_at: parse_datetime(&row.get::<_, String>("last_seen_at")?),
    })
}

impl SqliteStore {
    /// Inserts a file record if it's new, or refreshes language/metadata on
    /// an existing one. `path` is the unique key.
    pub fn upsert_file_impl(&self, path: &str, language: Option<&str>, metadata: &Value) -> Result<FileRecord> {
        let conn = self.lock_conn()?;
        let now = format_datetime(&Utc::now());
        let metadata_str = serde_json::to_string(metadata)?;

        conn.execute(
            "INSERT INTO file_records (path, language, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(path) DO UPDATE SET language = excluded.language, metadata = excluded.metadata, updated_at = excluded.updated_at",
            params![path, language, metadata_str, now],
        )?;

        get_file_on_conn(&conn, path)
    }

    pub fn get_file_impl(&self, path: &str) -> Result<FileRecord> {
        let conn = self.lock_conn()?;
        get_file_on_conn(&conn, path)
    }

    pub fn list_files_impl(&self) -> Result<Vec<FileRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT id, path, language, metadata, created_at, updated_at FROM file_records")?;
        let rows = stmt.query_map([], scan_file_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Records a scan finding, deduplicating against an existing finding with
    /// the same `(file_id, scan_source, rule_id, line_start)` by bumping
    /// `seen_count` and `last_seen_at` rather than inserting a duplicate row.
    pub fn record_finding_impl(&self, finding: &ScanFinding) -> Result<ScanFinding> {
        let conn = self.lock_conn()?;
        let now = format_datetime(&Utc::now());
        let line_start = dedup_line(Some(finding.line_start));
        let metadata_str = serde_json::to_string(&finding.metadata)?;

        let existing_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM scan_findings WHERE file_id = ?1 AND scan_source = ?2 AND rule_id = ?3 AND line_start = ?4",
                params![finding.file_id, finding.scan_source, finding.rule_id, line_start],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing_id {
            conn.execute(
                "UPDATE scan_findings SET seen_count = seen_count + 1, message = ?1, suggestion = ?2,
                    scan_run_id = ?3, severity = ?4, metadata = ?5, updated_at = ?6, last_seen_at = ?6
                 WHERE id = ?7",
                params![finding.message, finding.suggestion, finding.scan_run_id, finding.severity.as_str(), metadata_str, now, id],
            )?;
        } else {
            conn.execute(
                "INSERT INTO scan_findings
                    (file_id, issue_id, scan_source, rule_id, severity, status, message, suggestion, metadata,
                     scan_run_id, line_start, line_end, seen_count, first_seen, updated_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13, ?13, ?13)",
                params![
                    finding.file_id,
                    finding.issue_id,
                    finding.scan_source,
                    finding.rule_id,
                    finding.severity.as_str(),
                    finding.status.as_str(),
                    finding.message,
                    finding.suggestion,
                    metadata_str,
                    finding.scan_run_id,
                    line_start,
                    finding.line_end,
                    now,
                ],
            )?;
        }

        let id = existing_id.unwrap_or_else(|| conn.last_insert_rowid());
        conn.query_row(
            "SELECT id, file_id, issue_id, scan_source, rule_id, severity, status, message, suggestion, metadata,
                    scan_run_id, line_start, line_end, seen_count, first_seen, updated_at, last_seen_at
             FROM scan_findings WHERE id = ?1",
            params![id],
            scan_finding,
        )
        .map_err(Into::into)
    }

    pub fn get_findings_for_file_impl(&self, file_id: i64, open_only: bool) -> Result<Vec<ScanFinding>> {
        let conn = self.lock_conn()?;
        let sql = if open_only {
            "SELECT id, file_id, issue_id, scan_source, rule_id, severity, status, message, suggestion, metadata,
                    scan_run_id, line_start, line_end, seen_count, first_seen, updated_at, last_seen_at
             FROM scan_findings WHERE file_id = ?1 AND status = 'open' ORDER BY first_seen DESC"
        } else {
            "SELECT id, file_id, issue_id, scan_source, rule_id, severity, status, message, suggestion, metadata,
                    scan_run_id, line_start, line_end, seen_count, first_seen, updated_at, last_seen_at
             FROM scan_findings WHERE file_id = ?1 ORDER BY first_seen DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![file_id], scan_finding)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn add_file_association_impl(&self, file_id: i64, issue_id: &str, assoc_type: AssociationType) -> Result<FileAssociation> {
        let conn = self.lock_conn()?;
        let now = format_datetime(&Utc::now());
        conn.execute(
            "INSERT OR IGNORE INTO file_associations (file_id, issue_id, assoc_type, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![file_id, issue_id, assoc_type_str(assoc_type), now],
        )?;
        Ok(FileAssociation {
            file_id,
            issue_id: issue_id.to_string(),
            assoc_type,
            created_at: parse_datetime(&now),
        })
    }

    pub fn get_file_associations_impl(&self, issue_id: &str) -> Result<Vec<FileAssociation>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT file_id, issue_id, assoc_type, created_at FROM file_associations WHERE issue_id = ?1",
        )?;
        let rows = stmt.query_map(params![issue_id], |row| {
            let assoc_str: String = row.get("assoc_type")?;
            Ok(FileAssociation {
                file_id: row.get("file_id")?,
                issue_id: row.get("issue_id")?,
                assoc_type: assoc_type_from_str(&assoc_str),
                created_at: parse_datetime(&row.get::<_, String>("created_at")?),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_associations_for_file_impl(&self, file_id: i64) -> Result<Vec<FileAssociation>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT file_id, issue_id, assoc_type, created_at FROM file_associations WHERE file_id = ?1",
        )?;
        let rows = stmt.query_map(params![file_id], |row| {
            let assoc_str: String = row.get("assoc_type")?;
            Ok(FileAssociation {
                file_id: row.get("file_id")?,
                issue_id: row.get("issue_id")?,
                assoc_type: assoc_type_from_str(&assoc_str),
                created_at: parse_datetime(&row.get::<_, String>("created_at")?),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_file_events_impl(&self, file_id: i64) -> Result<Vec<FileEvent>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, file_id, event_type, old_value, new_value, created_at FROM file_events WHERE file_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![file_id], |row| {
            Ok(FileEvent {
                id: row.get("id")?,
                file_id: row.get("file_id")?,
                event_type: row.get("event_type")?,
                old_value: row.get("old_value")?,
                new_value: row.get("new_value")?,
                created_at: parse_datetime(&row.get::<_, String>("created_at")?),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn record_file_event_impl(
        &self,
        file_id: i64,
        event_type: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<FileEvent> {
        let conn = self.lock_conn()?;
        let now = format_datetime(&Utc::now());
        conn.execute(
            "INSERT INTO file_events (file_id, event_type, old_value, new_value, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![file_id, event_type, old_value, new_value, now],
        )?;
        Ok(FileEvent {
            id: conn.last_insert_rowid(),
            file_id,
            event_type: event_type.to_string(),
            old_value: old_value.map(str::to_string),
            new_value: new_value.map(str::to_string),
            created_at: parse_datetime(&now),
        })
    }

    /// Marks open findings from `scan_source` as `unseen_in_latest`, except
    /// those belonging to `current_scan_run_id`.
    pub fn mark_unseen_findings_impl(&self, scan_source: &str, current_scan_run_id: &str) -> Result<i64> {
        let conn = self.lock_conn()?;
        let now = format_datetime(&Utc::now());
        let affected = conn.execute(
            "UPDATE scan_findings SET status = ?1, updated_at = ?2
             WHERE scan_source = ?3 AND scan_run_id != ?4 AND status = 'open'",
            params![FindingStatus::UnseenInLatest.as_str(), now, scan_source, current_scan_run_id],
        )?;
        Ok(affected as i64)
    }

    /// Moves `unseen_in_latest` findings older than `days` to `fixed`.
    pub fn clean_stale_findings_impl(&self, days: i64, scan_source: Option<&str>) -> Result<i64> {
        let conn = self.lock_conn()?;
        let cutoff = format_datetime(&(Utc::now() - chrono::Duration::days(days)));
        let now = format_datetime(&Utc::now());
        let affected = match scan_source {
            Some(source) => conn.execute(
                "UPDATE scan_findings SET status = ?1, updated_at = ?2
                 WHERE status = 'unseen_in_latest' AND updated_at < ?3 AND scan_source = ?4",
                params![FindingStatus::Fixed.as_str(), now, cutoff, source],
            )?,
            None => conn.execute(
                "UPDATE scan_findings SET status = ?1, updated_at = ?2
                 WHERE status = 'unseen_in_latest' AND updated_at < ?3",
                params![FindingStatus::Fixed.as_str(), now, cutoff],
            )?,
        };
        Ok(affected as i64)
    }
}

fn get_file_on_conn(conn: &Connection, path: &str) -> Result<FileRecord> {
    conn.query_row(
        "SELECT id, path, language, metadata, created_at, updated_at FROM file_records WHERE path = ?1",
        params![path],
        scan_file_record,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => crate::error::StorageError::not_found("file", path),
        other => crate::error::StorageError::Query(other),
    })
}
