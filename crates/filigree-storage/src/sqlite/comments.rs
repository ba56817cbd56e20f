//! Comment and Event CRUD operations for [`SqliteStore`].

use chrono::Utc;
use rusqlite::{params, Connection};

use filigree_core::comment::{Comment, Event};
use filigree_core::enums::EventType;

use crate::error::Result;
use crate::sqlite::issues::{emit_event, format_datetime, parse_datetime};
use crate::sqlite::store::SqliteStore;

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with Transaction)
// ---------------------------------------------------------------------------

/// Adds a comment on the given connection, returning the created comment.
pub(crate) fn add_comment_on_conn(
    conn: &Connection,
    issue_id: &str,
    author: &str,
    text: &str,
) -> Result<Comment> {
    let now = Utc::now();
    let now_str = format_datetime(&now);

    conn.execute(
        "INSERT INTO comments (issue_id, author, text, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![issue_id, author, text, now_str],
    )?;

    let id = conn.last_insert_rowid();

    // Emit a "commented" event.
    emit_event(
        conn,
        issue_id,
        EventType::Commented,
        author,
        None,
        None,
        Some(text),
        &now_str,
    )?;

    Ok(Comment {
        id,
        issue_id: issue_id.to_string(),
        author: author.to_string(),
        text: text.to_string(),
        created_at: now,
    })
}

/// Adds a comment with an explicit event-only record (no "commented" event
/// emitted -- used inside transactions that manage events separately).
pub(crate) fn add_comment_no_event(
    conn: &Connection,
    issue_id: &str,
    author: &str,
    text: &str,
) -> Result<()> {
    let now = Utc::now();
    let now_str = format_datetime(&now);
    conn.execute(
        "INSERT INTO comments (issue_id, author, text, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![issue_id, author, text, now_str],
    )?;
    Ok(())
}

/// Returns all comments for an issue on the given connection.
pub(crate) fn get_comments_on_conn(conn: &Connection, issue_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, author, text, created_at
         FROM comments WHERE issue_id = ?1 ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map(params![issue_id], |row: &rusqlite::Row<'_>| {
        let created_at_str: String = row.get(4)?;
        Ok(Comment {
            id: row.get(0)?,
            issue_id: row.get(1)?,
            author: row.get(2)?,
            text: row.get(3)?,
            created_at: parse_datetime(&created_at_str),
        })
    })?;
    let mut comments = Vec::new();
    for row in rows {
        comments.push(row?);
    }
    Ok(comments)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Adds a comment and returns it.
    pub fn add_comment_impl(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        let conn = self.lock_conn()?;
        add_comment_on_conn(&conn, issue_id, author, text)
    }

    /// Returns all comments for an issue.
    pub fn get_comments_impl(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let conn = self.lock_conn()?;
        get_comments_on_conn(&conn, issue_id)
    }

    /// Returns recent events for an issue.
    pub fn get_events_impl(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at
             FROM events WHERE issue_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![issue_id, limit], scan_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Returns all events with id greater than `since_id`.
    pub fn get_all_events_since_impl(&self, since_id: i64) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at
             FROM events WHERE id > ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![since_id], scan_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Returns the most recent events across all issues, newest first.
    pub fn get_recent_events_impl(&self, limit: i32) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at
             FROM events
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], scan_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Records a standalone event, e.g. the `undone` marker left by undo.
    pub fn record_event_impl(
        &self,
        issue_id: &str,
        event_type: EventType,
        actor: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let now_str = format_datetime(&Utc::now());
        emit_event(&conn, issue_id, event_type, actor, old_value, new_value, None, &now_str)
    }

    /// Deletes old events for archived issues, keeping the `keep_recent` most
    /// recent per issue.
    pub fn compact_events_impl(&self, keep_recent: i32) -> Result<i64> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute(
            "DELETE FROM events
             WHERE issue_id IN (SELECT id FROM issues WHERE status = 'archived')
               AND id NOT IN (
                   SELECT e2.id FROM events e2
                   WHERE e2.issue_id = events.issue_id
                   ORDER BY e2.created_at DESC
                   LIMIT ?1
               )",
            params![keep_recent],
        )?;
        Ok(deleted as i64)
    }
}

/// Scans a row from the events table into an [`Event`].
fn scan_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let created_at_str: String = row.get(7)?;
    let event_type_str: String = row.get(2)?;
    Ok(Event {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        event_type: EventType::from(event_type_str),
        actor: row.get(3)?,
        old_value: row.get(4)?,
        new_value: row.get(5)?,
        comment: row.get(6)?,
        created_at: parse_datetime(&created_at_str),
    })
}
