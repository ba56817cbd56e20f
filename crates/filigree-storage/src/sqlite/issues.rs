//! Issue CRUD operations for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde_json::Map;

use filigree_core::enums::EventType;
use filigree_core::filter::IssueFilter;
use filigree_core::issue::Issue;
use filigree_core::template::Category;
use filigree_templates::TemplateRegistry;

use crate::error::{Result, StorageError};
use crate::sqlite::schema::FTS_TABLE_NAME;
use crate::sqlite::store::SqliteStore;
use crate::traits::IssueUpdates;

/// All issue columns in a deterministic order for SELECT queries.
pub(crate) const ISSUE_COLUMNS: &str = r#"
    id, title, status, priority, issue_type, parent_id, assignee,
    created_at, updated_at, closed_at, description, notes, fields
"#;

/// Same as [`ISSUE_COLUMNS`] but prefixed with `issues.` for JOIN queries.
pub(crate) const ISSUE_COLUMNS_PREFIXED: &str = r#"
    issues.id, issues.title, issues.status, issues.priority, issues.issue_type, issues.parent_id, issues.assignee,
    issues.created_at, issues.updated_at, issues.closed_at, issues.description, issues.notes, issues.fields
"#;

/// Deserialises a row into an [`Issue`]. Column order must match [`ISSUE_COLUMNS`].
pub(crate) fn scan_issue(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let fields_str: String = row.get("fields")?;
    let fields: Map<String, serde_json::Value> = serde_json::from_str(&fields_str).unwrap_or_default();

    Ok(Issue {
        id: row.get("id")?,
        title: row.get("title")?,
        status: row.get("status")?,
        priority: row.get("priority")?,
        issue_type: row.get("issue_type")?,
        parent_id: row.get("parent_id")?,
        assignee: row.get("assignee")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
        closed_at: row.get::<_, Option<String>>("closed_at")?.as_deref().map(parse_datetime),
        description: row.get("description")?,
        notes: row.get("notes")?,
        fields,
    })
}

/// Formats a `DateTime<Utc>` as ISO 8601 TEXT for SQLite.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parses an ISO 8601 TEXT string from SQLite into a `DateTime<Utc>`.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .map(|ndt| ndt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

/// Inserts a single issue into the database using the provided connection.
pub(crate) fn insert_issue(conn: &Connection, issue: &Issue, actor: &str) -> Result<()> {
    let now_str = format_datetime(&Utc::now());
    let fields_str = serde_json::to_string(&issue.fields)?;

    conn.execute(
        &format!(
            "INSERT INTO issues ({ISSUE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            issue.id,
            issue.title,
            issue.status,
            issue.priority,
            issue.issue_type,
            issue.parent_id,
            issue.assignee,
            format_datetime(&issue.created_at),
            format_datetime(&issue.updated_at),
            issue.closed_at.as_ref().map(format_datetime),
            issue.description,
            issue.notes,
            fields_str,
        ],
    )?;

    emit_event(conn, &issue.id, EventType::Created, actor, None, None, None, &now_str)?;
    Ok(())
}

/// Emits an event row into the events table.
#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_event(
    conn: &Connection,
    issue_id: &str,
    event_type: EventType,
    actor: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    comment: Option<&str>,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![issue_id, event_type.as_str(), actor, old_value, new_value, comment, created_at],
    )?;
    Ok(())
}

impl SqliteStore {
    pub fn create_issue_impl(&self, issue: &Issue, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        insert_issue(&conn, issue, actor)
    }

    pub fn create_issues_impl(&self, issues: &[Issue], actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction().map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        for issue in issues {
            insert_issue(&tx, issue, actor)?;
        }
        tx.commit().map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    pub fn get_issue_impl(&self, id: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        get_issue_on_conn(&conn, id)
    }

    pub fn get_issues_by_ids_impl(&self, ids: &[String]) -> Result<Vec<Issue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    pub fn update_issue_impl(&self, id: &str, updates: &IssueUpdates, actor: &str, templates: &TemplateRegistry) -> Result<()> {
        let conn = self.lock_conn()?;
        update_issue_on_conn(&conn, id, updates, actor, templates)
    }

    /// Applies field updates directly by SQL with no event emitted -- used
    /// only by undo to restore prior column values without recording a
    /// second synthetic forward change.
    pub fn update_issue_no_event_impl(&self, id: &str, updates: &IssueUpdates) -> Result<()> {
        let conn = self.lock_conn()?;
        update_issue_fields_raw(&conn, id, updates)
    }

    pub fn close_issue_impl(&self, id: &str, status: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        close_issue_on_conn(&conn, id, status, actor)
    }

    pub fn reopen_issue_impl(&self, id: &str, status: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        reopen_issue_on_conn(&conn, id, status, actor)
    }

    pub fn delete_issue_impl(&self, id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        delete_issue_on_conn(&conn, id)
    }

    /// Searches issues by text query and filter.
    ///
    /// Uses the FTS5 mirror when available; falls back to `LIKE` across
    /// title/description/notes when FTS5 wasn't installed at open time.
    pub fn search_issues_impl(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        if query.is_empty() {
            return list_issues_on_conn(&conn, filter);
        }
        if self.fts_available {
            match search_issues_fts(&conn, query, filter) {
                Ok(issues) => return Ok(issues),
                Err(e) => {
                    tracing::warn!(error = %e, "fts query failed, falling back to LIKE");
                }
            }
        }
        search_issues_like(&conn, query, filter)
    }

    pub fn list_issues_impl(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        list_issues_on_conn(&conn, filter)
    }
}

/// Retrieves a single issue by ID on the given connection.
pub(crate) fn get_issue_on_conn(conn: &Connection, id: &str) -> Result<Issue> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_issue).map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("issue", id),
        other => StorageError::Query(other),
    })
}

/// Builds the `SET` clauses, bound parameters, and per-field change events
/// for a partial update, against the row's state as of `before`. Shared by
/// the event-emitting and raw (undo) update paths.
#[allow(clippy::type_complexity)]
fn build_update(
    before: &Issue,
    updates: &IssueUpdates,
    now_str: &str,
) -> Result<(Vec<String>, Vec<Box<dyn rusqlite::types::ToSql>>, Vec<(EventType, Option<String>, Option<String>)>)> {
    let mut set_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut field_events: Vec<(EventType, Option<String>, Option<String>)> = Vec::new();

    if let Some(ref title) = updates.title {
        if title != &before.title {
            set_clauses.push("title = ?".into());
            param_values.push(Box::new(title.clone()));
            field_events.push((EventType::TitleChanged, Some(before.title.clone()), Some(title.clone())));
        }
    }
    if let Some(ref status) = updates.status {
        if status != &before.status {
            set_clauses.push("status = ?".into());
            param_values.push(Box::new(status.clone()));
            field_events.push((EventType::StatusChanged, Some(before.status.clone()), Some(status.clone())));
        }
    }
    if let Some(priority) = updates.priority {
        if priority != before.priority {
            set_clauses.push("priority = ?".into());
            param_values.push(Box::new(priority));
            field_events.push((EventType::PriorityChanged, Some(before.priority.to_string()), Some(priority.to_string())));
        }
    }
    if let Some(ref issue_type) = updates.issue_type {
        set_clauses.push("issue_type = ?".into());
        param_values.push(Box::new(issue_type.clone()));
    }
    if let Some(ref parent_id) = updates.parent_id {
        set_clauses.push("parent_id = ?".into());
        param_values.push(Box::new(parent_id.clone()));
    }
    if let Some(ref assignee) = updates.assignee {
        if assignee != &before.assignee {
            set_clauses.push("assignee = ?".into());
            param_values.push(Box::new(assignee.clone()));
            let event_type = if assignee.is_empty() { EventType::Released } else { EventType::AssigneeChanged };
            field_events.push((event_type, Some(before.assignee.clone()), Some(assignee.clone())));
        }
    }
    if let Some(ref closed_at) = updates.closed_at {
        set_clauses.push("closed_at = ?".into());
        param_values.push(Box::new(closed_at.as_ref().map(format_datetime)));
    }
    if let Some(ref description) = updates.description {
        if description != &before.description {
            set_clauses.push("description = ?".into());
            param_values.push(Box::new(description.clone()));
            field_events.push((EventType::DescriptionChanged, Some(before.description.clone()), Some(description.clone())));
        }
    }
    if let Some(ref notes) = updates.notes {
        if notes != &before.notes {
            set_clauses.push("notes = ?".into());
            param_values.push(Box::new(notes.clone()));
            field_events.push((EventType::NotesChanged, Some(before.notes.clone()), Some(notes.clone())));
        }
    }
    if let Some(ref fields) = updates.fields {
        set_clauses.push("fields = ?".into());
        param_values.push(Box::new(serde_json::to_string(fields)?));
    }

    if !set_clauses.is_empty() {
        set_clauses.push("updated_at = ?".into());
        param_values.push(Box::new(now_str.to_string()));
    }

    Ok((set_clauses, param_values, field_events))
}

fn exec_update(conn: &Connection, id: &str, mut set_clauses: Vec<String>, mut param_values: Vec<Box<dyn rusqlite::types::ToSql>>) -> Result<()> {
    let sql = format!("UPDATE issues SET {} WHERE id = ?", set_clauses.join(", "));
    set_clauses.clear();
    param_values.push(Box::new(id.to_string()));

    let param_refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let affected = conn.execute(&sql, param_refs.as_slice())?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }
    Ok(())
}

/// Applies partial updates on the given connection, recording one
/// field-level event per changed column so undo can reverse it later.
///
/// When `status` changes and the caller didn't supply an explicit
/// `closed_at` override, derives it from the new status's category via
/// `templates` so `closed_at is not null <=> status_category == done` holds
/// for every path that can change status, not just `close_issue`/`reopen_issue`.
pub(crate) fn update_issue_on_conn(conn: &Connection, id: &str, updates: &IssueUpdates, actor: &str, templates: &TemplateRegistry) -> Result<()> {
    let now_str = format_datetime(&Utc::now());
    let before = get_issue_on_conn(conn, id)?;

    let mut updates = updates.clone();
    if let Some(ref status) = updates.status {
        if status != &before.status && updates.closed_at.is_none() {
            let category = templates.category_or_inferred(&before.issue_type, status);
            updates.closed_at = Some(if category == Category::Done { Some(Utc::now()) } else { None });
        }
    }

    let (set_clauses, param_values, field_events) = build_update(&before, &updates, &now_str)?;
    if set_clauses.is_empty() {
        return Ok(());
    }

    exec_update(conn, id, set_clauses, param_values)?;

    if field_events.is_empty() {
        emit_event(conn, id, EventType::Updated, actor, None, None, None, &now_str)?;
    } else {
        for (event_type, old_value, new_value) in field_events {
            emit_event(conn, id, event_type, actor, old_value.as_deref(), new_value.as_deref(), None, &now_str)?;
        }
    }
    Ok(())
}

/// Applies partial updates directly by SQL with no event recorded -- used
/// only by undo, which already knows the exact prior values to restore
/// (including `closed_at`, which the caller derives from the restored
/// status) and must not leave a second synthetic forward event behind.
pub(crate) fn update_issue_fields_raw(conn: &Connection, id: &str, updates: &IssueUpdates) -> Result<()> {
    let now_str = format_datetime(&Utc::now());
    let before = get_issue_on_conn(conn, id)?;
    let (set_clauses, param_values, _field_events) = build_update(&before, updates, &now_str)?;
    if set_clauses.is_empty() {
        return Ok(());
    }
    exec_update(conn, id, set_clauses, param_values)
}

/// Closes an issue on the given connection, setting its status to a
/// done-category value and stamping `closed_at`.
pub(crate) fn close_issue_on_conn(conn: &Connection, id: &str, status: &str, actor: &str) -> Result<()> {
    let now_str = format_datetime(&Utc::now());

    let old_status: String = conn
        .query_row("SELECT status FROM issues WHERE id = ?1", params![id], |r| r.get(0))
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("issue", id),
            other => StorageError::Query(other),
        })?;

    conn.execute(
        "UPDATE issues SET status = ?1, closed_at = ?2, updated_at = ?2 WHERE id = ?3",
        params![status, now_str, id],
    )?;

    emit_event(conn, id, EventType::Closed, actor, Some(&old_status), Some(status), None, &now_str)?;
    Ok(())
}

/// Reopens a closed issue on the given connection, clearing `closed_at`.
pub(crate) fn reopen_issue_on_conn(conn: &Connection, id: &str, status: &str, actor: &str) -> Result<()> {
    let now_str = format_datetime(&Utc::now());

    let old_status: String = conn
        .query_row("SELECT status FROM issues WHERE id = ?1", params![id], |r| r.get(0))
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("issue", id),
            other => StorageError::Query(other),
        })?;

    conn.execute(
        "UPDATE issues SET status = ?1, closed_at = NULL, updated_at = ?2 WHERE id = ?3",
        params![status, now_str, id],
    )?;

    emit_event(conn, id, EventType::Reopened, actor, Some(&old_status), Some(status), None, &now_str)?;
    Ok(())
}

/// Deletes an issue on the given connection.
pub(crate) fn delete_issue_on_conn(conn: &Connection, id: &str) -> Result<()> {
    let affected = conn.execute("DELETE FROM issues WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }
    Ok(())
}

/// Builds the shared WHERE clauses for an [`IssueFilter`], starting the
/// placeholder index at 1.
fn filter_clauses(filter: &IssueFilter) -> (Vec<String>, Vec<Box<dyn rusqlite::types::ToSql>>) {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut param_idx = 1;

    if let Some(ref status) = filter.status {
        where_clauses.push(format!("status = ?{param_idx}"));
        param_values.push(Box::new(status.clone()));
        param_idx += 1;
    }
    if let Some(ref issue_type) = filter.issue_type {
        where_clauses.push(format!("issue_type = ?{param_idx}"));
        param_values.push(Box::new(issue_type.clone()));
        param_idx += 1;
    }
    if let Some(priority) = filter.priority {
        where_clauses.push(format!("priority = ?{param_idx}"));
        param_values.push(Box::new(priority));
        param_idx += 1;
    }
    if let Some(priority_min) = filter.priority_min {
        where_clauses.push(format!("priority >= ?{param_idx}"));
        param_values.push(Box::new(priority_min));
        param_idx += 1;
    }
    if let Some(priority_max) = filter.priority_max {
        where_clauses.push(format!("priority <= ?{param_idx}"));
        param_values.push(Box::new(priority_max));
        param_idx += 1;
    }
    if let Some(ref assignee) = filter.assignee {
        where_clauses.push(format!("assignee = ?{param_idx}"));
        param_values.push(Box::new(assignee.clone()));
        param_idx += 1;
    }
    if let Some(ref parent_id) = filter.parent_id {
        where_clauses.push(format!("parent_id = ?{param_idx}"));
        param_values.push(Box::new(parent_id.clone()));
        param_idx += 1;
    }
    if let Some(ref title_contains) = filter.title_contains {
        where_clauses.push(format!("title LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{title_contains}%")));
        param_idx += 1;
    }
    if let Some(ref created_after) = filter.created_after {
        where_clauses.push(format!("created_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(created_after)));
        param_idx += 1;
    }
    if let Some(ref created_before) = filter.created_before {
        where_clauses.push(format!("created_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(created_before)));
        param_idx += 1;
    }
    if let Some(ref updated_after) = filter.updated_after {
        where_clauses.push(format!("updated_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(updated_after)));
        param_idx += 1;
    }
    if let Some(ref updated_before) = filter.updated_before {
        where_clauses.push(format!("updated_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(updated_before)));
    }

    for label in &filter.labels {
        where_clauses.push("EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label = ?)".into());
        param_values.push(Box::new(label.clone()));
    }

    (where_clauses, param_values)
}

fn apply_limit_offset(sql: &mut String, filter: &IssueFilter) {
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = filter.offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }
}

/// Searches issues on a bare connection (no access to the store's cached
/// `fts_available` flag), trying FTS5 first and falling back to `LIKE`.
/// Used by [`crate::sqlite::transaction::SqliteTx`], which only has a
/// `Connection` to work with.
pub(crate) fn search_issues_on_conn(conn: &Connection, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
    if query.is_empty() {
        return list_issues_on_conn(conn, filter);
    }
    match search_issues_fts(conn, query, filter) {
        Ok(issues) => Ok(issues),
        Err(_) => search_issues_like(conn, query, filter),
    }
}

/// Lists issues matching `filter` with no text query, newest first.
pub(crate) fn list_issues_on_conn(conn: &Connection, filter: &IssueFilter) -> Result<Vec<Issue>> {
    let (where_clauses, param_values) = filter_clauses(filter);
    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };
    let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues {where_sql} ORDER BY created_at DESC");
    apply_limit_offset(&mut sql, filter);

    let param_refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;
    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }
    Ok(issues)
}

/// Searches via the FTS5 mirror, joined back to `issues` for the filter and
/// full row data, ranked by FTS5's `bm25`.
fn search_issues_fts(conn: &Connection, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
    let (mut where_clauses, mut param_values) = filter_clauses(filter);
    // FTS match is always the first bound parameter; shift filter placeholders by one.
    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        for clause in where_clauses.iter_mut() {
            *clause = shift_placeholders(clause, 1);
        }
        format!("AND {}", where_clauses.join(" AND "))
    };

    let mut sql = format!(
        "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
         INNER JOIN {FTS_TABLE_NAME} ON issues.rowid = {FTS_TABLE_NAME}.rowid
         WHERE {FTS_TABLE_NAME} MATCH ?1 {where_sql}
         ORDER BY bm25({FTS_TABLE_NAME})"
    );
    apply_limit_offset(&mut sql, filter);

    let mut all_params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(fts_query(query))];
    all_params.append(&mut param_values);
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;
    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }
    Ok(issues)
}

/// Falls back to `LIKE` search across title/description/notes.
fn search_issues_like(conn: &Connection, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
    let (mut where_clauses, mut param_values) = filter_clauses(filter);
    for clause in where_clauses.iter_mut() {
        *clause = shift_placeholders(clause, 1);
    }
    where_clauses.insert(0, "(title LIKE ?1 OR description LIKE ?1 OR notes LIKE ?1)".into());
    param_values.insert(0, Box::new(format!("%{query}%")));

    let where_sql = format!("WHERE {}", where_clauses.join(" AND "));
    let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues {where_sql} ORDER BY created_at DESC");
    apply_limit_offset(&mut sql, filter);

    let param_refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;
    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }
    Ok(issues)
}

/// Quotes an FTS5 query so free-form user text (which may contain FTS5
/// operators or punctuation) is matched as a literal phrase prefix search.
fn fts_query(query: &str) -> String {
    format!("\"{}\"*", query.replace('"', "\"\""))
}

/// Rewrites `?N` placeholders in a clause built for a 1-indexed parameter
/// list into a parameter list that starts `shift` positions later.
fn shift_placeholders(clause: &str, shift: usize) -> String {
    let mut out = String::with_capacity(clause.len());
    let mut chars = clause.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '?' {
            let mut digits = String::new();
            while let Some(d) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(*d);
                    chars.next();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                out.push('?');
            } else {
                let n: usize = digits.parse().unwrap_or(1);
                out.push_str(&format!("?{}", n + shift));
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use filigree_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_get_issue() {
        let store = test_store();
        let issue = IssueBuilder::new("Test issue").id("proj-test1").description("A test description").priority(2).build();

        store.create_issue_impl(&issue, "alice").unwrap();

        let got = store.get_issue_impl("proj-test1").unwrap();
        assert_eq!(got.title, "Test issue");
        assert_eq!(got.description, "A test description");
        assert_eq!(got.priority, 2);
    }

    #[test]
    fn get_nonexistent_issue_returns_not_found() {
        let store = test_store();
        let err = store.get_issue_impl("proj-nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn update_issue_partial() {
        let store = test_store();
        let issue = IssueBuilder::new("Original title").id("proj-upd1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let updates = IssueUpdates {
            title: Some("Updated title".into()),
            priority: Some(3),
            ..Default::default()
        };
        let templates = TemplateRegistry::new(&["core".into(), "planning".into(), "release".into()]);
        store.update_issue_impl("proj-upd1", &updates, "bob", &templates).unwrap();

        let got = store.get_issue_impl("proj-upd1").unwrap();
        assert_eq!(got.title, "Updated title");
        assert_eq!(got.priority, 3);
    }

    #[test]
    fn close_and_reopen_issue() {
        let store = test_store();
        let issue = IssueBuilder::new("To close").id("proj-close1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        store.close_issue_impl("proj-close1", "closed", "alice").unwrap();
        let got = store.get_issue_impl("proj-close1").unwrap();
        assert_eq!(got.status, "closed");
        assert!(got.closed_at.is_some());

        store.reopen_issue_impl("proj-close1", "open", "alice").unwrap();
        let got = store.get_issue_impl("proj-close1").unwrap();
        assert_eq!(got.status, "open");
        assert!(got.closed_at.is_none());
    }

    #[test]
    fn delete_issue() {
        let store = test_store();
        let issue = IssueBuilder::new("To delete").id("proj-del1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        store.delete_issue_impl("proj-del1").unwrap();

        let err = store.get_issue_impl("proj-del1").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn search_issues_by_text() {
        let store = test_store();
        let issue1 = IssueBuilder::new("Fix login bug").id("proj-s1").description("Users cannot log in").build();
        let issue2 = IssueBuilder::new("Add dashboard").id("proj-s2").description("New dashboard feature").build();
        store.create_issue_impl(&issue1, "alice").unwrap();
        store.create_issue_impl(&issue2, "alice").unwrap();

        let results = store.search_issues_impl("login", &IssueFilter::default()).unwrap();
        let ids: Vec<&str> = results.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&"proj-s1"));
        assert!(!ids.contains(&"proj-s2"));
    }

    #[test]
    fn search_issues_by_status_filter() {
        let store = test_store();
        let issue1 = IssueBuilder::new("Open issue").id("proj-sf1").status("open").build();
        let issue2 = IssueBuilder::new("Closed issue").id("proj-sf2").status("closed").closed_at(Utc::now()).build();
        store.create_issue_impl(&issue1, "alice").unwrap();
        store.create_issue_impl(&issue2, "alice").unwrap();

        let filter = IssueFilter { status: Some("open".into()), ..Default::default() };
        let results = store.list_issues_impl(&filter).unwrap();
        let ids: Vec<&str> = results.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&"proj-sf1"));
        assert!(!ids.contains(&"proj-sf2"));
    }

    #[test]
    fn list_issues_respects_limit() {
        let store = test_store();
        for i in 0..5 {
            let issue = IssueBuilder::new(format!("Issue {i}")).id(format!("proj-lim{i}")).build();
            store.create_issue_impl(&issue, "alice").unwrap();
        }
        let filter = IssueFilter { limit: Some(2), ..Default::default() };
        let results = store.list_issues_impl(&filter).unwrap();
        assert_eq!(results.len(), 2);
    }
}
