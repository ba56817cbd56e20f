//! Dependency edge CRUD and cycle detection for [`SqliteStore`].

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{params, Connection};

use filigree_core::dependency::Dependency;
use filigree_core::enums::{DependencyType, EventType};

use crate::error::{Result, StorageError};
use crate::sqlite::issues::{emit_event, format_datetime, parse_datetime, scan_issue, ISSUE_COLUMNS_PREFIXED};
use crate::sqlite::store::SqliteStore;
use crate::traits::{IssueWithDependencyMetadata, TreeNode};

/// Edge kinds that participate in ready-work/cycle calculations, per
/// [`DependencyType::affects_ready_work`].
const BLOCKING_KINDS: &[&str] = &["blocks", "parent-child"];

fn scan_dependency(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dependency> {
    let kind_str: String = row.get("kind")?;
    Ok(Dependency {
        issue_id: row.get("issue_id")?,
        depends_on_id: row.get("depends_on_id")?,
        kind: DependencyType::from(kind_str.as_str()),
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        created_by: row.get("created_by")?,
    })
}

impl SqliteStore {
    pub fn add_dependency_impl(&self, dep: &Dependency, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        add_dependency_on_conn(&conn, dep, actor)
    }

    pub fn remove_dependency_impl(&self, issue_id: &str, depends_on_id: &str, kind: &DependencyType, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        remove_dependency_on_conn(&conn, issue_id, depends_on_id, kind, actor)
    }

    pub fn add_dependency_no_event_impl(&self, dep: &Dependency) -> Result<()> {
        let conn = self.lock_conn()?;
        add_dependency_raw(&conn, dep)
    }

    pub fn remove_dependency_no_event_impl(&self, issue_id: &str, depends_on_id: &str, kind: &DependencyType) -> Result<()> {
        let conn = self.lock_conn()?;
        remove_dependency_raw(&conn, issue_id, depends_on_id, kind)
    }

    pub fn get_dependency_records_impl(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let conn = self.lock_conn()?;
        get_dependency_records_on_conn(&conn, issue_id)
    }

    pub fn get_dependent_records_impl(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let conn = self.lock_conn()?;
        get_dependent_records_on_conn(&conn, issue_id)
    }

    pub fn get_dependencies_with_metadata_impl(&self, issue_id: &str) -> Result<Vec<IssueWithDependencyMetadata>> {
        let conn = self.lock_conn()?;
        get_deps_with_metadata(
            &conn,
            "SELECT {cols}, d.issue_id AS d_issue_id, d.depends_on_id AS d_depends_on_id, d.kind AS d_kind,
                    d.created_at AS d_created_at, d.created_by AS d_created_by
             FROM dependencies d
             JOIN issues ON issues.id = d.depends_on_id
             WHERE d.issue_id = ?1",
            issue_id,
        )
    }

    pub fn get_dependents_with_metadata_impl(&self, issue_id: &str) -> Result<Vec<IssueWithDependencyMetadata>> {
        let conn = self.lock_conn()?;
        get_deps_with_metadata(
            &conn,
            "SELECT {cols}, d.issue_id AS d_issue_id, d.depends_on_id AS d_depends_on_id, d.kind AS d_kind,
                    d.created_at AS d_created_at, d.created_by AS d_created_by
             FROM dependencies d
             JOIN issues ON issues.id = d.issue_id
             WHERE d.depends_on_id = ?1",
            issue_id,
        )
    }

    pub fn get_dependency_tree_impl(&self, issue_id: &str, max_depth: i32, reverse: bool) -> Result<Vec<TreeNode>> {
        let conn = self.lock_conn()?;
        get_dependency_tree_on_conn(&conn, issue_id, max_depth, reverse)
    }
}

/// Adds a dependency edge, rejecting it if it would introduce a cycle among
/// ready-work-affecting edges.
pub(crate) fn add_dependency_on_conn(conn: &Connection, dep: &Dependency, actor: &str) -> Result<()> {
    if dep.kind.affects_ready_work() && would_create_cycle(conn, &dep.issue_id, &dep.depends_on_id)? {
        return Err(StorageError::CycleDetected);
    }

    let now_str = format_datetime(&Utc::now());
    conn.execute(
        "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, kind, created_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![dep.issue_id, dep.depends_on_id, dep.kind.as_str(), now_str, dep.created_by],
    )?;

    let new_value = format!("{}:{}", dep.kind.as_str(), dep.depends_on_id);
    emit_event(
        conn,
        &dep.issue_id,
        EventType::DependencyAdded,
        actor,
        None,
        Some(&new_value),
        None,
        &now_str,
    )?;
    Ok(())
}

pub(crate) fn remove_dependency_on_conn(
    conn: &Connection,
    issue_id: &str,
    depends_on_id: &str,
    kind: &DependencyType,
    actor: &str,
) -> Result<()> {
    let affected = conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2 AND kind = ?3",
        params![issue_id, depends_on_id, kind.as_str()],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("dependency", format!("{issue_id}->{depends_on_id}:{}", kind.as_str())));
    }

    let now_str = format_datetime(&Utc::now());
    emit_event(
        conn,
        issue_id,
        EventType::DependencyRemoved,
        actor,
        Some(depends_on_id),
        None,
        None,
        &now_str,
    )?;
    Ok(())
}

/// Inserts a dependency edge with no cycle check and no event -- used only to
/// replay a prior edge during undo, where the edge already existed once.
pub(crate) fn add_dependency_raw(conn: &Connection, dep: &Dependency) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, kind, created_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![dep.issue_id, dep.depends_on_id, dep.kind.as_str(), format_datetime(&dep.created_at), dep.created_by],
    )?;
    Ok(())
}

/// Deletes a dependency edge with no event -- used only to unwind an edge
/// during undo.
pub(crate) fn remove_dependency_raw(conn: &Connection, issue_id: &str, depends_on_id: &str, kind: &DependencyType) -> Result<()> {
    conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2 AND kind = ?3",
        params![issue_id, depends_on_id, kind.as_str()],
    )?;
    Ok(())
}

pub(crate) fn get_dependency_records_on_conn(conn: &Connection, issue_id: &str) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, depends_on_id, kind, created_at, created_by FROM dependencies WHERE issue_id = ?1",
    )?;
    let rows = stmt.query_map(params![issue_id], scan_dependency)?;
    let mut deps = Vec::new();
    for row in rows {
        deps.push(row?);
    }
    Ok(deps)
}

pub(crate) fn get_dependent_records_on_conn(conn: &Connection, issue_id: &str) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, depends_on_id, kind, created_at, created_by FROM dependencies WHERE depends_on_id = ?1",
    )?;
    let rows = stmt.query_map(params![issue_id], scan_dependency)?;
    let mut deps = Vec::new();
    for row in rows {
        deps.push(row?);
    }
    Ok(deps)
}

fn get_deps_with_metadata(conn: &Connection, sql_template: &str, issue_id: &str) -> Result<Vec<IssueWithDependencyMetadata>> {
    let sql = sql_template.replace("{cols}", ISSUE_COLUMNS_PREFIXED);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![issue_id], |row| {
        let issue = scan_issue(row)?;
        let kind_str: String = row.get("d_kind")?;
        let dependency = Dependency {
            issue_id: row.get("d_issue_id")?,
            depends_on_id: row.get("d_depends_on_id")?,
            kind: DependencyType::from(kind_str.as_str()),
            created_at: parse_datetime(&row.get::<_, String>("d_created_at")?),
            created_by: row.get("d_created_by")?,
        };
        Ok(IssueWithDependencyMetadata { issue, dependency })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// BFS from `depends_on_id` forward through blocking-type edges. Returns true
/// if `issue_id` becomes reachable, meaning adding `issue_id -> depends_on_id`
/// would close a cycle.
fn would_create_cycle(conn: &Connection, issue_id: &str, depends_on_id: &str) -> Result<bool> {
    if issue_id == depends_on_id {
        return Ok(true);
    }

    let placeholders = BLOCKING_KINDS.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!("SELECT depends_on_id FROM dependencies WHERE issue_id = ?1 AND kind IN ({placeholders})");

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(depends_on_id.to_string());
    visited.insert(depends_on_id.to_string());

    let mut stmt = conn.prepare(&sql)?;

    while let Some(current) = queue.pop_front() {
        if current == issue_id {
            return Ok(true);
        }
        let mut params_vec: Vec<&dyn rusqlite::types::ToSql> = vec![&current];
        for kind in BLOCKING_KINDS {
            params_vec.push(kind);
        }
        let rows = stmt.query_map(params_vec.as_slice(), |row| row.get::<_, String>(0))?;
        for row in rows {
            let next = row?;
            if visited.insert(next.clone()) {
                queue.push_back(next);
            }
        }
    }

    Ok(false)
}

fn get_dependency_tree_on_conn(conn: &Connection, issue_id: &str, max_depth: i32, reverse: bool) -> Result<Vec<TreeNode>> {
    let (from_col, to_col) = if reverse {
        ("depends_on_id", "issue_id")
    } else {
        ("issue_id", "depends_on_id")
    };
    let sql = format!("SELECT {to_col}, kind FROM dependencies WHERE {from_col} = ?1");

    let mut nodes = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(issue_id.to_string());
    let mut queue: VecDeque<(String, i32)> = VecDeque::new();
    queue.push_back((issue_id.to_string(), 0));

    let mut stmt = conn.prepare(&sql)?;

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let rows = stmt.query_map(params![current], |row| {
            let next: String = row.get(0)?;
            let kind_str: String = row.get(1)?;
            Ok((next, kind_str))
        })?;
        for row in rows {
            let (next_id, kind_str) = row?;
            if !visited.insert(next_id.clone()) {
                continue;
            }
            let issue = crate::sqlite::issues::get_issue_on_conn(conn, &next_id)?;
            nodes.push(TreeNode {
                issue,
                depth: depth + 1,
                dep_type: DependencyType::from(kind_str.as_str()),
                reverse,
            });
            queue.push_back((next_id, depth + 1));
        }
    }

    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filigree_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn seed_issue(store: &SqliteStore, id: &str) {
        let issue = IssueBuilder::new(id).id(id).build();
        store.create_issue_impl(&issue, "alice").unwrap();
    }

    #[test]
    fn add_and_get_dependency() {
        let store = test_store();
        seed_issue(&store, "proj-a");
        seed_issue(&store, "proj-b");

        let dep = Dependency {
            issue_id: "proj-a".into(),
            depends_on_id: "proj-b".into(),
            kind: DependencyType::Blocks,
            created_at: Utc::now(),
            created_by: "alice".into(),
        };
        store.add_dependency_impl(&dep, "alice").unwrap();

        let deps = store.get_dependency_records_impl("proj-a").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].depends_on_id, "proj-b");

        let dependents = store.get_dependent_records_impl("proj-b").unwrap();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].issue_id, "proj-a");
    }

    #[test]
    fn remove_dependency_requires_matching_kind() {
        let store = test_store();
        seed_issue(&store, "proj-c");
        seed_issue(&store, "proj-d");

        let dep = Dependency {
            issue_id: "proj-c".into(),
            depends_on_id: "proj-d".into(),
            kind: DependencyType::Related,
            created_at: Utc::now(),
            created_by: "alice".into(),
        };
        store.add_dependency_impl(&dep, "alice").unwrap();

        let err = store
            .remove_dependency_impl("proj-c", "proj-d", &DependencyType::Blocks, "alice")
            .unwrap_err();
        assert!(err.is_not_found());

        store
            .remove_dependency_impl("proj-c", "proj-d", &DependencyType::Related, "alice")
            .unwrap();
        assert!(store.get_dependency_records_impl("proj-c").unwrap().is_empty());
    }

    #[test]
    fn cycle_detection_rejects_direct_cycle() {
        let store = test_store();
        seed_issue(&store, "proj-e");
        seed_issue(&store, "proj-f");

        let dep1 = Dependency {
            issue_id: "proj-e".into(),
            depends_on_id: "proj-f".into(),
            kind: DependencyType::Blocks,
            created_at: Utc::now(),
            created_by: "alice".into(),
        };
        store.add_dependency_impl(&dep1, "alice").unwrap();

        let dep2 = Dependency {
            issue_id: "proj-f".into(),
            depends_on_id: "proj-e".into(),
            kind: DependencyType::Blocks,
            created_at: Utc::now(),
            created_by: "alice".into(),
        };
        let err = store.add_dependency_impl(&dep2, "alice").unwrap_err();
        assert!(matches!(err, StorageError::CycleDetected));
    }

    #[test]
    fn non_blocking_kind_does_not_trigger_cycle_check() {
        let store = test_store();
        seed_issue(&store, "proj-g");
        seed_issue(&store, "proj-h");

        let dep1 = Dependency {
            issue_id: "proj-g".into(),
            depends_on_id: "proj-h".into(),
            kind: DependencyType::Related,
            created_at: Utc::now(),
            created_by: "alice".into(),
        };
        store.add_dependency_impl(&dep1, "alice").unwrap();

        let dep2 = Dependency {
            issue_id: "proj-h".into(),
            depends_on_id: "proj-g".into(),
            kind: DependencyType::Related,
            created_at: Utc::now(),
            created_by: "alice".into(),
        };
        store.add_dependency_impl(&dep2, "alice").unwrap();
    }

    #[test]
    fn dependency_tree_respects_max_depth() {
        let store = test_store();
        seed_issue(&store, "proj-i");
        seed_issue(&store, "proj-j");
        seed_issue(&store, "proj-k");

        store
            .add_dependency_impl(
                &Dependency {
                    issue_id: "proj-i".into(),
                    depends_on_id: "proj-j".into(),
                    kind: DependencyType::Blocks,
                    created_at: Utc::now(),
                    created_by: "alice".into(),
                },
                "alice",
            )
            .unwrap();
        store
            .add_dependency_impl(
                &Dependency {
                    issue_id: "proj-j".into(),
                    depends_on_id: "proj-k".into(),
                    kind: DependencyType::Blocks,
                    created_at: Utc::now(),
                    created_by: "alice".into(),
                },
                "alice",
            )
            .unwrap();

        let tree = store.get_dependency_tree_impl("proj-i", 1, false).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].issue.id, "proj-j");

        let full_tree = store.get_dependency_tree_impl("proj-i", 5, false).unwrap();
        assert_eq!(full_tree.len(), 2);
    }
}
