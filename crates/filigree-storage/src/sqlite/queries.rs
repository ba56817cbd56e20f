//! Complex cross-table queries: ready work, blocked issues, epic closure
//! eligibility, and aggregate statistics.
//!
//! Status lifecycle in Filigree is driven by per-type workflow templates
//! rather than a fixed enum, so these queries classify each issue via the
//! registered [`TemplateRegistry`], falling back to
//! [`filigree_templates::infer_status_category`]'s name-based heuristic only
//! for types the registry doesn't know about.

use std::collections::HashMap;

use filigree_core::filter::WorkFilter;
use filigree_core::issue::Issue;
use filigree_core::template::Category;
use filigree_templates::TemplateRegistry;

use crate::error::Result;
use crate::sqlite::issues::{scan_issue, ISSUE_COLUMNS};
use crate::sqlite::store::SqliteStore;
use crate::traits::{BlockedIssue, EpicStatus, Statistics};

fn load_all_issues(conn: &rusqlite::Connection) -> Result<Vec<Issue>> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], scan_issue)?;
    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }
    Ok(issues)
}

/// Loads `issue_id -> [depends_on_id]` for edges that affect readiness.
fn load_blocking_edges(conn: &rusqlite::Connection) -> Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare("SELECT issue_id, depends_on_id FROM dependencies WHERE kind IN ('blocks', 'parent-child')")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let (issue_id, depends_on_id) = row?;
        edges.entry(issue_id).or_default().push(depends_on_id);
    }
    Ok(edges)
}

fn matches_work_filter(issue: &Issue, filter: &WorkFilter) -> bool {
    if let Some(ref issue_type) = filter.issue_type {
        if &issue.issue_type != issue_type {
            return false;
        }
    }
    if let Some(priority_max) = filter.priority_max {
        if issue.priority > priority_max {
            return false;
        }
    }
    if let Some(ref assignee) = filter.assignee {
        if &issue.assignee != assignee {
            return false;
        }
    }
    if let Some(ref parent_id) = filter.parent_id {
        if issue.parent_id.as_deref() != Some(parent_id.as_str()) {
            return false;
        }
    }
    true
}

impl SqliteStore {
    /// Returns issues in the open category with no unresolved blocking
    /// dependency, sorted by priority then age.
    pub fn get_ready_work_impl(&self, filter: &WorkFilter, templates: &TemplateRegistry) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        let issues = load_all_issues(&conn)?;
        let edges = load_blocking_edges(&conn)?;
        let by_id: HashMap<&str, &Issue> = issues.iter().map(|i| (i.id.as_str(), i)).collect();

        let mut ready: Vec<Issue> = issues
            .iter()
            .filter(|issue| templates.category_or_inferred(&issue.issue_type, &issue.status) == Category::Open)
            .filter(|issue| matches_work_filter(issue, filter))
            .filter(|issue| {
                edges
                    .get(&issue.id)
                    .map(|blockers| {
                        !blockers.iter().any(|b| {
                            by_id
                                .get(b.as_str())
                                .map(|blocker| templates.category_or_inferred(&blocker.issue_type, &blocker.status) != Category::Done)
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        ready.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));

        if let Some(limit) = filter.limit {
            ready.truncate(limit as usize);
        }
        Ok(ready)
    }

    /// Returns issues that have at least one unresolved blocking dependency.
    pub fn get_blocked_issues_impl(&self, filter: &WorkFilter, templates: &TemplateRegistry) -> Result<Vec<BlockedIssue>> {
        let conn = self.lock_conn()?;
        let issues = load_all_issues(&conn)?;
        let edges = load_blocking_edges(&conn)?;
        let by_id: HashMap<&str, &Issue> = issues.iter().map(|i| (i.id.as_str(), i)).collect();

        let mut blocked: Vec<BlockedIssue> = issues
            .iter()
            .filter(|issue| templates.category_or_inferred(&issue.issue_type, &issue.status) != Category::Done)
            .filter(|issue| matches_work_filter(issue, filter))
            .filter_map(|issue| {
                let count = edges
                    .get(&issue.id)
                    .map(|blockers| {
                        blockers
                            .iter()
                            .filter(|b| {
                                by_id
                                    .get(b.as_str())
                                    .map(|blocker| templates.category_or_inferred(&blocker.issue_type, &blocker.status) != Category::Done)
                                    .unwrap_or(false)
                            })
                            .count() as i32
                    })
                    .unwrap_or(0);
                if count > 0 {
                    Some(BlockedIssue { issue: issue.clone(), blocked_by_count: count })
                } else {
                    None
                }
            })
            .collect();

        blocked.sort_by(|a, b| a.issue.priority.cmp(&b.issue.priority).then(a.issue.created_at.cmp(&b.issue.created_at)));

        if let Some(limit) = filter.limit {
            blocked.truncate(limit as usize);
        }
        Ok(blocked)
    }

    /// Returns parent issues (via `parent_id`) that aren't yet closed but
    /// whose children are all in the done category.
    pub fn get_epics_eligible_for_closure_impl(&self, templates: &TemplateRegistry) -> Result<Vec<EpicStatus>> {
        let conn = self.lock_conn()?;
        let issues = load_all_issues(&conn)?;

        let mut children_by_parent: HashMap<&str, Vec<&Issue>> = HashMap::new();
        for issue in &issues {
            if let Some(ref parent_id) = issue.parent_id {
                children_by_parent.entry(parent_id.as_str()).or_default().push(issue);
            }
        }

        let mut eligible: Vec<EpicStatus> = issues
            .iter()
            .filter(|issue| templates.category_or_inferred(&issue.issue_type, &issue.status) != Category::Done)
            .filter_map(|issue| {
                let children = children_by_parent.get(issue.id.as_str())?;
                if children.is_empty() {
                    return None;
                }
                let closed_children = children
                    .iter()
                    .filter(|c| templates.category_or_inferred(&c.issue_type, &c.status) == Category::Done)
                    .count() as i32;
                if closed_children as usize == children.len() {
                    Some(EpicStatus { epic: issue.clone(), total_children: children.len() as i32, closed_children })
                } else {
                    None
                }
            })
            .collect();

        eligible.sort_by(|a, b| a.epic.created_at.cmp(&b.epic.created_at));
        Ok(eligible)
    }

    /// Returns aggregate statistics across the whole issue set.
    pub fn get_statistics_impl(&self, templates: &TemplateRegistry) -> Result<Statistics> {
        let conn = self.lock_conn()?;
        let issues = load_all_issues(&conn)?;
        let edges = load_blocking_edges(&conn)?;
        let by_id: HashMap<&str, &Issue> = issues.iter().map(|i| (i.id.as_str(), i)).collect();

        let mut stats = Statistics { total_issues: issues.len() as i64, ..Default::default() };

        let mut by_type: HashMap<String, i64> = HashMap::new();
        let mut by_priority: HashMap<i32, i64> = HashMap::new();
        let mut by_assignee: HashMap<String, i64> = HashMap::new();

        for issue in &issues {
            match templates.category_or_inferred(&issue.issue_type, &issue.status) {
                Category::Open => stats.open_issues += 1,
                Category::Wip => stats.wip_issues += 1,
                Category::Done => stats.done_issues += 1,
            }

            let is_blocked = edges
                .get(&issue.id)
                .map(|blockers| {
                    blockers.iter().any(|b| {
                        by_id
                            .get(b.as_str())
                            .map(|blocker| templates.category_or_inferred(&blocker.issue_type, &blocker.status) != Category::Done)
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false);
            if is_blocked {
                stats.blocked_issues += 1;
            }

            *by_type.entry(issue.issue_type.clone()).or_insert(0) += 1;
            *by_priority.entry(issue.priority).or_insert(0) += 1;
            if templates.category_or_inferred(&issue.issue_type, &issue.status) != Category::Done {
                let assignee = if issue.assignee.is_empty() { "(unassigned)".to_string() } else { issue.assignee.clone() };
                *by_assignee.entry(assignee).or_insert(0) += 1;
            }
        }

        stats.by_type = by_type.into_iter().collect();
        stats.by_type.sort_by(|a, b| b.1.cmp(&a.1));
        stats.by_priority = by_priority.into_iter().collect();
        stats.by_priority.sort_by_key(|(p, _)| *p);
        stats.by_assignee = by_assignee.into_iter().collect();
        stats.by_assignee.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use filigree_core::dependency::Dependency;
    use filigree_core::enums::DependencyType;
    use filigree_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn test_templates() -> TemplateRegistry {
        TemplateRegistry::new(&["core".into(), "planning".into(), "release".into()])
    }

    #[test]
    fn get_ready_work_excludes_blocked() {
        let store = test_store();
        let blocker = IssueBuilder::new("Blocker").id("proj-blk1").status("open").build();
        let blocked = IssueBuilder::new("Blocked").id("proj-blk2").status("open").build();
        let ready = IssueBuilder::new("Ready").id("proj-rdy1").status("open").build();

        store.create_issue_impl(&blocker, "alice").unwrap();
        store.create_issue_impl(&blocked, "alice").unwrap();
        store.create_issue_impl(&ready, "alice").unwrap();

        let dep = Dependency {
            issue_id: "proj-blk2".into(),
            depends_on_id: "proj-blk1".into(),
            kind: DependencyType::Blocks,
            created_at: Utc::now(),
            created_by: "alice".into(),
        };
        store.add_dependency_impl(&dep, "alice").unwrap();

        let work = store.get_ready_work_impl(&WorkFilter::default(), &test_templates()).unwrap();
        let ids: Vec<&str> = work.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&"proj-blk1"));
        assert!(ids.contains(&"proj-rdy1"));
        assert!(!ids.contains(&"proj-blk2"));
    }

    #[test]
    fn get_blocked_issues_reports_count() {
        let store = test_store();
        let blocker1 = IssueBuilder::new("B1").id("proj-bb1").status("open").build();
        let blocker2 = IssueBuilder::new("B2").id("proj-bb2").status("open").build();
        let blocked = IssueBuilder::new("Blocked").id("proj-bb3").status("open").build();
        store.create_issue_impl(&blocker1, "alice").unwrap();
        store.create_issue_impl(&blocker2, "alice").unwrap();
        store.create_issue_impl(&blocked, "alice").unwrap();

        for blocker in ["proj-bb1", "proj-bb2"] {
            store
                .add_dependency_impl(
                    &Dependency {
                        issue_id: "proj-bb3".into(),
                        depends_on_id: blocker.into(),
                        kind: DependencyType::Blocks,
                        created_at: Utc::now(),
                        created_by: "alice".into(),
                    },
                    "alice",
                )
                .unwrap();
        }

        let blocked_issues = store.get_blocked_issues_impl(&WorkFilter::default(), &test_templates()).unwrap();
        assert_eq!(blocked_issues.len(), 1);
        assert_eq!(blocked_issues[0].blocked_by_count, 2);
    }

    #[test]
    fn get_epics_eligible_for_closure_requires_all_children_done() {
        let store = test_store();
        let epic = IssueBuilder::new("Epic").id("proj-ep1").status("open").build();
        let child1 = IssueBuilder::new("C1").id("proj-ep1c1").status("closed").parent_id("proj-ep1").build();
        let child2 = IssueBuilder::new("C2").id("proj-ep1c2").status("open").parent_id("proj-ep1").build();
        store.create_issue_impl(&epic, "alice").unwrap();
        store.create_issue_impl(&child1, "alice").unwrap();
        store.create_issue_impl(&child2, "alice").unwrap();

        let templates = test_templates();
        assert!(store.get_epics_eligible_for_closure_impl(&templates).unwrap().is_empty());

        store.close_issue_impl("proj-ep1c2", "closed", "alice").unwrap();
        let eligible = store.get_epics_eligible_for_closure_impl(&templates).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].epic.id, "proj-ep1");
        assert_eq!(eligible[0].total_children, 2);
        assert_eq!(eligible[0].closed_children, 2);
    }

    #[test]
    fn get_statistics_counts_by_category() {
        let store = test_store();
        let issue1 = IssueBuilder::new("Open").id("proj-st1").status("open").build();
        let issue2 = IssueBuilder::new("Closed").id("proj-st2").status("closed").closed_at(Utc::now()).build();
        store.create_issue_impl(&issue1, "alice").unwrap();
        store.create_issue_impl(&issue2, "alice").unwrap();

        let stats = store.get_statistics_impl(&test_templates()).unwrap();
        // +1 for the seeded "future" release issue.
        assert_eq!(stats.total_issues, 3);
        assert_eq!(stats.open_issues, 1);
        assert_eq!(stats.done_issues, 1);
    }
}
