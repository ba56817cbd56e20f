//! Storage and Transaction traits -- the public API for issue persistence.
//!
//! Consumers depend on these traits rather than on concrete implementations so
//! that alternative backends (mocks, proxies, etc.) can be substituted.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use filigree_core::comment::{Comment, Event};
use filigree_core::dependency::Dependency;
use filigree_core::enums::{DependencyType, EventType};
use filigree_core::file::{AssociationType, FileAssociation, FileEvent, FileRecord, ScanFinding};
use filigree_core::filter::{IssueFilter, WorkFilter};
use filigree_core::issue::Issue;
use filigree_templates::TemplateRegistry;

use crate::error::Result;

// ---------------------------------------------------------------------------
// View / helper types
// ---------------------------------------------------------------------------

/// Typed partial-update struct for issues.
///
/// Only `Some` fields are applied; `None` fields are left unchanged.
/// `parent_id` and `closed_at` are `Option<Option<T>>` so a caller can
/// distinguish "leave unchanged" from "clear this field".
#[derive(Debug, Clone, Default)]
pub struct IssueUpdates {
    pub title: Option<String>,
    pub status: Option<String>,
    pub priority: Option<i32>,
    pub issue_type: Option<String>,
    pub parent_id: Option<Option<String>>,
    pub assignee: Option<String>,
    pub closed_at: Option<Option<DateTime<Utc>>>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub fields: Option<Map<String, Value>>,
}

/// A node in a dependency tree traversal.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// The issue at this node.
    pub issue: Issue,
    /// Depth from the root (0 = root).
    pub depth: i32,
    /// The dependency type of the edge leading to this node.
    pub dep_type: DependencyType,
    /// Whether this node was reached via a reverse traversal.
    pub reverse: bool,
}

/// An issue with its associated dependency edge metadata.
#[derive(Debug, Clone)]
pub struct IssueWithDependencyMetadata {
    /// The related issue.
    pub issue: Issue,
    /// The dependency edge connecting the issue.
    pub dependency: Dependency,
}

/// An issue that is blocked, along with the count of open blockers.
#[derive(Debug, Clone)]
pub struct BlockedIssue {
    /// The blocked issue.
    pub issue: Issue,
    /// Number of open blocking dependencies.
    pub blocked_by_count: i32,
}

/// Status of a parent issue with respect to its children.
#[derive(Debug, Clone)]
pub struct EpicStatus {
    /// The parent issue.
    pub epic: Issue,
    /// Total number of child issues.
    pub total_children: i32,
    /// Number of closed-category child issues.
    pub closed_children: i32,
}

/// Aggregate statistics about the issue database.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub total_issues: i64,
    pub open_issues: i64,
    pub wip_issues: i64,
    pub done_issues: i64,
    pub blocked_issues: i64,

    /// Breakdown by issue type: `(type_name, count)`.
    pub by_type: Vec<(String, i64)>,
    /// Breakdown by priority: `(priority, count)`.
    pub by_priority: Vec<(i32, i64)>,
    /// Breakdown by assignee: `(assignee, count)`.
    pub by_assignee: Vec<(String, i64)>,
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Primary storage interface for issue persistence.
///
/// All methods return [`Result`] to propagate [`crate::error::StorageError`]s.
pub trait Storage: Send + Sync {
    // -- Issue CRUD ------------------------------------------------------

    /// Creates a new issue and emits a "created" event.
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;

    /// Creates multiple issues in a single batch.
    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<()>;

    /// Retrieves an issue by its ID.
    fn get_issue(&self, id: &str) -> Result<Issue>;

    /// Retrieves multiple issues by their IDs.
    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>>;

    /// Applies partial updates to an issue and emits an "updated" event.
    ///
    /// `templates` resolves the issue's type to a status category so that a
    /// status change without an explicit `closed_at` override derives the
    /// correct value (set on entering a done-category state, cleared on
    /// leaving one).
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str, templates: &TemplateRegistry) -> Result<()>;

    /// Applies field updates directly by SQL with no event recorded.
    ///
    /// Used only by undo to restore prior values without emitting a second,
    /// spurious forward change event alongside the `undone` marker.
    fn update_issue_no_event(&self, id: &str, updates: &IssueUpdates) -> Result<()>;

    /// Closes an issue (sets status, closed_at=now) and emits a "closed" event.
    fn close_issue(&self, id: &str, status: &str, actor: &str) -> Result<()>;

    /// Reopens a closed issue and emits a "reopened" event.
    fn reopen_issue(&self, id: &str, status: &str, actor: &str) -> Result<()>;

    /// Permanently deletes an issue and its related data.
    fn delete_issue(&self, id: &str) -> Result<()>;

    /// Searches issues by text query and optional filter. FTS-backed when
    /// available; falls back to `LIKE` otherwise.
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    /// Lists issues matching a filter (no text query).
    fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>>;

    // -- Dependencies ------------------------------------------------------

    /// Adds a dependency edge between two issues.
    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;

    /// Removes a dependency edge.
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, kind: &DependencyType, actor: &str) -> Result<()>;

    /// Inserts a dependency edge with no cycle check and no event recorded.
    /// Used only by undo to replay an edge that previously existed.
    fn add_dependency_no_event(&self, dep: &Dependency) -> Result<()>;

    /// Deletes a dependency edge with no event recorded. Used only by undo.
    fn remove_dependency_no_event(&self, issue_id: &str, depends_on_id: &str, kind: &DependencyType) -> Result<()>;

    /// Returns the raw dependency edges where `issue_id` is the source.
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    /// Returns the raw dependency edges where `issue_id` is the target.
    fn get_dependent_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    /// Returns dependencies with their edge metadata.
    fn get_dependencies_with_metadata(&self, issue_id: &str) -> Result<Vec<IssueWithDependencyMetadata>>;

    /// Returns dependents with their edge metadata.
    fn get_dependents_with_metadata(&self, issue_id: &str) -> Result<Vec<IssueWithDependencyMetadata>>;

    /// Traverses the dependency tree from the given root.
    fn get_dependency_tree(&self, issue_id: &str, max_depth: i32, reverse: bool) -> Result<Vec<TreeNode>>;

    // -- Labels --------------------------------------------------------------

    /// Adds a label to an issue.
    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Removes a label from an issue.
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Returns all labels for an issue.
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    /// Returns all issues with the given label.
    fn get_issues_by_label(&self, label: &str) -> Result<Vec<Issue>>;

    // -- Work queries --------------------------------------------------------

    /// Returns issues that are ready to work on (open-category, not blocked).
    ///
    /// `templates` classifies each candidate and blocker by its own type's
    /// category rather than a type-blind status heuristic.
    fn get_ready_work(&self, filter: &WorkFilter, templates: &TemplateRegistry) -> Result<Vec<Issue>>;

    /// Returns issues that have at least one open-category blocking dependency.
    fn get_blocked_issues(&self, filter: &WorkFilter, templates: &TemplateRegistry) -> Result<Vec<BlockedIssue>>;

    /// Returns parent issues where all children are done-category.
    fn get_epics_eligible_for_closure(&self, templates: &TemplateRegistry) -> Result<Vec<EpicStatus>>;

    // -- Comments and events ---------------------------------------------------

    /// Adds a comment to an issue and returns the created comment.
    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;

    /// Returns all comments for an issue.
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    /// Returns recent events for an issue.
    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>>;

    /// Returns all events with id > `since_id`.
    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>>;

    /// Returns the `limit` most recent events across all issues, newest first.
    fn get_recent_events(&self, limit: i32) -> Result<Vec<Event>>;

    /// Records a standalone event not tied to a column update (used by undo
    /// to leave an `undone` marker referencing the event it reverted).
    fn record_event(
        &self,
        issue_id: &str,
        event_type: EventType,
        actor: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<()>;

    /// Deletes old events for archived issues, keeping the `keep_recent` most
    /// recent events per issue (oldest-first ordering within that window).
    /// Returns the number of events deleted.
    fn compact_events(&self, keep_recent: i32) -> Result<i64>;

    // -- Files and scan findings -----------------------------------------------

    /// Inserts or updates a file record, keyed by `path`.
    fn upsert_file(&self, path: &str, language: Option<&str>, metadata: &Value) -> Result<FileRecord>;

    /// Retrieves a file record by path.
    fn get_file(&self, path: &str) -> Result<FileRecord>;

    /// Lists every registered file record.
    fn list_files(&self) -> Result<Vec<FileRecord>>;

    /// Records a new finding, or bumps `seen_count`/`last_seen_at` on a
    /// matching existing one (dedup key: file, source, rule, line).
    fn record_finding(&self, finding: &ScanFinding) -> Result<ScanFinding>;

    /// Returns findings for a file, optionally restricted to open status.
    fn get_findings_for_file(&self, file_id: i64, open_only: bool) -> Result<Vec<ScanFinding>>;

    /// Links a file to an issue.
    fn add_file_association(&self, file_id: i64, issue_id: &str, assoc_type: AssociationType) -> Result<FileAssociation>;

    /// Returns file associations for an issue.
    fn get_file_associations(&self, issue_id: &str) -> Result<Vec<FileAssociation>>;

    /// Returns the issues a file is associated with.
    fn get_associations_for_file(&self, file_id: i64) -> Result<Vec<FileAssociation>>;

    /// Returns file metadata-change events for a file, newest first.
    fn get_file_events(&self, file_id: i64) -> Result<Vec<FileEvent>>;

    /// Appends a file metadata change event.
    fn record_file_event(&self, file_id: i64, event_type: &str, old_value: Option<&str>, new_value: Option<&str>) -> Result<FileEvent>;

    /// Marks open findings from `scan_source` as `unseen_in_latest`, except
    /// those belonging to `current_scan_run_id`. Returns the row count.
    fn mark_unseen_findings(&self, scan_source: &str, current_scan_run_id: &str) -> Result<i64>;

    /// Moves `unseen_in_latest` findings older than `days` to `fixed`,
    /// optionally restricted to one `scan_source`. Returns the row count.
    fn clean_stale_findings(&self, days: i64, scan_source: Option<&str>) -> Result<i64>;

    // -- Statistics -----------------------------------------------------------

    /// Returns aggregate statistics about the issue database.
    fn get_statistics(&self, templates: &TemplateRegistry) -> Result<Statistics>;

    // -- Configuration -------------------------------------------------------

    /// Sets a configuration key-value pair.
    fn set_config(&self, key: &str, value: &str) -> Result<()>;

    /// Gets a configuration value by key.
    fn get_config(&self, key: &str) -> Result<String>;

    /// Returns all configuration key-value pairs.
    fn get_all_config(&self) -> Result<std::collections::HashMap<String, String>>;

    // -- Transactions --------------------------------------------------------

    /// Executes a closure within a database transaction.
    ///
    /// If the closure returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()>;

    // -- Lifecycle -----------------------------------------------------------

    /// Closes the database connection and releases resources.
    fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Transaction trait
// ---------------------------------------------------------------------------

/// Subset of [`Storage`] methods available inside a transaction.
///
/// All operations share a single database connection and are committed or
/// rolled back atomically.
pub trait Transaction {
    // -- Issue operations ------------------------------------------------

    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;
    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<()>;
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str, templates: &TemplateRegistry) -> Result<()>;
    fn close_issue(&self, id: &str, status: &str, actor: &str) -> Result<()>;
    fn delete_issue(&self, id: &str) -> Result<()>;
    fn get_issue(&self, id: &str) -> Result<Issue>;
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    // -- Dependency operations -----------------------------------------------

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, kind: &DependencyType, actor: &str) -> Result<()>;
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    // -- Label operations ----------------------------------------------------

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    // -- Config operations ---------------------------------------------------

    fn set_config(&self, key: &str, value: &str) -> Result<()>;
    fn get_config(&self, key: &str) -> Result<String>;

    // -- Metadata operations -------------------------------------------------

    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;
    fn get_metadata(&self, key: &str) -> Result<String>;

    // -- Comment operations --------------------------------------------------

    fn add_comment(&self, issue_id: &str, actor: &str, comment: &str) -> Result<()>;
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;
}
