//! Storage backend for the issue tracker.
//!
//! Provides the [`Storage`] trait and a SQLite implementation ([`SqliteStore`]).

pub mod error;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience.
pub use error::StorageError;
pub use sqlite::SqliteStore;
pub use traits::{
    BlockedIssue, EpicStatus, IssueUpdates, IssueWithDependencyMetadata, Statistics, Storage,
    Transaction, TreeNode,
};

// ---------------------------------------------------------------------------
// Storage trait implementation for SqliteStore
// ---------------------------------------------------------------------------

use std::collections::HashMap;

use serde_json::Value;

use filigree_core::comment::{Comment, Event};
use filigree_core::dependency::Dependency;
use filigree_core::enums::{DependencyType, EventType};
use filigree_core::file::{AssociationType, FileAssociation, FileEvent, FileRecord, ScanFinding};
use filigree_core::filter::{IssueFilter, WorkFilter};
use filigree_core::issue::Issue;
use filigree_templates::TemplateRegistry;

use crate::error::Result;

impl Storage for SqliteStore {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        self.create_issue_impl(issue, actor)
    }

    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<()> {
        self.create_issues_impl(issues, actor)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        self.get_issue_impl(id)
    }

    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>> {
        self.get_issues_by_ids_impl(ids)
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str, templates: &TemplateRegistry) -> Result<()> {
        self.update_issue_impl(id, updates, actor, templates)
    }

    fn update_issue_no_event(&self, id: &str, updates: &IssueUpdates) -> Result<()> {
        self.update_issue_no_event_impl(id, updates)
    }

    fn close_issue(&self, id: &str, status: &str, actor: &str) -> Result<()> {
        self.close_issue_impl(id, status, actor)
    }

    fn reopen_issue(&self, id: &str, status: &str, actor: &str) -> Result<()> {
        self.reopen_issue_impl(id, status, actor)
    }

    fn delete_issue(&self, id: &str) -> Result<()> {
        self.delete_issue_impl(id)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        self.search_issues_impl(query, filter)
    }

    fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        self.list_issues_impl(filter)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        self.add_dependency_impl(dep, actor)
    }

    fn remove_dependency(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        kind: &DependencyType,
        actor: &str,
    ) -> Result<()> {
        self.remove_dependency_impl(issue_id, depends_on_id, kind, actor)
    }

    fn add_dependency_no_event(&self, dep: &Dependency) -> Result<()> {
        self.add_dependency_no_event_impl(dep)
    }

    fn remove_dependency_no_event(&self, issue_id: &str, depends_on_id: &str, kind: &DependencyType) -> Result<()> {
        self.remove_dependency_no_event_impl(issue_id, depends_on_id, kind)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        self.get_dependency_records_impl(issue_id)
    }

    fn get_dependent_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        self.get_dependent_records_impl(issue_id)
    }

    fn get_dependencies_with_metadata(
        &self,
        issue_id: &str,
    ) -> Result<Vec<IssueWithDependencyMetadata>> {
        self.get_dependencies_with_metadata_impl(issue_id)
    }

    fn get_dependents_with_metadata(
        &self,
        issue_id: &str,
    ) -> Result<Vec<IssueWithDependencyMetadata>> {
        self.get_dependents_with_metadata_impl(issue_id)
    }

    fn get_dependency_tree(
        &self,
        issue_id: &str,
        max_depth: i32,
        reverse: bool,
    ) -> Result<Vec<TreeNode>> {
        self.get_dependency_tree_impl(issue_id, max_depth, reverse)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.add_label_impl(issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.remove_label_impl(issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        self.get_labels_impl(issue_id)
    }

    fn get_issues_by_label(&self, label: &str) -> Result<Vec<Issue>> {
        self.get_issues_by_label_impl(label)
    }

    fn get_ready_work(&self, filter: &WorkFilter, templates: &TemplateRegistry) -> Result<Vec<Issue>> {
        self.get_ready_work_impl(filter, templates)
    }

    fn get_blocked_issues(&self, filter: &WorkFilter, templates: &TemplateRegistry) -> Result<Vec<BlockedIssue>> {
        self.get_blocked_issues_impl(filter, templates)
    }

    fn get_epics_eligible_for_closure(&self, templates: &TemplateRegistry) -> Result<Vec<EpicStatus>> {
        self.get_epics_eligible_for_closure_impl(templates)
    }

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        self.add_comment_impl(issue_id, author, text)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        self.get_comments_impl(issue_id)
    }

    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        self.get_events_impl(issue_id, limit)
    }

    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>> {
        self.get_all_events_since_impl(since_id)
    }

    fn get_recent_events(&self, limit: i32) -> Result<Vec<Event>> {
        self.get_recent_events_impl(limit)
    }

    fn record_event(
        &self,
        issue_id: &str,
        event_type: EventType,
        actor: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<()> {
        self.record_event_impl(issue_id, event_type, actor, old_value, new_value)
    }

    fn compact_events(&self, keep_recent: i32) -> Result<i64> {
        self.compact_events_impl(keep_recent)
    }

    fn upsert_file(&self, path: &str, language: Option<&str>, metadata: &Value) -> Result<FileRecord> {
        self.upsert_file_impl(path, language, metadata)
    }

    fn get_file(&self, path: &str) -> Result<FileRecord> {
        self.get_file_impl(path)
    }

    fn list_files(&self) -> Result<Vec<FileRecord>> {
        self.list_files_impl()
    }

    fn record_finding(&self, finding: &ScanFinding) -> Result<ScanFinding> {
        self.record_finding_impl(finding)
    }

    fn get_findings_for_file(&self, file_id: i64, open_only: bool) -> Result<Vec<ScanFinding>> {
        self.get_findings_for_file_impl(file_id, open_only)
    }

    fn add_file_association(
        &self,
        file_id: i64,
        issue_id: &str,
        assoc_type: AssociationType,
    ) -> Result<FileAssociation> {
        self.add_file_association_impl(file_id, issue_id, assoc_type)
    }

    fn get_file_associations(&self, issue_id: &str) -> Result<Vec<FileAssociation>> {
        self.get_file_associations_impl(issue_id)
    }

    fn get_associations_for_file(&self, file_id: i64) -> Result<Vec<FileAssociation>> {
        self.get_associations_for_file_impl(file_id)
    }

    fn get_file_events(&self, file_id: i64) -> Result<Vec<FileEvent>> {
        self.get_file_events_impl(file_id)
    }

    fn record_file_event(
        &self,
        file_id: i64,
        event_type: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<FileEvent> {
        self.record_file_event_impl(file_id, event_type, old_value, new_value)
    }

    fn mark_unseen_findings(&self, scan_source: &str, current_scan_run_id: &str) -> Result<i64> {
        self.mark_unseen_findings_impl(scan_source, current_scan_run_id)
    }

    fn clean_stale_findings(&self, days: i64, scan_source: Option<&str>) -> Result<i64> {
        self.clean_stale_findings_impl(days, scan_source)
    }

    fn get_statistics(&self, templates: &TemplateRegistry) -> Result<Statistics> {
        self.get_statistics_impl(templates)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.set_config_impl(key, value)
    }

    fn get_config(&self, key: &str) -> Result<String> {
        self.get_config_impl(key)
    }

    fn get_all_config(&self) -> Result<HashMap<String, String>> {
        self.get_all_config_impl()
    }

    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()> {
        self.run_in_transaction_impl(f)
    }

    fn close(&self) -> Result<()> {
        // SQLite connections are closed when the Connection is dropped.
        // The Mutex wrapper ensures thread safety.
        Ok(())
    }
}
