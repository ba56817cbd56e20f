//! Event history, undo, and archival/compaction of old events.

use std::sync::Arc;

use filigree_core::comment::Event;
use filigree_core::enums::{EventType, REVERSIBLE_EVENT_TYPES};
use filigree_core::filter::IssueFilter;
use filigree_core::issue::Issue;
use filigree_core::template::Category;
use filigree_storage::{IssueUpdates, Storage};
use filigree_templates::TemplateRegistry;

use crate::error::{EngineError, Result};

/// Outcome of [`EventLog::undo_last`].
#[derive(Debug, Clone)]
pub struct UndoResult {
    pub undone: bool,
    pub reason: Option<String>,
    pub event_type: Option<EventType>,
    pub issue: Option<Issue>,
}

pub struct EventLog {
    storage: Arc<dyn Storage>,
    templates: Arc<TemplateRegistry>,
}

impl EventLog {
    pub fn new(storage: Arc<dyn Storage>, templates: Arc<TemplateRegistry>) -> Self {
        Self { storage, templates }
    }

    pub fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        Ok(self.storage.get_events(issue_id, limit)?)
    }

    pub fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>> {
        Ok(self.storage.get_all_events_since(since_id)?)
    }

    /// Reverses the most recent reversible event for an issue, unless it was
    /// already undone by a later `undone` event. Undo events are themselves
    /// non-reversible, which prevents undo chains.
    pub fn undo_last(&self, issue_id: &str, actor: &str) -> Result<UndoResult> {
        let current = self.storage.get_issue(issue_id)?;
        let events = self.storage.get_events(issue_id, 200)?;

        let Some(target) = events.iter().find(|e| REVERSIBLE_EVENT_TYPES.contains(&e.event_type)) else {
            return Ok(UndoResult {
                undone: false,
                reason: Some("no reversible events to undo".into()),
                event_type: None,
                issue: None,
            });
        };

        let already_undone = events
            .iter()
            .any(|e| e.event_type == EventType::Undone && e.created_at > target.created_at);
        if already_undone {
            return Ok(UndoResult {
                undone: false,
                reason: Some("most recent reversible event was already undone".into()),
                event_type: Some(target.event_type.clone()),
                issue: None,
            });
        }

        self.apply_inverse(&current, target, actor)?;

        self.storage.record_event(
            issue_id,
            EventType::Undone,
            actor,
            Some(target.event_type.as_str()),
            Some(&target.id.to_string()),
        )?;

        let issue = self.storage.get_issue(issue_id)?;
        Ok(UndoResult { undone: true, reason: None, event_type: Some(target.event_type.clone()), issue: Some(issue) })
    }

    /// Deletes old events for archived issues, keeping the `keep_recent` most
    /// recent events per issue.
    pub fn compact_events(&self, keep_recent: i32) -> Result<i64> {
        Ok(self.storage.compact_events(keep_recent)?)
    }

    /// Applies the inverse of `event` directly by SQL, bypassing transition
    /// validation and the public event-emitting API entirely -- otherwise
    /// every undo would itself record a forward change event, making undo
    /// indistinguishable from a normal edit in the history.
    fn apply_inverse(&self, current: &Issue, event: &Event, actor: &str) -> Result<()> {
        match &event.event_type {
            EventType::StatusChanged => {
                let Some(ref old_status) = event.old_value else {
                    return Err(EngineError::NothingToUndo { reason: "status_changed event has no old_value".into() });
                };
                let category = self.templates.category_or_inferred(&current.issue_type, old_status);
                let updates = IssueUpdates {
                    status: Some(old_status.clone()),
                    closed_at: Some(if category == Category::Done { Some(chrono::Utc::now()) } else { None }),
                    ..Default::default()
                };
                self.storage.update_issue_no_event(&current.id, &updates)?;
            }
            EventType::TitleChanged => {
                let old = event.old_value.clone().unwrap_or_default();
                self.storage.update_issue_no_event(&current.id, &IssueUpdates { title: Some(old), ..Default::default() })?;
            }
            EventType::PriorityChanged => {
                let Some(ref old) = event.old_value else {
                    return Err(EngineError::NothingToUndo { reason: "priority_changed event has no old_value".into() });
                };
                let priority: i32 = old.parse().map_err(|_| EngineError::NothingToUndo { reason: "priority_changed old_value is not an integer".into() })?;
                self.storage.update_issue_no_event(&current.id, &IssueUpdates { priority: Some(priority), ..Default::default() })?;
            }
            EventType::AssigneeChanged | EventType::Claimed => {
                let old = event.old_value.clone().unwrap_or_default();
                self.storage.update_issue_no_event(&current.id, &IssueUpdates { assignee: Some(old), ..Default::default() })?;
            }
            EventType::DescriptionChanged => {
                let old = event.old_value.clone().unwrap_or_default();
                self.storage.update_issue_no_event(&current.id, &IssueUpdates { description: Some(old), ..Default::default() })?;
            }
            EventType::NotesChanged => {
                let old = event.old_value.clone().unwrap_or_default();
                self.storage.update_issue_no_event(&current.id, &IssueUpdates { notes: Some(old), ..Default::default() })?;
            }
            EventType::DependencyAdded => {
                let Some(ref new_value) = event.new_value else {
                    return Err(EngineError::NothingToUndo { reason: "dependency_added event has no new_value".into() });
                };
                let (kind_str, depends_on_id) = new_value
                    .split_once(':')
                    .ok_or_else(|| EngineError::NothingToUndo { reason: "dependency_added new_value is not kind:id".into() })?;
                let kind = filigree_core::enums::DependencyType::from(kind_str);
                self.storage.remove_dependency_no_event(&current.id, depends_on_id, &kind)?;
            }
            EventType::DependencyRemoved => {
                // The removed event only records the old depends_on_id, not its
                // kind; undo reinserts as the default `blocks` kind.
                let Some(ref depends_on_id) = event.old_value else {
                    return Err(EngineError::NothingToUndo { reason: "dependency_removed event has no old_value".into() });
                };
                let dep = filigree_core::dependency::Dependency {
                    issue_id: current.id.clone(),
                    depends_on_id: depends_on_id.clone(),
                    kind: filigree_core::enums::DependencyType::Blocks,
                    created_at: chrono::Utc::now(),
                    created_by: actor.to_string(),
                };
                self.storage.add_dependency_no_event(&dep)?;
            }
            other => {
                return Err(EngineError::NothingToUndo { reason: format!("{other} is not reversible") });
            }
        }
        Ok(())
    }

    /// Sets done-category issues closed more than `days_old` days ago to
    /// `archived`. Returns the archived issue ids.
    pub fn archive_closed(&self, days_old: i64, actor: &str) -> Result<Vec<String>> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days_old);
        let filter = IssueFilter::default();
        let candidates = self.storage.list_issues(&filter)?;

        let mut archived = Vec::new();
        for issue in candidates {
            let category = self.templates.category_or_inferred(&issue.issue_type, &issue.status);
            let Some(closed_at) = issue.closed_at else { continue };
            if category == Category::Done && closed_at < cutoff {
                self.storage.close_issue(&issue.id, "archived", actor)?;
                archived.push(issue.id);
            }
        }
        Ok(archived)
    }
}
