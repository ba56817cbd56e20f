//! The `Issue` entity and its builder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single tracked work item.
///
/// This is the raw storage row shape. Computed relationships (`blocked_by`,
/// `blocks`, `is_ready`, `children`, `labels`, `status_category`) are not
/// part of this type -- they are attached by the issue engine on read via
/// [`IssueView`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,

    pub title: String,

    /// Free-form state name, drawn from the issue's type's state set.
    pub status: String,

    /// 0 (critical) through 4 (lowest).
    pub priority: i32,

    /// Registered type name (e.g. "bug", "task", "milestone").
    #[serde(rename = "type")]
    pub issue_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assignee: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    /// Type-specific data, keyed by the type's declared field names.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

/// An issue plus the relationships the issue engine computes on read.
///
/// Never persisted directly; assembled per-request from the raw [`Issue`]
/// row and joined dependency/label data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueView {
    #[serde(flatten)]
    pub issue: Issue,

    pub status_category: String,

    /// Ids of open-category blockers only.
    pub blocked_by: Vec<String>,

    /// Forward edges regardless of the other side's state.
    pub blocks: Vec<String>,

    pub is_ready: bool,

    pub children: Vec<String>,

    pub labels: Vec<String>,
}

/// Fluent builder for tests and programmatic issue construction.
pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            issue: Issue {
                id: String::new(),
                title: title.into(),
                status: "open".into(),
                priority: 2,
                issue_type: "task".into(),
                parent_id: None,
                assignee: String::new(),
                created_at: now,
                updated_at: now,
                closed_at: None,
                description: String::new(),
                notes: String::new(),
                fields: Map::new(),
            },
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.issue.id = id.into();
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.issue.status = status.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.issue.priority = priority;
        self
    }

    pub fn issue_type(mut self, issue_type: impl Into<String>) -> Self {
        self.issue.issue_type = issue_type.into();
        self
    }

    pub fn parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.issue.parent_id = Some(parent_id.into());
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.issue.assignee = assignee.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.issue.description = description.into();
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.issue.notes = notes.into();
        self
    }

    pub fn closed_at(mut self, closed_at: DateTime<Utc>) -> Self {
        self.issue.closed_at = Some(closed_at);
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.issue.fields.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Issue {
        self.issue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let issue = IssueBuilder::new("Fix the thing").build();
        assert_eq!(issue.title, "Fix the thing");
        assert_eq!(issue.status, "open");
        assert_eq!(issue.priority, 2);
        assert_eq!(issue.issue_type, "task");
        assert!(issue.parent_id.is_none());
        assert!(issue.closed_at.is_none());
    }

    #[test]
    fn builder_overrides() {
        let issue = IssueBuilder::new("Epic work")
            .id("proj-abc123")
            .status("in_progress")
            .priority(0)
            .issue_type("bug")
            .parent_id("proj-parent")
            .assignee("alice")
            .field("severity", Value::String("high".into()))
            .build();

        assert_eq!(issue.id, "proj-abc123");
        assert_eq!(issue.status, "in_progress");
        assert_eq!(issue.priority, 0);
        assert_eq!(issue.parent_id.as_deref(), Some("proj-parent"));
        assert_eq!(issue.assignee, "alice");
        assert_eq!(issue.fields.get("severity").unwrap(), "high");
    }

    #[test]
    fn issue_serde_roundtrip() {
        let issue = IssueBuilder::new("Roundtrip").id("proj-001").build();
        let json = serde_json::to_string(&issue).unwrap();
        assert!(json.contains(r#""type":"task""#));
        let back: Issue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, issue);
    }

    #[test]
    fn issue_view_flattens_issue_fields() {
        let issue = IssueBuilder::new("Viewed").id("proj-002").build();
        let view = IssueView {
            issue: issue.clone(),
            status_category: "open".into(),
            blocked_by: vec!["proj-001".into()],
            blocks: vec![],
            is_ready: false,
            children: vec![],
            labels: vec!["tech-debt".into()],
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["id"], "proj-002");
        assert_eq!(json["status_category"], "open");
        assert_eq!(json["is_ready"], false);
    }
}
