//! File records, scan findings, and file/issue associations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::{FindingStatus, Severity};

/// A tracked file in the project, identified by its normalized path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,

    /// Normalized, project-relative path. Unique.
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single finding reported by a scanner run, attached to a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFinding {
    pub id: i64,

    pub file_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,

    pub scan_source: String,

    pub rule_id: String,

    pub severity: Severity,

    pub status: FindingStatus,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,

    pub scan_run_id: String,

    /// Line coerced to -1 when the finding has no line information, so the
    /// dedup key `(file_id, scan_source, rule_id, line_start)` is total.
    pub line_start: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<i64>,

    pub seen_count: i64,

    pub first_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// How a file relates to an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationType {
    BugIn,
    TaskFor,
    ScanFinding,
    MentionedIn,
}

/// A link between a file and an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAssociation {
    pub file_id: i64,
    pub issue_id: String,
    pub assoc_type: AssociationType,
    pub created_at: DateTime<Utc>,
}

/// An append-only per-file metadata change record, used for timeline merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEvent {
    pub id: i64,
    pub file_id: i64,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Coerces an optional scanner-reported line number onto the dedup key's
/// total ordering: missing lines become `-1`.
pub fn dedup_line(line: Option<i64>) -> i64 {
    line.unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_line_coerces_none_to_negative_one() {
        assert_eq!(dedup_line(None), -1);
        assert_eq!(dedup_line(Some(42)), 42);
    }

    #[test]
    fn association_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AssociationType::BugIn).unwrap(),
            "\"bug_in\""
        );
        assert_eq!(
            serde_json::to_string(&AssociationType::ScanFinding).unwrap(),
            "\"scan_finding\""
        );
    }

    #[test]
    fn scan_finding_serde_roundtrip() {
        let now = Utc::now();
        let finding = ScanFinding {
            id: 1,
            file_id: 2,
            issue_id: None,
            scan_source: "clippy".into(),
            rule_id: "needless_clone".into(),
            severity: Severity::Medium,
            status: FindingStatus::Open,
            message: "unnecessary clone".into(),
            suggestion: None,
            metadata: serde_json::json!({"confidence": "high"}),
            scan_run_id: "run-1".into(),
            line_start: 10,
            line_end: Some(10),
            seen_count: 1,
            first_seen: now,
            updated_at: now,
            last_seen_at: now,
        };
        let json = serde_json::to_string(&finding).unwrap();
        let back: ScanFinding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, finding);
    }
}
