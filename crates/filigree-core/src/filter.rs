//! Filter types for querying issues.

use chrono::{DateTime, Utc};

/// Filter for issue listing and search queries.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub status: Option<String>,
    pub issue_type: Option<String>,
    pub priority: Option<i32>,
    pub priority_min: Option<i32>,
    pub priority_max: Option<i32>,
    pub assignee: Option<String>,
    pub parent_id: Option<String>,

    /// AND semantics: issue must have ALL these labels.
    pub labels: Vec<String>,

    pub title_contains: Option<String>,

    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,

    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

/// Filter for ready-work queries (`claim_next` and friends).
#[derive(Debug, Clone, Default)]
pub struct WorkFilter {
    pub issue_type: Option<String>,
    pub priority_max: Option<i32>,
    pub assignee: Option<String>,
    pub parent_id: Option<String>,
    pub limit: Option<i32>,
}

/// Filter for stale in-progress issue queries.
#[derive(Debug, Clone)]
pub struct StaleFilter {
    /// Issues not updated in this many days.
    pub days: i32,
    pub limit: Option<i32>,
}

impl Default for StaleFilter {
    fn default() -> Self {
        Self {
            days: 3,
            limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_filter_defaults() {
        let f = IssueFilter::default();
        assert!(f.status.is_none());
        assert!(f.priority.is_none());
        assert!(f.labels.is_empty());
    }

    #[test]
    fn work_filter_defaults() {
        let f = WorkFilter::default();
        assert!(f.issue_type.is_none());
        assert!(f.assignee.is_none());
    }

    #[test]
    fn stale_filter_default_matches_threshold() {
        let f = StaleFilter::default();
        assert_eq!(f.days, 3);
        assert!(f.limit.is_none());
    }
}
