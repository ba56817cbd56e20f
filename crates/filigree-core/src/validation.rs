//! Structural issue validation rules.
//!
//! Only checks that don't require the template registry live here (title
//! shape, priority range). Status/transition validity and the
//! `closed_at` <-> done-category invariant are enforced by the issue engine,
//! which has access to the template registry's category resolution.

use crate::issue::Issue;

/// Error type for validation failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("title is required")]
    TitleRequired,

    #[error("title must be 500 characters or less (got {0})")]
    TitleTooLong(usize),

    #[error("priority must be between 0 and 4 (got {0})")]
    InvalidPriority(i32),

    #[error("label name cannot be empty")]
    EmptyLabel,

    #[error("label name '{0}' collides with a registered type name")]
    ReservedLabel(String),
}

/// Validates the structural invariants of an issue that hold independent of
/// any workflow template (title shape, priority range).
pub fn validate(issue: &Issue) -> Result<(), ValidationError> {
    let title = issue.title.trim();
    if title.is_empty() {
        return Err(ValidationError::TitleRequired);
    }
    if issue.title.len() > 500 {
        return Err(ValidationError::TitleTooLong(issue.title.len()));
    }
    if !(0..=4).contains(&issue.priority) {
        return Err(ValidationError::InvalidPriority(issue.priority));
    }
    Ok(())
}

/// Validates a label name against the reserved-type-name rule.
pub fn validate_label_name(label: &str, registered_types: &[&str]) -> Result<(), ValidationError> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyLabel);
    }
    let lower = trimmed.to_lowercase();
    if registered_types.iter().any(|t| t.to_lowercase() == lower) {
        return Err(ValidationError::ReservedLabel(trimmed.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueBuilder;

    #[test]
    fn valid_issue_passes() {
        let issue = IssueBuilder::new("Valid issue").priority(2).build();
        assert!(validate(&issue).is_ok());
    }

    #[test]
    fn empty_title_fails() {
        let issue = IssueBuilder::new("").build();
        assert_eq!(validate(&issue), Err(ValidationError::TitleRequired));
    }

    #[test]
    fn whitespace_only_title_fails() {
        let issue = IssueBuilder::new("   ").build();
        assert_eq!(validate(&issue), Err(ValidationError::TitleRequired));
    }

    #[test]
    fn long_title_fails() {
        let title = "x".repeat(501);
        let issue = IssueBuilder::new(title).build();
        assert_eq!(validate(&issue), Err(ValidationError::TitleTooLong(501)));
    }

    #[test]
    fn invalid_priority_fails() {
        let issue = IssueBuilder::new("Test").priority(5).build();
        assert_eq!(validate(&issue), Err(ValidationError::InvalidPriority(5)));
    }

    #[test]
    fn negative_priority_fails() {
        let issue = IssueBuilder::new("Test").priority(-1).build();
        assert_eq!(validate(&issue), Err(ValidationError::InvalidPriority(-1)));
    }

    #[test]
    fn label_name_empty_rejected() {
        assert_eq!(
            validate_label_name("  ", &["bug", "task"]),
            Err(ValidationError::EmptyLabel)
        );
    }

    #[test]
    fn label_name_reserved_case_insensitive() {
        assert_eq!(
            validate_label_name("Bug", &["bug", "task"]),
            Err(ValidationError::ReservedLabel("Bug".into()))
        );
    }

    #[test]
    fn label_name_accepted() {
        assert!(validate_label_name("tech-debt", &["bug", "task"]).is_ok());
    }
}
