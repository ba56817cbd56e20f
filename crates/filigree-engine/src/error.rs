//! Engine-level error type.
//!
//! Wraps the lower layers' errors via `#[from]` so callers mostly match on
//! one enum, plus variants for failures only the orchestration layer can
//! detect (transition rejection, claim conflicts).

use filigree_storage::StorageError;
use filigree_templates::TemplateError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A structural validation rule was violated (title, priority, label name).
    #[error("validation error: {0}")]
    Validation(#[from] filigree_core::validation::ValidationError),

    /// The requested status transition is not permitted for the issue's type.
    #[error("transition from {from} to {to} is not allowed for type {issue_type}: {reason}")]
    TransitionRejected {
        issue_type: String,
        from: String,
        to: String,
        reason: String,
    },

    /// A claim was attempted on an issue already held by someone else.
    #[error("issue {id} is already claimed by {assignee}")]
    ClaimConflict { id: String, assignee: String },

    /// The issue is not in a state the requested operation allows.
    #[error("issue {id} is in status {status} ({category:?}), which does not allow this operation: {reason}")]
    WrongState {
        id: String,
        status: String,
        category: filigree_core::template::Category,
        reason: String,
    },

    /// Nothing to undo, or the most recent reversible event was already undone.
    #[error("nothing to undo: {reason}")]
    NothingToUndo { reason: String },

    /// Underlying storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Underlying template registry failure.
    #[error(transparent)]
    Template(#[from] TemplateError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Returns `true` if this is a not-found error, from this layer or
    /// forwarded from storage.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }
}
