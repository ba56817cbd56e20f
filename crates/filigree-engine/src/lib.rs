//! Orchestration layer over [`filigree_storage`]: issue and dependency
//! lifecycle rules, event history and undo, scan ingestion, and the
//! markdown summary projection.

mod dependency_engine;
mod error;
mod event_log;
mod files_engine;
mod issue_engine;
mod summary;

pub use dependency_engine::{
    CriticalPathItem, DependencyEngine, PhaseProgress, PhaseSpec, PhaseWithSteps, Plan, PlanProgress, PlanSpec,
    StepSpec,
};
pub use error::{EngineError, Result};
pub use event_log::{EventLog, UndoResult};
pub use files_engine::{FileHotspot, FilesEngine, IngestFinding, IngestRequest, IngestResult, TimelineEntry, TimelineSource};
pub use issue_engine::{BatchError, BatchResult, IssueEngine, IssueValidation, NewIssue};
pub use summary::{generate_summary, write_summary};
