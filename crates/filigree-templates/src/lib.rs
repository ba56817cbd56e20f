//! Workflow pack and type-template registry.
//!
//! A [`Pack`](filigree_core::template::Pack) groups related issue types
//! (`core`, `planning`, `release`); each type carries its own state machine,
//! field schema, and transition table. The [`TemplateRegistry`] loads the
//! built-in packs plus any on-disk overrides and answers the workflow
//! questions the issue engine needs: what state does a new issue start in,
//! what transitions are legal, which fields are missing.

pub mod builtin;
pub mod error;
pub mod registry;

pub use builtin::{builtin_packs, core_pack, planning_pack, release_pack, FUTURE_RELEASE_STATE, FUTURE_RELEASE_TITLE, FUTURE_RELEASE_TYPE};
pub use error::{Result, TemplateError};
pub use registry::{infer_status_category, TemplateRegistry, TransitionInfo, TransitionValidation};
