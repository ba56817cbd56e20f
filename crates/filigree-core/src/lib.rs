//! Core domain types for the Filigree issue tracker.
//!
//! This crate contains the data model shared by the storage, template, and
//! engine crates: issues, dependencies, comments/events/labels, file and
//! scan-finding records, and workflow template shapes.

pub mod comment;
pub mod dependency;
pub mod enums;
pub mod file;
pub mod filter;
pub mod idgen;
pub mod issue;
pub mod jsonl;
pub mod template;
pub mod validation;
