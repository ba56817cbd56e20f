//! Dependency types -- relationships between issues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::DependencyType;

/// A directed edge between two issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: String,

    pub depends_on_id: String,

    /// Edge kind (serialised as "kind" in JSON). Defaults to `blocks`.
    #[serde(rename = "kind")]
    pub kind: DependencyType,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
}
