//! Enum types for the Filigree system.
//!
//! Each enum has:
//! - Custom Serialize (as snake_case/kebab-case string)
//! - Custom Deserialize (known variants + catch-all Custom(String) fallback)
//! - `as_str()`, `is_default()`, `Display` impl

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Macro: defines an enum with known string variants + a Custom(String) fallback.
// ---------------------------------------------------------------------------
macro_rules! define_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident, custom_variant = $custom_variant:ident,
        variants: [
            $( ($variant:ident, $str:expr) ),+ $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
            $custom_variant(String),
        }

        impl $name {
            /// Returns the string representation.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $str, )+
                    Self::$custom_variant(s) => s.as_str(),
                }
            }

            /// Returns `true` if this is the default variant.
            pub fn is_default(&self) -> bool {
                *self == Self::$default
            }

            /// Returns `true` if this is a built-in (non-custom) variant.
            pub fn is_builtin(&self) -> bool {
                !matches!(self, Self::$custom_variant(_))
            }

            /// Returns `true` if this is a known valid variant or any non-empty custom string.
            pub fn is_valid(&self) -> bool {
                match self {
                    Self::$custom_variant(s) => !s.is_empty(),
                    _ => true,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s.as_str()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $str => Self::$variant, )+
                    other => Self::$custom_variant(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                match s.as_str() {
                    $( $str => Self::$variant, )+
                    _ => Self::$custom_variant(s),
                }
            }
        }
    };
}

// ===========================================================================
// DependencyType
// ===========================================================================

define_enum! {
    /// Relationship type between issues. `Blocks` is the default edge kind
    /// used when none is given; `ParentChild` is used for plan decomposition.
    DependencyType, default = Blocks, custom_variant = Custom,
    variants: [
        (Blocks, "blocks"),
        (ParentChild, "parent-child"),
        (Related, "related"),
        (DiscoveredFrom, "discovered-from"),
    ]
}

impl DependencyType {
    /// Returns `true` if this dependency type blocks work (affects ready calculation).
    pub fn affects_ready_work(&self) -> bool {
        matches!(self, Self::Blocks | Self::ParentChild)
    }
}

// ===========================================================================
// EventType
// ===========================================================================

/// Categorises audit trail events recorded against an issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    TitleChanged,
    StatusChanged,
    PriorityChanged,
    AssigneeChanged,
    DescriptionChanged,
    NotesChanged,
    Claimed,
    Released,
    Commented,
    Closed,
    Reopened,
    Archived,
    DependencyAdded,
    DependencyRemoved,
    LabelAdded,
    LabelRemoved,
    Undone,
    /// Catch-all for unknown / future event types.
    Other(String),
}

/// Event types whose effect [`crate::enums::EventType`] can be mechanically
/// inverted by undo. Mirrors the set of mutations that carry an `old_value`.
pub const REVERSIBLE_EVENT_TYPES: &[EventType] = &[
    EventType::StatusChanged,
    EventType::TitleChanged,
    EventType::PriorityChanged,
    EventType::AssigneeChanged,
    EventType::Claimed,
    EventType::DependencyAdded,
    EventType::DependencyRemoved,
    EventType::DescriptionChanged,
    EventType::NotesChanged,
];

impl EventType {
    /// Returns the string representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::TitleChanged => "title_changed",
            Self::StatusChanged => "status_changed",
            Self::PriorityChanged => "priority_changed",
            Self::AssigneeChanged => "assignee_changed",
            Self::DescriptionChanged => "description_changed",
            Self::NotesChanged => "notes_changed",
            Self::Claimed => "claimed",
            Self::Released => "released",
            Self::Commented => "commented",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::Archived => "archived",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyRemoved => "dependency_removed",
            Self::LabelAdded => "label_added",
            Self::LabelRemoved => "label_removed",
            Self::Undone => "undone",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Returns `true` if undo knows how to invert this event type.
    pub fn is_reversible(&self) -> bool {
        REVERSIBLE_EVENT_TYPES.contains(self)
    }
}

impl Default for EventType {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "created" => Self::Created,
            "updated" => Self::Updated,
            "title_changed" => Self::TitleChanged,
            "status_changed" => Self::StatusChanged,
            "priority_changed" => Self::PriorityChanged,
            "assignee_changed" => Self::AssigneeChanged,
            "description_changed" => Self::DescriptionChanged,
            "notes_changed" => Self::NotesChanged,
            "claimed" => Self::Claimed,
            "released" => Self::Released,
            "commented" => Self::Commented,
            "closed" => Self::Closed,
            "reopened" => Self::Reopened,
            "archived" => Self::Archived,
            "dependency_added" => Self::DependencyAdded,
            "dependency_removed" => Self::DependencyRemoved,
            "label_added" => Self::LabelAdded,
            "label_removed" => Self::LabelRemoved,
            "undone" => Self::Undone,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        let known = Self::from(s.as_str());
        if matches!(known, Self::Other(_)) {
            Self::Other(s)
        } else {
            known
        }
    }
}

// ===========================================================================
// Severity (scan findings)
// ===========================================================================

define_enum! {
    /// Severity of a scan finding.
    Severity, default = Info, custom_variant = Custom,
    variants: [
        (Info, "info"),
        (Low, "low"),
        (Medium, "medium"),
        (High, "high"),
        (Critical, "critical"),
    ]
}

impl Severity {
    /// Coerces a free-form scanner-reported severity string onto the known
    /// scale, falling back to `Info` for anything unrecognised.
    pub fn coerce(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "info" | "note" | "notice" => Self::Info,
            "low" | "minor" => Self::Low,
            "medium" | "warning" | "warn" | "moderate" => Self::Medium,
            "high" | "error" => Self::High,
            "critical" | "fatal" => Self::Critical,
            other => Self::Custom(other.to_owned()),
        }
    }

    /// Weight used for severity-weighted hotspot ranking: critical=4, high=3,
    /// medium=2, low=1, info=0. Unknown custom severities weigh 0.
    pub fn weight(&self) -> i64 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
            Self::Info | Self::Custom(_) => 0,
        }
    }
}

// ===========================================================================
// FindingStatus
// ===========================================================================

define_enum! {
    /// Lifecycle state of a scan finding.
    FindingStatus, default = Open, custom_variant = Custom,
    variants: [
        (Open, "open"),
        (Acknowledged, "acknowledged"),
        (Fixed, "fixed"),
        (FalsePositive, "false_positive"),
        (UnseenInLatest, "unseen_in_latest"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_type_roundtrip() {
        assert_eq!(DependencyType::from("blocks"), DependencyType::Blocks);
        assert_eq!(DependencyType::ParentChild.as_str(), "parent-child");
        assert!(DependencyType::Blocks.affects_ready_work());
        assert!(!DependencyType::Related.affects_ready_work());
        assert_eq!(
            DependencyType::from("owns"),
            DependencyType::Custom("owns".into())
        );
    }

    #[test]
    fn event_type_reversible_set() {
        assert!(EventType::StatusChanged.is_reversible());
        assert!(EventType::Claimed.is_reversible());
        assert!(!EventType::Commented.is_reversible());
        assert!(!EventType::Created.is_reversible());
    }

    #[test]
    fn event_type_custom_roundtrip() {
        let json = r#""scanned""#;
        let e: EventType = serde_json::from_str(json).unwrap();
        assert_eq!(e, EventType::Other("scanned".into()));
        assert_eq!(serde_json::to_string(&e).unwrap(), json);
    }

    #[test]
    fn severity_coerce_unknown_to_custom() {
        assert_eq!(Severity::coerce("WARN"), Severity::Medium);
        assert_eq!(Severity::coerce("blocker"), Severity::Custom("blocker".into()));
    }

    #[test]
    fn finding_status_default_is_open() {
        assert_eq!(FindingStatus::default(), FindingStatus::Open);
    }
}
