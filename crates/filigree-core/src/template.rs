//! Data shapes for workflow packs and type templates.
//!
//! These are plain data types shared between the storage layer (which
//! persists pack/template rows and loads on-disk overrides) and the
//! template registry (which resolves them into transition/validation
//! answers). The registry itself lives in a separate crate since it owns
//! load order, built-in pack data, and parse-time validation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// How strictly a transition's field requirements are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enforcement {
    /// Missing required fields block the transition.
    Hard,
    /// Missing required fields are allowed but produce a warning.
    Soft,
    /// No field requirement checking.
    None,
}

/// The three status categories a state can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Open,
    Wip,
    Done,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Wip => "wip",
            Self::Done => "done",
        }
    }
}

/// A single state in a type's workflow, e.g. `{name: "in_review", category: wip}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub name: String,
    pub category: Category,
}

/// An allowed state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub enforcement: Enforcement,
    #[serde(default)]
    pub requires_fields: Vec<String>,
}

/// The kind of value a dynamic field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Enum,
    Number,
    Bool,
}

/// A type-specific field schema entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: String,
    /// States at which this field becomes required.
    #[serde(default)]
    pub required_at: BTreeSet<String>,
}

/// A complete workflow definition for one issue type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeTemplate {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub states: Vec<State>,
    pub initial_state: String,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl TypeTemplate {
    /// Returns the category of the named state, if declared.
    pub fn category_of(&self, state: &str) -> Option<Category> {
        self.states
            .iter()
            .find(|s| s.name == state)
            .map(|s| s.category)
    }

    /// Returns `true` if the state is part of this type's declared set.
    pub fn has_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s.name == state)
    }
}

/// A named group of type templates, enabled or disabled per project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pack {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub types: Vec<TypeTemplate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_template_category_lookup() {
        let t = TypeTemplate {
            name: "bug".into(),
            display_name: "Bug".into(),
            description: String::new(),
            states: vec![
                State { name: "open".into(), category: Category::Open },
                State { name: "closed".into(), category: Category::Done },
            ],
            initial_state: "open".into(),
            transitions: vec![],
            fields: vec![],
        };
        assert_eq!(t.category_of("closed"), Some(Category::Done));
        assert_eq!(t.category_of("missing"), None);
        assert!(t.has_state("open"));
    }

    #[test]
    fn field_schema_serde_roundtrip() {
        let f = FieldSchema {
            name: "severity".into(),
            kind: FieldKind::Enum,
            options: vec!["low".into(), "high".into()],
            default: Some(serde_json::Value::String("low".into())),
            description: "Bug severity".into(),
            required_at: BTreeSet::from(["closed".to_string()]),
        };
        let json = serde_json::to_string(&f).unwrap();
        let back: FieldSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn enforcement_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Enforcement::Hard).unwrap(), "\"hard\"");
        assert_eq!(serde_json::to_string(&Enforcement::None).unwrap(), "\"none\"");
    }
}
