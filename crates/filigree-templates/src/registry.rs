//! The [`TemplateRegistry`]: load, validate, and query workflow packs.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use filigree_core::template::{Category, Enforcement, Pack, TypeTemplate};

use crate::builtin::builtin_packs;
use crate::error::{Result, TemplateError};

/// One possible next state from the current one, with field readiness baked in.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionInfo {
    pub to: String,
    pub category: Category,
    pub enforcement: Enforcement,
    pub requires_fields: Vec<String>,
    pub missing_fields: Vec<String>,
    pub ready: bool,
}

/// The result of checking whether a specific transition may be taken.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionValidation {
    pub allowed: bool,
    pub enforcement: Enforcement,
    pub missing_fields: Vec<String>,
    pub warnings: Vec<String>,
}

/// Loads built-in and on-disk packs, and answers workflow questions about
/// issue types: initial state, valid states/transitions, field requirements.
///
/// Types from packs not named in `enabled_packs` are treated as unknown --
/// the registry still holds their definition (so re-enabling is cheap) but
/// every query answers as if the type were unregistered, which routes
/// callers onto the permissive fallback path.
pub struct TemplateRegistry {
    packs: Vec<Pack>,
    enabled: HashSet<String>,
}

impl TemplateRegistry {
    /// Builds a registry from the built-in packs, enabling exactly the named
    /// ones (all three built-ins are enabled by default if the caller passes
    /// their names).
    pub fn new(enabled_packs: &[String]) -> Self {
        Self {
            packs: builtin_packs(),
            enabled: enabled_packs.iter().cloned().collect(),
        }
    }

    /// Loads every `*.json` file in `dir` as a [`Pack`] override, merging it
    /// in (replacing any built-in pack of the same name). Malformed types
    /// within an otherwise-valid pack file are skipped with a warning rather
    /// than failing the whole load; a file that isn't valid JSON at all is
    /// skipped the same way.
    pub fn load_overrides(&mut self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        let entries = fs::read_dir(dir).map_err(|e| TemplateError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = match fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable template override");
                    continue;
                }
            };
            let mut pack: Pack = match serde_json::from_str(&text) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed template override");
                    continue;
                }
            };
            pack.types.retain(|t| match validate_type_template(t) {
                Ok(()) => true,
                Err(reason) => {
                    tracing::warn!(pack = %pack.name, r#type = %t.name, reason, "skipping invalid type template");
                    false
                }
            });
            self.packs.retain(|p| p.name != pack.name);
            self.packs.push(pack);
        }
        Ok(())
    }

    fn find_type(&self, name: &str) -> Option<&TypeTemplate> {
        self.packs
            .iter()
            .find(|p| self.enabled.contains(&p.name))
            .into_iter()
            .flat_map(|p| p.types.iter())
            .find(|t| t.name == name)
            .or_else(|| {
                self.packs
                    .iter()
                    .filter(|p| self.enabled.contains(&p.name))
                    .flat_map(|p| p.types.iter())
                    .find(|t| t.name == name)
            })
    }

    /// Returns the named type's template, or `None` if it isn't registered
    /// (unknown, or its pack is disabled).
    pub fn get_type(&self, name: &str) -> Option<&TypeTemplate> {
        self.find_type(name)
    }

    /// The initial state for a type; `"open"` for unknown types.
    pub fn get_initial_state(&self, type_name: &str) -> String {
        self.find_type(type_name)
            .map(|t| t.initial_state.clone())
            .unwrap_or_else(|| "open".to_string())
    }

    /// Ordered list of valid states, or `None` for unknown types (permissive).
    pub fn get_valid_states(&self, type_name: &str) -> Option<Vec<String>> {
        self.find_type(type_name)
            .map(|t| t.states.iter().map(|s| s.name.clone()).collect())
    }

    /// The category of `state` for `type_name`, or `None` when not resolvable
    /// from the template (caller should fall back to [`infer_status_category`]).
    pub fn get_category(&self, type_name: &str, state: &str) -> Option<Category> {
        self.find_type(type_name).and_then(|t| t.category_of(state))
    }

    /// [`Self::get_category`] with the [`infer_status_category`] heuristic
    /// fallback applied, so callers never have to repeat the `unwrap_or_else`.
    pub fn category_or_inferred(&self, type_name: &str, state: &str) -> Category {
        self.get_category(type_name, state)
            .unwrap_or_else(|| infer_status_category(state))
    }

    /// Every transition declared out of `state` for `type_name`, annotated
    /// with field readiness against the given `fields` map.
    pub fn get_valid_transitions(
        &self,
        type_name: &str,
        state: &str,
        fields: &Map<String, Value>,
    ) -> Vec<TransitionInfo> {
        let Some(template) = self.find_type(type_name) else {
            return Vec::new();
        };
        template
            .transitions
            .iter()
            .filter(|t| t.from == state)
            .filter_map(|t| {
                let category = template.category_of(&t.to)?;
                let missing_fields = missing_required(&t.requires_fields, fields);
                let ready = missing_fields.is_empty();
                Some(TransitionInfo {
                    to: t.to.clone(),
                    category,
                    enforcement: t.enforcement,
                    requires_fields: t.requires_fields.clone(),
                    missing_fields,
                    ready,
                })
            })
            .collect()
    }

    /// Checks whether `from -> to` is allowed for `type_name` given `fields`.
    ///
    /// Unknown types are permissive: any transition is allowed. Known types
    /// reject transitions absent from their table.
    pub fn validate_transition(
        &self,
        type_name: &str,
        from: &str,
        to: &str,
        fields: &Map<String, Value>,
    ) -> TransitionValidation {
        let Some(template) = self.find_type(type_name) else {
            return TransitionValidation {
                allowed: true,
                enforcement: Enforcement::None,
                missing_fields: Vec::new(),
                warnings: Vec::new(),
            };
        };

        let Some(transition) = template.transitions.iter().find(|t| t.from == from && t.to == to)
        else {
            return TransitionValidation {
                allowed: false,
                enforcement: Enforcement::None,
                missing_fields: Vec::new(),
                warnings: vec![format!("no declared transition from {from} to {to} for type {type_name}")],
            };
        };

        let missing_fields = missing_required(&transition.requires_fields, fields);
        match transition.enforcement {
            Enforcement::Hard if !missing_fields.is_empty() => TransitionValidation {
                allowed: false,
                enforcement: Enforcement::Hard,
                missing_fields,
                warnings: Vec::new(),
            },
            Enforcement::Soft if !missing_fields.is_empty() => TransitionValidation {
                allowed: true,
                enforcement: Enforcement::Soft,
                missing_fields: missing_fields.clone(),
                warnings: missing_fields
                    .iter()
                    .map(|f| format!("missing recommended field {f}"))
                    .collect(),
            },
            other => TransitionValidation {
                allowed: true,
                enforcement: other,
                missing_fields: Vec::new(),
                warnings: Vec::new(),
            },
        }
    }

    /// Field names whose `required_at` includes `state` and are unpopulated.
    pub fn validate_fields_for_state(
        &self,
        type_name: &str,
        state: &str,
        fields: &Map<String, Value>,
    ) -> Vec<String> {
        let Some(template) = self.find_type(type_name) else {
            return Vec::new();
        };
        template
            .fields
            .iter()
            .filter(|f| f.required_at.contains(state))
            .filter(|f| is_missing(fields.get(&f.name)))
            .map(|f| f.name.clone())
            .collect()
    }
}

fn missing_required(required: &[String], fields: &Map<String, Value>) -> Vec<String> {
    required
        .iter()
        .filter(|name| is_missing(fields.get(*name)))
        .cloned()
        .collect()
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None => true,
        Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Heuristic status-category classifier used when a template has no
/// declared category for an issue's exact status string (unknown types, or
/// a status outside the template's declared state set).
pub fn infer_status_category(status: &str) -> Category {
    const DONE: &[&str] = &["closed", "done", "fixed", "released", "archived", "cancelled", "wont_fix"];
    const WIP: &[&str] = &["in_progress", "wip", "fixing", "verifying", "reviewing", "blocked_active"];

    if DONE.contains(&status) {
        Category::Done
    } else if WIP.contains(&status) {
        Category::Wip
    } else {
        Category::Open
    }
}

/// Parse-time validation for a type template loaded from an override file.
/// Returns a human-readable reason on failure.
fn validate_type_template(t: &TypeTemplate) -> std::result::Result<(), String> {
    if t.states.is_empty() {
        return Err("no states declared".to_string());
    }
    if !t.has_state(&t.initial_state) {
        return Err(format!("initial_state {:?} is not a declared state", t.initial_state));
    }
    for transition in &t.transitions {
        if !t.has_state(&transition.from) {
            return Err(format!("transition references undeclared state {:?}", transition.from));
        }
        if !t.has_state(&transition.to) {
            return Err(format!("transition references undeclared state {:?}", transition.to));
        }
    }
    for field in &t.fields {
        for state in &field.required_at {
            if !t.has_state(state) {
                return Err(format!(
                    "field {:?} required_at references undeclared state {:?}",
                    field.name, state
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_registry() -> TemplateRegistry {
        TemplateRegistry::new(&["core".into(), "planning".into(), "release".into()])
    }

    #[test]
    fn get_initial_state_known_type() {
        let reg = enabled_registry();
        assert_eq!(reg.get_initial_state("bug"), "open");
        assert_eq!(reg.get_initial_state("release"), "future");
    }

    #[test]
    fn get_initial_state_unknown_type_falls_back_to_open() {
        let reg = enabled_registry();
        assert_eq!(reg.get_initial_state("nonexistent"), "open");
    }

    #[test]
    fn disabled_pack_type_is_treated_as_unknown() {
        let reg = TemplateRegistry::new(&["planning".into()]);
        assert!(reg.get_type("bug").is_none());
        assert_eq!(reg.get_valid_states("bug"), None);
    }

    #[test]
    fn validate_transition_rejects_undeclared_for_known_type() {
        let reg = enabled_registry();
        let fields = Map::new();
        let result = reg.validate_transition("bug", "open", "in_review", &fields);
        assert!(!result.allowed);
    }

    #[test]
    fn validate_transition_permissive_for_unknown_type() {
        let reg = enabled_registry();
        let fields = Map::new();
        let result = reg.validate_transition("widget", "anywhere", "somewhere", &fields);
        assert!(result.allowed);
    }

    #[test]
    fn validate_transition_hard_enforcement_blocks_on_missing_field() {
        let reg = enabled_registry();
        let fields = Map::new();
        let result = reg.validate_transition("bug", "verifying", "closed", &fields);
        assert!(!result.allowed);
        assert_eq!(result.missing_fields, vec!["resolution".to_string()]);
    }

    #[test]
    fn validate_transition_hard_enforcement_allows_with_field_present() {
        let reg = enabled_registry();
        let mut fields = Map::new();
        fields.insert("resolution".into(), Value::String("fixed in patch".into()));
        let result = reg.validate_transition("bug", "verifying", "closed", &fields);
        assert!(result.allowed);
        assert!(result.missing_fields.is_empty());
    }

    #[test]
    fn whitespace_only_field_counts_as_missing() {
        let reg = enabled_registry();
        let mut fields = Map::new();
        fields.insert("resolution".into(), Value::String("   ".into()));
        let result = reg.validate_transition("bug", "verifying", "closed", &fields);
        assert!(!result.allowed);
    }

    #[test]
    fn infer_status_category_matches_heuristic() {
        assert_eq!(infer_status_category("closed"), Category::Done);
        assert_eq!(infer_status_category("wip"), Category::Wip);
        assert_eq!(infer_status_category("backlog"), Category::Open);
    }

    #[test]
    fn category_or_inferred_prefers_template_over_heuristic() {
        let reg = enabled_registry();
        // "in_review" is a declared wip state for "feature", but the bare
        // heuristic doesn't recognize that spelling and would call it open.
        assert_eq!(infer_status_category("in_review"), Category::Open);
        assert_eq!(reg.category_or_inferred("feature", "in_review"), Category::Wip);
    }

    #[test]
    fn category_or_inferred_falls_back_for_unknown_type() {
        let reg = enabled_registry();
        assert_eq!(reg.category_or_inferred("widget", "closed"), Category::Done);
    }

    #[test]
    fn get_valid_transitions_reports_readiness() {
        let reg = enabled_registry();
        let fields = Map::new();
        let transitions = reg.get_valid_transitions("bug", "verifying", &fields);
        let to_closed = transitions.iter().find(|t| t.to == "closed").unwrap();
        assert!(!to_closed.ready);
        assert_eq!(to_closed.missing_fields, vec!["resolution".to_string()]);
    }

    #[test]
    fn validate_type_template_rejects_bad_initial_state() {
        let t = TypeTemplate {
            name: "bad".into(),
            display_name: "Bad".into(),
            description: String::new(),
            states: vec![filigree_core::template::State {
                name: "open".into(),
                category: Category::Open,
            }],
            initial_state: "missing".into(),
            transitions: vec![],
            fields: vec![],
        };
        assert!(validate_type_template(&t).is_err());
    }
}
