//! Built-in pack data: `core`, `planning`, `release`.
//!
//! Mirrors the reference implementation's default-enabled pack set. These
//! are plain literal [`Pack`] values rather than parsed JSON, so they can
//! never fail the parse-time validation that on-disk overrides go through.

use std::collections::BTreeSet;

use filigree_core::template::{Category, Enforcement, FieldKind, FieldSchema, Pack, State, Transition, TypeTemplate};

fn simple_three_state(name: &str, display_name: &str) -> TypeTemplate {
    TypeTemplate {
        name: name.into(),
        display_name: display_name.into(),
        description: String::new(),
        states: vec![
            State { name: "open".into(), category: Category::Open },
            State { name: "in_progress".into(), category: Category::Wip },
            State { name: "closed".into(), category: Category::Done },
        ],
        initial_state: "open".into(),
        transitions: vec![
            Transition { from: "open".into(), to: "in_progress".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
            Transition { from: "in_progress".into(), to: "open".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
            Transition { from: "in_progress".into(), to: "closed".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
            Transition { from: "open".into(), to: "closed".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
        ],
        fields: vec![],
    }
}

fn bug_template() -> TypeTemplate {
    TypeTemplate {
        name: "bug".into(),
        display_name: "Bug".into(),
        description: String::new(),
        states: vec![
            State { name: "open".into(), category: Category::Open },
            State { name: "in_progress".into(), category: Category::Wip },
            State { name: "verifying".into(), category: Category::Wip },
            State { name: "closed".into(), category: Category::Done },
            State { name: "wont_fix".into(), category: Category::Done },
        ],
        initial_state: "open".into(),
        transitions: vec![
            Transition { from: "open".into(), to: "in_progress".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
            Transition { from: "in_progress".into(), to: "verifying".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
            Transition { from: "verifying".into(), to: "in_progress".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
            Transition { from: "verifying".into(), to: "closed".into(), enforcement: Enforcement::Hard, requires_fields: vec!["resolution".into()] },
            Transition { from: "in_progress".into(), to: "closed".into(), enforcement: Enforcement::Hard, requires_fields: vec!["resolution".into()] },
            Transition { from: "open".into(), to: "wont_fix".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
        ],
        fields: vec![
            FieldSchema {
                name: "resolution".into(),
                kind: FieldKind::Text,
                options: vec![],
                default: None,
                description: "How the bug was resolved".into(),
                required_at: BTreeSet::from(["closed".to_string()]),
            },
            FieldSchema {
                name: "severity".into(),
                kind: FieldKind::Enum,
                options: vec!["low".into(), "medium".into(), "high".into(), "critical".into()],
                default: Some(serde_json::Value::String("medium".into())),
                description: "Bug severity".into(),
                required_at: BTreeSet::new(),
            },
        ],
    }
}

fn feature_template() -> TypeTemplate {
    TypeTemplate {
        name: "feature".into(),
        display_name: "Feature".into(),
        description: String::new(),
        states: vec![
            State { name: "open".into(), category: Category::Open },
            State { name: "in_progress".into(), category: Category::Wip },
            State { name: "in_review".into(), category: Category::Wip },
            State { name: "closed".into(), category: Category::Done },
        ],
        initial_state: "open".into(),
        transitions: vec![
            Transition { from: "open".into(), to: "in_progress".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
            Transition { from: "in_progress".into(), to: "in_review".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
            Transition { from: "in_review".into(), to: "in_progress".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
            Transition { from: "in_review".into(), to: "closed".into(), enforcement: Enforcement::Hard, requires_fields: vec![] },
        ],
        fields: vec![],
    }
}

/// The `core` pack: general-purpose issue types.
pub fn core_pack() -> Pack {
    Pack {
        name: "core".into(),
        description: "General-purpose issue types: bugs, tasks, features, chores.".into(),
        types: vec![
            bug_template(),
            simple_three_state("task", "Task"),
            feature_template(),
            simple_three_state("chore", "Chore"),
        ],
    }
}

/// The `planning` pack: hierarchical milestone/phase/step types.
pub fn planning_pack() -> Pack {
    Pack {
        name: "planning".into(),
        description: "Hierarchical planning types: milestones, phases, steps.".into(),
        types: vec![
            simple_three_state("milestone", "Milestone"),
            simple_three_state("phase", "Phase"),
            simple_three_state("step", "Step"),
        ],
    }
}

/// The `release` pack: the single `release` type, used for the singleton
/// "Future" release issue that unscheduled work attaches to.
pub fn release_pack() -> Pack {
    Pack {
        name: "release".into(),
        description: "Release tracking, including the catch-all \"Future\" release.".into(),
        types: vec![TypeTemplate {
            name: "release".into(),
            display_name: "Release".into(),
            description: String::new(),
            states: vec![
                State { name: "future".into(), category: Category::Open },
                State { name: "in_progress".into(), category: Category::Wip },
                State { name: "released".into(), category: Category::Done },
            ],
            initial_state: "future".into(),
            transitions: vec![
                Transition { from: "future".into(), to: "in_progress".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
                Transition { from: "in_progress".into(), to: "released".into(), enforcement: Enforcement::Hard, requires_fields: vec!["version".into()] },
                Transition { from: "future".into(), to: "released".into(), enforcement: Enforcement::Soft, requires_fields: vec![] },
            ],
            fields: vec![FieldSchema {
                name: "version".into(),
                kind: FieldKind::Text,
                options: vec![],
                default: None,
                description: "Released version identifier".into(),
                required_at: BTreeSet::from(["released".to_string()]),
            }],
        }],
    }
}

/// The three packs enabled by default.
pub fn builtin_packs() -> Vec<Pack> {
    vec![core_pack(), planning_pack(), release_pack()]
}

/// Name of the singleton catch-all release issue seeded at initialization.
pub const FUTURE_RELEASE_TITLE: &str = "Future";
pub const FUTURE_RELEASE_TYPE: &str = "release";
pub const FUTURE_RELEASE_STATE: &str = "future";
