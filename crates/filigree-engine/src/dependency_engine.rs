//! Dependency graph operations: add/remove with cycle protection, readiness
//! queries, critical path, and milestone/phase/step plan creation.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Map;

use filigree_core::dependency::Dependency;
use filigree_core::enums::DependencyType;
use filigree_core::filter::{IssueFilter, WorkFilter};
use filigree_core::idgen;
use filigree_core::issue::Issue;
use filigree_core::template::Category;
use filigree_storage::{BlockedIssue, EpicStatus, IssueWithDependencyMetadata, Storage, StorageError, Transaction, TreeNode};
use filigree_templates::TemplateRegistry;

use crate::error::{EngineError, Result};
use crate::issue_engine::{is_unique_violation, IssueEngine, NewIssue, ID_SUFFIX_LEN, MAX_ID_RETRIES};

/// A single issue on the computed critical path, in traversal order.
#[derive(Debug, Clone)]
pub struct CriticalPathItem {
    pub issue: Issue,
    pub chain_length: i32,
}

/// A milestone plan: one parent issue plus nested phase/step children.
#[derive(Debug, Clone)]
pub struct Plan {
    pub milestone: Issue,
    pub phases: Vec<PhaseWithSteps>,
}

#[derive(Debug, Clone)]
pub struct PhaseWithSteps {
    pub phase: Issue,
    pub steps: Vec<Issue>,
}

/// Input shape for [`DependencyEngine::create_plan`].
#[derive(Debug, Clone)]
pub struct PlanSpec {
    pub milestone_title: String,
    pub phases: Vec<PhaseSpec>,
}

#[derive(Debug, Clone)]
pub struct PhaseSpec {
    pub title: String,
    pub steps: Vec<StepSpec>,
}

/// A single step within a phase, plus the steps it depends on.
///
/// Each entry in `deps` is either a bare step index (`"1"`, referring to
/// another step within the same phase) or a cross-phase reference of the
/// form `"phase_idx.step_idx"` (`"0.2"`, the third step of the first
/// phase). Indices are zero-based.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub title: String,
    pub deps: Vec<String>,
}

/// Roll-up progress for a single phase within a plan.
#[derive(Debug, Clone)]
pub struct PhaseProgress {
    pub phase: Issue,
    pub total: i32,
    pub completed: i32,
    pub ready: i32,
}

/// Roll-up progress for an entire milestone plan.
#[derive(Debug, Clone)]
pub struct PlanProgress {
    pub milestone: Issue,
    pub phases: Vec<PhaseProgress>,
    pub total_steps: i32,
    pub completed_steps: i32,
}

pub struct DependencyEngine {
    storage: Arc<dyn Storage>,
    templates: Arc<TemplateRegistry>,
}

impl DependencyEngine {
    pub fn new(storage: Arc<dyn Storage>, templates: Arc<TemplateRegistry>) -> Self {
        Self { storage, templates }
    }

    /// Adds a dependency edge. Self-edges are rejected here; cycles among
    /// `affects_ready_work` edges are rejected by the storage layer.
    pub fn add_dependency(&self, issue_id: &str, depends_on_id: &str, kind: DependencyType, actor: &str) -> Result<()> {
        if issue_id == depends_on_id {
            return Err(EngineError::Storage(StorageError::validation(
                "an issue cannot depend on itself",
            )));
        }
        self.storage.get_issue(issue_id)?;
        self.storage.get_issue(depends_on_id)?;

        let dep = Dependency {
            issue_id: issue_id.to_string(),
            depends_on_id: depends_on_id.to_string(),
            kind,
            created_at: Utc::now(),
            created_by: actor.to_string(),
        };
        Ok(self.storage.add_dependency(&dep, actor)?)
    }

    pub fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, kind: &DependencyType, actor: &str) -> Result<()> {
        Ok(self.storage.remove_dependency(issue_id, depends_on_id, kind, actor)?)
    }

    pub fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        Ok(self.storage.get_dependency_records(issue_id)?)
    }

    pub fn get_dependent_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        Ok(self.storage.get_dependent_records(issue_id)?)
    }

    pub fn get_dependencies_with_metadata(&self, issue_id: &str) -> Result<Vec<IssueWithDependencyMetadata>> {
        Ok(self.storage.get_dependencies_with_metadata(issue_id)?)
    }

    pub fn get_dependents_with_metadata(&self, issue_id: &str) -> Result<Vec<IssueWithDependencyMetadata>> {
        Ok(self.storage.get_dependents_with_metadata(issue_id)?)
    }

    pub fn get_dependency_tree(&self, issue_id: &str, max_depth: i32, reverse: bool) -> Result<Vec<TreeNode>> {
        Ok(self.storage.get_dependency_tree(issue_id, max_depth, reverse)?)
    }

    pub fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        Ok(self.storage.get_ready_work(filter, &self.templates)?)
    }

    pub fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        Ok(self.storage.get_blocked_issues(filter, &self.templates)?)
    }

    pub fn get_epics_eligible_for_closure(&self) -> Result<Vec<EpicStatus>> {
        Ok(self.storage.get_epics_eligible_for_closure(&self.templates)?)
    }

    /// Longest chain of blocking dependencies, root-first. Each item's
    /// `chain_length` is the number of blocking hops still ahead of it.
    pub fn get_critical_path(&self) -> Result<Vec<CriticalPathItem>> {
        let blocked = self.storage.get_blocked_issues(&WorkFilter::default(), &self.templates)?;
        if blocked.is_empty() {
            return Ok(Vec::new());
        }

        let mut longest: HashMap<String, i32> = HashMap::new();
        let mut memo_order: Vec<String> = Vec::new();
        let mut seen = HashSet::new();

        for b in &blocked {
            self.longest_chain(&b.issue.id, &mut longest, &mut seen, &mut memo_order)?;
        }

        let mut best_root = memo_order.into_iter().max_by_key(|id| longest.get(id).copied().unwrap_or(0));
        let Some(root_id) = best_root.take() else {
            return Ok(Vec::new());
        };

        let mut chain = Vec::new();
        let mut current = root_id;
        loop {
            let issue = self.storage.get_issue(&current)?;
            let length = longest.get(&current).copied().unwrap_or(0);
            chain.push(CriticalPathItem { issue, chain_length: length });

            let deps = self.storage.get_dependency_records(&current)?;
            let next = deps
                .iter()
                .filter(|d| d.kind.affects_ready_work())
                .max_by_key(|d| longest.get(&d.depends_on_id).copied().unwrap_or(-1));
            match next {
                Some(d) if longest.get(&d.depends_on_id).copied().unwrap_or(-1) >= 0 => {
                    current = d.depends_on_id.clone();
                }
                _ => break,
            }
        }
        Ok(chain)
    }

    fn longest_chain(
        &self,
        issue_id: &str,
        memo: &mut HashMap<String, i32>,
        visiting: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<i32> {
        if let Some(&len) = memo.get(issue_id) {
            return Ok(len);
        }
        if !visiting.insert(issue_id.to_string()) {
            // Cycle guard; storage already prevents real cycles among
            // readiness-affecting edges, but defends against concurrent writes.
            return Ok(0);
        }

        let deps = self.storage.get_dependency_records(issue_id)?;
        let mut best = 0;
        for dep in deps.iter().filter(|d| d.kind.affects_ready_work()) {
            let child_len = self.longest_chain(&dep.depends_on_id, memo, visiting, order)?;
            best = best.max(child_len + 1);
        }

        visiting.remove(issue_id);
        memo.insert(issue_id.to_string(), best);
        order.push(issue_id.to_string());
        Ok(best)
    }

    /// Creates a milestone issue, its phases (parented to the milestone),
    /// and each phase's steps (parented to the phase), wiring up any
    /// declared step dependencies as `Blocks` edges. The whole plan is
    /// created atomically: if any issue or edge fails to insert, nothing
    /// is left behind.
    pub fn create_plan(&self, issues: &IssueEngine, spec: PlanSpec, creator: &str) -> Result<Plan> {
        let resolved_deps = validate_and_resolve_plan_deps(&spec).map_err(EngineError::Storage)?;

        let id_prefix = issues.id_prefix().to_string();
        let templates = issues.templates().clone();
        let now = Utc::now();
        let milestone_title = spec.milestone_title;
        let phase_specs = spec.phases;

        let plan_cell: RefCell<Option<Plan>> = RefCell::new(None);

        self.storage.run_in_transaction(&|tx| {
            let milestone = insert_issue_via_tx(tx, &id_prefix, "milestone", milestone_title.clone(), None, creator, now, &templates)?;

            let mut phases = Vec::with_capacity(phase_specs.len());
            let mut flat_step_ids: Vec<String> = Vec::new();
            for phase_spec in &phase_specs {
                let phase = insert_issue_via_tx(tx, &id_prefix, "phase", phase_spec.title.clone(), Some(milestone.id.clone()), creator, now, &templates)?;

                let mut steps = Vec::with_capacity(phase_spec.steps.len());
                for step_spec in &phase_spec.steps {
                    let step = insert_issue_via_tx(tx, &id_prefix, "task", step_spec.title.clone(), Some(phase.id.clone()), creator, now, &templates)?;
                    flat_step_ids.push(step.id.clone());
                    steps.push(step);
                }
                phases.push(PhaseWithSteps { phase, steps });
            }

            for &(from, to) in &resolved_deps {
                let dep = Dependency {
                    issue_id: flat_step_ids[from].clone(),
                    depends_on_id: flat_step_ids[to].clone(),
                    kind: DependencyType::Blocks,
                    created_at: now,
                    created_by: creator.to_string(),
                };
                tx.add_dependency(&dep, creator)?;
            }

            *plan_cell.borrow_mut() = Some(Plan { milestone, phases });
            Ok(())
        })?;

        Ok(plan_cell.into_inner().expect("transaction closure sets the plan before returning Ok"))
    }

    /// Rolls a milestone's phases and steps up into aggregate progress.
    pub fn get_plan(&self, milestone_id: &str) -> Result<PlanProgress> {
        let milestone = self.storage.get_issue(milestone_id)?;
        let phase_issues = self.storage.list_issues(&IssueFilter {
            parent_id: Some(milestone_id.to_string()),
            ..Default::default()
        })?;

        let mut phases = Vec::with_capacity(phase_issues.len());
        let mut total_steps = 0;
        let mut completed_steps = 0;

        for phase in phase_issues {
            let steps = self.storage.list_issues(&IssueFilter {
                parent_id: Some(phase.id.clone()),
                ..Default::default()
            })?;

            let mut completed = 0;
            let mut ready = 0;
            for step in &steps {
                let category = self.templates.category_or_inferred(&step.issue_type, &step.status);
                if category == Category::Done {
                    completed += 1;
                } else if self.is_issue_ready(step)? {
                    ready += 1;
                }
            }

            total_steps += steps.len() as i32;
            completed_steps += completed;
            phases.push(PhaseProgress { total: steps.len() as i32, completed, ready, phase });
        }

        Ok(PlanProgress { milestone, phases, total_steps, completed_steps })
    }

    /// An issue is ready when it's in an open-category state and none of
    /// its readiness-affecting blockers are still unresolved.
    fn is_issue_ready(&self, issue: &Issue) -> Result<bool> {
        let category = self.templates.category_or_inferred(&issue.issue_type, &issue.status);
        if category != Category::Open {
            return Ok(false);
        }

        for dep in self.storage.get_dependency_records(&issue.id)?.into_iter().filter(|d| d.kind.affects_ready_work()) {
            let blocker = self.storage.get_issue(&dep.depends_on_id)?;
            if self.templates.category_or_inferred(&blocker.issue_type, &blocker.status) != Category::Done {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Inserts one issue via `tx`, retrying the generated id on collision the
/// same way [`IssueEngine::create_issue`] does.
fn insert_issue_via_tx(
    tx: &dyn Transaction,
    id_prefix: &str,
    issue_type: &str,
    title: String,
    parent_id: Option<String>,
    creator: &str,
    now: DateTime<Utc>,
    templates: &TemplateRegistry,
) -> std::result::Result<Issue, StorageError> {
    let status = templates.get_initial_state(issue_type);
    let mut issue = Issue {
        id: String::new(),
        title,
        status,
        priority: 0,
        issue_type: issue_type.to_string(),
        parent_id,
        assignee: String::new(),
        created_at: now,
        updated_at: now,
        closed_at: None,
        description: String::new(),
        notes: String::new(),
        fields: Map::new(),
    };

    filigree_core::validation::validate(&issue).map_err(|e| StorageError::validation(e.to_string()))?;

    for nonce in 0..MAX_ID_RETRIES {
        issue.id = idgen::generate_hash_id(id_prefix, &issue.title, &issue.description, creator, now, ID_SUFFIX_LEN, nonce);
        match tx.create_issue(&issue, creator) {
            Ok(()) => return Ok(issue),
            Err(e) if is_unique_violation(&e) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(StorageError::Internal("exhausted id generation retries".into()))
}

/// Validates a plan's step dependency references -- bounds, no negative or
/// self-referential indices, no cycles -- and resolves each into a
/// `(from_flat_idx, to_flat_idx)` pair over the plan's steps flattened in
/// phase order.
fn validate_and_resolve_plan_deps(spec: &PlanSpec) -> std::result::Result<Vec<(usize, usize)>, StorageError> {
    let mut phase_offsets = Vec::with_capacity(spec.phases.len());
    let mut offset = 0usize;
    for phase in &spec.phases {
        phase_offsets.push(offset);
        offset += phase.steps.len();
    }
    let total_steps = offset;

    let flat_index = |phase_idx: usize, step_idx: usize| phase_offsets[phase_idx] + step_idx;

    let parse_index = |raw: &str| -> std::result::Result<usize, StorageError> {
        raw.parse::<usize>()
            .map_err(|_| StorageError::validation(format!("invalid plan dependency reference '{raw}'")))
    };

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); total_steps];

    for (phase_idx, phase) in spec.phases.iter().enumerate() {
        for (step_idx, step) in phase.steps.iter().enumerate() {
            let from = flat_index(phase_idx, step_idx);
            for dep_ref in &step.deps {
                let (dep_phase, dep_step) = if let Some((p, s)) = dep_ref.split_once('.') {
                    (parse_index(p)?, parse_index(s)?)
                } else {
                    (phase_idx, parse_index(dep_ref)?)
                };

                if dep_phase >= spec.phases.len() || dep_step >= spec.phases[dep_phase].steps.len() {
                    return Err(StorageError::validation(format!(
                        "plan dependency reference '{dep_ref}' does not name a step"
                    )));
                }

                let to = flat_index(dep_phase, dep_step);
                if to == from {
                    return Err(StorageError::validation(format!(
                        "step '{}' cannot depend on itself",
                        step.title
                    )));
                }
                edges[from].push(to);
            }
        }
    }

    if has_cycle(&edges) {
        return Err(StorageError::validation("plan dependencies contain a cycle"));
    }

    Ok(edges
        .into_iter()
        .enumerate()
        .flat_map(|(from, tos)| tos.into_iter().map(move |to| (from, to)))
        .collect())
}

fn has_cycle(edges: &[Vec<usize>]) -> bool {
    const UNVISITED: u8 = 0;
    const VISITING: u8 = 1;
    const DONE: u8 = 2;

    fn visit(node: usize, edges: &[Vec<usize>], color: &mut [u8]) -> bool {
        color[node] = VISITING;
        for &next in &edges[node] {
            match color[next] {
                VISITING => return true,
                UNVISITED => {
                    if visit(next, edges, color) {
                        return true;
                    }
                }
                _ => {}
            }
        }
        color[node] = DONE;
        false
    }

    let mut color = vec![UNVISITED; edges.len()];
    (0..edges.len()).any(|node| color[node] == UNVISITED && visit(node, edges, &mut color))
}

#[cfg(test)]
mod tests {
    use super::*;
    use filigree_storage::SqliteStore;
    use filigree_templates::TemplateRegistry;

    fn engines() -> (IssueEngine, DependencyEngine) {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let templates = Arc::new(TemplateRegistry::new(&["core".into(), "planning".into(), "release".into()]));
        (
            IssueEngine::new(storage.clone(), templates.clone(), "proj"),
            DependencyEngine::new(storage, templates),
        )
    }

    #[test]
    fn add_dependency_rejects_self_edge() {
        let (issues, deps) = engines();
        let issue = issues.create_issue(NewIssue { title: "Solo".into(), ..Default::default() }, "alice").unwrap();
        let result = deps.add_dependency(&issue.id, &issue.id, DependencyType::Blocks, "alice");
        assert!(result.is_err());
    }

    #[test]
    fn add_dependency_rejects_cycle() {
        let (issues, deps) = engines();
        let a = issues.create_issue(NewIssue { title: "A".into(), ..Default::default() }, "alice").unwrap();
        let b = issues.create_issue(NewIssue { title: "B".into(), ..Default::default() }, "alice").unwrap();
        deps.add_dependency(&b.id, &a.id, DependencyType::Blocks, "alice").unwrap();
        let result = deps.add_dependency(&a.id, &b.id, DependencyType::Blocks, "alice");
        assert!(result.is_err());
    }

    #[test]
    fn critical_path_follows_longest_blocking_chain() {
        let (issues, deps) = engines();
        let a = issues.create_issue(NewIssue { title: "A".into(), ..Default::default() }, "alice").unwrap();
        let b = issues.create_issue(NewIssue { title: "B".into(), ..Default::default() }, "alice").unwrap();
        let c = issues.create_issue(NewIssue { title: "C".into(), ..Default::default() }, "alice").unwrap();
        deps.add_dependency(&c.id, &b.id, DependencyType::Blocks, "alice").unwrap();
        deps.add_dependency(&b.id, &a.id, DependencyType::Blocks, "alice").unwrap();

        let path = deps.get_critical_path().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path[0].issue.id, c.id);
    }

    fn step(title: &str, deps: &[&str]) -> StepSpec {
        StepSpec { title: title.into(), deps: deps.iter().map(|d| d.to_string()).collect() }
    }

    #[test]
    fn create_plan_builds_hierarchy() {
        let (issues, deps) = engines();
        let plan = deps
            .create_plan(
                &issues,
                PlanSpec {
                    milestone_title: "Launch".into(),
                    phases: vec![PhaseSpec {
                        title: "Design".into(),
                        steps: vec![step("Wireframes", &[]), step("Review", &["0"])],
                    }],
                },
                "alice",
            )
            .unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].steps.len(), 2);
        assert_eq!(plan.phases[0].phase.parent_id.as_deref(), Some(plan.milestone.id.as_str()));
        assert_eq!(plan.phases[0].steps[0].parent_id.as_deref(), Some(plan.phases[0].phase.id.as_str()));
    }

    #[test]
    fn create_plan_wires_cross_phase_dependencies() {
        let (issues, deps) = engines();
        let plan = deps
            .create_plan(
                &issues,
                PlanSpec {
                    milestone_title: "Launch".into(),
                    phases: vec![
                        PhaseSpec { title: "Design".into(), steps: vec![step("Wireframes", &[])] },
                        PhaseSpec { title: "Build".into(), steps: vec![step("Implement", &["0.0"])] },
                    ],
                },
                "alice",
            )
            .unwrap();

        let design_step = &plan.phases[0].steps[0];
        let build_step = &plan.phases[1].steps[0];
        let blockers = deps.get_dependency_records(&build_step.id).unwrap();
        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0].depends_on_id, design_step.id);
    }

    #[test]
    fn create_plan_rejects_negative_index() {
        let (issues, deps) = engines();
        let result = deps.create_plan(
            &issues,
            PlanSpec {
                milestone_title: "Launch".into(),
                phases: vec![PhaseSpec { title: "Design".into(), steps: vec![step("Only", &["-1"])] }],
            },
            "alice",
        );
        assert!(result.is_err());
    }

    #[test]
    fn create_plan_rejects_self_dependency() {
        let (issues, deps) = engines();
        let result = deps.create_plan(
            &issues,
            PlanSpec {
                milestone_title: "Launch".into(),
                phases: vec![PhaseSpec { title: "Design".into(), steps: vec![step("Only", &["0"])] }],
            },
            "alice",
        );
        assert!(result.is_err());
    }

    #[test]
    fn create_plan_rejects_dependency_cycle() {
        let (issues, deps) = engines();
        let result = deps.create_plan(
            &issues,
            PlanSpec {
                milestone_title: "Launch".into(),
                phases: vec![PhaseSpec {
                    title: "Design".into(),
                    steps: vec![step("A", &["1"]), step("B", &["0"])],
                }],
            },
            "alice",
        );
        assert!(result.is_err());
    }

    #[test]
    fn get_plan_rolls_up_phase_and_step_progress() {
        let (issues, deps) = engines();
        let plan = deps
            .create_plan(
                &issues,
                PlanSpec {
                    milestone_title: "Launch".into(),
                    phases: vec![PhaseSpec {
                        title: "Design".into(),
                        steps: vec![step("Wireframes", &[]), step("Review", &["0"])],
                    }],
                },
                "alice",
            )
            .unwrap();

        let first_step = &plan.phases[0].steps[0];
        issues.close_issue(&first_step.id, "closed", "alice").unwrap();

        let progress = deps.get_plan(&plan.milestone.id).unwrap();
        assert_eq!(progress.total_steps, 2);
        assert_eq!(progress.completed_steps, 1);
        assert_eq!(progress.phases[0].ready, 1);
    }
}
