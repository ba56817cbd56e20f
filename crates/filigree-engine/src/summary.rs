//! Markdown summary projection ("Project Pulse"): a single-file snapshot of
//! project state meant to be read once at agent session start.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use filigree_core::filter::{IssueFilter, WorkFilter};
use filigree_core::issue::Issue;
use filigree_core::template::Category;
use filigree_storage::Storage;
use filigree_templates::TemplateRegistry;

use crate::dependency_engine::DependencyEngine;
use crate::error::Result;

const STALE_THRESHOLD_DAYS: i64 = 3;

fn category_of(templates: &TemplateRegistry, issue: &Issue) -> Category {
    templates.category_or_inferred(&issue.issue_type, &issue.status)
}

fn parent_context(storage: &dyn Storage, issue: &Issue) -> String {
    match &issue.parent_id {
        Some(parent_id) => match storage.get_issue(parent_id) {
            Ok(parent) => format!(" ({})", parent.title),
            Err(_) => String::new(),
        },
        None => String::new(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max.saturating_sub(3)])
    } else {
        s.to_string()
    }
}

/// Builds the full markdown summary from current database state.
pub fn generate_summary(storage: Arc<dyn Storage>, templates: Arc<TemplateRegistry>) -> Result<String> {
    let dep_engine = DependencyEngine::new(storage.clone(), templates.clone());
    let now = Utc::now();

    let stats = storage.get_statistics(&templates)?;
    let ready = storage.get_ready_work(&WorkFilter::default(), &templates)?;
    let blocked = storage.get_blocked_issues(&WorkFilter::default(), &templates)?;
    let all_issues = storage.list_issues(&IssueFilter::default())?;
    let in_progress: Vec<&Issue> = all_issues.iter().filter(|i| category_of(&templates, i) == Category::Wip).collect();

    let ready_ids: HashSet<&str> = ready.iter().map(|i| i.id.as_str()).collect();
    let blocked_ids: HashSet<&str> = blocked.iter().map(|b| b.issue.id.as_str()).collect();

    let mut lines = Vec::new();
    lines.push(format!("# Project Pulse (auto-generated {})", now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)));
    lines.push(String::new());

    lines.push("## Vitals".to_string());
    lines.push(format!(
        "Open: {} | In Progress: {} | Done: {} | Ready: {} | Blocked: {}",
        stats.open_issues,
        stats.wip_issues,
        stats.done_issues,
        ready.len(),
        blocked.len()
    ));
    lines.push(String::new());

    append_active_plans(&mut lines, storage.as_ref(), &templates, &all_issues)?;
    append_ready_to_work(&mut lines, storage.as_ref(), &ready);
    append_in_progress(&mut lines, storage.as_ref(), &in_progress);
    append_needs_attention(&mut lines, &templates, &in_progress);
    append_stale(&mut lines, &in_progress, now);
    append_blocked(&mut lines, storage.as_ref(), &templates, &blocked);
    append_epic_progress(&mut lines, &templates, &all_issues, &ready_ids, &blocked_ids);
    append_critical_path(&mut lines, &dep_engine)?;
    append_recent_activity(&mut lines, storage.as_ref())?;

    Ok(lines.join("\n"))
}

fn append_active_plans(lines: &mut Vec<String>, storage: &dyn Storage, templates: &TemplateRegistry, all_issues: &[Issue]) -> Result<()> {
    let milestones: Vec<&Issue> = all_issues
        .iter()
        .filter(|i| i.issue_type == "milestone" && matches!(category_of(templates, i), Category::Open | Category::Wip))
        .collect();
    if milestones.is_empty() {
        return Ok(());
    }

    lines.push("## Active Plans".to_string());
    for milestone in milestones {
        let phases: Vec<&Issue> = all_issues.iter().filter(|i| i.parent_id.as_deref() == Some(milestone.id.as_str())).collect();
        let mut total_steps = 0usize;
        let mut completed_steps = 0usize;
        let mut phase_rows = Vec::new();
        for phase in &phases {
            let steps: Vec<&Issue> = all_issues.iter().filter(|i| i.parent_id.as_deref() == Some(phase.id.as_str())).collect();
            let p_total = steps.len();
            let p_done = steps.iter().filter(|s| category_of(templates, s) == Category::Done).count();
            let p_ready = steps.iter().filter(|s| matches!(category_of(templates, s), Category::Open)).count();
            total_steps += p_total;
            completed_steps += p_done;

            let marker = if p_total > 0 && p_done == p_total {
                "\u{2713}"
            } else if category_of(templates, phase) == Category::Wip {
                "\u{25b6}"
            } else {
                "\u{25cb}"
            };
            let ready_note = if p_ready > 0 { format!(", {p_ready} ready") } else { String::new() };
            phase_rows.push(format!("  {marker} {} ({p_done}/{p_total} complete{ready_note})", phase.title));
        }

        let bar = progress_bar(completed_steps, total_steps, 10);
        lines.push(format!("### {} [{bar}] {completed_steps}/{total_steps} steps", milestone.title));
        lines.extend(phase_rows);
        lines.push(String::new());
    }
    let _ = storage;
    Ok(())
}

fn progress_bar(done: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return "\u{2591}".repeat(width);
    }
    let filled = (done * width) / total;
    format!("{}{}", "\u{2588}".repeat(filled), "\u{2591}".repeat(width - filled))
}

fn append_ready_to_work(lines: &mut Vec<String>, storage: &dyn Storage, ready: &[Issue]) {
    lines.push("## Ready to Work (no blockers, by priority)".to_string());
    if ready.is_empty() {
        lines.push("- (none)".to_string());
    } else {
        for issue in ready.iter().take(12) {
            let state_info = if issue.status != "open" { format!(" ({})", issue.status) } else { String::new() };
            let parent_ctx = parent_context(storage, issue);
            lines.push(format!(r#"- P{} {} [{}] "{}"{state_info}{parent_ctx}"#, issue.priority, issue.id, issue.issue_type, issue.title));
        }
        if ready.len() > 12 {
            lines.push(format!("  ...and {} more", ready.len() - 12));
        }
    }
    lines.push(String::new());
}

fn append_in_progress(lines: &mut Vec<String>, storage: &dyn Storage, in_progress: &[&Issue]) {
    lines.push("## In Progress".to_string());
    if in_progress.is_empty() {
        lines.push("- (none)".to_string());
    } else {
        for issue in in_progress {
            let state_info = if issue.status != "in_progress" { format!(" ({})", issue.status) } else { String::new() };
            let parent_ctx = parent_context(storage, issue);
            lines.push(format!(r#"- {} [{}] "{}"{state_info}{parent_ctx}"#, issue.id, issue.issue_type, issue.title));
        }
    }
    lines.push(String::new());
}

fn append_needs_attention(lines: &mut Vec<String>, templates: &TemplateRegistry, in_progress: &[&Issue]) {
    let mut needs_attention = Vec::new();
    for issue in in_progress {
        let missing = templates.validate_fields_for_state(&issue.issue_type, &issue.status, &issue.fields);
        if !missing.is_empty() {
            needs_attention.push((*issue, missing));
        }
    }
    if needs_attention.is_empty() {
        return;
    }

    lines.push("## Needs Attention".to_string());
    for (issue, missing) in needs_attention.iter().take(8) {
        lines.push(format!(
            r#"- {} [{}] "{}" ({}) — missing: {}"#,
            issue.id,
            issue.issue_type,
            issue.title,
            issue.status,
            missing.join(", ")
        ));
    }
    if needs_attention.len() > 8 {
        lines.push(format!("  ...and {} more", needs_attention.len() - 8));
    }
    lines.push(String::new());
}

fn append_stale(lines: &mut Vec<String>, in_progress: &[&Issue], now: chrono::DateTime<Utc>) {
    let cutoff = now - chrono::Duration::days(STALE_THRESHOLD_DAYS);
    let stale: Vec<&&Issue> = in_progress.iter().filter(|i| i.updated_at < cutoff).collect();
    if stale.is_empty() {
        return;
    }

    lines.push(format!("## Stale (in_progress >{STALE_THRESHOLD_DAYS} days, no activity)"));
    for issue in stale {
        let days_ago = (now - issue.updated_at).num_days();
        lines.push(format!(r#"- P{} {} [{}] "{}" ({days_ago}d stale)"#, issue.priority, issue.id, issue.issue_type, issue.title));
    }
    lines.push(String::new());
}

fn append_blocked(lines: &mut Vec<String>, storage: &dyn Storage, templates: &TemplateRegistry, blocked: &[filigree_storage::BlockedIssue]) {
    lines.push("## Blocked (top 10 by priority)".to_string());
    if blocked.is_empty() {
        lines.push("- (none)".to_string());
    } else {
        for entry in blocked.iter().take(10) {
            let blocker_names: Vec<String> = storage
                .get_dependency_records(&entry.issue.id)
                .unwrap_or_default()
                .into_iter()
                .filter(|d| d.kind.affects_ready_work())
                .filter(|d| match storage.get_issue(&d.depends_on_id) {
                    Ok(blocker) => category_of(templates, &blocker) != Category::Done,
                    Err(_) => true,
                })
                .map(|d| d.depends_on_id)
                .collect();
            let blockers_str = if blocker_names.is_empty() { "?".to_string() } else { blocker_names.join(", ") };
            lines.push(format!(
                r#"- P{} {} [{}] "{}" ← blocked by: {blockers_str}"#,
                entry.issue.priority, entry.issue.id, entry.issue.issue_type, entry.issue.title
            ));
        }
        if blocked.len() > 10 {
            lines.push(format!("  ...and {} more", blocked.len() - 10));
        }
    }
    lines.push(String::new());
}

fn append_epic_progress(
    lines: &mut Vec<String>,
    templates: &TemplateRegistry,
    all_issues: &[Issue],
    ready_ids: &HashSet<&str>,
    blocked_ids: &HashSet<&str>,
) {
    let open_epics: Vec<&Issue> = all_issues
        .iter()
        .filter(|i| i.issue_type == "epic" && category_of(templates, i) != Category::Done)
        .collect();
    if open_epics.is_empty() {
        return;
    }

    lines.push("## Epic Progress".to_string());
    for epic in open_epics.iter().take(10) {
        let children: Vec<&Issue> = all_issues.iter().filter(|i| i.parent_id.as_deref() == Some(epic.id.as_str())).collect();
        let total = children.len();
        let done = children.iter().filter(|c| category_of(templates, c) == Category::Done).count();
        let ready_c = children.iter().filter(|c| ready_ids.contains(c.id.as_str())).count();
        let blocked_c = children.iter().filter(|c| blocked_ids.contains(c.id.as_str())).count();

        let bar = progress_bar(done, total, 8);
        let mut extras = Vec::new();
        if ready_c > 0 {
            extras.push(format!("{ready_c} ready"));
        }
        if blocked_c > 0 {
            extras.push(format!("{blocked_c} blocked"));
        }
        let extra_str = if extras.is_empty() { String::new() } else { format!(" ({})", extras.join(", ")) };
        lines.push(format!("- {:<40} [{bar}] {done}/{total}{extra_str}", epic.title));
    }
    lines.push(String::new());
}

fn append_critical_path(lines: &mut Vec<String>, dep_engine: &DependencyEngine) -> Result<()> {
    let path = dep_engine.get_critical_path()?;
    if path.is_empty() {
        return Ok(());
    }

    lines.push(format!("## Critical Path ({} issues)", path.len()));
    for (i, item) in path.iter().enumerate() {
        let arrow = if i > 0 { " -> " } else { "" };
        lines.push(format!(r#"  {arrow}P{} {} [{}] "{}""#, item.issue.priority, item.issue.id, item.issue.issue_type, item.issue.title));
    }
    lines.push(String::new());
    Ok(())
}

fn append_recent_activity(lines: &mut Vec<String>, storage: &dyn Storage) -> Result<()> {
    lines.push("## Recent Activity (last 10 events)".to_string());
    let recent = storage.get_recent_events(10)?;
    if recent.is_empty() {
        lines.push("- (no recent activity)".to_string());
    } else {
        for event in recent {
            let title = storage.get_issue(&event.issue_id).map(|i| i.title).unwrap_or_else(|_| event.issue_id.clone());
            let event_label = event.event_type.as_str().to_uppercase().replace('_', " ");
            let old_v = event.old_value.as_deref().map(|v| truncate(v, 50)).unwrap_or_default();
            let new_v = event.new_value.as_deref().map(|v| truncate(v, 50)).unwrap_or_default();
            let detail = if !old_v.is_empty() && !new_v.is_empty() {
                format!(" {old_v}\u{2192}{new_v}")
            } else if !new_v.is_empty() {
                format!(" {new_v}")
            } else {
                String::new()
            };
            lines.push(format!(r#"- {event_label} {} "{title}"{detail}"#, event.issue_id));
        }
    }
    lines.push(String::new());
    Ok(())
}

/// Writes the summary atomically: a unique temp file in the same directory,
/// then a rename, so readers never observe a partial write.
pub fn write_summary(storage: Arc<dyn Storage>, templates: Arc<TemplateRegistry>, output_path: &Path) -> Result<()> {
    let content = generate_summary(storage, templates)?;
    let dir = output_path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(".{}.tmp-{}", output_path.file_name().and_then(|n| n.to_str()).unwrap_or("summary"), std::process::id()));
    std::fs::write(&tmp_path, content).map_err(|e| crate::error::EngineError::Storage(filigree_storage::StorageError::Internal(e.to_string())))?;
    std::fs::rename(&tmp_path, output_path)
        .map_err(|e| crate::error::EngineError::Storage(filigree_storage::StorageError::Internal(e.to_string())))?;
    Ok(())
}
