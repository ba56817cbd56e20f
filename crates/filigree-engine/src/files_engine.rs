//! Scan ingest, file/issue associations, and file timeline merging.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use chrono::{DateTime, Utc};

use filigree_core::comment::Event;
use filigree_core::enums::{FindingStatus, Severity};
use filigree_core::file::{AssociationType, FileAssociation, FileEvent, FileRecord, ScanFinding};
use filigree_storage::Storage;

use crate::error::Result;

/// A single chronological timeline entry, merged from file events, scan
/// findings, and events on issues associated with the file.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub source: TimelineSource,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineSource {
    FileEvent,
    ScanFinding,
    IssueEvent { issue_id: String },
}

/// One raw finding in an ingest batch, as delivered by an external scanner.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestFinding {
    pub path: String,
    pub rule_id: String,
    pub severity: String,
    pub message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub line_start: Option<i64>,
    #[serde(default)]
    pub line_end: Option<i64>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// A full scan ingest request.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub scan_source: String,
    #[serde(default)]
    pub scan_run_id: Option<String>,
    pub findings: Vec<IngestFinding>,
    #[serde(default)]
    pub mark_unseen: bool,
}

/// Outcome of [`FilesEngine::ingest`]. `had_findings` maps to an external
/// HTTP layer's 200 (true) vs 202 (false) status code.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestResult {
    pub files_seen: i64,
    pub findings_new: i64,
    pub findings_updated: i64,
    pub findings_marked_unseen: i64,
    pub warnings: Vec<String>,
    pub had_findings: bool,
}

pub struct FilesEngine {
    storage: Arc<dyn Storage>,
}

impl FilesEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Ingests a batch of scan findings: registers each file, upserts each
    /// finding (dedup handled storage-side), then optionally sweeps findings
    /// from earlier runs of the same source into `unseen_in_latest`.
    pub fn ingest(&self, request: IngestRequest) -> Result<IngestResult> {
        let mut result = IngestResult { had_findings: !request.findings.is_empty(), ..Default::default() };
        if request.findings.is_empty() {
            return Ok(result);
        }

        let scan_run_id = request.scan_run_id.clone().unwrap_or_else(|| "unspecified".to_string());
        let mut seen_files = std::collections::HashSet::new();

        for raw in &request.findings {
            let file = self.storage.upsert_file(&raw.path, None, &Value::Null)?;
            if seen_files.insert(file.id) {
                result.files_seen += 1;
            }

            let severity = Severity::coerce(&raw.severity);
            let finding = ScanFinding {
                id: 0,
                file_id: file.id,
                issue_id: None,
                scan_source: request.scan_source.clone(),
                rule_id: raw.rule_id.clone(),
                severity,
                status: FindingStatus::Open,
                message: raw.message.clone(),
                suggestion: raw.suggestion.clone(),
                metadata: raw.metadata.clone().unwrap_or(Value::Null),
                scan_run_id: scan_run_id.clone(),
                line_start: raw.line_start.unwrap_or(-1),
                line_end: raw.line_end,
                seen_count: 1,
                first_seen: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
                last_seen_at: chrono::Utc::now(),
            };

            match self.storage.record_finding(&finding) {
                Ok(recorded) if recorded.seen_count > 1 => result.findings_updated += 1,
                Ok(_) => result.findings_new += 1,
                Err(e) => result.warnings.push(format!("{}: {e}", raw.path)),
            }
        }

        if request.mark_unseen {
            result.findings_marked_unseen = self.storage.mark_unseen_findings(&request.scan_source, &scan_run_id)?;
        }

        Ok(result)
    }

    /// Moves `unseen_in_latest` findings older than `days` to `fixed`.
    pub fn clean_stale_findings(&self, days: i64, scan_source: Option<&str>) -> Result<i64> {
        Ok(self.storage.clean_stale_findings(days, scan_source)?)
    }

    pub fn get_file(&self, path: &str) -> Result<FileRecord> {
        Ok(self.storage.get_file(path)?)
    }

    pub fn get_findings_for_file(&self, file_id: i64, open_only: bool) -> Result<Vec<ScanFinding>> {
        Ok(self.storage.get_findings_for_file(file_id, open_only)?)
    }

    pub fn add_file_association(&self, file_id: i64, issue_id: &str, assoc_type: AssociationType) -> Result<FileAssociation> {
        Ok(self.storage.add_file_association(file_id, issue_id, assoc_type)?)
    }

    pub fn get_file_associations(&self, issue_id: &str) -> Result<Vec<FileAssociation>> {
        Ok(self.storage.get_file_associations(issue_id)?)
    }

    pub fn record_file_event(&self, file_id: i64, event_type: &str, old_value: Option<&str>, new_value: Option<&str>) -> Result<FileEvent> {
        Ok(self.storage.record_file_event(file_id, event_type, old_value, new_value)?)
    }

    /// Merges file events, scan findings (as events), and events on any
    /// issue associated with the file into one chronological, paginated
    /// timeline, optionally filtered to a single event type.
    pub fn get_file_timeline(&self, file_id: i64, event_type: Option<&str>, offset: usize, limit: usize) -> Result<Vec<TimelineEntry>> {
        let mut entries = Vec::new();

        for event in self.storage.get_file_events(file_id)? {
            entries.push(TimelineEntry {
                timestamp: event.created_at,
                event_type: event.event_type.clone(),
                source: TimelineSource::FileEvent,
                summary: format_file_event(&event),
            });
        }

        for finding in self.storage.get_findings_for_file(file_id, false)? {
            entries.push(TimelineEntry {
                timestamp: finding.first_seen,
                event_type: "scan_finding".to_string(),
                source: TimelineSource::ScanFinding,
                summary: format!("{} [{}]: {}", finding.rule_id, finding.severity, finding.message),
            });
        }

        for assoc in self.storage.get_associations_for_file(file_id)? {
            for event in self.storage.get_events(&assoc.issue_id, 200)? {
                entries.push(TimelineEntry {
                    timestamp: event.created_at,
                    event_type: event.event_type.as_str().to_string(),
                    source: TimelineSource::IssueEvent { issue_id: assoc.issue_id.clone() },
                    summary: format_issue_event(&event, &assoc.issue_id),
                });
            }
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(filter) = event_type {
            entries.retain(|e| e.event_type == filter);
        }
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    /// Aggregates open findings per file, ranked by severity-weighted score.
    pub fn get_file_hotspots(&self, limit: usize) -> Result<Vec<FileHotspot>> {
        let mut hotspots = Vec::new();
        for file in self.storage.list_files()? {
            let findings = self.storage.get_findings_for_file(file.id, true)?;
            if findings.is_empty() {
                continue;
            }
            let score: i64 = findings.iter().map(|f| f.severity.weight()).sum();
            hotspots.push(FileHotspot { file, score, open_count: findings.len() as i64 });
        }
        hotspots.sort_by(|a, b| b.score.cmp(&a.score));
        hotspots.truncate(limit);
        Ok(hotspots)
    }
}

fn format_file_event(event: &FileEvent) -> String {
    match (&event.old_value, &event.new_value) {
        (Some(old), Some(new)) => format!("{}: {old} -> {new}", event.event_type),
        (None, Some(new)) => format!("{}: {new}", event.event_type),
        _ => event.event_type.clone(),
    }
}

fn format_issue_event(event: &Event, issue_id: &str) -> String {
    match (&event.old_value, &event.new_value) {
        (Some(old), Some(new)) => format!("{issue_id} {}: {old} -> {new}", event.event_type),
        (None, Some(new)) => format!("{issue_id} {}: {new}", event.event_type),
        _ => format!("{issue_id} {}", event.event_type),
    }
}

/// One row of [`FilesEngine::get_file_hotspots`].
#[derive(Debug, Clone)]
pub struct FileHotspot {
    pub file: FileRecord,
    pub score: i64,
    pub open_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use filigree_storage::SqliteStore;

    fn engine() -> FilesEngine {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStore::open_in_memory().unwrap());
        FilesEngine::new(storage)
    }

    #[test]
    fn ingest_reports_new_and_updated_findings() {
        let engine = engine();
        let request = IngestRequest {
            scan_source: "clippy".into(),
            scan_run_id: Some("run-1".into()),
            mark_unseen: false,
            findings: vec![IngestFinding {
                path: "src/main.rs".into(),
                rule_id: "needless_clone".into(),
                severity: "medium".into(),
                message: "unnecessary clone".into(),
                suggestion: None,
                line_start: Some(12),
                line_end: None,
                metadata: None,
            }],
        };
        let result = engine.ingest(request.clone()).unwrap();
        assert_eq!(result.findings_new, 1);
        assert!(result.had_findings);

        let result2 = engine.ingest(request).unwrap();
        assert_eq!(result2.findings_updated, 1);
    }

    #[test]
    fn ingest_persists_finding_metadata() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let engine = FilesEngine::new(storage.clone());
        let request = IngestRequest {
            scan_source: "clippy".into(),
            scan_run_id: Some("run-1".into()),
            mark_unseen: false,
            findings: vec![IngestFinding {
                path: "src/main.rs".into(),
                rule_id: "needless_clone".into(),
                severity: "medium".into(),
                message: "unnecessary clone".into(),
                suggestion: None,
                line_start: Some(12),
                line_end: None,
                metadata: Some(serde_json::json!({"confidence": "high"})),
            }],
        };
        engine.ingest(request).unwrap();

        let file = storage.get_file("src/main.rs").unwrap();
        let findings = storage.get_findings_for_file(file.id, true).unwrap();
        assert_eq!(findings[0].metadata, serde_json::json!({"confidence": "high"}));
    }

    #[test]
    fn ingest_empty_batch_reports_no_findings() {
        let engine = engine();
        let result = engine
            .ingest(IngestRequest { scan_source: "clippy".into(), scan_run_id: None, findings: vec![], mark_unseen: false })
            .unwrap();
        assert!(!result.had_findings);
    }

    #[test]
    fn file_timeline_merges_file_and_issue_events() {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let engine = FilesEngine::new(storage.clone());

        let file = storage.upsert_file("src/auth.rs", Some("rust"), &Value::Null).unwrap();
        storage.record_file_event(file.id, "renamed", Some("old.rs"), Some("auth.rs")).unwrap();

        let issue = filigree_core::issue::IssueBuilder::new("Auth bug").id("proj-tl1").build();
        storage.create_issue(&issue, "alice").unwrap();
        storage.add_file_association(file.id, "proj-tl1", AssociationType::BugIn).unwrap();

        let timeline = engine.get_file_timeline(file.id, None, 0, 50).unwrap();
        assert!(timeline.iter().any(|e| e.source == TimelineSource::FileEvent));
        assert!(timeline.iter().any(|e| matches!(&e.source, TimelineSource::IssueEvent { issue_id } if issue_id == "proj-tl1")));
    }

    #[test]
    fn hotspots_rank_by_severity_weighted_score() {
        let engine = engine();
        engine
            .ingest(IngestRequest {
                scan_source: "clippy".into(),
                scan_run_id: Some("run-1".into()),
                mark_unseen: false,
                findings: vec![
                    IngestFinding {
                        path: "src/hot.rs".into(),
                        rule_id: "r1".into(),
                        severity: "critical".into(),
                        message: "m".into(),
                        suggestion: None,
                        line_start: None,
                        line_end: None,
                        metadata: None,
                    },
                    IngestFinding {
                        path: "src/cold.rs".into(),
                        rule_id: "r2".into(),
                        severity: "info".into(),
                        message: "m".into(),
                        suggestion: None,
                        line_start: None,
                        line_end: None,
                        metadata: None,
                    },
                ],
            })
            .unwrap();

        let hotspots = engine.get_file_hotspots(10).unwrap();
        assert_eq!(hotspots[0].file.path, "src/hot.rs");
    }

    #[test]
    fn ingest_marks_unseen_from_prior_run() {
        let engine = engine();
        engine
            .ingest(IngestRequest {
                scan_source: "clippy".into(),
                scan_run_id: Some("run-1".into()),
                mark_unseen: false,
                findings: vec![IngestFinding {
                    path: "src/old.rs".into(),
                    rule_id: "r1".into(),
                    severity: "low".into(),
                    message: "m".into(),
                    suggestion: None,
                    line_start: None,
                    line_end: None,
                    metadata: None,
                }],
            })
            .unwrap();

        let result = engine
            .ingest(IngestRequest {
                scan_source: "clippy".into(),
                scan_run_id: Some("run-2".into()),
                mark_unseen: true,
                findings: vec![IngestFinding {
                    path: "src/new.rs".into(),
                    rule_id: "r2".into(),
                    severity: "low".into(),
                    message: "m".into(),
                    suggestion: None,
                    line_start: None,
                    line_end: None,
                    metadata: None,
                }],
            })
            .unwrap();
        assert_eq!(result.findings_marked_unseen, 1);
    }
}
