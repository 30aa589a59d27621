//! Export plan: selection, size cap, manifest and entry paths. No blob I/O.

use serde_json::json;
use std::collections::{HashMap, HashSet};

use collect_atoms::submissions::SubmissionFile;
use collect_atoms::tasks::CollectionItem;

use super::csv::build_manifest;
use super::zip_path::{archive_name, build_zip_path, dedupe_path};
use crate::audit::TARGET_TASK;
use crate::authz::PERM_EXPORT;
use crate::context::CollectService;
use crate::error::{CollectError, CollectResult};
use crate::types::{ExportFilters, ReviewRow};

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ExportEntry {
    /// Path inside the archive.
    pub path: String,
    pub file_key: String,
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub task_id: String,
    pub archive_name: String,
    pub entries: Vec<ExportEntry>,
    pub manifest_csv: String,
    pub submission_count: usize,
    pub total_bytes: u64,
}

/// One entry per file, grouped by student in row order and by upload order within.
pub fn plan_entries(
    rows: &[ReviewRow],
    files_by_submission: &HashMap<String, Vec<SubmissionFile>>,
    items: &[CollectionItem],
) -> Vec<ExportEntry> {
    let titles: HashMap<&str, &str> = items
        .iter()
        .map(|i| (i.item_id.as_str(), i.title.as_str()))
        .collect();
    let mut used = HashSet::new();
    let mut entries = Vec::new();
    for row in rows {
        let Some(files) = files_by_submission.get(&row.submission_id) else {
            continue;
        };
        for file in files {
            let item_title = titles.get(file.item_id.as_str()).copied().unwrap_or_default();
            let path = build_zip_path(&row.student_no, &row.user_name, item_title, &file.file_name);
            entries.push(ExportEntry {
                path: dedupe_path(path, &mut used),
                file_key: file.file_key.clone(),
                file_name: file.file_name.clone(),
                size: file.size,
            });
        }
    }
    entries
}

impl CollectService {
    /// Plan a ZIP export of the filtered submissions. Fails before any
    /// download when the files add up to more than the export cap.
    pub async fn export_zip(
        &self,
        actor_id: &str,
        task_id: &str,
        filters: &ExportFilters,
    ) -> CollectResult<ExportPlan> {
        let result = self.export_zip_inner(actor_id, task_id, filters).await;
        self.audit(actor_id, "export", TARGET_TASK, task_id, &result, |plan| {
            json!({
                "submissions": plan.submission_count,
                "files": plan.entries.len(),
                "totalBytes": plan.total_bytes,
            })
        })
        .await;
        result
    }

    async fn export_zip_inner(
        &self,
        actor_id: &str,
        task_id: &str,
        filters: &ExportFilters,
    ) -> CollectResult<ExportPlan> {
        let task = self.load_owned_task(actor_id, PERM_EXPORT, task_id).await?;
        let mut selection = self.select_submissions(&task, &filters.filters).await?;
        if !filters.include_unsubmitted {
            selection.rows.retain(|r| r.submitted_at.is_some());
        }

        let total_bytes: u64 = selection.rows.iter().map(|r| r.total_bytes).sum();
        if total_bytes > self.limits.export_max_bytes {
            return Err(CollectError::BadRequest(format!(
                "The selected files total {:.1} MiB, above the {:.0} MiB export limit. Narrow the filters and try again",
                total_bytes as f64 / MIB,
                self.limits.export_max_bytes as f64 / MIB
            )));
        }

        let entries = plan_entries(&selection.rows, &selection.files_by_submission, &selection.items);
        let manifest_csv = build_manifest(&selection.rows);
        tracing::info!(
            "Planned export of task {}: {} submissions, {} files, {} bytes",
            task_id,
            selection.rows.len(),
            entries.len(),
            total_bytes
        );
        Ok(ExportPlan {
            task_id: task.task_id.clone(),
            archive_name: archive_name(&task.title),
            entries,
            manifest_csv,
            submission_count: selection.rows.len(),
            total_bytes,
        })
    }
}
