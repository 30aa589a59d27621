//! Review & Batch Processor: staff listing, filtering and bulk triage.

use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};

use collect_atoms::submissions::{Submission, SubmissionFile, SubmissionPatch};
use collect_atoms::tasks::{CollectionItem, CollectionTask};
use collect_atoms::users::{department_closure, Department, UserProfile};

use crate::audit::TARGET_TASK;
use crate::authz::PERM_PROCESS;
use crate::context::CollectService;
use crate::error::{CollectError, CollectResult};
use crate::predicates::missing_required_items;
use crate::types::{
    BatchAction, BatchRequest, BatchResult, DownloadUrl, ReviewRow, SubmissionDetail,
    SubmissionFilters,
};

/// Filtered submissions of one task plus what export needs to package them.
pub(crate) struct Selection {
    pub rows: Vec<ReviewRow>,
    pub files_by_submission: HashMap<String, Vec<SubmissionFile>>,
    pub items: Vec<CollectionItem>,
}

pub(crate) fn build_row(
    submission: &Submission,
    profile: Option<&UserProfile>,
    departments: &[Department],
    items: &[CollectionItem],
    files: &[SubmissionFile],
) -> ReviewRow {
    let names: HashMap<&str, &str> = departments
        .iter()
        .map(|d| (d.department_id.as_str(), d.name.as_str()))
        .collect();
    let department_names = profile
        .map(|p| {
            p.department_ids
                .iter()
                .filter_map(|id| names.get(id.as_str()).map(|n| n.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let missing = missing_required_items(items, files);

    ReviewRow {
        submission_id: submission.submission_id.clone(),
        user_id: submission.user_id.clone(),
        student_no: profile.map(|p| p.student_no.clone()).unwrap_or_default(),
        user_name: profile.map(|p| p.user_name.clone()).unwrap_or_default(),
        department_names,
        status: submission.status,
        submitted_at: submission.submitted_at,
        archived_at: submission.archived_at,
        assignee_user_id: submission.assignee_user_id.clone(),
        student_message: submission.student_message.clone(),
        staff_note: submission.staff_note.clone(),
        file_count: files.len(),
        total_bytes: files.iter().map(|f| f.size).sum(),
        missing_required: !missing.is_empty(),
        missing_item_titles: missing.iter().map(|i| i.title.clone()).collect(),
    }
}

/// `department_scope` is the closure of the requested department, if any.
pub(crate) fn row_matches(
    row: &ReviewRow,
    profile: Option<&UserProfile>,
    filters: &SubmissionFilters,
    department_scope: Option<&HashSet<String>>,
) -> bool {
    if let Some(q) = filters.q.as_deref() {
        let q = q.to_lowercase();
        if !row.user_name.to_lowercase().contains(&q) && !row.student_no.to_lowercase().contains(&q) {
            return false;
        }
    }
    if let Some(status) = filters.status {
        if row.status != status {
            return false;
        }
    }
    if let Some(missing) = filters.missing_required {
        if row.missing_required != missing {
            return false;
        }
    }
    if filters.submitted_from.is_some() || filters.submitted_to.is_some() {
        let Some(at) = row.submitted_at else {
            return false;
        };
        if filters.submitted_from.map(|from| at < from).unwrap_or(false)
            || filters.submitted_to.map(|to| at > to).unwrap_or(false)
        {
            return false;
        }
    }
    if let Some(scope) = department_scope {
        let in_scope = profile
            .map(|p| p.department_ids.iter().any(|d| scope.contains(d)))
            .unwrap_or(false);
        if !in_scope {
            return false;
        }
    }
    true
}

impl CollectService {
    /// Non-withdrawn submissions of `task` matching `filters`, ordered by student number.
    pub(crate) async fn select_submissions(
        &self,
        task: &CollectionTask,
        filters: &SubmissionFilters,
    ) -> CollectResult<Selection> {
        let task_id = task.task_id.as_str();
        let items = self.deps.tasks.list_items(task_id).await?;
        let submissions: Vec<Submission> = self
            .deps
            .submissions
            .list_submissions(task_id)
            .await?
            .into_iter()
            .filter(|s| !s.is_withdrawn())
            .collect();

        let mut files_by_submission: HashMap<String, Vec<SubmissionFile>> = HashMap::new();
        for file in self.deps.submissions.list_task_files(task_id).await? {
            files_by_submission
                .entry(file.submission_id.clone())
                .or_default()
                .push(file);
        }
        for files in files_by_submission.values_mut() {
            files.sort_by_key(|f| f.sort);
        }

        let user_ids: Vec<String> = submissions.iter().map(|s| s.user_id.clone()).collect();
        let profiles = self.deps.users.get_profiles(&user_ids).await?;
        let departments = self.deps.users.list_departments().await?;
        let department_scope = filters
            .department_id
            .as_deref()
            .map(|root| department_closure(&departments, root));

        let mut rows = Vec::new();
        for submission in &submissions {
            let profile = profiles.get(&submission.user_id);
            let files = files_by_submission
                .get(&submission.submission_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let row = build_row(submission, profile, &departments, &items, files);
            if row_matches(&row, profile, filters, department_scope.as_ref()) {
                rows.push(row);
            }
        }
        rows.sort_by(|a, b| {
            a.student_no
                .cmp(&b.student_no)
                .then_with(|| a.user_name.cmp(&b.user_name))
                .then_with(|| a.submission_id.cmp(&b.submission_id))
        });

        Ok(Selection {
            rows,
            files_by_submission,
            items,
        })
    }

    pub async fn list_submissions(
        &self,
        actor_id: &str,
        task_id: &str,
        filters: &SubmissionFilters,
    ) -> CollectResult<Vec<ReviewRow>> {
        let task = self.load_owned_task(actor_id, PERM_PROCESS, task_id).await?;
        Ok(self.select_submissions(&task, filters).await?.rows)
    }

    pub async fn get_submission_detail(
        &self,
        actor_id: &str,
        task_id: &str,
        submission_id: &str,
    ) -> CollectResult<SubmissionDetail> {
        self.load_owned_task(actor_id, PERM_PROCESS, task_id).await?;
        let submission = self
            .deps
            .submissions
            .list_submissions(task_id)
            .await?
            .into_iter()
            .find(|s| s.submission_id == submission_id)
            .ok_or_else(|| CollectError::NotFound("Submission not found".to_string()))?;

        let items = self.deps.tasks.list_items(task_id).await?;
        let files = self.deps.submissions.list_files(task_id, submission_id).await?;
        let profile = self.deps.users.get_profile(&submission.user_id).await?;
        let departments = self.deps.users.list_departments().await?;
        let row = build_row(&submission, profile.as_ref(), &departments, &items, &files);
        Ok(SubmissionDetail { row, files })
    }

    /// Validate the whole batch up front, then apply it in one write.
    pub async fn batch_process(
        &self,
        actor_id: &str,
        task_id: &str,
        request: &BatchRequest,
    ) -> CollectResult<BatchResult> {
        let result = self.batch_process_inner(actor_id, task_id, request).await;
        self.audit(actor_id, "batch", TARGET_TASK, task_id, &result, |r| {
            json!({
                "submissionIds": request.submission_ids,
                "action": match &request.action {
                    BatchAction::AssignToMe => "assignToMe",
                    BatchAction::Unassign => "unassign",
                    BatchAction::SetStatus { .. } => "setStatus",
                },
                "updated": r.updated,
            })
        })
        .await;
        result
    }

    async fn batch_process_inner(
        &self,
        actor_id: &str,
        task_id: &str,
        request: &BatchRequest,
    ) -> CollectResult<BatchResult> {
        let task = self.load_owned_task(actor_id, PERM_PROCESS, task_id).await?;
        if task.is_archived() {
            return Err(CollectError::Conflict(
                "Submissions of an archived task are frozen".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let ids: Vec<String> = request
            .submission_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .map(|id| id.to_string())
            .collect();
        if ids.is_empty() {
            return Err(CollectError::BadRequest("No submissions selected".to_string()));
        }

        let patch = match &request.action {
            BatchAction::AssignToMe => SubmissionPatch::Assignee(Some(actor_id.to_string())),
            BatchAction::Unassign => SubmissionPatch::Assignee(None),
            BatchAction::SetStatus {
                status,
                student_message,
                staff_note,
            } => {
                let message = student_message
                    .as_deref()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(|m| m.to_string());
                if status.requires_student_message() && message.is_none() {
                    return Err(CollectError::BadRequest(format!(
                        "A message to the student is required for status {}",
                        status.as_str()
                    )));
                }
                SubmissionPatch::Status {
                    status: *status,
                    student_message: message,
                    staff_note: staff_note
                        .as_deref()
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(|n| n.to_string()),
                }
            }
        };

        let updated = self
            .deps
            .submissions
            .batch_update(task_id, &ids, &patch, Utc::now())
            .await?;
        tracing::info!(
            "Batch on task {} by {} updated {} of {} submission(s)",
            task_id,
            actor_id,
            updated,
            ids.len()
        );
        Ok(BatchResult { updated })
    }

    pub async fn file_download_url(
        &self,
        actor_id: &str,
        task_id: &str,
        file_id: &str,
    ) -> CollectResult<DownloadUrl> {
        self.load_owned_task(actor_id, PERM_PROCESS, task_id).await?;
        let file = self
            .deps
            .submissions
            .list_task_files(task_id)
            .await?
            .into_iter()
            .find(|f| f.file_id == file_id)
            .ok_or_else(|| CollectError::NotFound("File not found".to_string()))?;
        self.signed_url(&file.file_key, &file.file_name).await
    }
}
