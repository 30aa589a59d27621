//! Submission Workflow: what a student can see and do on a task.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashSet;

use collect_atoms::storage::submission_object_key;
use collect_atoms::submissions::{Submission, SubmissionFile, SubmissionStatus};
use collect_atoms::tasks::{CollectionItem, CollectionTask, TaskStatus};
use collect_atoms::StoreError;

use crate::audit::TARGET_SUBMISSION;
use crate::context::CollectService;
use crate::error::{CollectError, CollectResult};
use crate::predicates::missing_required_items;
use crate::types::{DownloadUrl, PortalTaskDetail, PortalTaskSummary, SubmissionSummary, UploadedFile};

/// Plain-language reason a student call is refused, or `None` while open.
pub fn submission_window_error(task: &CollectionTask, now: DateTime<Utc>) -> Option<CollectError> {
    if task.accepts_submissions_at(now) {
        return None;
    }
    let message = if task.is_archived() || task.status != TaskStatus::Published {
        "This collection task is no longer accepting submissions"
    } else if task.due_at.is_none() {
        "This collection task has no deadline yet"
    } else {
        "The deadline for this collection task has passed"
    };
    Some(CollectError::Conflict(message.to_string()))
}

fn file_diff(file: &SubmissionFile) -> serde_json::Value {
    json!({ "fileId": file.file_id, "itemId": file.item_id, "size": file.size })
}

fn submission_diff(submission: &Submission) -> serde_json::Value {
    json!({
        "submissionId": submission.submission_id,
        "status": submission.status.as_str(),
        "submittedAt": submission.submitted_at,
        "withdrawnAt": submission.withdrawn_at,
    })
}

impl CollectService {
    /// Scope check for one task, using a precomputed scope match when given.
    async fn is_visible_to(
        &self,
        user_id: &str,
        task: &CollectionTask,
        scope_matched: Option<&HashSet<String>>,
    ) -> CollectResult<bool> {
        if let Some(source) = &task.source {
            return Ok(self.deps.visibility.can_view_notice(user_id, &source.source_id).await?);
        }
        if task.visible_all {
            return Ok(true);
        }
        match scope_matched {
            Some(ids) => Ok(ids.contains(&task.task_id)),
            None => Ok(self
                .deps
                .visibility
                .resolve_visible_task_ids(user_id)
                .await?
                .contains(&task.task_id)),
        }
    }

    /// Published or closed task the student may see. Everything else is `NotFound`.
    pub(crate) async fn load_portal_task(&self, user_id: &str, task_id: &str) -> CollectResult<CollectionTask> {
        let task = self.load_live_task(task_id).await?;
        if task.status == TaskStatus::Draft || !self.is_visible_to(user_id, &task, None).await? {
            return Err(CollectError::task_not_found());
        }
        Ok(task)
    }

    async fn load_open_task(&self, user_id: &str, task_id: &str) -> CollectResult<CollectionTask> {
        let task = self.load_portal_task(user_id, task_id).await?;
        match submission_window_error(&task, Utc::now()) {
            Some(err) => Err(err),
            None => Ok(task),
        }
    }

    /// Existing submission, or a fresh pending one. A withdrawn submission is revived.
    async fn ensure_submission(&self, task_id: &str, user_id: &str) -> CollectResult<Submission> {
        let now = Utc::now();
        let mut submission = match self.deps.submissions.get_submission(task_id, user_id).await? {
            Some(existing) => existing,
            None => {
                let fresh = Submission::new(task_id, user_id, now);
                match self.deps.submissions.create_submission(&fresh).await {
                    Ok(()) => fresh,
                    // A concurrent upload created it first.
                    Err(StoreError::Conflict(_)) => self
                        .deps
                        .submissions
                        .get_submission(task_id, user_id)
                        .await?
                        .ok_or_else(|| CollectError::Internal("Submission vanished".to_string()))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };
        if submission.is_withdrawn() {
            submission.withdrawn_at = None;
            submission.updated_at = now;
            self.deps.submissions.save_submission(&submission).await?;
        }
        Ok(submission)
    }

    async fn find_item(&self, task_id: &str, item_id: &str) -> CollectResult<CollectionItem> {
        self.deps
            .tasks
            .list_items(task_id)
            .await?
            .into_iter()
            .find(|i| i.item_id == item_id)
            .ok_or_else(|| CollectError::NotFound("Collection item not found".to_string()))
    }

    pub async fn upload_file(
        &self,
        user_id: &str,
        task_id: &str,
        item_id: &str,
        file: UploadedFile,
    ) -> CollectResult<SubmissionFile> {
        let result = self.upload_file_inner(user_id, task_id, item_id, file).await;
        self.audit(user_id, "upload_file", TARGET_SUBMISSION, task_id, &result, file_diff)
            .await;
        result
    }

    async fn upload_file_inner(
        &self,
        user_id: &str,
        task_id: &str,
        item_id: &str,
        file: UploadedFile,
    ) -> CollectResult<SubmissionFile> {
        let task = self.load_open_task(user_id, task_id).await?;
        self.find_item(task_id, item_id).await?;

        let size = file.size();
        if size == 0 {
            return Err(CollectError::BadRequest("The file is empty".to_string()));
        }
        if size > self.limits.max_upload_bytes {
            return Err(CollectError::BadRequest(format!(
                "Files are limited to {} MiB",
                self.limits.max_upload_bytes / (1024 * 1024)
            )));
        }

        let existing = match self.deps.submissions.get_submission(task_id, user_id).await? {
            Some(current) => {
                self.deps
                    .submissions
                    .list_files(task_id, &current.submission_id)
                    .await?
            }
            None => Vec::new(),
        };
        // Check-then-insert: concurrent uploads can overshoot by a few files.
        if existing.len() >= task.max_files_per_submission as usize {
            return Err(CollectError::BadRequest(format!(
                "You can upload at most {} file(s) for this task",
                task.max_files_per_submission
            )));
        }

        let key = submission_object_key(&self.module, task_id, user_id, item_id, &file.file_name);
        self.deps
            .blobs
            .upload_private(&self.bucket, &key, file.bytes, &file.content_type)
            .await
            .map_err(CollectError::upload_failed)?;

        // The submission row is only created or revived once the blob is stored.
        let submission = match self.ensure_submission(task_id, user_id).await {
            Ok(submission) => submission,
            Err(e) => {
                self.remove_blobs_best_effort(&[key]).await;
                return Err(e);
            }
        };

        let row = SubmissionFile {
            file_id: uuid::Uuid::new_v4().to_string(),
            submission_id: submission.submission_id.clone(),
            task_id: task_id.to_string(),
            item_id: item_id.to_string(),
            file_key: key.clone(),
            file_name: file.file_name,
            content_type: file.content_type,
            size,
            sort: existing.iter().map(|f| f.sort).max().unwrap_or(0) + 1,
            uploaded_at: Utc::now(),
        };
        if let Err(e) = self.deps.submissions.insert_file(&row).await {
            self.remove_blobs_best_effort(&[key]).await;
            return Err(e.into());
        }
        tracing::info!(
            "User {} uploaded file {} to task {} item {}",
            user_id,
            row.file_id,
            task_id,
            item_id
        );
        Ok(row)
    }

    /// Removes the blob first, then the row.
    pub async fn delete_file(&self, user_id: &str, task_id: &str, file_id: &str) -> CollectResult<SubmissionFile> {
        let result = self.delete_file_inner(user_id, task_id, file_id).await;
        self.audit(user_id, "delete_file", TARGET_SUBMISSION, task_id, &result, file_diff)
            .await;
        result
    }

    async fn delete_file_inner(&self, user_id: &str, task_id: &str, file_id: &str) -> CollectResult<SubmissionFile> {
        self.load_open_task(user_id, task_id).await?;
        let file = self.find_own_file(user_id, task_id, file_id).await?;
        self.deps
            .blobs
            .remove(&self.bucket, &[file.file_key.clone()])
            .await?;
        self.deps.submissions.delete_file(&file).await?;
        tracing::info!("User {} deleted file {} from task {}", user_id, file_id, task_id);
        Ok(file)
    }

    async fn find_own_file(&self, user_id: &str, task_id: &str, file_id: &str) -> CollectResult<SubmissionFile> {
        let not_found = || CollectError::NotFound("File not found".to_string());
        let submission = self
            .deps
            .submissions
            .get_submission(task_id, user_id)
            .await?
            .ok_or_else(not_found)?;
        self.deps
            .submissions
            .list_files(task_id, &submission.submission_id)
            .await?
            .into_iter()
            .find(|f| f.file_id == file_id)
            .ok_or_else(not_found)
    }

    /// Stamp the submission as handed in once every required item has a file.
    pub async fn submit(&self, user_id: &str, task_id: &str) -> CollectResult<Submission> {
        let result = self.submit_inner(user_id, task_id).await;
        self.audit(user_id, "submit", TARGET_SUBMISSION, task_id, &result, submission_diff)
            .await;
        result
    }

    async fn submit_inner(&self, user_id: &str, task_id: &str) -> CollectResult<Submission> {
        self.load_open_task(user_id, task_id).await?;
        let items = self.deps.tasks.list_items(task_id).await?;
        let existing = self.deps.submissions.get_submission(task_id, user_id).await?;
        let files = match &existing {
            Some(sub) => self.deps.submissions.list_files(task_id, &sub.submission_id).await?,
            None => Vec::new(),
        };

        let missing = missing_required_items(&items, &files);
        if !missing.is_empty() {
            return Err(CollectError::MissingRequired {
                item_ids: missing.iter().map(|i| i.item_id.clone()).collect(),
                titles: missing.iter().map(|i| i.title.clone()).collect(),
            });
        }

        let mut submission = match existing {
            Some(sub) => sub,
            None => self.ensure_submission(task_id, user_id).await?,
        };
        let now = Utc::now();
        submission.submitted_at = Some(now);
        submission.withdrawn_at = None;
        submission.status = SubmissionStatus::Pending;
        submission.student_message = None;
        submission.updated_at = now;
        self.deps.submissions.save_submission(&submission).await?;
        tracing::info!("User {} submitted task {}", user_id, task_id);
        Ok(submission)
    }

    /// Pull a submission back: every file is deleted and triage restarts.
    pub async fn withdraw(&self, user_id: &str, task_id: &str) -> CollectResult<Submission> {
        let result = self.withdraw_inner(user_id, task_id).await;
        self.audit(user_id, "withdraw", TARGET_SUBMISSION, task_id, &result, submission_diff)
            .await;
        result
    }

    async fn withdraw_inner(&self, user_id: &str, task_id: &str) -> CollectResult<Submission> {
        self.load_open_task(user_id, task_id).await?;
        let mut submission = self
            .deps
            .submissions
            .get_submission(task_id, user_id)
            .await?
            .ok_or_else(|| CollectError::NotFound("You have no submission for this task".to_string()))?;
        if submission.is_withdrawn() {
            return Ok(submission);
        }
        if !submission.is_submitted() {
            return Err(CollectError::Conflict(
                "This submission has not been handed in".to_string(),
            ));
        }

        let files = self
            .deps
            .submissions
            .list_files(task_id, &submission.submission_id)
            .await?;
        let keys: Vec<String> = files.iter().map(|f| f.file_key.clone()).collect();
        if !keys.is_empty() {
            self.deps.blobs.remove(&self.bucket, &keys).await?;
        }

        let now = Utc::now();
        submission.withdrawn_at = Some(now);
        submission.submitted_at = None;
        submission.assignee_user_id = None;
        submission.status = SubmissionStatus::Pending;
        submission.updated_at = now;
        self.deps.submissions.withdraw(&submission, &files).await?;
        tracing::info!(
            "User {} withdrew task {} ({} files removed)",
            user_id,
            task_id,
            files.len()
        );
        Ok(submission)
    }

    /// Tasks visible to the student with their own progress.
    pub async fn list_portal_tasks(&self, user_id: &str) -> CollectResult<Vec<PortalTaskSummary>> {
        let scope_matched = self.deps.visibility.resolve_visible_task_ids(user_id).await?;
        let now = Utc::now();
        let mut out = Vec::new();
        for task in self.deps.tasks.list_tasks().await? {
            if task.is_deleted() || task.module != self.module || task.status == TaskStatus::Draft {
                continue;
            }
            if !self.is_visible_to(user_id, &task, Some(&scope_matched)).await? {
                continue;
            }
            let submission = match self.deps.submissions.get_submission(&task.task_id, user_id).await? {
                Some(sub) => {
                    let items = self.deps.tasks.list_items(&task.task_id).await?;
                    let files = self
                        .deps
                        .submissions
                        .list_files(&task.task_id, &sub.submission_id)
                        .await?;
                    Some(SubmissionSummary {
                        missing_required: !missing_required_items(&items, &files).is_empty(),
                        file_count: files.len(),
                        submission_id: sub.submission_id,
                        status: sub.status,
                        submitted_at: sub.submitted_at,
                        withdrawn_at: sub.withdrawn_at,
                        student_message: sub.student_message,
                    })
                }
                None => None,
            };
            out.push(PortalTaskSummary {
                accepting_submissions: task.accepts_submissions_at(now),
                task,
                submission,
            });
        }
        out.sort_by(|a, b| b.task.created_at.cmp(&a.task.created_at));
        Ok(out)
    }

    pub async fn get_portal_task(&self, user_id: &str, task_id: &str) -> CollectResult<PortalTaskDetail> {
        let task = self.load_portal_task(user_id, task_id).await?;
        let items = self.deps.tasks.list_items(task_id).await?;
        let submission = self.deps.submissions.get_submission(task_id, user_id).await?;
        let files = match &submission {
            Some(sub) => self.deps.submissions.list_files(task_id, &sub.submission_id).await?,
            None => Vec::new(),
        };
        let missing_item_ids = missing_required_items(&items, &files)
            .iter()
            .map(|i| i.item_id.clone())
            .collect();
        Ok(PortalTaskDetail {
            accepting_submissions: task.accepts_submissions_at(Utc::now()),
            task,
            items,
            submission,
            files,
            missing_item_ids,
        })
    }

    pub async fn my_file_download_url(
        &self,
        user_id: &str,
        task_id: &str,
        file_id: &str,
    ) -> CollectResult<DownloadUrl> {
        self.load_portal_task(user_id, task_id).await?;
        let file = self.find_own_file(user_id, task_id, file_id).await?;
        self.signed_url(&file.file_key, &file.file_name).await
    }

    pub async fn item_template_download_url(
        &self,
        user_id: &str,
        task_id: &str,
        item_id: &str,
    ) -> CollectResult<DownloadUrl> {
        self.load_portal_task(user_id, task_id).await?;
        let item = self.find_item(task_id, item_id).await?;
        let template = item
            .template
            .ok_or_else(|| CollectError::NotFound("This item has no template".to_string()))?;
        self.signed_url(&template.file_key, &template.file_name).await
    }

    pub(crate) async fn signed_url(&self, key: &str, download_name: &str) -> CollectResult<DownloadUrl> {
        let ttl = self.signed_url_ttl();
        let url = self
            .deps
            .blobs
            .create_signed_download_url(&self.bucket, key, ttl, download_name)
            .await
            .map_err(|e| CollectError::Internal(format!("Could not sign download URL: {}", e)))?;
        Ok(DownloadUrl {
            url,
            expires_in_secs: ttl.as_secs(),
        })
    }
}
