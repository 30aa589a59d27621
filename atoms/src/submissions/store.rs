use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::{Submission, SubmissionFile, SubmissionPatch};
use crate::error::StoreResult;

/// Submission Repository: per-user submissions and their uploaded files.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get_submission(&self, task_id: &str, user_id: &str) -> StoreResult<Option<Submission>>;

    async fn list_submissions(&self, task_id: &str) -> StoreResult<Vec<Submission>>;

    /// Fails with `StoreError::Conflict` when the user already has a submission.
    async fn create_submission(&self, submission: &Submission) -> StoreResult<()>;

    async fn save_submission(&self, submission: &Submission) -> StoreResult<()>;

    /// Files of one submission in upload order.
    async fn list_files(&self, task_id: &str, submission_id: &str) -> StoreResult<Vec<SubmissionFile>>;

    /// Every file of every submission of the task.
    async fn list_task_files(&self, task_id: &str) -> StoreResult<Vec<SubmissionFile>>;

    async fn insert_file(&self, file: &SubmissionFile) -> StoreResult<()>;

    async fn delete_file(&self, file: &SubmissionFile) -> StoreResult<()>;

    /// Delete `files` and persist the withdrawn `submission` in one transaction.
    async fn withdraw(&self, submission: &Submission, files: &[SubmissionFile]) -> StoreResult<()>;

    /// Apply `patch` to the submissions of `task_id` whose id is in
    /// `submission_ids`. Unknown ids and withdrawn submissions are ignored.
    /// Returns the number updated.
    async fn batch_update(
        &self,
        task_id: &str,
        submission_ids: &[String],
        patch: &SubmissionPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<usize>;
}
