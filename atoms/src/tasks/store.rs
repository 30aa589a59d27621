use async_trait::async_trait;

use super::model::{CollectionItem, CollectionTask, ItemTemplate, SourceBinding, TaskEdit, TaskScope};
use crate::error::StoreResult;

/// Task Repository: tasks, their items and visibility scopes.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task with its items and scopes in one transaction.
    /// Claims the source binding; a taken binding yields `StoreError::Conflict`.
    async fn insert_task(
        &self,
        task: &CollectionTask,
        items: &[CollectionItem],
        scopes: &[TaskScope],
    ) -> StoreResult<()>;

    /// Returns soft-deleted tasks too; callers decide visibility.
    async fn get_task(&self, task_id: &str) -> StoreResult<Option<CollectionTask>>;

    async fn list_tasks(&self) -> StoreResult<Vec<CollectionTask>>;

    /// Items ordered by `sort`, then title.
    async fn list_items(&self, task_id: &str) -> StoreResult<Vec<CollectionItem>>;

    async fn list_scopes(&self, task_id: &str) -> StoreResult<Vec<TaskScope>>;

    /// Id of the live task currently bound to `source`, if any.
    async fn find_task_by_source(&self, source: &SourceBinding) -> StoreResult<Option<String>>;

    async fn replace_task(&self, edit: &TaskEdit) -> StoreResult<()>;

    /// Overwrite the task row only (status, due date, audit fields).
    async fn save_task(&self, task: &CollectionTask) -> StoreResult<()>;

    /// Persist `task` (with `deleted_at` set) and release its source binding.
    async fn soft_delete_task(&self, task: &CollectionTask) -> StoreResult<()>;

    /// Persist `task` (with `archived_at` set) and stamp the same instant on
    /// every submission of the task.
    async fn archive_task(&self, task: &CollectionTask) -> StoreResult<()>;

    async fn save_item_template(
        &self,
        task_id: &str,
        item_id: &str,
        template: &ItemTemplate,
    ) -> StoreResult<()>;
}
