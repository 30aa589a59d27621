//! Task Lifecycle Engine: draft -> published -> closed -> archived.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};

use collect_atoms::dynamo::MAX_TRANSACT_ITEMS;
use collect_atoms::storage::template_object_key;
use collect_atoms::tasks::{
    insert_write_count, CollectionItem, CollectionTask, ItemTemplate, SourceBinding, TaskEdit,
    TaskScope, TaskStatus, SOURCE_TYPE_NOTICE,
};

use crate::audit::TARGET_TASK;
use crate::authz::{
    PERM_ARCHIVE, PERM_CLOSE, PERM_CREATE, PERM_DELETE, PERM_MANAGE_ALL, PERM_PUBLISH, PERM_UPDATE,
};
use crate::context::CollectService;
use crate::error::{CollectError, CollectResult};
use crate::types::{ItemInput, TaskBody, TaskDetail, UploadedFile};

/// Validated form of a create/update body.
struct TaskDraft {
    title: String,
    description_md: String,
    source: Option<SourceBinding>,
    visible_all: bool,
    scopes: Vec<TaskScope>,
    max_files_per_submission: u32,
    due_at: Option<DateTime<Utc>>,
}

fn archived_conflict() -> CollectError {
    CollectError::Conflict("Archived tasks can no longer be changed".to_string())
}

fn validate_body(body: &TaskBody) -> CollectResult<TaskDraft> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(CollectError::BadRequest("Title is required".to_string()));
    }
    if body.max_files_per_submission == 0 {
        return Err(CollectError::BadRequest(
            "maxFilesPerSubmission must be at least 1".to_string(),
        ));
    }
    if body.items.iter().any(|i| i.title.trim().is_empty()) {
        return Err(CollectError::BadRequest("Every item needs a title".to_string()));
    }
    let mut seen = HashSet::new();
    if body
        .items
        .iter()
        .filter_map(|i| i.item_id.as_deref())
        .any(|id| !seen.insert(id))
    {
        return Err(CollectError::BadRequest("Duplicate item id".to_string()));
    }

    let source = match &body.source {
        Some(src) => {
            if src.source_type != SOURCE_TYPE_NOTICE || src.source_id.trim().is_empty() {
                return Err(CollectError::BadRequest(format!(
                    "Unsupported source: {}",
                    src.source_type
                )));
            }
            Some(SourceBinding {
                source_type: src.source_type.clone(),
                source_id: src.source_id.trim().to_string(),
            })
        }
        None => None,
    };

    // A bound task takes its audience from the source.
    let (visible_all, scopes) = if source.is_some() {
        (true, Vec::new())
    } else {
        let mut unique = HashSet::new();
        let scopes: Vec<TaskScope> = body
            .scopes
            .iter()
            .filter(|s| !s.ref_id.trim().is_empty() && unique.insert((*s).clone()))
            .cloned()
            .collect();
        (body.visible_all, scopes)
    };

    // Task, items and scopes must commit in one transaction.
    if insert_write_count(body.items.len(), scopes.len(), source.is_some()) > MAX_TRANSACT_ITEMS {
        return Err(CollectError::BadRequest(format!(
            "Too many items and scopes: {} items plus {} scopes cannot be saved together",
            body.items.len(),
            scopes.len()
        )));
    }

    Ok(TaskDraft {
        title: title.to_string(),
        description_md: body.description_md.clone(),
        source,
        visible_all,
        scopes,
        max_files_per_submission: body.max_files_per_submission,
        due_at: body.due_at,
    })
}

fn build_item(task_id: &str, item_id: String, index: usize, input: &ItemInput) -> CollectionItem {
    CollectionItem {
        item_id,
        task_id: task_id.to_string(),
        title: input.title.trim().to_string(),
        description: input
            .description
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        required: input.required,
        sort: input.sort.unwrap_or(index as i32),
        template: None,
    }
}

/// Every unmet publish precondition, in a stable order.
pub fn publish_blockers(
    task: &CollectionTask,
    item_count: usize,
    scope_count: usize,
    now: DateTime<Utc>,
) -> Vec<&'static str> {
    let mut blockers = Vec::new();
    match task.due_at {
        Some(due) if due > now => {}
        Some(_) => blockers.push("due date must be in the future"),
        None => blockers.push("due date is not set"),
    }
    if item_count == 0 {
        blockers.push("at least one item is required");
    }
    if !task.is_source_bound() && !task.visible_all && scope_count == 0 {
        blockers.push("at least one visibility scope is required");
    }
    blockers
}

fn task_diff(task: &CollectionTask) -> serde_json::Value {
    json!({
        "status": task.status.as_str(),
        "archivedAt": task.archived_at,
        "dueAt": task.due_at,
        "deletedAt": task.deleted_at,
    })
}

impl CollectService {
    /// Reject unknown notices and notices already owned by another task.
    async fn check_source(&self, source: &SourceBinding, task_id: Option<&str>) -> CollectResult<()> {
        if !self.deps.notices.notice_exists(&source.source_id).await? {
            return Err(CollectError::BadRequest(format!(
                "Notice {} does not exist",
                source.source_id
            )));
        }
        match self.deps.tasks.find_task_by_source(source).await? {
            Some(bound) if Some(bound.as_str()) != task_id => Err(CollectError::Conflict(
                "This notice already has a collection task".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub async fn create_task(&self, actor_id: &str, body: &TaskBody) -> CollectResult<TaskDetail> {
        let result = self.create_task_inner(actor_id, body).await;
        let target = result.as_ref().map(|d| d.task.task_id.clone()).unwrap_or_default();
        self.audit(actor_id, "create", TARGET_TASK, &target, &result, |d| {
            json!({ "title": d.task.title, "items": d.items.len(), "scopes": d.scopes.len() })
        })
        .await;
        result
    }

    async fn create_task_inner(&self, actor_id: &str, body: &TaskBody) -> CollectResult<TaskDetail> {
        self.require_perm(actor_id, PERM_CREATE).await?;
        let draft = validate_body(body)?;
        if let Some(source) = &draft.source {
            self.check_source(source, None).await?;
        }

        let now = Utc::now();
        let task_id = uuid::Uuid::new_v4().to_string();
        let task = CollectionTask {
            task_id: task_id.clone(),
            module: self.module.clone(),
            title: draft.title,
            description_md: draft.description_md,
            status: TaskStatus::Draft,
            archived_at: None,
            source: draft.source,
            visible_all: draft.visible_all,
            max_files_per_submission: draft.max_files_per_submission,
            due_at: draft.due_at,
            created_by: actor_id.to_string(),
            updated_by: actor_id.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let items: Vec<CollectionItem> = body
            .items
            .iter()
            .enumerate()
            .map(|(i, input)| build_item(&task_id, uuid::Uuid::new_v4().to_string(), i, input))
            .collect();

        self.deps.tasks.insert_task(&task, &items, &draft.scopes).await?;
        tracing::info!("Created collection task {} ({} items)", task_id, items.len());

        let mut items = items;
        items.sort_by(|a, b| a.sort.cmp(&b.sort).then_with(|| a.title.cmp(&b.title)));
        Ok(TaskDetail {
            task,
            items,
            scopes: draft.scopes,
        })
    }

    pub async fn update_task(
        &self,
        actor_id: &str,
        task_id: &str,
        body: &TaskBody,
    ) -> CollectResult<TaskDetail> {
        let result = self.update_task_inner(actor_id, task_id, body).await;
        self.audit(actor_id, "update", TARGET_TASK, task_id, &result, |d| {
            json!({ "title": d.task.title, "items": d.items.len(), "scopes": d.scopes.len() })
        })
        .await;
        result
    }

    async fn update_task_inner(
        &self,
        actor_id: &str,
        task_id: &str,
        body: &TaskBody,
    ) -> CollectResult<TaskDetail> {
        let existing = self.load_owned_task(actor_id, PERM_UPDATE, task_id).await?;
        if existing.is_archived() {
            return Err(archived_conflict());
        }
        if !existing.is_editable() {
            return Err(CollectError::Conflict(
                "Only draft tasks can be edited".to_string(),
            ));
        }
        let draft = validate_body(body)?;
        if let Some(source) = &draft.source {
            self.check_source(source, Some(task_id)).await?;
        }

        let previous_items = self.deps.tasks.list_items(task_id).await?;
        let previous_scopes = self.deps.tasks.list_scopes(task_id).await?;
        let mut by_id: HashMap<&str, &CollectionItem> =
            previous_items.iter().map(|i| (i.item_id.as_str(), i)).collect();

        let mut items = Vec::with_capacity(body.items.len());
        for (index, input) in body.items.iter().enumerate() {
            let kept = input.item_id.as_deref().and_then(|id| by_id.remove(id));
            let item = match kept {
                Some(old) => {
                    let mut item = build_item(task_id, old.item_id.clone(), index, input);
                    item.template = old.template.clone();
                    item
                }
                None => build_item(task_id, uuid::Uuid::new_v4().to_string(), index, input),
            };
            items.push(item);
        }
        let removed: Vec<&CollectionItem> = by_id.into_values().collect();
        let removed_templates: Vec<String> = removed
            .iter()
            .filter_map(|i| i.template.as_ref().map(|t| t.file_key.clone()))
            .collect();

        let now = Utc::now();
        let mut task = existing.clone();
        task.title = draft.title;
        task.description_md = draft.description_md;
        task.source = draft.source;
        task.visible_all = draft.visible_all;
        task.max_files_per_submission = draft.max_files_per_submission;
        task.due_at = draft.due_at;
        task.updated_by = actor_id.to_string();
        task.updated_at = now;

        let edit = TaskEdit {
            task: task.clone(),
            previous_source: existing.source.clone(),
            previous_scopes,
            scopes: draft.scopes.clone(),
            items: items.clone(),
            removed_item_ids: removed.iter().map(|i| i.item_id.clone()).collect(),
        };
        self.deps.tasks.replace_task(&edit).await?;
        tracing::info!(
            "Updated collection task {} ({} items, {} removed)",
            task_id,
            items.len(),
            edit.removed_item_ids.len()
        );

        self.remove_blobs_best_effort(&removed_templates).await;

        items.sort_by(|a, b| a.sort.cmp(&b.sort).then_with(|| a.title.cmp(&b.title)));
        Ok(TaskDetail {
            task,
            items,
            scopes: draft.scopes,
        })
    }

    /// Move the deadline without reopening structural edits.
    pub async fn update_due_at_only(
        &self,
        actor_id: &str,
        task_id: &str,
        due_at: Option<DateTime<Utc>>,
    ) -> CollectResult<CollectionTask> {
        let result = self.update_due_at_inner(actor_id, task_id, due_at).await;
        self.audit(actor_id, "update_due_at", TARGET_TASK, task_id, &result, task_diff)
            .await;
        result
    }

    async fn update_due_at_inner(
        &self,
        actor_id: &str,
        task_id: &str,
        due_at: Option<DateTime<Utc>>,
    ) -> CollectResult<CollectionTask> {
        let mut task = self.load_owned_task(actor_id, PERM_UPDATE, task_id).await?;
        if task.is_archived() {
            return Err(archived_conflict());
        }
        task.due_at = due_at;
        task.updated_by = actor_id.to_string();
        task.updated_at = Utc::now();
        self.deps.tasks.save_task(&task).await?;
        tracing::info!("Collection task {} due date set to {:?}", task_id, due_at);
        Ok(task)
    }

    pub async fn publish_task(&self, actor_id: &str, task_id: &str) -> CollectResult<CollectionTask> {
        let result = self.publish_task_inner(actor_id, task_id).await;
        self.audit(actor_id, "publish", TARGET_TASK, task_id, &result, task_diff)
            .await;
        result
    }

    async fn publish_task_inner(&self, actor_id: &str, task_id: &str) -> CollectResult<CollectionTask> {
        let mut task = self.load_owned_task(actor_id, PERM_PUBLISH, task_id).await?;
        if task.is_archived() {
            return Err(archived_conflict());
        }
        match task.status {
            TaskStatus::Published => return Ok(task),
            TaskStatus::Closed => {
                return Err(CollectError::Conflict(
                    "Closed tasks cannot be published again".to_string(),
                ))
            }
            TaskStatus::Draft => {}
        }

        let items = self.deps.tasks.list_items(task_id).await?;
        let scopes = self.deps.tasks.list_scopes(task_id).await?;
        let now = Utc::now();
        let blockers = publish_blockers(&task, items.len(), scopes.len(), now);
        if !blockers.is_empty() {
            return Err(CollectError::Conflict(format!(
                "Cannot publish: {}",
                blockers.join("; ")
            )));
        }

        task.status = TaskStatus::Published;
        task.updated_by = actor_id.to_string();
        task.updated_at = now;
        self.deps.tasks.save_task(&task).await?;
        tracing::info!("Published collection task {}", task_id);
        Ok(task)
    }

    pub async fn close_task(&self, actor_id: &str, task_id: &str) -> CollectResult<CollectionTask> {
        let result = self.close_task_inner(actor_id, task_id).await;
        self.audit(actor_id, "close", TARGET_TASK, task_id, &result, task_diff)
            .await;
        result
    }

    async fn close_task_inner(&self, actor_id: &str, task_id: &str) -> CollectResult<CollectionTask> {
        let mut task = self.load_owned_task(actor_id, PERM_CLOSE, task_id).await?;
        if task.is_archived() {
            return Err(archived_conflict());
        }
        match task.status {
            TaskStatus::Closed => return Ok(task),
            TaskStatus::Draft => {
                return Err(CollectError::Conflict(
                    "Only published tasks can be closed".to_string(),
                ))
            }
            TaskStatus::Published => {}
        }
        task.status = TaskStatus::Closed;
        task.updated_by = actor_id.to_string();
        task.updated_at = Utc::now();
        self.deps.tasks.save_task(&task).await?;
        tracing::info!("Closed collection task {}", task_id);
        Ok(task)
    }

    pub async fn archive_task(&self, actor_id: &str, task_id: &str) -> CollectResult<CollectionTask> {
        let result = self.archive_task_inner(actor_id, task_id).await;
        self.audit(actor_id, "archive", TARGET_TASK, task_id, &result, task_diff)
            .await;
        result
    }

    async fn archive_task_inner(&self, actor_id: &str, task_id: &str) -> CollectResult<CollectionTask> {
        let mut task = self.load_owned_task(actor_id, PERM_ARCHIVE, task_id).await?;
        if task.is_archived() {
            return Ok(task);
        }
        if task.status != TaskStatus::Closed {
            return Err(CollectError::Conflict(
                "Only closed tasks can be archived".to_string(),
            ));
        }
        let now = Utc::now();
        task.archived_at = Some(now);
        task.updated_by = actor_id.to_string();
        task.updated_at = now;
        self.deps.tasks.archive_task(&task).await?;
        tracing::info!("Archived collection task {}", task_id);
        Ok(task)
    }

    /// Soft delete from any status. Submissions and files stay for audit.
    pub async fn delete_task(&self, actor_id: &str, task_id: &str) -> CollectResult<CollectionTask> {
        let result = self.delete_task_inner(actor_id, task_id).await;
        self.audit(actor_id, "delete", TARGET_TASK, task_id, &result, task_diff)
            .await;
        result
    }

    async fn delete_task_inner(&self, actor_id: &str, task_id: &str) -> CollectResult<CollectionTask> {
        let mut task = self.load_owned_task(actor_id, PERM_DELETE, task_id).await?;
        let now = Utc::now();
        task.deleted_at = Some(now);
        task.updated_by = actor_id.to_string();
        task.updated_at = now;
        self.deps.tasks.soft_delete_task(&task).await?;
        tracing::info!("Deleted collection task {}", task_id);
        Ok(task)
    }

    /// Replace an item's template. The new blob is written and recorded
    /// before the old one is removed.
    pub async fn upload_item_template(
        &self,
        actor_id: &str,
        task_id: &str,
        item_id: &str,
        file: UploadedFile,
    ) -> CollectResult<CollectionItem> {
        let result = self
            .upload_item_template_inner(actor_id, task_id, item_id, file)
            .await;
        self.audit(actor_id, "upload_template", TARGET_TASK, task_id, &result, |item| {
            json!({
                "itemId": item.item_id,
                "fileName": item.template.as_ref().map(|t| t.file_name.clone()),
            })
        })
        .await;
        result
    }

    async fn upload_item_template_inner(
        &self,
        actor_id: &str,
        task_id: &str,
        item_id: &str,
        file: UploadedFile,
    ) -> CollectResult<CollectionItem> {
        let task = self.load_owned_task(actor_id, PERM_UPDATE, task_id).await?;
        if task.is_archived() {
            return Err(archived_conflict());
        }
        if task.status == TaskStatus::Closed {
            return Err(CollectError::Conflict(
                "Templates cannot change on a closed task".to_string(),
            ));
        }
        let mut item = self
            .deps
            .tasks
            .list_items(task_id)
            .await?
            .into_iter()
            .find(|i| i.item_id == item_id)
            .ok_or_else(|| CollectError::NotFound("Collection item not found".to_string()))?;

        let size = file.size();
        if size == 0 {
            return Err(CollectError::BadRequest("The template file is empty".to_string()));
        }
        if size > self.limits.max_template_bytes {
            return Err(CollectError::BadRequest(format!(
                "Templates are limited to {} MiB",
                self.limits.max_template_bytes / (1024 * 1024)
            )));
        }

        let key = template_object_key(&self.module, task_id, item_id, &file.file_name);
        self.deps
            .blobs
            .upload_private(&self.bucket, &key, file.bytes, &file.content_type)
            .await
            .map_err(CollectError::upload_failed)?;

        let template = ItemTemplate {
            file_key: key.clone(),
            file_name: file.file_name,
            content_type: file.content_type,
            size,
        };
        if let Err(e) = self.deps.tasks.save_item_template(task_id, item_id, &template).await {
            self.remove_blobs_best_effort(&[key]).await;
            return Err(e.into());
        }

        let previous = item.template.replace(template);
        if let Some(old) = previous {
            self.remove_blobs_best_effort(&[old.file_key]).await;
        }
        tracing::info!("Replaced template of item {} on task {}", item_id, task_id);
        Ok(item)
    }

    /// Tasks of this module the actor may manage, newest first.
    pub async fn list_console_tasks(&self, actor_id: &str) -> CollectResult<Vec<CollectionTask>> {
        let manage_all = self.has_perm(actor_id, PERM_MANAGE_ALL).await?;
        let mut tasks: Vec<CollectionTask> = self
            .deps
            .tasks
            .list_tasks()
            .await?
            .into_iter()
            .filter(|t| !t.is_deleted() && t.module == self.module)
            .filter(|t| manage_all || t.created_by == actor_id)
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    pub async fn get_console_task(&self, actor_id: &str, task_id: &str) -> CollectResult<TaskDetail> {
        let task = self.load_live_task(task_id).await?;
        self.ensure_owner(actor_id, &task).await?;
        let items = self.deps.tasks.list_items(task_id).await?;
        let scopes = self.deps.tasks.list_scopes(task_id).await?;
        Ok(TaskDetail { task, items, scopes })
    }

    pub(crate) async fn remove_blobs_best_effort(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if let Err(e) = self.deps.blobs.remove(&self.bucket, keys).await {
            tracing::warn!("Leaving {} orphaned blob(s) behind: {}", keys.len(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft_task(visible_all: bool, due: Option<Duration>) -> CollectionTask {
        let now = Utc::now();
        CollectionTask {
            task_id: "t1".to_string(),
            module: "collect".to_string(),
            title: "Forms".to_string(),
            description_md: String::new(),
            status: TaskStatus::Draft,
            archived_at: None,
            source: None,
            visible_all,
            max_files_per_submission: 1,
            due_at: due.map(|d| now + d),
            created_by: "staff".to_string(),
            updated_by: "staff".to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_publish_blockers_all_reported() {
        let task = draft_task(false, None);
        let blockers = publish_blockers(&task, 0, 0, Utc::now());
        assert_eq!(blockers.len(), 3);
    }

    #[test]
    fn test_publish_blockers_past_due() {
        let task = draft_task(true, Some(Duration::minutes(-1)));
        assert_eq!(
            publish_blockers(&task, 1, 0, Utc::now()),
            vec!["due date must be in the future"]
        );
    }

    #[test]
    fn test_source_bound_needs_no_scopes() {
        let mut task = draft_task(false, Some(Duration::days(1)));
        task.source = Some(SourceBinding {
            source_type: "notice".to_string(),
            source_id: "n1".to_string(),
        });
        assert!(publish_blockers(&task, 1, 0, Utc::now()).is_empty());
    }

    #[test]
    fn test_validate_body_normalizes_bound_tasks() {
        let body: TaskBody = serde_json::from_value(json!({
            "title": "  Forms ",
            "source": {"sourceType": "notice", "sourceId": "n1"},
            "visibleAll": false,
            "scopes": [{"scopeType": "role", "refId": "student"}],
        }))
        .unwrap();
        let draft = validate_body(&body).unwrap();
        assert_eq!(draft.title, "Forms");
        assert!(draft.visible_all);
        assert!(draft.scopes.is_empty());
    }

    #[test]
    fn test_validate_body_rejects_bad_input() {
        let no_title: TaskBody = serde_json::from_value(json!({"title": " "})).unwrap();
        assert!(validate_body(&no_title).is_err());
        let zero_quota: TaskBody =
            serde_json::from_value(json!({"title": "x", "maxFilesPerSubmission": 0})).unwrap();
        assert!(validate_body(&zero_quota).is_err());
        let survey: TaskBody = serde_json::from_value(json!({
            "title": "x",
            "source": {"sourceType": "survey", "sourceId": "s1"}
        }))
        .unwrap();
        assert!(validate_body(&survey).is_err());
    }

    fn sized_body(items: usize, scopes: usize) -> TaskBody {
        let items: Vec<serde_json::Value> = (0..items).map(|n| json!({ "title": format!("Item {}", n) })).collect();
        let scopes: Vec<serde_json::Value> = (0..scopes)
            .map(|n| json!({ "scopeType": "department", "refId": format!("d{}", n) }))
            .collect();
        serde_json::from_value(json!({ "title": "x", "items": items, "scopes": scopes })).unwrap()
    }

    #[test]
    fn test_validate_body_keeps_writes_in_one_transaction() {
        // 1 task row + 49 items + 2 * 25 scopes = 100
        assert!(validate_body(&sized_body(49, 25)).is_ok());
        let err = validate_body(&sized_body(50, 25)).err().unwrap();
        assert_eq!(err.code(), "BAD_REQUEST");
        assert!(err.to_string().contains("50 items plus 25 scopes"));
    }

    #[test]
    fn test_validate_body_dedupes_scopes() {
        let body: TaskBody = serde_json::from_value(json!({
            "title": "x",
            "scopes": [
                {"scopeType": "department", "refId": "d1"},
                {"scopeType": "department", "refId": "d1"},
                {"scopeType": "role", "refId": ""}
            ]
        }))
        .unwrap();
        assert_eq!(validate_body(&body).unwrap().scopes.len(), 1);
    }
}
