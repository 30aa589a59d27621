use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::{HashMap, HashSet};

use super::model::{
    CollectionItem, CollectionTask, ItemTemplate, ScopeType, SourceBinding, TaskEdit, TaskScope,
    TaskStatus,
};
use super::store::TaskStore;
use crate::attrs::{self, get_bool, get_n, get_s, get_s_or_default, get_time, n, put_opt, require_s, s, time, Item};
use crate::dynamo::{self, delete_action, put_action, put_new_action, update_action};
use crate::error::{StoreError, StoreResult};
use crate::keys;

/// DynamoDB-backed Task Repository.
#[derive(Clone)]
pub struct DynamoTaskStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoTaskStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    fn scope_actions(
        &self,
        task_id: &str,
        added: &[&TaskScope],
        removed: &[&TaskScope],
    ) -> StoreResult<Vec<TransactWriteItem>> {
        let mut actions = Vec::new();
        for scope in removed {
            let kind = scope.scope_type.as_str();
            actions.push(delete_action(
                &self.table_name,
                &keys::task_partition(task_id),
                &keys::scope_sk(kind, &scope.ref_id),
            )?);
            actions.push(delete_action(
                &self.table_name,
                &keys::scope_partition(kind, &scope.ref_id),
                &keys::task_sk(task_id),
            )?);
        }
        for scope in added {
            let (row, index) = scope_to_items(task_id, scope);
            actions.push(put_action(&self.table_name, row)?);
            actions.push(put_action(&self.table_name, index)?);
        }
        Ok(actions)
    }

    fn claim_action(&self, task_id: &str, source: &SourceBinding) -> StoreResult<TransactWriteItem> {
        let mut claim = attrs::key(
            keys::source_partition(&source.source_type, &source.source_id),
            keys::SOURCE_SK,
        );
        claim.insert("task_id".to_string(), s(task_id));
        put_new_action(&self.table_name, claim)
    }

    fn release_action(&self, source: &SourceBinding) -> StoreResult<TransactWriteItem> {
        delete_action(
            &self.table_name,
            &keys::source_partition(&source.source_type, &source.source_id),
            keys::SOURCE_SK,
        )
    }
}

#[async_trait]
impl TaskStore for DynamoTaskStore {
    async fn insert_task(
        &self,
        task: &CollectionTask,
        items: &[CollectionItem],
        scopes: &[TaskScope],
    ) -> StoreResult<()> {
        let mut actions = Vec::new();
        if let Some(source) = &task.source {
            actions.push(self.claim_action(&task.task_id, source)?);
        }
        for item in items {
            actions.push(put_action(&self.table_name, item_to_row(item))?);
        }
        let added: Vec<&TaskScope> = scopes.iter().collect();
        actions.extend(self.scope_actions(&task.task_id, &added, &[])?);
        actions.push(put_new_action(&self.table_name, task_to_item(task))?);

        dynamo::transact_atomic(&self.client, actions).await?;
        tracing::info!("Inserted collection task {} with {} items", task.task_id, items.len());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> StoreResult<Option<CollectionTask>> {
        let row = dynamo::get_row(&self.client, &self.table_name, keys::TASK_PK, &keys::task_sk(task_id)).await?;
        row.map(|item| item_to_task(&item)).transpose()
    }

    async fn list_tasks(&self) -> StoreResult<Vec<CollectionTask>> {
        let rows = dynamo::query_prefix(&self.client, &self.table_name, keys::TASK_PK, "TASK#").await?;
        rows.iter().map(item_to_task).collect()
    }

    async fn list_items(&self, task_id: &str) -> StoreResult<Vec<CollectionItem>> {
        let rows = dynamo::query_prefix(
            &self.client,
            &self.table_name,
            &keys::task_partition(task_id),
            "ITEM#",
        )
        .await?;
        let mut items = rows
            .iter()
            .map(|row| row_to_item(task_id, row))
            .collect::<StoreResult<Vec<_>>>()?;
        items.sort_by(|a, b| a.sort.cmp(&b.sort).then_with(|| a.title.cmp(&b.title)));
        Ok(items)
    }

    async fn list_scopes(&self, task_id: &str) -> StoreResult<Vec<TaskScope>> {
        let rows = dynamo::query_prefix(
            &self.client,
            &self.table_name,
            &keys::task_partition(task_id),
            "SCOPE#",
        )
        .await?;
        Ok(rows.iter().filter_map(row_to_scope).collect())
    }

    async fn find_task_by_source(&self, source: &SourceBinding) -> StoreResult<Option<String>> {
        let row = dynamo::get_row(
            &self.client,
            &self.table_name,
            &keys::source_partition(&source.source_type, &source.source_id),
            keys::SOURCE_SK,
        )
        .await?;
        Ok(row.and_then(|item| get_s(&item, "task_id")))
    }

    async fn replace_task(&self, edit: &TaskEdit) -> StoreResult<()> {
        let task_id = edit.task.task_id.as_str();
        let mut actions = Vec::new();

        if edit.previous_source != edit.task.source {
            if let Some(old) = &edit.previous_source {
                actions.push(self.release_action(old)?);
            }
            if let Some(new) = &edit.task.source {
                actions.push(self.claim_action(task_id, new)?);
            }
        }

        let previous: HashSet<&TaskScope> = edit.previous_scopes.iter().collect();
        let next: HashSet<&TaskScope> = edit.scopes.iter().collect();
        let added: Vec<&TaskScope> = next.difference(&previous).copied().collect();
        let removed: Vec<&TaskScope> = previous.difference(&next).copied().collect();
        actions.extend(self.scope_actions(task_id, &added, &removed)?);

        for item_id in &edit.removed_item_ids {
            actions.push(delete_action(
                &self.table_name,
                &keys::task_partition(task_id),
                &keys::item_sk(item_id),
            )?);
        }
        for item in &edit.items {
            actions.push(put_action(&self.table_name, item_to_row(item))?);
        }
        actions.push(put_action(&self.table_name, task_to_item(&edit.task))?);

        dynamo::transact_atomic(&self.client, actions).await
    }

    async fn save_task(&self, task: &CollectionTask) -> StoreResult<()> {
        dynamo::put_row(&self.client, &self.table_name, task_to_item(task)).await
    }

    async fn soft_delete_task(&self, task: &CollectionTask) -> StoreResult<()> {
        let mut actions = Vec::new();
        if let Some(source) = &task.source {
            actions.push(self.release_action(source)?);
        }
        actions.push(put_action(&self.table_name, task_to_item(task))?);
        dynamo::transact(&self.client, actions).await
    }

    async fn archive_task(&self, task: &CollectionTask) -> StoreResult<()> {
        let archived_at = task
            .archived_at
            .ok_or_else(|| StoreError::Decode("archive_task called without archived_at".to_string()))?;

        let submissions = dynamo::query_prefix(
            &self.client,
            &self.table_name,
            &keys::task_partition(&task.task_id),
            "SUBMISSION#",
        )
        .await?;

        let mut actions = Vec::with_capacity(submissions.len() + 1);
        for row in &submissions {
            let sk = require_s(row, "SK")?;
            let mut values = HashMap::new();
            values.insert(":at".to_string(), time(&archived_at));
            actions.push(update_action(
                &self.table_name,
                &keys::task_partition(&task.task_id),
                &sk,
                "SET archived_at = :at",
                &[],
                values,
            )?);
        }
        // Task row goes last: a partial failure leaves the task unarchived and
        // a retry re-stamps the same instant.
        actions.push(put_action(&self.table_name, task_to_item(task))?);

        dynamo::transact(&self.client, actions).await?;
        tracing::info!(
            "Archived collection task {} and {} submissions",
            task.task_id,
            submissions.len()
        );
        Ok(())
    }

    async fn save_item_template(
        &self,
        task_id: &str,
        item_id: &str,
        template: &ItemTemplate,
    ) -> StoreResult<()> {
        let mut values = HashMap::new();
        values.insert(":key".to_string(), s(&template.file_key));
        values.insert(":name".to_string(), s(&template.file_name));
        values.insert(":ct".to_string(), s(&template.content_type));
        values.insert(":size".to_string(), n(template.size));
        let action = update_action(
            &self.table_name,
            &keys::task_partition(task_id),
            &keys::item_sk(item_id),
            "SET template_file_key = :key, template_file_name = :name, template_content_type = :ct, template_size = :size",
            &[],
            values,
        )?;
        dynamo::transact(&self.client, vec![action]).await
    }
}

pub(crate) fn task_to_item(task: &CollectionTask) -> Item {
    let mut item = attrs::key(keys::TASK_PK, keys::task_sk(&task.task_id));
    item.insert("module".to_string(), s(&task.module));
    item.insert("title".to_string(), s(&task.title));
    item.insert("description_md".to_string(), s(&task.description_md));
    item.insert("status".to_string(), s(task.status.as_str()));
    item.insert("visible_all".to_string(), AttributeValue::Bool(task.visible_all));
    item.insert("max_files_per_submission".to_string(), n(task.max_files_per_submission));
    item.insert("created_by".to_string(), s(&task.created_by));
    item.insert("updated_by".to_string(), s(&task.updated_by));
    item.insert("created_at".to_string(), time(&task.created_at));
    item.insert("updated_at".to_string(), time(&task.updated_at));
    put_opt(&mut item, "archived_at", task.archived_at.as_ref().map(time));
    put_opt(&mut item, "due_at", task.due_at.as_ref().map(time));
    put_opt(&mut item, "deleted_at", task.deleted_at.as_ref().map(time));
    if let Some(source) = &task.source {
        item.insert("source_type".to_string(), s(&source.source_type));
        item.insert("source_id".to_string(), s(&source.source_id));
    }
    item
}

pub(crate) fn item_to_task(item: &Item) -> StoreResult<CollectionTask> {
    let sk = require_s(item, "SK")?;
    let task_id = sk
        .strip_prefix("TASK#")
        .ok_or_else(|| StoreError::Decode(format!("unexpected task key {}", sk)))?
        .to_string();
    let status_raw = get_s_or_default(item, "status");
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Decode(format!("unknown task status {:?}", status_raw)))?;
    let source = match (get_s(item, "source_type"), get_s(item, "source_id")) {
        (Some(source_type), Some(source_id)) => Some(SourceBinding { source_type, source_id }),
        _ => None,
    };
    let created_at = get_time(item, "created_at")
        .ok_or_else(|| StoreError::Decode(format!("task {} has no created_at", task_id)))?;

    Ok(CollectionTask {
        module: get_s_or_default(item, "module"),
        title: get_s_or_default(item, "title"),
        description_md: get_s_or_default(item, "description_md"),
        status,
        archived_at: get_time(item, "archived_at"),
        source,
        visible_all: get_bool(item, "visible_all"),
        max_files_per_submission: get_n(item, "max_files_per_submission").unwrap_or(1),
        due_at: get_time(item, "due_at"),
        created_by: get_s_or_default(item, "created_by"),
        updated_by: get_s_or_default(item, "updated_by"),
        created_at,
        updated_at: get_time(item, "updated_at").unwrap_or(created_at),
        deleted_at: get_time(item, "deleted_at"),
        task_id,
    })
}

pub(crate) fn item_to_row(item: &CollectionItem) -> Item {
    let mut row = attrs::key(keys::task_partition(&item.task_id), keys::item_sk(&item.item_id));
    row.insert("title".to_string(), s(&item.title));
    row.insert("required".to_string(), AttributeValue::Bool(item.required));
    row.insert("sort".to_string(), n(item.sort));
    put_opt(&mut row, "description", item.description.as_ref().map(s));
    if let Some(template) = &item.template {
        row.insert("template_file_key".to_string(), s(&template.file_key));
        row.insert("template_file_name".to_string(), s(&template.file_name));
        row.insert("template_content_type".to_string(), s(&template.content_type));
        row.insert("template_size".to_string(), n(template.size));
    }
    row
}

pub(crate) fn row_to_item(task_id: &str, row: &Item) -> StoreResult<CollectionItem> {
    let sk = require_s(row, "SK")?;
    let item_id = sk
        .strip_prefix("ITEM#")
        .ok_or_else(|| StoreError::Decode(format!("unexpected item key {}", sk)))?
        .to_string();
    let template = get_s(row, "template_file_key").map(|file_key| ItemTemplate {
        file_key,
        file_name: get_s_or_default(row, "template_file_name"),
        content_type: get_s_or_default(row, "template_content_type"),
        size: get_n(row, "template_size").unwrap_or(0),
    });
    Ok(CollectionItem {
        item_id,
        task_id: task_id.to_string(),
        title: get_s_or_default(row, "title"),
        description: get_s(row, "description"),
        required: get_bool(row, "required"),
        sort: get_n(row, "sort").unwrap_or(0),
        template,
    })
}

fn scope_to_items(task_id: &str, scope: &TaskScope) -> (Item, Item) {
    let kind = scope.scope_type.as_str();
    let mut row = attrs::key(keys::task_partition(task_id), keys::scope_sk(kind, &scope.ref_id));
    row.insert("scope_type".to_string(), s(kind));
    row.insert("ref_id".to_string(), s(&scope.ref_id));
    let mut index = attrs::key(keys::scope_partition(kind, &scope.ref_id), keys::task_sk(task_id));
    index.insert("task_id".to_string(), s(task_id));
    (row, index)
}

fn row_to_scope(row: &Item) -> Option<TaskScope> {
    let scope_type = ScopeType::parse(&get_s(row, "scope_type")?)?;
    Some(TaskScope {
        scope_type,
        ref_id: get_s(row, "ref_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample_task() -> CollectionTask {
        let now = Utc::now();
        CollectionTask {
            task_id: "task-1".to_string(),
            module: "collect".to_string(),
            title: "Scholarship forms".to_string(),
            description_md: "Upload **both** pages".to_string(),
            status: TaskStatus::Published,
            archived_at: None,
            source: Some(SourceBinding {
                source_type: "notice".to_string(),
                source_id: "n-9".to_string(),
            }),
            visible_all: true,
            max_files_per_submission: 3,
            due_at: Some(now + Duration::days(2)),
            created_by: "staff-1".to_string(),
            updated_by: "staff-2".to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_task_item_roundtrip() {
        let task = sample_task();
        let decoded = item_to_task(&task_to_item(&task)).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn test_task_without_status_is_rejected() {
        let mut item = task_to_item(&sample_task());
        item.remove("status");
        assert!(matches!(item_to_task(&item), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_item_row_keeps_template() {
        let item = CollectionItem {
            item_id: "i-1".to_string(),
            task_id: "task-1".to_string(),
            title: "Signed form".to_string(),
            description: None,
            required: true,
            sort: 2,
            template: Some(ItemTemplate {
                file_key: "collect/tasks/task-1/items/i-1/template/x.pdf".to_string(),
                file_name: "blank.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                size: 1024,
            }),
        };
        let row = item_to_row(&item);
        assert_eq!(row_to_item("task-1", &row).unwrap(), item);
    }

    #[test]
    fn test_scope_rows_are_mirrored_into_reverse_index() {
        let scope = TaskScope {
            scope_type: ScopeType::Department,
            ref_id: "d-7".to_string(),
        };
        let (row, index) = scope_to_items("task-1", &scope);
        assert_eq!(row_to_scope(&row), Some(scope));
        assert_eq!(get_s(&index, "PK").as_deref(), Some("SCOPE#department#d-7"));
        assert_eq!(get_s(&index, "task_id").as_deref(), Some("task-1"));
    }
}
