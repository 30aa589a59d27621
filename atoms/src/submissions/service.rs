use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use super::model::{Submission, SubmissionFile, SubmissionPatch, SubmissionStatus};
use super::store::SubmissionStore;
use crate::attrs::{self, get_n, get_s, get_s_or_default, get_time, n, put_opt, require_s, s, time, Item};
use crate::dynamo::{self, delete_action, put_action, put_new_action, update_action};
use crate::error::{StoreError, StoreResult};
use crate::keys;

/// DynamoDB-backed Submission Repository.
///
/// Submissions live in the task partition keyed by user id, files in the same
/// partition keyed by submission id, so one query loads a whole task.
#[derive(Clone)]
pub struct DynamoSubmissionStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoSubmissionStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl SubmissionStore for DynamoSubmissionStore {
    async fn get_submission(&self, task_id: &str, user_id: &str) -> StoreResult<Option<Submission>> {
        let row = dynamo::get_row(
            &self.client,
            &self.table_name,
            &keys::task_partition(task_id),
            &keys::submission_sk(user_id),
        )
        .await?;
        row.map(|item| item_to_submission(task_id, &item)).transpose()
    }

    async fn list_submissions(&self, task_id: &str) -> StoreResult<Vec<Submission>> {
        let rows = dynamo::query_prefix(
            &self.client,
            &self.table_name,
            &keys::task_partition(task_id),
            "SUBMISSION#",
        )
        .await?;
        rows.iter().map(|row| item_to_submission(task_id, row)).collect()
    }

    async fn create_submission(&self, submission: &Submission) -> StoreResult<()> {
        let action = put_new_action(&self.table_name, submission_to_item(submission))?;
        dynamo::transact(&self.client, vec![action]).await
    }

    async fn save_submission(&self, submission: &Submission) -> StoreResult<()> {
        dynamo::put_row(&self.client, &self.table_name, submission_to_item(submission)).await
    }

    async fn list_files(&self, task_id: &str, submission_id: &str) -> StoreResult<Vec<SubmissionFile>> {
        let rows = dynamo::query_prefix(
            &self.client,
            &self.table_name,
            &keys::task_partition(task_id),
            &keys::file_prefix(submission_id),
        )
        .await?;
        let mut files = rows
            .iter()
            .map(|row| item_to_file(task_id, row))
            .collect::<StoreResult<Vec<_>>>()?;
        files.sort_by_key(|f| f.sort);
        Ok(files)
    }

    async fn list_task_files(&self, task_id: &str) -> StoreResult<Vec<SubmissionFile>> {
        let rows = dynamo::query_prefix(
            &self.client,
            &self.table_name,
            &keys::task_partition(task_id),
            "FILE#",
        )
        .await?;
        let mut files = rows
            .iter()
            .map(|row| item_to_file(task_id, row))
            .collect::<StoreResult<Vec<_>>>()?;
        files.sort_by(|a, b| a.submission_id.cmp(&b.submission_id).then(a.sort.cmp(&b.sort)));
        Ok(files)
    }

    async fn insert_file(&self, file: &SubmissionFile) -> StoreResult<()> {
        dynamo::put_row(&self.client, &self.table_name, file_to_item(file)).await
    }

    async fn delete_file(&self, file: &SubmissionFile) -> StoreResult<()> {
        let action = delete_action(
            &self.table_name,
            &keys::task_partition(&file.task_id),
            &keys::file_sk(&file.submission_id, &file.file_id),
        )?;
        dynamo::transact(&self.client, vec![action]).await
    }

    async fn withdraw(&self, submission: &Submission, files: &[SubmissionFile]) -> StoreResult<()> {
        let mut actions = Vec::with_capacity(files.len() + 1);
        for file in files {
            actions.push(delete_action(
                &self.table_name,
                &keys::task_partition(&file.task_id),
                &keys::file_sk(&file.submission_id, &file.file_id),
            )?);
        }
        actions.push(put_action(&self.table_name, submission_to_item(submission))?);
        dynamo::transact(&self.client, actions).await
    }

    async fn batch_update(
        &self,
        task_id: &str,
        submission_ids: &[String],
        patch: &SubmissionPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let wanted: HashSet<&str> = submission_ids.iter().map(|id| id.as_str()).collect();
        let targets: Vec<Submission> = self
            .list_submissions(task_id)
            .await?
            .into_iter()
            .filter(|sub| wanted.contains(sub.submission_id.as_str()) && !sub.is_withdrawn())
            .collect();

        let (expression, names, values) = patch_expression(patch, now);
        let names: Vec<(&str, &str)> = names.iter().map(|(k, v)| (*k, *v)).collect();
        let mut actions = Vec::with_capacity(targets.len());
        for sub in &targets {
            actions.push(update_action(
                &self.table_name,
                &keys::task_partition(task_id),
                &keys::submission_sk(&sub.user_id),
                &expression,
                &names,
                values.clone(),
            )?);
        }
        dynamo::transact(&self.client, actions).await?;
        tracing::info!("Batch updated {} submissions of task {}", targets.len(), task_id);
        Ok(targets.len())
    }
}

/// Builds `SET ... REMOVE ...` for a batch patch. Absent optionals are removed.
fn patch_expression(
    patch: &SubmissionPatch,
    now: DateTime<Utc>,
) -> (String, Vec<(&'static str, &'static str)>, Item) {
    let mut set = vec!["updated_at = :updated_at"];
    let mut remove = Vec::new();
    let mut names = Vec::new();
    let mut values = HashMap::new();
    values.insert(":updated_at".to_string(), time(&now));

    match patch {
        SubmissionPatch::Assignee(Some(user_id)) => {
            set.push("assignee_user_id = :assignee");
            values.insert(":assignee".to_string(), s(user_id));
        }
        SubmissionPatch::Assignee(None) => remove.push("assignee_user_id"),
        SubmissionPatch::Status {
            status,
            student_message,
            staff_note,
        } => {
            set.push("#status = :status");
            names.push(("#status", "status"));
            values.insert(":status".to_string(), s(status.as_str()));
            match student_message {
                Some(message) => {
                    set.push("student_message = :message");
                    values.insert(":message".to_string(), s(message));
                }
                None => remove.push("student_message"),
            }
            match staff_note {
                Some(note) => {
                    set.push("staff_note = :note");
                    values.insert(":note".to_string(), s(note));
                }
                None => remove.push("staff_note"),
            }
        }
    }

    let mut expression = format!("SET {}", set.join(", "));
    if !remove.is_empty() {
        expression.push_str(&format!(" REMOVE {}", remove.join(", ")));
    }
    (expression, names, values)
}

pub(crate) fn submission_to_item(sub: &Submission) -> Item {
    let mut item = attrs::key(keys::task_partition(&sub.task_id), keys::submission_sk(&sub.user_id));
    item.insert("submission_id".to_string(), s(&sub.submission_id));
    item.insert("user_id".to_string(), s(&sub.user_id));
    item.insert("status".to_string(), s(sub.status.as_str()));
    item.insert("created_at".to_string(), time(&sub.created_at));
    item.insert("updated_at".to_string(), time(&sub.updated_at));
    put_opt(&mut item, "submitted_at", sub.submitted_at.as_ref().map(time));
    put_opt(&mut item, "withdrawn_at", sub.withdrawn_at.as_ref().map(time));
    put_opt(&mut item, "archived_at", sub.archived_at.as_ref().map(time));
    put_opt(&mut item, "assignee_user_id", sub.assignee_user_id.as_ref().map(s));
    put_opt(&mut item, "student_message", sub.student_message.as_ref().map(s));
    put_opt(&mut item, "staff_note", sub.staff_note.as_ref().map(s));
    item
}

pub(crate) fn item_to_submission(task_id: &str, item: &Item) -> StoreResult<Submission> {
    let status_raw = get_s_or_default(item, "status");
    let status = SubmissionStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Decode(format!("unknown submission status {:?}", status_raw)))?;
    let created_at = get_time(item, "created_at")
        .ok_or_else(|| StoreError::Decode("submission has no created_at".to_string()))?;
    Ok(Submission {
        submission_id: require_s(item, "submission_id")?,
        task_id: task_id.to_string(),
        user_id: require_s(item, "user_id")?,
        status,
        submitted_at: get_time(item, "submitted_at"),
        withdrawn_at: get_time(item, "withdrawn_at"),
        archived_at: get_time(item, "archived_at"),
        assignee_user_id: get_s(item, "assignee_user_id"),
        student_message: get_s(item, "student_message"),
        staff_note: get_s(item, "staff_note"),
        created_at,
        updated_at: get_time(item, "updated_at").unwrap_or(created_at),
    })
}

pub(crate) fn file_to_item(file: &SubmissionFile) -> Item {
    let mut item = attrs::key(
        keys::task_partition(&file.task_id),
        keys::file_sk(&file.submission_id, &file.file_id),
    );
    item.insert("file_id".to_string(), s(&file.file_id));
    item.insert("submission_id".to_string(), s(&file.submission_id));
    item.insert("item_id".to_string(), s(&file.item_id));
    item.insert("file_key".to_string(), s(&file.file_key));
    item.insert("file_name".to_string(), s(&file.file_name));
    item.insert("content_type".to_string(), s(&file.content_type));
    item.insert("size".to_string(), n(file.size));
    item.insert("sort".to_string(), n(file.sort));
    item.insert("uploaded_at".to_string(), time(&file.uploaded_at));
    item
}

pub(crate) fn item_to_file(task_id: &str, item: &Item) -> StoreResult<SubmissionFile> {
    Ok(SubmissionFile {
        file_id: require_s(item, "file_id")?,
        submission_id: require_s(item, "submission_id")?,
        task_id: task_id.to_string(),
        item_id: require_s(item, "item_id")?,
        file_key: require_s(item, "file_key")?,
        file_name: get_s_or_default(item, "file_name"),
        content_type: get_s(item, "content_type").unwrap_or_else(|| "application/octet-stream".to_string()),
        size: get_n(item, "size").unwrap_or(0),
        sort: get_n(item, "sort").unwrap_or(0),
        uploaded_at: get_time(item, "uploaded_at")
            .ok_or_else(|| StoreError::Decode("file has no uploaded_at".to_string()))?,
    })
}
