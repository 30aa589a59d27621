//! Request and response payloads of the collection workflow.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use collect_atoms::submissions::{Submission, SubmissionFile, SubmissionStatus};
use collect_atoms::tasks::{CollectionItem, CollectionTask, TaskScope};

use crate::error::{CollectError, CollectResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInput {
    pub source_type: String,
    pub source_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemInput {
    /// Present when editing an existing item.
    pub item_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    pub sort: Option<i32>,
}

/// Body of create and full update.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBody {
    pub title: String,
    #[serde(default)]
    pub description_md: String,
    pub source: Option<SourceInput>,
    #[serde(default)]
    pub visible_all: bool,
    #[serde(default)]
    pub scopes: Vec<TaskScope>,
    #[serde(default = "default_max_files")]
    pub max_files_per_submission: u32,
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub items: Vec<ItemInput>,
}

fn default_max_files() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueAtBody {
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum BatchAction {
    AssignToMe,
    Unassign,
    #[serde(rename_all = "camelCase")]
    SetStatus {
        status: SubmissionStatus,
        student_message: Option<String>,
        staff_note: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub submission_ids: Vec<String>,
    #[serde(flatten)]
    pub action: BatchAction,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub updated: usize,
}

/// Raw upload as received from the transport.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Review list filters, shared with export selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionFilters {
    /// Free text against student name or number.
    pub q: Option<String>,
    pub status: Option<SubmissionStatus>,
    pub missing_required: Option<bool>,
    pub submitted_from: Option<DateTime<Utc>>,
    pub submitted_to: Option<DateTime<Utc>>,
    /// Matches the department and everything below it.
    pub department_id: Option<String>,
}

impl SubmissionFilters {
    /// Parse from query-string style lookups. Blank values count as absent.
    pub fn from_query<'a, F>(lookup: F) -> CollectResult<Self>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let get = |name: &str| lookup(name).map(str::trim).filter(|v| !v.is_empty());

        let status = match get("status") {
            Some(raw) => Some(
                SubmissionStatus::parse(raw)
                    .ok_or_else(|| CollectError::BadRequest(format!("Unknown status: {}", raw)))?,
            ),
            None => None,
        };

        Ok(Self {
            q: get("q").map(|v| v.to_string()),
            status,
            missing_required: parse_bool(get("missingRequired"), "missingRequired")?,
            submitted_from: parse_time(get("submittedFrom"), "submittedFrom")?,
            submitted_to: parse_time(get("submittedTo"), "submittedTo")?,
            department_id: get("departmentId").map(|v| v.to_string()),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportFilters {
    pub filters: SubmissionFilters,
    /// Include submissions that were never submitted. Withdrawn ones stay out.
    pub include_unsubmitted: bool,
}

impl ExportFilters {
    pub fn from_query<'a, F>(lookup: F) -> CollectResult<Self>
    where
        F: Fn(&str) -> Option<&'a str> + Copy,
    {
        let include = lookup("includeUnsubmitted").map(str::trim).filter(|v| !v.is_empty());
        Ok(Self {
            filters: SubmissionFilters::from_query(lookup)?,
            include_unsubmitted: parse_bool(include, "includeUnsubmitted")?.unwrap_or(false),
        })
    }
}

fn parse_bool(raw: Option<&str>, name: &str) -> CollectResult<Option<bool>> {
    match raw {
        None => Ok(None),
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(other) => Err(CollectError::BadRequest(format!("Invalid {}: {}", name, other))),
    }
}

fn parse_time(raw: Option<&str>, name: &str) -> CollectResult<Option<DateTime<Utc>>> {
    raw.map(|v| {
        DateTime::parse_from_rfc3339(v)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| CollectError::BadRequest(format!("Invalid {}: expected RFC 3339 time", name)))
    })
    .transpose()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    pub task: CollectionTask,
    pub items: Vec<CollectionItem>,
    pub scopes: Vec<TaskScope>,
}

/// A student's own progress on one task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSummary {
    pub submission_id: String,
    pub status: SubmissionStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub student_message: Option<String>,
    pub file_count: usize,
    pub missing_required: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalTaskSummary {
    pub task: CollectionTask,
    pub accepting_submissions: bool,
    pub submission: Option<SubmissionSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalTaskDetail {
    pub task: CollectionTask,
    pub items: Vec<CollectionItem>,
    pub accepting_submissions: bool,
    pub submission: Option<Submission>,
    pub files: Vec<SubmissionFile>,
    pub missing_item_ids: Vec<String>,
}

/// One submission as seen by staff.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRow {
    pub submission_id: String,
    pub user_id: String,
    pub student_no: String,
    pub user_name: String,
    pub department_names: Vec<String>,
    pub status: SubmissionStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub assignee_user_id: Option<String>,
    pub student_message: Option<String>,
    pub staff_note: Option<String>,
    pub file_count: usize,
    pub total_bytes: u64,
    pub missing_required: bool,
    pub missing_item_titles: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionDetail {
    #[serde(flatten)]
    pub row: ReviewRow,
    pub files: Vec<SubmissionFile>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrl {
    pub url: String,
    pub expires_in_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn query(pairs: &[(&'static str, &'static str)]) -> HashMap<&'static str, &'static str> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_filters_from_query() {
        let params = query(&[
            ("q", " 2024 "),
            ("status", "need_more"),
            ("missingRequired", "true"),
            ("submittedFrom", "2025-03-01T00:00:00Z"),
            ("departmentId", ""),
        ]);
        let filters = SubmissionFilters::from_query(|k| params.get(k).copied()).unwrap();
        assert_eq!(filters.q.as_deref(), Some("2024"));
        assert_eq!(filters.status, Some(SubmissionStatus::NeedMore));
        assert_eq!(filters.missing_required, Some(true));
        assert!(filters.submitted_from.is_some());
        assert!(filters.submitted_to.is_none());
        assert!(filters.department_id.is_none());
    }

    #[test]
    fn test_filters_reject_garbage() {
        let params = query(&[("status", "lost")]);
        assert!(SubmissionFilters::from_query(|k| params.get(k).copied()).is_err());
        let params = query(&[("submittedTo", "yesterday")]);
        assert!(SubmissionFilters::from_query(|k| params.get(k).copied()).is_err());
        let params = query(&[("includeUnsubmitted", "maybe")]);
        assert!(ExportFilters::from_query(|k| params.get(k).copied()).is_err());
    }

    #[test]
    fn test_export_filters_default_to_submitted_only() {
        let params = query(&[]);
        let filters = ExportFilters::from_query(|k| params.get(k).copied()).unwrap();
        assert!(!filters.include_unsubmitted);
        let params = query(&[("includeUnsubmitted", "1")]);
        assert!(ExportFilters::from_query(|k| params.get(k).copied()).unwrap().include_unsubmitted);
    }

    #[test]
    fn test_batch_request_parsing() {
        let req: BatchRequest = serde_json::from_str(
            r#"{"submissionIds":["s1"],"action":"setStatus","status":"rejected","studentMessage":"blurry"}"#,
        )
        .unwrap();
        assert_eq!(
            req.action,
            BatchAction::SetStatus {
                status: SubmissionStatus::Rejected,
                student_message: Some("blurry".to_string()),
                staff_note: None,
            }
        );
        let req: BatchRequest =
            serde_json::from_str(r#"{"submissionIds":["s1","s2"],"action":"assignToMe"}"#).unwrap();
        assert_eq!(req.action, BatchAction::AssignToMe);
        assert_eq!(req.submission_ids.len(), 2);
    }

    #[test]
    fn test_task_body_defaults() {
        let body: TaskBody = serde_json::from_str(r#"{"title":"Forms"}"#).unwrap();
        assert_eq!(body.max_files_per_submission, 1);
        assert!(body.items.is_empty());
        assert!(!body.visible_all);
    }
}
