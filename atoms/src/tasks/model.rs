use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a collection task. Archiving is tracked separately in
/// `CollectionTask::archived_at` and never collapses into this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    Published,
    Closed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Draft => "draft",
            TaskStatus::Published => "published",
            TaskStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(TaskStatus::Draft),
            "published" => Some(TaskStatus::Published),
            "closed" => Some(TaskStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Role,
    Department,
    Position,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Role => "role",
            ScopeType::Department => "department",
            ScopeType::Position => "position",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "role" => Some(ScopeType::Role),
            "department" => Some(ScopeType::Department),
            "position" => Some(ScopeType::Position),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskScope {
    pub scope_type: ScopeType,
    pub ref_id: String,
}

/// Only notices can own a task today.
pub const SOURCE_TYPE_NOTICE: &str = "notice";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBinding {
    pub source_type: String,
    pub source_id: String,
}

/// Staff-provided example or blank form attached to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTemplate {
    pub file_key: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

/// A named material slot of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionItem {
    pub item_id: String,
    pub task_id: String,
    pub title: String,
    pub description: Option<String>,
    pub required: bool,
    pub sort: i32,
    #[serde(default)]
    pub template: Option<ItemTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionTask {
    pub task_id: String,
    pub module: String,
    pub title: String,
    pub description_md: String,
    pub status: TaskStatus,
    pub archived_at: Option<DateTime<Utc>>,
    pub source: Option<SourceBinding>,
    pub visible_all: bool,
    pub max_files_per_submission: u32,
    pub due_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CollectionTask {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_source_bound(&self) -> bool {
        self.source.is_some()
    }

    /// Structural edits (items, scopes, binding) are only allowed on drafts.
    pub fn is_editable(&self) -> bool {
        self.status == TaskStatus::Draft && !self.is_archived()
    }

    /// True while students may still mutate their submission at `now`.
    pub fn accepts_submissions_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Published
            && !self.is_archived()
            && self.due_at.map(|due| now <= due).unwrap_or(false)
    }
}

/// Writes needed to insert a task: its row, one per item, a row and an
/// index entry per scope, and the source claim.
pub fn insert_write_count(item_count: usize, scope_count: usize, source_bound: bool) -> usize {
    1 + item_count + 2 * scope_count + usize::from(source_bound)
}

/// Full structural rewrite of a draft task, applied atomically.
#[derive(Debug, Clone)]
pub struct TaskEdit {
    pub task: CollectionTask,
    pub previous_source: Option<SourceBinding>,
    pub previous_scopes: Vec<TaskScope>,
    pub scopes: Vec<TaskScope>,
    /// Items to insert or overwrite, keyed by `item_id`.
    pub items: Vec<CollectionItem>,
    pub removed_item_ids: Vec<String>,
}
