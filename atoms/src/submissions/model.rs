use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Staff triage label. Independent of whether the files are complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Complete,
    NeedMore,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Complete => "complete",
            SubmissionStatus::NeedMore => "need_more",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SubmissionStatus::Pending),
            "complete" => Some(SubmissionStatus::Complete),
            "need_more" => Some(SubmissionStatus::NeedMore),
            "approved" => Some(SubmissionStatus::Approved),
            "rejected" => Some(SubmissionStatus::Rejected),
            _ => None,
        }
    }

    /// Statuses that send the student back and must explain why.
    pub fn requires_student_message(&self) -> bool {
        matches!(self, SubmissionStatus::NeedMore | SubmissionStatus::Rejected)
    }
}

/// At most one per (task, user). `submitted_at` and `withdrawn_at` are never both set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub submission_id: String,
    pub task_id: String,
    pub user_id: String,
    pub status: SubmissionStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub assignee_user_id: Option<String>,
    pub student_message: Option<String>,
    pub staff_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(task_id: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            submission_id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            status: SubmissionStatus::Pending,
            submitted_at: None,
            withdrawn_at: None,
            archived_at: None,
            assignee_user_id: None,
            student_message: None,
            staff_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_withdrawn(&self) -> bool {
        self.withdrawn_at.is_some()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted_at.is_some()
    }
}

/// One uploaded artifact for one item within one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionFile {
    pub file_id: String,
    pub submission_id: String,
    pub task_id: String,
    pub item_id: String,
    pub file_key: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    /// Upload order within the submission.
    pub sort: i32,
    pub uploaded_at: DateTime<Utc>,
}

/// Bulk mutation applied by the review batch processor.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionPatch {
    Assignee(Option<String>),
    Status {
        status: SubmissionStatus,
        student_message: Option<String>,
        staff_note: Option<String>,
    },
}

impl SubmissionPatch {
    pub fn apply(&self, submission: &mut Submission, now: DateTime<Utc>) {
        match self {
            SubmissionPatch::Assignee(assignee) => {
                submission.assignee_user_id = assignee.clone();
            }
            SubmissionPatch::Status {
                status,
                student_message,
                staff_note,
            } => {
                submission.status = *status;
                submission.student_message = student_message.clone();
                submission.staff_note = staff_note.clone();
            }
        }
        submission.updated_at = now;
    }
}
