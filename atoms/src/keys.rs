//! Single-table key layout shared by every atom.

pub const TASK_PK: &str = "TASK";
pub const NOTICE_PK: &str = "NOTICE";
pub const DEPT_PK: &str = "DEPT";
pub const PROFILE_SK: &str = "PROFILE";
pub const SOURCE_SK: &str = "SOURCE";

pub fn task_sk(task_id: &str) -> String {
    format!("TASK#{}", task_id)
}

/// Partition holding a task's items, scopes, submissions and files.
pub fn task_partition(task_id: &str) -> String {
    format!("TASK#{}", task_id)
}

pub fn item_sk(item_id: &str) -> String {
    format!("ITEM#{}", item_id)
}

pub fn scope_sk(scope_type: &str, ref_id: &str) -> String {
    format!("SCOPE#{}#{}", scope_type, ref_id)
}

/// Reverse index partition: every task visible to one scope member.
pub fn scope_partition(scope_type: &str, ref_id: &str) -> String {
    format!("SCOPE#{}#{}", scope_type, ref_id)
}

pub fn source_partition(source_type: &str, source_id: &str) -> String {
    format!("SOURCE#{}#{}", source_type, source_id)
}

pub fn submission_sk(user_id: &str) -> String {
    format!("SUBMISSION#{}", user_id)
}

pub fn file_prefix(submission_id: &str) -> String {
    format!("FILE#{}#", submission_id)
}

pub fn file_sk(submission_id: &str, file_id: &str) -> String {
    format!("FILE#{}#{}", submission_id, file_id)
}

pub fn user_partition(user_id: &str) -> String {
    format!("USER#{}", user_id)
}

pub fn perm_sk(code: &str) -> String {
    format!("PERM#{}", code)
}

pub fn dept_sk(dept_id: &str) -> String {
    format!("DEPT#{}", dept_id)
}

pub fn notice_sk(notice_id: &str) -> String {
    format!("NOTICE#{}", notice_id)
}

pub fn audit_partition(target_type: &str, target_id: &str) -> String {
    format!("AUDIT#{}#{}", target_type, target_id)
}
