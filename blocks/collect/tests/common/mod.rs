//! In-memory collaborators for engine tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use collect_atoms::storage::BlobStore;
use collect_atoms::submissions::{Submission, SubmissionFile, SubmissionPatch, SubmissionStore};
use collect_atoms::tasks::{
    CollectionItem, CollectionTask, ItemTemplate, SourceBinding, TaskEdit, TaskScope, TaskStore,
};
use collect_atoms::users::{Department, UserDirectory, UserProfile};
use collect_atoms::{StoreError, StoreResult};
use collect_block::types::{TaskBody, TaskDetail, UploadedFile};
use collect_block::{CollectDeps, CollectLimits, CollectService, ObjectFetcher};
use collect_shared::{AuditEvent, AuditSink, Notice, NoticeDirectory, PermissionOracle, VisibilityResolver};

pub const MODULE: &str = "collect";
pub const BUCKET: &str = "test-bucket";
pub const STAFF: &str = "staff-1";

const STAFF_ACTIONS: [&str; 8] = [
    "create", "update", "publish", "close", "archive", "delete", "process", "export",
];

fn source_key(source: &SourceBinding) -> (String, String) {
    (source.source_type.clone(), source.source_id.clone())
}

// ---------- repositories ----------

#[derive(Default)]
struct DbState {
    tasks: HashMap<String, CollectionTask>,
    items: HashMap<String, Vec<CollectionItem>>,
    scopes: HashMap<String, Vec<TaskScope>>,
    sources: HashMap<(String, String), String>,
    submissions: HashMap<(String, String), Submission>,
    files: Vec<SubmissionFile>,
}

#[derive(Default)]
pub struct MemoryDb {
    state: Mutex<DbState>,
    pub fail_template_saves: AtomicBool,
}

impl MemoryDb {
    pub fn submission_files(&self, submission_id: &str) -> Vec<SubmissionFile> {
        let state = self.state.lock().unwrap();
        state
            .files
            .iter()
            .filter(|f| f.submission_id == submission_id)
            .cloned()
            .collect()
    }

    pub fn submissions_of(&self, task_id: &str) -> Vec<Submission> {
        let state = self.state.lock().unwrap();
        state
            .submissions
            .values()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskStore for MemoryDb {
    async fn insert_task(
        &self,
        task: &CollectionTask,
        items: &[CollectionItem],
        scopes: &[TaskScope],
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(source) = &task.source {
            let key = source_key(source);
            if state.sources.contains_key(&key) {
                return Err(StoreError::Conflict("source already bound".to_string()));
            }
            state.sources.insert(key, task.task_id.clone());
        }
        state.tasks.insert(task.task_id.clone(), task.clone());
        state.items.insert(task.task_id.clone(), items.to_vec());
        state.scopes.insert(task.task_id.clone(), scopes.to_vec());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> StoreResult<Option<CollectionTask>> {
        Ok(self.state.lock().unwrap().tasks.get(task_id).cloned())
    }

    async fn list_tasks(&self) -> StoreResult<Vec<CollectionTask>> {
        Ok(self.state.lock().unwrap().tasks.values().cloned().collect())
    }

    async fn list_items(&self, task_id: &str) -> StoreResult<Vec<CollectionItem>> {
        let mut items = self
            .state
            .lock()
            .unwrap()
            .items
            .get(task_id)
            .cloned()
            .unwrap_or_default();
        items.sort_by(|a, b| a.sort.cmp(&b.sort).then_with(|| a.title.cmp(&b.title)));
        Ok(items)
    }

    async fn list_scopes(&self, task_id: &str) -> StoreResult<Vec<TaskScope>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .scopes
            .get(task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_task_by_source(&self, source: &SourceBinding) -> StoreResult<Option<String>> {
        Ok(self.state.lock().unwrap().sources.get(&source_key(source)).cloned())
    }

    async fn replace_task(&self, edit: &TaskEdit) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let task_id = edit.task.task_id.clone();
        if let Some(previous) = &edit.previous_source {
            state.sources.remove(&source_key(previous));
        }
        if let Some(source) = &edit.task.source {
            let key = source_key(source);
            match state.sources.get(&key) {
                Some(owner) if *owner != task_id => {
                    return Err(StoreError::Conflict("source already bound".to_string()))
                }
                _ => {
                    state.sources.insert(key, task_id.clone());
                }
            }
        }
        let mut items = state.items.remove(&task_id).unwrap_or_default();
        items.retain(|i| !edit.removed_item_ids.contains(&i.item_id));
        for item in &edit.items {
            match items.iter_mut().find(|i| i.item_id == item.item_id) {
                Some(existing) => *existing = item.clone(),
                None => items.push(item.clone()),
            }
        }
        state.items.insert(task_id.clone(), items);
        state.scopes.insert(task_id.clone(), edit.scopes.clone());
        state.tasks.insert(task_id, edit.task.clone());
        Ok(())
    }

    async fn save_task(&self, task: &CollectionTask) -> StoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn soft_delete_task(&self, task: &CollectionTask) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(source) = &task.source {
            state.sources.remove(&source_key(source));
        }
        state.tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn archive_task(&self, task: &CollectionTask) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        for submission in state.submissions.values_mut() {
            if submission.task_id == task.task_id {
                submission.archived_at = task.archived_at;
            }
        }
        state.tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn save_item_template(
        &self,
        task_id: &str,
        item_id: &str,
        template: &ItemTemplate,
    ) -> StoreResult<()> {
        if self.fail_template_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("item table unavailable".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let item = state
            .items
            .get_mut(task_id)
            .and_then(|items| items.iter_mut().find(|i| i.item_id == item_id))
            .ok_or_else(|| StoreError::NotFound(item_id.to_string()))?;
        item.template = Some(template.clone());
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for MemoryDb {
    async fn get_submission(&self, task_id: &str, user_id: &str) -> StoreResult<Option<Submission>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .submissions
            .get(&(task_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn list_submissions(&self, task_id: &str) -> StoreResult<Vec<Submission>> {
        Ok(self.submissions_of(task_id))
    }

    async fn create_submission(&self, submission: &Submission) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let key = (submission.task_id.clone(), submission.user_id.clone());
        if state.submissions.contains_key(&key) {
            return Err(StoreError::Conflict("submission exists".to_string()));
        }
        state.submissions.insert(key, submission.clone());
        Ok(())
    }

    async fn save_submission(&self, submission: &Submission) -> StoreResult<()> {
        let key = (submission.task_id.clone(), submission.user_id.clone());
        self.state.lock().unwrap().submissions.insert(key, submission.clone());
        Ok(())
    }

    async fn list_files(&self, task_id: &str, submission_id: &str) -> StoreResult<Vec<SubmissionFile>> {
        let mut files: Vec<SubmissionFile> = self
            .submission_files(submission_id)
            .into_iter()
            .filter(|f| f.task_id == task_id)
            .collect();
        files.sort_by_key(|f| f.sort);
        Ok(files)
    }

    async fn list_task_files(&self, task_id: &str) -> StoreResult<Vec<SubmissionFile>> {
        let state = self.state.lock().unwrap();
        Ok(state.files.iter().filter(|f| f.task_id == task_id).cloned().collect())
    }

    async fn insert_file(&self, file: &SubmissionFile) -> StoreResult<()> {
        self.state.lock().unwrap().files.push(file.clone());
        Ok(())
    }

    async fn delete_file(&self, file: &SubmissionFile) -> StoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .files
            .retain(|f| f.file_id != file.file_id);
        Ok(())
    }

    async fn withdraw(&self, submission: &Submission, files: &[SubmissionFile]) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let ids: HashSet<&str> = files.iter().map(|f| f.file_id.as_str()).collect();
        state.files.retain(|f| !ids.contains(f.file_id.as_str()));
        let key = (submission.task_id.clone(), submission.user_id.clone());
        state.submissions.insert(key, submission.clone());
        Ok(())
    }

    async fn batch_update(
        &self,
        task_id: &str,
        submission_ids: &[String],
        patch: &SubmissionPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut state = self.state.lock().unwrap();
        let mut updated = 0;
        for submission in state.submissions.values_mut() {
            if submission.task_id == task_id
                && submission_ids.contains(&submission.submission_id)
                && !submission.is_withdrawn()
            {
                patch.apply(submission, now);
                updated += 1;
            }
        }
        Ok(updated)
    }
}

// ---------- directory ----------

#[derive(Default)]
pub struct MemoryUsers {
    profiles: Mutex<HashMap<String, UserProfile>>,
    departments: Mutex<Vec<Department>>,
}

impl MemoryUsers {
    pub fn add_student(&self, user_id: &str, student_no: &str, name: &str, departments: &[&str]) {
        self.profiles.lock().unwrap().insert(
            user_id.to_string(),
            UserProfile {
                user_id: user_id.to_string(),
                student_no: student_no.to_string(),
                user_name: name.to_string(),
                department_ids: departments.iter().map(|d| d.to_string()).collect(),
                ..Default::default()
            },
        );
    }

    pub fn add_department(&self, id: &str, name: &str, parent: Option<&str>) {
        self.departments.lock().unwrap().push(Department {
            department_id: id.to_string(),
            name: name.to_string(),
            parent_id: parent.map(|p| p.to_string()),
        });
    }
}

#[async_trait]
impl UserDirectory for MemoryUsers {
    async fn get_profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
        Ok(self.profiles.lock().unwrap().get(user_id).cloned())
    }

    async fn get_profiles(&self, user_ids: &[String]) -> StoreResult<HashMap<String, UserProfile>> {
        let profiles = self.profiles.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| profiles.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }

    async fn list_departments(&self) -> StoreResult<Vec<Department>> {
        Ok(self.departments.lock().unwrap().clone())
    }
}

// ---------- blobs ----------

pub const URL_SCHEME: &str = "mem://";

#[derive(Default)]
pub struct MemoryBlobs {
    objects: Mutex<HashMap<String, Bytes>>,
    pub fail_uploads: AtomicBool,
}

impl MemoryBlobs {
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn upload_private(
        &self,
        _bucket: &str,
        key: &str,
        bytes: Bytes,
        _content_type: &str,
    ) -> StoreResult<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("storage unavailable".to_string()));
        }
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn remove(&self, _bucket: &str, keys: &[String]) -> StoreResult<()> {
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    async fn create_signed_download_url(
        &self,
        _bucket: &str,
        key: &str,
        _expires_in: Duration,
        _download_name: &str,
    ) -> StoreResult<String> {
        Ok(format!("{}{}", URL_SCHEME, key))
    }

    async fn list(&self, _bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self.keys().into_iter().filter(|k| k.starts_with(prefix)).collect())
    }
}

/// Serves `mem://` URLs out of [`MemoryBlobs`] and counts every attempt.
pub struct MemoryFetcher {
    blobs: Arc<MemoryBlobs>,
    pub attempts: AtomicUsize,
}

#[async_trait]
impl ObjectFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let key = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| format!("unsupported url {}", url))?;
        self.blobs.get(key).ok_or_else(|| "404 not found".to_string())
    }
}

// ---------- access ----------

#[derive(Default)]
pub struct MemoryPerms {
    grants: Mutex<HashSet<(String, String)>>,
}

impl MemoryPerms {
    pub fn grant(&self, user_id: &str, action: &str) {
        self.grants
            .lock()
            .unwrap()
            .insert((user_id.to_string(), format!("{}:{}", MODULE, action)));
    }

    pub fn grant_staff(&self, user_id: &str) {
        for action in STAFF_ACTIONS {
            self.grant(user_id, action);
        }
    }
}

#[async_trait]
impl PermissionOracle for MemoryPerms {
    async fn has_perm(&self, user_id: &str, code: &str) -> StoreResult<bool> {
        Ok(self
            .grants
            .lock()
            .unwrap()
            .contains(&(user_id.to_string(), code.to_string())))
    }
}

#[derive(Default)]
pub struct MemoryVisibility {
    scoped: Mutex<HashMap<String, HashSet<String>>>,
    notice_readers: Mutex<HashSet<(String, String)>>,
}

impl MemoryVisibility {
    pub fn show_task(&self, user_id: &str, task_id: &str) {
        self.scoped
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .insert(task_id.to_string());
    }

    pub fn show_notice(&self, user_id: &str, notice_id: &str) {
        self.notice_readers
            .lock()
            .unwrap()
            .insert((user_id.to_string(), notice_id.to_string()));
    }
}

#[async_trait]
impl VisibilityResolver for MemoryVisibility {
    async fn resolve_visible_task_ids(&self, user_id: &str) -> StoreResult<HashSet<String>> {
        Ok(self.scoped.lock().unwrap().get(user_id).cloned().unwrap_or_default())
    }

    async fn can_view_notice(&self, user_id: &str, notice_id: &str) -> StoreResult<bool> {
        Ok(self
            .notice_readers
            .lock()
            .unwrap()
            .contains(&(user_id.to_string(), notice_id.to_string())))
    }
}

#[derive(Default)]
pub struct MemoryNotices {
    notices: Mutex<HashMap<String, Notice>>,
}

impl MemoryNotices {
    pub fn add(&self, notice_id: &str) {
        self.notices.lock().unwrap().insert(
            notice_id.to_string(),
            Notice {
                notice_id: notice_id.to_string(),
                title: format!("Notice {}", notice_id),
                visible_all: false,
                scope_keys: Vec::new(),
                deleted_at: None,
            },
        );
    }
}

#[async_trait]
impl NoticeDirectory for MemoryNotices {
    async fn get_notice(&self, notice_id: &str) -> StoreResult<Option<Notice>> {
        Ok(self.notices.lock().unwrap().get(notice_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<AuditEvent>>,
    pub fail: AtomicBool,
}

impl MemoryAudit {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn last(&self) -> AuditEvent {
        self.events().pop().expect("no audit events recorded")
    }
}

#[async_trait]
impl AuditSink for MemoryAudit {
    async fn record(&self, event: &AuditEvent) -> StoreResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("audit table unavailable".to_string()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ---------- harness ----------

pub struct Harness {
    pub service: CollectService,
    pub db: Arc<MemoryDb>,
    pub users: Arc<MemoryUsers>,
    pub blobs: Arc<MemoryBlobs>,
    pub fetcher: Arc<MemoryFetcher>,
    pub perms: Arc<MemoryPerms>,
    pub visibility: Arc<MemoryVisibility>,
    pub notices: Arc<MemoryNotices>,
    pub audit: Arc<MemoryAudit>,
}

pub fn test_limits() -> CollectLimits {
    CollectLimits {
        max_upload_bytes: 1024,
        max_template_bytes: 512,
        export_max_bytes: 4096,
        signed_url_ttl_secs: 60,
        fetch_timeout_secs: 5,
    }
}

pub fn harness() -> Harness {
    harness_with_limits(test_limits())
}

pub fn harness_with_limits(limits: CollectLimits) -> Harness {
    let db = Arc::new(MemoryDb::default());
    let users = Arc::new(MemoryUsers::default());
    let blobs = Arc::new(MemoryBlobs::default());
    let fetcher = Arc::new(MemoryFetcher {
        blobs: blobs.clone(),
        attempts: AtomicUsize::new(0),
    });
    let perms = Arc::new(MemoryPerms::default());
    let visibility = Arc::new(MemoryVisibility::default());
    let notices = Arc::new(MemoryNotices::default());
    let audit = Arc::new(MemoryAudit::default());

    let deps = CollectDeps {
        tasks: db.clone(),
        submissions: db.clone(),
        users: users.clone(),
        blobs: blobs.clone(),
        perms: perms.clone(),
        visibility: visibility.clone(),
        notices: notices.clone(),
        audit: audit.clone(),
        fetcher: fetcher.clone(),
    };
    perms.grant_staff(STAFF);

    Harness {
        service: CollectService::new(deps, BUCKET, MODULE, limits),
        db,
        users,
        blobs,
        fetcher,
        perms,
        visibility,
        notices,
        audit,
    }
}

pub fn in_days(days: i64) -> DateTime<Utc> {
    Utc::now() + ChronoDuration::days(days)
}

/// Visible-to-all body with the given `(title, required)` items.
pub fn task_body(title: &str, items: &[(&str, bool)], due_at: Option<DateTime<Utc>>) -> TaskBody {
    let items: Vec<serde_json::Value> = items
        .iter()
        .map(|(title, required)| json!({ "title": title, "required": required }))
        .collect();
    serde_json::from_value(json!({
        "title": title,
        "visibleAll": true,
        "maxFilesPerSubmission": 3,
        "dueAt": due_at,
        "items": items,
    }))
    .expect("valid task body")
}

pub fn upload(name: &str, data: &[u8]) -> UploadedFile {
    UploadedFile {
        file_name: name.to_string(),
        content_type: "application/pdf".to_string(),
        bytes: Bytes::copy_from_slice(data),
    }
}

impl Harness {
    /// Create and publish a task due tomorrow.
    pub async fn published_task(&self, title: &str, items: &[(&str, bool)]) -> TaskDetail {
        let mut detail = self
            .service
            .create_task(STAFF, &task_body(title, items, Some(in_days(1))))
            .await
            .expect("create task");
        detail.task = self
            .service
            .publish_task(STAFF, &detail.task.task_id)
            .await
            .expect("publish task");
        detail
    }

    pub fn actions(&self) -> Vec<String> {
        self.audit.events().into_iter().map(|e| e.action).collect()
    }
}
