use std::sync::Arc;
use std::time::Duration;

use collect_atoms::storage::{BlobStore, S3BlobStore};
use collect_atoms::submissions::{DynamoSubmissionStore, SubmissionStore};
use collect_atoms::tasks::{DynamoTaskStore, TaskStore};
use collect_atoms::users::{DynamoUserDirectory, UserDirectory};
use collect_shared::{
    AppState, AuditSink, CollectLimits, DynamoAuditSink, DynamoNoticeDirectory,
    DynamoPermissionOracle, DynamoVisibilityResolver, NoticeDirectory, PermissionOracle,
    VisibilityResolver,
};

use crate::export::{HttpObjectFetcher, ObjectFetcher};

/// Every collaborator the engines talk to.
#[derive(Clone)]
pub struct CollectDeps {
    pub tasks: Arc<dyn TaskStore>,
    pub submissions: Arc<dyn SubmissionStore>,
    pub users: Arc<dyn UserDirectory>,
    pub blobs: Arc<dyn BlobStore>,
    pub perms: Arc<dyn PermissionOracle>,
    pub visibility: Arc<dyn VisibilityResolver>,
    pub notices: Arc<dyn NoticeDirectory>,
    pub audit: Arc<dyn AuditSink>,
    pub fetcher: Arc<dyn ObjectFetcher>,
}

/// Entry point of the collection workflow. Lifecycle, portal, review and
/// export operations are implemented across the sibling modules.
#[derive(Clone)]
pub struct CollectService {
    pub(crate) deps: CollectDeps,
    pub(crate) bucket: String,
    pub(crate) module: String,
    pub(crate) limits: CollectLimits,
}

impl CollectService {
    pub fn new(
        deps: CollectDeps,
        bucket: impl Into<String>,
        module: impl Into<String>,
        limits: CollectLimits,
    ) -> Self {
        Self {
            deps,
            bucket: bucket.into(),
            module: module.into(),
            limits,
        }
    }

    /// Wire the DynamoDB/S3 implementations from the Lambda's shared state.
    pub fn from_state(state: &AppState) -> Self {
        let client = state.dynamo_client.clone();
        let table = state.config.table_name.clone();

        let users: Arc<dyn UserDirectory> = Arc::new(DynamoUserDirectory::new(client.clone(), table.clone()));
        let notices: Arc<dyn NoticeDirectory> =
            Arc::new(DynamoNoticeDirectory::new(client.clone(), table.clone()));
        let limits = state.config.limits();

        let deps = CollectDeps {
            tasks: Arc::new(DynamoTaskStore::new(client.clone(), table.clone())),
            submissions: Arc::new(DynamoSubmissionStore::new(client.clone(), table.clone())),
            users: users.clone(),
            blobs: Arc::new(S3BlobStore::new(state.s3_client.clone())),
            perms: Arc::new(DynamoPermissionOracle::new(client.clone(), table.clone())),
            visibility: Arc::new(DynamoVisibilityResolver::new(
                client.clone(),
                table.clone(),
                users,
                notices.clone(),
            )),
            notices,
            audit: Arc::new(DynamoAuditSink::new(client, table)),
            fetcher: Arc::new(HttpObjectFetcher::new(Duration::from_secs(limits.fetch_timeout_secs))),
        };

        Self::new(deps, state.config.bucket_name.clone(), state.config.module.clone(), limits)
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn limits(&self) -> &CollectLimits {
        &self.limits
    }

    pub(crate) fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.limits.signed_url_ttl_secs)
    }
}
