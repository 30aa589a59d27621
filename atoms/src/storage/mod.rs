//! Storage Gateway: private object storage for templates and submissions.

pub mod keys;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::StoreResult;

pub use keys::{submission_object_key, template_object_key};
pub use s3::S3BlobStore;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload_private(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> StoreResult<()>;

    async fn remove(&self, bucket: &str, keys: &[String]) -> StoreResult<()>;

    /// Short-lived GET URL that downloads as `download_name`.
    async fn create_signed_download_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        download_name: &str,
    ) -> StoreResult<String>;

    /// Object names under `prefix`.
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>>;
}
