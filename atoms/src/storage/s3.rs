use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::time::Duration;

use super::BlobStore;
use crate::error::{StoreError, StoreResult};

/// DeleteObjects accepts at most this many keys per request.
const DELETE_BATCH_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct S3BlobStore {
    client: S3Client,
}

impl S3BlobStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload_private(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> StoreResult<()> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("S3 put_object failed for {}: {:?}", key, e);
                StoreError::backend("S3 put_object", e.into_service_error())
            })?;
        tracing::info!("Uploaded s3://{}/{} ({} bytes)", bucket, key, size);
        Ok(())
    }

    async fn remove(&self, bucket: &str, keys: &[String]) -> StoreResult<()> {
        for chunk in keys.chunks(DELETE_BATCH_LIMIT) {
            let objects = chunk
                .iter()
                .map(|k| ObjectIdentifier::builder().key(k).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::backend("build ObjectIdentifier", e))?;
            if objects.is_empty() {
                continue;
            }
            let delete_payload = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| StoreError::backend("build S3 delete payload", e))?;

            let result = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete_payload)
                .send()
                .await
                .map_err(|e| StoreError::backend("S3 delete_objects", e.into_service_error()))?;

            if let Some(failed) = result.errors().first() {
                return Err(StoreError::Backend(format!(
                    "S3 delete_objects could not delete {}: {}",
                    failed.key().unwrap_or_default(),
                    failed.message().unwrap_or_default()
                )));
            }
        }
        Ok(())
    }

    async fn create_signed_download_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        download_name: &str,
    ) -> StoreResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StoreError::backend("S3 presigning config", e))?;
        let disposition = format!(
            "attachment; filename*=UTF-8''{}",
            urlencoding::encode(download_name)
        );
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .response_content_disposition(disposition)
            .presigned(presigning)
            .await
            .map_err(|e| StoreError::backend("S3 presign get_object", e.into_service_error()))?;
        Ok(request.uri().to_string())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        let mut names = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = continuation.as_ref() {
                req = req.continuation_token(token);
            }
            let resp = req.send().await.map_err(|e| {
                tracing::error!("S3 list_objects_v2 failed for prefix {}: {:?}", prefix, e);
                StoreError::backend("S3 list_objects_v2", e.into_service_error())
            })?;

            names.extend(resp.contents().iter().filter_map(|o| o.key()).map(|k| k.to_string()));

            if resp.is_truncated().unwrap_or(false) {
                continuation = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }
        Ok(names)
    }
}
