//! S3-backed object store.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use procapi_core::storage::{ObjectStore, StorageError};

pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the ambient AWS configuration (env, profile, IMDS).
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(S3Client::new(&config), bucket)
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(format!(
                    "write {}: {}",
                    self.location(key),
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None)
            }
            Err(e) => {
                return Err(StorageError::Backend(format!(
                    "read {}: {}",
                    self.location(key),
                    DisplayErrorContext(&e)
                )))
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("read body {}: {e}", self.location(key))))?
            .into_bytes()
            .to_vec();
        Ok(Some(data))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(format!(
                    "delete {}: {}",
                    self.location(key),
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}
