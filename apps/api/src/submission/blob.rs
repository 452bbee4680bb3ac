use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

/// Opaque storage for uploaded documents.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `folder` and returns the locator used to read them back.
    async fn store(&self, bytes: Bytes, folder: &str, extension: &str) -> Result<String>;

    async fn read(&self, locator: &str) -> Result<Bytes>;
}

pub fn object_key(folder: &str, extension: &str) -> String {
    format!("{folder}/{}{extension}", Uuid::new_v4())
}

/// S3 / MinIO-backed blob store.
#[derive(Clone)]
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn store(&self, bytes: Bytes, folder: &str, extension: &str) -> Result<String> {
        let key = object_key(folder, extension);
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| anyhow!("S3 upload failed: {e}"))?;

        info!("Uploaded {size} bytes to s3://{}/{}", self.bucket, key);
        Ok(key)
    }

    async fn read(&self, locator: &str) -> Result<Bytes> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(locator)
            .send()
            .await
            .map_err(|e| anyhow!("S3 download of {locator} failed: {e}"))?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| anyhow!("S3 body read of {locator} failed: {e}"))?;
        Ok(data.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_layout() {
        let key = object_key("resumes", ".pdf");
        let (folder, file) = key.split_once('/').unwrap();
        assert_eq!(folder, "resumes");
        let stem = file.strip_suffix(".pdf").unwrap();
        assert!(Uuid::parse_str(stem).is_ok());
    }
}
