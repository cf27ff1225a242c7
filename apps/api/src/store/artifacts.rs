//! S3 archival of raw uploads and rendered PDFs.
//!
//! Archival is a side channel: callers treat failures as warnings, never as
//! request failures. The store can also be built without a client at all for
//! tests and local runs with no object storage.

use anyhow::Result;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct ArtifactStore {
    s3: Option<S3Client>,
    bucket: String,
}

impl ArtifactStore {
    pub fn new(s3: S3Client, bucket: String) -> Self {
        Self { s3: Some(s3), bucket }
    }

    /// An artifact store that records nothing.
    #[allow(dead_code)]
    pub fn disabled() -> Self {
        Self {
            s3: None,
            bucket: String::new(),
        }
    }

    /// Archives the original upload. Returns the object key, or `None` when
    /// archival is disabled.
    pub async fn put_upload(
        &self,
        id: Uuid,
        file_name: &str,
        media_type: &str,
        bytes: Bytes,
    ) -> Result<Option<String>> {
        let key = format!("uploads/{id}/{file_name}");
        self.put(&key, media_type, bytes).await
    }

    /// Archives a rendered PDF.
    pub async fn put_artifact(&self, id: Uuid, bytes: Bytes) -> Result<Option<String>> {
        let key = format!("artifacts/{id}.pdf");
        self.put(&key, "application/pdf", bytes).await
    }

    async fn put(&self, key: &str, media_type: &str, bytes: Bytes) -> Result<Option<String>> {
        let Some(ref s3) = self.s3 else {
            return Ok(None);
        };
        s3.put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(media_type)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("S3 upload failed: {e}"))?;
        info!("Archived s3://{}/{}", self.bucket, key);
        Ok(Some(key.to_string()))
    }
}
