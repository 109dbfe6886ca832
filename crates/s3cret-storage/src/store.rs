//! Object store seam used by the upload coordinator

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// A failed store call. `retryable` is set for network failures, timeouts,
/// throttling and server-side errors; never for auth or validation failures.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
    pub retryable: bool,
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// One numbered part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    pub part_number: i32,
    pub body: Bytes,
}

/// Proof that a part was stored; echoed back on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReceipt {
    pub part_number: i32,
    pub e_tag: String,
}

/// The storage operations a copy needs. Implementations must be safe to
/// share across tasks; the coordinator calls them one at a time.
#[async_trait]
pub trait MultipartStore: Send + Sync {
    /// Start a multipart upload, returning its upload id.
    async fn create_upload(&self, bucket: &str, key: &str) -> Result<String, StoreError>;

    /// Store one part, returning its entity tag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StoreError>;

    /// Combine the listed parts (ascending part number) into the object.
    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartReceipt],
    ) -> Result<Option<String>, StoreError>;

    /// Discard an in-progress upload and its stored parts.
    async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str)
        -> Result<(), StoreError>;

    /// Non-multipart upload of a whole object.
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes)
        -> Result<Option<String>, StoreError>;
}
