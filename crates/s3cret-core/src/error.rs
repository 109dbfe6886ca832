use std::path::PathBuf;

use thiserror::Error;

pub type CopyResult<T> = Result<T, CopyError>;

/// Every failure a copy can surface. Remote errors carry bucket/key so a
/// single diagnostic line is enough to locate the upload.
#[derive(Debug, Error)]
pub enum CopyError {
    // ── input ────────────────────────────────────────────────────────────────
    #[error("invalid storage locator '{locator}': {reason}")]
    InvalidLocator {
        locator: String,
        reason: &'static str,
    },

    #[error("unable to open {}: {source}", path.display())]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    // ── transient I/O ────────────────────────────────────────────────────────
    #[error("error reading chunk {index}: {source}")]
    ChunkRead {
        index: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("uploading part {part_number} of s3://{bucket}/{key}: {reason}")]
    PartUpload {
        bucket: String,
        key: String,
        part_number: i32,
        reason: String,
        retryable: bool,
    },

    // ── protocol ─────────────────────────────────────────────────────────────
    #[error(
        "s3://{bucket}/{key}: {size} bytes of ciphertext is below the \
         {min_part_size}-byte minimum part size"
    )]
    InsufficientDataForUpload {
        bucket: String,
        key: String,
        size: u64,
        min_part_size: u64,
    },

    #[error("creating multipart upload for s3://{bucket}/{key}: {reason}")]
    UploadInit {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("completing multipart upload {upload_id} for s3://{bucket}/{key}: {reason}")]
    Completion {
        bucket: String,
        key: String,
        upload_id: String,
        reason: String,
    },

    #[error("single-shot upload to s3://{bucket}/{key}: {reason}")]
    SingleShotUpload {
        bucket: String,
        key: String,
        reason: String,
    },

    // ── crypto ───────────────────────────────────────────────────────────────
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("encrypting chunk {index}: {reason}")]
    Encryption { index: u64, reason: String },

    // ── pipeline ─────────────────────────────────────────────────────────────
    #[error("{stage} stage cancelled")]
    Cancelled { stage: &'static str },
}

impl CopyError {
    /// Stable short name of the error kind, used in diagnostics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CopyError::InvalidLocator { .. } => "invalid_locator",
            CopyError::FileUnreadable { .. } => "file_unreadable",
            CopyError::Config(_) => "config",
            CopyError::ChunkRead { .. } => "chunk_read",
            CopyError::PartUpload { .. } => "part_upload",
            CopyError::InsufficientDataForUpload { .. } => "insufficient_data_for_upload",
            CopyError::UploadInit { .. } => "upload_init",
            CopyError::Completion { .. } => "completion",
            CopyError::SingleShotUpload { .. } => "single_shot_upload",
            CopyError::EntropyUnavailable(_) => "entropy_unavailable",
            CopyError::Encryption { .. } => "encryption",
            CopyError::Cancelled { .. } => "cancelled",
        }
    }

    /// Only part uploads that failed on the network or with a server-side
    /// error are worth another attempt. Crypto and input errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CopyError::PartUpload { retryable: true, .. })
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, CopyError::Cancelled { .. })
    }
}
