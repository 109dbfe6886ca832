use serde::{Deserialize, Serialize};

use crate::error::CopyError;

/// Plaintext bytes per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 16384;

/// Smallest body the storage service accepts for a non-final multipart part.
pub const DEFAULT_MIN_PART_SIZE: usize = 5_243_000;

/// Top-level configuration (loaded from s3cret.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3cretConfig {
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Custom S3-compatible endpoint (default: AWS)
    pub endpoint: Option<String>,
    /// Region override (default: resolved by the AWS provider chain)
    pub region: Option<String>,
    /// Path-style addressing, needed by MinIO/SeaweedFS
    pub force_path_style: bool,
    /// Refuse plaintext HTTP endpoints instead of warning
    pub enforce_tls: bool,
    /// Total attempts per request, including the first (SDK standard retry mode)
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Plaintext bytes per encrypted record
    pub chunk_size: usize,
    /// Minimum body size of every part but the last
    pub min_part_size: usize,
    /// Capacity of the reader → encryptor queue (chunks)
    pub chunk_queue_depth: usize,
    /// Capacity of the encryptor → assembler queue (records)
    pub record_queue_depth: usize,
    /// Capacity of the assembler → uploader queue (parts)
    pub part_queue_depth: usize,
    /// Extra attempts for a part upload that failed with a retryable error
    pub part_retries: u32,
    /// Backoff before retry N is N × this many milliseconds
    pub retry_backoff_ms: u64,
    /// Upload undersized files with a single PUT instead of failing
    pub single_shot_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: None,
            force_path_style: false,
            enforce_tls: false,
            max_attempts: 5,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_part_size: DEFAULT_MIN_PART_SIZE,
            chunk_queue_depth: 64,
            record_queue_depth: 64,
            part_queue_depth: 2,
            part_retries: 2,
            retry_backoff_ms: 500,
            single_shot_fallback: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), CopyError> {
        let checks = [
            (self.chunk_size, "transfer.chunk_size"),
            (self.min_part_size, "transfer.min_part_size"),
            (self.chunk_queue_depth, "transfer.chunk_queue_depth"),
            (self.record_queue_depth, "transfer.record_queue_depth"),
            (self.part_queue_depth, "transfer.part_queue_depth"),
        ];
        for (value, name) in checks {
            if value == 0 {
                return Err(CopyError::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}
