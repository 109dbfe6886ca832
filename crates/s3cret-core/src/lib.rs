pub mod config;
pub mod error;
pub mod types;

pub use config::{LogConfig, S3cretConfig, StorageConfig, TransferConfig};
pub use error::{CopyError, CopyResult};
pub use types::{PlaintextChunk, StorageLocator};
