//! s3cret-storage: multipart upload lifecycle over a pluggable object store
//!
//! - `store`: the `MultipartStore` seam (create / upload part / complete / abort / put)
//! - `s3`: aws-sdk-s3 backend
//! - `memory`: in-process backend with fault injection (tests, dry runs)
//! - `upload`: `UploadCoordinator`, the session state machine

pub mod memory;
pub mod s3;
pub mod store;
pub mod upload;

pub use memory::MemoryStore;
pub use s3::{build_store, S3Store};
pub use store::{MultipartStore, PartReceipt, StoreError, UploadPart};
pub use upload::{MultipartSession, SessionState, UploadCoordinator};
