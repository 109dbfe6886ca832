//! s3cret-transfer: turns a local file into an encrypted multipart object
//!
//! ```text
//! reader ──chunks──▶ encryptor ──records──▶ assembler ──parts──▶ uploader
//! ```
//!
//! Each arrow is a bounded queue; a single cancellation token stops every
//! stage when any of them fails.

pub mod assembler;
pub mod pipeline;

pub use assembler::{InsufficientData, PartAssembler};
pub use pipeline::{copy, copy_source, copy_to, CopyOutcome, ProgressFn, UploadMethod};
