//! s3cret-chunks: sequential fixed-size chunking of a local file
//!
//! # Overview
//! - `source`: lazy, non-restartable chunk sequence with an explicit final chunk
//! - BLAKE3 of the plaintext is accumulated as chunks are emitted (content identity)

pub mod source;

pub use source::{hash_to_hex, ChunkSource};
