//! Batching of encrypted records into multipart upload parts
//!
//! Records are serialized into a growing candidate until it reaches the
//! minimum part size. The most recent full candidate is held back one step:
//! whatever is left when the stream ends is always below the minimum, so it
//! is appended to the held candidate instead of becoming its own undersized
//! part. Every part but the last therefore meets the minimum, and the last is
//! never empty.

use bytes::Bytes;
use s3cret_crypto::EncryptedRecord;
use s3cret_storage::UploadPart;
use thiserror::Error;
use tracing::debug;

/// The whole ciphertext stream is smaller than one part may be.
///
/// Carries the stream so the caller can fall back to a single-request upload.
#[derive(Debug, Error)]
#[error("{} bytes of ciphertext is below the {min_part_size}-byte minimum part size", body.len())]
pub struct InsufficientData {
    pub body: Bytes,
    pub min_part_size: usize,
}

#[derive(Debug)]
struct HeldPart {
    part_number: i32,
    body: Vec<u8>,
}

impl HeldPart {
    fn into_part(self) -> UploadPart {
        UploadPart {
            part_number: self.part_number,
            body: Bytes::from(self.body),
        }
    }
}

#[derive(Debug)]
pub struct PartAssembler {
    min_part_size: usize,
    next_part_number: i32,
    candidate: Vec<u8>,
    held: Option<HeldPart>,
    records: u64,
    total_bytes: u64,
}

impl PartAssembler {
    pub fn new(min_part_size: usize) -> Self {
        Self {
            min_part_size,
            next_part_number: 1,
            candidate: Vec::with_capacity(min_part_size),
            held: None,
            records: 0,
            total_bytes: 0,
        }
    }

    /// Append one record. Returns the previously held part once a newer
    /// candidate has replaced it; that part can no longer change.
    pub fn push(&mut self, record: &EncryptedRecord) -> Option<UploadPart> {
        record.write_to(&mut self.candidate);
        self.records += 1;
        self.total_bytes += record.wire_len() as u64;

        if self.candidate.len() < self.min_part_size {
            return None;
        }

        let body = std::mem::replace(&mut self.candidate, Vec::with_capacity(self.min_part_size));
        let part_number = self.next_part_number;
        self.next_part_number += 1;
        debug!(part_number, bytes = body.len(), "part candidate closed");

        self.held
            .replace(HeldPart { part_number, body })
            .map(HeldPart::into_part)
    }

    /// Records pushed so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Serialized bytes pushed so far.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Flush at end of stream.
    ///
    /// Returns the remaining parts (at most one, since a residual is always
    /// undersized and merges into the held part). Fails when no candidate
    /// ever reached the minimum, handing back the complete stream.
    pub fn finish(mut self) -> Result<Vec<UploadPart>, InsufficientData> {
        let residual = std::mem::take(&mut self.candidate);

        match self.held.take() {
            Some(mut held) => {
                if !residual.is_empty() {
                    debug!(
                        part_number = held.part_number,
                        held = held.body.len(),
                        residual = residual.len(),
                        "merging undersized trailing candidate"
                    );
                    held.body.extend_from_slice(&residual);
                }
                Ok(vec![held.into_part()])
            }
            None => Err(InsufficientData {
                body: Bytes::from(residual),
                min_part_size: self.min_part_size,
            }),
        }
    }
}
