//! Per-chunk XChaCha20-Poly1305 records and their wire format
//!
//! Wire record format (binary, integers little-endian):
//! ```text
//! non-final: [8 bytes: index][24 bytes: nonce][chunk_size + 16 bytes: ciphertext||tag]
//! final:     [8 bytes: index | 1<<63][24 bytes: nonce][8 bytes: plaintext len L][L + 16 bytes: ciphertext||tag]
//! ```
//!
//! Records carry no associated data. Position is enforced on decode instead:
//! indices must run 0,1,2,… and exactly one final record must close the
//! stream, so reordering, truncation, or appending records is rejected.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use s3cret_core::{CopyError, PlaintextChunk};
use thiserror::Error;

use crate::keys::SessionKey;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Set on the index field of the last record in a stream.
pub const FINAL_FLAG: u64 = 1 << 63;

/// Index + nonce
pub const HEADER_SIZE: usize = 8 + NONCE_SIZE;

/// Explicit plaintext length carried by the final record
pub const LENGTH_FIELD_SIZE: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record {index} truncated: needs {needed} bytes, {available} available")]
    Truncated {
        index: u64,
        needed: usize,
        available: usize,
    },

    #[error("expected record {expected}, found {found}")]
    IndexMismatch { expected: u64, found: u64 },

    #[error("record {index} declares {len} plaintext bytes, more than the {chunk_size}-byte chunk size")]
    LengthOutOfRange {
        index: u64,
        len: u64,
        chunk_size: usize,
    },

    #[error("record {index} failed authentication: wrong key or corrupted data")]
    Authentication { index: u64 },

    #[error("{0} trailing bytes after the final record")]
    TrailingBytes(usize),

    #[error("stream ended without a final record")]
    MissingFinal,
}

/// One sealed chunk. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRecord {
    pub index: u64,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub is_final: bool,
}

impl EncryptedRecord {
    /// Length of the plaintext this record decrypts to.
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }

    /// Number of bytes `write_to` appends.
    pub fn wire_len(&self) -> usize {
        let length_field = if self.is_final { LENGTH_FIELD_SIZE } else { 0 };
        HEADER_SIZE + length_field + self.ciphertext.len()
    }

    /// Append the wire encoding of this record to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let index = if self.is_final {
            self.index | FINAL_FLAG
        } else {
            self.index
        };
        out.reserve(self.wire_len());
        out.extend_from_slice(&index.to_le_bytes());
        out.extend_from_slice(&self.nonce);
        if self.is_final {
            out.extend_from_slice(&(self.plaintext_len() as u64).to_le_bytes());
        }
        out.extend_from_slice(&self.ciphertext);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        self.write_to(&mut out);
        out
    }
}

/// Seal one chunk under `key` with a fresh random nonce.
pub fn seal_chunk(key: &SessionKey, chunk: &PlaintextChunk) -> Result<EncryptedRecord, CopyError> {
    debug_assert!(chunk.index & FINAL_FLAG == 0, "chunk index overflows wire format");

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| CopyError::Encryption {
            index: chunk.index,
            reason: format!("nonce generation failed: {e}"),
        })?;

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), chunk.payload.as_slice())
        .map_err(|e| CopyError::Encryption {
            index: chunk.index,
            reason: e.to_string(),
        })?;

    tracing::trace!(index = chunk.index, len = chunk.len(), "sealed chunk");

    Ok(EncryptedRecord {
        index: chunk.index,
        nonce,
        ciphertext,
        is_final: chunk.is_final,
    })
}

/// Authenticate and decrypt a single record.
pub fn open_record(key: &SessionKey, record: &EncryptedRecord) -> Result<Vec<u8>, RecordError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(XNonce::from_slice(&record.nonce), record.ciphertext.as_slice())
        .map_err(|_| RecordError::Authentication {
            index: record.index,
        })
}

/// Sequential decoder over a concatenation of wire records.
///
/// Yields records in order and stops after the first error.
pub struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
    chunk_size: usize,
    next_index: u64,
    seen_final: bool,
    done: bool,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8], chunk_size: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk_size,
            next_index: 0,
            seen_final: false,
            done: false,
        }
    }

    fn parse_next(&mut self) -> Result<Option<EncryptedRecord>, RecordError> {
        let rest = &self.data[self.pos..];
        if self.seen_final {
            return match rest.len() {
                0 => Ok(None),
                n => Err(RecordError::TrailingBytes(n)),
            };
        }
        if rest.is_empty() {
            return Err(RecordError::MissingFinal);
        }

        let expected = self.next_index;
        let truncated = |needed: usize| RecordError::Truncated {
            index: expected,
            needed,
            available: rest.len(),
        };

        if rest.len() < HEADER_SIZE {
            return Err(truncated(HEADER_SIZE));
        }
        let raw_index = read_u64(&rest[..8]);
        let is_final = raw_index & FINAL_FLAG != 0;
        let index = raw_index & !FINAL_FLAG;
        if index != expected {
            return Err(RecordError::IndexMismatch {
                expected,
                found: index,
            });
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&rest[8..HEADER_SIZE]);

        let (body_start, plaintext_len) = if is_final {
            let body_start = HEADER_SIZE + LENGTH_FIELD_SIZE;
            if rest.len() < body_start {
                return Err(truncated(body_start));
            }
            let len = read_u64(&rest[HEADER_SIZE..body_start]);
            if len > self.chunk_size as u64 {
                return Err(RecordError::LengthOutOfRange {
                    index,
                    len,
                    chunk_size: self.chunk_size,
                });
            }
            (body_start, len as usize)
        } else {
            (HEADER_SIZE, self.chunk_size)
        };

        let end = body_start + plaintext_len + TAG_SIZE;
        if rest.len() < end {
            return Err(truncated(end));
        }

        let record = EncryptedRecord {
            index,
            nonce,
            ciphertext: rest[body_start..end].to_vec(),
            is_final,
        };
        self.pos += end;
        self.next_index += 1;
        self.seen_final = is_final;
        Ok(Some(record))
    }
}

impl Iterator for RecordReader<'_> {
    type Item = Result<EncryptedRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.parse_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Exact stored size of a `plaintext_len`-byte object sealed in
/// `chunk_size` chunks. An empty object still produces one final record.
pub fn stored_len(plaintext_len: u64, chunk_size: usize) -> u64 {
    let chunks = plaintext_len.div_ceil(chunk_size.max(1) as u64).max(1);
    plaintext_len + chunks * (HEADER_SIZE + TAG_SIZE) as u64 + LENGTH_FIELD_SIZE as u64
}

/// Decode and decrypt a complete stored object back to its plaintext.
pub fn decrypt_object(
    key: &SessionKey,
    data: &[u8],
    chunk_size: usize,
) -> Result<Vec<u8>, RecordError> {
    let mut plaintext = Vec::with_capacity(data.len());
    for record in RecordReader::new(data, chunk_size) {
        plaintext.extend_from_slice(&open_record(key, &record?)?);
    }
    Ok(plaintext)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
