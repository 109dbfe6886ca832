//! Fixed-size chunk source
//!
//! Reads a file block by block, refilling short OS reads until a block is
//! full or EOF is hit. One block of lookahead decides whether the current
//! block is the last one, so the final chunk is flagged explicitly and keeps
//! its true length (a file whose size is an exact multiple of the chunk size
//! does not end in an empty chunk).

use std::path::Path;

use s3cret_core::{CopyError, PlaintextChunk};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reading,
    Finished,
    Failed,
}

/// Lazy sequence of [`PlaintextChunk`]s over any async reader.
pub struct ChunkSource<R> {
    reader: R,
    chunk_size: usize,
    next_index: u64,
    lookahead: Option<Vec<u8>>,
    hasher: blake3::Hasher,
    bytes_read: u64,
    size_hint: Option<u64>,
    state: State,
}

impl ChunkSource<tokio::fs::File> {
    /// Open `path` for chunking. Fails with `FileUnreadable` before any data is read.
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self, CopyError> {
        let unreadable = |source| CopyError::FileUnreadable {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(unreadable)?;
        let meta = file.metadata().await.map_err(unreadable)?;
        if meta.is_dir() {
            return Err(unreadable(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "is a directory",
            )));
        }

        let mut source = Self::new(file, chunk_size);
        source.size_hint = Some(meta.len());
        Ok(source)
    }
}

impl<R: AsyncRead + Unpin> ChunkSource<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            reader,
            chunk_size,
            next_index: 0,
            lookahead: None,
            hasher: blake3::Hasher::new(),
            bytes_read: 0,
            size_hint: None,
            state: State::Reading,
        }
    }

    /// Next chunk, or `None` once the final chunk has been returned.
    ///
    /// A read error surfaces as `ChunkRead` carrying the index of the block
    /// being read; that block is not emitted and the sequence ends.
    pub async fn next_chunk(&mut self) -> Result<Option<PlaintextChunk>, CopyError> {
        if self.state != State::Reading {
            return Ok(None);
        }

        let index = self.next_index;
        let current = match self.lookahead.take() {
            Some(block) => block,
            None => self.read_block(index).await?,
        };

        let is_final = if current.len() < self.chunk_size {
            true
        } else {
            let next = self.read_block(index + 1).await?;
            if next.is_empty() {
                true
            } else {
                self.lookahead = Some(next);
                false
            }
        };

        self.hasher.update(&current);
        self.bytes_read += current.len() as u64;
        self.next_index += 1;
        if is_final {
            self.state = State::Finished;
        }

        trace!(index, len = current.len(), is_final, "read chunk");

        Ok(Some(PlaintextChunk {
            index,
            payload: current,
            is_final,
        }))
    }

    /// Plaintext bytes emitted so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// File length at open time, when known.
    pub fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }

    /// BLAKE3 of everything emitted, available once the final chunk was returned.
    pub fn content_hash(&self) -> Option<blake3::Hash> {
        (self.state == State::Finished).then(|| self.hasher.finalize())
    }

    async fn read_block(&mut self, index: u64) -> Result<Vec<u8>, CopyError> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    self.state = State::Failed;
                    self.lookahead = None;
                    return Err(CopyError::ChunkRead { index, source });
                }
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// Format a hash as lowercase hex string (64 chars)
pub fn hash_to_hex(hash: &blake3::Hash) -> String {
    hash.to_hex().to_string()
}
