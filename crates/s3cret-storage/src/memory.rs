//! In-process `MultipartStore`
//!
//! Follows the multipart protocol closely enough to catch batching bugs:
//! completion rejects unknown parts, mismatched entity tags, unsorted part
//! lists and undersized non-final parts. Faults can be injected per call so
//! the coordinator's abort and retry paths can be exercised without a network.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use s3cret_core::config::DEFAULT_MIN_PART_SIZE;

use crate::store::{MultipartStore, PartReceipt, StoreError};

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, (Bytes, String)>,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    remaining: u32,
    retryable: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_upload: u64,
    uploads: HashMap<String, PendingUpload>,
    objects: HashMap<(String, String), Bytes>,
    aborted: Vec<String>,
    completed: Vec<String>,
    part_calls: Vec<i32>,
    put_calls: usize,
    part_faults: HashMap<i32, Fault>,
    fail_create: bool,
    fail_complete: bool,
    fail_abort: bool,
}

#[derive(Debug)]
pub struct MemoryStore {
    min_part_size: usize,
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_min_part_size(DEFAULT_MIN_PART_SIZE)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that enforces `min_part_size` on every part but the last at completion.
    pub fn with_min_part_size(min_part_size: usize) -> Self {
        Self {
            min_part_size,
            inner: Mutex::new(Inner::default()),
        }
    }

    // ── fault injection ───────────────────────────────────────────────────────

    /// Fail the next `times` uploads of `part_number`.
    pub fn fail_part(&self, part_number: i32, times: u32, retryable: bool) {
        self.inner.lock().part_faults.insert(
            part_number,
            Fault {
                remaining: times,
                retryable,
            },
        );
    }

    pub fn fail_create(&self) {
        self.inner.lock().fail_create = true;
    }

    pub fn fail_complete(&self) {
        self.inner.lock().fail_complete = true;
    }

    pub fn fail_abort(&self) {
        self.inner.lock().fail_abort = true;
    }

    // ── inspection ────────────────────────────────────────────────────────────

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.inner
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Upload ids that received an abort call, in call order.
    pub fn aborted_uploads(&self) -> Vec<String> {
        self.inner.lock().aborted.clone()
    }

    pub fn completed_uploads(&self) -> Vec<String> {
        self.inner.lock().completed.clone()
    }

    /// Part numbers passed to `upload_part`, in call order (including failures).
    pub fn part_calls(&self) -> Vec<i32> {
        self.inner.lock().part_calls.clone()
    }

    /// Sizes of the parts currently stored for an in-progress upload.
    pub fn part_sizes(&self, upload_id: &str) -> Vec<(i32, usize)> {
        self.inner
            .lock()
            .uploads
            .get(upload_id)
            .map(|u| u.parts.iter().map(|(n, (b, _))| (*n, b.len())).collect())
            .unwrap_or_default()
    }

    pub fn open_uploads(&self) -> usize {
        self.inner.lock().uploads.len()
    }

    pub fn put_calls(&self) -> usize {
        self.inner.lock().put_calls
    }
}

fn e_tag_for(upload_id: &str, part_number: i32, body: &[u8]) -> String {
    format!("\"{upload_id}-{part_number}-{}\"", body.len())
}

#[async_trait]
impl MultipartStore for MemoryStore {
    async fn create_upload(&self, bucket: &str, key: &str) -> Result<String, StoreError> {
        let mut inner = self.inner.lock();
        if inner.fail_create {
            return Err(StoreError::permanent("AccessDenied: create refused"));
        }
        inner.next_upload += 1;
        let upload_id = format!("mem-upload-{}", inner.next_upload);
        inner.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock();
        inner.part_calls.push(part_number);

        if let Some(fault) = inner.part_faults.get_mut(&part_number) {
            if fault.remaining > 0 {
                fault.remaining -= 1;
                let retryable = fault.retryable;
                return Err(StoreError {
                    message: format!("injected failure on part {part_number}"),
                    retryable,
                });
            }
        }

        let upload = inner
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| StoreError::permanent(format!("NoSuchUpload: {upload_id}")))?;
        if !(1..=10_000).contains(&part_number) {
            return Err(StoreError::permanent(format!(
                "InvalidArgument: part number {part_number}"
            )));
        }

        let e_tag = e_tag_for(upload_id, part_number, &body);
        upload.parts.insert(part_number, (body, e_tag.clone()));
        Ok(e_tag)
    }

    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartReceipt],
    ) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock();
        if inner.fail_complete {
            return Err(StoreError::transient("InternalError: complete failed"));
        }
        let upload = inner
            .uploads
            .get(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| StoreError::permanent(format!("NoSuchUpload: {upload_id}")))?;

        if parts.is_empty() {
            return Err(StoreError::permanent("MalformedXML: no parts listed"));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(StoreError::permanent("InvalidPartOrder"));
        }

        let mut object = BytesMut::new();
        for (i, receipt) in parts.iter().enumerate() {
            let (body, e_tag) = upload
                .parts
                .get(&receipt.part_number)
                .ok_or_else(|| StoreError::permanent(format!("InvalidPart: {}", receipt.part_number)))?;
            if *e_tag != receipt.e_tag {
                return Err(StoreError::permanent(format!(
                    "InvalidPart: ETag mismatch on part {}",
                    receipt.part_number
                )));
            }
            let is_last = i + 1 == parts.len();
            if !is_last && body.len() < self.min_part_size {
                return Err(StoreError::permanent(format!(
                    "EntityTooSmall: part {} is {} bytes",
                    receipt.part_number,
                    body.len()
                )));
            }
            object.extend_from_slice(body);
        }

        let e_tag = format!("\"{upload_id}-{}\"", parts.len());
        inner.uploads.remove(upload_id);
        inner
            .objects
            .insert((bucket.to_string(), key.to_string()), object.freeze());
        inner.completed.push(upload_id.to_string());
        Ok(Some(e_tag))
    }

    async fn abort_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.aborted.push(upload_id.to_string());
        if inner.fail_abort {
            return Err(StoreError::transient("ServiceUnavailable: abort failed"));
        }
        inner.uploads.remove(upload_id);
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock();
        inner.put_calls += 1;
        let e_tag = format!("\"put-{}\"", body.len());
        inner
            .objects
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(Some(e_tag))
    }
}
