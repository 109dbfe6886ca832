//! Multipart upload session lifecycle
//!
//! ```text
//! Created ──upload_part──▶ Uploading ──complete──▶ Completed
//!    │                         │
//!    └────────abort────────────┴──────abort──────▶ Aborted
//! ```
//!
//! The session is only ever mutated here. Completion requires every issued
//! part to hold a receipt, so a copy with a failed part can never be marked
//! complete even if the caller forgets to abort.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use s3cret_core::{CopyError, CopyResult};
use tracing::{debug, info, warn};

use crate::store::{MultipartStore, PartReceipt, UploadPart};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Uploading,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

#[derive(Debug)]
pub struct MultipartSession {
    bucket: String,
    key: String,
    upload_id: String,
    state: SessionState,
    receipts: Vec<PartReceipt>,
    outstanding: BTreeSet<i32>,
}

impl MultipartSession {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Receipts of successfully uploaded parts, in upload order.
    pub fn receipts(&self) -> &[PartReceipt] {
        &self.receipts
    }
}

pub struct UploadCoordinator {
    store: Arc<dyn MultipartStore>,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn MultipartStore>) -> Self {
        Self { store }
    }

    pub async fn begin(&self, bucket: &str, key: &str) -> CopyResult<MultipartSession> {
        let upload_id = self
            .store
            .create_upload(bucket, key)
            .await
            .map_err(|e| CopyError::UploadInit {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.message,
            })?;

        info!(bucket, key, upload_id = %upload_id, "created multipart upload");

        Ok(MultipartSession {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            state: SessionState::Created,
            receipts: Vec::new(),
            outstanding: BTreeSet::new(),
        })
    }

    /// Upload one part. A failed part stays outstanding until a later call
    /// for the same part number succeeds.
    pub async fn upload_part(
        &self,
        session: &mut MultipartSession,
        part: &UploadPart,
    ) -> CopyResult<PartReceipt> {
        let part_error = |session: &MultipartSession, reason: String, retryable: bool| {
            CopyError::PartUpload {
                bucket: session.bucket.clone(),
                key: session.key.clone(),
                part_number: part.part_number,
                reason,
                retryable,
            }
        };

        if session.state.is_terminal() {
            return Err(part_error(
                session,
                format!("session is {:?}", session.state),
                false,
            ));
        }

        session.state = SessionState::Uploading;
        session.outstanding.insert(part.part_number);

        debug!(
            part_number = part.part_number,
            bytes = part.body.len(),
            "uploading part"
        );

        let e_tag = self
            .store
            .upload_part(
                &session.bucket,
                &session.key,
                &session.upload_id,
                part.part_number,
                part.body.clone(),
            )
            .await
            .map_err(|e| part_error(session, e.message, e.retryable))?;

        let receipt = PartReceipt {
            part_number: part.part_number,
            e_tag,
        };
        session.outstanding.remove(&part.part_number);
        session
            .receipts
            .retain(|r| r.part_number != receipt.part_number);
        session.receipts.push(receipt.clone());

        debug!(part_number = part.part_number, e_tag = %receipt.e_tag, "uploaded part");
        Ok(receipt)
    }

    /// Complete the upload with every receipt collected so far.
    pub async fn complete(&self, session: &mut MultipartSession) -> CopyResult<Option<String>> {
        let refuse = |session: &MultipartSession, reason: String| CopyError::Completion {
            bucket: session.bucket.clone(),
            key: session.key.clone(),
            upload_id: session.upload_id.clone(),
            reason,
        };

        if session.state.is_terminal() {
            return Err(refuse(session, format!("session is {:?}", session.state)));
        }
        if let Some(part_number) = session.outstanding.iter().next() {
            return Err(refuse(
                session,
                format!("part {part_number} has not been uploaded successfully"),
            ));
        }
        if session.receipts.is_empty() {
            return Err(refuse(session, "no parts uploaded".into()));
        }

        let mut manifest = session.receipts.clone();
        manifest.sort_by_key(|r| r.part_number);
        debug!(parts = ?manifest, "multipart manifest");

        let e_tag = self
            .store
            .complete_upload(&session.bucket, &session.key, &session.upload_id, &manifest)
            .await
            .map_err(|e| refuse(session, e.message))?;

        session.state = SessionState::Completed;
        info!(
            bucket = %session.bucket,
            key = %session.key,
            upload_id = %session.upload_id,
            parts = manifest.len(),
            "completed multipart upload"
        );
        Ok(e_tag)
    }

    /// Best-effort cleanup. A failed abort is logged, not returned; the
    /// bucket's stale-upload lifecycle rule is the fallback.
    pub async fn abort(&self, session: &mut MultipartSession) {
        if session.state.is_terminal() {
            return;
        }
        session.state = SessionState::Aborted;

        match self
            .store
            .abort_upload(&session.bucket, &session.key, &session.upload_id)
            .await
        {
            Ok(()) => info!(
                bucket = %session.bucket,
                key = %session.key,
                upload_id = %session.upload_id,
                "aborted multipart upload"
            ),
            Err(e) => warn!(
                bucket = %session.bucket,
                key = %session.key,
                upload_id = %session.upload_id,
                error = %e,
                "error aborting multipart upload"
            ),
        }
    }

    /// Non-multipart upload of a whole object.
    pub async fn put_single(&self, bucket: &str, key: &str, body: Bytes) -> CopyResult<Option<String>> {
        let bytes = body.len();
        let e_tag = self
            .store
            .put_object(bucket, key, body)
            .await
            .map_err(|e| CopyError::SingleShotUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.message,
            })?;
        info!(bucket, key, bytes, "uploaded object in a single request");
        Ok(e_tag)
    }
}
