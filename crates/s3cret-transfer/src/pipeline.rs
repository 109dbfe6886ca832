//! Copy orchestration: file → chunks → records → parts → object
//!
//! Reading, encryption and part assembly each run on their own task, joined
//! by bounded queues so a slow upload backs pressure all the way up to the
//! file reader. Parts are uploaded one at a time on the calling task.
//!
//! Every stage ends in one of two ways: it forwards an item flagged as final
//! (or `Assembled::Finished`) and returns, or it sees the cancellation token,
//! returns `Cancelled`, and drops its queues. A stage that fails cancels the
//! token itself, so one failure stops the whole pipeline within one queue
//! operation. The orchestrator then aborts the multipart session and reports
//! the first failure that was not itself a cancellation.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use s3cret_chunks::{hash_to_hex, ChunkSource};
use s3cret_core::{CopyError, CopyResult, PlaintextChunk, StorageLocator, TransferConfig};
use s3cret_crypto::{new_session_key, seal_chunk, stored_len, EncryptedRecord, SessionKey};
use s3cret_storage::{MultipartSession, MultipartStore, UploadCoordinator, UploadPart};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assembler::{InsufficientData, PartAssembler};

/// Progress callback type (bytes_done, bytes_total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadMethod {
    Multipart { upload_id: String, parts: usize },
    /// The ciphertext was too small for a multipart upload.
    SingleShot,
}

/// Result of a successful copy
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub bucket: String,
    pub key: String,
    pub method: UploadMethod,
    /// Entity tag of the stored object, when the store reports one
    pub e_tag: Option<String>,
    pub plaintext_bytes: u64,
    pub stored_bytes: u64,
    pub chunks: u64,
    /// BLAKE3 of the plaintext, hex
    pub content_hash: String,
    pub session_id: Uuid,
}

/// Output of the assembler stage
#[derive(Debug)]
enum Assembled {
    Part(UploadPart),
    /// The whole stream was below the minimum part size.
    Undersized(Bytes),
    Finished,
}

#[derive(Debug)]
struct ReadSummary {
    bytes: u64,
    chunks: u64,
    content_hash: String,
}

#[derive(Debug, Default)]
struct UploadSummary {
    parts: usize,
    bytes: u64,
    undersized: Option<Bytes>,
}

/// Parse `locator` (`s3://bucket/key`) and copy `local_path` there.
pub async fn copy_to(
    store: Arc<dyn MultipartStore>,
    local_path: &Path,
    locator: &str,
    config: &TransferConfig,
    progress: Option<&ProgressFn>,
) -> CopyResult<CopyOutcome> {
    let locator: StorageLocator = locator.parse()?;
    copy(store, local_path, &locator, config, progress).await
}

/// Encrypt `local_path` under a fresh session key and store it at `locator`.
///
/// Input problems (bad config, unreadable file) are reported before any
/// remote call is made. The key is dropped, and zeroized, when this returns.
pub async fn copy(
    store: Arc<dyn MultipartStore>,
    local_path: &Path,
    locator: &StorageLocator,
    config: &TransferConfig,
    progress: Option<&ProgressFn>,
) -> CopyResult<CopyOutcome> {
    config.validate()?;
    let source = ChunkSource::open(local_path, config.chunk_size).await?;
    let key = Arc::new(new_session_key()?);

    info!(
        path = %local_path.display(),
        dest = %locator,
        session = %key.id(),
        "starting encrypted copy"
    );
    copy_source(store, source, locator, config, key, progress).await
}

/// Run the pipeline over an already opened chunk source with a caller-held key.
pub async fn copy_source<R>(
    store: Arc<dyn MultipartStore>,
    source: ChunkSource<R>,
    locator: &StorageLocator,
    config: &TransferConfig,
    key: Arc<SessionKey>,
    progress: Option<&ProgressFn>,
) -> CopyResult<CopyOutcome>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    config.validate()?;
    let session_id = key.id();
    let total = source
        .size_hint()
        .map(|len| stored_len(len, config.chunk_size))
        .unwrap_or(0);

    let coordinator = UploadCoordinator::new(store);
    let mut session = coordinator.begin(&locator.bucket, &locator.key).await?;

    let cancel = CancellationToken::new();
    let (chunk_tx, chunk_rx) = mpsc::channel(config.chunk_queue_depth);
    let (record_tx, record_rx) = mpsc::channel(config.record_queue_depth);
    let (part_tx, mut part_rx) = mpsc::channel(config.part_queue_depth);

    let reader = spawn_stage(&cancel, read_chunks(source, chunk_tx, cancel.clone()));
    let encryptor = spawn_stage(
        &cancel,
        encrypt_chunks(key, chunk_rx, record_tx, cancel.clone()),
    );
    let assembler = spawn_stage(
        &cancel,
        assemble_parts(config.min_part_size, record_rx, part_tx, cancel.clone()),
    );

    let uploaded = upload_parts(
        &coordinator,
        &mut session,
        &mut part_rx,
        config,
        &cancel,
        progress,
        total,
    )
    .await;
    if uploaded.is_err() {
        cancel.cancel();
    }
    drop(part_rx);

    let read = join_stage("reader", reader).await;
    let encrypted = join_stage("encryptor", encryptor).await;
    let assembled = join_stage("assembler", assembler).await;

    let (read, uploaded) = match (read, encrypted, assembled, uploaded) {
        (Ok(read), Ok(()), Ok(()), Ok(uploaded)) => (read, uploaded),
        (read, encrypted, assembled, uploaded) => {
            let root = [read.err(), encrypted.err(), assembled.err(), uploaded.err()]
                .into_iter()
                .flatten()
                .min_by_key(CopyError::is_cancellation)
                .unwrap_or(CopyError::Cancelled { stage: "pipeline" });
            warn!(
                dest = %locator,
                upload_id = session.upload_id(),
                kind = root.kind(),
                error = %root,
                "copy failed, aborting upload"
            );
            coordinator.abort(&mut session).await;
            return Err(root);
        }
    };

    if let Some(body) = uploaded.undersized {
        // Nothing was uploaded; release the session before anything else.
        coordinator.abort(&mut session).await;
        let stored_bytes = body.len() as u64;

        if !config.single_shot_fallback {
            return Err(CopyError::InsufficientDataForUpload {
                bucket: locator.bucket.clone(),
                key: locator.key.clone(),
                size: stored_bytes,
                min_part_size: config.min_part_size as u64,
            });
        }

        let e_tag = coordinator
            .put_single(&locator.bucket, &locator.key, body)
            .await?;
        if let Some(cb) = progress {
            cb(stored_bytes, total.max(stored_bytes), "uploaded in a single request");
        }
        return Ok(outcome(
            locator,
            UploadMethod::SingleShot,
            e_tag,
            read,
            stored_bytes,
            session_id,
        ));
    }

    let e_tag = match coordinator.complete(&mut session).await {
        Ok(e_tag) => e_tag,
        Err(e) => {
            warn!(dest = %locator, error = %e, "completion failed, aborting upload");
            coordinator.abort(&mut session).await;
            return Err(e);
        }
    };
    if let Some(cb) = progress {
        cb(uploaded.bytes, total.max(uploaded.bytes), "completed");
    }

    Ok(outcome(
        locator,
        UploadMethod::Multipart {
            upload_id: session.upload_id().to_string(),
            parts: uploaded.parts,
        },
        e_tag,
        read,
        uploaded.bytes,
        session_id,
    ))
}

fn outcome(
    locator: &StorageLocator,
    method: UploadMethod,
    e_tag: Option<String>,
    read: ReadSummary,
    stored_bytes: u64,
    session_id: Uuid,
) -> CopyOutcome {
    info!(
        dest = %locator,
        method = ?method,
        hash = %read.content_hash,
        chunks = read.chunks,
        bytes = read.bytes,
        stored_bytes,
        "uploaded"
    );
    CopyOutcome {
        bucket: locator.bucket.clone(),
        key: locator.key.clone(),
        method,
        e_tag,
        plaintext_bytes: read.bytes,
        stored_bytes,
        chunks: read.chunks,
        content_hash: read.content_hash,
        session_id,
    }
}

// ── stages ────────────────────────────────────────────────────────────────────

fn spawn_stage<T, F>(cancel: &CancellationToken, stage: F) -> JoinHandle<CopyResult<T>>
where
    T: Send + 'static,
    F: Future<Output = CopyResult<T>> + Send + 'static,
{
    let cancel = cancel.clone();
    tokio::spawn(async move {
        let result = stage.await;
        if result.is_err() {
            cancel.cancel();
        }
        result
    })
}

async fn join_stage<T>(stage: &'static str, handle: JoinHandle<CopyResult<T>>) -> CopyResult<T> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(CopyError::Cancelled { stage }),
    }
}

async fn send<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    cancel: &CancellationToken,
    stage: &'static str,
) -> CopyResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CopyError::Cancelled { stage }),
        sent = tx.send(item) => sent.map_err(|_| CopyError::Cancelled { stage }),
    }
}

/// A queue that closes before its final item means the upstream stage stopped.
async fn recv<T>(
    rx: &mut mpsc::Receiver<T>,
    cancel: &CancellationToken,
    stage: &'static str,
) -> CopyResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CopyError::Cancelled { stage }),
        item = rx.recv() => item.ok_or(CopyError::Cancelled { stage }),
    }
}

async fn read_chunks<R>(
    mut source: ChunkSource<R>,
    tx: mpsc::Sender<PlaintextChunk>,
    cancel: CancellationToken,
) -> CopyResult<ReadSummary>
where
    R: AsyncRead + Unpin,
{
    let mut chunks = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CopyError::Cancelled { stage: "reader" }),
            next = source.next_chunk() => next?,
        };
        let Some(chunk) = next else { break };

        let is_final = chunk.is_final;
        send(&tx, chunk, &cancel, "reader").await?;
        chunks += 1;
        if is_final {
            break;
        }
    }

    debug!(chunks, bytes = source.bytes_read(), "reader finished");
    Ok(ReadSummary {
        bytes: source.bytes_read(),
        chunks,
        content_hash: source
            .content_hash()
            .map(|h| hash_to_hex(&h))
            .unwrap_or_default(),
    })
}

async fn encrypt_chunks(
    key: Arc<SessionKey>,
    mut rx: mpsc::Receiver<PlaintextChunk>,
    tx: mpsc::Sender<EncryptedRecord>,
    cancel: CancellationToken,
) -> CopyResult<()> {
    loop {
        let chunk = recv(&mut rx, &cancel, "encryptor").await?;
        let record = seal_chunk(&key, &chunk)?;
        let is_final = record.is_final;
        send(&tx, record, &cancel, "encryptor").await?;
        if is_final {
            return Ok(());
        }
    }
}

async fn assemble_parts(
    min_part_size: usize,
    mut rx: mpsc::Receiver<EncryptedRecord>,
    tx: mpsc::Sender<Assembled>,
    cancel: CancellationToken,
) -> CopyResult<()> {
    let mut assembler = PartAssembler::new(min_part_size);
    loop {
        let record = recv(&mut rx, &cancel, "assembler").await?;
        if let Some(part) = assembler.push(&record) {
            send(&tx, Assembled::Part(part), &cancel, "assembler").await?;
        }
        if record.is_final {
            break;
        }
    }

    debug!(
        records = assembler.records(),
        bytes = assembler.total_bytes(),
        "assembler finished"
    );
    match assembler.finish() {
        Ok(parts) => {
            for part in parts {
                send(&tx, Assembled::Part(part), &cancel, "assembler").await?;
            }
        }
        Err(InsufficientData { body, .. }) => {
            send(&tx, Assembled::Undersized(body), &cancel, "assembler").await?;
        }
    }
    send(&tx, Assembled::Finished, &cancel, "assembler").await
}

async fn upload_parts(
    coordinator: &UploadCoordinator,
    session: &mut MultipartSession,
    rx: &mut mpsc::Receiver<Assembled>,
    config: &TransferConfig,
    cancel: &CancellationToken,
    progress: Option<&ProgressFn>,
    total: u64,
) -> CopyResult<UploadSummary> {
    let mut summary = UploadSummary::default();
    loop {
        match recv(rx, cancel, "uploader").await? {
            Assembled::Part(part) => {
                upload_with_retry(coordinator, session, &part, config, cancel).await?;
                summary.parts += 1;
                summary.bytes += part.body.len() as u64;
                if let Some(cb) = progress {
                    cb(
                        summary.bytes,
                        total.max(summary.bytes),
                        &format!("part {}", part.part_number),
                    );
                }
            }
            Assembled::Undersized(body) => summary.undersized = Some(body),
            Assembled::Finished => return Ok(summary),
        }
    }
}

/// Upload one part, retrying transient failures with linear backoff.
async fn upload_with_retry(
    coordinator: &UploadCoordinator,
    session: &mut MultipartSession,
    part: &UploadPart,
    config: &TransferConfig,
    cancel: &CancellationToken,
) -> CopyResult<()> {
    let mut attempt = 0u32;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CopyError::Cancelled { stage: "uploader" }),
            result = coordinator.upload_part(session, part) => result,
        };

        match result {
            Ok(_) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < config.part_retries => {
                attempt += 1;
                let delay = Duration::from_millis(config.retry_backoff_ms * u64::from(attempt));
                warn!(
                    part_number = part.part_number,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "part upload failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CopyError::Cancelled { stage: "uploader" }),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}
