//! End-to-end tests of the copy pipeline against the in-memory store.
//!
//! Small chunk and part sizes keep the interesting geometry cheap: with
//! 64-byte chunks a full record is 112 bytes and a 1000-byte minimum closes
//! a part every nine records.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use s3cret_chunks::ChunkSource;
use s3cret_core::{CopyError, CopyResult, StorageLocator, TransferConfig};
use s3cret_crypto::{decrypt_object, new_session_key, stored_len, SessionKey};
use s3cret_storage::MemoryStore;
use s3cret_transfer::{copy, copy_source, copy_to, CopyOutcome, ProgressFn, UploadMethod};
use tempfile::TempDir;
use tokio::io::{AsyncRead, ReadBuf};

const CHUNK: usize = 64;
const MIN_PART: usize = 1000;

fn small_config() -> TransferConfig {
    TransferConfig {
        chunk_size: CHUNK,
        min_part_size: MIN_PART,
        chunk_queue_depth: 4,
        record_queue_depth: 4,
        part_queue_depth: 1,
        retry_backoff_ms: 1,
        ..Default::default()
    }
}

fn locator() -> StorageLocator {
    "s3://vault/backups/data.bin".parse().unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn write_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write test file");
    path
}

/// Copy with a key the test keeps, so the stored object can be decrypted.
async fn copy_keeping_key(
    store: &Arc<MemoryStore>,
    path: &Path,
    config: &TransferConfig,
) -> (CopyResult<CopyOutcome>, Arc<SessionKey>) {
    let key = Arc::new(new_session_key().unwrap());
    let source = ChunkSource::open(path, config.chunk_size).await.unwrap();
    let result = copy_source(store.clone(), source, &locator(), config, key.clone(), None).await;
    (result, key)
}

fn stored_plaintext(store: &MemoryStore, key: &SessionKey, chunk_size: usize) -> Vec<u8> {
    let loc = locator();
    let object = store.object(&loc.bucket, &loc.key).expect("object stored");
    decrypt_object(key, &object, chunk_size).expect("stored object decrypts")
}

fn assert_nothing_stored(store: &MemoryStore) {
    let loc = locator();
    assert!(store.object(&loc.bucket, &loc.key).is_none());
    assert!(store.completed_uploads().is_empty());
    assert_eq!(store.open_uploads(), 0);
}

/// Yields `remaining` bytes, then fails every read.
struct FailingReader {
    remaining: usize,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.remaining == 0 {
            return Poll::Ready(Err(io::Error::other("disk gone")));
        }
        let n = self.remaining.min(buf.remaining());
        buf.put_slice(&vec![7u8; n]);
        self.remaining -= n;
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn multipart_copy_decrypts_to_original() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::with_min_part_size(MIN_PART));
    let data = pattern(27 * CHUNK);
    let src = write_test_file(tmp.path(), "three-parts.bin", &data);

    let (result, key) = copy_keeping_key(&store, &src, &small_config()).await;
    let outcome = result.expect("copy should succeed");

    assert!(matches!(outcome.method, UploadMethod::Multipart { parts: 3, .. }));
    assert_eq!(outcome.bucket, "vault");
    assert_eq!(outcome.key, "backups/data.bin");
    assert_eq!(outcome.plaintext_bytes, data.len() as u64);
    assert_eq!(outcome.chunks, 27);
    assert_eq!(outcome.stored_bytes, 1008 + 1008 + 1016);
    assert_eq!(outcome.stored_bytes, stored_len(data.len() as u64, CHUNK));
    assert_eq!(outcome.content_hash.len(), 64);
    assert_eq!(outcome.session_id, key.id());
    assert!(outcome.e_tag.is_some());

    assert_eq!(store.part_calls(), vec![1, 2, 3]);
    assert_eq!(store.completed_uploads().len(), 1);
    assert!(store.aborted_uploads().is_empty());
    assert_eq!(stored_plaintext(&store, &key, CHUNK), data);
}

#[tokio::test]
async fn trailing_residual_is_merged_not_uploaded_alone() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::with_min_part_size(MIN_PART));
    // 18 full records close two parts; the 19th is a 5-byte residual
    let data = pattern(18 * CHUNK + 5);
    let src = write_test_file(tmp.path(), "residual.bin", &data);

    let (result, key) = copy_keeping_key(&store, &src, &small_config()).await;
    let outcome = result.unwrap();

    assert!(matches!(outcome.method, UploadMethod::Multipart { parts: 2, .. }));
    assert_eq!(store.part_calls(), vec![1, 2]);
    assert_eq!(stored_plaintext(&store, &key, CHUNK), data);
}

#[tokio::test]
async fn larger_file_roundtrips_with_store_enforcing_minimum() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::with_min_part_size(MIN_PART));
    let data = pattern(50_000);
    let src = write_test_file(tmp.path(), "large.bin", &data);

    let (result, key) = copy_keeping_key(&store, &src, &small_config()).await;
    let outcome = result.unwrap();

    let UploadMethod::Multipart { parts, .. } = outcome.method else {
        panic!("expected multipart upload, got {:?}", outcome.method);
    };
    let calls = store.part_calls();
    assert_eq!(calls, (1..=parts as i32).collect::<Vec<_>>());
    assert_eq!(stored_plaintext(&store, &key, CHUNK), data);
}

#[tokio::test]
async fn permanent_part_failure_aborts_and_never_completes() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::with_min_part_size(MIN_PART));
    store.fail_part(2, u32::MAX, false);
    let src = write_test_file(tmp.path(), "three-parts.bin", &pattern(27 * CHUNK));

    let (result, _key) = copy_keeping_key(&store, &src, &small_config()).await;
    let err = result.unwrap_err();

    assert!(
        matches!(
            err,
            CopyError::PartUpload {
                part_number: 2,
                retryable: false,
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert_eq!(store.part_calls(), vec![1, 2]);
    assert_eq!(store.aborted_uploads().len(), 1);
    assert_nothing_stored(&store);
}

#[tokio::test]
async fn transient_part_failure_is_retried() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::with_min_part_size(MIN_PART));
    store.fail_part(2, 2, true);
    let data = pattern(27 * CHUNK);
    let src = write_test_file(tmp.path(), "flaky.bin", &data);

    let config = TransferConfig {
        part_retries: 2,
        ..small_config()
    };
    let (result, key) = copy_keeping_key(&store, &src, &config).await;
    result.expect("retries should absorb two transient failures");

    assert_eq!(store.part_calls(), vec![1, 2, 2, 2, 3]);
    assert!(store.aborted_uploads().is_empty());
    assert_eq!(stored_plaintext(&store, &key, CHUNK), data);
}

#[tokio::test]
async fn exhausted_retries_abort_upload() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::with_min_part_size(MIN_PART));
    store.fail_part(1, 10, true);
    let src = write_test_file(tmp.path(), "down.bin", &pattern(27 * CHUNK));

    let config = TransferConfig {
        part_retries: 1,
        ..small_config()
    };
    let (result, _key) = copy_keeping_key(&store, &src, &config).await;
    let err = result.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.kind(), "part_upload");
    assert_eq!(store.part_calls(), vec![1, 1]);
    assert_eq!(store.aborted_uploads().len(), 1);
    assert_nothing_stored(&store);
}

#[tokio::test]
async fn small_file_falls_back_to_single_request() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let data = pattern(100);
    let src = write_test_file(tmp.path(), "small.txt", &data);

    let (result, key) = copy_keeping_key(&store, &src, &TransferConfig::default()).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.method, UploadMethod::SingleShot);
    assert_eq!(outcome.stored_bytes, 100 + 48 + 8);
    assert_eq!(store.put_calls(), 1);
    assert!(store.part_calls().is_empty());
    // the multipart session opened up front is released
    assert_eq!(store.aborted_uploads().len(), 1);
    assert!(store.completed_uploads().is_empty());
    assert_eq!(stored_plaintext(&store, &key, 16384), data);
}

#[tokio::test]
async fn single_chunk_without_fallback_is_insufficient() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let src = write_test_file(tmp.path(), "one-chunk.bin", &pattern(16384));

    let config = TransferConfig {
        single_shot_fallback: false,
        ..Default::default()
    };
    let (result, _key) = copy_keeping_key(&store, &src, &config).await;
    let err = result.unwrap_err();

    match err {
        CopyError::InsufficientDataForUpload {
            size,
            min_part_size,
            ..
        } => {
            assert_eq!(size, 16440);
            assert_eq!(min_part_size, 5_243_000);
        }
        other => panic!("expected InsufficientDataForUpload, got {other}"),
    }
    assert_eq!(store.put_calls(), 0);
    assert!(store.part_calls().is_empty());
    assert_eq!(store.aborted_uploads().len(), 1);
    assert_nothing_stored(&store);
}

#[tokio::test]
async fn empty_file_is_stored_as_one_final_record() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let src = write_test_file(tmp.path(), "empty", b"");

    let (result, key) = copy_keeping_key(&store, &src, &TransferConfig::default()).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.chunks, 1);
    assert_eq!(outcome.plaintext_bytes, 0);
    assert_eq!(outcome.stored_bytes, 56);
    assert!(stored_plaintext(&store, &key, 16384).is_empty());
}

#[tokio::test]
async fn missing_file_fails_before_any_remote_call() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    let err = copy(
        store.clone(),
        &tmp.path().join("nope.bin"),
        &locator(),
        &TransferConfig::default(),
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CopyError::FileUnreadable { .. }));
    assert!(store.aborted_uploads().is_empty());
    assert_eq!(store.open_uploads(), 0);
    assert!(store.part_calls().is_empty());
}

#[tokio::test]
async fn invalid_locator_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let src = write_test_file(tmp.path(), "a.txt", b"abc");

    let err = copy_to(store.clone(), &src, "vault/no-scheme", &TransferConfig::default(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, CopyError::InvalidLocator { .. }));
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn copy_to_parses_locator_and_uploads() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::with_min_part_size(MIN_PART));
    let src = write_test_file(tmp.path(), "a.bin", &pattern(5000));

    let outcome = copy_to(store.clone(), &src, "S3://vault/backups/data.bin", &small_config(), None)
        .await
        .unwrap();

    assert_eq!(outcome.bucket, "vault");
    assert!(store.object("vault", "backups/data.bin").is_some());
}

#[tokio::test]
async fn zero_chunk_size_is_a_config_error() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let src = write_test_file(tmp.path(), "a.txt", b"abc");

    let config = TransferConfig {
        chunk_size: 0,
        ..Default::default()
    };
    let err = copy(store.clone(), &src, &locator(), &config, None)
        .await
        .unwrap_err();

    assert!(matches!(err, CopyError::Config(_)));
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn create_failure_is_upload_init() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.fail_create();
    let src = write_test_file(tmp.path(), "a.txt", b"abc");

    let err = copy(store.clone(), &src, &locator(), &TransferConfig::default(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, CopyError::UploadInit { .. }));
    assert!(store.aborted_uploads().is_empty());
}

#[tokio::test]
async fn completion_failure_aborts_upload() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::with_min_part_size(MIN_PART));
    store.fail_complete();
    let src = write_test_file(tmp.path(), "a.bin", &pattern(27 * CHUNK));

    let (result, _key) = copy_keeping_key(&store, &src, &small_config()).await;
    let err = result.unwrap_err();

    assert!(matches!(err, CopyError::Completion { .. }));
    assert_eq!(store.part_calls(), vec![1, 2, 3]);
    assert_eq!(store.aborted_uploads().len(), 1);
    assert_nothing_stored(&store);
}

#[tokio::test]
async fn read_failure_cancels_pipeline_and_aborts() {
    let store = Arc::new(MemoryStore::with_min_part_size(MIN_PART));
    let key = Arc::new(new_session_key().unwrap());
    let source = ChunkSource::new(FailingReader { remaining: 20 * CHUNK }, CHUNK);

    let err = copy_source(store.clone(), source, &locator(), &small_config(), key, None)
        .await
        .unwrap_err();

    assert!(
        matches!(err, CopyError::ChunkRead { .. }),
        "root cause should be the read error, got {err}"
    );
    assert_eq!(store.aborted_uploads().len(), 1);
    assert_nothing_stored(&store);
}

#[tokio::test]
async fn progress_reports_every_part() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::with_min_part_size(MIN_PART));
    let src = write_test_file(tmp.path(), "p.bin", &pattern(27 * CHUNK));

    let calls: Arc<Mutex<Vec<(u64, u64)>>> = Arc::default();
    let seen = calls.clone();
    let progress: ProgressFn = Box::new(move |done, total, _msg| {
        seen.lock().unwrap().push((done, total));
    });

    let outcome = copy(store.clone(), &src, &locator(), &small_config(), Some(&progress))
        .await
        .unwrap();

    let calls = calls.lock().unwrap();
    // one per part plus the completion report
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0], (1008, outcome.stored_bytes));
    assert!(calls.windows(2).all(|w| w[0].0 <= w[1].0));
    assert_eq!(
        calls.last().copied(),
        Some((outcome.stored_bytes, outcome.stored_bytes))
    );
}
