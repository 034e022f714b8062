use std::path::Path;
use std::sync::{Arc, Mutex};

use storage::{
    FailPoint, MemoryTransport, Op, RemoteStorage, Storage, StorageError, StorageResult,
};

use super::*;

/// Keeps every log record emitted by the test binary.
struct CaptureLogger;

static RECORDS: Mutex<Vec<(log::Level, String)>> = Mutex::new(Vec::new());
static LOGGER: CaptureLogger = CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let message = record.args().to_string();
        RECORDS
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((record.level(), message));
    }

    fn flush(&self) {}
}

fn capture_logs() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Trace);
}

/// Warnings whose text contains `needle`. Tests run in parallel, so callers
/// pick paths no other test logs about.
fn warnings_about(needle: &str) -> Vec<String> {
    RECORDS
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .filter(|(level, message)| *level == log::Level::Warn && message.contains(needle))
        .map(|(_, message)| message.clone())
        .collect()
}

fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn memory(name: &str) -> Arc<RemoteStorage<MemoryTransport>> {
    Arc::new(RemoteStorage::new(name, MemoryTransport::new()).with_chunk_size(8))
}

/// Counts upload calls on top of a memory endpoint.
struct Recording {
    inner: Arc<RemoteStorage<MemoryTransport>>,
    uploads: Mutex<Vec<String>>,
}

impl Recording {
    fn new(inner: Arc<RemoteStorage<MemoryTransport>>) -> Self {
        Self {
            inner,
            uploads: Mutex::new(Vec::new()),
        }
    }

    fn uploads(&self) -> Vec<String> {
        let mut uploads = self.uploads.lock().unwrap().clone();
        uploads.sort();
        uploads
    }
}

#[async_trait::async_trait]
impl Storage for Recording {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn connect(&self) -> StorageResult<()> {
        self.inner.connect().await
    }

    async fn list_files(&self, root: &str) -> StorageResult<Vec<String>> {
        self.inner.list_files(root).await
    }

    async fn exists(&self, path: &str) -> bool {
        self.inner.exists(path).await
    }

    async fn mkdir(&self, path: &str) -> StorageResult<()> {
        self.inner.mkdir(path).await
    }

    async fn file_size(&self, path: &str) -> StorageResult<u64> {
        self.inner.file_size(path).await
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> StorageResult<()> {
        self.uploads.lock().unwrap().push(remote_path.to_string());
        self.inner.upload_file(local_path, remote_path).await
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> StorageResult<()> {
        self.inner.download_file(remote_path, local_path).await
    }
}

fn options(root: &str) -> SyncOptions {
    SyncOptions {
        source_root: root.to_string(),
        target_root: root.to_string(),
        large_file_threshold: 8,
        ..SyncOptions::default()
    }
}

#[test]
fn diff_keeps_source_order() {
    let source = paths(&["/c", "/a", "/b", "/d"]);
    let target = paths(&["/b", "/x"]);
    assert_eq!(diff(&source, &target), paths(&["/c", "/a", "/d"]));
}

#[test]
fn diff_of_subset_is_empty() {
    let source = paths(&["/a/f1", "/a/f2"]);
    let target = paths(&["/a/f2", "/a/f3", "/a/f1"]);
    assert!(diff(&source, &target).is_empty());
}

#[test]
fn diff_identities() {
    let a = paths(&["/a", "/b"]);
    let empty: Vec<String> = Vec::new();

    assert!(diff(&a, &a).is_empty());
    assert_eq!(diff(&a, &empty), a);
    assert!(diff(&empty, &a).is_empty());
}

#[test]
fn diff_compares_exact_strings() {
    let source = paths(&["/a/F1", "/a/f1/"]);
    let target = paths(&["/a/f1"]);
    assert_eq!(diff(&source, &target), source);
}

#[tokio::test]
async fn classify_splits_on_strict_threshold() {
    let files = paths(&["/small", "/exact", "/large"]);
    let groups = classify_by_size(&files, 10, |path| async move {
        Ok::<u64, StorageError>(match path.as_str() {
            "/small" => 3,
            "/exact" => 10,
            _ => 11,
        })
    })
    .await;

    assert_eq!(groups.small_files, paths(&["/small", "/exact"]));
    assert_eq!(groups.large_files, paths(&["/large"]));
    assert!(groups.unresolved.is_empty());
    assert_eq!(groups.len(), 3);
}

#[tokio::test]
async fn classify_is_idempotent() {
    let files = paths(&["/a", "/b", "/c", "/d"]);
    let oracle = |path: String| async move { Ok::<u64, StorageError>(path.len() as u64 * 5) };

    let first = classify_by_size(&files, 7, oracle).await;
    let second = classify_by_size(&files, 7, oracle).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn classify_skips_files_whose_size_lookup_fails() {
    let source = memory("source");
    source.transport().insert_file("/a/ok", vec![1u8; 20]);
    source.transport().insert_file("/a/broken", vec![1u8; 2]);
    source.transport().fail(FailPoint::Stat("/a/broken".into()));

    let files = paths(&["/a/broken", "/a/ok"]);
    let groups = classify_by_size(&files, 10, |path| {
        let source = source.clone();
        async move { source.file_size(&path).await }
    })
    .await;

    assert_eq!(groups.large_files, paths(&["/a/ok"]));
    assert!(groups.small_files.is_empty());
    assert_eq!(groups.unresolved, paths(&["/a/broken"]));
}

#[tokio::test]
async fn failed_size_lookup_is_logged_as_warning() {
    capture_logs();
    let source = memory("source");
    source.transport().insert_file("/sizes/fine", vec![1u8; 3]);
    source.transport().insert_file("/sizes/unstatable", vec![1u8; 3]);
    source.transport().fail(FailPoint::Stat("/sizes/unstatable".into()));

    let files = paths(&["/sizes/unstatable", "/sizes/fine"]);
    let groups = classify_by_size(&files, 10, |path| {
        let source = source.clone();
        async move { source.file_size(&path).await }
    })
    .await;

    assert_eq!(groups.small_files, paths(&["/sizes/fine"]));
    let warnings = warnings_about("/sizes/unstatable");
    assert_eq!(warnings.len(), 1, "warnings: {:?}", warnings);
    assert!(warnings[0].starts_with("Could not get size for /sizes/unstatable"));
    assert!(warnings_about("/sizes/fine").is_empty());
}

#[tokio::test]
async fn missing_listing_root_is_logged_as_warning() {
    capture_logs();
    let source = memory("source");

    let files = source.list_files("/never/created/root").await.unwrap();

    assert!(files.is_empty());
    let warnings = warnings_about("/never/created/root");
    assert_eq!(warnings.len(), 1, "warnings: {:?}", warnings);
    assert!(warnings[0].contains("treating it as empty"));
}

#[test]
fn target_path_reroots_relative_location() {
    assert_eq!(
        SyncExecutor::target_path("/data/in/x/y.bin", "/data/in", "/backup").as_deref(),
        Some("/backup/x/y.bin")
    );
    assert_eq!(
        SyncExecutor::target_path("/a/f1", "/", "/").as_deref(),
        Some("/a/f1")
    );
    assert_eq!(
        SyncExecutor::target_path("/a/f1", "/a", "/").as_deref(),
        Some("/f1")
    );
    assert_eq!(SyncExecutor::target_path("/other/f1", "/a", "/b"), None);
}

#[tokio::test]
async fn new_files_are_uploaded_once() {
    let source = memory("source");
    for name in ["/a/f1", "/a/f2", "/a/f3"] {
        source.transport().insert_file(name, name.as_bytes().to_vec());
    }
    let target = memory("target");
    target.transport().insert_file("/a/f1", b"/a/f1".to_vec());
    let recording = Arc::new(Recording::new(target.clone()));

    let manager = SyncManager::new(source.clone(), recording.clone(), options("/a"));
    let report = manager.run().await.unwrap();

    assert_eq!(report.plan.diff, paths(&["/a/f2", "/a/f3"]));
    assert_eq!(recording.uploads(), paths(&["/a/f2", "/a/f3"]));
    assert_eq!(report.succeeded(), 2);
    assert!(report.failed().is_empty());
    assert_eq!(target.transport().contents("/a/f3").unwrap(), b"/a/f3");
}

#[tokio::test]
async fn existing_target_files_are_left_alone() {
    let source = memory("source");
    source.transport().insert_file("/a/f1", b"one".to_vec());
    let target = memory("target");
    target.transport().insert_file("/a/f1", b"old".to_vec());
    target.transport().insert_file("/a/f2", b"two".to_vec());
    let recording = Arc::new(Recording::new(target.clone()));

    let manager = SyncManager::new(source, recording.clone(), options("/a"));
    let report = manager.run().await.unwrap();

    assert!(report.plan.diff.is_empty());
    assert!(report.results.is_empty());
    assert!(recording.uploads().is_empty());
    assert_eq!(target.transport().contents("/a/f1").unwrap(), b"old");
    assert_eq!(target.transport().contents("/a/f2").unwrap(), b"two");
}

#[tokio::test]
async fn large_download_reads_three_chunks() {
    const CHUNK: u64 = 10 * 1024 * 1024;
    let data: Vec<u8> = (0..25 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

    let source = Arc::new(
        RemoteStorage::new("source", MemoryTransport::new()).with_chunk_size(CHUNK),
    );
    source.transport().insert_file("/big.bin", data.clone());
    let target = Arc::new(
        RemoteStorage::new("target", MemoryTransport::new()).with_chunk_size(CHUNK),
    );

    let executor = SyncExecutor::new(source.clone(), target.clone());
    assert!(executor.sync_one("/big.bin", "/", "/").await);

    let reads: Vec<(u64, u64)> = source
        .transport()
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            Op::ReadChunk { offset, len, .. } => Some((offset, len)),
            _ => None,
        })
        .collect();
    assert_eq!(reads, vec![(0, CHUNK), (CHUNK, CHUNK), (2 * CHUNK, 5 * 1024 * 1024)]);
    assert_eq!(target.transport().contents("/big.bin").unwrap(), data);
}

#[tokio::test]
async fn one_failure_does_not_stop_the_batch() {
    let source = memory("source");
    for name in ["/a/f1", "/a/f2", "/a/f3"] {
        source.transport().insert_file(name, vec![7u8; 4]);
    }
    source.transport().fail(FailPoint::Read("/a/f2".into()));
    let target = memory("target");

    let executor = SyncExecutor::new(source, target.clone());
    let files = paths(&["/a/f1", "/a/f2", "/a/f3"]);
    let results = executor.sync_many(&files, "/a", "/b").await;

    assert_eq!(results.len(), 3);
    assert!(results["/a/f1"]);
    assert!(!results["/a/f2"]);
    assert!(results["/a/f3"]);
    assert!(target.transport().contents("/b/f1").is_some());
    assert!(target.transport().contents("/b/f2").is_none());
}

#[tokio::test]
async fn file_outside_source_root_fails() {
    let source = memory("source");
    source.transport().insert_file("/elsewhere/f1", vec![1u8; 3]);
    let target = memory("target");

    let executor = SyncExecutor::new(source, target.clone());
    assert!(!executor.sync_one("/elsewhere/f1", "/a", "/b").await);
    assert!(target.transport().ops().is_empty());
}

#[tokio::test]
async fn staging_files_are_removed() {
    let staging = tempfile::tempdir().unwrap();
    let source = memory("source");
    source.transport().insert_file("/a/good", vec![1u8; 30]);
    source.transport().insert_file("/a/bad", vec![1u8; 30]);
    source.transport().fail(FailPoint::Read("/a/bad".into()));
    let target = memory("target");

    let executor = SyncExecutor::new(source, target)
        .with_staging_dir(Some(staging.path().to_path_buf()));
    assert!(executor.sync_one("/a/good", "/a", "/a").await);
    assert!(!executor.sync_one("/a/bad", "/a", "/a").await);

    let left: Vec<_> = std::fs::read_dir(staging.path()).unwrap().collect();
    assert!(left.is_empty(), "staging dir not empty: {:?}", left);
}

#[tokio::test]
async fn concurrent_sync_reports_every_file() {
    let source = memory("source");
    let mut files = Vec::new();
    for i in 0..12 {
        let name = format!("/src/d{}/f{}", i % 3, i);
        source.transport().insert_file(&name, name.as_bytes().to_vec());
        files.push(name);
    }
    let target = memory("target");

    let executor = SyncExecutor::new(source, target.clone());
    let results = executor.sync_concurrent(&files, "/src", "/dst", 4).await;

    assert_eq!(results.len(), files.len());
    assert!(results.values().all(|ok| *ok));
    for name in &files {
        let mapped = SyncExecutor::target_path(name, "/src", "/dst").unwrap();
        assert_eq!(target.transport().contents(&mapped).unwrap(), name.as_bytes());
    }
}

#[tokio::test]
async fn plan_groups_by_threshold() {
    let source = memory("source");
    source.transport().insert_file("/a/small", vec![0u8; 8]);
    source.transport().insert_file("/a/large", vec![0u8; 9]);
    let target = memory("target");

    let manager = SyncManager::new(source, target.clone(), options("/a"));
    let plan = manager.plan().await.unwrap();

    assert_eq!(plan.source_files, 2);
    assert_eq!(plan.target_files, 0);
    assert_eq!(plan.groups.small_files, paths(&["/a/small"]));
    assert_eq!(plan.groups.large_files, paths(&["/a/large"]));
    // planning transfers nothing
    assert!(target.transport().ops().iter().all(|op| matches!(op, Op::Stat(_))));
}

#[tokio::test]
async fn different_roots_compare_relative_paths() {
    let source = memory("source");
    source.transport().insert_file("/in/x/f1", b"1".to_vec());
    source.transport().insert_file("/in/f2", b"2".to_vec());
    let target = memory("target");
    target.transport().insert_file("/out/x/f1", b"1".to_vec());

    let opts = SyncOptions {
        source_root: "/in".into(),
        target_root: "/out".into(),
        ..SyncOptions::default()
    };
    let manager = SyncManager::new(source, target.clone(), opts);
    let report = manager.run().await.unwrap();

    assert_eq!(report.plan.diff, paths(&["/in/f2"]));
    assert_eq!(target.transport().contents("/out/f2").unwrap(), b"2");
}

#[tokio::test]
async fn unreachable_endpoint_is_fatal() {
    let source = memory("source");
    let target = memory("target");
    target.transport().fail(FailPoint::Unreachable);

    let manager = SyncManager::new(source, target, options("/"));
    assert!(manager.run().await.is_err());
}
