//! Common test utilities for Driftbox integration tests.
//!
//! This module provides shared fixtures for the upload pipeline tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};

use driftbox_core::client::{LocalTransport, TaskProgress, UploadTransport};
use driftbox_core::merge::MergeEngine;
use driftbox_core::protocol::{ChunkUpload, MergeRequest, MergeResponse};
use driftbox_core::receiver::ChunkReceiver;
use driftbox_core::session::SessionRegistry;
use driftbox_core::storage::ChunkStore;
use driftbox_core::{Error, Result};

/// Base port for tests, incremented for each test to avoid conflicts.
static TEST_PORT_COUNTER: AtomicU16 = AtomicU16::new(52700);

/// Get a unique port for a test server.
pub fn next_test_port() -> u16 {
    TEST_PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1.len(), content2.len(), "File sizes differ");
    assert!(content1 == content2, "File contents differ");
}

/// Receiver, merge engine and chunk store wired over one temp directory.
pub struct Pipeline {
    /// Keeps the directory alive
    pub temp: tempfile::TempDir,
    /// Chunk store under `<files>/.chunks`
    pub store: ChunkStore,
    /// Session registry shared by receiver and engine
    pub registry: Arc<SessionRegistry>,
    /// Chunk receiver
    pub receiver: ChunkReceiver,
    /// Merge engine publishing into `files/`
    pub engine: MergeEngine,
}

impl Pipeline {
    /// Build a fresh pipeline.
    pub fn new() -> Self {
        let temp = create_temp_dir();
        let files = temp.path().join("files");
        let store = ChunkStore::under(&files);
        let registry = Arc::new(SessionRegistry::new());
        let receiver = ChunkReceiver::new(store.clone(), Arc::clone(&registry));
        let engine = MergeEngine::new(store.clone(), Arc::clone(&registry), files);
        Self {
            temp,
            store,
            registry,
            receiver,
            engine,
        }
    }

    /// Directory receiving published files.
    pub fn files_dir(&self) -> PathBuf {
        self.engine.upload_dir().to_path_buf()
    }

    /// In-process transport over this pipeline.
    pub fn transport(&self) -> LocalTransport {
        LocalTransport::new(self.receiver.clone(), self.engine.clone())
    }

    /// Store `data` as chunks of `chunk_size` bytes and return the chunk count.
    pub async fn upload_all(&self, upload_id: &str, name: &str, data: &[u8], chunk_size: usize) -> u64 {
        let total = data.chunks(chunk_size).count() as u64;
        for (index, chunk) in data.chunks(chunk_size).enumerate() {
            self.receiver
                .receive(ChunkUpload {
                    upload_id: upload_id.to_string(),
                    file_name: name.to_string(),
                    index: index as u64,
                    total_chunks: Some(total),
                    payload: bytes::Bytes::copy_from_slice(chunk),
                })
                .await
                .expect("chunk upload");
        }
        total
    }

    /// Files visible in the publish directory, excluding the chunk store.
    pub fn visible_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.files_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n != driftbox_core::storage::CHUNK_DIR_NAME)
            .collect();
        names.sort();
        names
    }
}

/// Transport wrapper that holds every chunk until the test releases a permit.
///
/// Records the order chunks were dispatched in and the peak number of
/// chunks in flight. Clones share the same gate and counters.
pub struct GatedTransport<T> {
    shared: Arc<Gate<T>>,
}

struct Gate<T> {
    inner: T,
    permits: Semaphore,
    dispatched: Mutex<Vec<u64>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    merges: AtomicUsize,
    fail_index: Option<u64>,
}

impl<T> Clone for GatedTransport<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: UploadTransport> GatedTransport<T> {
    /// Wrap `inner` with a closed gate.
    pub fn new(inner: T) -> Self {
        Self::build(inner, None)
    }

    /// Wrap `inner` with a closed gate; chunk `index` fails once it passes.
    pub fn failing_at(inner: T, index: u64) -> Self {
        Self::build(inner, Some(index))
    }

    fn build(inner: T, fail_index: Option<u64>) -> Self {
        Self {
            shared: Arc::new(Gate {
                inner,
                permits: Semaphore::new(0),
                dispatched: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                merges: AtomicUsize::new(0),
                fail_index,
            }),
        }
    }

    /// Let `n` more chunks through.
    pub fn release(&self, n: usize) {
        self.shared.permits.add_permits(n);
    }

    /// Chunk indices in dispatch order.
    pub fn dispatched(&self) -> Vec<u64> {
        self.shared.dispatched.lock().unwrap().clone()
    }

    /// Most chunks ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.shared.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Number of merge calls issued.
    pub fn merges(&self) -> usize {
        self.shared.merges.load(Ordering::SeqCst)
    }
}

impl<T: UploadTransport> UploadTransport for GatedTransport<T> {
    async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<()> {
        let gate = &self.shared;
        gate.dispatched.lock().unwrap().push(chunk.index);
        let now = gate.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        gate.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        gate.permits.acquire().await.expect("gate closed").forget();

        let result = if gate.fail_index == Some(chunk.index) {
            Err(Error::ChunkUploadFailed {
                index: chunk.index,
                reason: "connection reset by peer".into(),
            })
        } else {
            gate.inner.upload_chunk(chunk).await
        };

        gate.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn complete(&self, request: MergeRequest) -> Result<MergeResponse> {
        self.shared.merges.fetch_add(1, Ordering::SeqCst);
        self.shared.inner.complete(request).await
    }
}

/// Wait until a progress snapshot satisfies `pred`, failing the test after 10s.
pub async fn wait_for_progress(
    rx: &mut watch::Receiver<TaskProgress>,
    pred: impl FnMut(&TaskProgress) -> bool,
) -> TaskProgress {
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(pred))
        .await
        .expect("timed out waiting for progress")
        .expect("progress channel closed")
        .clone()
}

/// Give spawned tasks a chance to run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
}
