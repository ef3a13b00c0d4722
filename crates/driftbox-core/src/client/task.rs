//! Upload task controller.
//!
//! Drives one source through a sliding window of at most `concurrency`
//! chunk uploads. Indices are claimed in strictly increasing order under the
//! task lock; completions may arrive in any order. Pause and cancel are
//! flags checked before each claim, so requests already in flight run to
//! completion. Results that land after a cancel are dropped.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::policy::UploadPolicy;
use super::source::UploadSource;
use super::speed::{Speed, SpeedMeter};
use super::transport::UploadTransport;
use crate::error::{Error, Result};
use crate::protocol::{ChunkUpload, MergeRequest};

/// Default period of the throughput sampler.
pub const DEFAULT_SPEED_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle state of an upload task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Not started, or cancelled
    #[default]
    Idle,
    /// Dispatching chunks
    Uploading,
    /// No new dispatches until resumed
    Paused,
    /// Merged and published on the server
    Completed,
    /// A chunk or the merge failed
    Error,
}

impl UploadStatus {
    /// Whether no further transitions can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Uploading => "uploading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot published to observers after every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    /// Current state
    pub status: UploadStatus,
    /// Whether the task was cancelled
    pub cancelled: bool,
    /// Chunks acknowledged by the server
    pub completed_chunks: u64,
    /// Chunks in the plan
    pub total_chunks: u64,
    /// Whole-number percentage of acknowledged chunks
    pub percentage: u8,
    /// Speed indicator
    pub speed: Speed,
}

impl TaskProgress {
    fn percentage(completed: u64, total: u64) -> u8 {
        if total == 0 {
            return if completed == 0 { 0 } else { 100 };
        }
        let pct = (completed as f64 / total as f64 * 100.0).round();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let pct = pct.clamp(0.0, 100.0) as u8;
        pct
    }
}

#[derive(Debug, Clone)]
enum Failure {
    Chunk { index: u64, reason: String },
    Merge(String),
}

impl From<&Failure> for Error {
    fn from(failure: &Failure) -> Self {
        match failure {
            Failure::Chunk { index, reason } => Self::ChunkUploadFailed {
                index: *index,
                reason: reason.clone(),
            },
            Failure::Merge(reason) => Self::MergeFailed(reason.clone()),
        }
    }
}

#[derive(Debug)]
struct TaskState {
    status: UploadStatus,
    started: bool,
    paused: bool,
    cancelled: bool,
    /// Next index to dispatch
    current_chunk: u64,
    completed_chunks: u64,
    active: usize,
    merge_started: bool,
    speed: Speed,
    meter: SpeedMeter,
    speed_interval: Duration,
    ticker: Option<JoinHandle<()>>,
    failure: Option<Failure>,
}

impl TaskState {
    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

struct Shared<S, T> {
    source: Arc<S>,
    transport: Arc<T>,
    policy: UploadPolicy,
    upload_id: String,
    file_size: u64,
    total_chunks: u64,
    state: Mutex<TaskState>,
    progress_tx: watch::Sender<TaskProgress>,
}

/// One file's upload, from chunk plan to published file.
///
/// Cloning the handle shares the same task.
pub struct UploadTask<S, T> {
    shared: Arc<Shared<S, T>>,
}

impl<S, T> Clone for UploadTask<S, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, T> fmt::Debug for UploadTask<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTask")
            .field("upload_id", &self.shared.upload_id)
            .field("policy", &self.shared.policy)
            .field("total_chunks", &self.shared.total_chunks)
            .finish_non_exhaustive()
    }
}

impl<S: UploadSource, T: UploadTransport> UploadTask<S, T> {
    /// Plan an upload of `source` with a fresh upload id.
    pub fn new(source: S, transport: T, policy: UploadPolicy) -> Self {
        Self::from_parts(Arc::new(source), Arc::new(transport), policy, DEFAULT_SPEED_INTERVAL)
    }

    /// Change how often the throughput sampler runs.
    ///
    /// Keeps the upload id and existing subscribers. Takes effect the next
    /// time the sampler starts, on `start()` or `resume()`.
    #[must_use]
    pub fn with_speed_interval(self, interval: Duration) -> Self {
        self.shared.lock().speed_interval = interval;
        self
    }

    fn from_parts(
        source: Arc<S>,
        transport: Arc<T>,
        policy: UploadPolicy,
        speed_interval: Duration,
    ) -> Self {
        let file_size = source.size();
        let total_chunks = policy.total_chunks(file_size);
        let (progress_tx, _) = watch::channel(TaskProgress {
            status: UploadStatus::Idle,
            cancelled: false,
            completed_chunks: 0,
            total_chunks,
            percentage: 0,
            speed: Speed::Idle,
        });

        Self {
            shared: Arc::new(Shared {
                source,
                transport,
                policy,
                upload_id: uuid::Uuid::new_v4().to_string(),
                file_size,
                total_chunks,
                state: Mutex::new(TaskState {
                    status: UploadStatus::Idle,
                    started: false,
                    paused: false,
                    cancelled: false,
                    current_chunk: 0,
                    completed_chunks: 0,
                    active: 0,
                    merge_started: false,
                    speed: Speed::Idle,
                    meter: SpeedMeter::new(Instant::now()),
                    speed_interval,
                    ticker: None,
                    failure: None,
                }),
                progress_tx,
            }),
        }
    }

    /// A new task for the same source and transport, with a new upload id.
    ///
    /// This is how a failed or cancelled upload is retried: from scratch.
    #[must_use]
    pub fn restart(&self) -> Self {
        let shared = &self.shared;
        let speed_interval = shared.lock().speed_interval;
        Self::from_parts(
            Arc::clone(&shared.source),
            Arc::clone(&shared.transport),
            shared.policy,
            speed_interval,
        )
    }

    /// Upload id shared with the server session.
    pub fn upload_id(&self) -> &str {
        &self.shared.upload_id
    }

    /// Policy this task was planned with.
    pub fn policy(&self) -> UploadPolicy {
        self.shared.policy
    }

    /// Number of chunks in the plan.
    pub fn total_chunks(&self) -> u64 {
        self.shared.total_chunks
    }

    /// Current status.
    pub fn status(&self) -> UploadStatus {
        self.shared.lock().status
    }

    /// Next chunk index to be dispatched.
    pub fn current_chunk(&self) -> u64 {
        self.shared.lock().current_chunk
    }

    /// Chunks acknowledged so far.
    pub fn completed_chunks(&self) -> u64 {
        self.shared.lock().completed_chunks
    }

    /// Chunks currently in flight.
    pub fn active_requests(&self) -> usize {
        self.shared.lock().active
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> TaskProgress {
        self.shared.progress_tx.borrow().clone()
    }

    /// Watch progress snapshots as they are published.
    pub fn subscribe(&self) -> watch::Receiver<TaskProgress> {
        self.shared.progress_tx.subscribe()
    }

    /// Begin dispatching chunks. Valid once, from `idle`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        {
            let mut state = shared.lock();
            if state.started || state.cancelled || state.status != UploadStatus::Idle {
                return Err(invalid("start", &state));
            }
            state.started = true;
            state.paused = false;
            state.status = UploadStatus::Uploading;
            state.meter.reset(Instant::now());
            Shared::spawn_ticker(shared, &mut state);
            shared.publish(&state);
        }

        tracing::info!(
            upload_id = %shared.upload_id,
            file = shared.source.name(),
            bytes = shared.file_size,
            chunks = shared.total_chunks,
            chunk_size = shared.policy.chunk_size,
            concurrency = shared.policy.concurrency,
            "Starting upload"
        );

        if shared.total_chunks == 0 {
            Shared::begin_merge(shared);
        } else {
            Shared::pump(shared);
        }
        Ok(())
    }

    /// Stop dispatching new chunks. In-flight chunks still complete.
    pub fn pause(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.status != UploadStatus::Uploading {
            return Err(invalid("pause", &state));
        }
        state.paused = true;
        state.status = UploadStatus::Paused;
        state.stop_ticker();
        state.speed = Speed::Paused;
        self.shared.publish(&state);
        tracing::debug!(upload_id = %self.shared.upload_id, "Upload paused");
        Ok(())
    }

    /// Continue from the next undispatched chunk. Valid only from `paused`.
    pub fn resume(&self) -> Result<()> {
        {
            let mut state = self.shared.lock();
            if state.status != UploadStatus::Paused {
                return Err(invalid("resume", &state));
            }
            state.paused = false;
            state.status = UploadStatus::Uploading;
            if state.merge_started {
                state.speed = Speed::Done;
            } else {
                state.meter.rebase(Instant::now());
                Shared::spawn_ticker(&self.shared, &mut state);
            }
            self.shared.publish(&state);
        }
        tracing::debug!(upload_id = %self.shared.upload_id, "Upload resumed");
        Shared::pump(&self.shared);
        Ok(())
    }

    /// Abandon the upload.
    ///
    /// In-flight requests are not aborted but their results are ignored, and
    /// no merge is requested afterwards. The server is not notified; the
    /// chunks already stored stay there until swept.
    pub fn cancel(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.status.is_terminal() || state.cancelled {
            return Err(invalid("cancel", &state));
        }
        state.cancelled = true;
        state.status = UploadStatus::Idle;
        state.stop_ticker();
        self.shared.publish(&state);
        tracing::info!(
            upload_id = %self.shared.upload_id,
            completed = state.completed_chunks,
            total = self.shared.total_chunks,
            "Upload cancelled"
        );
        Ok(())
    }

    /// Wait for the task to finish.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if the task was cancelled, or the chunk/merge
    /// failure that moved it to `error`.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.subscribe();
        loop {
            let progress = rx.borrow_and_update().clone();
            match progress.status {
                UploadStatus::Completed => return Ok(()),
                UploadStatus::Error => {
                    let state = self.shared.lock();
                    return Err(state
                        .failure
                        .as_ref()
                        .map_or_else(|| Error::Internal("upload failed".into()), Error::from));
                }
                _ if progress.cancelled => return Err(Error::Cancelled),
                _ => {}
            }
            rx.changed()
                .await
                .map_err(|_| Error::Internal("progress channel closed".into()))?;
        }
    }
}

fn invalid(operation: &'static str, state: &TaskState) -> Error {
    let state = if state.cancelled && !state.status.is_terminal() {
        "cancelled".to_string()
    } else {
        state.status.to_string()
    };
    Error::InvalidState { operation, state }
}

impl<S, T> Shared<S, T> {
    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &TaskState) {
        self.progress_tx.send_replace(TaskProgress {
            status: state.status,
            cancelled: state.cancelled,
            completed_chunks: state.completed_chunks,
            total_chunks: self.total_chunks,
            percentage: TaskProgress::percentage(state.completed_chunks, self.total_chunks),
            speed: state.speed,
        });
    }
}

impl<S: UploadSource, T: UploadTransport> Shared<S, T> {
    /// Claim and dispatch chunks until the window is full.
    fn pump(shared: &Arc<Self>) {
        let mut claimed = Vec::new();
        {
            let mut state = shared.lock();
            while state.status == UploadStatus::Uploading
                && !state.paused
                && !state.cancelled
                && state.active < shared.policy.concurrency
                && state.current_chunk < shared.total_chunks
            {
                claimed.push(state.current_chunk);
                state.current_chunk += 1;
                state.active += 1;
            }
        }

        for index in claimed {
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                let result = shared.send_chunk(index).await;
                Self::on_chunk_done(&shared, index, result);
            });
        }
    }

    async fn send_chunk(&self, index: u64) -> Result<u64> {
        let (offset, len) = self.policy.chunk_range(index, self.file_size);
        let payload = self.source.read_range(offset, len).await?;

        self.transport
            .upload_chunk(ChunkUpload {
                upload_id: self.upload_id.clone(),
                file_name: self.source.name().to_string(),
                index,
                total_chunks: Some(self.total_chunks),
                payload,
            })
            .await?;

        Ok(len)
    }

    fn on_chunk_done(shared: &Arc<Self>, index: u64, result: Result<u64>) {
        let mut state = shared.lock();
        state.active -= 1;

        if state.cancelled {
            tracing::debug!(upload_id = %shared.upload_id, index, "Discarding chunk result after cancel");
            return;
        }

        match result {
            Ok(bytes) => {
                state.completed_chunks += 1;
                state.meter.record(bytes);
                shared.publish(&state);

                if state.completed_chunks == shared.total_chunks {
                    drop(state);
                    Self::begin_merge(shared);
                } else {
                    drop(state);
                    Self::pump(shared);
                }
            }
            Err(e) => {
                tracing::error!(upload_id = %shared.upload_id, index, "Chunk upload failed: {}", e);
                state.status = UploadStatus::Error;
                state.cancelled = true;
                state.failure = Some(Failure::Chunk {
                    index,
                    reason: e.to_string(),
                });
                state.stop_ticker();
                shared.publish(&state);
            }
        }
    }

    /// Issue the merge call, at most once per task.
    fn begin_merge(shared: &Arc<Self>) {
        {
            let mut state = shared.lock();
            if state.merge_started || state.cancelled || state.status == UploadStatus::Completed {
                return;
            }
            state.merge_started = true;
            state.stop_ticker();
            state.speed = Speed::Done;
            shared.publish(&state);
        }

        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            let request = MergeRequest {
                file_name: shared.source.name().to_string(),
                upload_id: shared.upload_id.clone(),
                total_chunks: shared.total_chunks,
                file_size: Some(shared.file_size),
            };
            let result = shared.transport.complete(request).await;

            let mut state = shared.lock();
            if state.cancelled {
                return;
            }
            match result {
                Ok(response) => {
                    tracing::info!(
                        upload_id = %shared.upload_id,
                        path = %response.file_path,
                        bytes = response.size,
                        "Upload completed"
                    );
                    state.status = UploadStatus::Completed;
                    state.speed = Speed::Done;
                }
                Err(e) => {
                    tracing::error!(upload_id = %shared.upload_id, "Merge request failed: {}", e);
                    state.status = UploadStatus::Error;
                    state.failure = Some(Failure::Merge(e.to_string()));
                }
            }
            shared.publish(&state);
        });
    }

    /// Start the periodic throughput sampler for the current run.
    fn spawn_ticker(shared: &Arc<Self>, state: &mut TaskState) {
        state.stop_ticker();
        let weak: Weak<Self> = Arc::downgrade(shared);
        let period = state.speed_interval;
        state.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                if !shared.sample_speed() {
                    break;
                }
            }
        }));
    }

    /// Take one throughput sample. Returns false once the task stopped uploading.
    fn sample_speed(&self) -> bool {
        let mut state = self.lock();
        if state.status != UploadStatus::Uploading || state.merge_started {
            return false;
        }
        if let Some(rate) = state.meter.sample(Instant::now()) {
            state.speed = Speed::Rate(rate);
            self.publish(&state);
        }
        true
    }
}
