//! Merge engine.
//!
//! Turns a session's chunk slots into one published file:
//!
//! 1. create (or truncate) a staging file next to the final path
//! 2. append slots `0..total_chunks` in strict ascending order
//! 3. compare the staging size with the declared size, if any
//! 4. rename the staging file over the final path
//! 5. remove the session's chunk directory
//!
//! Any failure in steps 2-4 deletes the staging file, so the final path is
//! either absent or still holds its previous content. Merges for the same
//! upload id are serialized through the session's merge lock.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::{fields, MergeRequest};
use crate::session::SessionRegistry;
use crate::storage::{validate_upload_id, ChunkStore};

/// Outcome of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Published file path
    pub path: PathBuf,
    /// Published file size in bytes
    pub size: u64,
}

/// Assembles chunk sessions into published files.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    store: ChunkStore,
    registry: Arc<SessionRegistry>,
    upload_dir: PathBuf,
}

impl MergeEngine {
    /// Create an engine reading from `store` and publishing into `upload_dir`.
    #[must_use]
    pub fn new(store: ChunkStore, registry: Arc<SessionRegistry>, upload_dir: PathBuf) -> Self {
        Self {
            store,
            registry,
            upload_dir,
        }
    }

    /// Directory published files land in.
    #[must_use]
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Final path for a file name. The name is joined verbatim.
    #[must_use]
    pub fn final_path(&self, file_name: &str) -> PathBuf {
        self.upload_dir.join(file_name)
    }

    /// Merge a session into its final file.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingChunk`] if a slot in `0..total_chunks` is absent
    /// - [`Error::SizeMismatch`] if the declared size disagrees
    /// - client errors for an empty name or unusable upload id
    /// - I/O errors from staging or publishing
    pub async fn merge(&self, request: &MergeRequest) -> Result<MergeOutcome> {
        if request.file_name.is_empty() {
            return Err(Error::MissingField(fields::FILE_NAME));
        }
        validate_upload_id(&request.upload_id)?;

        if !is_plain_file_name(&request.file_name) {
            tracing::warn!(
                upload_id = %request.upload_id,
                file_name = %request.file_name,
                "File name is not a single path component; using it verbatim"
            );
        }

        let session = self.registry.get_or_create(&request.upload_id);
        let _merge_guard = session.lock_merge().await;

        if let Some(index) = session.first_missing(request.total_chunks) {
            tracing::debug!(
                upload_id = %request.upload_id,
                first_missing = index,
                "Ledger reports unrecorded chunks; checking slots on disk"
            );
        }

        tokio::fs::create_dir_all(&self.upload_dir).await?;

        let job = MergeJob {
            session_dir: self.store.session_dir(&request.upload_id)?,
            final_path: self.final_path(&request.file_name),
            staging_path: staging_path(&self.final_path(&request.file_name), &request.upload_id),
            total_chunks: request.total_chunks,
            expected_size: request.file_size,
        };

        let attempt = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| Error::Internal(format!("merge task panicked: {e}")))?;

        if attempt.staged {
            if let Err(e) = self.store.remove_session(&request.upload_id).await {
                tracing::warn!(
                    upload_id = %request.upload_id,
                    "Failed to clean up chunk directory: {}",
                    e
                );
            }
            self.registry.remove(&request.upload_id);
        }

        match &attempt.result {
            Ok(outcome) => tracing::info!(
                upload_id = %request.upload_id,
                path = %outcome.path.display(),
                bytes = outcome.size,
                chunks = request.total_chunks,
                "Published merged upload"
            ),
            Err(e) => tracing::error!(
                upload_id = %request.upload_id,
                file_name = %request.file_name,
                "Merge failed: {}",
                e
            ),
        }

        attempt.result
    }
}

/// Whether `name` is exactly one normal path component.
#[must_use]
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Staging sibling for a final path, unique per upload id.
#[must_use]
pub fn staging_path(final_path: &Path, upload_id: &str) -> PathBuf {
    let name = final_path
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().to_string());
    final_path.with_file_name(format!("{name}.{upload_id}.tmp"))
}

struct MergeJob {
    session_dir: PathBuf,
    final_path: PathBuf,
    staging_path: PathBuf,
    total_chunks: u64,
    expected_size: Option<u64>,
}

struct MergeAttempt {
    result: Result<MergeOutcome>,
    /// Whether the staging step succeeded, which makes cleanup mandatory
    staged: bool,
}

impl MergeJob {
    fn run(self) -> MergeAttempt {
        let staging = match File::create(&self.staging_path) {
            Ok(file) => file,
            Err(e) => {
                return MergeAttempt {
                    result: Err(e.into()),
                    staged: false,
                }
            }
        };

        let result = self
            .assemble(staging)
            .and_then(|size| self.verify(size))
            .and_then(|size| self.publish(size));

        if result.is_err() {
            remove_if_exists(&self.staging_path);
        }

        MergeAttempt {
            result,
            staged: true,
        }
    }

    fn assemble(&self, staging: File) -> Result<u64> {
        let mut out = BufWriter::new(staging);

        for index in 0..self.total_chunks {
            let slot = self.session_dir.join(index.to_string());
            let mut chunk = match File::open(&slot) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(Error::MissingChunk { index });
                }
                Err(e) => return Err(e.into()),
            };
            io::copy(&mut chunk, &mut out)?;
        }

        out.flush()?;
        let file = out.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    }

    fn verify(&self, actual: u64) -> Result<u64> {
        match self.expected_size {
            Some(expected) if expected != actual => Err(Error::SizeMismatch { expected, actual }),
            _ => Ok(actual),
        }
    }

    fn publish(&self, size: u64) -> Result<MergeOutcome> {
        if let Err(first) = fs::rename(&self.staging_path, &self.final_path) {
            // Some platforms refuse to rename over an existing file.
            if !self.final_path.exists() {
                return Err(first.into());
            }
            fs::remove_file(&self.final_path)?;
            fs::rename(&self.staging_path, &self.final_path)?;
        }

        Ok(MergeOutcome {
            path: self.final_path.clone(),
            size,
        })
    }
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "Failed to remove staging file: {}", e);
        }
    }
}
