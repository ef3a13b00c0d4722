//! On-disk chunk store.
//!
//! Every upload session owns one directory under the chunk root, named after
//! its upload id. Inside it each chunk lives in a file named by its decimal
//! index:
//!
//! ```text
//! <chunk_root>/
//!   7f3c.../
//!     0
//!     1
//!     2
//! ```
//!
//! Chunk slots are replaced atomically: the payload is written to a unique
//! `.part` sibling and renamed over the slot, so a retried chunk never leaves
//! a torn slot behind and concurrent writes to different indices never touch
//! each other's files.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Default chunk directory name, relative to the storage root.
pub const CHUNK_DIR_NAME: &str = ".chunks";

/// Suffix for in-flight chunk writes.
const PART_SUFFIX: &str = ".part";

/// Maximum accepted upload id length.
const MAX_UPLOAD_ID_LEN: usize = 128;

/// Check that an upload id can be used as a single directory name.
///
/// Accepts non-empty ids made of ASCII letters, digits, `-` and `_`, which
/// covers UUIDs in any of their usual renderings.
pub fn validate_upload_id(upload_id: &str) -> Result<()> {
    let valid = !upload_id.is_empty()
        && upload_id.len() <= MAX_UPLOAD_ID_LEN
        && upload_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidUploadId(upload_id.to_string()))
    }
}

/// Directory-per-session storage for raw chunk payloads.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    chunk_root: PathBuf,
}

impl ChunkStore {
    /// Create a store rooted at `chunk_root`.
    ///
    /// The directory is created lazily on the first chunk write.
    #[must_use]
    pub fn new(chunk_root: impl Into<PathBuf>) -> Self {
        Self {
            chunk_root: chunk_root.into(),
        }
    }

    /// Create a store using the default chunk directory under `storage_root`.
    #[must_use]
    pub fn under(storage_root: &Path) -> Self {
        Self::new(storage_root.join(CHUNK_DIR_NAME))
    }

    /// Root directory holding all session directories.
    #[must_use]
    pub fn chunk_root(&self) -> &Path {
        &self.chunk_root
    }

    /// Directory for one session.
    pub fn session_dir(&self, upload_id: &str) -> Result<PathBuf> {
        validate_upload_id(upload_id)?;
        Ok(self.chunk_root.join(upload_id))
    }

    /// Slot path for one chunk.
    pub fn chunk_path(&self, upload_id: &str, index: u64) -> Result<PathBuf> {
        Ok(self.session_dir(upload_id)?.join(index.to_string()))
    }

    /// Create the session directory if it does not exist yet.
    ///
    /// Safe to call concurrently: racing creators all succeed.
    pub async fn ensure_session_dir(&self, upload_id: &str) -> Result<PathBuf> {
        let dir = self.session_dir(upload_id)?;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Store `payload` in the slot for `index`, replacing any previous content.
    ///
    /// Returns the number of bytes written once they are synced to disk.
    pub async fn write_chunk(&self, upload_id: &str, index: u64, payload: &[u8]) -> Result<u64> {
        let dir = self.ensure_session_dir(upload_id).await?;
        let slot = dir.join(index.to_string());
        let part = dir.join(format!("{index}.{}{PART_SUFFIX}", uuid::Uuid::new_v4().simple()));

        if let Err(e) = write_synced(&part, payload).await {
            let _ = fs::remove_file(&part).await;
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&part, &slot).await {
            let _ = fs::remove_file(&part).await;
            return Err(e.into());
        }

        tracing::debug!(
            upload_id,
            index,
            bytes = payload.len(),
            "Stored chunk"
        );

        Ok(payload.len() as u64)
    }

    /// Read back a stored chunk.
    pub async fn read_chunk(&self, upload_id: &str, index: u64) -> Result<Vec<u8>> {
        let path = self.chunk_path(upload_id, index)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::MissingChunk { index })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a slot exists for `index`.
    pub async fn has_chunk(&self, upload_id: &str, index: u64) -> Result<bool> {
        let path = self.chunk_path(upload_id, index)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Remove a session directory and everything in it.
    ///
    /// Removing a session that does not exist is not an error.
    pub async fn remove_session(&self, upload_id: &str) -> Result<()> {
        let dir = self.session_dir(upload_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Upload ids that currently have a session directory.
    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.chunk_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if validate_upload_id(name).is_ok() {
                        ids.push(name.to_string());
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove session directories untouched for longer than `max_age`.
    ///
    /// `is_busy` is consulted for each candidate; sessions it reports as busy
    /// are kept. Returns the upload ids that were removed.
    pub async fn sweep_stale<F>(&self, max_age: Duration, is_busy: F) -> Result<Vec<String>>
    where
        F: Fn(&str) -> bool,
    {
        let now = SystemTime::now();
        let mut removed = Vec::new();

        for upload_id in self.list_sessions().await? {
            if is_busy(&upload_id) {
                continue;
            }

            let dir = self.session_dir(&upload_id)?;
            let modified = match fs::metadata(&dir).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(upload_id, "Failed to stat session directory: {}", e);
                    continue;
                }
            };

            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < max_age {
                continue;
            }

            match self.remove_session(&upload_id).await {
                Ok(()) => {
                    tracing::info!(upload_id, age_secs = age.as_secs(), "Swept stale upload session");
                    removed.push(upload_id);
                }
                Err(e) => tracing::warn!(upload_id, "Failed to sweep session: {}", e),
            }
        }

        Ok(removed)
    }
}

async fn write_synced(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(payload).await?;
    file.sync_data().await?;
    Ok(())
}
