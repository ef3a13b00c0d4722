//! Byte sources an upload can read chunks from.

use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Error, Result};

/// Something with a name and a fixed length that can serve byte ranges.
///
/// Ranges may be requested concurrently and out of order.
pub trait UploadSource: Send + Sync + 'static {
    /// File name announced to the server.
    fn name(&self) -> &str;

    /// Total length in bytes. Must not change during an upload.
    fn size(&self) -> u64;

    /// Read `len` bytes starting at `offset`.
    fn read_range(&self, offset: u64, len: u64) -> impl Future<Output = Result<Bytes>> + Send;
}

/// A file on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    size: u64,
}

impl FileSource {
    /// Open `path` and capture its name and size.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be stat'ed, is not a regular
    /// file, or has no usable file name.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(Error::InvalidField {
                field: "file",
                reason: format!("'{}' is not a regular file", path.display()),
            });
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidField {
                field: "file",
                reason: format!("'{}' has no UTF-8 file name", path.display()),
            })?
            .to_string();

        Ok(Self {
            path,
            name,
            size: metadata.len(),
        })
    }

    /// Upload under a different name than the one on disk.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Path being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UploadSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes> {
        let len = usize::try_from(len).map_err(|_| Error::InvalidField {
            field: "chunkSize",
            reason: format!("{len} bytes does not fit in memory"),
        })?;

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

/// In-memory bytes, e.g. a pasted text snippet.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Bytes,
}

impl MemorySource {
    /// Wrap `data` under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

impl UploadSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = usize::try_from(offset.saturating_add(len)).unwrap_or(usize::MAX);
        if start > end || end > self.data.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range {offset}+{len} beyond {} bytes", self.data.len()),
            )));
        }
        Ok(self.data.slice(start..end))
    }
}
