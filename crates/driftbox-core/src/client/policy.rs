//! Chunk size and concurrency policy.

use serde::{Deserialize, Serialize};

use crate::{DESKTOP_CHUNK_SIZE, DESKTOP_CONCURRENCY, MOBILE_CHUNK_SIZE, MOBILE_CONCURRENCY};

/// User-agent keywords that mark a mobile client.
const MOBILE_MARKERS: &[&str] = &[
    "android",
    "webos",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
];

/// Coarse device class used to pick upload knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Phones and tablets
    Mobile,
    /// Everything else
    #[default]
    Desktop,
}

impl DeviceClass {
    /// Classify a client from its `User-Agent` string.
    #[must_use]
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if MOBILE_MARKERS.iter().any(|marker| ua.contains(marker)) {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mobile => write!(f, "mobile"),
            Self::Desktop => write!(f, "desktop"),
        }
    }
}

/// Chunk size and window width for one upload.
///
/// These are client-side knobs only; the server accepts any chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Bytes per chunk (the last chunk may be shorter)
    pub chunk_size: u64,
    /// Maximum chunks in flight
    pub concurrency: usize,
}

impl UploadPolicy {
    /// Policy for a device class.
    #[must_use]
    pub const fn for_device(class: DeviceClass) -> Self {
        match class {
            DeviceClass::Mobile => Self::mobile(),
            DeviceClass::Desktop => Self::desktop(),
        }
    }

    /// 10 MiB chunks, 4 in flight.
    #[must_use]
    pub const fn desktop() -> Self {
        Self {
            chunk_size: DESKTOP_CHUNK_SIZE,
            concurrency: DESKTOP_CONCURRENCY,
        }
    }

    /// 5 MiB chunks, 3 in flight.
    #[must_use]
    pub const fn mobile() -> Self {
        Self {
            chunk_size: MOBILE_CHUNK_SIZE,
            concurrency: MOBILE_CONCURRENCY,
        }
    }

    /// Override the chunk size. Zero is ignored.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        if chunk_size > 0 {
            self.chunk_size = chunk_size;
        }
        self
    }

    /// Override the window width. Zero is ignored.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        if concurrency > 0 {
            self.concurrency = concurrency;
        }
        self
    }

    /// Number of chunks for a file of `file_size` bytes.
    #[must_use]
    pub const fn total_chunks(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.chunk_size)
    }

    /// Byte range `(offset, len)` of chunk `index` in a file of `file_size` bytes.
    #[must_use]
    pub fn chunk_range(&self, index: u64, file_size: u64) -> (u64, u64) {
        let offset = index.saturating_mul(self.chunk_size).min(file_size);
        let end = offset.saturating_add(self.chunk_size).min(file_size);
        (offset, end - offset)
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::desktop()
    }
}
