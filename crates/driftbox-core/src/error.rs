//! Error types for Driftbox.
//!
//! This module provides a unified error type for the upload pipeline, with
//! variants grouped by the layer that reports them: client input, integrity
//! checks at merge time, transport failures and filesystem failures.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Driftbox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Driftbox.
#[derive(Error, Debug)]
pub enum Error {
    /// A required request field was absent (E100)
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A request field was present but unusable (E101)
    #[error("invalid value for '{field}': {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Reason for rejection
        reason: String,
    },

    /// Upload id cannot be used as a session directory name (E102)
    #[error("invalid upload id '{0}'")]
    InvalidUploadId(String),

    /// A chunk slot was absent when merging (E200)
    #[error("missing chunk {index}")]
    MissingChunk {
        /// Index of the first missing chunk
        index: u64,
    },

    /// The merged size disagrees with the declared size (E201)
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Declared total size
        expected: u64,
        /// Size of the assembled staging file
        actual: u64,
    },

    /// A chunk upload was rejected or failed in transit
    #[error("chunk {index} upload failed: {reason}")]
    ChunkUploadFailed {
        /// Chunk index
        index: u64,
        /// Failure description
        reason: String,
    },

    /// The server refused or failed to merge the upload
    #[error("merge failed: {0}")]
    MergeFailed(String),

    /// Upload was cancelled by the user
    #[error("upload cancelled")]
    Cancelled,

    /// An operation was invoked in a state that does not allow it
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// Current task state
        state: String,
    },

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Codes in the E1XX range are client-input errors, E2XX are integrity
    /// errors detected while merging.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::MissingField(_) => Some("E100"),
            Self::InvalidField { .. } => Some("E101"),
            Self::InvalidUploadId(_) => Some("E102"),
            Self::MissingChunk { .. } => Some("E200"),
            Self::SizeMismatch { .. } => Some("E201"),
            _ => None,
        }
    }

    /// Returns whether this error was caused by malformed client input.
    ///
    /// Client errors are reported before any state is mutated.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingField(_) | Self::InvalidField { .. } | Self::InvalidUploadId(_)
        )
    }

    /// Returns whether this error is an integrity failure found during merge.
    #[must_use]
    pub const fn is_integrity_error(&self) -> bool {
        matches!(self, Self::MissingChunk { .. } | Self::SizeMismatch { .. })
    }
}
