//! Chunk receiver.
//!
//! Accepts one chunk at a time and persists it into the session's slot for
//! that index. Writes for different indices of the same session proceed in
//! parallel; a repeated index overwrites the earlier payload.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::{fields, ChunkAck, ChunkUpload};
use crate::session::SessionRegistry;
use crate::storage::{validate_upload_id, ChunkStore};

/// Persists incoming chunks into the chunk store.
#[derive(Debug, Clone)]
pub struct ChunkReceiver {
    store: ChunkStore,
    registry: Arc<SessionRegistry>,
}

impl ChunkReceiver {
    /// Create a receiver writing into `store` and recording into `registry`.
    #[must_use]
    pub fn new(store: ChunkStore, registry: Arc<SessionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Store one chunk.
    ///
    /// Input is validated before anything touches the session or the disk,
    /// so a rejected chunk leaves no trace.
    ///
    /// # Errors
    ///
    /// Client errors for an empty file name, an unusable upload id or an
    /// index outside the declared chunk count; I/O errors if the slot cannot
    /// be written.
    pub async fn receive(&self, chunk: ChunkUpload) -> Result<ChunkAck> {
        if chunk.file_name.is_empty() {
            return Err(Error::MissingField(fields::FILE_NAME));
        }
        if chunk.upload_id.is_empty() {
            return Err(Error::MissingField(fields::UPLOAD_ID));
        }
        validate_upload_id(&chunk.upload_id)?;
        if let Some(total) = chunk.total_chunks {
            if chunk.index >= total {
                return Err(Error::InvalidField {
                    field: fields::CHUNK_INDEX,
                    reason: format!("index {} outside 0..{total}", chunk.index),
                });
            }
        }

        let session = self.registry.get_or_create(&chunk.upload_id);

        let bytes = self
            .store
            .write_chunk(&chunk.upload_id, chunk.index, &chunk.payload)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    upload_id = %chunk.upload_id,
                    index = chunk.index,
                    "Failed to store chunk: {}",
                    e
                );
            })?;

        session.record_chunk(&chunk.file_name, chunk.index, bytes, chunk.total_chunks);

        Ok(ChunkAck {
            success: true,
            chunk_index: chunk.index,
            bytes,
        })
    }

    /// The chunk store this receiver writes into.
    #[must_use]
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }
}
