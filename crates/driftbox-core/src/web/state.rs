//! Shared state for the upload API handlers.

use std::sync::Arc;

use crate::client::{DeviceClass, UploadPolicy};
use crate::merge::MergeEngine;
use crate::receiver::ChunkReceiver;
use crate::session::SessionRegistry;
use crate::storage::ChunkStore;

use super::WebServerConfig;

/// State shared across all handlers.
#[derive(Debug)]
pub struct AppState {
    /// Server configuration
    pub config: WebServerConfig,
    /// Chunk storage
    pub store: ChunkStore,
    /// Live upload sessions
    pub registry: Arc<SessionRegistry>,
    /// Stores incoming chunks
    pub receiver: ChunkReceiver,
    /// Publishes completed uploads
    pub engine: MergeEngine,
}

/// Handle to the state as seen by axum.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the pipeline components for `config`.
    #[must_use]
    pub fn new(config: WebServerConfig) -> Self {
        let store = config.chunk_store();
        let registry = Arc::new(SessionRegistry::new());
        let receiver = ChunkReceiver::new(store.clone(), Arc::clone(&registry));
        let engine = MergeEngine::new(
            store.clone(),
            Arc::clone(&registry),
            config.storage_root.clone(),
        );

        Self {
            config,
            store,
            registry,
            receiver,
            engine,
        }
    }

    /// Upload policy advertised to a client of class `class`.
    #[must_use]
    pub fn policy_for(&self, class: DeviceClass) -> UploadPolicy {
        UploadPolicy::for_device(class)
            .with_chunk_size(self.config.chunk_size.unwrap_or(0))
            .with_concurrency(self.config.concurrency.unwrap_or(0))
    }
}
