//! HTTP server for the upload API.
//!
//! Exposes the chunk receiver and merge engine over HTTP so that browsers and
//! the `driftbox upload` command can push files to this machine.
//!
//! ## Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | POST | `/api/upload/chunk` | Multipart chunk (`file`, `fileName`, `chunkIndex`, `uploadId`) |
//! | POST | `/api/upload/complete` | JSON merge request |
//! | GET | `/api/upload/policy` | Chunk size and concurrency for the caller's device |
//! | GET | `/api/upload/sessions` | Unmerged sessions |
//!
//! ## Example
//!
//! ```rust,ignore
//! use driftbox_core::web::{WebServer, WebServerConfig};
//!
//! let config = WebServerConfig::from(&driftbox_core::config::Config::load()?);
//! let server = WebServer::new(config);
//! server.start().await?;
//! ```

pub mod error;
pub mod handlers;
pub mod state;

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{CHUNK_ENDPOINT, COMPLETE_ENDPOINT, POLICY_ENDPOINT, SESSIONS_ENDPOINT};
use crate::storage::ChunkStore;

pub use state::{AppState, SharedState};

/// Multipart framing allowance on top of the raw chunk bytes.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind to localhost only
    pub localhost_only: bool,
    /// Directory receiving published files
    pub storage_root: PathBuf,
    /// Chunk directory (`<storage_root>/.chunks` when unset)
    pub chunk_dir: Option<PathBuf>,
    /// Largest accepted chunk payload in bytes
    pub max_chunk_bytes: usize,
    /// Chunk size advertised instead of the device default
    pub chunk_size: Option<u64>,
    /// Concurrency advertised instead of the device default
    pub concurrency: Option<usize>,
    /// Remove sessions untouched for this long
    pub stale_after: Option<Duration>,
    /// Period of the stale-session sweep
    pub sweep_interval: Duration,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for WebServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            port: config.server.port,
            localhost_only: config.server.localhost_only,
            storage_root: config.storage_root(),
            chunk_dir: config.storage.chunk_dir.clone(),
            max_chunk_bytes: config.server.max_chunk_bytes,
            chunk_size: config.upload.chunk_size,
            concurrency: config.upload.concurrency,
            stale_after: config.sessions.stale_after,
            sweep_interval: config.sessions.sweep_interval,
        }
    }
}

impl WebServerConfig {
    /// Chunk store for this configuration.
    #[must_use]
    pub fn chunk_store(&self) -> ChunkStore {
        match &self.chunk_dir {
            Some(dir) => ChunkStore::new(dir.clone()),
            None => ChunkStore::under(&self.storage_root),
        }
    }

    /// Address the server binds to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        let ip = if self.localhost_only {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        SocketAddr::new(ip, self.port)
    }
}

/// Build the API router over `state`.
pub fn router(state: SharedState) -> Router {
    let body_limit = state.config.max_chunk_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(CHUNK_ENDPOINT, post(handlers::upload_chunk))
        .route(COMPLETE_ENDPOINT, post(handlers::complete_upload))
        .route(POLICY_ENDPOINT, get(handlers::get_policy))
        .route(SESSIONS_ENDPOINT, get(handlers::list_sessions))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(DefaultBodyLimit::disable())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The upload API server.
#[derive(Debug)]
pub struct WebServer {
    state: SharedState,
}

impl WebServer {
    /// Create a server for `config`.
    #[must_use]
    pub fn new(config: WebServerConfig) -> Self {
        Self {
            state: Arc::new(AppState::new(config)),
        }
    }

    /// Shared handler state.
    #[must_use]
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Run until the process is killed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directories cannot be created or the
    /// port cannot be bound.
    pub async fn start(&self) -> Result<()> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// Run until `shutdown` resolves, then drain in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directories cannot be created or the
    /// port cannot be bound.
    pub async fn start_with_shutdown<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = &self.state.config;
        tokio::fs::create_dir_all(&config.storage_root).await?;
        tokio::fs::create_dir_all(self.state.store.chunk_root()).await?;

        let addr = config.bind_addr();
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            Error::Http(format!("failed to bind {addr}: {e}"))
        })?;

        let sweeper = config
            .stale_after
            .map(|max_age| spawn_sweeper(Arc::clone(&self.state), max_age));

        tracing::info!(
            %addr,
            root = %config.storage_root.display(),
            chunks = %self.state.store.chunk_root().display(),
            "Upload server listening"
        );

        let served = axum::serve(listener, router(Arc::clone(&self.state)))
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        tracing::info!("Upload server stopped");

        served.map_err(Error::Io)
    }
}

/// Periodically remove chunk folders that have not been touched for `max_age`.
fn spawn_sweeper(state: SharedState, max_age: Duration) -> tokio::task::JoinHandle<()> {
    let period = state.config.sweep_interval;
    tracing::info!(
        max_age_secs = max_age.as_secs(),
        interval_secs = period.as_secs(),
        "Stale session sweep enabled"
    );

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let registry = Arc::clone(&state.registry);
            match state
                .store
                .sweep_stale(max_age, |id| registry.is_busy(id))
                .await
            {
                Ok(removed) => {
                    for upload_id in &removed {
                        state.registry.remove(upload_id);
                    }
                    if !removed.is_empty() {
                        tracing::info!(count = removed.len(), "Removed stale upload sessions");
                    }
                }
                Err(e) => tracing::warn!("Stale session sweep failed: {}", e),
            }
        }
    })
}
