//! # Driftbox Core Library
//!
//! `driftbox-core` implements the chunked, resumable upload pipeline behind
//! Driftbox, a tool for moving files between devices on a local network.
//!
//! ## Features
//!
//! - **Chunked uploads**: large files are split into fixed-size chunks and
//!   sent over a bounded sliding window
//! - **Pause / resume / cancel**: cooperative control over a running upload
//! - **Atomic publish**: merged files only become visible once complete and
//!   verified
//! - **Idempotent chunk writes**: retries overwrite in place
//!
//! ## Modules
//!
//! - [`client`] - Upload task controller, sources, transports, throughput
//! - [`config`] - Configuration management
//! - [`merge`] - Merge engine (ordered concatenation + atomic publish)
//! - [`protocol`] - Wire types shared by the client and the server
//! - [`receiver`] - Chunk receiver
//! - [`session`] - Server-side upload session registry
//! - [`storage`] - On-disk chunk store
//! - [`web`] - HTTP endpoints (`web` feature)
//!
//! ## Example
//!
//! ```rust,ignore
//! use driftbox_core::client::{FileSource, HttpTransport, UploadPolicy, UploadTask};
//!
//! let source = FileSource::open("movie.mkv").await?;
//! let transport = HttpTransport::new("http://192.168.1.20:8080")?;
//! let task = UploadTask::new(source, transport, UploadPolicy::desktop());
//! task.start()?;
//! task.wait().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod client;
pub mod config;
pub mod error;
pub mod merge;
pub mod protocol;
pub mod receiver;
pub mod session;
pub mod storage;

#[cfg(feature = "web")]
pub mod web;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Chunk size used by desktop-class clients (10 MiB)
pub const DESKTOP_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Chunk size used by mobile-class clients (5 MiB)
pub const MOBILE_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Parallel chunk uploads for desktop-class clients
pub const DESKTOP_CONCURRENCY: usize = 4;

/// Parallel chunk uploads for mobile-class clients
pub const MOBILE_CONCURRENCY: usize = 3;

/// Default HTTP port for the upload server
pub const DEFAULT_PORT: u16 = 8080;

/// Default request body limit for a single chunk upload (64 MiB)
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;
