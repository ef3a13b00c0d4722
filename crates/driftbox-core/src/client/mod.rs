//! Client side of the upload pipeline.
//!
//! An [`UploadTask`] owns one file's transfer: it plans chunks with an
//! [`UploadPolicy`], reads them from an [`UploadSource`], pushes them through
//! an [`UploadTransport`] over a bounded sliding window, and asks the server
//! to merge once every chunk is acknowledged.
//!
//! ## Lifecycle
//!
//! ```text
//!          start()            all chunks acked + merge ok
//!   idle ───────────▶ uploading ─────────────────────────▶ completed
//!    ▲                 │    ▲
//!    │ cancel()  pause()│    │resume()
//!    │                 ▼    │
//!    └─────────────── paused
//!
//!   any chunk failure or merge failure ──▶ error
//! ```

mod policy;
mod source;
mod speed;
mod task;
mod transport;

pub use policy::{DeviceClass, UploadPolicy};
pub use source::{FileSource, MemorySource, UploadSource};
pub use speed::{Speed, SpeedMeter};
pub use task::{TaskProgress, UploadStatus, UploadTask};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{LocalTransport, UploadTransport};
