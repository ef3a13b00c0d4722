//! Transports carrying chunks and merge requests to a receiver.

use std::future::Future;

use crate::error::Result;
use crate::merge::MergeEngine;
use crate::protocol::{ChunkUpload, MergeRequest, MergeResponse};
use crate::receiver::ChunkReceiver;

/// The two calls an upload task makes against a server.
pub trait UploadTransport: Send + Sync + 'static {
    /// Deliver one chunk. Resolves once the server acknowledged it.
    fn upload_chunk(&self, chunk: ChunkUpload) -> impl Future<Output = Result<()>> + Send;

    /// Ask the server to merge a session whose chunks were all acknowledged.
    fn complete(&self, request: MergeRequest) -> impl Future<Output = Result<MergeResponse>> + Send;
}

/// In-process transport that calls a receiver and merge engine directly.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    receiver: ChunkReceiver,
    engine: MergeEngine,
}

impl LocalTransport {
    /// Wrap a receiver and merge engine that share one chunk store.
    #[must_use]
    pub fn new(receiver: ChunkReceiver, engine: MergeEngine) -> Self {
        Self { receiver, engine }
    }
}

impl UploadTransport for LocalTransport {
    async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<()> {
        self.receiver.receive(chunk).await.map(|_| ())
    }

    async fn complete(&self, request: MergeRequest) -> Result<MergeResponse> {
        let outcome = self.engine.merge(&request).await?;
        Ok(MergeResponse {
            success: true,
            file_path: outcome.path.display().to_string(),
            size: outcome.size,
        })
    }
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use reqwest::multipart::{Form, Part};
    use reqwest::Client;

    use super::UploadTransport;
    use crate::error::{Error, Result};
    use crate::protocol::{
        fields, ChunkUpload, MergeRequest, MergeResponse, CHUNK_ENDPOINT, COMPLETE_ENDPOINT,
    };

    /// Transport speaking the Driftbox HTTP API.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: Client,
        base_url: String,
        timeout: Option<Duration>,
    }

    impl HttpTransport {
        /// Create a transport for the server at `base_url` (e.g. `http://10.0.0.5:8080`).
        ///
        /// # Errors
        ///
        /// Returns an error if the URL has no http(s) scheme.
        pub fn new(base_url: impl Into<String>) -> Result<Self> {
            let base_url = base_url.into().trim_end_matches('/').to_string();
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(Error::InvalidField {
                    field: "server",
                    reason: format!("'{base_url}' is not an http(s) URL"),
                });
            }

            Ok(Self {
                client: Client::new(),
                base_url,
                timeout: None,
            })
        }

        /// Give up on any single request after `timeout`.
        ///
        /// Without a timeout a stalled request keeps its window slot forever.
        #[must_use]
        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = Some(timeout);
            self
        }

        fn url(&self, endpoint: &str) -> String {
            format!("{}{endpoint}", self.base_url)
        }

        fn post(&self, endpoint: &str) -> reqwest::RequestBuilder {
            let builder = self.client.post(self.url(endpoint));
            match self.timeout {
                Some(timeout) => builder.timeout(timeout),
                None => builder,
            }
        }
    }

    impl UploadTransport for HttpTransport {
        async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<()> {
            let index = chunk.index;
            let len = chunk.payload.len() as u64;
            let payload = Part::stream_with_length(reqwest::Body::from(chunk.payload), len)
                .file_name("blob")
                .mime_str("application/octet-stream")
                .map_err(|e| Error::Http(e.to_string()))?;

            let mut form = Form::new()
                .part(fields::FILE, payload)
                .text(fields::FILE_NAME, chunk.file_name)
                .text(fields::CHUNK_INDEX, index.to_string())
                .text(fields::UPLOAD_ID, chunk.upload_id);
            if let Some(total) = chunk.total_chunks {
                form = form.text(fields::TOTAL_CHUNKS, total.to_string());
            }

            let response = self
                .post(CHUNK_ENDPOINT)
                .multipart(form)
                .send()
                .await
                .map_err(|e| Error::ChunkUploadFailed {
                    index,
                    reason: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::ChunkUploadFailed {
                    index,
                    reason: format!("server returned {status}: {body}"),
                });
            }

            Ok(())
        }

        async fn complete(&self, request: MergeRequest) -> Result<MergeResponse> {
            let response = self
                .post(COMPLETE_ENDPOINT)
                .json(&request)
                .send()
                .await
                .map_err(|e| Error::MergeFailed(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::MergeFailed(format!("server returned {status}: {body}")));
            }

            response
                .json()
                .await
                .map_err(|e| Error::Http(format!("failed to parse merge response: {e}")))
        }
    }

}
