//! Wire types for the Driftbox upload API.
//!
//! Driftbox speaks plain HTTP so that browsers and the CLI can share one
//! server. Field names are camelCase on the wire.
//!
//! ## Endpoints
//!
//! | Method | Endpoint | Body |
//! |--------|----------|------|
//! | POST | /api/upload/chunk | multipart: `file`, `fileName`, `chunkIndex`, `uploadId`, (`totalChunks`) |
//! | POST | /api/upload/complete | JSON: `fileName`, `uploadId`, `totalChunks`, (`fileSize`) |
//! | GET | /api/upload/policy | - |
//! | GET | /api/upload/sessions | - |

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Chunk upload endpoint.
pub const CHUNK_ENDPOINT: &str = "/api/upload/chunk";

/// Merge (completion) endpoint.
pub const COMPLETE_ENDPOINT: &str = "/api/upload/complete";

/// Upload policy endpoint.
pub const POLICY_ENDPOINT: &str = "/api/upload/policy";

/// Session listing endpoint.
pub const SESSIONS_ENDPOINT: &str = "/api/upload/sessions";

/// Multipart field names used by the chunk endpoint.
pub mod fields {
    /// Chunk payload
    pub const FILE: &str = "file";
    /// Target file name
    pub const FILE_NAME: &str = "fileName";
    /// Zero-based chunk index
    pub const CHUNK_INDEX: &str = "chunkIndex";
    /// Upload session id
    pub const UPLOAD_ID: &str = "uploadId";
    /// Declared chunk count (informational)
    pub const TOTAL_CHUNKS: &str = "totalChunks";
}

/// One chunk on its way to the receiver.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    /// Upload session id
    pub upload_id: String,
    /// Target file name
    pub file_name: String,
    /// Zero-based chunk index
    pub index: u64,
    /// Declared chunk count, when the client sent it
    pub total_chunks: Option<u64>,
    /// Raw chunk bytes
    pub payload: Bytes,
}

/// Acknowledgment for a stored chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    /// Always true on success
    pub success: bool,
    /// Chunk index that was stored
    pub chunk_index: u64,
    /// Bytes written to the slot
    pub bytes: u64,
}

/// A validated merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    /// Target file name, used verbatim
    pub file_name: String,
    /// Upload session id
    pub upload_id: String,
    /// Number of chunks to concatenate
    pub total_chunks: u64,
    /// Declared byte length of the source file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// Merge request body as received, before required fields are checked.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMergeRequest {
    /// Target file name
    pub file_name: Option<String>,
    /// Upload session id
    pub upload_id: Option<String>,
    /// Number of chunks
    pub total_chunks: Option<u64>,
    /// Declared byte length
    pub file_size: Option<u64>,
}

impl TryFrom<RawMergeRequest> for MergeRequest {
    type Error = Error;

    fn try_from(raw: RawMergeRequest) -> Result<Self> {
        let file_name = raw
            .file_name
            .filter(|s| !s.is_empty())
            .ok_or(Error::MissingField(fields::FILE_NAME))?;
        let upload_id = raw
            .upload_id
            .filter(|s| !s.is_empty())
            .ok_or(Error::MissingField(fields::UPLOAD_ID))?;
        let total_chunks = raw
            .total_chunks
            .ok_or(Error::MissingField(fields::TOTAL_CHUNKS))?;

        Ok(Self {
            file_name,
            upload_id,
            total_chunks,
            file_size: raw.file_size,
        })
    }
}

/// Result of a successful merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    /// Always true on success
    pub success: bool,
    /// Path of the published file on the server
    pub file_path: String,
    /// Size of the published file
    pub size: u64,
}

/// Chunking policy advertised to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyResponse {
    /// Device class the policy was chosen for
    pub device_class: crate::client::DeviceClass,
    /// Chunk size in bytes
    pub chunk_size: u64,
    /// Parallel chunk uploads
    pub concurrency: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_request_wire_names() {
        let req = MergeRequest {
            file_name: "a.bin".into(),
            upload_id: "abc".into(),
            total_chunks: 3,
            file_size: Some(42),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"fileName\":\"a.bin\""));
        assert!(json.contains("\"uploadId\":\"abc\""));
        assert!(json.contains("\"totalChunks\":3"));
        assert!(json.contains("\"fileSize\":42"));
    }

    #[test]
    fn test_raw_merge_request_missing_fields() {
        let raw: RawMergeRequest =
            serde_json::from_str(r#"{"fileName":"a.bin","totalChunks":2}"#).unwrap();
        let err = MergeRequest::try_from(raw).unwrap_err();
        assert!(matches!(err, Error::MissingField("uploadId")));

        let raw: RawMergeRequest =
            serde_json::from_str(r#"{"fileName":"a.bin","uploadId":"u1"}"#).unwrap();
        let err = MergeRequest::try_from(raw).unwrap_err();
        assert!(matches!(err, Error::MissingField("totalChunks")));

        let raw: RawMergeRequest =
            serde_json::from_str(r#"{"fileName":"","uploadId":"u1","totalChunks":1}"#).unwrap();
        assert!(MergeRequest::try_from(raw).is_err());
    }

    #[test]
    fn test_raw_merge_request_optional_size() {
        let raw: RawMergeRequest =
            serde_json::from_str(r#"{"fileName":"a","uploadId":"u1","totalChunks":0}"#).unwrap();
        let req = MergeRequest::try_from(raw).unwrap();
        assert_eq!(req.total_chunks, 0);
        assert_eq!(req.file_size, None);
    }
}
