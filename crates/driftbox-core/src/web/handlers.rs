//! HTTP endpoint handlers for the upload API.

#![allow(clippy::missing_errors_doc)]

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap},
    Json,
};
use axum_extra::extract::Multipart;
use bytes::Bytes;
use serde::Serialize;

use crate::client::DeviceClass;
use crate::error::Error;
use crate::protocol::{
    fields, ChunkAck, ChunkUpload, MergeRequest, MergeResponse, PolicyResponse, RawMergeRequest,
};
use crate::session::SessionSnapshot;

use super::error::ApiResult;
use super::state::SharedState;

// ============================================================================
// Response types
// ============================================================================

/// Session listing response.
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    /// Sessions with chunks received but not yet merged
    sessions: Vec<SessionSnapshot>,
}

// ============================================================================
// Upload handlers
// ============================================================================

/// POST /api/upload/chunk - Store one chunk of an upload.
pub async fn upload_chunk(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkAck>> {
    let mut payload: Option<Bytes> = None;
    let mut file_name: Option<String> = None;
    let mut chunk_index: Option<String> = None;
    let mut upload_id: Option<String> = None;
    let mut total_chunks: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            fields::FILE => {
                payload = Some(field.bytes().await?);
            }
            fields::FILE_NAME | fields::CHUNK_INDEX | fields::UPLOAD_ID | fields::TOTAL_CHUNKS => {
                let value = field.text().await?;
                let slot = match name.as_str() {
                    fields::FILE_NAME => &mut file_name,
                    fields::CHUNK_INDEX => &mut chunk_index,
                    fields::UPLOAD_ID => &mut upload_id,
                    _ => &mut total_chunks,
                };
                *slot = Some(value);
            }
            other => {
                tracing::debug!("Ignoring unexpected multipart field '{}'", other);
            }
        }
    }

    let chunk = ChunkUpload {
        payload: payload.ok_or(Error::MissingField(fields::FILE))?,
        file_name: required(file_name, fields::FILE_NAME)?,
        index: parse_number(&required(chunk_index, fields::CHUNK_INDEX)?, fields::CHUNK_INDEX)?,
        upload_id: required(upload_id, fields::UPLOAD_ID)?,
        total_chunks: total_chunks
            .filter(|s| !s.is_empty())
            .map(|s| parse_number(&s, fields::TOTAL_CHUNKS))
            .transpose()?,
    };

    Ok(Json(state.receiver.receive(chunk).await?))
}

/// POST /api/upload/complete - Merge a finished upload and publish it.
pub async fn complete_upload(
    State(state): State<SharedState>,
    body: Result<Json<RawMergeRequest>, JsonRejection>,
) -> ApiResult<Json<MergeResponse>> {
    let Json(raw) = body?;
    let request = MergeRequest::try_from(raw)?;

    let outcome = state.engine.merge(&request).await?;

    Ok(Json(MergeResponse {
        success: true,
        file_path: outcome.path.display().to_string(),
        size: outcome.size,
    }))
}

/// GET /api/upload/policy - Chunk size and concurrency for the calling device.
pub async fn get_policy(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Json<PolicyResponse> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let device_class = DeviceClass::from_user_agent(user_agent);
    let policy = state.policy_for(device_class);

    Json(PolicyResponse {
        device_class,
        chunk_size: policy.chunk_size,
        concurrency: policy.concurrency,
    })
}

/// GET /api/upload/sessions - Sessions that have not been merged yet.
pub async fn list_sessions(State(state): State<SharedState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.registry.snapshots(),
    })
}

// ============================================================================
// Helper functions
// ============================================================================

fn required(value: Option<String>, field: &'static str) -> Result<String, Error> {
    value
        .filter(|s| !s.is_empty())
        .ok_or(Error::MissingField(field))
}

fn parse_number(value: &str, field: &'static str) -> Result<u64, Error> {
    value.trim().parse().map_err(|_| Error::InvalidField {
        field,
        reason: format!("'{value}' is not a non-negative integer"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_rejects_empty() {
        assert!(matches!(
            required(Some(String::new()), fields::UPLOAD_ID),
            Err(Error::MissingField("uploadId"))
        ));
        assert!(required(None, fields::FILE_NAME).is_err());
        assert_eq!(required(Some("a".into()), fields::FILE_NAME).unwrap(), "a");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("7", fields::CHUNK_INDEX).unwrap(), 7);
        assert_eq!(parse_number(" 12 ", fields::CHUNK_INDEX).unwrap(), 12);
        assert!(matches!(
            parse_number("-1", fields::CHUNK_INDEX),
            Err(Error::InvalidField {
                field: "chunkIndex",
                ..
            })
        ));
        assert!(parse_number("abc", fields::TOTAL_CHUNKS).is_err());
    }
}
