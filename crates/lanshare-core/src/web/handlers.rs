//! HTTP endpoint handlers for the lanshare web API.
//!
//! This module contains all the handler functions for the REST API endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::Multipart;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::TextMessage;
use crate::file;
use crate::upload::{InitOutcome, UploadSession};

use super::error::{ApiError, ApiResult};
use super::state::SharedState;

// ============================================================================
// Response types
// ============================================================================

/// Chunk admission response.
#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    /// Index of the accepted chunk
    accepted: u32,
}

/// Completion response.
#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    /// Name the file was stored under
    final_name: String,
}

/// Retry response.
#[derive(Debug, Serialize)]
pub struct RetryResponse {
    /// Chunk indices still to send, ascending
    missing_chunks: Vec<u32>,
}

/// In-flight session summary.
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    /// Session id
    session_id: String,
    /// Name given at init
    filename: String,
    /// Chunks received
    uploaded: u32,
    /// Chunks expected
    total_chunks: u32,
    /// Completion percentage
    progress: f64,
    /// When the session was opened
    created_at: DateTime<Utc>,
}

impl From<&UploadSession> for SessionInfo {
    fn from(session: &UploadSession) -> Self {
        Self {
            session_id: session.id.clone(),
            filename: session.filename.clone(),
            uploaded: session.uploaded(),
            total_chunks: session.total_chunks,
            progress: session.progress_percentage(),
            created_at: session.created_at,
        }
    }
}

/// Visible file entry.
#[derive(Debug, Serialize)]
pub struct FileInfo {
    /// File name
    name: String,
    /// Size in bytes
    size: u64,
    /// Human-readable size
    size_display: String,
    /// Last modification time
    modified: DateTime<Utc>,
}

// ============================================================================
// Request types
// ============================================================================

/// Init request body.
#[derive(Debug, Deserialize)]
pub struct InitRequest {
    /// Name of the file being uploaded
    filename: String,
    /// Number of chunks the client will send
    total_chunks: u32,
    /// Optional hex SHA-256 of the whole file
    #[serde(default)]
    file_hash: Option<String>,
}

/// Complete request body.
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    /// Session to finalize
    session_id: String,
    /// Name to store the file under
    #[serde(default)]
    filename: String,
}

/// Retry request body.
#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    /// Session to inspect
    session_id: String,
}

/// Text message request body.
#[derive(Debug, Deserialize)]
pub struct TextRequest {
    /// Message body
    #[serde(default)]
    content: String,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::bad_request("invalid parameters").with_details(e.body_text()))
}

// ============================================================================
// Upload handlers
// ============================================================================

/// POST /api/upload/init - Open an upload session.
pub async fn init_upload(
    State(state): State<SharedState>,
    body: Result<Json<InitRequest>, JsonRejection>,
) -> ApiResult<Json<InitOutcome>> {
    let req = json_body(body)?;

    let outcome = state
        .manager
        .init_session(&req.filename, req.total_chunks, req.file_hash.as_deref())
        .await?;

    Ok(Json(outcome))
}

/// POST /api/upload/chunk - Admit one chunk (multipart form).
///
/// Expects the fields `session_id`, `chunk_index` and `chunk`.
pub async fn upload_chunk(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkResponse>> {
    let mut session_id: Option<String> = None;
    let mut chunk_index: Option<String> = None;
    let mut chunk: Option<axum::body::Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "session_id" => {
                session_id = Some(field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read session_id: {e}"))
                })?);
            }
            "chunk_index" => {
                chunk_index = Some(field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read chunk_index: {e}"))
                })?);
            }
            "chunk" => {
                chunk = Some(field.bytes().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read chunk data: {e}"))
                })?);
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let (Some(session_id), Some(chunk_index), Some(chunk)) = (session_id, chunk_index, chunk)
    else {
        return Err(ApiError::bad_request("incomplete parameters"));
    };
    let chunk_index: u32 = chunk_index
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid chunk_index '{chunk_index}'")))?;

    let admitted = state
        .manager
        .admit_chunk(session_id.trim(), chunk_index, &chunk)
        .await?;

    Ok(Json(ChunkResponse {
        accepted: admitted.index,
    }))
}

/// POST /api/upload/complete - Finalize a fully uploaded session.
pub async fn complete_upload(
    State(state): State<SharedState>,
    body: Result<Json<CompleteRequest>, JsonRejection>,
) -> ApiResult<Json<CompleteResponse>> {
    let req = json_body(body)?;

    let completed = state
        .manager
        .complete_session(&req.session_id, &req.filename)
        .await?;

    Ok(Json(CompleteResponse {
        final_name: completed.final_name,
    }))
}

/// POST /api/upload/retry - List the chunks a session is still missing.
pub async fn retry_upload(
    State(state): State<SharedState>,
    body: Result<Json<RetryRequest>, JsonRejection>,
) -> ApiResult<Json<RetryResponse>> {
    let req = json_body(body)?;

    let missing_chunks = state.manager.missing_chunks(&req.session_id).await?;

    Ok(Json(RetryResponse { missing_chunks }))
}

/// GET /api/upload/sessions - List in-flight sessions.
pub async fn list_sessions(State(state): State<SharedState>) -> Json<Vec<SessionInfo>> {
    let sessions = state.manager.sessions().await;
    Json(sessions.iter().map(SessionInfo::from).collect())
}

// ============================================================================
// File and message handlers
// ============================================================================

/// GET /api/files - List finished files, newest first.
pub async fn list_files(State(state): State<SharedState>) -> ApiResult<Json<Vec<FileInfo>>> {
    let files = file::list_visible(state.manager.upload_dir()).await?;

    Ok(Json(
        files
            .into_iter()
            .map(|f| FileInfo {
                size_display: file::format_size(f.size),
                name: f.name,
                size: f.size,
                modified: f.modified,
            })
            .collect(),
    ))
}

/// GET /api/messages - The text message board.
pub async fn list_messages(State(state): State<SharedState>) -> Json<Vec<TextMessage>> {
    Json(state.messages().await)
}

/// POST /api/text - Post a text message.
pub async fn post_text(
    State(state): State<SharedState>,
    body: Result<Json<TextRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let req = json_body(body)?;

    state.post_message(&req.content).await;

    Ok(StatusCode::NO_CONTENT)
}
