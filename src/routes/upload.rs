//! Upload Routes
//!
//! HTTP endpoints for chunked uploads.
//!
//! Endpoints:
//! - POST /chunk  - Store one chunk (multipart: uploadId, index, chunk)
//! - POST /finish - Assemble the chunks and relay the file

use axum::{
    async_trait,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, FromRequest, Multipart, Request, State,
    },
    http::header,
    response::IntoResponse,
    routing::post,
    Form, Json, Router,
};
use serde::Serialize;

use super::route_not_found;
use crate::state::AppState;
use crate::upload::{
    parse_chunk_index, ChunkReceipt, FinishParams, FinishRequest, FinishResponse, UploadError,
    UploadId,
};

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();

        let body = match &self {
            UploadError::Validation(_) | UploadError::SessionNotFound(_) => ErrorResponse {
                error: self.to_string(),
                details: None,
            },
            _ => ErrorResponse {
                error: "Upload failed".to_string(),
                details: Some(self.to_string()),
            },
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router(max_chunk_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/chunk", post(upload_chunk).fallback(route_not_found))
        .route("/finish", post(finish).fallback(route_not_found))
        .layer(DefaultBodyLimit::max(max_chunk_bytes))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /chunk
///
/// Multipart fields `uploadId` and `index`, plus the file part `chunk`.
async fn upload_chunk(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ChunkReceipt>, UploadError> {
    let missing = || UploadError::Validation("Missing uploadId or index".to_string());

    let mut multipart = multipart.map_err(|e| {
        tracing::debug!("Rejected chunk body: {}", e.body_text());
        missing()
    })?;

    let mut upload_id = None;
    let mut index = None;
    let mut data = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!("Failed to read multipart field: {}", e);
        UploadError::Validation(format!("Failed to read chunk upload: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();
        let read_error = |e: MultipartError| {
            UploadError::Validation(format!("Failed to read field {}: {}", name, e))
        };

        match name.as_str() {
            "uploadId" => upload_id = Some(field.text().await.map_err(read_error)?),
            "index" => index = Some(field.text().await.map_err(read_error)?),
            "chunk" => data = Some(field.bytes().await.map_err(read_error)?),
            _ => {
                tracing::debug!(field = %name, "Ignoring unexpected chunk field");
            }
        }
    }

    let upload_id = upload_id.filter(|s| !s.is_empty()).ok_or_else(missing)?;
    let index = index.filter(|s| !s.is_empty()).ok_or_else(missing)?;

    let upload_id = UploadId::parse(&upload_id)?;
    let index = parse_chunk_index(&index)?;
    let data = data.ok_or_else(|| UploadError::Validation("Missing chunk data".to_string()))?;

    state.uploads().put_chunk(&upload_id, index, &data).await?;

    tracing::debug!(
        upload_id = %upload_id,
        index = index,
        bytes = data.len(),
        "Chunk received"
    );

    Ok(Json(ChunkReceipt::new(&upload_id, index)))
}

/// POST /finish
///
/// Assemble all chunks for `uploadId` and relay the file.
async fn finish(
    State(state): State<AppState>,
    FinishForm(params): FinishForm,
) -> Result<Json<FinishResponse>, UploadError> {
    let request = FinishRequest::from_params(params)?;

    tracing::info!(
        upload_id = %request.upload_id,
        filename = %request.relay.filename,
        destination = request.relay.destination().as_str(),
        "Finish requested"
    );

    let url = state.uploads().finish(&request).await?;

    Ok(Json(FinishResponse { url }))
}

// ============================================================================
// Finish Body Extractor
// ============================================================================

/// `/finish` fields from a urlencoded, JSON, or multipart body
struct FinishForm(FinishParams);

#[async_trait]
impl<S> FromRequest<S> for FinishForm
where
    S: Send + Sync,
{
    type Rejection = UploadError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let Json(params) = Json::<FinishParams>::from_request(req, state)
                .await
                .map_err(|e| UploadError::Validation(e.body_text()))?;
            return Ok(Self(params));
        }

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| UploadError::Validation(e.body_text()))?;
            return read_multipart_params(multipart).await.map(Self);
        }

        let Form(params) = Form::<FinishParams>::from_request(req, state)
            .await
            .map_err(|e| UploadError::Validation(e.body_text()))?;
        Ok(Self(params))
    }
}

async fn read_multipart_params(mut multipart: Multipart) -> Result<FinishParams, UploadError> {
    let mut params = FinishParams::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Validation(format!("Failed to read finish body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        let value = field
            .text()
            .await
            .map_err(|e| UploadError::Validation(format!("Failed to read field {}: {}", name, e)))?;

        match name.as_str() {
            "uploadId" => params.upload_id = Some(value),
            "filename" => params.filename = Some(value),
            "userhash" => params.userhash = Some(value),
            "destination" => params.destination = Some(value),
            "time" => params.time = Some(value),
            _ => {}
        }
    }

    Ok(params)
}
