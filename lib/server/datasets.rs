use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::artifact_store::ArtifactType;
use crate::state::AppState;
use crate::status_service::DeadLetterRecord;
use crate::store_service::{IngestRequest, StoreError};

const DEFAULT_FILE_MEDIA_TYPE: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Store(err) if err.is_invalid_request() => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::Submission(_)) => StatusCode::BAD_GATEWAY,
            Self::Store(StoreError::Queue(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(StoreError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                event = "api_request_failed",
                status = status.as_u16(),
                error = %self,
                "request failed"
            );
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub id: String,
}

struct UploadedPart {
    content: Bytes,
    content_type: Option<String>,
    file_name: Option<String>,
}

/// `POST /datasets`: multipart parts `file` and `metacard`, plus optional
/// `fileSize` / `metacardSize` declarations checked against the received
/// bytes.
pub(super) async fn ingest_dataset(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let mut file: Option<UploadedPart> = None;
    let mut metacard: Option<UploadedPart> = None;
    let mut file_size: Option<u64> = None;
    let mut metacard_size: Option<u64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("malformed multipart body: {err}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") | Some("metacard") => {
                let content_type = field.content_type().map(str::to_string);
                let file_name = field.file_name().map(str::to_string);
                let content = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("could not read part: {err}")))?;
                let part = UploadedPart {
                    content,
                    content_type,
                    file_name,
                };
                if name.as_deref() == Some("file") {
                    file = Some(part);
                } else {
                    metacard = Some(part);
                }
            }
            Some("fileSize") => file_size = Some(parse_size("fileSize", &field.text().await)?),
            Some("metacardSize") => {
                metacard_size = Some(parse_size("metacardSize", &field.text().await)?)
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiError::BadRequest("missing `file` part".to_string()))?;
    let metacard =
        metacard.ok_or_else(|| ApiError::BadRequest("missing `metacard` part".to_string()))?;

    let request = IngestRequest {
        file_size: file_size.unwrap_or(file.content.len() as u64),
        mime_type: file
            .content_type
            .unwrap_or_else(|| DEFAULT_FILE_MEDIA_TYPE.to_string()),
        file_content: file.content,
        file_name: file.file_name,
        metacard_size: metacard_size.unwrap_or(metacard.content.len() as u64),
        metacard_content: metacard.content,
    };

    let id = state.store_service.ingest(request).await?;
    info!(event = "dataset_accepted", dataset_id = %id, "dataset accepted");
    Ok((StatusCode::CREATED, Json(IngestResponse { id })))
}

fn parse_size(
    part: &str,
    raw: &Result<String, axum::extract::multipart::MultipartError>,
) -> Result<u64, ApiError> {
    match raw {
        Ok(text) => text
            .trim()
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("`{part}` must be a byte count"))),
        Err(err) => Err(ApiError::BadRequest(format!("could not read `{part}`: {err}"))),
    }
}

/// `GET /datasets/{id}/{artifact}`
pub(super) async fn get_artifact(
    State(state): State<Arc<AppState>>,
    Path((dataset_id, artifact)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let artifact_type: ArtifactType = artifact
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown artifact type {artifact:?}")))?;

    let data = state
        .store_service
        .get_data(&dataset_id, artifact_type)
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&data.media_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_FILE_MEDIA_TYPE)),
    );
    if let Some(file_name) = data.file_name.as_deref() {
        let disposition = format!("attachment; filename=\"{}\"", sanitize_file_name(file_name));
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(CONTENT_DISPOSITION, value);
        }
    }

    Ok((headers, data.content).into_response())
}

/// `DELETE /datasets/{id}`
pub(super) async fn quarantine_dataset(
    State(state): State<Arc<AppState>>,
    Path(dataset_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store_service.quarantine(&dataset_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /dead-letters`
pub(super) async fn list_dead_letters(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<DeadLetterRecord>> {
    Json(state.dead_letters.snapshot())
}

/// Keeps a file name safe inside a quoted `Content-Disposition` value.
fn sanitize_file_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && *c != '"' && *c != '\\')
        .collect()
}
