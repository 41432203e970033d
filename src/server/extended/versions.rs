use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use tracing::info;

use crate::auth::RequireAdmin;
use crate::error::Result;
use crate::indexing::IndexOutcome;
use crate::server::AppState;
use crate::server::dto::{IndexResponse, VersionPath, VersionStatus};
use crate::server::response::{ApiError, ApiResponse};

pub const MAX_UPLOAD_SIZE: usize = 100 * 1024 * 1024;

async fn read_archive(multipart: &mut Multipart) -> std::result::Result<Bytes, ApiError> {
    let mut archive = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart: {e}")))?
    {
        if field.name() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;
            if data.len() > MAX_UPLOAD_SIZE {
                return Err(ApiError::bad_request(format!(
                    "Archive size ({} bytes) exceeds maximum allowed size ({MAX_UPLOAD_SIZE} bytes)",
                    data.len()
                ))
                .with_status(StatusCode::PAYLOAD_TOO_LARGE));
            }
            archive = Some(data);
        }
    }
    archive.ok_or_else(|| ApiError::bad_request("File field is required"))
}

fn index_response(state: &AppState, outcome: &IndexOutcome) -> Result<IndexResponse> {
    let latest = match outcome.latest_version_id {
        Some(id) => state.store.get_module_version_by_id(id)?.map(|v| v.version),
        None => None,
    };
    Ok(IndexResponse::new(outcome, latest))
}

/// Index an uploaded zip archive as `version` and publish it.
pub async fn upload_version(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<VersionPath>,
    mut multipart: Multipart,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let archive = read_archive(&mut multipart).await?;
    let identity = path.identity();
    let cancel = state.shutdown.child_token();
    let outcome = state
        .registry
        .upload_version(&identity, &path.version, archive, &cancel)
        .await?;
    info!("Indexed upload of {identity} {}", path.version);
    Ok(Json(ApiResponse::success(index_response(&state, &outcome)?)))
}

/// Index `version` from the provider's git repository.
pub async fn import_version(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<VersionPath>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let cancel = state.shutdown.child_token();
    let outcome = state
        .registry
        .import_version(&path.identity(), &path.version, &cancel)
        .await?;
    Ok(Json(ApiResponse::success(index_response(&state, &outcome)?)))
}

pub async fn publish_version(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<VersionPath>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let version = state.registry.publish_version(&path.identity(), &path.version)?;
    Ok(Json(ApiResponse::success(VersionStatus::from(&version))))
}

pub async fn unpublish_version(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<VersionPath>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let version = state
        .registry
        .unpublish_version(&path.identity(), &path.version)?;
    Ok(Json(ApiResponse::success(VersionStatus::from(&version))))
}

pub async fn delete_version(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<VersionPath>,
) -> std::result::Result<StatusCode, ApiError> {
    state.registry.delete_version(&path.identity(), &path.version)?;
    Ok(StatusCode::NO_CONTENT)
}
