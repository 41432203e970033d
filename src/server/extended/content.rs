use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;

use crate::error::{Error, Result};
use crate::server::AppState;
use crate::server::dto::{
    ArchiveParams, ExampleDetails, ExampleFileView, ModulePart, NestedPath, VersionPath,
};
use crate::server::protocol::{module_part, part_name};
use crate::server::response::{ApiError, ApiResponse};
use crate::storage::{ArchiveKind, normalize_relative};
use crate::types::{Submodule, SubmoduleKind};

async fn serve_archive(
    state: &AppState,
    path: &VersionPath,
    params: &ArchiveParams,
    kind: ArchiveKind,
) -> std::result::Result<Response, ApiError> {
    let (file, size) = state
        .registry
        .signed_archive(
            &path.identity(),
            &path.version,
            kind,
            params.expires,
            &params.signature,
        )
        .await?;

    let body = Body::from_stream(ReaderStream::new(file));
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, kind.content_type())
        .header(header::CONTENT_LENGTH, size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", kind.file_name()),
        )
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

/// Hosted zip archive; only reachable through a signed download URL.
pub async fn zip_archive(
    State(state): State<Arc<AppState>>,
    Path(path): Path<VersionPath>,
    Query(params): Query<ArchiveParams>,
) -> std::result::Result<Response, ApiError> {
    serve_archive(&state, &path, &params, ArchiveKind::Zip).await
}

pub async fn tar_archive(
    State(state): State<Arc<AppState>>,
    Path(path): Path<VersionPath>,
    Query(params): Query<ArchiveParams>,
) -> std::result::Result<Response, ApiError> {
    serve_archive(&state, &path, &params, ArchiveKind::TarGz).await
}

/// Additional file stored at index time (README, CHANGELOG, ...).
pub async fn version_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<NestedPath>,
) -> std::result::Result<Response, ApiError> {
    let file = state
        .registry
        .version_file(&path.identity(), &path.version, &path.path)?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, file.content_type)
        .header("X-Content-Type-Options", "nosniff")
        .body(Body::from(file.content))
        .map_err(|_| ApiError::internal())
}

fn find_nested(state: &AppState, path: &NestedPath, kind: SubmoduleKind) -> Result<(Submodule, ModulePart)> {
    let wanted = normalize_relative(&path.path)?;
    let (_, version) = state.registry.resolve_version(&path.identity(), &path.version)?;
    let nested = state
        .store
        .list_submodules(version.id)?
        .into_iter()
        .find(|s| s.kind == kind && s.path == wanted)
        .ok_or(Error::NotFound)?;
    let part = module_part(state, nested.module_details_id, &nested.path, part_name(&nested.path))?;
    Ok((nested, part))
}

pub async fn submodule(
    State(state): State<Arc<AppState>>,
    Path(path): Path<NestedPath>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let (_, part) = find_nested(&state, &path, SubmoduleKind::Submodule)?;
    Ok(Json(ApiResponse::success(part)))
}

/// Example analysis together with its Terraform sources.
pub async fn example(
    State(state): State<Arc<AppState>>,
    Path(path): Path<NestedPath>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let (nested, part) = find_nested(&state, &path, SubmoduleKind::Example)?;
    let files = state
        .store
        .list_example_files(nested.id)?
        .into_iter()
        .map(|f| ExampleFileView {
            path: f.path,
            content: String::from_utf8_lossy(&f.content).into_owned(),
        })
        .collect();
    Ok(Json(ApiResponse::success(ExampleDetails { part, files })))
}
