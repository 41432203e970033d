use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireAdmin;
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{CreateNamespaceRequest, RenameNamespaceRequest};
use crate::server::response::{ApiError, ApiResponse};

pub async fn create_namespace(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateNamespaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ns = state
        .registry
        .create_namespace(&req.name, req.display_name.as_deref(), req.kind)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(ns))))
}

pub async fn get_namespace(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ns = state
        .store
        .get_namespace_by_name(&name)?
        .ok_or(Error::NotFound)?;
    Ok(Json(ApiResponse::success(ns)))
}

/// Rename, leaving redirects for every module provider in the namespace.
pub async fn rename_namespace(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<RenameNamespaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ns = state.registry.rename_namespace(&name, &req.name)?;
    Ok(Json(ApiResponse::success(ns)))
}

pub async fn delete_namespace(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete_namespace(&name)?;
    Ok(StatusCode::NO_CONTENT)
}
