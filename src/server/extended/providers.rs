use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireAdmin;
use crate::error::Error;
use crate::registry::{ProviderFields, ProviderUpdate};
use crate::server::AppState;
use crate::server::dto::{
    CreateProviderRequest, DeleteParams, MoveProviderRequest, ProviderDetailsResponse,
    ProviderPath, UpdateProviderRequest, VersionStatus,
};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::version::cmp_descending;

pub async fn create_provider(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ProviderPath>,
    Json(req): Json<CreateProviderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let provider = state.registry.create_module_provider(
        &path.identity(),
        ProviderFields {
            verified: req.verified,
            git: req.git,
            webhook_secret: req.webhook_secret,
        },
    )?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(provider))))
}

/// Provider settings with every version, including unpublished ones.
pub async fn get_provider(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ProviderPath>,
) -> Result<impl IntoResponse, ApiError> {
    let provider = state
        .store
        .get_module_provider(&path.identity())?
        .ok_or(Error::NotFound)?;

    let mut versions = state.store.list_module_versions(provider.id)?;
    versions.sort_by(|a, b| cmp_descending(&a.version, &b.version));

    Ok(Json(ApiResponse::success(ProviderDetailsResponse {
        versions: versions.iter().map(VersionStatus::from).collect(),
        provider,
    })))
}

pub async fn update_provider(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ProviderPath>,
    Json(req): Json<UpdateProviderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let provider = state.registry.update_module_provider(
        &path.identity(),
        ProviderUpdate {
            verified: req.verified,
            git: req.git,
            webhook_secret: req.webhook_secret,
        },
    )?;
    Ok(Json(ApiResponse::success(provider)))
}

pub async fn move_provider(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ProviderPath>,
    Json(req): Json<MoveProviderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let moved = state
        .registry
        .move_module_provider(&path.identity(), &req.into())?;
    Ok(Json(ApiResponse::success(moved)))
}

pub async fn delete_provider(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ProviderPath>,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode, ApiError> {
    state
        .registry
        .delete_module_provider(&path.identity(), params.force)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn provider_analytics(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ProviderPath>,
) -> Result<impl IntoResponse, ApiError> {
    let resolved = state.registry.resolver().resolve(&path.identity())?;
    let summary = state.analytics.provider_summary(resolved.provider.id)?;
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn global_analytics(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(ApiResponse::success(state.analytics.global()?)))
}
