use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::{CreateRedirectRequest, ProviderPath};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::ModuleIdentity;

#[derive(Debug, Deserialize)]
pub struct RedirectPath {
    namespace: String,
    name: String,
    provider: String,
    id: i64,
}

pub async fn list_redirects(
    State(state): State<Arc<AppState>>,
    Path(path): Path<ProviderPath>,
) -> Result<impl IntoResponse, ApiError> {
    let redirects = state.registry.list_redirects(&path.identity())?;
    Ok(Json(ApiResponse::success(redirects)))
}

pub async fn create_redirect(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<ProviderPath>,
    Json(req): Json<CreateRedirectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let from = ModuleIdentity::new(req.namespace, req.module, req.provider);
    let redirect = state.registry.create_redirect(&path.identity(), &from)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(redirect))))
}

pub async fn delete_redirect(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<RedirectPath>,
) -> Result<StatusCode, ApiError> {
    let identity = ModuleIdentity::new(path.namespace, path.name, path.provider);
    state.registry.delete_redirect(&identity, path.id)?;
    Ok(StatusCode::NO_CONTENT)
}
