use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;

use crate::server::AppState;
use crate::server::dto::HookResponse;
use crate::server::response::{ApiError, ApiResponse};
use crate::types::ModuleIdentity;
use crate::webhook::{HookKind, HookOutcome};

#[derive(Debug, Deserialize)]
pub struct HookPath {
    namespace: String,
    name: String,
    provider: String,
    kind: String,
}

/// Repository webhook delivery. Matching tags are indexed in the
/// background; anything else is acknowledged with 202.
pub async fn receive_hook(
    State(state): State<Arc<AppState>>,
    Path(path): Path<HookPath>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let kind: HookKind = path.kind.parse()?;
    let identity = ModuleIdentity::new(path.namespace, path.name, path.provider);

    let (status, response) = match state.webhooks.handle(kind, &identity, &headers, &body)? {
        HookOutcome::Queued(queued) => {
            info!("{kind} webhook queued {} version(s) of {identity}", queued.len());
            (
                StatusCode::OK,
                HookResponse {
                    queued,
                    ignored: None,
                },
            )
        }
        HookOutcome::Ignored(reason) => (
            StatusCode::ACCEPTED,
            HookResponse {
                queued: Vec::new(),
                ignored: Some(reason),
            },
        ),
    };
    Ok((status, Json(ApiResponse::success(response))))
}
