use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::protocol_identity;
use crate::auth::extract_key;
use crate::error::Error;
use crate::registry::{DownloadContext, LATEST};
use crate::server::AppState;
use crate::server::dto::{ProviderPath, VersionPath};
use crate::server::response::ApiError;
use crate::webhook::header;

const TERRAFORM_GET: HeaderName = HeaderName::from_static("x-terraform-get");

pub async fn download_version(
    State(state): State<Arc<AppState>>,
    Path(path): Path<VersionPath>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (token, identity) = protocol_identity(&path.namespace, &path.name, &path.provider);
    let target = state
        .registry
        .download(&identity, &path.version)
        .map_err(|e| match e {
            Error::HostingDisabled(_) => {
                ApiError::from(e).with_status(StatusCode::SERVICE_UNAVAILABLE)
            }
            other => ApiError::from(other),
        })?;

    let auth_key = extract_key(&headers).ok();
    let ctx = DownloadContext {
        analytics_token: token,
        auth_key: auth_key.as_deref(),
        terraform_version: header(&headers, "x-terraform-version"),
    };
    if let Err(e) = state.analytics.record(&target.version, &ctx) {
        warn!("Failed to record download of {identity} {}: {e}", path.version);
    }

    debug!("Serving {identity} {} from {:?}", path.version, target.source);
    let value = HeaderValue::from_str(&target.url).map_err(|_| ApiError::internal())?;
    Ok((StatusCode::NO_CONTENT, [(TERRAFORM_GET, value)]).into_response())
}

/// Redirect to the download endpoint of the latest version.
pub async fn download_latest(
    State(state): State<Arc<AppState>>,
    Path(path): Path<ProviderPath>,
) -> Result<Response, ApiError> {
    let (_, identity) = protocol_identity(&path.namespace, &path.name, &path.provider);
    let (_, version) = state.registry.resolve_version(&identity, LATEST)?;
    let location = format!(
        "/v1/modules/{}/{}/{}/{}/download",
        path.namespace, path.name, path.provider, version.version
    );
    let value = HeaderValue::from_str(&location).map_err(|_| ApiError::internal())?;
    Ok((StatusCode::FOUND, [(LOCATION, value)]).into_response())
}
