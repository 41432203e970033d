//! Terraform module registry protocol (`/v1/modules`).

mod details;
mod download;
mod listing;

use std::sync::Arc;

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

use crate::registry::split_analytics_token;
use crate::server::AppState;
use crate::types::ModuleIdentity;

pub(super) use details::{module_part, part_name};

pub fn protocol_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/.well-known/terraform.json", get(discovery))
        .route("/v1/modules", get(listing::list_modules))
        .route("/v1/modules/search", get(listing::search_modules))
        .route("/v1/modules/{namespace}", get(listing::list_namespace))
        .route("/v1/modules/{namespace}/{name}", get(listing::list_module))
        .route(
            "/v1/modules/{namespace}/{name}/{provider}",
            get(details::latest_details),
        )
        .route(
            "/v1/modules/{namespace}/{name}/{provider}/versions",
            get(listing::list_versions),
        )
        .route(
            "/v1/modules/{namespace}/{name}/{provider}/download",
            get(download::download_latest),
        )
        .route(
            "/v1/modules/{namespace}/{name}/{provider}/{version}",
            get(details::version_details),
        )
        .route(
            "/v1/modules/{namespace}/{name}/{provider}/{version}/download",
            get(download::download_version),
        )
}

async fn discovery() -> Json<Value> {
    Json(json!({ "modules.v1": "/v1/modules/" }))
}

/// Strip an analytics token from the namespace segment.
fn protocol_identity<'a>(namespace: &'a str, name: &str, provider: &str) -> (Option<&'a str>, ModuleIdentity) {
    let (token, namespace) = split_analytics_token(namespace);
    (token, ModuleIdentity::new(namespace, name, provider))
}
