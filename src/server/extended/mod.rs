//! Registry management endpoints under `/v1/tfhost`.

mod content;
mod hooks;
mod namespaces;
mod providers;
mod redirects;
mod versions;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

use crate::server::AppState;

const PROVIDER: &str = "/modules/{namespace}/{name}/{provider}";

fn provider_route(suffix: &str) -> String {
    format!("{PROVIDER}{suffix}")
}

pub fn extended_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/namespaces", post(namespaces::create_namespace))
        .route(
            "/namespaces/{namespace}",
            get(namespaces::get_namespace)
                .patch(namespaces::rename_namespace)
                .delete(namespaces::delete_namespace),
        )
        .route("/analytics", get(providers::global_analytics))
        // Module providers
        .route(
            PROVIDER,
            get(providers::get_provider)
                .patch(providers::update_provider)
                .delete(providers::delete_provider),
        )
        .route(&provider_route("/create"), post(providers::create_provider))
        .route(&provider_route("/move"), post(providers::move_provider))
        .route(&provider_route("/analytics"), get(providers::provider_analytics))
        .route(
            &provider_route("/redirects"),
            get(redirects::list_redirects).post(redirects::create_redirect),
        )
        .route(
            &provider_route("/redirects/{id}"),
            delete(redirects::delete_redirect),
        )
        .route(&provider_route("/hooks/{kind}"), post(hooks::receive_hook))
        // Versions
        .route(
            &provider_route("/{version}/upload"),
            post(versions::upload_version).layer(DefaultBodyLimit::max(versions::MAX_UPLOAD_SIZE)),
        )
        .route(&provider_route("/{version}/import"), post(versions::import_version))
        .route(&provider_route("/{version}/publish"), post(versions::publish_version))
        .route(
            &provider_route("/{version}/unpublish"),
            post(versions::unpublish_version),
        )
        .route(&provider_route("/{version}"), delete(versions::delete_version))
        // Content
        .route(&provider_route("/{version}/source.zip"), get(content::zip_archive))
        .route(
            &provider_route("/{version}/source.tar.gz"),
            get(content::tar_archive),
        )
        .route(&provider_route("/{version}/files/{*path}"), get(content::version_file))
        .route(
            &provider_route("/{version}/submodules/{*path}"),
            get(content::submodule),
        )
        .route(&provider_route("/{version}/examples/{*path}"), get(content::example))
}
