use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};

use super::protocol_identity;
use crate::error::{Error, Result};
use crate::server::AppState;
use crate::server::dto::{
    ListMeta, ListParams, ModuleListResponse, ModuleSummary, ProviderPath, VersionEntry,
    VersionList, VersionsResponse,
};
use crate::server::response::ApiError;
use crate::store::{SearchHit, SearchParams, clamp_page};
use crate::types::version::sort_descending;
use crate::types::{ModuleProvider, ModuleVersion};

const DEFAULT_LIMIT: i64 = 10;

/// Registry listing entry for a version of a provider.
pub(super) fn module_summary(
    state: &AppState,
    provider: &ModuleProvider,
    version: &ModuleVersion,
) -> Result<ModuleSummary> {
    Ok(ModuleSummary {
        id: format!(
            "{}/{}/{}/{}",
            provider.namespace, provider.module, provider.provider, version.version
        ),
        owner: version.owner.clone().unwrap_or_default(),
        namespace: provider.namespace.clone(),
        name: provider.module.clone(),
        version: version.version.clone(),
        provider: provider.provider.clone(),
        description: version.description.clone().unwrap_or_default(),
        source: state.registry.browse_url(provider, version)?.unwrap_or_default(),
        published_at: version.published_at,
        downloads: state.store.count_provider_downloads(provider.id)?,
        verified: provider.verified,
    })
}

fn hit_summary(state: &AppState, hit: &SearchHit) -> Result<ModuleSummary> {
    let provider = state
        .store
        .get_module_provider_by_id(hit.module_provider_id)?
        .ok_or(Error::NotFound)?;
    let version = state
        .store
        .get_module_version_by_id(hit.version_id)?
        .ok_or(Error::NotFound)?;
    module_summary(state, &provider, &version)
}

fn run_search(state: &AppState, mut params: SearchParams, list: &ListParams) -> Result<ModuleListResponse> {
    let (offset, limit) = clamp_page(
        list.offset.unwrap_or(0),
        list.limit.unwrap_or(DEFAULT_LIMIT),
    );
    params.offset = offset;
    params.limit = limit;
    params.verified = list.verified.filter(|v| *v);
    if let Some(provider) = &list.provider {
        params.providers.push(provider.clone());
    }
    if let Some(namespace) = &list.namespace {
        params.namespaces.push(namespace.clone());
    }

    let results = state.store.search_modules(&params)?;
    let modules = results
        .hits
        .iter()
        .map(|hit| hit_summary(state, hit))
        .collect::<Result<Vec<_>>>()?;

    let next = results.offset + results.limit;
    Ok(ModuleListResponse {
        meta: ListMeta {
            limit: results.limit,
            current_offset: results.offset,
            next_offset: (next < results.total_count).then_some(next),
            prev_offset: (results.offset > 0).then(|| (results.offset - results.limit).max(0)),
            total_count: results.total_count,
        },
        modules,
    })
}

pub async fn list_modules(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> std::result::Result<Json<ModuleListResponse>, ApiError> {
    Ok(Json(run_search(&state, SearchParams::default(), &params)?))
}

pub async fn search_modules(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> std::result::Result<Json<ModuleListResponse>, ApiError> {
    let query = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("q is required"))?;
    let search = SearchParams {
        query: Some(query.to_string()),
        ..Default::default()
    };
    Ok(Json(run_search(&state, search, &params)?))
}

pub async fn list_namespace(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    Query(params): Query<ListParams>,
) -> std::result::Result<Json<ModuleListResponse>, ApiError> {
    let search = SearchParams {
        namespaces: vec![namespace],
        ..Default::default()
    };
    Ok(Json(run_search(&state, search, &params)?))
}

pub async fn list_module(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Query(params): Query<ListParams>,
) -> std::result::Result<Json<ModuleListResponse>, ApiError> {
    let search = SearchParams {
        namespaces: vec![namespace],
        modules: vec![name],
        ..Default::default()
    };
    Ok(Json(run_search(&state, search, &params)?))
}

/// Published, non-beta, non-internal versions, newest first.
pub(super) fn listed_versions(state: &AppState, provider: &ModuleProvider) -> Result<Vec<String>> {
    let mut versions: Vec<String> = state
        .store
        .list_module_versions(provider.id)?
        .into_iter()
        .filter(|v| v.published && !v.beta && !v.internal)
        .map(|v| v.version)
        .collect();
    sort_descending(&mut versions);
    Ok(versions)
}

pub async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path(path): Path<ProviderPath>,
) -> std::result::Result<Json<VersionsResponse>, ApiError> {
    let (_, identity) = protocol_identity(&path.namespace, &path.name, &path.provider);
    let resolved = state.registry.resolver().resolve(&identity)?;
    let versions = listed_versions(&state, &resolved.provider)?
        .into_iter()
        .map(|version| VersionEntry { version })
        .collect();

    Ok(Json(VersionsResponse {
        modules: vec![VersionList { versions }],
    }))
}
