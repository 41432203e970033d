use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::warn;

use super::listing::{listed_versions, module_summary};
use super::protocol_identity;
use crate::error::Result;
use crate::extractor::TerraformDocs;
use crate::registry::LATEST;
use crate::server::AppState;
use crate::server::dto::{ModuleDetailsResponse, ModulePart, ProviderPath, VersionPath};
use crate::server::response::ApiError;
use crate::types::{ModuleIdentity, SubmoduleKind};

/// Analysis stored under `details_id`, rendered for the registry.
pub(crate) fn module_part(
    state: &AppState,
    details_id: Option<i64>,
    path: &str,
    name: &str,
) -> Result<ModulePart> {
    let details = match details_id {
        Some(id) => state.store.get_module_details(id)?,
        None => None,
    };
    let (docs, readme) = match details {
        Some(details) => {
            let docs = match details.terraform_docs.as_deref() {
                Some(raw) => TerraformDocs::parse(raw).unwrap_or_else(|e| {
                    warn!("Stored analysis of details {details_id:?} is unreadable: {e}");
                    TerraformDocs::default()
                }),
                None => TerraformDocs::default(),
            };
            (docs, details.readme)
        }
        None => (TerraformDocs::default(), None),
    };

    let record = docs.to_record(readme, false);
    let empty = record.inputs.is_empty()
        && record.outputs.is_empty()
        && record.resources.is_empty()
        && record.data_sources.is_empty()
        && record.module_calls.is_empty();

    Ok(ModulePart {
        path: path.to_string(),
        name: name.to_string(),
        readme: record
            .readme
            .as_deref()
            .map(|r| String::from_utf8_lossy(r).into_owned())
            .unwrap_or_default(),
        empty,
        inputs: record.inputs,
        outputs: record.outputs,
        dependencies: record.module_calls,
        provider_dependencies: record.provider_requirements,
        resources: record.resources,
    })
}

/// Last path segment, used as the display name of nested modules.
pub(crate) fn part_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn details(state: &AppState, identity: &ModuleIdentity, version: &str) -> Result<ModuleDetailsResponse> {
    let (resolved, version) = state.registry.resolve_version(identity, version)?;
    let provider = resolved.provider;

    let mut submodules = Vec::new();
    let mut examples = Vec::new();
    for nested in state.store.list_submodules(version.id)? {
        let part = module_part(state, nested.module_details_id, &nested.path, part_name(&nested.path))?;
        match nested.kind {
            SubmoduleKind::Submodule => submodules.push(part),
            SubmoduleKind::Example => examples.push(part),
        }
    }

    Ok(ModuleDetailsResponse {
        summary: module_summary(state, &provider, &version)?,
        root: module_part(state, version.module_details_id, "", &provider.module)?,
        submodules,
        examples,
        providers: vec![provider.provider.clone()],
        versions: listed_versions(state, &provider)?,
    })
}

pub async fn latest_details(
    State(state): State<Arc<AppState>>,
    Path(path): Path<ProviderPath>,
) -> std::result::Result<Json<ModuleDetailsResponse>, ApiError> {
    let (_, identity) = protocol_identity(&path.namespace, &path.name, &path.provider);
    Ok(Json(details(&state, &identity, LATEST)?))
}

pub async fn version_details(
    State(state): State<Arc<AppState>>,
    Path(path): Path<VersionPath>,
) -> std::result::Result<Json<ModuleDetailsResponse>, ApiError> {
    let (_, identity) = protocol_identity(&path.namespace, &path.name, &path.provider);
    Ok(Json(details(&state, &identity, &path.version)?))
}
