use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extractor::{ModuleCall, ModuleInput, ModuleOutput, ModuleResource, ProviderRequirement};
use crate::indexing::IndexOutcome;
use crate::types::{GitConfig, ModuleIdentity, ModuleProvider, ModuleVersion, NamespaceKind, VersionState};
use crate::webhook::QueuedTag;

#[derive(Debug, Deserialize)]
pub struct ProviderPath {
    pub namespace: String,
    pub name: String,
    pub provider: String,
}

impl ProviderPath {
    pub fn identity(&self) -> ModuleIdentity {
        ModuleIdentity::new(&self.namespace, &self.name, &self.provider)
    }
}

#[derive(Debug, Deserialize)]
pub struct VersionPath {
    pub namespace: String,
    pub name: String,
    pub provider: String,
    pub version: String,
}

impl VersionPath {
    pub fn identity(&self) -> ModuleIdentity {
        ModuleIdentity::new(&self.namespace, &self.name, &self.provider)
    }
}

/// `{version}/<kind>/{*path}` routes.
#[derive(Debug, Deserialize)]
pub struct NestedPath {
    pub namespace: String,
    pub name: String,
    pub provider: String,
    pub version: String,
    pub path: String,
}

impl NestedPath {
    pub fn identity(&self) -> ModuleIdentity {
        ModuleIdentity::new(&self.namespace, &self.name, &self.provider)
    }
}

// Registry protocol

#[derive(Debug, Serialize)]
pub struct VersionsResponse {
    pub modules: Vec<VersionList>,
}

#[derive(Debug, Serialize)]
pub struct VersionList {
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Serialize)]
pub struct VersionEntry {
    pub version: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListMeta {
    pub limit: i64,
    pub current_offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_offset: Option<i64>,
    pub total_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ModuleListResponse {
    pub meta: ListMeta,
    pub modules: Vec<ModuleSummary>,
}

/// One module provider as listed by the registry protocol.
#[derive(Debug, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    pub owner: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub provider: String,
    pub description: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
    pub downloads: i64,
    pub verified: bool,
}

/// Analysis of the root module, a submodule or an example.
#[derive(Debug, Serialize)]
pub struct ModulePart {
    pub path: String,
    pub name: String,
    pub readme: String,
    pub empty: bool,
    pub inputs: Vec<ModuleInput>,
    pub outputs: Vec<ModuleOutput>,
    pub dependencies: Vec<ModuleCall>,
    pub provider_dependencies: Vec<ProviderRequirement>,
    pub resources: Vec<ModuleResource>,
}

#[derive(Debug, Serialize)]
pub struct ModuleDetailsResponse {
    #[serde(flatten)]
    pub summary: ModuleSummary,
    pub root: ModulePart,
    pub submodules: Vec<ModulePart>,
    pub examples: Vec<ModulePart>,
    pub providers: Vec<String>,
    pub versions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ExampleDetails {
    #[serde(flatten)]
    pub part: ModulePart,
    pub files: Vec<ExampleFileView>,
}

#[derive(Debug, Serialize)]
pub struct ExampleFileView {
    pub path: String,
    pub content: String,
}

// Extended API

#[derive(Debug, Deserialize)]
pub struct CreateNamespaceRequest {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub kind: NamespaceKind,
}

#[derive(Debug, Deserialize)]
pub struct RenameNamespaceRequest {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateProviderRequest {
    #[serde(default)]
    pub verified: bool,
    #[serde(flatten)]
    pub git: GitConfig,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

/// Absent fields are left unchanged; `webhook_secret: null` clears it.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProviderRequest {
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub git: Option<GitConfig>,
    #[serde(default, deserialize_with = "double_option")]
    pub webhook_secret: Option<Option<String>>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct MoveProviderRequest {
    pub namespace: String,
    pub module: String,
    pub provider: String,
}

impl From<MoveProviderRequest> for ModuleIdentity {
    fn from(req: MoveProviderRequest) -> Self {
        ModuleIdentity::new(req.namespace, req.module, req.provider)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRedirectRequest {
    pub namespace: String,
    pub module: String,
    pub provider: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ArchiveParams {
    pub expires: i64,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct ProviderDetailsResponse {
    #[serde(flatten)]
    pub provider: ModuleProvider,
    pub versions: Vec<VersionStatus>,
}

#[derive(Debug, Serialize)]
pub struct VersionStatus {
    pub version: String,
    pub state: VersionState,
    pub beta: bool,
    pub internal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl From<&ModuleVersion> for VersionStatus {
    fn from(v: &ModuleVersion) -> Self {
        Self {
            version: v.version.clone(),
            state: v.state(),
            beta: v.beta,
            internal: v.internal,
            published_at: v.published_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub version: String,
    pub state: VersionState,
    pub reindexed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
}

impl IndexResponse {
    pub fn new(outcome: &IndexOutcome, latest_version: Option<String>) -> Self {
        Self {
            version: outcome.version.version.clone(),
            state: outcome.version.state(),
            reindexed: outcome.reindexed,
            latest_version,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HookResponse {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queued: Vec<QueuedTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_request_distinguishes_null_and_absent() {
        let req: UpdateProviderRequest = serde_json::from_str(r#"{"verified":true}"#).unwrap();
        assert_eq!(req.verified, Some(true));
        assert!(req.webhook_secret.is_none());

        let req: UpdateProviderRequest = serde_json::from_str(r#"{"webhook_secret":null}"#).unwrap();
        assert_eq!(req.webhook_secret, Some(None));

        let req: UpdateProviderRequest = serde_json::from_str(r#"{"webhook_secret":"s"}"#).unwrap();
        assert_eq!(req.webhook_secret, Some(Some("s".into())));
    }

    #[test]
    fn test_create_provider_flattens_git_config() {
        let req: CreateProviderRequest = serde_json::from_str(
            r#"{"repo_clone_url_template":"https://git.example.com/{module}.git","git_tag_format":"v{version}"}"#,
        )
        .unwrap();
        assert_eq!(
            req.git.repo_clone_url_template.as_deref(),
            Some("https://git.example.com/{module}.git")
        );
        assert!(!req.verified);
    }

    #[test]
    fn test_empty_lists_serialize_as_arrays() {
        let part = ModulePart {
            path: String::new(),
            name: "vpc".into(),
            readme: String::new(),
            empty: false,
            inputs: vec![],
            outputs: vec![],
            dependencies: vec![],
            provider_dependencies: vec![],
            resources: vec![],
        };
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["inputs"], serde_json::json!([]));
        assert_eq!(value["provider_dependencies"], serde_json::json!([]));
    }
}
