use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NamespaceKind, SubmoduleKind};

/// (namespace, module, provider) triple naming a module provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub namespace: String,
    pub module: String,
    pub provider: String,
}

impl ModuleIdentity {
    pub fn new(
        namespace: impl Into<String>,
        module: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            module: module.into(),
            provider: provider.into(),
        }
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.module, self.provider)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub kind: NamespaceKind,
    pub created_at: DateTime<Utc>,
}

/// Git settings of a module provider. Templates may reference
/// `{namespace}`, `{module}` and `{provider}`; browse templates also take
/// `{tag}` and `{path}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_base_url_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_clone_url_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_browse_url_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_tag_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_path: Option<String>,
    #[serde(default)]
    pub archive_git_path: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleProvider {
    pub id: i64,
    pub namespace_id: i64,
    /// Namespace name, materialised by the store alongside the row.
    pub namespace: String,
    pub module: String,
    pub provider: String,
    pub verified: bool,
    #[serde(flatten)]
    pub git: GitConfig,
    #[serde(skip)]
    pub webhook_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ModuleProvider {
    #[must_use]
    pub fn identity(&self) -> ModuleIdentity {
        ModuleIdentity::new(&self.namespace, &self.module, &self.provider)
    }
}

/// Externally visible lifecycle state of a committed version row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionState {
    Published,
    Unpublished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub id: i64,
    pub module_provider_id: i64,
    pub version: String,
    pub beta: bool,
    pub internal: bool,
    pub published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_template: Option<String>,
    #[serde(skip)]
    pub module_details_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModuleVersion {
    #[must_use]
    pub fn state(&self) -> VersionState {
        if self.published {
            VersionState::Published
        } else {
            VersionState::Unpublished
        }
    }
}

/// Extracted artifacts for a module version, submodule or example.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleDetails {
    pub id: i64,
    pub readme: Option<Vec<u8>>,
    pub terraform_docs: Option<String>,
    pub infracost: Option<String>,
    pub security_scan: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submodule {
    pub id: i64,
    pub module_version_id: i64,
    pub path: String,
    pub kind: SubmoduleKind,
    #[serde(skip)]
    pub module_details_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ExampleFile {
    pub id: i64,
    pub submodule_id: i64,
    pub path: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ModuleVersionFile {
    pub id: i64,
    pub module_version_id: i64,
    pub path: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleProviderRedirect {
    pub id: i64,
    pub namespace: String,
    pub module: String,
    pub provider: String,
    /// `None` once the target provider is deleted; tombstoned redirects are
    /// never followed.
    pub to_module_provider_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_access_at: Option<DateTime<Utc>>,
}

impl ModuleProviderRedirect {
    #[must_use]
    pub fn from_identity(&self) -> ModuleIdentity {
        ModuleIdentity::new(&self.namespace, &self.module, &self.provider)
    }

    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.to_module_provider_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub id: i64,
    pub module_version_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexLease {
    pub namespace: String,
    pub module: String,
    pub provider: String,
    pub version: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(skip)]
    pub token_hash: String,
    #[serde(skip)]
    pub token_lookup: String,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}
