mod schema;
mod search;
mod sqlite;
mod tx;

pub use search::{MAX_PAGE_LIMIT, SearchHit, SearchParams, SearchResults, clamp_page};
pub use sqlite::SqliteStore;
pub use tx::transaction;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::types::*;

/// Fields of a new module provider.
#[derive(Debug, Clone)]
pub struct NewModuleProvider {
    pub namespace_id: i64,
    pub module: String,
    pub provider: String,
    pub verified: bool,
    pub git: GitConfig,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DetailsWrite {
    pub readme: Option<Vec<u8>>,
    pub terraform_docs: Option<String>,
    pub infracost: Option<String>,
    pub security_scan: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubmoduleWrite {
    pub path: String,
    pub kind: SubmoduleKind,
    pub details: DetailsWrite,
    /// Example files as (path, content); empty for submodules.
    pub files: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone)]
pub struct FileWrite {
    pub path: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

/// The full graph of one module version. Saving it replaces every child
/// row of an existing version.
#[derive(Debug, Clone, Default)]
pub struct VersionWrite {
    pub version: String,
    pub internal: bool,
    pub published_at: Option<DateTime<Utc>>,
    /// Creation time of a new row; ignored on update, now when unset.
    pub created_at: Option<DateTime<Utc>>,
    pub git_sha: Option<String>,
    pub git_path: Option<String>,
    pub owner: Option<String>,
    pub description: Option<String>,
    pub variable_template: Option<String>,
    pub details: DetailsWrite,
    pub submodules: Vec<SubmoduleWrite>,
    pub files: Vec<FileWrite>,
}

#[derive(Debug, Clone)]
pub struct NewAnalyticsRecord {
    pub module_version_id: i64,
    pub token: Option<String>,
    pub environment: Option<String>,
    pub terraform_version: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Latest use of one analytics token against a module provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenUsage {
    pub token: String,
    pub environment: Option<String>,
    pub terraform_version: Option<String>,
    pub module_version: String,
    pub last_used_at: DateTime<Utc>,
    pub downloads: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlobalStats {
    pub namespaces: i64,
    pub module_providers: i64,
    pub module_versions: i64,
    pub downloads: i64,
}

/// A lease is dead once its heartbeat is older than `heartbeat` or it was
/// acquired before `acquired`.
#[derive(Debug, Clone, Copy)]
pub struct LeaseCutoffs {
    pub heartbeat: DateTime<Utc>,
    pub acquired: DateTime<Utc>,
}

impl LeaseCutoffs {
    #[must_use]
    pub fn is_live(&self, lease: &IndexLease) -> bool {
        lease.heartbeat_at >= self.heartbeat && lease.acquired_at >= self.acquired
    }
}

/// Operations available inside one database transaction.
pub trait StoreTx {
    // Namespace operations
    fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>>;
    fn create_namespace(
        &mut self,
        name: &str,
        display_name: Option<&str>,
        kind: NamespaceKind,
    ) -> Result<Namespace>;
    fn update_namespace(&mut self, ns: &Namespace) -> Result<()>;
    fn delete_namespace(&mut self, id: i64) -> Result<bool>;

    // Module provider operations
    fn get_module_provider(&self, identity: &ModuleIdentity) -> Result<Option<ModuleProvider>>;
    fn get_module_provider_by_id(&self, id: i64) -> Result<Option<ModuleProvider>>;
    fn list_module_providers(&self, namespace_id: Option<i64>) -> Result<Vec<ModuleProvider>>;
    fn create_module_provider(&mut self, new: &NewModuleProvider) -> Result<ModuleProvider>;
    fn update_module_provider(&mut self, provider: &ModuleProvider) -> Result<()>;
    fn delete_module_provider(&mut self, id: i64) -> Result<bool>;

    // Module version operations
    fn get_module_version(&self, provider_id: i64, version: &str) -> Result<Option<ModuleVersion>>;
    fn list_module_versions(&self, provider_id: i64) -> Result<Vec<ModuleVersion>>;
    fn save_module_version(&mut self, provider_id: i64, write: &VersionWrite) -> Result<ModuleVersion>;
    /// `Some(at)` publishes, `None` unpublishes.
    fn set_version_published(&mut self, version_id: i64, published_at: Option<DateTime<Utc>>) -> Result<()>;
    fn delete_module_version(&mut self, version_id: i64) -> Result<bool>;
    /// Recompute and store the provider's latest pointer.
    fn refresh_latest_version(&mut self, provider_id: i64) -> Result<Option<i64>>;

    // Redirect operations
    fn create_redirect(&mut self, from: &ModuleIdentity, to_provider_id: i64) -> Result<ModuleProviderRedirect>;
    fn delete_redirect(&mut self, id: i64) -> Result<bool>;
    fn list_redirects_to(&self, provider_id: i64) -> Result<Vec<ModuleProviderRedirect>>;
}

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    /// Run `f` in one transaction; it commits only when `f` returns `Ok`.
    fn with_tx(&self, f: &mut dyn FnMut(&mut dyn StoreTx) -> Result<()>) -> Result<()>;

    // Namespace operations
    fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>>;
    fn list_namespaces(&self) -> Result<Vec<Namespace>>;

    // Module provider operations
    fn get_module_provider(&self, identity: &ModuleIdentity) -> Result<Option<ModuleProvider>>;
    fn get_module_provider_by_id(&self, id: i64) -> Result<Option<ModuleProvider>>;
    fn list_module_providers(&self, namespace_id: Option<i64>) -> Result<Vec<ModuleProvider>>;

    // Module version operations
    fn get_module_version(&self, provider_id: i64, version: &str) -> Result<Option<ModuleVersion>>;
    fn get_module_version_by_id(&self, id: i64) -> Result<Option<ModuleVersion>>;
    fn list_module_versions(&self, provider_id: i64) -> Result<Vec<ModuleVersion>>;
    fn get_module_details(&self, id: i64) -> Result<Option<ModuleDetails>>;
    fn list_submodules(&self, version_id: i64) -> Result<Vec<Submodule>>;
    fn list_example_files(&self, submodule_id: i64) -> Result<Vec<ExampleFile>>;
    fn list_module_version_files(&self, version_id: i64) -> Result<Vec<ModuleVersionFile>>;
    fn get_module_version_file(&self, version_id: i64, path: &str) -> Result<Option<ModuleVersionFile>>;

    // Query operations
    fn search_modules(&self, params: &SearchParams) -> Result<SearchResults>;

    // Redirect operations
    fn find_redirect(&self, identity: &ModuleIdentity) -> Result<Option<ModuleProviderRedirect>>;
    fn touch_redirect(&self, id: i64, at: DateTime<Utc>) -> Result<()>;
    fn list_redirects_to(&self, provider_id: i64) -> Result<Vec<ModuleProviderRedirect>>;

    // Analytics operations
    fn record_download(&self, record: &NewAnalyticsRecord) -> Result<i64>;
    fn count_provider_downloads(&self, provider_id: i64) -> Result<i64>;
    fn count_version_downloads(&self, version_id: i64) -> Result<i64>;
    fn list_token_usage(&self, provider_id: i64) -> Result<Vec<TokenUsage>>;
    fn global_stats(&self) -> Result<GlobalStats>;

    // Lease operations
    /// Insert `lease`, replacing a dead one. A live lease yields `Conflict`.
    fn acquire_lease(&self, lease: &IndexLease, cutoffs: LeaseCutoffs) -> Result<()>;
    fn heartbeat_lease(&self, lease: &IndexLease, at: DateTime<Utc>) -> Result<bool>;
    fn release_lease(&self, lease: &IndexLease) -> Result<bool>;
    fn list_leases(&self) -> Result<Vec<IndexLease>>;

    // Token operations
    fn create_token(&self, token: &Token) -> Result<()>;
    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>>;
    fn list_tokens(&self) -> Result<Vec<Token>>;
    fn delete_token(&self, id: &str) -> Result<bool>;
    fn update_token_last_used(&self, id: &str) -> Result<()>;
    fn has_admin_token(&self) -> Result<bool>;
}
