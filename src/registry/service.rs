use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::hosting::{DeletionPolicy, DownloadSource, HostingPolicy};
use super::redirect::{RedirectResolver, ResolvedProvider};
use super::signing::UrlSigner;
use crate::error::{Error, Result};
use crate::git::{TagFormat, render_url_template};
use crate::indexing::{
    IndexOptions, IndexOutcome, IndexSource, IndexTarget, IndexingPipeline, LeaseGuard,
};
use crate::storage::{ArchiveKind, ArchiveTree, StorageEngine, normalize_relative};
use crate::store::{NewModuleProvider, Store, StoreTx, transaction};
use crate::types::validation::{
    validate_module_name, validate_namespace_name, validate_provider_name,
};
use crate::types::version::parse_version;
use crate::types::{
    GitConfig, ModuleIdentity, ModuleProvider, ModuleProviderRedirect, ModuleVersion,
    ModuleVersionFile, Namespace, NamespaceKind,
};

pub const LATEST: &str = "latest";

#[derive(Debug, Clone, Default)]
pub struct RegistrySettings {
    pub auto_create_namespace: bool,
    /// Publication state of versions indexed from git.
    pub auto_publish: bool,
    /// Prefix of download URLs handed to clients; relative when unset.
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderFields {
    pub verified: bool,
    pub git: GitConfig,
    pub webhook_secret: Option<String>,
}

/// Partial update of a module provider; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProviderUpdate {
    pub verified: Option<bool>,
    pub git: Option<GitConfig>,
    pub webhook_secret: Option<Option<String>>,
}

/// Everything the download endpoint needs to answer.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub provider: ModuleProvider,
    pub version: ModuleVersion,
    pub source: DownloadSource,
    /// Value of `X-Terraform-Get`.
    pub url: String,
}

/// Registry path of a hosted archive, e.g. `/v1/tfhost/modules/acme/vpc/aws/1.0.0/source.zip`.
#[must_use]
pub fn archive_url_path(identity: &ModuleIdentity, version: &str, kind: ArchiveKind) -> String {
    format!(
        "/v1/tfhost/modules/{}/{}/{}/{}/{}",
        identity.namespace,
        identity.module,
        identity.provider,
        version,
        kind.file_name()
    )
}

fn validate_identity(identity: &ModuleIdentity) -> Result<()> {
    validate_namespace_name(&identity.namespace)?;
    validate_module_name(&identity.module)?;
    validate_provider_name(&identity.provider)
}

fn trimmed_path(path: Option<&str>) -> Option<&str> {
    path.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty())
}

/// Directory moves made inside a transaction, reverted if it fails.
#[derive(Default)]
struct Relocations {
    done: Vec<(PathBuf, PathBuf)>,
}

impl Relocations {
    fn relocate(&mut self, storage: &StorageEngine, src: PathBuf, dst: PathBuf) -> Result<()> {
        if !storage.dir_exists(&src)? {
            return Ok(());
        }
        storage.move_dir(&src, &dst)?;
        self.done.push((src, dst));
        Ok(())
    }

    fn undo(self, storage: &StorageEngine) {
        for (src, dst) in self.done.into_iter().rev() {
            if let Err(e) = storage.move_dir(&dst, &src) {
                error!("Failed to move {} back to {}: {e}", dst.display(), src.display());
            }
        }
    }

    fn prune_sources(&self, storage: &StorageEngine) {
        for (src, _) in &self.done {
            for tree in [ArchiveTree::Modules, ArchiveTree::Upload] {
                let root = storage.paths().tree_root(tree);
                if src.starts_with(&root) {
                    let _ = storage.prune_empty_parents(src, &root);
                }
            }
        }
    }
}

/// Module lifecycle on top of the store, the storage tree and the indexing
/// pipeline.
pub struct ModuleRegistry {
    store: Arc<dyn Store>,
    storage: StorageEngine,
    pipeline: Arc<IndexingPipeline>,
    resolver: RedirectResolver,
    hosting: HostingPolicy,
    deletion: DeletionPolicy,
    signer: UrlSigner,
    settings: RegistrySettings,
}

impl ModuleRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        storage: StorageEngine,
        pipeline: Arc<IndexingPipeline>,
        hosting: HostingPolicy,
        deletion: DeletionPolicy,
        signer: UrlSigner,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            resolver: RedirectResolver::new(store.clone()),
            store,
            storage,
            pipeline,
            hosting,
            deletion,
            signer,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn hosting(&self) -> &HostingPolicy {
        &self.hosting
    }

    pub fn resolver(&self) -> &RedirectResolver {
        &self.resolver
    }

    pub fn pipeline(&self) -> &Arc<IndexingPipeline> {
        &self.pipeline
    }

    /// Fail with `Conflict` while any version of `provider` is being indexed.
    fn ensure_not_indexing(&self, provider: &ModuleProvider) -> Result<()> {
        let cutoffs = self.pipeline.settings().lease.cutoffs(Utc::now());
        let busy = self.store.list_leases()?.into_iter().any(|lease| {
            cutoffs.is_live(&lease)
                && lease.namespace.eq_ignore_ascii_case(&provider.namespace)
                && lease.module == provider.module
                && lease.provider == provider.provider
        });
        if busy {
            return Err(Error::Conflict(format!(
                "{} is being indexed",
                provider.identity()
            )));
        }
        Ok(())
    }

    /// Hold the indexing lease of one version for the duration of a state
    /// change, so it cannot interleave with a running index of that version.
    fn claim_version(&self, provider: &ModuleProvider, version: &str, action: &str) -> Result<LeaseGuard> {
        LeaseGuard::claim(
            self.store.clone(),
            &IndexTarget::new(provider.identity(), version),
            &format!("tfhost-{}-{action}", std::process::id()),
            self.pipeline.settings().lease,
        )
    }

    fn provider(&self, identity: &ModuleIdentity) -> Result<ModuleProvider> {
        self.store.get_module_provider(identity)?.ok_or(Error::NotFound)
    }

    // Namespaces

    pub fn create_namespace(
        &self,
        name: &str,
        display_name: Option<&str>,
        kind: NamespaceKind,
    ) -> Result<Namespace> {
        validate_namespace_name(name)?;
        let ns = transaction(&*self.store, |tx| tx.create_namespace(name, display_name, kind))?;
        info!("Created namespace {}", ns.name);
        Ok(ns)
    }

    /// Rename a namespace, leaving a redirect behind for each of its module
    /// providers and moving their archives.
    pub fn rename_namespace(&self, name: &str, new_name: &str) -> Result<Namespace> {
        validate_namespace_name(new_name)?;
        let ns = self.store.get_namespace_by_name(name)?.ok_or(Error::NotFound)?;
        let providers = self.store.list_module_providers(Some(ns.id))?;
        for provider in &providers {
            self.ensure_not_indexing(provider)?;
        }

        let case_only = ns.name.eq_ignore_ascii_case(new_name);
        let mut moves = Relocations::default();
        let result = transaction(&*self.store, |tx| {
            let mut renamed = ns.clone();
            renamed.name = new_name.to_string();
            tx.update_namespace(&renamed)?;
            if !case_only {
                for provider in &providers {
                    let from = provider.identity();
                    tx.create_redirect(&from, provider.id)?;
                }
            }
            for tree in [ArchiveTree::Modules, ArchiveTree::Upload] {
                let paths = self.storage.paths();
                moves.relocate(
                    &self.storage,
                    paths.namespace_dir(tree, &ns.name)?,
                    paths.namespace_dir(tree, new_name)?,
                )?;
            }
            Ok(renamed)
        });

        match result {
            Ok(renamed) => {
                info!("Renamed namespace {} to {}", ns.name, renamed.name);
                Ok(renamed)
            }
            Err(e) => {
                moves.undo(&self.storage);
                Err(e)
            }
        }
    }

    /// Only empty namespaces may be deleted.
    pub fn delete_namespace(&self, name: &str) -> Result<()> {
        let ns = self.store.get_namespace_by_name(name)?.ok_or(Error::NotFound)?;
        transaction(&*self.store, |tx| tx.delete_namespace(ns.id))?;
        for tree in [ArchiveTree::Modules, ArchiveTree::Upload] {
            let dir = self.storage.paths().namespace_dir(tree, &ns.name)?;
            if let Err(e) = self.storage.delete_dir(&dir) {
                warn!("Failed to remove {}: {e}", dir.display());
            }
        }
        info!("Deleted namespace {}", ns.name);
        Ok(())
    }

    // Module providers

    fn namespace_for(&self, tx: &mut dyn StoreTx, name: &str) -> Result<Namespace> {
        match tx.get_namespace_by_name(name)? {
            Some(ns) => Ok(ns),
            None if self.settings.auto_create_namespace => {
                info!("Creating namespace {name}");
                tx.create_namespace(name, None, NamespaceKind::Plain)
            }
            None => Err(Error::NotFound),
        }
    }

    pub fn create_module_provider(
        &self,
        identity: &ModuleIdentity,
        fields: ProviderFields,
    ) -> Result<ModuleProvider> {
        validate_identity(identity)?;
        TagFormat::parse_or_default(fields.git.git_tag_format.as_deref())?;
        if let Some(path) = fields.git.git_path.as_deref() {
            normalize_relative(path)?;
        }

        let provider = transaction(&*self.store, |tx| {
            let ns = self.namespace_for(tx, &identity.namespace)?;
            tx.create_module_provider(&NewModuleProvider {
                namespace_id: ns.id,
                module: identity.module.clone(),
                provider: identity.provider.clone(),
                verified: fields.verified,
                git: fields.git.clone(),
                webhook_secret: fields.webhook_secret.clone(),
            })
        })?;
        info!("Created module provider {}", provider.identity());
        Ok(provider)
    }

    pub fn update_module_provider(
        &self,
        identity: &ModuleIdentity,
        update: ProviderUpdate,
    ) -> Result<ModuleProvider> {
        let mut provider = self.provider(identity)?;
        if let Some(verified) = update.verified {
            provider.verified = verified;
        }
        if let Some(git) = update.git {
            TagFormat::parse_or_default(git.git_tag_format.as_deref())?;
            if let Some(path) = git.git_path.as_deref() {
                normalize_relative(path)?;
            }
            provider.git = git;
        }
        if let Some(secret) = update.webhook_secret {
            provider.webhook_secret = secret;
        }
        transaction(&*self.store, |tx| tx.update_module_provider(&provider))?;
        Ok(provider)
    }

    /// Move a module provider to a new identity. The old identity redirects
    /// to the moved provider.
    pub fn move_module_provider(
        &self,
        identity: &ModuleIdentity,
        to: &ModuleIdentity,
    ) -> Result<ModuleProvider> {
        validate_identity(to)?;
        let provider = self.provider(identity)?;
        self.ensure_not_indexing(&provider)?;
        let from = provider.identity();
        if from.namespace.eq_ignore_ascii_case(&to.namespace)
            && from.module == to.module
            && from.provider == to.provider
        {
            return Err(Error::BadRequest("module provider is already at that location".into()));
        }

        let mut moves = Relocations::default();
        let result = transaction(&*self.store, |tx| {
            let ns = self.namespace_for(tx, &to.namespace)?;
            let mut moved = provider.clone();
            moved.namespace_id = ns.id;
            moved.namespace = ns.name.clone();
            moved.module = to.module.clone();
            moved.provider = to.provider.clone();
            tx.update_module_provider(&moved)?;
            tx.create_redirect(&from, moved.id)?;

            let paths = self.storage.paths();
            for tree in [ArchiveTree::Modules, ArchiveTree::Upload] {
                moves.relocate(
                    &self.storage,
                    paths.module_provider_dir(tree, &from)?,
                    paths.module_provider_dir(tree, &moved.identity())?,
                )?;
            }
            Ok(moved)
        });

        match result {
            Ok(moved) => {
                moves.prune_sources(&self.storage);
                info!("Moved module provider {from} to {}", moved.identity());
                Ok(moved)
            }
            Err(e) => {
                moves.undo(&self.storage);
                Err(e)
            }
        }
    }

    /// Delete a provider with all versions. Redirects pointing at it are
    /// tombstoned; recently used redirects block deletion unless `force`.
    pub fn delete_module_provider(&self, identity: &ModuleIdentity, force: bool) -> Result<()> {
        let provider = self.provider(identity)?;
        self.ensure_not_indexing(&provider)?;
        let redirects = self.store.list_redirects_to(provider.id)?;
        self.deletion.check(&redirects, force, Utc::now())?;

        transaction(&*self.store, |tx| tx.delete_module_provider(provider.id))?;

        let identity = provider.identity();
        for tree in [ArchiveTree::Modules, ArchiveTree::Upload] {
            let root = self.storage.paths().tree_root(tree);
            let dir = self.storage.paths().module_provider_dir(tree, &identity)?;
            match self.storage.delete_dir(&dir) {
                Ok(_) => {
                    let _ = self.storage.prune_empty_parents(&dir, &root);
                }
                Err(e) => warn!("Failed to remove {}: {e}", dir.display()),
            }
        }
        info!("Deleted module provider {identity}");
        Ok(())
    }

    // Redirects

    pub fn list_redirects(&self, identity: &ModuleIdentity) -> Result<Vec<ModuleProviderRedirect>> {
        let provider = self.provider(identity)?;
        self.store.list_redirects_to(provider.id)
    }

    /// Point `from` at the provider named by `identity`.
    pub fn create_redirect(
        &self,
        identity: &ModuleIdentity,
        from: &ModuleIdentity,
    ) -> Result<ModuleProviderRedirect> {
        validate_identity(from)?;
        let provider = self.provider(identity)?;
        transaction(&*self.store, |tx| tx.create_redirect(from, provider.id))
    }

    pub fn delete_redirect(&self, identity: &ModuleIdentity, redirect_id: i64) -> Result<()> {
        let provider = self.provider(identity)?;
        let owned = self
            .store
            .list_redirects_to(provider.id)?
            .iter()
            .any(|r| r.id == redirect_id);
        if !owned {
            return Err(Error::NotFound);
        }
        transaction(&*self.store, |tx| tx.delete_redirect(redirect_id))?;
        Ok(())
    }

    // Indexing

    /// Index an uploaded archive and publish it.
    pub async fn upload_version(
        &self,
        identity: &ModuleIdentity,
        version: &str,
        archive: Bytes,
        cancel: &CancellationToken,
    ) -> Result<IndexOutcome> {
        self.hosting.check_upload()?;
        self.pipeline
            .index(
                IndexTarget::new(identity.clone(), version),
                IndexSource::UploadedArchive(archive),
                IndexOptions { publish: true },
                cancel,
            )
            .await
    }

    /// Index `version` from the provider's git clone URL.
    pub async fn import_version(
        &self,
        identity: &ModuleIdentity,
        version: &str,
        cancel: &CancellationToken,
    ) -> Result<IndexOutcome> {
        parse_version(version)?;
        let provider = self.provider(identity)?;
        let Some(template) = provider.git.repo_clone_url_template.as_deref() else {
            return Err(Error::BadRequest(format!(
                "module provider {identity} has no git clone URL"
            )));
        };
        let tag = TagFormat::parse_or_default(provider.git.git_tag_format.as_deref())?.render(version)?;
        let url = render_url_template(template, &provider.identity(), Some(&tag), None);
        self.pipeline
            .index(
                IndexTarget::new(provider.identity(), version),
                IndexSource::GitRef { url, git_ref: tag },
                IndexOptions {
                    publish: self.settings.auto_publish,
                },
                cancel,
            )
            .await
    }

    // Versions

    fn version_of(&self, provider: &ModuleProvider, version: &str) -> Result<ModuleVersion> {
        self.store
            .get_module_version(provider.id, version)?
            .ok_or(Error::NotFound)
    }

    /// Move a version between the staging and canonical trees while flipping
    /// its publication state and the latest pointer in one transaction.
    fn set_published(&self, identity: &ModuleIdentity, version: &str, publish: bool) -> Result<ModuleVersion> {
        let provider = self.provider(identity)?;
        let _lease = self.claim_version(&provider, version, if publish { "publish" } else { "unpublish" })?;
        let current = self.version_of(&provider, version)?;
        if current.published == publish {
            return Ok(current);
        }
        let identity = provider.identity();
        let (from_tree, to_tree) = if publish {
            (ArchiveTree::Upload, ArchiveTree::Modules)
        } else {
            (ArchiveTree::Modules, ArchiveTree::Upload)
        };
        let paths = self.storage.paths();
        let src = paths.version_dir(from_tree, &identity, version)?;
        let dst = paths.version_dir(to_tree, &identity, version)?;

        let mut moves = Relocations::default();
        let result = transaction(&*self.store, |tx| {
            tx.set_version_published(current.id, publish.then(Utc::now))?;
            tx.refresh_latest_version(provider.id)?;
            if self.storage.dir_exists(&dst)? {
                warn!("Replacing stray archives at {}", dst.display());
                self.storage.delete_dir(&dst)?;
            }
            moves.relocate(&self.storage, src.clone(), dst.clone())?;
            tx.get_module_version(provider.id, version)?.ok_or(Error::NotFound)
        });

        match result {
            Ok(updated) => {
                moves.prune_sources(&self.storage);
                info!(
                    "{} {identity} {version}",
                    if publish { "Published" } else { "Unpublished" }
                );
                Ok(updated)
            }
            Err(e) => {
                moves.undo(&self.storage);
                Err(e)
            }
        }
    }

    pub fn publish_version(&self, identity: &ModuleIdentity, version: &str) -> Result<ModuleVersion> {
        self.set_published(identity, version, true)
    }

    pub fn unpublish_version(&self, identity: &ModuleIdentity, version: &str) -> Result<ModuleVersion> {
        self.set_published(identity, version, false)
    }

    /// Delete a version row and its archives. Archives left behind by a
    /// failed removal are swept by the reaper.
    pub fn delete_version(&self, identity: &ModuleIdentity, version: &str) -> Result<()> {
        let provider = self.provider(identity)?;
        let _lease = self.claim_version(&provider, version, "delete")?;
        let current = self.version_of(&provider, version)?;
        transaction(&*self.store, |tx| {
            tx.delete_module_version(current.id)?;
            tx.refresh_latest_version(provider.id)
        })?;

        let identity = provider.identity();
        for tree in [ArchiveTree::Modules, ArchiveTree::Upload] {
            let root = self.storage.paths().tree_root(tree);
            let dir = self.storage.paths().version_dir(tree, &identity, version)?;
            match self.storage.delete_dir(&dir) {
                Ok(true) => {
                    let _ = self.storage.prune_empty_parents(&dir, &root);
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to remove {}: {e}", dir.display()),
            }
        }
        info!("Deleted {identity} {version}");
        Ok(())
    }

    /// Resolve a provider through redirects and a published version of it;
    /// `latest` follows the stored pointer.
    pub fn resolve_version(
        &self,
        identity: &ModuleIdentity,
        version: &str,
    ) -> Result<(ResolvedProvider, ModuleVersion)> {
        let resolved = self.resolver.resolve(identity)?;
        let found = if version == LATEST {
            match resolved.provider.latest_version_id {
                Some(id) => self.store.get_module_version_by_id(id)?,
                None => None,
            }
        } else {
            self.store.get_module_version(resolved.provider.id, version)?
        };
        match found {
            Some(v) if v.published => Ok((resolved, v)),
            _ => Err(Error::NotFound),
        }
    }

    /// Upstream go-getter URL of a version, e.g.
    /// `git::https://example.com/vpc.git//modules/x?ref=v1.0.0`.
    pub fn git_source_url(&self, provider: &ModuleProvider, version: &ModuleVersion) -> Result<Option<String>> {
        let Some(template) = provider.git.repo_clone_url_template.as_deref() else {
            return Ok(None);
        };
        let tag = TagFormat::parse_or_default(provider.git.git_tag_format.as_deref())?
            .render(&version.version)?;
        let clone = render_url_template(template, &provider.identity(), Some(&tag), None);
        let mut url = if clone.starts_with("git::") {
            clone
        } else {
            format!("git::{clone}")
        };
        if let Some(path) = trimmed_path(version.git_path.as_deref().or(provider.git.git_path.as_deref())) {
            url.push_str("//");
            url.push_str(path);
        }
        url.push_str("?ref=");
        url.push_str(&urlencoding::encode(&tag));
        Ok(Some(url))
    }

    /// Browse URL of a version's source, hidden under enforced hosting.
    pub fn browse_url(&self, provider: &ModuleProvider, version: &ModuleVersion) -> Result<Option<String>> {
        if !self.hosting.exposes_source_urls() {
            return Ok(None);
        }
        let template = provider
            .git
            .repo_browse_url_template
            .as_deref()
            .or(provider.git.repo_base_url_template.as_deref());
        let Some(template) = template else {
            return Ok(None);
        };
        let tag = TagFormat::parse_or_default(provider.git.git_tag_format.as_deref())?
            .render(&version.version)?;
        Ok(Some(render_url_template(
            template,
            &provider.identity(),
            Some(&tag),
            trimmed_path(version.git_path.as_deref()),
        )))
    }

    fn local_download_url(&self, provider: &ModuleProvider, version: &ModuleVersion) -> Result<String> {
        let path = archive_url_path(&provider.identity(), &version.version, ArchiveKind::Zip);
        let query = self.signer.signed_query(&path, Utc::now())?;
        let base = self
            .settings
            .public_base_url
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/');
        let subdir = if provider.git.archive_git_path {
            trimmed_path(version.git_path.as_deref().or(provider.git.git_path.as_deref()))
                .map(|p| format!("//{p}"))
                .unwrap_or_default()
        } else {
            String::new()
        };
        Ok(format!("{base}{path}{subdir}?{query}"))
    }

    fn has_archive(&self, provider: &ModuleProvider, version: &str) -> Result<bool> {
        let path = self
            .storage
            .paths()
            .archive_path(&provider.identity(), version, ArchiveKind::Zip)?;
        self.storage.file_exists(&path)
    }

    /// Resolve the `X-Terraform-Get` target of a version.
    pub fn download(&self, identity: &ModuleIdentity, version: &str) -> Result<DownloadTarget> {
        let (resolved, version) = self.resolve_version(identity, version)?;
        let provider = resolved.provider;
        let has_archive = self.has_archive(&provider, &version.version)?;
        let git_url = self.git_source_url(&provider, &version)?;
        let source = self.hosting.download_source(has_archive, git_url)?;
        let url = match &source {
            DownloadSource::Local => self.local_download_url(&provider, &version)?,
            DownloadSource::Git(url) => url.clone(),
        };
        Ok(DownloadTarget {
            provider,
            version,
            source,
            url,
        })
    }

    /// Check a signed archive request and open the archive for streaming.
    pub async fn signed_archive(
        &self,
        identity: &ModuleIdentity,
        version: &str,
        kind: ArchiveKind,
        expires: i64,
        signature: &str,
    ) -> Result<(tokio::fs::File, u64)> {
        if self.hosting.mode() == crate::types::HostingMode::Disallow {
            return Err(Error::HostingDisabled("module hosting is disabled".into()));
        }
        self.signer.verify(
            &archive_url_path(identity, version, kind),
            expires,
            signature,
            Utc::now(),
        )?;
        let provider = self.provider(identity)?;
        if !self.version_of(&provider, version)?.published {
            return Err(Error::NotFound);
        }
        let path = self
            .storage
            .paths()
            .archive_path(&provider.identity(), version, kind)?;
        self.storage.open_read(&path).await
    }

    /// A stored additional file of a published version.
    pub fn version_file(
        &self,
        identity: &ModuleIdentity,
        version: &str,
        path: &str,
    ) -> Result<ModuleVersionFile> {
        let path = normalize_relative(path)?;
        let (_, version) = self.resolve_version(identity, version)?;
        self.store
            .get_module_version_file(version.id, &path)?
            .ok_or(Error::NotFound)
    }
}
