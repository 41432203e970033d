use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::lease::{LeaseGuard, LeaseSettings};
use super::{IndexOptions, IndexOutcome, IndexSource, IndexTarget};
use crate::archive::{ArchiveBuilder, BuiltArchives, unpack_upload};
use crate::error::{Error, Result};
use crate::extractor::{AnalyzedModule, ExtractedModule, ModuleExtractor};
use crate::git::GitFetcher;
use crate::storage::{ArchiveKind, ArchiveTree, StorageEngine, TempDirHandle, TempDirManager, safe_join};
use crate::store::{
    DetailsWrite, FileWrite, NewModuleProvider, Store, StoreTx, SubmoduleWrite, VersionWrite,
    transaction,
};
use crate::types::{
    GitConfig, HostingMode, ModuleIdentity, ModuleProvider, NamespaceKind,
    ReindexMode, SubmoduleKind,
};

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub hosting: HostingMode,
    pub reindex_mode: ReindexMode,
    pub allow_empty_root: bool,
    pub auto_create_namespace: bool,
    pub auto_create_module_provider: bool,
    pub lease: LeaseSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            hosting: HostingMode::Allow,
            reindex_mode: ReindexMode::Legacy,
            allow_empty_root: false,
            auto_create_namespace: true,
            auto_create_module_provider: true,
            lease: LeaseSettings::default(),
        }
    }
}

/// Runs `Index(target, source)`: lease, fetch, extract, archive and commit.
pub struct IndexingPipeline {
    store: Arc<dyn Store>,
    storage: StorageEngine,
    temp: TempDirManager,
    fetcher: GitFetcher,
    extractor: ModuleExtractor,
    archives: ArchiveBuilder,
    settings: PipelineSettings,
    holder: String,
}

impl IndexingPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        storage: StorageEngine,
        temp: TempDirManager,
        fetcher: GitFetcher,
        extractor: ModuleExtractor,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            archives: ArchiveBuilder::new(storage.clone()),
            store,
            storage,
            temp,
            fetcher,
            extractor,
            settings,
            holder: format!("tfhost-{}-{}", std::process::id(), Uuid::new_v4()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn index(
        &self,
        target: IndexTarget,
        source: IndexSource,
        options: IndexOptions,
        cancel: &CancellationToken,
    ) -> Result<IndexOutcome> {
        target.validate()?;
        if matches!(source, IndexSource::UploadedArchive(_))
            && self.settings.hosting == HostingMode::Disallow
        {
            return Err(Error::HostingDisabled("module uploads are disabled".into()));
        }
        let provider = self.preflight(&target)?;

        let lease = LeaseGuard::acquire(
            self.store.clone(),
            &target,
            &self.holder,
            self.settings.lease,
        )
        .await?;
        let workspace = self
            .temp
            .allocate(&format!("index-{}-{}", target.identity.module, target.version))?;

        info!("Indexing {target} from {source:?}");
        let result = self
            .run(&target, source, options, provider.as_ref(), &workspace, cancel)
            .await;

        if let Err(e) = workspace.release() {
            warn!("Failed to remove processing dir {}: {e}", workspace.path().display());
        }
        if let Err(e) = lease.release() {
            warn!("Failed to release index lease on {target}: {e}");
        }

        match &result {
            Ok(outcome) => info!(
                "Indexed {target} (published: {}, reindexed: {})",
                outcome.version.published, outcome.reindexed
            ),
            Err(e) if e.is_retryable() => warn!("Indexing {target} failed, safe to retry: {e}"),
            Err(e) => info!("Indexing {target} rejected: {e}"),
        }
        result
    }

    /// Checks that need no lease: the provider may be auto-created and a
    /// prohibited reindex fails fast.
    fn preflight(&self, target: &IndexTarget) -> Result<Option<ModuleProvider>> {
        let provider = self.store.get_module_provider(&target.identity)?;
        match &provider {
            Some(provider) => {
                if self.settings.reindex_mode == ReindexMode::Prohibit
                    && self
                        .store
                        .get_module_version(provider.id, &target.version)?
                        .is_some()
                {
                    return Err(reindex_prohibited(target));
                }
            }
            None => {
                if !self.settings.auto_create_module_provider {
                    return Err(Error::NotFound);
                }
                if !self.settings.auto_create_namespace
                    && self
                        .store
                        .get_namespace_by_name(&target.identity.namespace)?
                        .is_none()
                {
                    return Err(Error::NotFound);
                }
            }
        }
        Ok(provider)
    }

    async fn run(
        &self,
        target: &IndexTarget,
        source: IndexSource,
        options: IndexOptions,
        provider: Option<&ModuleProvider>,
        workspace: &TempDirHandle,
        cancel: &CancellationToken,
    ) -> Result<IndexOutcome> {
        let source_dir = workspace.path().join("source");
        let git = provider.map(|p| p.git.clone()).unwrap_or_default();

        let fetched = match source {
            IndexSource::UploadedArchive(data) => {
                let storage = self.storage.clone();
                let dest = source_dir.clone();
                let count = tokio::task::spawn_blocking(move || {
                    storage.make_dir(&dest)?;
                    unpack_upload(&storage, &data, &dest)
                })
                .await
                .map_err(|e| Error::ArchiveFailed(format!("unpack task failed: {e}")))??;
                info!("Unpacked {count} files for {target}");
                None
            }
            IndexSource::GitRef { url, git_ref } => Some(
                self.fetcher
                    .clone_ref(&url, &git_ref, &source_dir, cancel)
                    .await?,
            ),
        };

        let git_path = git
            .git_path
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let module_root = match &git_path {
            Some(sub) => safe_join(&source_dir, &[sub.as_str()])?,
            None => source_dir.clone(),
        };
        if !self.storage.dir_exists(&module_root)? {
            return Err(Error::extraction(
                format!("module path '{}' does not exist in the source", git_path.unwrap_or_default()),
                "",
            ));
        }

        let extracted = self.extractor.extract(&module_root, cancel).await?;
        if extracted.is_rejected_as_empty(self.settings.allow_empty_root) {
            return Err(Error::extraction(
                "module root contains no Terraform files",
                "",
            ));
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let plan = self.plan_commit(target, options.publish)?;
        let mtime = fetched
            .as_ref()
            .and_then(|f| f.commit_time)
            .or(plan.published_at)
            .unwrap_or(plan.created_at);
        let archive_root = if git.archive_git_path { None } else { git_path.clone() };
        let archives = {
            let builder = self.archives.clone();
            let root = source_dir.clone();
            tokio::task::spawn_blocking(move || builder.build(&root, archive_root.as_deref(), mtime))
                .await
                .map_err(|e| Error::ArchiveFailed(format!("archive task failed: {e}")))??
        };

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut write = version_write(
            &target.version,
            extracted,
            fetched.map(|f| f.commit_sha),
            git_path,
        )?;
        write.published_at = plan.published_at;
        write.internal = plan.internal;
        write.created_at = (!plan.reindexed).then_some(plan.created_at);

        let job = CommitJob {
            store: self.store.clone(),
            storage: self.storage.clone(),
            settings: self.settings,
            target: target.clone(),
            plan,
            write,
            archives,
            stash: workspace.path().join("previous"),
        };
        tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| Error::ArchiveFailed(format!("commit task failed: {e}")))?
    }

    /// Decide where the version lands and its publication time before any
    /// archive is built. The lease keeps the version row stable until commit.
    fn plan_commit(&self, target: &IndexTarget, publish: bool) -> Result<CommitPlan> {
        let now = Utc::now();
        let provider = self.store.get_module_provider(&target.identity)?;
        let existing = match &provider {
            Some(provider) => self.store.get_module_version(provider.id, &target.version)?,
            None => None,
        };
        let identity = match &provider {
            Some(provider) => provider.identity(),
            None => match self.store.get_namespace_by_name(&target.identity.namespace)? {
                Some(ns) => ModuleIdentity::new(
                    ns.name,
                    &target.identity.module,
                    &target.identity.provider,
                ),
                None => target.identity.clone(),
            },
        };

        let published_at = match &existing {
            None => publish.then_some(now),
            Some(existing) => {
                let published = match self.settings.reindex_mode {
                    ReindexMode::Prohibit => return Err(reindex_prohibited(target)),
                    ReindexMode::Legacy => existing.published || publish,
                    ReindexMode::AutoPublish => true,
                };
                match (published, existing.published_at) {
                    (false, _) => None,
                    (true, Some(at)) => Some(at),
                    (true, None) => Some(now),
                }
            }
        };

        Ok(CommitPlan {
            identity,
            published_at,
            created_at: existing.as_ref().map_or(now, |v| v.created_at),
            internal: existing.as_ref().is_some_and(|v| v.internal),
            reindexed: existing.is_some(),
        })
    }
}

fn reindex_prohibited(target: &IndexTarget) -> Error {
    Error::ReindexProhibited(format!("{target} already exists"))
}

fn details_of(module: &AnalyzedModule) -> DetailsWrite {
    DetailsWrite {
        readme: module.record.readme.clone(),
        terraform_docs: Some(module.terraform_docs.clone()),
        infracost: None,
        security_scan: None,
    }
}

fn version_write(
    version: &str,
    extracted: ExtractedModule,
    git_sha: Option<String>,
    git_path: Option<String>,
) -> Result<VersionWrite> {
    let variable_template = extracted
        .metadata
        .variable_template
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::extraction(format!("invalid variable template: {e}"), ""))?;

    let mut submodules: Vec<SubmoduleWrite> = extracted
        .submodules
        .iter()
        .map(|s| SubmoduleWrite {
            path: s.path.clone(),
            kind: SubmoduleKind::Submodule,
            details: details_of(&s.module),
            files: Vec::new(),
        })
        .collect();
    submodules.extend(extracted.examples.iter().map(|e| SubmoduleWrite {
        path: e.path.clone(),
        kind: SubmoduleKind::Example,
        details: details_of(&e.module),
        files: e.files.clone(),
    }));

    Ok(VersionWrite {
        version: version.to_string(),
        internal: false,
        published_at: None,
        created_at: None,
        git_sha,
        git_path,
        owner: extracted.metadata.owner.clone(),
        description: extracted.metadata.description.clone(),
        variable_template,
        details: details_of(&extracted.root),
        submodules,
        files: extracted
            .additional_files
            .into_iter()
            .map(|f| FileWrite {
                path: f.path,
                content: f.content,
                content_type: f.content_type,
            })
            .collect(),
    })
}

/// Publication decisions made before archives are built.
#[derive(Debug, Clone)]
struct CommitPlan {
    /// Identity as stored, which fixes the on-disk location.
    identity: ModuleIdentity,
    published_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    internal: bool,
    reindexed: bool,
}

/// The blocking tail of the pipeline: archives are written first, then the
/// metadata commits. Every filesystem change is undone when either fails.
struct CommitJob {
    store: Arc<dyn Store>,
    storage: StorageEngine,
    settings: PipelineSettings,
    target: IndexTarget,
    plan: CommitPlan,
    write: VersionWrite,
    archives: BuiltArchives,
    stash: PathBuf,
}

#[derive(Default)]
struct FsChanges {
    /// (original dir, stashed dir) for archives leaving their tree.
    stashed: Vec<(PathBuf, PathBuf)>,
    /// (archive, saved copy) for archives replaced in place.
    backups: Vec<(PathBuf, PathBuf)>,
    written: Vec<PathBuf>,
}

impl CommitJob {
    fn run(self) -> Result<IndexOutcome> {
        let mut changes = FsChanges::default();
        if let Err(e) = self.store_archives(&mut changes) {
            self.undo(changes, &e);
            return Err(e);
        }

        let result = transaction(&*self.store, |tx| {
            let provider = self.ensure_provider(tx)?;
            let version = tx.save_module_version(provider.id, &self.write)?;
            let latest = tx.refresh_latest_version(provider.id)?;
            Ok(IndexOutcome {
                version,
                latest_version_id: latest,
                reindexed: self.plan.reindexed,
            })
        });

        if let Err(e) = &result {
            self.undo(changes, e);
        }
        result
    }

    fn ensure_provider(&self, tx: &mut dyn StoreTx) -> Result<ModuleProvider> {
        let identity = &self.target.identity;
        if let Some(provider) = tx.get_module_provider(identity)? {
            return Ok(provider);
        }
        if !self.settings.auto_create_module_provider {
            return Err(Error::NotFound);
        }
        let namespace = match tx.get_namespace_by_name(&identity.namespace)? {
            Some(ns) => ns,
            None if self.settings.auto_create_namespace => {
                info!("Creating namespace {}", identity.namespace);
                tx.create_namespace(&identity.namespace, None, NamespaceKind::Plain)?
            }
            None => return Err(Error::NotFound),
        };
        info!("Creating module provider {identity}");
        tx.create_module_provider(&NewModuleProvider {
            namespace_id: namespace.id,
            module: identity.module.clone(),
            provider: identity.provider.clone(),
            verified: false,
            git: GitConfig::default(),
            webhook_secret: None,
        })
    }

    /// Place the new archives in the tree matching the planned publication
    /// state. Archives in the other tree are stashed; archives replaced in
    /// place stay readable until the atomic rename swaps them.
    fn store_archives(&self, changes: &mut FsChanges) -> Result<()> {
        let paths = self.storage.paths();
        let identity = &self.plan.identity;
        let version = &self.target.version;
        let target_tree = if self.plan.published_at.is_some() {
            ArchiveTree::Modules
        } else {
            ArchiveTree::Upload
        };

        for (tree, name) in [(ArchiveTree::Modules, "modules"), (ArchiveTree::Upload, "upload")] {
            let dir = paths.version_dir(tree, identity, version)?;
            if !self.storage.dir_exists(&dir)? {
                continue;
            }
            let stash = self.stash.join(name);
            if tree == target_tree {
                for kind in ArchiveKind::ALL {
                    let path = dir.join(kind.file_name());
                    if self.storage.file_exists(&path)? {
                        let saved = stash.join(kind.file_name());
                        self.storage.copy_file(&path, &saved)?;
                        changes.backups.push((path, saved));
                    }
                }
            } else {
                self.storage.move_dir(&dir, &stash)?;
                changes.stashed.push((dir, stash));
            }
        }

        let dir = paths.version_dir(target_tree, identity, version)?;
        for (kind, body) in [
            (ArchiveKind::TarGz, &self.archives.tar_gz),
            (ArchiveKind::Zip, &self.archives.zip),
        ] {
            let path = dir.join(kind.file_name());
            changes.written.push(path.clone());
            self.storage.write_file(&path, body)?;
        }
        Ok(())
    }

    fn undo(&self, changes: FsChanges, cause: &Error) {
        if changes.written.is_empty() && changes.stashed.is_empty() && changes.backups.is_empty() {
            return;
        }
        error!(
            "Rolling back archives of {} after failure: {cause}",
            self.target
        );
        for path in &changes.written {
            if changes.backups.iter().any(|(original, _)| original == path) {
                continue;
            }
            if let Err(e) = self.storage.delete_file(path) {
                error!("Failed to remove orphan archive {}: {e}", path.display());
            }
            if let Some(parent) = path.parent() {
                remove_if_empty(&self.storage, parent);
            }
        }
        for (original, saved) in &changes.backups {
            if let Err(e) = self.storage.move_file(saved, original) {
                error!("Failed to restore archive {}: {e}", original.display());
            }
        }
        for (dir, stash) in changes.stashed.iter().rev() {
            if let Err(e) = self.storage.move_dir(stash, dir) {
                error!("Failed to restore archives of {}: {e}", dir.display());
            }
        }
    }
}

fn remove_if_empty(storage: &StorageEngine, dir: &Path) {
    if storage.list_dir(dir).is_ok_and(|entries| entries.is_empty()) {
        let _ = storage.delete_dir(dir);
    }
}
