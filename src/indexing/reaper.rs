use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::LeaseSettings;
use crate::error::Result;
use crate::storage::{ArchiveTree, StorageEngine, TempDirManager};
use crate::store::Store;
use crate::types::ModuleIdentity;

const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub archive_dirs_removed: usize,
    pub temp_dirs_removed: usize,
    pub skipped_leased: usize,
}

/// Removes archives that no committed version accounts for and temp
/// directories left by crashed jobs.
pub struct Reaper {
    store: Arc<dyn Store>,
    storage: StorageEngine,
    temp: TempDirManager,
    lease: LeaseSettings,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn Store>,
        storage: StorageEngine,
        temp: TempDirManager,
        lease: LeaseSettings,
    ) -> Self {
        Self {
            store,
            storage,
            temp,
            lease,
        }
    }

    pub fn sweep(&self) -> Result<ReapReport> {
        let mut report = ReapReport::default();
        let cutoffs = self.lease.cutoffs(Utc::now());
        let leased: Vec<_> = self
            .store
            .list_leases()?
            .into_iter()
            .filter(|lease| cutoffs.is_live(lease))
            .collect();

        for tree in [ArchiveTree::Modules, ArchiveTree::Upload] {
            let root = self.storage.paths().tree_root(tree);
            for (identity, version, dir) in self.version_dirs(&root)? {
                let is_leased = leased.iter().any(|l| {
                    l.namespace.eq_ignore_ascii_case(&identity.namespace)
                        && l.module == identity.module
                        && l.provider == identity.provider
                        && l.version == version
                });
                if is_leased {
                    report.skipped_leased += 1;
                    continue;
                }
                if self.is_accounted_for(tree, &identity, &version)? {
                    continue;
                }
                info!("Reaping orphan archives in {}", dir.display());
                match self.storage.delete_dir(&dir) {
                    Ok(_) => {
                        report.archive_dirs_removed += 1;
                        self.storage.prune_empty_parents(&dir, &root)?;
                    }
                    Err(e) => warn!("Failed to remove {}: {e}", dir.display()),
                }
            }
        }

        report.temp_dirs_removed = self.temp.sweep_stale(STALE_TEMP_AGE)?;
        info!(
            "Reaper removed {} archive dirs and {} temp dirs",
            report.archive_dirs_removed, report.temp_dirs_removed
        );
        Ok(report)
    }

    /// A version directory is legitimate when a committed row exists whose
    /// publish state matches the tree it sits in.
    fn is_accounted_for(&self, tree: ArchiveTree, identity: &ModuleIdentity, version: &str) -> Result<bool> {
        let Some(provider) = self.store.get_module_provider(identity)? else {
            return Ok(false);
        };
        // Namespace names match case-insensitively; the directory must use the stored case.
        if provider.namespace != identity.namespace {
            return Ok(false);
        }
        let Some(row) = self.store.get_module_version(provider.id, version)? else {
            return Ok(false);
        };
        Ok(row.published == (tree == ArchiveTree::Modules))
    }

    /// `<root>/<ns>/<module>/<provider>/<version>` directories.
    fn version_dirs(&self, root: &Path) -> Result<Vec<(ModuleIdentity, String, std::path::PathBuf)>> {
        let mut found = Vec::new();
        for ns in self.subdirs(root)? {
            for module in self.subdirs(&ns.1)? {
                for provider in self.subdirs(&module.1)? {
                    for version in self.subdirs(&provider.1)? {
                        let identity = ModuleIdentity::new(&ns.0, &module.0, &provider.0);
                        debug!("Checking {identity} {}", version.0);
                        found.push((identity, version.0, version.1));
                    }
                }
            }
        }
        Ok(found)
    }

    fn subdirs(&self, dir: &Path) -> Result<Vec<(String, std::path::PathBuf)>> {
        Ok(self
            .storage
            .list_dir(dir)?
            .into_iter()
            .filter(|e| e.is_dir && !e.is_symlink)
            .map(|e| (e.name, e.path))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::storage::{ArchiveKind, PathBuilder};
    use crate::store::{NewModuleProvider, SqliteStore, VersionWrite, transaction};
    use crate::types::{GitConfig, IndexLease, NamespaceKind};

    struct Fixture {
        _temp: TempDir,
        store: Arc<dyn Store>,
        storage: StorageEngine,
        reaper: Reaper,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("data");
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        let store: Arc<dyn Store> = Arc::new(store);
        let storage = StorageEngine::new(PathBuilder::new(&base, base.join("tmp")));
        let reaper = Reaper::new(
            store.clone(),
            storage.clone(),
            TempDirManager::new(base.join("tmp")),
            LeaseSettings::default(),
        );
        Fixture {
            _temp: temp,
            store,
            storage,
            reaper,
        }
    }

    fn place(fx: &Fixture, tree: ArchiveTree, version: &str) -> std::path::PathBuf {
        let dir = fx
            .storage
            .paths()
            .version_dir(tree, &ModuleIdentity::new("acme", "vpc", "aws"), version)
            .unwrap();
        for kind in ArchiveKind::ALL {
            fx.storage.write_file(&dir.join(kind.file_name()), b"x").unwrap();
        }
        dir
    }

    fn commit(fx: &Fixture, version: &str, published: bool) {
        transaction(&*fx.store, |tx| {
            let ns = match tx.get_namespace_by_name("acme")? {
                Some(ns) => ns,
                None => tx.create_namespace("acme", None, NamespaceKind::Plain)?,
            };
            let identity = ModuleIdentity::new("acme", "vpc", "aws");
            let mp = match tx.get_module_provider(&identity)? {
                Some(mp) => mp,
                None => tx.create_module_provider(&NewModuleProvider {
                    namespace_id: ns.id,
                    module: "vpc".into(),
                    provider: "aws".into(),
                    verified: false,
                    git: GitConfig::default(),
                    webhook_secret: None,
                })?,
            };
            tx.save_module_version(
                mp.id,
                &VersionWrite {
                    version: version.to_string(),
                    published_at: published.then(Utc::now),
                    ..Default::default()
                },
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_removes_orphans_keeps_committed() {
        let fx = fixture();
        commit(&fx, "1.0.0", true);
        commit(&fx, "1.1.0", false);

        let kept = place(&fx, ArchiveTree::Modules, "1.0.0");
        let staged = place(&fx, ArchiveTree::Upload, "1.1.0");
        let wrong_tree = place(&fx, ArchiveTree::Modules, "1.1.0");
        let orphan = place(&fx, ArchiveTree::Modules, "9.9.9");

        let report = fx.reaper.sweep().unwrap();
        assert_eq!(report.archive_dirs_removed, 2);
        assert!(kept.is_dir());
        assert!(staged.is_dir());
        assert!(!wrong_tree.exists());
        assert!(!orphan.exists());
    }

    #[test]
    fn test_skips_leased_targets() {
        let fx = fixture();
        let staging = place(&fx, ArchiveTree::Modules, "2.0.0");
        let now = Utc::now();
        fx.store
            .acquire_lease(
                &IndexLease {
                    namespace: "acme".into(),
                    module: "vpc".into(),
                    provider: "aws".into(),
                    version: "2.0.0".into(),
                    holder: "worker".into(),
                    acquired_at: now,
                    heartbeat_at: now,
                },
                LeaseSettings::default().cutoffs(now),
            )
            .unwrap();

        let report = fx.reaper.sweep().unwrap();
        assert_eq!(report.skipped_leased, 1);
        assert_eq!(report.archive_dirs_removed, 0);
        assert!(staging.is_dir());
    }

    #[test]
    fn test_empty_trees_sweep_cleanly() {
        let fx = fixture();
        assert_eq!(fx.reaper.sweep().unwrap(), ReapReport::default());
    }
}
