use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::IndexTarget;
use crate::error::{Error, Result};
use crate::store::{LeaseCutoffs, Store};
use crate::types::IndexLease;

/// Liveness windows of indexing leases.
#[derive(Debug, Clone, Copy)]
pub struct LeaseSettings {
    /// A lease whose heartbeat is older than this is dead.
    pub heartbeat_timeout: Duration,
    /// A lease acquired longer ago than this is dead regardless of heartbeats.
    pub max_age: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            max_age: Duration::from_secs(30 * 60),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

impl LeaseSettings {
    #[must_use]
    pub fn cutoffs(&self, now: DateTime<Utc>) -> LeaseCutoffs {
        let span = |d: Duration| chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX);
        LeaseCutoffs {
            heartbeat: now - span(self.heartbeat_timeout),
            acquired: now - span(self.max_age),
        }
    }
}

/// Holds an indexing lease and keeps it alive. Releasing is idempotent and
/// also happens on drop.
pub struct LeaseGuard {
    store: Arc<dyn Store>,
    lease: IndexLease,
    released: AtomicBool,
    heartbeat: Option<JoinHandle<()>>,
}

impl LeaseGuard {
    /// Claim `target` for `holder`. A live lease held by anyone yields `Conflict`.
    pub async fn acquire(
        store: Arc<dyn Store>,
        target: &IndexTarget,
        holder: &str,
        settings: LeaseSettings,
    ) -> Result<Self> {
        let now = Utc::now();
        let lease = lease_row(target, holder, now);

        let claim = {
            let store = store.clone();
            let lease = lease.clone();
            tokio::task::spawn_blocking(move || store.acquire_lease(&lease, settings.cutoffs(now)))
        };
        claim
            .await
            .map_err(|e| Error::Conflict(format!("lease acquisition aborted: {e}")))??;
        info!("Acquired index lease on {target}");

        let heartbeat = tokio::spawn(heartbeat_loop(
            store.clone(),
            lease.clone(),
            settings.heartbeat_interval,
        ));

        Ok(Self {
            store,
            lease,
            released: AtomicBool::new(false),
            heartbeat: Some(heartbeat),
        })
    }

    /// Claim `target` for a short synchronous mutation. No heartbeat runs, so
    /// the guard must be dropped well within the heartbeat timeout.
    pub fn claim(
        store: Arc<dyn Store>,
        target: &IndexTarget,
        holder: &str,
        settings: LeaseSettings,
    ) -> Result<Self> {
        let now = Utc::now();
        let lease = lease_row(target, holder, now);
        store.acquire_lease(&lease, settings.cutoffs(now))?;
        debug!("Claimed {target} for {holder}");
        Ok(Self {
            store,
            lease,
            released: AtomicBool::new(false),
            heartbeat: None,
        })
    }

    pub fn lease(&self) -> &IndexLease {
        &self.lease
    }

    pub fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
        if !self.store.release_lease(&self.lease)? {
            warn!(
                "Index lease on {}/{}/{} {} was already gone at release",
                self.lease.namespace, self.lease.module, self.lease.provider, self.lease.version
            );
        }
        debug!("Released index lease held by {}", self.lease.holder);
        Ok(())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release index lease: {e}");
        }
    }
}

fn lease_row(target: &IndexTarget, holder: &str, now: DateTime<Utc>) -> IndexLease {
    IndexLease {
        namespace: target.identity.namespace.clone(),
        module: target.identity.module.clone(),
        provider: target.identity.provider.clone(),
        version: target.version.clone(),
        holder: holder.to_string(),
        acquired_at: now,
        heartbeat_at: now,
    }
}

async fn heartbeat_loop(store: Arc<dyn Store>, lease: IndexLease, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let store = store.clone();
        let beat = lease.clone();
        let result =
            tokio::task::spawn_blocking(move || store.heartbeat_lease(&beat, Utc::now())).await;
        match result {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                warn!("Index lease held by {} was lost", lease.holder);
                return;
            }
            Ok(Err(e)) => warn!("Failed to heartbeat index lease: {e}"),
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::store::SqliteStore;
    use crate::types::ModuleIdentity;

    fn store(temp: &TempDir) -> Arc<dyn Store> {
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        Arc::new(store)
    }

    fn target(version: &str) -> IndexTarget {
        IndexTarget::new(ModuleIdentity::new("acme", "vpc", "aws"), version)
    }

    #[tokio::test]
    async fn test_second_acquire_conflicts() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let settings = LeaseSettings::default();

        let first = LeaseGuard::acquire(store.clone(), &target("1.0.0"), "a", settings)
            .await
            .unwrap();
        let second = LeaseGuard::acquire(store.clone(), &target("1.0.0"), "b", settings).await;
        assert!(matches!(second, Err(Error::Conflict(_))));

        let other = LeaseGuard::acquire(store.clone(), &target("1.1.0"), "b", settings).await;
        assert!(other.is_ok());

        first.release().unwrap();
        first.release().unwrap();
        LeaseGuard::acquire(store.clone(), &target("1.0.0"), "b", settings)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        {
            let _guard = LeaseGuard::acquire(store.clone(), &target("1.0.0"), "a", LeaseSettings::default())
                .await
                .unwrap();
            assert_eq!(store.list_leases().unwrap().len(), 1);
        }
        assert!(store.list_leases().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_lease_alive() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let settings = LeaseSettings {
            heartbeat_timeout: Duration::from_millis(300),
            max_age: Duration::from_secs(60),
            heartbeat_interval: Duration::from_millis(50),
        };

        let _guard = LeaseGuard::acquire(store.clone(), &target("1.0.0"), "a", settings)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let stolen = LeaseGuard::acquire(store.clone(), &target("1.0.0"), "b", settings).await;
        assert!(matches!(stolen, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_claim_excludes_running_index() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let settings = LeaseSettings::default();

        let indexing = LeaseGuard::acquire(store.clone(), &target("1.0.0"), "pipeline", settings)
            .await
            .unwrap();
        let claim = LeaseGuard::claim(store.clone(), &target("1.0.0"), "unpublish", settings);
        assert!(matches!(claim, Err(Error::Conflict(_))));
        indexing.release().unwrap();

        let claim = LeaseGuard::claim(store.clone(), &target("1.0.0"), "unpublish", settings).unwrap();
        let index = LeaseGuard::acquire(store.clone(), &target("1.0.0"), "pipeline", settings).await;
        assert!(matches!(index, Err(Error::Conflict(_))));
        drop(claim);
        assert!(store.list_leases().unwrap().is_empty());
    }
}
