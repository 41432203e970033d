use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{ModuleIdentity, ModuleProvider, ModuleProviderRedirect};

/// A provider found for a requested identity, with the redirect followed
/// to reach it when the identity is historical.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub provider: ModuleProvider,
    pub redirect: Option<ModuleProviderRedirect>,
}

impl ResolvedProvider {
    #[must_use]
    pub fn was_redirected(&self) -> bool {
        self.redirect.is_some()
    }
}

/// Maps historical (namespace, module, provider) triples to the current
/// module provider.
#[derive(Clone)]
pub struct RedirectResolver {
    store: Arc<dyn Store>,
}

impl RedirectResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// A live provider always wins. Otherwise a redirect is followed one hop
    /// and its last access is recorded; tombstoned redirects resolve to
    /// `NotFound`.
    pub fn resolve(&self, identity: &ModuleIdentity) -> Result<ResolvedProvider> {
        if let Some(provider) = self.store.get_module_provider(identity)? {
            return Ok(ResolvedProvider {
                provider,
                redirect: None,
            });
        }

        let Some(redirect) = self.store.find_redirect(identity)? else {
            return Err(Error::NotFound);
        };
        let Some(target_id) = redirect.to_module_provider_id else {
            debug!("Redirect from {identity} is tombstoned");
            return Err(Error::NotFound);
        };
        let Some(provider) = self.store.get_module_provider_by_id(target_id)? else {
            return Err(Error::NotFound);
        };

        if let Err(e) = self.store.touch_redirect(redirect.id, Utc::now()) {
            warn!("Failed to record access to redirect {}: {e}", redirect.id);
        }
        debug!("Redirected {identity} to {}", provider.identity());
        Ok(ResolvedProvider {
            provider,
            redirect: Some(redirect),
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::store::{NewModuleProvider, SqliteStore, transaction};
    use crate::types::{GitConfig, NamespaceKind};

    fn setup(temp: &TempDir) -> (Arc<dyn Store>, ModuleProvider) {
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        let store: Arc<dyn Store> = Arc::new(store);
        let provider = transaction(&*store, |tx| {
            let ns = tx.create_namespace("acme-corp", None, NamespaceKind::Plain)?;
            let provider = tx.create_module_provider(&NewModuleProvider {
                namespace_id: ns.id,
                module: "vpc".into(),
                provider: "aws".into(),
                verified: false,
                git: GitConfig::default(),
                webhook_secret: None,
            })?;
            tx.create_redirect(&ModuleIdentity::new("acme", "vpc", "aws"), provider.id)?;
            Ok(provider)
        })
        .unwrap();
        (store, provider)
    }

    #[test]
    fn test_live_provider_needs_no_redirect() {
        let temp = TempDir::new().unwrap();
        let (store, provider) = setup(&temp);
        let resolved = RedirectResolver::new(store)
            .resolve(&ModuleIdentity::new("ACME-corp", "vpc", "aws"))
            .unwrap();
        assert_eq!(resolved.provider.id, provider.id);
        assert!(!resolved.was_redirected());
    }

    #[test]
    fn test_redirect_followed_and_touched() {
        let temp = TempDir::new().unwrap();
        let (store, provider) = setup(&temp);
        let old = ModuleIdentity::new("acme", "vpc", "aws");
        assert!(store.find_redirect(&old).unwrap().unwrap().last_access_at.is_none());

        let resolved = RedirectResolver::new(store.clone()).resolve(&old).unwrap();
        assert_eq!(resolved.provider.id, provider.id);
        assert_eq!(resolved.provider.namespace, "acme-corp");
        assert!(resolved.was_redirected());
        assert!(store.find_redirect(&old).unwrap().unwrap().last_access_at.is_some());
    }

    #[test]
    fn test_tombstoned_redirect_not_followed() {
        let temp = TempDir::new().unwrap();
        let (store, provider) = setup(&temp);
        transaction(&*store, |tx| tx.delete_module_provider(provider.id)).unwrap();

        let result = RedirectResolver::new(store).resolve(&ModuleIdentity::new("acme", "vpc", "aws"));
        assert!(matches!(result, Err(Error::NotFound)));
    }

    #[test]
    fn test_unknown_identity() {
        let temp = TempDir::new().unwrap();
        let (store, _) = setup(&temp);
        let result = RedirectResolver::new(store).resolve(&ModuleIdentity::new("nobody", "vpc", "aws"));
        assert!(matches!(result, Err(Error::NotFound)));
    }
}
