use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::sqlite;
use super::{NewModuleProvider, Store, StoreTx, VersionWrite};
use crate::error::{Error, Result};
use crate::types::*;

/// Transaction handle handed to `Store::with_tx` callbacks.
pub(super) struct SqliteTx<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteTx<'c> {
    pub(super) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl StoreTx for SqliteTx<'_> {
    fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>> {
        sqlite::get_namespace_by_name(self.conn, name)
    }

    fn create_namespace(
        &mut self,
        name: &str,
        display_name: Option<&str>,
        kind: NamespaceKind,
    ) -> Result<Namespace> {
        sqlite::create_namespace(self.conn, name, display_name, kind)
    }

    fn update_namespace(&mut self, ns: &Namespace) -> Result<()> {
        sqlite::update_namespace(self.conn, ns)
    }

    fn delete_namespace(&mut self, id: i64) -> Result<bool> {
        sqlite::delete_namespace(self.conn, id)
    }

    fn get_module_provider(&self, identity: &ModuleIdentity) -> Result<Option<ModuleProvider>> {
        sqlite::get_module_provider(self.conn, identity)
    }

    fn get_module_provider_by_id(&self, id: i64) -> Result<Option<ModuleProvider>> {
        sqlite::get_module_provider_by_id(self.conn, id)
    }

    fn list_module_providers(&self, namespace_id: Option<i64>) -> Result<Vec<ModuleProvider>> {
        sqlite::list_module_providers(self.conn, namespace_id)
    }

    fn create_module_provider(&mut self, new: &NewModuleProvider) -> Result<ModuleProvider> {
        sqlite::create_module_provider(self.conn, new)
    }

    fn update_module_provider(&mut self, provider: &ModuleProvider) -> Result<()> {
        sqlite::update_module_provider(self.conn, provider)
    }

    fn delete_module_provider(&mut self, id: i64) -> Result<bool> {
        sqlite::delete_module_provider(self.conn, id)
    }

    fn get_module_version(&self, provider_id: i64, version: &str) -> Result<Option<ModuleVersion>> {
        sqlite::get_module_version(self.conn, provider_id, version)
    }

    fn list_module_versions(&self, provider_id: i64) -> Result<Vec<ModuleVersion>> {
        sqlite::list_module_versions(self.conn, provider_id)
    }

    fn save_module_version(&mut self, provider_id: i64, write: &VersionWrite) -> Result<ModuleVersion> {
        sqlite::save_module_version(self.conn, provider_id, write)
    }

    fn set_version_published(&mut self, version_id: i64, published_at: Option<DateTime<Utc>>) -> Result<()> {
        sqlite::set_version_published(self.conn, version_id, published_at)
    }

    fn delete_module_version(&mut self, version_id: i64) -> Result<bool> {
        sqlite::delete_module_version(self.conn, version_id)
    }

    fn refresh_latest_version(&mut self, provider_id: i64) -> Result<Option<i64>> {
        sqlite::refresh_latest_version(self.conn, provider_id)
    }

    fn create_redirect(&mut self, from: &ModuleIdentity, to_provider_id: i64) -> Result<ModuleProviderRedirect> {
        sqlite::create_redirect(self.conn, from, to_provider_id)
    }

    fn delete_redirect(&mut self, id: i64) -> Result<bool> {
        sqlite::delete_redirect(self.conn, id)
    }

    fn list_redirects_to(&self, provider_id: i64) -> Result<Vec<ModuleProviderRedirect>> {
        sqlite::list_redirects_to(self.conn, provider_id)
    }
}

/// Run `f` in a transaction on `store` and hand back its value.
pub fn transaction<T>(
    store: &(impl Store + ?Sized),
    mut f: impl FnMut(&mut dyn StoreTx) -> Result<T>,
) -> Result<T> {
    let mut out = None;
    store.with_tx(&mut |tx| {
        out = Some(f(tx)?);
        Ok(())
    })?;
    out.ok_or_else(|| Error::Config("transaction produced no value".into()))
}
