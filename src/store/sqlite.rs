use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use super::schema::SCHEMA;
use super::search;
use super::tx::SqliteTx;
use super::*;
use crate::error::{Error, Result};
use crate::types::version::{VersionCandidate, is_beta, parse_version, select_latest};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(super) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

/// Fixed-width UTC timestamps so stored values also compare lexically.
pub(super) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_column<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn opt_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row.get::<_, Option<String>>(idx)?.map(|s| parse_datetime(&s)))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// Row mappers

const NAMESPACE_COLUMNS: &str = "id, name, display_name, kind, created_at";

fn namespace_from_row(row: &Row<'_>) -> rusqlite::Result<Namespace> {
    Ok(Namespace {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        kind: parse_column(3, row.get(3)?)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

pub(super) const PROVIDER_SELECT: &str = "SELECT mp.id, mp.namespace_id, ns.name, mp.module, mp.provider, mp.verified,
        mp.repo_base_url_template, mp.repo_clone_url_template, mp.repo_browse_url_template,
        mp.git_tag_format, mp.git_path, mp.archive_git_path, mp.webhook_secret,
        mp.latest_version_id, mp.created_at
     FROM module_providers mp JOIN namespaces ns ON ns.id = mp.namespace_id";

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<ModuleProvider> {
    Ok(ModuleProvider {
        id: row.get(0)?,
        namespace_id: row.get(1)?,
        namespace: row.get(2)?,
        module: row.get(3)?,
        provider: row.get(4)?,
        verified: row.get(5)?,
        git: GitConfig {
            repo_base_url_template: row.get(6)?,
            repo_clone_url_template: row.get(7)?,
            repo_browse_url_template: row.get(8)?,
            git_tag_format: row.get(9)?,
            git_path: row.get(10)?,
            archive_git_path: row.get(11)?,
        },
        webhook_secret: row.get(12)?,
        latest_version_id: row.get(13)?,
        created_at: parse_datetime(&row.get::<_, String>(14)?),
    })
}

const VERSION_COLUMNS: &str = "id, module_provider_id, version, beta, internal, published, published_at,
        git_sha, git_path, owner, description, variable_template, module_details_id,
        created_at, updated_at";

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<ModuleVersion> {
    Ok(ModuleVersion {
        id: row.get(0)?,
        module_provider_id: row.get(1)?,
        version: row.get(2)?,
        beta: row.get(3)?,
        internal: row.get(4)?,
        published: row.get(5)?,
        published_at: opt_datetime(row, 6)?,
        git_sha: row.get(7)?,
        git_path: row.get(8)?,
        owner: row.get(9)?,
        description: row.get(10)?,
        variable_template: row.get(11)?,
        module_details_id: row.get(12)?,
        created_at: parse_datetime(&row.get::<_, String>(13)?),
        updated_at: parse_datetime(&row.get::<_, String>(14)?),
    })
}

const REDIRECT_COLUMNS: &str =
    "id, namespace, module, provider, to_module_provider_id, created_at, last_access_at";

fn redirect_from_row(row: &Row<'_>) -> rusqlite::Result<ModuleProviderRedirect> {
    Ok(ModuleProviderRedirect {
        id: row.get(0)?,
        namespace: row.get(1)?,
        module: row.get(2)?,
        provider: row.get(3)?,
        to_module_provider_id: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        last_access_at: opt_datetime(row, 6)?,
    })
}

const LEASE_COLUMNS: &str =
    "namespace, module, provider, version, holder, acquired_at, heartbeat_at";

fn lease_from_row(row: &Row<'_>) -> rusqlite::Result<IndexLease> {
    Ok(IndexLease {
        namespace: row.get(0)?,
        module: row.get(1)?,
        provider: row.get(2)?,
        version: row.get(3)?,
        holder: row.get(4)?,
        acquired_at: parse_datetime(&row.get::<_, String>(5)?),
        heartbeat_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

const TOKEN_COLUMNS: &str =
    "id, token_hash, token_lookup, is_admin, description, created_at, expires_at, last_used_at";

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        is_admin: row.get(3)?,
        description: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        expires_at: opt_datetime(row, 6)?,
        last_used_at: opt_datetime(row, 7)?,
    })
}

// Queries shared by the store and its transactions

pub(super) fn get_namespace_by_name(conn: &Connection, name: &str) -> Result<Option<Namespace>> {
    conn.query_row(
        &format!("SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE name = ?1"),
        params![name],
        namespace_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub(super) fn create_namespace(
    conn: &Connection,
    name: &str,
    display_name: Option<&str>,
    kind: NamespaceKind,
) -> Result<Namespace> {
    let now = Utc::now();
    let result = conn.execute(
        "INSERT INTO namespaces (name, display_name, kind, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![name, display_name, kind.as_str(), format_datetime(&now)],
    );
    match result {
        Ok(_) => Ok(Namespace {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            display_name: display_name.map(str::to_string),
            kind,
            created_at: now,
        }),
        Err(e) if is_unique_violation(&e) => Err(Error::AlreadyExists),
        Err(e) => Err(Error::from(e)),
    }
}

pub(super) fn update_namespace(conn: &Connection, ns: &Namespace) -> Result<()> {
    let result = conn.execute(
        "UPDATE namespaces SET name = ?1, display_name = ?2, kind = ?3 WHERE id = ?4",
        params![ns.name, ns.display_name, ns.kind.as_str(), ns.id],
    );
    match result {
        Ok(0) => Err(Error::NotFound),
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(Error::AlreadyExists),
        Err(e) => Err(Error::from(e)),
    }
}

pub(super) fn delete_namespace(conn: &Connection, id: i64) -> Result<bool> {
    let providers: i64 = conn.query_row(
        "SELECT COUNT(*) FROM module_providers WHERE namespace_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    if providers > 0 {
        return Err(Error::Conflict("namespace still contains module providers".into()));
    }
    let rows = conn.execute("DELETE FROM namespaces WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

pub(super) fn get_module_provider(
    conn: &Connection,
    identity: &ModuleIdentity,
) -> Result<Option<ModuleProvider>> {
    conn.query_row(
        &format!("{PROVIDER_SELECT} WHERE ns.name = ?1 AND mp.module = ?2 AND mp.provider = ?3"),
        params![identity.namespace, identity.module, identity.provider],
        provider_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub(super) fn get_module_provider_by_id(conn: &Connection, id: i64) -> Result<Option<ModuleProvider>> {
    conn.query_row(
        &format!("{PROVIDER_SELECT} WHERE mp.id = ?1"),
        params![id],
        provider_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub(super) fn list_module_providers(
    conn: &Connection,
    namespace_id: Option<i64>,
) -> Result<Vec<ModuleProvider>> {
    let mut stmt = conn.prepare(&format!(
        "{PROVIDER_SELECT} WHERE ?1 IS NULL OR mp.namespace_id = ?1
         ORDER BY ns.name, mp.module, mp.provider"
    ))?;
    let rows = stmt.query_map(params![namespace_id], provider_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// A live provider supersedes any redirect from the same identity.
fn clear_redirects_from(conn: &Connection, namespace_id: i64, module: &str, provider: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM module_provider_redirects
         WHERE namespace = (SELECT name FROM namespaces WHERE id = ?1) AND module = ?2 AND provider = ?3",
        params![namespace_id, module, provider],
    )?;
    Ok(())
}

pub(super) fn create_module_provider(
    conn: &Connection,
    new: &NewModuleProvider,
) -> Result<ModuleProvider> {
    let result = conn.execute(
        "INSERT INTO module_providers (namespace_id, module, provider, verified,
            repo_base_url_template, repo_clone_url_template, repo_browse_url_template,
            git_tag_format, git_path, archive_git_path, webhook_secret, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            new.namespace_id,
            new.module,
            new.provider,
            new.verified,
            new.git.repo_base_url_template,
            new.git.repo_clone_url_template,
            new.git.repo_browse_url_template,
            new.git.git_tag_format,
            new.git.git_path,
            new.git.archive_git_path,
            new.webhook_secret,
            format_datetime(&Utc::now()),
        ],
    );
    match result {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => return Err(Error::AlreadyExists),
        Err(e) => return Err(Error::from(e)),
    }
    let id = conn.last_insert_rowid();
    clear_redirects_from(conn, new.namespace_id, &new.module, &new.provider)?;
    get_module_provider_by_id(conn, id)?.ok_or(Error::NotFound)
}

pub(super) fn update_module_provider(conn: &Connection, provider: &ModuleProvider) -> Result<()> {
    let result = conn.execute(
        "UPDATE module_providers SET namespace_id = ?1, module = ?2, provider = ?3, verified = ?4,
            repo_base_url_template = ?5, repo_clone_url_template = ?6, repo_browse_url_template = ?7,
            git_tag_format = ?8, git_path = ?9, archive_git_path = ?10, webhook_secret = ?11
         WHERE id = ?12",
        params![
            provider.namespace_id,
            provider.module,
            provider.provider,
            provider.verified,
            provider.git.repo_base_url_template,
            provider.git.repo_clone_url_template,
            provider.git.repo_browse_url_template,
            provider.git.git_tag_format,
            provider.git.git_path,
            provider.git.archive_git_path,
            provider.webhook_secret,
            provider.id,
        ],
    );
    match result {
        Ok(0) => Err(Error::NotFound),
        Ok(_) => clear_redirects_from(conn, provider.namespace_id, &provider.module, &provider.provider),
        Err(e) if is_unique_violation(&e) => Err(Error::AlreadyExists),
        Err(e) => Err(Error::from(e)),
    }
}

/// Remove the details, submodules, examples and files owned by a version.
fn delete_version_children(conn: &Connection, version_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM module_details WHERE id IN
            (SELECT module_details_id FROM submodules WHERE module_version_id = ?1)",
        params![version_id],
    )?;
    conn.execute("DELETE FROM submodules WHERE module_version_id = ?1", params![version_id])?;
    conn.execute(
        "DELETE FROM module_version_files WHERE module_version_id = ?1",
        params![version_id],
    )?;
    conn.execute(
        "DELETE FROM module_details WHERE id =
            (SELECT module_details_id FROM module_versions WHERE id = ?1)",
        params![version_id],
    )?;
    Ok(())
}

pub(super) fn delete_module_provider(conn: &Connection, id: i64) -> Result<bool> {
    for version in list_module_versions(conn, id)? {
        delete_version_children(conn, version.id)?;
    }
    conn.execute(
        "UPDATE module_providers SET latest_version_id = NULL WHERE id = ?1",
        params![id],
    )?;
    let rows = conn.execute("DELETE FROM module_providers WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

pub(super) fn get_module_version(
    conn: &Connection,
    provider_id: i64,
    version: &str,
) -> Result<Option<ModuleVersion>> {
    conn.query_row(
        &format!(
            "SELECT {VERSION_COLUMNS} FROM module_versions
             WHERE module_provider_id = ?1 AND version = ?2"
        ),
        params![provider_id, version],
        version_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub(super) fn get_module_version_by_id(conn: &Connection, id: i64) -> Result<Option<ModuleVersion>> {
    conn.query_row(
        &format!("SELECT {VERSION_COLUMNS} FROM module_versions WHERE id = ?1"),
        params![id],
        version_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub(super) fn list_module_versions(conn: &Connection, provider_id: i64) -> Result<Vec<ModuleVersion>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VERSION_COLUMNS} FROM module_versions WHERE module_provider_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![provider_id], version_from_row)?;
    let mut versions = rows
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)?;
    // Newest first by semver precedence.
    versions.sort_by(|a, b| match (parse_version(&a.version), parse_version(&b.version)) {
        (Ok(va), Ok(vb)) => vb.cmp_precedence(&va),
        _ => b.version.cmp(&a.version),
    });
    Ok(versions)
}

fn insert_details(conn: &Connection, details: &DetailsWrite) -> Result<i64> {
    conn.execute(
        "INSERT INTO module_details (readme, terraform_docs, infracost, security_scan)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            details.readme,
            details.terraform_docs,
            details.infracost,
            details.security_scan,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(super) fn save_module_version(
    conn: &Connection,
    provider_id: i64,
    write: &VersionWrite,
) -> Result<ModuleVersion> {
    let beta = is_beta(&parse_version(&write.version)?);
    let published = write.published_at.is_some();
    let now = format_datetime(&Utc::now());
    let published_at = write.published_at.as_ref().map(format_datetime);

    let existing = get_module_version(conn, provider_id, &write.version)?;
    if let Some(existing) = &existing {
        delete_version_children(conn, existing.id)?;
    }
    let details_id = insert_details(conn, &write.details)?;

    let version_id = match existing {
        Some(existing) => {
            conn.execute(
                "UPDATE module_versions SET beta = ?1, internal = ?2, published = ?3, published_at = ?4,
                    git_sha = ?5, git_path = ?6, owner = ?7, description = ?8, variable_template = ?9,
                    module_details_id = ?10, updated_at = ?11
                 WHERE id = ?12",
                params![
                    beta,
                    write.internal,
                    published,
                    published_at,
                    write.git_sha,
                    write.git_path,
                    write.owner,
                    write.description,
                    write.variable_template,
                    details_id,
                    now,
                    existing.id,
                ],
            )?;
            existing.id
        }
        None => {
            conn.execute(
                "INSERT INTO module_versions (module_provider_id, version, beta, internal, published,
                    published_at, git_sha, git_path, owner, description, variable_template,
                    module_details_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    provider_id,
                    write.version,
                    beta,
                    write.internal,
                    published,
                    published_at,
                    write.git_sha,
                    write.git_path,
                    write.owner,
                    write.description,
                    write.variable_template,
                    details_id,
                    write.created_at.as_ref().map_or_else(|| now.clone(), format_datetime),
                    now,
                ],
            )?;
            conn.last_insert_rowid()
        }
    };

    for submodule in &write.submodules {
        let details_id = insert_details(conn, &submodule.details)?;
        conn.execute(
            "INSERT INTO submodules (module_version_id, path, kind, module_details_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![version_id, submodule.path, submodule.kind.as_str(), details_id],
        )?;
        let submodule_id = conn.last_insert_rowid();
        for (path, content) in &submodule.files {
            conn.execute(
                "INSERT INTO example_files (submodule_id, path, content) VALUES (?1, ?2, ?3)",
                params![submodule_id, path, content],
            )?;
        }
    }

    for file in &write.files {
        conn.execute(
            "INSERT INTO module_version_files (module_version_id, path, content, content_type)
             VALUES (?1, ?2, ?3, ?4)",
            params![version_id, file.path, file.content, file.content_type],
        )?;
    }

    get_module_version_by_id(conn, version_id)?.ok_or(Error::NotFound)
}

pub(super) fn set_version_published(
    conn: &Connection,
    version_id: i64,
    published_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let rows = conn.execute(
        "UPDATE module_versions SET published = ?1, published_at = ?2, updated_at = ?3 WHERE id = ?4",
        params![
            published_at.is_some(),
            published_at.as_ref().map(format_datetime),
            format_datetime(&Utc::now()),
            version_id,
        ],
    )?;
    if rows == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}

pub(super) fn delete_module_version(conn: &Connection, version_id: i64) -> Result<bool> {
    delete_version_children(conn, version_id)?;
    let rows = conn.execute("DELETE FROM module_versions WHERE id = ?1", params![version_id])?;
    Ok(rows > 0)
}

pub(super) fn refresh_latest_version(conn: &Connection, provider_id: i64) -> Result<Option<i64>> {
    let candidates: Vec<VersionCandidate<i64>> = list_module_versions(conn, provider_id)?
        .into_iter()
        .filter_map(|v| {
            Some(VersionCandidate {
                key: v.id,
                version: parse_version(&v.version).ok()?,
                published: v.published,
                published_at: v.published_at,
            })
        })
        .collect();
    let latest = select_latest(&candidates);
    conn.execute(
        "UPDATE module_providers SET latest_version_id = ?1 WHERE id = ?2",
        params![latest, provider_id],
    )?;
    Ok(latest)
}

pub(super) fn create_redirect(
    conn: &Connection,
    from: &ModuleIdentity,
    to_provider_id: i64,
) -> Result<ModuleProviderRedirect> {
    if get_module_provider(conn, from)?.is_some() {
        return Err(Error::Conflict(format!(
            "a module provider named {from} already exists"
        )));
    }
    conn.execute(
        "INSERT INTO module_provider_redirects (namespace, module, provider, to_module_provider_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(namespace, module, provider)
         DO UPDATE SET to_module_provider_id = excluded.to_module_provider_id",
        params![
            from.namespace,
            from.module,
            from.provider,
            to_provider_id,
            format_datetime(&Utc::now()),
        ],
    )?;
    find_redirect(conn, from)?.ok_or(Error::NotFound)
}

pub(super) fn find_redirect(
    conn: &Connection,
    identity: &ModuleIdentity,
) -> Result<Option<ModuleProviderRedirect>> {
    conn.query_row(
        &format!(
            "SELECT {REDIRECT_COLUMNS} FROM module_provider_redirects
             WHERE namespace = ?1 AND module = ?2 AND provider = ?3"
        ),
        params![identity.namespace, identity.module, identity.provider],
        redirect_from_row,
    )
    .optional()
    .map_err(Error::from)
}

pub(super) fn delete_redirect(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM module_provider_redirects WHERE id = ?1",
        params![id],
    )?;
    Ok(rows > 0)
}

pub(super) fn list_redirects_to(
    conn: &Connection,
    provider_id: i64,
) -> Result<Vec<ModuleProviderRedirect>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REDIRECT_COLUMNS} FROM module_provider_redirects
         WHERE to_module_provider_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![provider_id], redirect_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn with_tx(&self, f: &mut dyn FnMut(&mut dyn StoreTx) -> Result<()>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        f(&mut SqliteTx::new(&tx))?;
        tx.commit()?;
        Ok(())
    }

    // Namespace operations

    fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>> {
        get_namespace_by_name(&self.conn(), name)
    }

    fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NAMESPACE_COLUMNS} FROM namespaces ORDER BY name"
        ))?;
        let rows = stmt.query_map([], namespace_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Module provider operations

    fn get_module_provider(&self, identity: &ModuleIdentity) -> Result<Option<ModuleProvider>> {
        get_module_provider(&self.conn(), identity)
    }

    fn get_module_provider_by_id(&self, id: i64) -> Result<Option<ModuleProvider>> {
        get_module_provider_by_id(&self.conn(), id)
    }

    fn list_module_providers(&self, namespace_id: Option<i64>) -> Result<Vec<ModuleProvider>> {
        list_module_providers(&self.conn(), namespace_id)
    }

    // Module version operations

    fn get_module_version(&self, provider_id: i64, version: &str) -> Result<Option<ModuleVersion>> {
        get_module_version(&self.conn(), provider_id, version)
    }

    fn get_module_version_by_id(&self, id: i64) -> Result<Option<ModuleVersion>> {
        get_module_version_by_id(&self.conn(), id)
    }

    fn list_module_versions(&self, provider_id: i64) -> Result<Vec<ModuleVersion>> {
        list_module_versions(&self.conn(), provider_id)
    }

    fn get_module_details(&self, id: i64) -> Result<Option<ModuleDetails>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, readme, terraform_docs, infracost, security_scan FROM module_details WHERE id = ?1",
            params![id],
            |row| {
                Ok(ModuleDetails {
                    id: row.get(0)?,
                    readme: row.get(1)?,
                    terraform_docs: row.get(2)?,
                    infracost: row.get(3)?,
                    security_scan: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_submodules(&self, version_id: i64) -> Result<Vec<Submodule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, module_version_id, path, kind, module_details_id
             FROM submodules WHERE module_version_id = ?1 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![version_id], |row| {
            Ok(Submodule {
                id: row.get(0)?,
                module_version_id: row.get(1)?,
                path: row.get(2)?,
                kind: parse_column(3, row.get(3)?)?,
                module_details_id: row.get(4)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_example_files(&self, submodule_id: i64) -> Result<Vec<ExampleFile>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, submodule_id, path, content FROM example_files
             WHERE submodule_id = ?1 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![submodule_id], |row| {
            Ok(ExampleFile {
                id: row.get(0)?,
                submodule_id: row.get(1)?,
                path: row.get(2)?,
                content: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_module_version_files(&self, version_id: i64) -> Result<Vec<ModuleVersionFile>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, module_version_id, path, content, content_type FROM module_version_files
             WHERE module_version_id = ?1 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![version_id], |row| {
            Ok(ModuleVersionFile {
                id: row.get(0)?,
                module_version_id: row.get(1)?,
                path: row.get(2)?,
                content: row.get(3)?,
                content_type: row.get(4)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_module_version_file(&self, version_id: i64, path: &str) -> Result<Option<ModuleVersionFile>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, module_version_id, path, content, content_type FROM module_version_files
             WHERE module_version_id = ?1 AND path = ?2",
            params![version_id, path],
            |row| {
                Ok(ModuleVersionFile {
                    id: row.get(0)?,
                    module_version_id: row.get(1)?,
                    path: row.get(2)?,
                    content: row.get(3)?,
                    content_type: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    // Query operations

    fn search_modules(&self, params: &SearchParams) -> Result<SearchResults> {
        search::search_modules(&self.conn(), params)
    }

    // Redirect operations

    fn find_redirect(&self, identity: &ModuleIdentity) -> Result<Option<ModuleProviderRedirect>> {
        find_redirect(&self.conn(), identity)
    }

    fn touch_redirect(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE module_provider_redirects SET last_access_at = ?1 WHERE id = ?2",
            params![format_datetime(&at), id],
        )?;
        Ok(())
    }

    fn list_redirects_to(&self, provider_id: i64) -> Result<Vec<ModuleProviderRedirect>> {
        list_redirects_to(&self.conn(), provider_id)
    }

    // Analytics operations

    fn record_download(&self, record: &NewAnalyticsRecord) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO analytics (module_version_id, token, environment, terraform_version, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.module_version_id,
                record.token,
                record.environment,
                record.terraform_version,
                format_datetime(&record.timestamp),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn count_provider_downloads(&self, provider_id: i64) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM analytics a
                 JOIN module_versions mv ON mv.id = a.module_version_id
                 WHERE mv.module_provider_id = ?1",
                params![provider_id],
                |row| row.get(0),
            )
            .map_err(Error::from)
    }

    fn count_version_downloads(&self, version_id: i64) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM analytics WHERE module_version_id = ?1",
                params![version_id],
                |row| row.get(0),
            )
            .map_err(Error::from)
    }

    fn list_token_usage(&self, provider_id: i64) -> Result<Vec<TokenUsage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "WITH provider_analytics AS (
                SELECT a.id, a.token, a.environment, a.terraform_version, a.timestamp, mv.version
                FROM analytics a JOIN module_versions mv ON mv.id = a.module_version_id
                WHERE mv.module_provider_id = ?1 AND a.token IS NOT NULL
             )
             SELECT pa.token, pa.environment, pa.terraform_version, pa.version, pa.timestamp,
                (SELECT COUNT(*) FROM provider_analytics c WHERE c.token = pa.token)
             FROM provider_analytics pa
             WHERE pa.id = (SELECT MAX(l.id) FROM provider_analytics l WHERE l.token = pa.token)
             ORDER BY pa.token",
        )?;
        let rows = stmt.query_map(params![provider_id], |row| {
            Ok(TokenUsage {
                token: row.get(0)?,
                environment: row.get(1)?,
                terraform_version: row.get(2)?,
                module_version: row.get(3)?,
                last_used_at: parse_datetime(&row.get::<_, String>(4)?),
                downloads: row.get(5)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn global_stats(&self) -> Result<GlobalStats> {
        self.conn()
            .query_row(
                "SELECT
                    (SELECT COUNT(*) FROM namespaces),
                    (SELECT COUNT(*) FROM module_providers),
                    (SELECT COUNT(*) FROM module_versions WHERE published = 1),
                    (SELECT COUNT(*) FROM analytics)",
                [],
                |row| {
                    Ok(GlobalStats {
                        namespaces: row.get(0)?,
                        module_providers: row.get(1)?,
                        module_versions: row.get(2)?,
                        downloads: row.get(3)?,
                    })
                },
            )
            .map_err(Error::from)
    }

    // Lease operations

    fn acquire_lease(&self, lease: &IndexLease, cutoffs: LeaseCutoffs) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {LEASE_COLUMNS} FROM index_leases
                     WHERE namespace = ?1 AND module = ?2 AND provider = ?3 AND version = ?4"
                ),
                params![lease.namespace, lease.module, lease.provider, lease.version],
                lease_from_row,
            )
            .optional()?;
        if let Some(existing) = existing {
            if cutoffs.is_live(&existing) {
                return Err(Error::Conflict(format!(
                    "{}/{}/{} {} is already being indexed",
                    lease.namespace, lease.module, lease.provider, lease.version
                )));
            }
            tracing::warn!(
                "Replacing expired index lease held by {} since {}",
                existing.holder,
                existing.acquired_at
            );
        }

        tx.execute(
            "INSERT OR REPLACE INTO index_leases
                (namespace, module, provider, version, holder, acquired_at, heartbeat_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                lease.namespace,
                lease.module,
                lease.provider,
                lease.version,
                lease.holder,
                format_datetime(&lease.acquired_at),
                format_datetime(&lease.heartbeat_at),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn heartbeat_lease(&self, lease: &IndexLease, at: DateTime<Utc>) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE index_leases SET heartbeat_at = ?1
             WHERE namespace = ?2 AND module = ?3 AND provider = ?4 AND version = ?5 AND holder = ?6",
            params![
                format_datetime(&at),
                lease.namespace,
                lease.module,
                lease.provider,
                lease.version,
                lease.holder,
            ],
        )?;
        Ok(rows > 0)
    }

    fn release_lease(&self, lease: &IndexLease) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM index_leases
             WHERE namespace = ?1 AND module = ?2 AND provider = ?3 AND version = ?4 AND holder = ?5",
            params![
                lease.namespace,
                lease.module,
                lease.provider,
                lease.version,
                lease.holder,
            ],
        )?;
        Ok(rows > 0)
    }

    fn list_leases(&self) -> Result<Vec<IndexLease>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LEASE_COLUMNS} FROM index_leases ORDER BY acquired_at"
        ))?;
        let rows = stmt.query_map([], lease_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Token operations

    fn create_token(&self, token: &Token) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO tokens (id, token_hash, token_lookup, is_admin, description, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                token.id,
                token.token_hash,
                token.token_lookup,
                token.is_admin,
                token.description,
                format_datetime(&token.created_at),
                token.expires_at.as_ref().map(format_datetime),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::TokenLookupCollision),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_lookup = ?1"),
            params![lookup],
            token_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_tokens(&self) -> Result<Vec<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([], token_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_token(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn update_token_last_used(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE tokens SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    fn has_admin_token(&self) -> Result<bool> {
        let conn = self.conn();
        let count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM tokens WHERE is_admin = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
