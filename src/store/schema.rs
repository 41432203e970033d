pub const SCHEMA: &str = r#"
-- Namespaces group module providers; names match case-insensitively
CREATE TABLE IF NOT EXISTS namespaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL COLLATE NOCASE UNIQUE,
    display_name TEXT,
    kind TEXT NOT NULL DEFAULT 'plain',   -- plain | trusted | verified-module-publisher
    created_at TEXT NOT NULL
);

-- Extracted artifacts, owned 1:1 by a module version or a submodule
CREATE TABLE IF NOT EXISTS module_details (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    readme BLOB,
    terraform_docs TEXT,
    infracost TEXT,
    security_scan TEXT
);

CREATE TABLE IF NOT EXISTS module_providers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace_id INTEGER NOT NULL REFERENCES namespaces(id) ON DELETE RESTRICT,
    module TEXT NOT NULL,
    provider TEXT NOT NULL,
    verified INTEGER NOT NULL DEFAULT 0,

    -- Git source
    repo_base_url_template TEXT,
    repo_clone_url_template TEXT,
    repo_browse_url_template TEXT,
    git_tag_format TEXT,
    git_path TEXT,
    archive_git_path INTEGER NOT NULL DEFAULT 0,
    webhook_secret TEXT,

    -- Latest published non-beta version, recomputed on every publish change
    latest_version_id INTEGER REFERENCES module_versions(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,

    UNIQUE(namespace_id, module, provider)
);

CREATE TABLE IF NOT EXISTS module_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module_provider_id INTEGER NOT NULL REFERENCES module_providers(id) ON DELETE CASCADE,
    version TEXT NOT NULL,
    beta INTEGER NOT NULL,
    internal INTEGER NOT NULL DEFAULT 0,
    published INTEGER NOT NULL DEFAULT 0,
    published_at TEXT,
    git_sha TEXT,
    git_path TEXT,
    owner TEXT,
    description TEXT,
    variable_template TEXT,
    module_details_id INTEGER REFERENCES module_details(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    UNIQUE(module_provider_id, version),
    CHECK ((published = 1) = (published_at IS NOT NULL))
);

-- Submodules and examples of a module version
CREATE TABLE IF NOT EXISTS submodules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module_version_id INTEGER NOT NULL REFERENCES module_versions(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    kind TEXT NOT NULL,                   -- submodule | example
    module_details_id INTEGER REFERENCES module_details(id) ON DELETE SET NULL,
    UNIQUE(module_version_id, path)
);

CREATE TABLE IF NOT EXISTS example_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    submodule_id INTEGER NOT NULL REFERENCES submodules(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    content BLOB NOT NULL,
    UNIQUE(submodule_id, path)
);

CREATE TABLE IF NOT EXISTS module_version_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module_version_id INTEGER NOT NULL REFERENCES module_versions(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    content BLOB NOT NULL,
    content_type TEXT NOT NULL,
    UNIQUE(module_version_id, path)
);

-- Historical identities; a NULL target is a tombstone
CREATE TABLE IF NOT EXISTS module_provider_redirects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace TEXT NOT NULL COLLATE NOCASE,
    module TEXT NOT NULL,
    provider TEXT NOT NULL,
    to_module_provider_id INTEGER REFERENCES module_providers(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    last_access_at TEXT,
    UNIQUE(namespace, module, provider)
);

-- Append-only download log
CREATE TABLE IF NOT EXISTS analytics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module_version_id INTEGER NOT NULL REFERENCES module_versions(id) ON DELETE CASCADE,
    token TEXT,
    environment TEXT,
    terraform_version TEXT,
    timestamp TEXT NOT NULL
);

-- At most one indexing lease per target
CREATE TABLE IF NOT EXISTS index_leases (
    namespace TEXT NOT NULL COLLATE NOCASE,
    module TEXT NOT NULL,
    provider TEXT NOT NULL,
    version TEXT NOT NULL,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    heartbeat_at TEXT NOT NULL,
    PRIMARY KEY (namespace, module, provider, version)
);

-- API keys for the extended administrative endpoints
CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,          -- argon2id hash with embedded salt
    token_lookup TEXT NOT NULL UNIQUE, -- first 8 chars of ID for fast lookup
    is_admin INTEGER NOT NULL DEFAULT 0,
    description TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT,                   -- NULL = never
    last_used_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_module_providers_namespace ON module_providers(namespace_id);
CREATE INDEX IF NOT EXISTS idx_module_versions_provider ON module_versions(module_provider_id);
CREATE INDEX IF NOT EXISTS idx_submodules_version ON submodules(module_version_id);
CREATE INDEX IF NOT EXISTS idx_redirects_target ON module_provider_redirects(to_module_provider_id);
CREATE INDEX IF NOT EXISTS idx_analytics_version ON analytics(module_version_id);
CREATE INDEX IF NOT EXISTS idx_analytics_token ON analytics(token);
"#;
