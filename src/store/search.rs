//! Registry listing and search over module providers.
//!
//! Each module provider is represented by one published, non-internal
//! version: its latest pointer when that qualifies, otherwise its most
//! recently published version.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use serde::Serialize;

use super::sqlite::parse_datetime;
use crate::error::{Error, Result};
use crate::types::NamespaceKind;

pub const MAX_PAGE_LIMIT: i64 = 50;

/// (exact, partial) score per searched column.
const MODULE_WEIGHT: (i64, i64) = (20, 5);
const NAMESPACE_WEIGHT: (i64, i64) = (18, 4);
const PROVIDER_WEIGHT: (i64, i64) = (14, 4);
const DESCRIPTION_WEIGHT: (i64, i64) = (13, 4);
const OWNER_WEIGHT: (i64, i64) = (12, 4);

#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    /// Whitespace-separated terms; `None` or blank lists everything.
    pub query: Option<String>,
    pub namespaces: Vec<String>,
    pub modules: Vec<String>,
    pub providers: Vec<String>,
    pub verified: Option<bool>,
    pub trusted_only: bool,
    pub contributed_only: bool,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub module_provider_id: i64,
    pub namespace: String,
    pub module: String,
    pub provider: String,
    pub verified: bool,
    pub namespace_kind: NamespaceKind,
    pub version_id: i64,
    pub version: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub published_at: DateTime<Utc>,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub total_count: i64,
    pub offset: i64,
    pub limit: i64,
}

/// Clamp a requested page to `offset >= 0` and `1 <= limit <= 50`.
#[must_use]
pub fn clamp_page(offset: i64, limit: i64) -> (i64, i64) {
    (offset.max(0), limit.clamp(1, MAX_PAGE_LIMIT))
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Positional parameter list that hands out `?N` placeholders.
#[derive(Default)]
struct Binds {
    values: Vec<Value>,
}

impl Binds {
    fn push(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        format!("?{}", self.values.len())
    }

    fn list(&mut self, items: &[String]) -> String {
        items
            .iter()
            .map(|item| self.push(item.to_lowercase()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn score_column(column: &str, (exact, partial): (i64, i64), term: &str, like: &str) -> String {
    format!(
        "CASE WHEN LOWER({column}) = {term} THEN {exact} \
         WHEN LOWER({column}) LIKE {like} ESCAPE '\\' THEN {partial} ELSE 0 END"
    )
}

/// Build the `scored` CTE shared by the count and page queries.
fn scored_cte(params: &SearchParams, binds: &mut Binds) -> (String, bool) {
    let mut filters = vec!["mv.published = 1".to_string(), "mv.internal = 0".to_string()];

    if !params.namespaces.is_empty() {
        filters.push(format!("LOWER(ns.name) IN ({})", binds.list(&params.namespaces)));
    }
    if !params.modules.is_empty() {
        filters.push(format!("LOWER(mp.module) IN ({})", binds.list(&params.modules)));
    }
    if !params.providers.is_empty() {
        filters.push(format!("LOWER(mp.provider) IN ({})", binds.list(&params.providers)));
    }
    if let Some(verified) = params.verified {
        filters.push(format!("mp.verified = {}", binds.push(verified)));
    }
    match (params.trusted_only, params.contributed_only) {
        (true, false) => filters.push("ns.kind != 'plain'".to_string()),
        (false, true) => filters.push("ns.kind = 'plain'".to_string()),
        _ => {}
    }

    let terms: Vec<String> = params
        .query
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();

    let mut score_parts = Vec::new();
    for term in &terms {
        let exact = binds.push(term.clone());
        let like = binds.push(escape_like(term));
        for (column, weight) in [
            ("c.module", MODULE_WEIGHT),
            ("c.namespace", NAMESPACE_WEIGHT),
            ("c.provider", PROVIDER_WEIGHT),
            ("c.description", DESCRIPTION_WEIGHT),
            ("c.owner", OWNER_WEIGHT),
        ] {
            score_parts.push(score_column(column, weight, &exact, &like));
        }
    }
    let score = if score_parts.is_empty() {
        "0".to_string()
    } else {
        score_parts.join("\n + ")
    };

    let cte = format!(
        "WITH candidates AS (
            SELECT mp.id AS module_provider_id, ns.name AS namespace, mp.module, mp.provider,
                mp.verified, ns.kind, mv.id AS version_id, mv.version, mv.description, mv.owner,
                mv.published_at,
                ROW_NUMBER() OVER (
                    PARTITION BY mp.id
                    ORDER BY COALESCE(mv.id = mp.latest_version_id, 0) DESC,
                        mv.published_at DESC, mv.id DESC
                ) AS rn
            FROM module_providers mp
            JOIN namespaces ns ON ns.id = mp.namespace_id
            JOIN module_versions mv ON mv.module_provider_id = mp.id
            WHERE {filters}
        ),
        scored AS (
            SELECT c.*, ({score}) AS score FROM candidates c WHERE c.rn = 1
        )",
        filters = filters.join(" AND "),
    );
    (cte, !terms.is_empty())
}

pub(super) fn search_modules(conn: &Connection, params: &SearchParams) -> Result<SearchResults> {
    let (offset, limit) = clamp_page(params.offset, params.limit);
    let mut binds = Binds::default();
    let (cte, has_terms) = scored_cte(params, &mut binds);
    let matched = if has_terms { "WHERE score > 0" } else { "" };

    let total_count: i64 = conn.query_row(
        &format!("{cte} SELECT COUNT(DISTINCT module_provider_id) FROM scored {matched}"),
        params_from_iter(binds.values.iter()),
        |row| row.get(0),
    )?;

    let limit_bind = binds.push(limit);
    let offset_bind = binds.push(offset);
    let sql = format!(
        "{cte}
         SELECT module_provider_id, namespace, module, provider, verified, kind, version_id,
            version, description, owner, published_at, score
         FROM scored {matched}
         ORDER BY score DESC, namespace ASC, module ASC, provider ASC
         LIMIT {limit_bind} OFFSET {offset_bind}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(binds.values.iter()), |row| {
        let kind: String = row.get(5)?;
        Ok(SearchHit {
            module_provider_id: row.get(0)?,
            namespace: row.get(1)?,
            module: row.get(2)?,
            provider: row.get(3)?,
            verified: row.get(4)?,
            namespace_kind: kind.parse().map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
            })?,
            version_id: row.get(6)?,
            version: row.get(7)?,
            description: row.get(8)?,
            owner: row.get(9)?,
            published_at: parse_datetime(&row.get::<_, String>(10)?),
            score: row.get(11)?,
        })
    })?;
    let hits = rows
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)?;

    Ok(SearchResults {
        hits,
        total_count,
        offset,
        limit,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::store::{NewModuleProvider, SqliteStore, Store, VersionWrite, transaction};
    use crate::types::GitConfig;

    struct Fixture {
        _temp: TempDir,
        store: SqliteStore,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
            store.initialize().unwrap();
            Self { _temp: temp, store }
        }

        fn module(&self, namespace: &str, module: &str, provider: &str, versions: &[(&str, bool, bool)]) {
            transaction(&self.store, |tx| {
                let ns = match tx.get_namespace_by_name(namespace)? {
                    Some(ns) => ns,
                    None => tx.create_namespace(namespace, None, NamespaceKind::Plain)?,
                };
                let mp = tx.create_module_provider(&NewModuleProvider {
                    namespace_id: ns.id,
                    module: module.to_string(),
                    provider: provider.to_string(),
                    verified: false,
                    git: GitConfig::default(),
                    webhook_secret: None,
                })?;
                for (version, published, internal) in versions {
                    tx.save_module_version(
                        mp.id,
                        &VersionWrite {
                            version: version.to_string(),
                            internal: *internal,
                            published_at: published.then(Utc::now),
                            ..Default::default()
                        },
                    )?;
                }
                tx.refresh_latest_version(mp.id)?;
                Ok(())
            })
            .unwrap();
        }

        fn search(&self, params: SearchParams) -> SearchResults {
            self.store.search_modules(&params).unwrap()
        }
    }

    fn query(q: &str) -> SearchParams {
        SearchParams {
            query: Some(q.to_string()),
            limit: 10,
            ..Default::default()
        }
    }

    fn names(results: &SearchResults) -> Vec<String> {
        results
            .hits
            .iter()
            .map(|h| format!("{}/{}/{}", h.namespace, h.module, h.provider))
            .collect()
    }

    #[test]
    fn test_clamp_page() {
        assert_eq!(clamp_page(-5, 0), (0, 1));
        assert_eq!(clamp_page(3, 500), (3, MAX_PAGE_LIMIT));
        assert_eq!(clamp_page(0, 20), (0, 20));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("a_b%c\\"), "%a\\_b\\%c\\\\%");
    }

    #[test]
    fn test_scores_and_order() {
        let fx = Fixture::new();
        fx.module("other", "aws-sg", "aws", &[("1.0.0", true, false)]);
        fx.module("other", "vpc", "gcp", &[("1.0.0", true, false)]);
        fx.module("acme", "vpc", "aws", &[("1.0.0", true, false)]);

        let results = fx.search(query("aws vpc"));
        assert_eq!(names(&results), ["acme/vpc/aws", "other/vpc/gcp", "other/aws-sg/aws"]);
        let scores: Vec<i64> = results.hits.iter().map(|h| h.score).collect();
        assert_eq!(scores, [34, 20, 19]);
        assert_eq!(results.total_count, 3);
    }

    #[test]
    fn test_count_is_distinct_providers() {
        let fx = Fixture::new();
        fx.module(
            "acme",
            "vpc",
            "aws",
            &[("1.0.0", true, false), ("1.1.0", true, false), ("2.0.0-rc1", true, false)],
        );
        fx.module("acme", "dns", "aws", &[("0.1.0", true, false)]);

        let results = fx.search(query("aws"));
        assert_eq!(results.total_count, 2);
        assert_eq!(results.hits.len(), 2);
        let vpc = results.hits.iter().find(|h| h.module == "vpc").unwrap();
        assert_eq!(vpc.version, "1.1.0");

        let mut paged = query("aws");
        paged.limit = 1;
        paged.offset = 1;
        let page = fx.search(paged);
        assert_eq!(page.hits.len(), 1);
        assert_eq!(page.total_count, 2);
    }

    #[test]
    fn test_unpublished_and_internal_excluded() {
        let fx = Fixture::new();
        fx.module("acme", "vpc", "aws", &[("1.0.0", false, false)]);
        fx.module("acme", "secret", "aws", &[("1.0.0", true, true)]);
        fx.module("acme", "beta", "aws", &[("1.0.0-beta1", true, false)]);

        let results = fx.search(query("aws"));
        assert_eq!(names(&results), ["acme/beta/aws"]);
        assert_eq!(results.hits[0].version, "1.0.0-beta1");
    }

    #[test]
    fn test_filters() {
        let fx = Fixture::new();
        fx.module("acme", "vpc", "aws", &[("1.0.0", true, false)]);
        fx.module("other", "vpc", "gcp", &[("1.0.0", true, false)]);
        transaction(&fx.store, |tx| {
            let mut ns = tx.get_namespace_by_name("acme")?.unwrap();
            ns.kind = NamespaceKind::Trusted;
            tx.update_namespace(&ns)
        })
        .unwrap();

        let mut by_provider = query("vpc");
        by_provider.providers = vec!["GCP".into()];
        assert_eq!(names(&fx.search(by_provider)), ["other/vpc/gcp"]);

        let mut trusted = query("vpc");
        trusted.trusted_only = true;
        assert_eq!(names(&fx.search(trusted)), ["acme/vpc/aws"]);

        let mut contributed = query("vpc");
        contributed.contributed_only = true;
        assert_eq!(names(&fx.search(contributed)), ["other/vpc/gcp"]);

        let mut verified = query("vpc");
        verified.verified = Some(true);
        assert!(fx.search(verified).hits.is_empty());

        let listing = fx.search(SearchParams {
            namespaces: vec!["acme".into()],
            limit: 10,
            ..Default::default()
        });
        assert_eq!(names(&listing), ["acme/vpc/aws"]);
        assert_eq!(listing.hits[0].score, 0);
    }

    #[test]
    fn test_like_wildcards_are_literal() {
        let fx = Fixture::new();
        fx.module("acme", "vpc", "aws", &[("1.0.0", true, false)]);

        assert!(fx.search(query("%")).hits.is_empty());
        assert!(fx.search(query("_")).hits.is_empty());
        assert_eq!(fx.search(query("VP")).hits.len(), 1);
    }
}
