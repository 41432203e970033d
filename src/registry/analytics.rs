use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::{GlobalStats, NewAnalyticsRecord, Store, TokenUsage};
use crate::types::ModuleVersion;

const TOKEN_SEPARATOR: &str = "__";

/// Split a `token__namespace` path segment into its analytics token and
/// namespace. Segments without a token pass through unchanged.
#[must_use]
pub fn split_analytics_token(segment: &str) -> (Option<&str>, &str) {
    match segment.split_once(TOKEN_SEPARATOR) {
        Some((token, namespace)) if !token.is_empty() && !namespace.is_empty() => {
            (Some(token), namespace)
        }
        _ => (None, segment),
    }
}

/// `ANALYTICS_AUTH_KEYS`: deployment keys mapped to environment names.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsKeys {
    environments: HashMap<String, String>,
}

impl AnalyticsKeys {
    /// Parse `key:environment` pairs separated by commas.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut environments = HashMap::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, environment)) = pair.rsplit_once(':') else {
                return Err(Error::Config(
                    "ANALYTICS_AUTH_KEYS entries must look like key:environment".into(),
                ));
            };
            if key.is_empty() || environment.is_empty() {
                return Err(Error::Config(
                    "ANALYTICS_AUTH_KEYS entries need a key and an environment".into(),
                ));
            }
            environments.insert(key.to_string(), environment.to_string());
        }
        Ok(Self { environments })
    }

    #[must_use]
    pub fn environment_for(&self, key: &str) -> Option<&str> {
        self.environments.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

/// Download counts and token usage for one module provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderAnalytics {
    pub total_downloads: i64,
    pub tokens: Vec<TokenUsage>,
}

/// A download as seen at the HTTP boundary.
#[derive(Debug, Clone, Default)]
pub struct DownloadContext<'a> {
    pub analytics_token: Option<&'a str>,
    pub auth_key: Option<&'a str>,
    pub terraform_version: Option<&'a str>,
}

#[derive(Clone)]
pub struct AnalyticsRecorder {
    store: Arc<dyn Store>,
    keys: AnalyticsKeys,
}

impl AnalyticsRecorder {
    pub fn new(store: Arc<dyn Store>, keys: AnalyticsKeys) -> Self {
        Self { store, keys }
    }

    /// Append one download record. Records are never deduplicated.
    pub fn record(&self, version: &ModuleVersion, ctx: &DownloadContext<'_>) -> Result<i64> {
        let environment = ctx
            .auth_key
            .and_then(|key| self.keys.environment_for(key))
            .map(str::to_string);
        let id = self.store.record_download(&NewAnalyticsRecord {
            module_version_id: version.id,
            token: ctx.analytics_token.map(str::to_string),
            environment,
            terraform_version: ctx.terraform_version.map(str::to_string),
            timestamp: Utc::now(),
        })?;
        debug!("Recorded download {id} of version {}", version.version);
        Ok(id)
    }

    pub fn provider_summary(&self, provider_id: i64) -> Result<ProviderAnalytics> {
        Ok(ProviderAnalytics {
            total_downloads: self.store.count_provider_downloads(provider_id)?,
            tokens: self.store.list_token_usage(provider_id)?,
        })
    }

    pub fn version_downloads(&self, version_id: i64) -> Result<i64> {
        self.store.count_version_downloads(version_id)
    }

    pub fn global(&self) -> Result<GlobalStats> {
        self.store.global_stats()
    }
}
