use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::extractor::ExtractorSettings;
use crate::git::GitCredentials;
use crate::registry::{AnalyticsKeys, DEFAULT_URL_TTL};
use crate::types::{HostingMode, ReindexMode};

/// Registry behaviour loaded from the environment once at startup.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub data_dir: PathBuf,
    pub hosting: HostingMode,
    pub reindex_mode: ReindexMode,
    /// Publish state of versions indexed from webhooks and imports.
    pub auto_publish: bool,
    pub extractor: ExtractorSettings,
    pub git_clone_timeout: Duration,
    pub git_credentials: Option<GitCredentials>,
    pub redirect_deletion_lookback_days: i64,
    pub auto_create_namespace: bool,
    pub auto_create_module_provider: bool,
    pub allow_empty_root: bool,
    pub terraform_docs_binary: PathBuf,
    pub webhook_secret: Option<String>,
    pub download_url_secret: Option<String>,
    pub download_url_ttl: Duration,
    pub analytics_keys: AnalyticsKeys,
    pub temp_dir: Option<PathBuf>,
    /// `None` disables the periodic reaper.
    pub reaper_interval: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            hosting: HostingMode::Allow,
            reindex_mode: ReindexMode::Legacy,
            auto_publish: true,
            extractor: ExtractorSettings::default(),
            git_clone_timeout: Duration::from_secs(300),
            git_credentials: None,
            redirect_deletion_lookback_days: -1,
            auto_create_namespace: true,
            auto_create_module_provider: true,
            allow_empty_root: false,
            terraform_docs_binary: PathBuf::from("terraform-docs"),
            webhook_secret: None,
            download_url_secret: None,
            download_url_ttl: DEFAULT_URL_TTL,
            analytics_keys: AnalyticsKeys::default(),
            temp_dir: None,
            reaper_interval: Some(Duration::from_secs(3600)),
        }
    }
}

impl RegistryConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = var("DATA_DIRECTORY") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = var("ALLOW_MODULE_HOSTING") {
            config.hosting = parse_enum("ALLOW_MODULE_HOSTING", &raw)?;
        }
        if let Some(raw) = var("MODULE_VERSION_REINDEX_MODE") {
            config.reindex_mode = parse_enum("MODULE_VERSION_REINDEX_MODE", &raw)?;
        }
        if let Some(raw) = var("AUTO_PUBLISH_MODULE_VERSIONS") {
            config.auto_publish = parse_auto_publish(&raw)?;
        }
        if let Some(dir) = var("MODULES_DIRECTORY") {
            config.extractor.modules_directory = dir;
        }
        if let Some(dir) = var("EXAMPLES_DIRECTORY") {
            config.extractor.examples_directory = dir;
        }
        if let Some(raw) = var("EXAMPLE_FILE_EXTENSIONS") {
            config.extractor.example_file_extensions = split_list(&raw)
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect();
        }
        if let Some(raw) = var("ADDITIONAL_MODULE_FILES") {
            config.extractor.additional_files = split_list(&raw);
        }
        if let Some(raw) = var("GIT_CLONE_TIMEOUT") {
            config.git_clone_timeout = Duration::from_secs(parse_number("GIT_CLONE_TIMEOUT", &raw)?);
        }
        match (
            var("UPSTREAM_GIT_CREDENTIALS_USERNAME"),
            var("UPSTREAM_GIT_CREDENTIALS_PASSWORD"),
        ) {
            (Some(username), Some(password)) => {
                config.git_credentials = Some(GitCredentials { username, password });
            }
            (None, None) => {}
            _ => {
                return Err(Error::Config(
                    "UPSTREAM_GIT_CREDENTIALS_USERNAME and UPSTREAM_GIT_CREDENTIALS_PASSWORD must be set together".into(),
                ));
            }
        }
        if let Some(raw) = var("REDIRECT_DELETION_LOOKBACK_DAYS") {
            let days: i64 = parse_number("REDIRECT_DELETION_LOOKBACK_DAYS", &raw)?;
            if days < -1 {
                return Err(Error::Config(format!(
                    "REDIRECT_DELETION_LOOKBACK_DAYS: expected -1, 0 or a positive number of days, got {days}"
                )));
            }
            config.redirect_deletion_lookback_days = days;
        }
        if let Some(raw) = var("AUTO_CREATE_NAMESPACE") {
            config.auto_create_namespace = parse_bool("AUTO_CREATE_NAMESPACE", &raw)?;
        }
        if let Some(raw) = var("AUTO_CREATE_MODULE_PROVIDER") {
            config.auto_create_module_provider = parse_bool("AUTO_CREATE_MODULE_PROVIDER", &raw)?;
        }
        if let Some(raw) = var("ALLOW_EMPTY_ROOT_MODULE") {
            config.allow_empty_root = parse_bool("ALLOW_EMPTY_ROOT_MODULE", &raw)?;
        }
        if let Some(binary) = var("TERRAFORM_DOCS_BINARY") {
            config.terraform_docs_binary = PathBuf::from(binary);
        }
        config.webhook_secret = var("WEBHOOK_SECRET");
        config.download_url_secret = var("DOWNLOAD_URL_SECRET");
        if let Some(raw) = var("DOWNLOAD_URL_TTL_SECS") {
            let secs: u64 = parse_number("DOWNLOAD_URL_TTL_SECS", &raw)?;
            if secs == 0 {
                return Err(Error::Config("DOWNLOAD_URL_TTL_SECS: must be positive".into()));
            }
            config.download_url_ttl = Duration::from_secs(secs);
        }
        if let Some(raw) = var("ANALYTICS_AUTH_KEYS") {
            config.analytics_keys = AnalyticsKeys::parse(&raw)?;
        }
        config.temp_dir = var("TEMP_DIRECTORY").map(PathBuf::from);
        if let Some(raw) = var("REAPER_INTERVAL_SECS") {
            let secs: u64 = parse_number("REAPER_INTERVAL_SECS", &raw)?;
            config.reaper_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }

    #[must_use]
    pub fn temp_directory(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("tmp"))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_enum<T: FromStr<Err = String>>(name: &str, raw: &str) -> Result<T> {
    raw.parse().map_err(|e| Error::Config(format!("{name}: {e}")))
}

fn parse_number<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name}: invalid number '{raw}': {e}")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{name}: expected true or false, got '{other}'"))),
    }
}

fn parse_auto_publish(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "auto-publish" => Ok(true),
        "legacy" | "prohibit" => Ok(false),
        _ => parse_bool("AUTO_PUBLISH_MODULE_VERSIONS", raw),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<RegistryConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RegistryConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.hosting, HostingMode::Allow);
        assert_eq!(config.reindex_mode, ReindexMode::Legacy);
        assert!(config.auto_publish);
        assert_eq!(config.redirect_deletion_lookback_days, -1);
        assert_eq!(config.git_clone_timeout, Duration::from_secs(300));
        assert_eq!(config.temp_directory(), PathBuf::from("./data/tmp"));
        assert_eq!(config.reaper_interval, Some(Duration::from_secs(3600)));
        assert!(config.git_credentials.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATA_DIRECTORY", "/srv/registry"),
            ("ALLOW_MODULE_HOSTING", "enforce"),
            ("MODULE_VERSION_REINDEX_MODE", "prohibit"),
            ("AUTO_PUBLISH_MODULE_VERSIONS", "false"),
            ("EXAMPLE_FILE_EXTENSIONS", ".tf, tfvars"),
            ("ADDITIONAL_MODULE_FILES", "LICENSE,NOTICE"),
            ("UPSTREAM_GIT_CREDENTIALS_USERNAME", "bot"),
            ("UPSTREAM_GIT_CREDENTIALS_PASSWORD", "hunter2"),
            ("REDIRECT_DELETION_LOOKBACK_DAYS", "7"),
            ("ANALYTICS_AUTH_KEYS", "abc:prod,def:dev"),
            ("REAPER_INTERVAL_SECS", "0"),
        ])
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/registry"));
        assert_eq!(config.hosting, HostingMode::Enforce);
        assert_eq!(config.reindex_mode, ReindexMode::Prohibit);
        assert!(!config.auto_publish);
        assert_eq!(config.extractor.example_file_extensions, vec!["tf", "tfvars"]);
        assert_eq!(config.extractor.additional_files, vec!["LICENSE", "NOTICE"]);
        assert_eq!(config.git_credentials.as_ref().unwrap().username, "bot");
        assert_eq!(config.redirect_deletion_lookback_days, 7);
        assert_eq!(config.analytics_keys.environment_for("def"), Some("dev"));
        assert_eq!(config.reaper_interval, None);
        assert_eq!(config.temp_directory(), PathBuf::from("/srv/registry/tmp"));
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = load(&[("ALLOW_MODULE_HOSTING", "sometimes")]).unwrap_err();
        assert!(err.to_string().contains("ALLOW_MODULE_HOSTING"));

        let err = load(&[("GIT_CLONE_TIMEOUT", "soon")]).unwrap_err();
        assert!(err.to_string().contains("GIT_CLONE_TIMEOUT"));

        let err = load(&[("REDIRECT_DELETION_LOOKBACK_DAYS", "-5")]).unwrap_err();
        assert!(err.to_string().contains("REDIRECT_DELETION_LOOKBACK_DAYS"));

        let err = load(&[("UPSTREAM_GIT_CREDENTIALS_USERNAME", "bot")]).unwrap_err();
        assert!(err.to_string().contains("UPSTREAM_GIT_CREDENTIALS_PASSWORD"));
    }

    #[test]
    fn test_auto_publish_accepts_mode_names() {
        assert!(load(&[("AUTO_PUBLISH_MODULE_VERSIONS", "auto-publish")]).unwrap().auto_publish);
        assert!(!load(&[("AUTO_PUBLISH_MODULE_VERSIONS", "legacy")]).unwrap().auto_publish);
    }
}
