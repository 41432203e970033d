use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::types::{HostingMode, ModuleProviderRedirect};

/// Where a download is served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    /// The locally hosted archive.
    Local,
    /// A go-getter source URL of the upstream repository.
    Git(String),
}

/// Gates uploads and download delivery on `ALLOW_MODULE_HOSTING`.
#[derive(Debug, Clone, Copy)]
pub struct HostingPolicy {
    mode: HostingMode,
}

impl HostingPolicy {
    #[must_use]
    pub fn new(mode: HostingMode) -> Self {
        Self { mode }
    }

    #[must_use]
    pub fn mode(&self) -> HostingMode {
        self.mode
    }

    pub fn check_upload(&self) -> Result<()> {
        match self.mode {
            HostingMode::Disallow => Err(Error::HostingDisabled(
                "module hosting is disabled on this registry".into(),
            )),
            HostingMode::Allow | HostingMode::Enforce => Ok(()),
        }
    }

    /// Pick the delivery for a version. `git_url` is the rendered upstream
    /// source, when the provider has one.
    pub fn download_source(&self, has_archive: bool, git_url: Option<String>) -> Result<DownloadSource> {
        match self.mode {
            HostingMode::Allow => match (has_archive, git_url) {
                (true, _) => Ok(DownloadSource::Local),
                (false, Some(url)) => Ok(DownloadSource::Git(url)),
                (false, None) => Err(Error::NotFound),
            },
            HostingMode::Disallow => git_url.map(DownloadSource::Git).ok_or_else(|| {
                Error::HostingDisabled("module has no git source and hosting is disabled".into())
            }),
            HostingMode::Enforce if has_archive => Ok(DownloadSource::Local),
            HostingMode::Enforce => Err(Error::NotFound),
        }
    }

    /// Enforced hosting strips upstream URLs from responses.
    #[must_use]
    pub fn exposes_source_urls(&self) -> bool {
        self.mode != HostingMode::Enforce
    }
}

/// `REDIRECT_DELETION_LOOKBACK_DAYS`: whether a module provider that is the
/// target of redirects may be deleted without `force`.
#[derive(Debug, Clone, Copy)]
pub struct DeletionPolicy {
    lookback_days: i64,
}

impl DeletionPolicy {
    #[must_use]
    pub fn new(lookback_days: i64) -> Self {
        Self { lookback_days }
    }

    pub fn check(
        &self,
        redirects: &[ModuleProviderRedirect],
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if force || self.lookback_days == 0 {
            return Ok(());
        }
        let cutoff = (self.lookback_days > 0).then(|| now - Duration::days(self.lookback_days));
        let blocking = redirects.iter().find(|r| match (r.last_access_at, cutoff) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(at), Some(cutoff)) => at >= cutoff,
        });
        match blocking {
            Some(r) => Err(Error::Conflict(format!(
                "redirect from {} is still in use; delete with force to override",
                r.from_identity()
            ))),
            None => Ok(()),
        }
    }
}
