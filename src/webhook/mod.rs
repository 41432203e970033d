//! Git host webhooks that turn tag and release events into indexing runs.

mod bitbucket;
mod github;
mod gitlab;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::git::TagFormat;
use crate::registry::ModuleRegistry;
use crate::types::ModuleIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Github,
    Gitlab,
    Bitbucket,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
            Self::Bitbucket => "bitbucket",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "github" => Ok(Self::Github),
            "gitlab" => Ok(Self::Gitlab),
            "bitbucket" => Ok(Self::Bitbucket),
            _ => Err(Error::NotFound),
        }
    }
}

/// What a provider-specific payload boils down to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    /// Tags created or released by the event.
    Tags(Vec<String>),
    Ignored(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedTag {
    pub tag: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Indexing was started for these tags.
    Queued(Vec<QueuedTag>),
    /// Acknowledged without indexing.
    Ignored(String),
}

pub(crate) fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Check a `sha256=<hex>` HMAC header over the raw body.
pub(crate) fn verify_sha256_signature(signature: Option<&str>, body: &[u8], secret: &str) -> Result<()> {
    let provided = signature
        .and_then(|s| s.strip_prefix("sha256="))
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
        .ok_or(Error::Unauthorized)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("invalid webhook secret: {e}")))?;
    mac.update(body);
    mac.verify_slice(&provided).map_err(|_| Error::Unauthorized)
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::BadRequest(format!("invalid webhook payload: {e}")))
}

/// Verifies, parses and dispatches webhook deliveries.
pub struct WebhookIntake {
    registry: Arc<ModuleRegistry>,
    shared_secret: Option<String>,
    shutdown: CancellationToken,
}

impl WebhookIntake {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        shared_secret: Option<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            shared_secret,
            shutdown,
        }
    }

    /// Handle one delivery for the provider named by `identity`. Matching
    /// tags are indexed on background tasks.
    pub fn handle(
        &self,
        kind: HookKind,
        identity: &ModuleIdentity,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<HookOutcome> {
        let provider = self
            .registry
            .store()
            .get_module_provider(identity)?
            .ok_or(Error::NotFound)?;

        match provider.webhook_secret.as_deref().or(self.shared_secret.as_deref()) {
            Some(secret) => match kind {
                HookKind::Github => github::verify(headers, body, secret)?,
                HookKind::Gitlab => gitlab::verify(headers, secret)?,
                HookKind::Bitbucket => bitbucket::verify(headers, body, secret)?,
            },
            None => debug!("No webhook secret for {identity}; accepting unsigned {kind} delivery"),
        }

        let event = match kind {
            HookKind::Github => github::parse(headers, body)?,
            HookKind::Gitlab => gitlab::parse(headers, body)?,
            HookKind::Bitbucket => bitbucket::parse(headers, body)?,
        };

        if provider.git.repo_clone_url_template.is_none() {
            return Err(Error::BadRequest(format!(
                "module provider {identity} has no git clone URL configured"
            )));
        }

        let tags = match event {
            HookEvent::Tags(tags) => tags,
            HookEvent::Ignored(reason) => {
                debug!("Ignoring {kind} webhook for {identity}: {reason}");
                return Ok(HookOutcome::Ignored(reason));
            }
        };

        let format = TagFormat::parse_or_default(provider.git.git_tag_format.as_deref())?;
        let queued: Vec<QueuedTag> = tags
            .into_iter()
            .filter_map(|tag| {
                format
                    .extract_version(&tag)
                    .map(|version| QueuedTag { tag, version })
            })
            .collect();
        if queued.is_empty() {
            return Ok(HookOutcome::Ignored(
                "no tag matches the module's tag format".into(),
            ));
        }

        let identity = provider.identity();
        for item in &queued {
            info!("Queueing {identity} {} from {kind} tag {}", item.version, item.tag);
            let registry = self.registry.clone();
            let identity = identity.clone();
            let version = item.version.clone();
            let cancel = self.shutdown.child_token();
            tokio::spawn(async move {
                if let Err(e) = registry.import_version(&identity, &version, &cancel).await {
                    warn!("Webhook indexing of {identity} {version} failed: {e}");
                }
            });
        }
        Ok(HookOutcome::Queued(queued))
    }
}
