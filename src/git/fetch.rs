use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::url::redact_url;
use crate::error::{Error, Result};

pub const DEFAULT_CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// Upstream credentials handed to git through a credential helper, never
/// through the URL.
#[derive(Clone)]
pub struct GitCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRef {
    /// 40 hex characters.
    pub commit_sha: String,
    pub commit_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct GitFetcher {
    binary: PathBuf,
    timeout: Duration,
    credentials: Option<GitCredentials>,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_CLONE_TIMEOUT, None)
    }
}

impl GitFetcher {
    pub fn new(timeout: Duration, credentials: Option<GitCredentials>) -> Self {
        Self {
            binary: PathBuf::from("git"),
            timeout,
            credentials,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Shallow-clone `git_ref` of `url` into the empty directory `dest`.
    pub async fn clone_ref(
        &self,
        url: &str,
        git_ref: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<FetchedRef> {
        let url = url.strip_prefix("git::").unwrap_or(url);
        if git_ref.is_empty() || git_ref.starts_with('-') {
            return Err(Error::GitRefNotFound(git_ref.to_string()));
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-c").arg("credential.helper=");
        if let Some(credentials) = &self.credentials {
            cmd.arg("-c").arg(
                "credential.helper=!f() { echo \"username=$TFHOST_GIT_USERNAME\"; echo \"password=$TFHOST_GIT_PASSWORD\"; }; f",
            );
            cmd.env("TFHOST_GIT_USERNAME", &credentials.username);
            cmd.env("TFHOST_GIT_PASSWORD", &credentials.password);
        }
        cmd.args(["clone", "--quiet", "--depth", "1", "--single-branch", "--branch"])
            .arg(git_ref)
            .arg("--")
            .arg(url)
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("Cloning {} at {git_ref}", redact_url(url));
        let child = cmd.spawn().map_err(|e| {
            warn!("Failed to spawn git: {e}");
            Error::GitUnreachable("git executable is not available".into())
        })?;

        // Dropping the in-flight future kills the child.
        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Err(_) => return Err(Error::GitTimeout),
                Ok(output) => output?,
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("git clone failed: {stderr}");
            return Err(classify_clone_failure(&stderr, git_ref));
        }

        let repo_path = dest.to_path_buf();
        tokio::task::spawn_blocking(move || read_head(&repo_path))
            .await
            .map_err(|e| Error::GitUnreachable(format!("reading cloned head failed: {e}")))?
    }
}

fn read_head(repo_path: &Path) -> Result<FetchedRef> {
    let repo = git2::Repository::open(repo_path)
        .map_err(|e| Error::GitUnreachable(format!("cloned repository is unreadable: {}", e.message())))?;
    let commit = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .map_err(|e| Error::GitRefNotFound(e.message().to_string()))?;

    let commit_time = Utc.timestamp_opt(commit.time().seconds(), 0).single();
    Ok(FetchedRef {
        commit_sha: commit.id().to_string(),
        commit_time,
    })
}

fn classify_clone_failure(stderr: &str, git_ref: &str) -> Error {
    let lower = stderr.to_ascii_lowercase();
    let first_line = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("git clone failed")
        .to_string();

    if (lower.contains("remote branch") && lower.contains("not found"))
        || lower.contains("couldn't find remote ref")
        || lower.contains("could not find remote branch")
    {
        Error::GitRefNotFound(git_ref.to_string())
    } else if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("could not read password")
        || lower.contains("permission denied")
        || lower.contains("terminal prompts disabled")
        || lower.contains("invalid username or password")
    {
        Error::GitAuthRequired(redact_url(&first_line))
    } else {
        Error::GitUnreachable(redact_url(&first_line))
    }
}
