use std::fmt;

use crate::error::{Error, Result};
use crate::types::ModuleIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitTransport {
    Ssh,
    Http,
    File,
}

/// A repository URL split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryUrl {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    /// Owner path; may contain `/` for nested groups.
    pub owner: String,
    pub name: String,
    pub transport: GitTransport,
}

impl RepositoryUrl {
    #[must_use]
    pub fn is_ssh(&self) -> bool {
        self.transport == GitTransport::Ssh
    }
}

impl fmt::Display for RepositoryUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(
                f,
                "{}://{}:{}/{}/{}",
                self.scheme, self.host, port, self.owner, self.name
            ),
            None => write!(f, "{}://{}/{}/{}", self.scheme, self.host, self.owner, self.name),
        }
    }
}

/// Parse `https://host/owner/name(.git)`, `ssh://git@host/owner/name.git`,
/// scp-style `git@host:owner/name.git` and `file:///path/owner/name`.
/// A leading `git::` forced-getter prefix is ignored.
pub fn parse_repository_url(url: &str) -> Result<RepositoryUrl> {
    let url = url.trim();
    let url = url.strip_prefix("git::").unwrap_or(url);
    if url.is_empty() {
        return Err(Error::BadRequest("repository URL is empty".into()));
    }

    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => return parse_scp_like(url),
    };

    let transport = match scheme.as_str() {
        "http" | "https" => GitTransport::Http,
        "ssh" | "git+ssh" => GitTransport::Ssh,
        "file" => GitTransport::File,
        other => {
            return Err(Error::BadRequest(format!(
                "unsupported repository URL scheme '{other}'"
            )));
        }
    };

    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, path),
        None => (rest, ""),
    };
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::BadRequest(format!("invalid port in '{url}'")))?;
            (host, Some(port))
        }
        _ => (host_port, None),
    };

    if host.is_empty() && transport != GitTransport::File {
        return Err(Error::BadRequest(format!("repository URL '{url}' has no host")));
    }

    let (owner, name) = split_owner_name(path, url)?;
    Ok(RepositoryUrl {
        scheme,
        host: host.to_string(),
        port,
        owner,
        name,
        transport,
    })
}

fn parse_scp_like(url: &str) -> Result<RepositoryUrl> {
    let (authority, path) = url
        .split_once(':')
        .ok_or_else(|| Error::BadRequest(format!("unrecognised repository URL '{url}'")))?;
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    if host.is_empty() || host.contains('/') {
        return Err(Error::BadRequest(format!("unrecognised repository URL '{url}'")));
    }
    let (owner, name) = split_owner_name(path, url)?;
    Ok(RepositoryUrl {
        scheme: "ssh".to_string(),
        host: host.to_string(),
        port: None,
        owner,
        name,
        transport: GitTransport::Ssh,
    })
}

fn split_owner_name(path: &str, url: &str) -> Result<(String, String)> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    match path.rsplit_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(Error::BadRequest(format!(
            "repository URL '{url}' must name an owner and a repository"
        ))),
    }
}

/// Strip userinfo so URLs can be logged or returned safely.
#[must_use]
pub fn redact_url(url: &str) -> String {
    if let Some((scheme, rest)) = url.split_once("://") {
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        if let Some((_, host)) = authority.rsplit_once('@') {
            return format!("{scheme}://{host}/{path}");
        }
    }
    url.to_string()
}

/// Expand `{namespace}`, `{module}`, `{provider}`, `{tag}`, `{tag_uri_encoded}`
/// and `{path}` placeholders.
#[must_use]
pub fn render_url_template(
    template: &str,
    identity: &ModuleIdentity,
    tag: Option<&str>,
    path: Option<&str>,
) -> String {
    let tag = tag.unwrap_or_default();
    template
        .replace("{namespace}", &identity.namespace)
        .replace("{module}", &identity.module)
        .replace("{provider}", &identity.provider)
        .replace("{tag_uri_encoded}", &urlencoding::encode(tag))
        .replace("{tag}", tag)
        .replace("{path}", path.unwrap_or_default())
}
