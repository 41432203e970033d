use axum::http::HeaderMap;
use serde::Deserialize;

use super::{HookEvent, constant_time_eq, header, parse_json};
use crate::error::{Error, Result};

const TAG_PREFIX: &str = "refs/tags/";

#[derive(Deserialize)]
struct TagPushPayload {
    #[serde(rename = "ref")]
    ref_name: String,
    /// Null when the tag was deleted.
    #[serde(default)]
    checkout_sha: Option<String>,
}

#[derive(Deserialize)]
struct ReleasePayload {
    tag: String,
    #[serde(default)]
    action: String,
}

/// GitLab sends the configured secret verbatim in `X-Gitlab-Token`.
pub(super) fn verify(headers: &HeaderMap, secret: &str) -> Result<()> {
    match header(headers, "x-gitlab-token") {
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => Ok(()),
        _ => Err(Error::Unauthorized),
    }
}

pub(super) fn parse(headers: &HeaderMap, body: &[u8]) -> Result<HookEvent> {
    let event = header(headers, "x-gitlab-event").unwrap_or_default();
    Ok(match event {
        "Tag Push Hook" => {
            let payload: TagPushPayload = parse_json(body)?;
            match (payload.ref_name.strip_prefix(TAG_PREFIX), payload.checkout_sha) {
                (Some(tag), Some(_)) => HookEvent::Tags(vec![tag.to_string()]),
                _ => HookEvent::Ignored("tag was removed".into()),
            }
        }
        "Release Hook" => {
            let payload: ReleasePayload = parse_json(body)?;
            match payload.action.as_str() {
                "create" | "update" => HookEvent::Tags(vec![payload.tag]),
                other => HookEvent::Ignored(format!("release action '{other}'")),
            }
        }
        other => HookEvent::Ignored(format!("event '{other}'")),
    })
}
