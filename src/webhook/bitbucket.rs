use axum::http::HeaderMap;
use serde::Deserialize;

use super::{HookEvent, header, parse_json, verify_sha256_signature};
use crate::error::Result;

const TAG_PREFIX: &str = "refs/tags/";

/// Bitbucket Server / Data Center `repo:refs_changed`.
#[derive(Deserialize)]
struct RefsChangedPayload {
    #[serde(default)]
    changes: Vec<RefChange>,
}

#[derive(Deserialize)]
struct RefChange {
    #[serde(rename = "ref")]
    changed: ChangedRef,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ChangedRef {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
}

/// Bitbucket Cloud `repo:push`.
#[derive(Deserialize)]
struct PushPayload {
    push: Push,
}

#[derive(Deserialize)]
struct Push {
    #[serde(default)]
    changes: Vec<PushChange>,
}

#[derive(Deserialize)]
struct PushChange {
    #[serde(default)]
    new: Option<PushRef>,
}

#[derive(Deserialize)]
struct PushRef {
    #[serde(rename = "type")]
    kind: String,
    name: String,
}

pub(super) fn verify(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<()> {
    verify_sha256_signature(header(headers, "x-hub-signature"), body, secret)
}

pub(super) fn parse(headers: &HeaderMap, body: &[u8]) -> Result<HookEvent> {
    let event = header(headers, "x-event-key").unwrap_or_default();
    let tags: Vec<String> = match event {
        "repo:refs_changed" => {
            let payload: RefsChangedPayload = parse_json(body)?;
            payload
                .changes
                .into_iter()
                .filter(|c| c.kind != "DELETE" && (c.changed.kind == "TAG" || c.changed.id.starts_with(TAG_PREFIX)))
                .map(|c| {
                    c.changed
                        .id
                        .strip_prefix(TAG_PREFIX)
                        .map(str::to_string)
                        .unwrap_or(c.changed.id)
                })
                .collect()
        }
        "repo:push" => {
            let payload: PushPayload = parse_json(body)?;
            payload
                .push
                .changes
                .into_iter()
                .filter_map(|c| c.new)
                .filter(|r| r.kind == "tag")
                .map(|r| r.name)
                .collect()
        }
        "diagnostics:ping" => return Ok(HookEvent::Ignored("ping".into())),
        other => return Ok(HookEvent::Ignored(format!("event '{other}'"))),
    };

    if tags.is_empty() {
        Ok(HookEvent::Ignored("no tags were added".into()))
    } else {
        Ok(HookEvent::Tags(tags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(event: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-event-key", event.parse().unwrap());
        headers
    }

    #[test]
    fn test_refs_changed() {
        let body = br#"{"changes":[
            {"ref":{"id":"refs/tags/v1.0.0","displayId":"v1.0.0","type":"TAG"},"type":"ADD"},
            {"ref":{"id":"refs/heads/main","displayId":"main","type":"BRANCH"},"type":"UPDATE"},
            {"ref":{"id":"refs/tags/v0.9.0","displayId":"v0.9.0","type":"TAG"},"type":"DELETE"}
        ]}"#;
        assert_eq!(
            parse(&headers("repo:refs_changed"), body).unwrap(),
            HookEvent::Tags(vec!["v1.0.0".into()])
        );
    }

    #[test]
    fn test_cloud_push() {
        let body = br#"{"push":{"changes":[
            {"new":{"type":"tag","name":"v3.0.0"}},
            {"new":{"type":"branch","name":"main"}},
            {"new":null}
        ]}}"#;
        assert_eq!(
            parse(&headers("repo:push"), body).unwrap(),
            HookEvent::Tags(vec!["v3.0.0".into()])
        );
        let branch_only = br#"{"push":{"changes":[{"new":{"type":"branch","name":"main"}}]}}"#;
        assert!(matches!(
            parse(&headers("repo:push"), branch_only).unwrap(),
            HookEvent::Ignored(_)
        ));
    }
}
