use axum::http::HeaderMap;
use serde::Deserialize;

use super::{HookEvent, header, parse_json, verify_sha256_signature};
use crate::error::Result;

const TAG_PREFIX: &str = "refs/tags/";

#[derive(Deserialize)]
struct ReleasePayload {
    #[serde(default)]
    action: String,
    release: Release,
}

#[derive(Deserialize)]
struct Release {
    tag_name: String,
}

#[derive(Deserialize)]
struct CreatePayload {
    #[serde(rename = "ref")]
    ref_name: String,
    ref_type: String,
}

#[derive(Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    ref_name: String,
    #[serde(default)]
    deleted: bool,
}

pub(super) fn verify(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<()> {
    verify_sha256_signature(header(headers, "x-hub-signature-256"), body, secret)
}

pub(super) fn parse(headers: &HeaderMap, body: &[u8]) -> Result<HookEvent> {
    let event = header(headers, "x-github-event").unwrap_or_default();
    Ok(match event {
        "release" => {
            let payload: ReleasePayload = parse_json(body)?;
            match payload.action.as_str() {
                "published" | "created" | "released" => HookEvent::Tags(vec![payload.release.tag_name]),
                other => HookEvent::Ignored(format!("release action '{other}'")),
            }
        }
        "create" => {
            let payload: CreatePayload = parse_json(body)?;
            if payload.ref_type == "tag" {
                HookEvent::Tags(vec![payload.ref_name])
            } else {
                HookEvent::Ignored(format!("created {}", payload.ref_type))
            }
        }
        "push" => {
            let payload: PushPayload = parse_json(body)?;
            match payload.ref_name.strip_prefix(TAG_PREFIX) {
                Some(tag) if !payload.deleted => HookEvent::Tags(vec![tag.to_string()]),
                _ => HookEvent::Ignored("push is not a new tag".into()),
            }
        }
        other => HookEvent::Ignored(format!("event '{other}'")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(event: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-github-event", event.parse().unwrap());
        headers
    }

    #[test]
    fn test_release_event() {
        let body = br#"{"action":"published","release":{"tag_name":"v1.2.0"}}"#;
        assert_eq!(
            parse(&headers("release"), body).unwrap(),
            HookEvent::Tags(vec!["v1.2.0".into()])
        );
        let body = br#"{"action":"deleted","release":{"tag_name":"v1.2.0"}}"#;
        assert!(matches!(parse(&headers("release"), body).unwrap(), HookEvent::Ignored(_)));
    }

    #[test]
    fn test_create_and_push_events() {
        let body = br#"{"ref":"v2.0.0","ref_type":"tag"}"#;
        assert_eq!(
            parse(&headers("create"), body).unwrap(),
            HookEvent::Tags(vec!["v2.0.0".into()])
        );
        let body = br#"{"ref":"main","ref_type":"branch"}"#;
        assert!(matches!(parse(&headers("create"), body).unwrap(), HookEvent::Ignored(_)));

        let body = br#"{"ref":"refs/tags/v2.1.0","deleted":false}"#;
        assert_eq!(
            parse(&headers("push"), body).unwrap(),
            HookEvent::Tags(vec!["v2.1.0".into()])
        );
        let body = br#"{"ref":"refs/tags/v2.1.0","deleted":true}"#;
        assert!(matches!(parse(&headers("push"), body).unwrap(), HookEvent::Ignored(_)));
        assert!(matches!(parse(&headers("ping"), b"{}").unwrap(), HookEvent::Ignored(_)));
    }

    #[test]
    fn test_malformed_payload() {
        assert!(parse(&headers("release"), b"not json").is_err());
    }
}
