use std::sync::Arc;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;

use super::{AuthKind, AuthMethod, Principal, TokenGenerator, parse_token};
use crate::error::{Error, Result};
use crate::store::Store;

/// Argon2-hashed API keys stored in the `tokens` table.
pub struct ApiKeyAuth {
    store: Arc<dyn Store>,
    generator: TokenGenerator,
}

impl ApiKeyAuth {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            generator: TokenGenerator::new(),
        }
    }
}

/// Token from `Authorization: Bearer <key>` or `Basic base64(x-token:<key>)`.
pub fn extract_key(headers: &HeaderMap) -> Result<String> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(Error::Unauthorized)?;

    if let Some(key) = header.strip_prefix("Bearer ") {
        return Ok(key.trim().to_string());
    }
    if let Some(encoded) = header.strip_prefix("Basic ") {
        let decoded = STANDARD.decode(encoded).map_err(|_| Error::Unauthorized)?;
        let credentials = String::from_utf8(decoded).map_err(|_| Error::Unauthorized)?;
        return match credentials.split_once(':') {
            Some(("x-token", key)) => Ok(key.to_string()),
            _ => Err(Error::Unauthorized),
        };
    }
    Err(Error::Unauthorized)
}

impl AuthMethod for ApiKeyAuth {
    fn kind(&self) -> AuthKind {
        AuthKind::ApiKey
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<Principal> {
        let raw = extract_key(headers)?;
        let (lookup, _secret) = parse_token(&raw)?;

        let token = self
            .store
            .get_token_by_lookup(&lookup)?
            .ok_or(Error::Unauthorized)?;

        if !self.generator.verify(&raw, &token.token_hash)? {
            return Err(Error::Unauthorized);
        }
        if token.expires_at.is_some_and(|at| at < Utc::now()) {
            return Err(Error::Unauthorized);
        }

        if let Err(e) = self.store.update_token_last_used(&token.id) {
            tracing::warn!("Failed to update token last_used_at: {e}");
        }

        Ok(Principal {
            id: token.id,
            kind: AuthKind::ApiKey,
            is_admin: token.is_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<dyn Store>) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("tfhost.db")).unwrap();
        store.initialize().unwrap();
        (dir, Arc::new(store))
    }

    fn bearer(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {key}").parse().unwrap());
        headers
    }

    #[test]
    fn test_authenticates_stored_key() {
        let (_dir, store) = setup();
        let (token, raw) = TokenGenerator::new().issue(true, None).unwrap();
        store.create_token(&token).unwrap();

        let auth = ApiKeyAuth::new(store.clone());
        let principal = auth.authenticate(&bearer(&raw)).unwrap();
        assert_eq!(principal.id, token.id);
        assert!(principal.is_admin);
        assert_eq!(principal.kind, AuthKind::ApiKey);

        let basic = format!("Basic {}", STANDARD.encode(format!("x-token:{raw}")));
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, basic.parse().unwrap());
        assert!(auth.authenticate(&headers).is_ok());
    }

    #[test]
    fn test_rejects_bad_credentials() {
        let (_dir, store) = setup();
        let (token, raw) = TokenGenerator::new().issue(false, None).unwrap();
        store.create_token(&token).unwrap();
        let auth = ApiKeyAuth::new(store);

        assert!(matches!(auth.authenticate(&HeaderMap::new()), Err(Error::Unauthorized)));

        let tampered = format!("{}{}", &raw[..raw.len() - 1], if raw.ends_with('0') { '1' } else { '0' });
        assert!(matches!(auth.authenticate(&bearer(&tampered)), Err(Error::Unauthorized)));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Digest abc".parse().unwrap());
        assert!(matches!(auth.authenticate(&headers), Err(Error::Unauthorized)));
    }
}
