use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::Token;

const ARGON2_MEMORY: u32 = 64 * 1024;
const ARGON2_ITERATIONS: u32 = 1;
const ARGON2_PARALLELISM: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32;

const TOKEN_PREFIX: &str = "tfhost";
const LOOKUP_LENGTH: usize = 8;
const SECRET_LENGTH: usize = 32;
const SECRET_BYTES: usize = 16;

/// Issues and verifies API keys of the form `tfhost_<lookup>_<secret>`.
pub struct TokenGenerator {
    argon2: Argon2<'static>,
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenGenerator {
    #[must_use]
    pub fn new() -> Self {
        let params = Params::new(
            ARGON2_MEMORY,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(ARGON2_OUTPUT_LEN),
        )
        .expect("invalid argon2 params");

        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Returns (raw_token, lookup, hash).
    pub fn generate(&self) -> Result<(String, String, String)> {
        let lookup = generate_lookup();
        let secret = generate_secret();
        let raw_token = format!("{TOKEN_PREFIX}_{lookup}_{secret}");
        let hash = self.hash(&raw_token)?;
        Ok((raw_token, lookup, hash))
    }

    /// Build a storable token row plus the raw key shown once to the operator.
    pub fn issue(&self, is_admin: bool, description: Option<String>) -> Result<(Token, String)> {
        let (raw_token, lookup, hash) = self.generate()?;
        let token = Token {
            id: Uuid::new_v4().to_string(),
            token_hash: hash,
            token_lookup: lookup,
            is_admin,
            description,
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
        };
        Ok((token, raw_token))
    }

    pub fn hash(&self, token: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(token.as_bytes(), &salt)
            .map_err(|e| Error::Config(format!("failed to hash token: {e}")))?;
        Ok(hash.to_string())
    }

    pub fn verify(&self, token: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| Error::Config(format!("invalid hash format: {e}")))?;

        match self.argon2.verify_password(token.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Config(format!("failed to verify token: {e}"))),
        }
    }
}

fn generate_lookup() -> String {
    Uuid::new_v4().simple().to_string()[..LOOKUP_LENGTH].to_string()
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Split a raw key into (lookup, secret). Malformed keys are `Unauthorized`.
pub fn parse_token(token: &str) -> Result<(String, String)> {
    let rest = token
        .strip_prefix(TOKEN_PREFIX)
        .and_then(|r| r.strip_prefix('_'))
        .ok_or(Error::Unauthorized)?;
    let (lookup, secret) = rest.split_once('_').ok_or(Error::Unauthorized)?;

    if lookup.len() != LOOKUP_LENGTH || secret.len() != SECRET_LENGTH || secret.contains('_') {
        return Err(Error::Unauthorized);
    }

    Ok((lookup.to_string(), secret.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_generation_format() {
        let generator = TokenGenerator::new();
        let (token, lookup, _hash) = generator.generate().unwrap();

        assert!(token.starts_with("tfhost_"));
        assert_eq!(lookup.len(), 8);

        let parts: Vec<&str> = token.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 32);
    }

    #[test]
    fn test_issue_builds_admin_row() {
        let generator = TokenGenerator::new();
        let (token, raw) = generator.issue(true, Some("ci".into())).unwrap();

        assert!(token.is_admin);
        assert_eq!(token.description.as_deref(), Some("ci"));
        assert_eq!(parse_token(&raw).unwrap().0, token.token_lookup);
        assert!(generator.verify(&raw, &token.token_hash).unwrap());
    }

    #[test]
    fn test_token_verification_wrong_secret() {
        let generator = TokenGenerator::new();
        let (token, _, hash) = generator.generate().unwrap();

        let wrong_token = format!("{}aaaaa", &token[..token.len() - 5]);
        assert!(!generator.verify(&wrong_token, &hash).unwrap());
    }

    #[test]
    fn test_parse_token() {
        let (lookup, secret) =
            parse_token("tfhost_12345678_0123456789abcdef0123456789abcdef").unwrap();
        assert_eq!(lookup, "12345678");
        assert_eq!(secret, "0123456789abcdef0123456789abcdef");

        assert!(matches!(
            parse_token("gitlab_12345678_0123456789abcdef0123456789abcdef"),
            Err(Error::Unauthorized)
        ));
        assert!(parse_token("tfhost_12345678").is_err());
        assert!(parse_token("tfhost_1234_0123456789abcdef0123456789abcdef").is_err());
    }

    #[test]
    fn test_hash_is_phc_format() {
        let generator = TokenGenerator::new();
        let (_, _, hash) = generator.generate().unwrap();

        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_hash_uses_configured_params() {
        let generator = TokenGenerator::new();
        let (_, _, hash) = generator.generate().unwrap();

        let parsed = PasswordHash::new(&hash).unwrap();
        let params = Params::try_from(&parsed).unwrap();
        assert_eq!(params.m_cost(), ARGON2_MEMORY);
        assert_eq!(params.t_cost(), ARGON2_ITERATIONS);
        assert_eq!(params.p_cost(), ARGON2_PARALLELISM);
        assert_eq!(parsed.hash.unwrap().len(), ARGON2_OUTPUT_LEN);
    }
}
