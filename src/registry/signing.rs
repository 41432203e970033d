use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(600);

/// Signs local archive paths so download URLs can be handed to clients
/// without credentials.
#[derive(Clone)]
pub struct UrlSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(key: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            ttl,
        }
    }

    /// A signer with a per-process key; URLs do not survive a restart.
    #[must_use]
    pub fn random(ttl: Duration) -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill(&mut key);
        Self::new(key.to_vec(), ttl)
    }

    fn mac(&self, path: &str, expires: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::Config(format!("invalid signing key: {e}")))?;
        mac.update(path.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// `(expires, hex signature)` for `path`.
    pub fn sign(&self, path: &str, now: DateTime<Utc>) -> Result<(i64, String)> {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = now.timestamp().saturating_add(ttl);
        let signature = hex::encode(self.mac(path, expires)?.finalize().into_bytes());
        Ok((expires, signature))
    }

    /// `path?expires=..&signature=..`
    pub fn signed_query(&self, path: &str, now: DateTime<Utc>) -> Result<String> {
        let (expires, signature) = self.sign(path, now)?;
        Ok(format!("expires={expires}&signature={signature}"))
    }

    pub fn verify(&self, path: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> Result<()> {
        if now.timestamp() > expires {
            return Err(Error::Forbidden);
        }
        let provided = hex::decode(signature).map_err(|_| Error::Forbidden)?;
        self.mac(path, expires)?
            .verify_slice(&provided)
            .map_err(|_| Error::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/v1/tfhost/modules/acme/vpc/aws/1.0.0/source.zip";

    #[test]
    fn test_sign_and_verify() {
        let signer = UrlSigner::new(b"secret".to_vec(), Duration::from_secs(60));
        let now = Utc::now();
        let (expires, signature) = signer.sign(PATH, now).unwrap();
        assert_eq!(expires, now.timestamp() + 60);
        assert!(signer.verify(PATH, expires, &signature, now).is_ok());
    }

    #[test]
    fn test_rejects_tampering_and_expiry() {
        let signer = UrlSigner::new(b"secret".to_vec(), Duration::from_secs(60));
        let now = Utc::now();
        let (expires, signature) = signer.sign(PATH, now).unwrap();

        let other_path = PATH.replace("1.0.0", "2.0.0");
        assert!(matches!(
            signer.verify(&other_path, expires, &signature, now),
            Err(Error::Forbidden)
        ));
        assert!(signer.verify(PATH, expires + 1, &signature, now).is_err());
        assert!(signer.verify(PATH, expires, "zz", now).is_err());

        let later = now + chrono::Duration::seconds(61);
        assert!(signer.verify(PATH, expires, &signature, later).is_err());

        let stranger = UrlSigner::new(b"other".to_vec(), Duration::from_secs(60));
        assert!(stranger.verify(PATH, expires, &signature, now).is_err());
    }
}
