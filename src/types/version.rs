//! Version identity: strict semver parsing, beta classification and
//! "latest published non-beta" selection.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// A parsed semantic version.
pub type Version = semver::Version;

/// Parse a version string like "1.2.3" or "1.0.0-beta1+build.5".
///
/// Leading `v` prefixes and partial versions are rejected.
pub fn parse_version(s: &str) -> Result<Version> {
    Version::parse(s).map_err(|e| Error::invalid_target("version", format!("'{s}': {e}")))
}

/// A version is beta iff it carries a prerelease component.
#[must_use]
pub fn is_beta(version: &Version) -> bool {
    !version.pre.is_empty()
}

/// Classify a version string, returning `None` when it does not parse.
#[must_use]
pub fn is_beta_str(s: &str) -> Option<bool> {
    Version::parse(s).ok().map(|v| is_beta(&v))
}

/// A version candidate for latest selection.
#[derive(Debug, Clone)]
pub struct VersionCandidate<K> {
    pub key: K,
    pub version: Version,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
}

/// Orders by semver precedence (build metadata ignored), ties broken by
/// publish time so the later-published candidate sorts greater.
fn compare_candidates<K>(a: &VersionCandidate<K>, b: &VersionCandidate<K>) -> Ordering {
    a.version
        .cmp_precedence(&b.version)
        .then_with(|| a.published_at.cmp(&b.published_at))
}

/// Selects the latest published, non-beta candidate.
pub fn select_latest<K: Clone>(candidates: &[VersionCandidate<K>]) -> Option<K> {
    candidates
        .iter()
        .filter(|c| c.published && !is_beta(&c.version))
        .max_by(|a, b| compare_candidates(a, b))
        .map(|c| c.key.clone())
}

/// Sorts version strings by semver precedence, newest first. Unparseable
/// strings sort last.
pub fn sort_descending(versions: &mut [String]) {
    versions.sort_by(|a, b| cmp_descending(a, b));
}

/// Newest-first ordering; unparseable versions sort last.
pub fn cmp_descending(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(va), Ok(vb)) => vb.cmp_precedence(&va),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn candidate(key: i64, v: &str, published: bool, at: i64) -> VersionCandidate<i64> {
        VersionCandidate {
            key,
            version: parse_version(v).unwrap(),
            published,
            published_at: published.then(|| Utc.timestamp_opt(at, 0).unwrap()),
        }
    }

    #[test]
    fn test_parse_is_strict() {
        assert!(parse_version("1.2.3").is_ok());
        assert!(parse_version("1.0.0-beta1+exp.sha.5114f85").is_ok());
        assert!(parse_version("v1.2.3").is_err());
        assert!(parse_version("1.2").is_err());
        assert!(parse_version("").is_err());
        assert!(matches!(
            parse_version("latest"),
            Err(Error::InvalidTarget { field: "version", .. })
        ));
    }

    #[test]
    fn test_beta_classification() {
        assert!(!is_beta(&parse_version("1.0.0").unwrap()));
        assert!(is_beta(&parse_version("1.0.0-beta1").unwrap()));
        assert!(!is_beta(&parse_version("1.0.0+build").unwrap()));
        assert_eq!(is_beta_str("2.0.0-rc.1"), Some(true));
        assert_eq!(is_beta_str("nope"), None);
    }

    #[test]
    fn test_latest_uses_semver_not_lexical() {
        let candidates = vec![
            candidate(1, "1.9.0", true, 10),
            candidate(2, "1.10.0", true, 5),
            candidate(3, "1.2.0", true, 20),
        ];
        assert_eq!(select_latest(&candidates), Some(2));
    }

    #[test]
    fn test_latest_skips_beta_and_unpublished() {
        let candidates = vec![
            candidate(1, "1.0.0-beta1", true, 1),
            candidate(2, "2.0.0", false, 0),
            candidate(3, "0.9.0", true, 3),
        ];
        assert_eq!(select_latest(&candidates), Some(3));

        let only_beta = vec![candidate(1, "1.0.0-beta1", true, 1)];
        assert_eq!(select_latest(&only_beta), None);
    }

    #[test]
    fn test_latest_tie_prefers_later_published() {
        let candidates = vec![
            candidate(1, "1.0.0+a", true, 100),
            candidate(2, "1.0.0+b", true, 50),
        ];
        assert_eq!(select_latest(&candidates), Some(1));
    }

    #[test]
    fn test_sort_descending() {
        let mut versions = vec![
            "0.9.0".to_string(),
            "1.10.0".to_string(),
            "1.2.0".to_string(),
            "1.10.0-rc1".to_string(),
        ];
        sort_descending(&mut versions);
        assert_eq!(versions, ["1.10.0", "1.10.0-rc1", "1.2.0", "0.9.0"]);
    }
}
