use crate::error::{Error, Result};
use crate::types::version::parse_version;

const MAX_NAME_LEN: usize = 64;

fn validate_name(name: &str, field: &'static str, allow_upper: bool) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_target(field, "cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid_target(
            field,
            format!("cannot exceed {MAX_NAME_LEN} characters"),
        ));
    }

    let valid_char = |c: char| {
        c.is_ascii_digit() || c.is_ascii_lowercase() || (allow_upper && c.is_ascii_uppercase())
    };
    let mut chars = name.chars();
    if !chars.next().is_some_and(valid_char) {
        return Err(Error::invalid_target(
            field,
            format!("'{name}' must start with a letter or digit"),
        ));
    }
    if !chars.all(|c| valid_char(c) || c == '-') {
        return Err(Error::invalid_target(
            field,
            format!("'{name}' may only contain lowercase letters, digits and hyphens"),
        ));
    }
    Ok(())
}

/// Namespaces match case-insensitively, so either case is accepted.
pub fn validate_namespace_name(name: &str) -> Result<()> {
    validate_name(name, "namespace", true)
}

pub fn validate_module_name(name: &str) -> Result<()> {
    validate_name(name, "module", false)
}

pub fn validate_provider_name(name: &str) -> Result<()> {
    validate_name(name, "provider", false)
}

/// Validate every component of an indexing target.
pub fn validate_target(namespace: &str, module: &str, provider: &str, version: &str) -> Result<()> {
    validate_namespace_name(namespace)?;
    validate_module_name(module)?;
    validate_provider_name(provider)?;
    parse_version(version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_module_name("vpc").is_ok());
        assert!(validate_module_name("aws-sg").is_ok());
        assert!(validate_module_name("0day").is_ok());
        assert!(validate_namespace_name("Acme").is_ok());
        assert!(validate_module_name(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_module_name("").is_err());
        assert!(validate_module_name("-vpc").is_err());
        assert!(validate_module_name("Vpc").is_err());
        assert!(validate_module_name("vpc_1").is_err());
        assert!(validate_module_name("..").is_err());
        assert!(validate_provider_name(&"a".repeat(65)).is_err());
        assert!(matches!(
            validate_module_name("a/b"),
            Err(Error::InvalidTarget { field: "module", .. })
        ));
    }

    #[test]
    fn test_validate_target() {
        assert!(validate_target("acme", "vpc", "aws", "1.0.0").is_ok());
        assert!(matches!(
            validate_target("acme", "vpc", "aws", "1.0"),
            Err(Error::InvalidTarget { field: "version", .. })
        ));
    }
}
