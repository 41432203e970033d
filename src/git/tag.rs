use crate::error::{Error, Result};
use crate::types::version::parse_version;

pub const DEFAULT_TAG_FORMAT: &str = "{version}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Version,
    Major,
    Minor,
    Patch,
}

#[derive(Debug, Default, Clone, Copy)]
struct Captures<'a> {
    version: Option<&'a str>,
    major: Option<&'a str>,
    minor: Option<&'a str>,
    patch: Option<&'a str>,
}

/// Git tag template such as `v{version}` or `release-{major}.{minor}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFormat {
    tokens: Vec<Token>,
}

impl Default for TagFormat {
    fn default() -> Self {
        Self {
            tokens: vec![Token::Version],
        }
    }
}

impl TagFormat {
    pub fn parse(template: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while !rest.is_empty() {
            let placeholder = [
                ("{version}", Token::Version),
                ("{major}", Token::Major),
                ("{minor}", Token::Minor),
                ("{patch}", Token::Patch),
            ]
            .into_iter()
            .find(|(name, _)| rest.starts_with(name));

            if let Some((name, token)) = placeholder {
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(token);
                rest = &rest[name.len()..];
            } else {
                let mut chars = rest.chars();
                if let Some(c) = chars.next() {
                    literal.push(c);
                }
                rest = chars.as_str();
            }
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        let has_version = tokens.contains(&Token::Version);
        let has_parts = tokens
            .iter()
            .any(|t| matches!(t, Token::Major | Token::Minor | Token::Patch));
        if !has_version && !tokens.contains(&Token::Major) {
            return Err(Error::BadRequest(format!(
                "tag format '{template}' must contain {{version}} or {{major}}"
            )));
        }
        if has_version && has_parts {
            return Err(Error::BadRequest(format!(
                "tag format '{template}' cannot mix {{version}} with {{major}}/{{minor}}/{{patch}}"
            )));
        }
        Ok(Self { tokens })
    }

    /// Parse an optional template, falling back to `{version}`.
    pub fn parse_or_default(template: Option<&str>) -> Result<Self> {
        match template {
            Some(t) if !t.trim().is_empty() => Self::parse(t.trim()),
            _ => Ok(Self::default()),
        }
    }

    /// Render the tag name for `version`.
    pub fn render(&self, version: &str) -> Result<String> {
        let parsed = parse_version(version)?;
        let mut tag = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(s) => tag.push_str(s),
                Token::Version => tag.push_str(version),
                Token::Major => tag.push_str(&parsed.major.to_string()),
                Token::Minor => tag.push_str(&parsed.minor.to_string()),
                Token::Patch => tag.push_str(&parsed.patch.to_string()),
            }
        }
        Ok(tag)
    }

    /// Extract the module version a tag encodes, or `None` when the tag does
    /// not match this format or the result is not a valid version.
    #[must_use]
    pub fn extract_version(&self, tag: &str) -> Option<String> {
        let captures = match_tokens(&self.tokens, tag, Captures::default())?;

        let version = match captures.version {
            Some(v) => v.to_string(),
            None => format!(
                "{}.{}.{}",
                captures.major?,
                captures.minor.unwrap_or("0"),
                captures.patch.unwrap_or("0")
            ),
        };
        parse_version(&version).ok().map(|_| version)
    }
}

fn is_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+')
}

fn match_tokens<'a>(tokens: &[Token], input: &'a str, captures: Captures<'a>) -> Option<Captures<'a>> {
    let Some((first, rest)) = tokens.split_first() else {
        return input.is_empty().then_some(captures);
    };

    if let Token::Literal(literal) = first {
        let remaining = input.strip_prefix(literal.as_str())?;
        return match_tokens(rest, remaining, captures);
    }

    let allowed: fn(char) -> bool = match first {
        Token::Version => is_version_char,
        _ => |c: char| c.is_ascii_digit(),
    };
    let max = input.find(|c: char| !allowed(c)).unwrap_or(input.len());

    // Longest capture first, backtracking so trailing literals can still match.
    (1..=max).rev().find_map(|end| {
        let (value, remaining) = input.split_at(end);
        let mut attempt = captures;
        match first {
            Token::Version => attempt.version = Some(value),
            Token::Major => attempt.major = Some(value),
            Token::Minor => attempt.minor = Some(value),
            Token::Patch => attempt.patch = Some(value),
            Token::Literal(_) => return None,
        }
        match_tokens(rest, remaining, attempt)
    })
}
