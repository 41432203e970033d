use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tri-state module hosting flag (`ALLOW_MODULE_HOSTING`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostingMode {
    #[default]
    Allow,
    Disallow,
    Enforce,
}

impl HostingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "true",
            Self::Disallow => "false",
            Self::Enforce => "enforce",
        }
    }
}

impl FromStr for HostingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "allow" | "1" => Ok(Self::Allow),
            "false" | "disallow" | "0" => Ok(Self::Disallow),
            "enforce" => Ok(Self::Enforce),
            other => Err(format!(
                "invalid hosting mode '{other}', expected true, false or enforce"
            )),
        }
    }
}

/// Policy applied when a version that already exists is indexed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReindexMode {
    #[default]
    Legacy,
    AutoPublish,
    Prohibit,
}

impl ReindexMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::AutoPublish => "auto-publish",
            Self::Prohibit => "prohibit",
        }
    }
}

impl FromStr for ReindexMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "auto-publish" | "auto_publish" => Ok(Self::AutoPublish),
            "prohibit" => Ok(Self::Prohibit),
            other => Err(format!(
                "invalid reindex mode '{other}', expected legacy, auto-publish or prohibit"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamespaceKind {
    #[default]
    Plain,
    Trusted,
    VerifiedModulePublisher,
}

impl NamespaceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Trusted => "trusted",
            Self::VerifiedModulePublisher => "verified-module-publisher",
        }
    }
}

impl FromStr for NamespaceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "trusted" => Ok(Self::Trusted),
            "verified-module-publisher" => Ok(Self::VerifiedModulePublisher),
            other => Err(format!("invalid namespace kind '{other}'")),
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a nested module directory is a submodule or an example.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmoduleKind {
    Submodule,
    Example,
}

impl SubmoduleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submodule => "submodule",
            Self::Example => "example",
        }
    }
}

impl FromStr for SubmoduleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submodule" => Ok(Self::Submodule),
            "example" => Ok(Self::Example),
            other => Err(format!("invalid submodule kind '{other}'")),
        }
    }
}
