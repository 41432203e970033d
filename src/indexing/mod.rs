//! Indexing: turning an uploaded archive or a git tag into a persisted,
//! downloadable module version.

mod lease;
mod pipeline;
mod reaper;

use std::fmt;

use bytes::Bytes;

pub use lease::{LeaseGuard, LeaseSettings};
pub use pipeline::{IndexingPipeline, PipelineSettings};
pub use reaper::{ReapReport, Reaper};

use crate::error::Result;
use crate::types::validation::validate_target;
use crate::types::{ModuleIdentity, ModuleVersion};

/// The (namespace, module, provider, version) slot being indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTarget {
    pub identity: ModuleIdentity,
    pub version: String,
}

impl IndexTarget {
    pub fn new(identity: ModuleIdentity, version: impl Into<String>) -> Self {
        Self {
            identity,
            version: version.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_target(
            &self.identity.namespace,
            &self.identity.module,
            &self.identity.provider,
            &self.version,
        )
    }
}

impl fmt::Display for IndexTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.identity, self.version)
    }
}

/// Where the module source comes from.
#[derive(Clone)]
pub enum IndexSource {
    /// A zip or tar.gz body.
    UploadedArchive(Bytes),
    GitRef { url: String, git_ref: String },
}

impl fmt::Debug for IndexSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UploadedArchive(data) => write!(f, "UploadedArchive({} bytes)", data.len()),
            Self::GitRef { url, git_ref } => f
                .debug_struct("GitRef")
                .field("url", &crate::git::redact_url(url))
                .field("git_ref", git_ref)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Request publication of the indexed version. Reindex policy may still
    /// force or keep publication.
    pub publish: bool,
}

#[derive(Debug, Clone)]
pub struct IndexOutcome {
    pub version: ModuleVersion,
    pub latest_version_id: Option<i64>,
    /// An existing version was replaced.
    pub reindexed: bool,
}
