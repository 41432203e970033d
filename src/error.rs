use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid {field}: {reason}")]
    InvalidTarget { field: &'static str, reason: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("module hosting disabled: {0}")]
    HostingDisabled(String),

    #[error("reindex prohibited: {0}")]
    ReindexProhibited(String),

    #[error("git repository unreachable: {0}")]
    GitUnreachable(String),

    #[error("git authentication required: {0}")]
    GitAuthRequired(String),

    #[error("git clone timed out")]
    GitTimeout,

    #[error("git ref not found: {0}")]
    GitRefNotFound(String),

    #[error("module extraction failed: {message}")]
    ExtractionFailed { message: String, stderr: String },

    #[error("archive failed: {0}")]
    ArchiveFailed(String),

    #[error("path traversal: {0}")]
    PathTraversal(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("operation cancelled")]
    Cancelled,

    #[error("token lookup collision")]
    TokenLookupCollision,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl Error {
    pub fn extraction(message: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            message: message.into(),
            stderr: stderr.into(),
        }
    }

    pub fn invalid_target(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            field,
            reason: reason.into(),
        }
    }

    /// Stable kind name surfaced to API clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTarget { .. } => "InvalidTarget",
            Self::Conflict(_) => "Conflict",
            Self::HostingDisabled(_) => "HostingDisabled",
            Self::ReindexProhibited(_) => "ReindexProhibited",
            Self::GitUnreachable(_) => "GitUnreachable",
            Self::GitAuthRequired(_) => "GitAuthRequired",
            Self::GitTimeout => "GitTimeout",
            Self::GitRefNotFound(_) => "GitRefNotFound",
            Self::ExtractionFailed { .. } => "ExtractionFailed",
            Self::ArchiveFailed(_) => "ArchiveFailed",
            Self::PathTraversal(_) | Self::InvalidPath(_) => "PathTraversal",
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::Cancelled => "Cancelled",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::BadRequest(_) => "BadRequest",
            Self::Database(_)
            | Self::Io(_)
            | Self::TokenLookupCollision
            | Self::Config(_) => "Internal",
        }
    }

    /// Recoverable failures abort an indexing attempt cleanly and may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GitUnreachable(_)
                | Self::GitAuthRequired(_)
                | Self::GitTimeout
                | Self::GitRefNotFound(_)
                | Self::ExtractionFailed { .. }
                | Self::ArchiveFailed(_)
                | Self::Conflict(_)
        )
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Self::ArchiveFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
