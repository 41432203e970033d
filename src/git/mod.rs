mod fetch;
mod tag;
mod url;

pub use fetch::{DEFAULT_CLONE_TIMEOUT, FetchedRef, GitCredentials, GitFetcher};
pub use tag::{DEFAULT_TAG_FORMAT, TagFormat};
pub use url::{GitTransport, RepositoryUrl, parse_repository_url, redact_url, render_url_template};
