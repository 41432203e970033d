//! Registry-level behavior on top of the store: redirects, hosting policy,
//! analytics, signed download URLs and the module lifecycle.

mod analytics;
mod hosting;
mod redirect;
mod service;
mod signing;

pub use analytics::{
    AnalyticsKeys, AnalyticsRecorder, DownloadContext, ProviderAnalytics, split_analytics_token,
};
pub use hosting::{DeletionPolicy, DownloadSource, HostingPolicy};
pub use redirect::{RedirectResolver, ResolvedProvider};
pub use service::{
    DownloadTarget, LATEST, ModuleRegistry, ProviderFields, ProviderUpdate, RegistrySettings,
    archive_url_path,
};
pub use signing::{DEFAULT_URL_TTL, UrlSigner};
