use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{ApiKeyAuth, AuthMethod};
use crate::config::{RegistryConfig, ServerConfig};
use crate::extractor::{ModuleAnalyzer, ModuleExtractor, TerraformDocsAnalyzer};
use crate::git::GitFetcher;
use crate::indexing::{IndexingPipeline, LeaseSettings, PipelineSettings, Reaper};
use crate::registry::{
    AnalyticsRecorder, DeletionPolicy, HostingPolicy, ModuleRegistry, RegistrySettings, UrlSigner,
};
use crate::storage::{PathBuilder, StorageEngine, TempDirManager};
use crate::store::Store;
use crate::webhook::WebhookIntake;

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<ModuleRegistry>,
    pub analytics: AnalyticsRecorder,
    pub webhooks: WebhookIntake,
    pub auth: Arc<dyn AuthMethod>,
    pub config: RegistryConfig,
    /// Parent of every background indexing job's cancellation token.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the registry components with terraform-docs as the analyzer.
    pub fn new(store: Arc<dyn Store>, server: &ServerConfig, config: RegistryConfig) -> Self {
        let analyzer = Arc::new(TerraformDocsAnalyzer::new(&config.terraform_docs_binary));
        Self::with_analyzer(store, server, config, analyzer)
    }

    pub fn with_analyzer(
        store: Arc<dyn Store>,
        server: &ServerConfig,
        config: RegistryConfig,
        analyzer: Arc<dyn ModuleAnalyzer>,
    ) -> Self {
        let storage = storage_for(&config);
        let extractor = ModuleExtractor::new(storage.clone(), analyzer, config.extractor.clone());
        let fetcher = GitFetcher::new(config.git_clone_timeout, config.git_credentials.clone());
        let pipeline = IndexingPipeline::new(
            store.clone(),
            storage.clone(),
            TempDirManager::new(config.temp_directory()),
            fetcher,
            extractor,
            PipelineSettings {
                hosting: config.hosting,
                reindex_mode: config.reindex_mode,
                allow_empty_root: config.allow_empty_root,
                auto_create_namespace: config.auto_create_namespace,
                auto_create_module_provider: config.auto_create_module_provider,
                lease: LeaseSettings::default(),
            },
        );

        let signer = match &config.download_url_secret {
            Some(secret) => UrlSigner::new(secret.as_bytes().to_vec(), config.download_url_ttl),
            None => UrlSigner::random(config.download_url_ttl),
        };

        let registry = Arc::new(ModuleRegistry::new(
            store.clone(),
            storage,
            Arc::new(pipeline),
            HostingPolicy::new(config.hosting),
            DeletionPolicy::new(config.redirect_deletion_lookback_days),
            signer,
            RegistrySettings {
                auto_create_namespace: config.auto_create_namespace,
                auto_publish: config.auto_publish,
                public_base_url: server.public_base_url.clone(),
            },
        ));

        let shutdown = CancellationToken::new();
        Self {
            analytics: AnalyticsRecorder::new(store.clone(), config.analytics_keys.clone()),
            webhooks: WebhookIntake::new(
                registry.clone(),
                config.webhook_secret.clone(),
                shutdown.clone(),
            ),
            auth: Arc::new(ApiKeyAuth::new(store.clone())),
            store,
            registry,
            config,
            shutdown,
        }
    }

    /// A reaper over the same trees the registry writes to.
    pub fn reaper(&self) -> Reaper {
        reaper_for(self.store.clone(), &self.config)
    }
}

fn storage_for(config: &RegistryConfig) -> StorageEngine {
    StorageEngine::new(PathBuilder::new(&config.data_dir, config.temp_directory()))
}

/// Build a reaper without a running server, for `tfhost reap`.
pub fn reaper_for(store: Arc<dyn Store>, config: &RegistryConfig) -> Reaper {
    Reaper::new(
        store,
        storage_for(config),
        TempDirManager::new(config.temp_directory()),
        LeaseSettings::default(),
    )
}
