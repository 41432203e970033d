use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tfhost::auth::TokenGenerator;
use tfhost::config::{RegistryConfig, ServerConfig, db_path};
use tfhost::server::{AppState, create_router, reaper_for};
use tfhost::store::{SqliteStore, Store};

const TOKEN_FILE: &str = ".admin_token";

#[cfg(unix)]
fn set_restrictive_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[derive(Parser)]
#[command(name = "tfhost")]
#[command(about = "A private Terraform module registry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(long, short, default_value = "5000")]
        port: u16,

        /// Data directory for the database and module archives.
        /// Overrides TFHOST_DATA_DIR.
        #[arg(long)]
        data_dir: Option<String>,

        /// Public base URL for external access (e.g., "https://registry.example.com").
        /// Prefixed to signed download URLs handed to Terraform.
        #[arg(long)]
        public_base_url: Option<String>,
    },

    /// Remove orphaned archives and stale temp directories, then exit
    Reap {
        /// Overrides TFHOST_DATA_DIR.
        #[arg(long)]
        data_dir: Option<String>,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Initialize the registry (create database and admin token)
    Init {
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },
}

fn run_init(data_dir: String) -> anyhow::Result<()> {
    let data_path = PathBuf::from(data_dir);
    fs::create_dir_all(&data_path)?;

    let store = SqliteStore::new(db_path(&data_path))?;
    store.initialize()?;

    let token_file = data_path.join(TOKEN_FILE);

    if store.has_admin_token()? {
        bail!(
            "Registry already initialized. Admin token exists at: {}",
            token_file.display()
        );
    }

    let (token, raw_token) = TokenGenerator::new().issue(true, Some("initial admin token".into()))?;
    store.create_token(&token)?;
    fs::write(&token_file, &raw_token)?;

    #[cfg(unix)]
    set_restrictive_permissions(&token_file);

    println!();
    println!("========================================");
    println!("Admin token (save this, it won't be shown again):");
    println!();
    println!("  {raw_token}");
    println!();
    println!("Token also written to: {}", token_file.display());
    println!("========================================");
    println!();

    Ok(())
}

fn load_config(data_dir: Option<String>) -> anyhow::Result<RegistryConfig> {
    let mut config = RegistryConfig::from_env()?;
    if let Some(dir) = data_dir {
        config.data_dir = dir.into();
    }
    Ok(config)
}

fn open_store(data_dir: &Path) -> anyhow::Result<SqliteStore> {
    const NOT_INITIALIZED: &str =
        "Registry not initialized. Run 'tfhost admin init' first to create the database and admin token.";
    if !data_dir.join(TOKEN_FILE).exists() {
        bail!(NOT_INITIALIZED);
    }
    let store = SqliteStore::new(db_path(data_dir))?;
    store.initialize()?;
    if !store.has_admin_token()? {
        bail!(NOT_INITIALIZED);
    }
    Ok(store)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
}

async fn serve(server: ServerConfig, config: RegistryConfig) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(open_store(&server.data_dir)?);
    info!(
        "Admin token available at {}",
        server.data_dir.join(TOKEN_FILE).display()
    );

    let state = Arc::new(AppState::new(store, &server, config));

    if let Some(every) = state.config.reaper_interval {
        let reaper = Arc::new(state.reaper());
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaper = reaper.clone();
                        match tokio::task::spawn_blocking(move || reaper.sweep()).await {
                            Ok(Ok(report)) => info!("Reaper sweep: {report:?}"),
                            Ok(Err(e)) => error!("Reaper sweep failed: {e}"),
                            Err(e) => error!("Reaper task panicked: {e}"),
                        }
                    }
                }
            }
        });
    }

    let shutdown = state.shutdown.clone();
    let app = create_router(state);
    let addr = server.socket_addr()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutting down, cancelling indexing jobs");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("tfhost=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init { data_dir } => run_init(data_dir)?,
        },
        Commands::Serve {
            host,
            port,
            data_dir,
            public_base_url,
        } => {
            let config = load_config(data_dir)?;
            let server = ServerConfig {
                host,
                port,
                data_dir: config.data_dir.clone(),
                public_base_url,
            };
            serve(server, config).await?;
        }
        Commands::Reap { data_dir } => {
            let config = load_config(data_dir)?;
            let store: Arc<dyn Store> = Arc::new(open_store(&config.data_dir)?);
            let report = reaper_for(store, &config).sweep()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
