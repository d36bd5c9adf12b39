use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use tessera_server::config::ServerConfig;
use tessera_server::gate::LoggingQuery;
use tessera_server::settings::ServerSettings;
use tessera_server::ServerState;

#[derive(Parser)]
#[command(name = "tessera-server", about = "Tessera messaging server")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Path to server settings file (JSON)
    #[arg(long)]
    settings: Option<String>,

    /// Storage root, overrides config
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_server=info,tessera_storage=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {}", config_path))?;
        toml::from_str(&content).with_context(|| format!("invalid config file: {}", config_path))?
    } else {
        ServerConfig::default()
    };

    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let server_settings = if let Some(settings_path) = &args.settings {
        ServerSettings::load_from_file(Path::new(settings_path))
            .with_context(|| format!("failed to load settings: {}", settings_path))?
    } else if Path::new("server_settings.json").exists() {
        ServerSettings::load_from_file(Path::new("server_settings.json"))
            .context("failed to load server_settings.json")?
    } else {
        ServerSettings::default()
    };

    info!("Tessera server starting");
    info!(
        data_dir = %config.data_dir.display(),
        host = %config.host,
        port = config.port,
        sealed = config.secret_password.is_some(),
        document_expires = server_settings.document_expires_secs,
        suspend_ttl = server_settings.suspend_ttl_secs,
    );

    let data_dir = config.data_dir.clone();
    let state = Arc::new(
        ServerState::new(config, server_settings, Arc::new(LoggingQuery))
            .with_context(|| format!("failed to open storage at {}", data_dir.display()))?,
    );
    let purge = state.spawn_purge_task();

    info!("server ready");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    state.shutdown();
    purge.abort();
    Ok(())
}
