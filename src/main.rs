use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use private_assistant::config::{self, ClientConfig};
use private_assistant::services::{Database, Dispatcher};
use private_assistant::session::SessionController;
use private_assistant::transport::{Backend, HttpBackend, LocalBackend};
use private_assistant::ui::repl;

#[derive(Parser)]
#[command(name = "private-assistant")]
#[command(about = "Projects, conversations and notes for a private assistant", long_about = None)]
struct Cli {
    /// Config file (JSON). Defaults to $XDG_CONFIG_HOME/private-assistant/config.json
    #[arg(long)]
    config: Option<PathBuf>,

    /// Action endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Session credential sent with every request
    #[arg(long)]
    credential: Option<String>,

    /// Use the local database instead of a remote endpoint
    #[arg(long)]
    offline: bool,

    /// Database file for offline mode
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    let mut config = ClientConfig::load(&config_path)?;
    config.apply_env();
    config.apply_overrides(cli.endpoint, cli.credential);
    if cli.database.is_some() {
        config.database_path = cli.database;
    }
    tracing::debug!(?config, "configuration loaded");

    let backend = build_backend(&config, cli.offline)?;
    tracing::info!(backend = backend.name(), "starting session");

    let dispatcher = Dispatcher::new(backend, config.credential.clone());
    let controller = SessionController::new(dispatcher, config.autosave_debounce());
    repl::run(controller).await
}

fn build_backend(config: &ClientConfig, offline: bool) -> Result<Arc<dyn Backend>> {
    let endpoint = if offline { None } else { config.endpoint_url()? };
    match endpoint {
        Some(url) => {
            let backend = HttpBackend::new(url, config.action_prefix.clone(), config.request_timeout())
                .context("Failed to set up HTTP backend")?;
            Ok(Arc::new(backend))
        }
        None => {
            let path = config.database_path()?;
            let db = Database::open(&path)?;
            tracing::info!(path = %path.display(), "using local database");
            Ok(Arc::new(LocalBackend::new(db, config.credential.clone())))
        }
    }
}
