use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use wp_autopost::config;
use wp_autopost::db::{self, SettingsStore};
use wp_autopost::gemini::GeminiFactory;
use wp_autopost::images::ImageStore;
use wp_autopost::orchestrator::TokioPacer;
use wp_autopost::server::{self, AppState};
use wp_autopost::wordpress::WordPressFactory;

#[derive(Debug, Parser)]
#[command(author, version, about = "Serve the WordPress auto-poster HTTP API")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override `app.bind_addr`
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.app.database_url()).await?;
    db::run_migrations(&pool).await?;

    let images = cfg
        .app
        .save_images
        .then(|| Arc::new(ImageStore::new(cfg.app.images_dir())));
    let bind_addr = args.bind.clone().unwrap_or_else(|| cfg.app.bind_addr.clone());

    let state = AppState {
        store: SettingsStore::new(pool),
        backends: Arc::new(GeminiFactory::from_config(&cfg.gemini)?),
        targets: Arc::new(WordPressFactory::new(cfg.wordpress.user_agent.clone())),
        pacer: Arc::new(TokioPacer),
        images,
        config: Arc::new(cfg),
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "starting HTTP server");
    axum::serve(listener, server::router(state)).await?;

    Ok(())
}
