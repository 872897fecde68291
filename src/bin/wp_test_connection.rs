use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use wp_autopost::config;
use wp_autopost::db;
use wp_autopost::wordpress::{PublishTarget, WordPressClient};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Check that WordPress credentials are accepted; exits non-zero on failure"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Registered site id
    #[arg(long, conflicts_with_all = ["url", "username", "password"])]
    site: Option<String>,

    #[arg(long, requires_all = ["username", "password"])]
    url: Option<String>,

    #[arg(long)]
    username: Option<String>,

    /// WordPress application password
    #[arg(long)]
    password: Option<String>,
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

    let (url, username, password) = match (&args.site, &args.url, &args.username, &args.password) {
        (Some(id), _, _, _) => {
            cfg.ensure_dirs()?;
            let pool = db::init_pool(&cfg.app.database_url()).await?;
            db::run_migrations(&pool).await?;
            match db::get_site(&pool, id).await? {
                Some(site) => (site.url, site.username, site.password),
                None => bail!("site {} not found", id),
            }
        }
        (None, Some(url), Some(username), Some(password)) => (
            db::normalize_site_url(url),
            username.clone(),
            password.clone(),
        ),
        _ => bail!("pass --site <id>, or --url with --username and --password"),
    };

    let client = WordPressClient::new(&url, &username, &password, &cfg.wordpress.user_agent)?;
    if client.test_connection().await {
        info!(site = %url, "connection OK");
        Ok(())
    } else {
        error!(site = %url, "connection failed");
        std::process::exit(1);
    }
}
