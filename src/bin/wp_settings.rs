use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use wp_autopost::config;
use wp_autopost::db;
use wp_autopost::model::NewSite;

#[derive(Debug, Parser)]
#[command(author, version, about = "Manage the stored AI key and WordPress sites")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store the Gemini API key
    SetKey { key: String },
    /// List registered sites (passwords are not shown)
    ListSites,
    /// Register a site
    AddSite {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        username: String,
        /// WordPress application password
        #[arg(long)]
        password: String,
    },
    /// Remove a site by id
    RemoveSite { id: String },
    /// Write a JSON backup to a file, or stdout
    Backup {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Restore from a JSON backup file
    Restore { file: PathBuf },
    /// Blank the key and remove every site
    Clear {
        /// Required to actually clear
        #[arg(long)]
        yes: bool,
    },
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

    match args.command {
        Command::SetKey { key } => {
            if key.trim().is_empty() {
                bail!("key must be non-empty");
            }
            db::set_gemini_key(&pool, &key).await?;
            info!("stored Gemini API key");
        }
        Command::ListSites => {
            let sites = db::list_sites(&pool).await?;
            if sites.is_empty() {
                println!("no sites registered");
            }
            for site in sites {
                println!("{}\t{}\t{}\t{}", site.id, site.name, site.url, site.username);
            }
        }
        Command::AddSite {
            name,
            url,
            username,
            password,
        } => {
            let site = db::add_site(
                &pool,
                &NewSite {
                    name,
                    url,
                    username,
                    password,
                },
            )
            .await?;
            println!("{}", site.id);
        }
        Command::RemoveSite { id } => {
            if !db::remove_site(&pool, &id).await? {
                bail!("site {} not found", id);
            }
            info!(site_id = %id, "removed site");
        }
        Command::Backup { out } => {
            let doc = db::backup(&pool).await?;
            match out {
                Some(path) => {
                    std::fs::write(&path, doc)
                        .with_context(|| format!("failed to write backup: {}", path.display()))?;
                    info!(path = %path.display(), "wrote backup");
                }
                None => println!("{}", doc),
            }
        }
        Command::Restore { file } => {
            let doc = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read backup: {}", file.display()))?;
            db::restore(&pool, &doc).await?;
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to clear settings without --yes");
            }
            db::clear(&pool).await?;
            info!("cleared all settings");
        }
    }

    Ok(())
}
