use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use wp_autopost::config;
use wp_autopost::db::{self, SettingsStore};
use wp_autopost::gemini::GeminiFactory;
use wp_autopost::images::ImageStore;
use wp_autopost::model::PublishOutcome;
use wp_autopost::orchestrator::{BatchOrchestrator, BatchRequest, OrchestratorSettings, TokioPacer};
use wp_autopost::wordpress::WordPressFactory;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Generate articles for one or more topics and optionally publish them"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Single topic
    #[arg(long, conflicts_with = "topics_file")]
    topic: Option<String>,

    /// File with one topic per line; runs a bulk batch
    #[arg(long)]
    topics_file: Option<PathBuf>,

    /// Registered site id for single or bulk runs
    #[arg(long)]
    site: Option<String>,

    /// Comma-separated site ids; runs a multi-site batch
    #[arg(long, value_delimiter = ',')]
    sites: Vec<String>,

    /// Generate and upload a featured image
    #[arg(long)]
    image: bool,

    /// Publish immediately
    #[arg(long)]
    publish: bool,

    /// Schedule publication (RFC 3339, or YYYY-MM-DDTHH:MM in UTC)
    #[arg(long)]
    schedule: Option<String>,

    /// External money-site URL to link to
    #[arg(long, conflicts_with = "internal_path")]
    link_url: Option<String>,

    /// Link to this path on the target site instead
    #[arg(long)]
    internal_path: Option<String>,

    /// Preferred anchor text for the link
    #[arg(long)]
    anchor: Option<String>,

    /// Seconds between items (defaults to app.default_delay_seconds)
    #[arg(long)]
    delay: Option<u64>,

    /// Write the JSON report here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

fn read_topics(path: &PathBuf) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read topics file: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn build_request(args: &Args) -> Result<BatchRequest> {
    let bulk_topics = match &args.topics_file {
        Some(path) => Some(read_topics(path)?),
        None => None,
    };
    if args.topic.is_none() && bulk_topics.is_none() {
        bail!("either --topic or --topics-file is required");
    }
    Ok(BatchRequest {
        topic: args.topic.clone(),
        bulk_post: bulk_topics.is_some(),
        bulk_topics,
        site_id: args.site.clone(),
        multisite_post: !args.sites.is_empty(),
        selected_multisites: Some(args.sites.clone()),
        generate_image: args.image,
        auto_publish: args.publish,
        schedule_time: args.schedule.clone(),
        include_money_site: args.link_url.is_some() || args.internal_path.is_some(),
        is_internal_link: args.internal_path.is_some(),
        money_site_url: args.link_url.clone(),
        money_site_keyword: args.anchor.clone(),
        internal_path: args.internal_path.clone(),
        bulk_delay: args.delay,
    })
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
    let request = build_request(&args)?;

    let pool = db::init_pool(&cfg.app.database_url()).await?;
    db::run_migrations(&pool).await?;
    let store = SettingsStore::new(pool);

    let backends = GeminiFactory::from_config(&cfg.gemini)?;
    let targets = WordPressFactory::new(cfg.wordpress.user_agent.clone());
    let images = ImageStore::new(cfg.app.images_dir());
    let settings = OrchestratorSettings {
        language: cfg.gemini.language.clone(),
        default_delay_seconds: cfg.app.default_delay_seconds,
    };

    let mut orchestrator = BatchOrchestrator::new(&store, &backends, &targets, &TokioPacer, settings);
    if cfg.app.save_images {
        orchestrator = orchestrator.with_image_store(&images);
    }
    let report = orchestrator.run(&request).await?;

    for item in &report.items {
        let site = item.site_name.as_deref().unwrap_or("-");
        match (&item.error, &item.publish) {
            (Some(err), _) => warn!(topic = %item.topic, site, %err, "generation failed"),
            (None, PublishOutcome::Published { url, scheduled, .. }) => {
                info!(topic = %item.topic, site, %url, scheduled, "published")
            }
            (None, PublishOutcome::Failed { error }) => {
                warn!(topic = %item.topic, site, %error, "publish failed")
            }
            (None, PublishOutcome::Skipped) => info!(topic = %item.topic, site, "generated"),
        }
    }

    let json = serde_json::to_string_pretty(&report)?;
    match &args.out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write report: {}", path.display()))?;
            info!(path = %path.display(), "wrote report");
        }
        None => println!("{}", json),
    }

    info!(
        processed = report.total_processed,
        failed = report.failed_count(),
        "done"
    );
    Ok(())
}
