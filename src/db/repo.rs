use super::model::{BackupSettings, BackupSite, SettingsBackup};
use super::SiteRegistry;
use crate::model::{NewSite, Site};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{info, instrument};

pub type Pool = SqlitePool;

const GEMINI_KEY: &str = "gemini_api_key";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. Leaves in-memory URLs
/// untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Trim whitespace and any trailing `/` so `url + path` joins cleanly.
pub fn normalize_site_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

pub fn validate_site(site: &NewSite) -> Result<()> {
    if site.name.trim().is_empty() {
        bail!("site name must be non-empty");
    }
    let url = normalize_site_url(&site.url);
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("site url must start with http:// or https://");
    }
    if site.username.trim().is_empty() {
        bail!("site username must be non-empty");
    }
    if site.password.is_empty() {
        bail!("site password must be non-empty");
    }
    Ok(())
}

fn site_from_row(row: &SqliteRow) -> Site {
    Site {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        username: row.get("username"),
        password: row.get("password"),
    }
}

#[instrument(skip_all)]
pub async fn get_setting(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[instrument(skip_all)]
pub async fn set_setting(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .with_context(|| format!("failed to store setting {}", key))?;
    Ok(())
}

pub async fn gemini_key(pool: &Pool) -> Result<String> {
    Ok(get_setting(pool, GEMINI_KEY).await?.unwrap_or_default())
}

pub async fn set_gemini_key(pool: &Pool, key: &str) -> Result<()> {
    set_setting(pool, GEMINI_KEY, key.trim()).await
}

/// All sites, newest first.
#[instrument(skip_all)]
pub async fn list_sites(pool: &Pool) -> Result<Vec<Site>> {
    let rows = sqlx::query(
        "SELECT id, name, url, username, password FROM wordpress_sites ORDER BY created_at DESC, rowid DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(site_from_row).collect())
}

#[instrument(skip_all)]
pub async fn get_site(pool: &Pool, id: &str) -> Result<Option<Site>> {
    let row = sqlx::query("SELECT id, name, url, username, password FROM wordpress_sites WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(site_from_row))
}

#[instrument(skip_all)]
pub async fn add_site(pool: &Pool, site: &NewSite) -> Result<Site> {
    let mut tx = pool.begin().await?;
    let created = add_site_tx(&mut tx, site).await?;
    tx.commit().await?;
    info!(site_id = %created.id, name = %created.name, "registered site");
    Ok(created)
}

async fn add_site_tx(tx: &mut Transaction<'_, Sqlite>, site: &NewSite) -> Result<Site> {
    validate_site(site)?;
    let created = Site {
        id: uuid::Uuid::new_v4().to_string(),
        name: site.name.trim().to_string(),
        url: normalize_site_url(&site.url),
        username: site.username.trim().to_string(),
        password: site.password.clone(),
    };
    sqlx::query(
        "INSERT INTO wordpress_sites (id, name, url, username, password) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&created.id)
    .bind(&created.name)
    .bind(&created.url)
    .bind(&created.username)
    .bind(&created.password)
    .execute(&mut **tx)
    .await
    .context("failed to insert site")?;
    Ok(created)
}

/// Returns false when no site has `id`.
#[instrument(skip_all)]
pub async fn update_site(pool: &Pool, id: &str, site: &NewSite) -> Result<bool> {
    validate_site(site)?;
    let res = sqlx::query(
        "UPDATE wordpress_sites SET name = ?, url = ?, username = ?, password = ? WHERE id = ?",
    )
    .bind(site.name.trim())
    .bind(normalize_site_url(&site.url))
    .bind(site.username.trim())
    .bind(&site.password)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Returns false when no site has `id`.
#[instrument(skip_all)]
pub async fn remove_site(pool: &Pool, id: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM wordpress_sites WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Export the key and all sites (with passwords) as pretty JSON.
#[instrument(skip_all)]
pub async fn backup(pool: &Pool) -> Result<String> {
    let sites = list_sites(pool)
        .await?
        .into_iter()
        .map(|s| BackupSite {
            id: Some(s.id),
            name: s.name,
            url: s.url,
            username: s.username,
            password: s.password,
        })
        .collect();
    let doc = SettingsBackup {
        timestamp: chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string(),
        settings: BackupSettings {
            gemini_key: gemini_key(pool).await?,
            sites: Some(sites),
        },
    };
    serde_json::to_string_pretty(&doc).context("failed to serialize backup")
}

/// Import a document produced by [`backup`]. A non-empty key replaces the
/// stored one; a `sites` array replaces every registered site.
#[instrument(skip_all)]
pub async fn restore(pool: &Pool, backup_json: &str) -> Result<()> {
    let doc: SettingsBackup =
        serde_json::from_str(backup_json).map_err(|err| anyhow!("invalid backup JSON: {}", err))?;

    let mut tx = pool.begin().await?;
    if !doc.settings.gemini_key.trim().is_empty() {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(GEMINI_KEY)
        .bind(doc.settings.gemini_key.trim())
        .execute(&mut *tx)
        .await?;
    }
    if let Some(sites) = &doc.settings.sites {
        sqlx::query("DELETE FROM wordpress_sites")
            .execute(&mut *tx)
            .await?;
        // Backups list newest first; insert oldest first so listing order survives.
        for site in sites.iter().rev() {
            let new_site = NewSite {
                name: site.name.clone(),
                url: site.url.clone(),
                username: site.username.clone(),
                password: site.password.clone(),
            };
            add_site_tx(&mut tx, &new_site)
                .await
                .with_context(|| format!("failed to restore site {}", site.name))?;
        }
    }
    tx.commit().await?;
    info!(
        sites = doc.settings.sites.as_ref().map(Vec::len).unwrap_or(0),
        "restored settings backup"
    );
    Ok(())
}

/// Blank the AI key and drop every site.
#[instrument(skip_all)]
pub async fn clear(pool: &Pool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE settings SET value = '' WHERE key = ?")
        .bind(GEMINI_KEY)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM wordpress_sites")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Handle passed to front ends and the orchestrator.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    pool: Pool,
}

impl SettingsStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl SiteRegistry for SettingsStore {
    async fn gemini_key(&self) -> Result<String> {
        gemini_key(&self.pool).await
    }

    async fn sites(&self) -> Result<Vec<Site>> {
        list_sites(&self.pool).await
    }
}
