//! Configuration loader and validator for the WordPress auto-poster.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub gemini: Gemini,
    pub wordpress: WordPress,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub bind_addr: String,
    /// Pause between batch items when a request does not name its own delay.
    pub default_delay_seconds: u64,
    /// Keep generated featured images under `<data_dir>/images`.
    #[serde(default)]
    pub save_images: bool,
}

/// Generative AI backend settings. The API key itself lives in the settings store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Gemini {
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    pub language: String,
}

/// WordPress REST client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordPress {
    pub user_agent: String,
}

impl App {
    /// Expand a leading `~/` in `data_dir`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }

    pub fn images_dir(&self) -> PathBuf {
        Path::new(&self.resolved_data_dir()).join("images")
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/autopost.db", self.resolved_data_dir()))
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir`, and the image
    /// directory when images are kept).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())?;
        if self.app.save_images {
            fs::create_dir_all(self.app.images_dir())?;
        }
        Ok(())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.bind_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid("app.bind_addr must be a socket address"));
    }
    if cfg.app.default_delay_seconds == 0 {
        return Err(ConfigError::Invalid("app.default_delay_seconds must be > 0"));
    }

    match reqwest::Url::parse(&cfg.gemini.api_base) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        _ => return Err(ConfigError::Invalid("gemini.api_base must be an http(s) URL")),
    }
    if cfg.gemini.text_model.trim().is_empty() {
        return Err(ConfigError::Invalid("gemini.text_model must be non-empty"));
    }
    if cfg.gemini.image_model.trim().is_empty() {
        return Err(ConfigError::Invalid("gemini.image_model must be non-empty"));
    }
    if cfg.gemini.language.trim().is_empty() {
        return Err(ConfigError::Invalid("gemini.language must be non-empty"));
    }

    if cfg.wordpress.user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid("wordpress.user_agent must be non-empty"));
    }

    Ok(())
}

/// Returns the canonical example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  bind_addr: "127.0.0.1:3004"
  default_delay_seconds: 10
  save_images: true

gemini:
  api_base: "https://generativelanguage.googleapis.com/"
  text_model: "gemini-2.0-flash-exp"
  image_model: "gemini-2.0-flash-preview-image-generation"
  language: "Thai"

wordpress:
  user_agent: "wp-autopost/0.1"
"#
}
