use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::model::{ImageAsset, Site};
use crate::wordpress::model::{CreatedPost, CurrentUser, Media, Tag};

pub mod model;

#[derive(Debug, Error)]
pub enum WordPressError {
    #[error("invalid site URL {0}")]
    InvalidUrl(String),
    #[error("media upload failed: {0}")]
    Upload(String),
    #[error("publish failed: {0}")]
    Publish(String),
}

/// A post ready to be sent. Tags are names; the target resolves them to ids.
#[derive(Debug, Clone)]
pub struct NewPost<'a> {
    pub title: &'a str,
    pub html_content: &'a str,
    pub tag_names: &'a [String],
    pub featured_media: Option<u64>,
    pub schedule: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub id: u64,
    pub source_url: Option<String>,
}

/// One site's publishing surface.
#[async_trait]
pub trait PublishTarget: Send + Sync {
    /// Tag ids for `names`, creating missing tags. Tags that fail are left out.
    async fn resolve_or_create_tags(&self, names: &[String]) -> Vec<u64>;

    async fn upload_media(
        &self,
        image: &ImageAsset,
        file_name: &str,
    ) -> Result<UploadedMedia, WordPressError>;

    /// Publishes now, or schedules when `post.schedule` is set. Returns the post id.
    async fn create_post(&self, post: &NewPost<'_>) -> Result<u64, WordPressError>;

    async fn test_connection(&self) -> bool;
}

/// Opens a [`PublishTarget`] for a registered site.
pub trait PublishTargetFactory: Send + Sync {
    fn connect(&self, site: &Site) -> Result<Box<dyn PublishTarget>, WordPressError>;
}

#[derive(Clone)]
pub struct WordPressClient {
    http: Client,
    site_url: String,
    auth_header: String,
}

impl fmt::Debug for WordPressClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WordPressClient")
            .field("site_url", &self.site_url)
            .finish_non_exhaustive()
    }
}

impl WordPressClient {
    pub fn new(
        site_url: &str,
        username: &str,
        password: &str,
        user_agent: &str,
    ) -> Result<Self, WordPressError> {
        let site_url = site_url.trim_end_matches('/').to_string();
        match Url::parse(&site_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => return Err(WordPressError::InvalidUrl(site_url)),
        }
        let http = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|err| WordPressError::Publish(format!("http client: {}", err)))?;
        let credentials = BASE64.encode(format!("{}:{}", username, password));
        Ok(Self {
            http,
            site_url,
            auth_header: format!("Basic {}", credentials),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/wp-json/wp/v2/{}", self.site_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(self.endpoint(path))
            .header("Authorization", &self.auth_header)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(self.endpoint(path))
            .header("Authorization", &self.auth_header)
    }

    pub fn build_post_request(&self, body: &Value) -> Result<reqwest::Request> {
        self.post("posts")
            .json(body)
            .build()
            .context("failed to build WordPress request")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let res = request
            .send()
            .await
            .with_context(|| format!("failed to reach {} for {}", self.site_url, what))?;

        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = res.text().await.unwrap_or_default();
            warn!(site = %self.site_url, %status, what, "WordPress rejected credentials");
            return Err(anyhow!("authentication rejected ({}): {}", status, body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(site = %self.site_url, %status, what, "WordPress API error");
            return Err(anyhow!("wordpress error {}: {}", status, body));
        }

        res.json::<T>()
            .await
            .with_context(|| format!("invalid WordPress response for {}", what))
    }

    async fn resolve_tag(&self, name: &str) -> Result<u64> {
        let existing: Vec<Tag> = self
            .send(self.get("tags").query(&[("search", name)]), "tag search")
            .await?;
        if let Some(tag) = existing.first() {
            return Ok(tag.id);
        }
        let created: Tag = self
            .send(self.post("tags").json(&build_tag_body(name)), "tag create")
            .await?;
        info!(site = %self.site_url, tag = %created.name, id = created.id, "created tag");
        Ok(created.id)
    }
}

#[async_trait]
impl PublishTarget for WordPressClient {
    #[instrument(skip_all, fields(site = %self.site_url))]
    async fn resolve_or_create_tags(&self, names: &[String]) -> Vec<u64> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            match self.resolve_tag(name).await {
                Ok(id) => ids.push(id),
                Err(err) => warn!(?err, tag = %name, "failed to resolve tag; skipping"),
            }
        }
        ids
    }

    #[instrument(skip_all, fields(site = %self.site_url))]
    async fn upload_media(
        &self,
        image: &ImageAsset,
        file_name: &str,
    ) -> Result<UploadedMedia, WordPressError> {
        let part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(file_name.to_string())
            .mime_str(&image.mime_type)
            .map_err(|err| WordPressError::Upload(err.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let media: Media = self
            .send(self.post("media").multipart(form), "media upload")
            .await
            .map_err(|err| WordPressError::Upload(format!("{:#}", err)))?;
        info!(media_id = media.id, "uploaded media");
        Ok(UploadedMedia {
            id: media.id,
            source_url: media.source_url,
        })
    }

    #[instrument(skip_all, fields(site = %self.site_url))]
    async fn create_post(&self, post: &NewPost<'_>) -> Result<u64, WordPressError> {
        let tag_ids = self.resolve_or_create_tags(post.tag_names).await;
        let body = build_post_body(
            post.title,
            post.html_content,
            &tag_ids,
            post.featured_media,
            post.schedule,
        );
        let created: CreatedPost = self
            .send(self.post("posts").json(&body), "post create")
            .await
            .map_err(|err| WordPressError::Publish(format!("{:#}", err)))?;
        info!(
            post_id = created.id,
            status = created.status.as_deref().unwrap_or("unknown"),
            link = created.link.as_deref().unwrap_or(""),
            "created post"
        );
        Ok(created.id)
    }

    async fn test_connection(&self) -> bool {
        match self.send::<CurrentUser>(self.get("users/me"), "users/me").await {
            Ok(user) => {
                info!(site = %self.site_url, user = %user.name, user_id = user.id, "WordPress connection successful");
                true
            }
            Err(err) => {
                warn!(site = %self.site_url, ?err, "WordPress connection failed");
                false
            }
        }
    }
}

/// Factory producing real REST clients.
#[derive(Debug, Clone)]
pub struct WordPressFactory {
    user_agent: String,
}

impl WordPressFactory {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl PublishTargetFactory for WordPressFactory {
    fn connect(&self, site: &Site) -> Result<Box<dyn PublishTarget>, WordPressError> {
        let client =
            WordPressClient::new(&site.url, &site.username, &site.password, &self.user_agent)?;
        Ok(Box::new(client))
    }
}

pub fn build_tag_body(name: &str) -> Value {
    json!({ "name": name })
}

pub fn build_post_body(
    title: &str,
    html_content: &str,
    tag_ids: &[u64],
    featured_media: Option<u64>,
    schedule: Option<DateTime<Utc>>,
) -> Value {
    let mut body = Map::new();
    body.insert("title".into(), json!(title));
    body.insert("content".into(), json!(html_content));
    body.insert(
        "status".into(),
        json!(if schedule.is_some() { "future" } else { "publish" }),
    );
    body.insert("tags".into(), json!(tag_ids));
    body.insert("format".into(), json!("standard"));
    if let Some(media_id) = featured_media {
        body.insert("featured_media".into(), json!(media_id));
    }
    if let Some(when) = schedule {
        body.insert(
            "date".into(),
            json!(when.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
    }
    Value::Object(body)
}

/// Public URL of a post by id.
pub fn post_url(site_url: &str, post_id: u64) -> String {
    format!("{}/?p={}", site_url.trim_end_matches('/'), post_id)
}
