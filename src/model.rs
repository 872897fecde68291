use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A WordPress site as held by the registry. `url` never ends with `/`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Site")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Password-free projection of a site, safe to hand to front ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteSummary {
    pub id: String,
    pub name: String,
    pub url: String,
    pub username: String,
}

impl From<&Site> for SiteSummary {
    fn from(site: &Site) -> Self {
        Self {
            id: site.id.clone(),
            name: site.name.clone(),
            url: site.url.clone(),
            username: site.username.clone(),
        }
    }
}

/// Input for registering or updating a site.
#[derive(Clone, Deserialize)]
pub struct NewSite {
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Generated article. Serialized with the same keys the model is asked to emit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    #[serde(rename = "content")]
    pub html_content: String,
    pub tags: Vec<String>,
    pub meta_description: String,
}

/// Raw image bytes returned by the AI backend.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageAsset {
    pub fn extension(&self) -> &'static str {
        match self.mime_type.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "png",
        }
    }
}

impl fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAsset")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// The single hyperlink an article must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    pub url: String,
    pub is_internal: bool,
    pub anchor_keyword: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishOutcome {
    #[serde(rename_all = "camelCase")]
    Published {
        post_id: u64,
        url: String,
        scheduled: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        scheduled_time: Option<DateTime<Utc>>,
    },
    Skipped,
    Failed { error: String },
}

impl PublishOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, PublishOutcome::Failed { .. })
    }
}

/// One processed (topic, site) pair. Exactly one of `article` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub topic: String,
    pub site_name: Option<String>,
    pub article: Option<Article>,
    pub error: Option<String>,
    #[serde(rename = "imageUrl")]
    pub image_ref: Option<String>,
    pub publish: PublishOutcome,
    pub topic_index: usize,
    pub site_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    Single,
    BulkSingleSite,
    Multisite,
    BulkMultisite,
}

impl BatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchMode::Single => "single",
            BatchMode::BulkSingleSite => "bulk_single_site",
            BatchMode::Multisite => "multisite",
            BatchMode::BulkMultisite => "bulk_multisite",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub mode: BatchMode,
    pub items: Vec<BatchItemResult>,
    pub total_topics: usize,
    pub total_sites: Option<usize>,
    pub total_processed: usize,
    pub delay_used: u64,
}

impl BatchReport {
    pub fn failed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.error.is_some() || item.publish.is_failed())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_debug_hides_password() {
        let site = Site {
            id: "1".into(),
            name: "Blog".into(),
            url: "https://blog.example".into(),
            username: "admin".into(),
            password: "hunter2".into(),
        };
        let dbg = format!("{:?}", site);
        assert!(dbg.contains("blog.example"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn article_uses_model_field_names() {
        let article: Article = serde_json::from_str(
            r#"{"title":"T","content":"<p>x</p>","tags":["a"],"meta_description":"m"}"#,
        )
        .unwrap();
        assert_eq!(article.html_content, "<p>x</p>");
        let back = serde_json::to_value(&article).unwrap();
        assert_eq!(back["content"], "<p>x</p>");
        assert_eq!(back["meta_description"], "m");
    }

    #[test]
    fn publish_outcome_is_tagged() {
        let published = PublishOutcome::Published {
            post_id: 7,
            url: "https://blog.example/?p=7".into(),
            scheduled: false,
            scheduled_time: None,
        };
        let v = serde_json::to_value(&published).unwrap();
        assert_eq!(v["status"], "published");
        assert_eq!(v["postId"], 7);
        assert!(v.get("scheduledTime").is_none());

        let v = serde_json::to_value(PublishOutcome::Skipped).unwrap();
        assert_eq!(v["status"], "skipped");
    }

    #[test]
    fn image_extension_follows_mime_type() {
        let img = ImageAsset {
            bytes: vec![1, 2, 3],
            mime_type: "image/jpeg".into(),
        };
        assert_eq!(img.extension(), "jpg");
        let img = ImageAsset {
            bytes: vec![],
            mime_type: "application/octet-stream".into(),
        };
        assert_eq!(img.extension(), "png");
    }
}
