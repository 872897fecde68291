//! Batch engine: enumerates (topic, site) pairs, generates and publishes each
//! one in sequence, and assembles the report.
//!
//! Item-scoped failures (generation, upload, publish) end up inside the
//! report. Only request-shape and configuration problems abort a batch, and
//! they do so before the first item starts.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::db::SiteRegistry;
use crate::gemini::AiBackendFactory;
use crate::generator::ContentGenerator;
use crate::images::ImageStore;
use crate::link::{self, LinkConfig};
use crate::model::{Article, BatchItemResult, BatchMode, BatchReport, ImageAsset, PublishOutcome, Site};
use crate::wordpress::{post_url, NewPost, PublishTargetFactory};

pub const DEFAULT_DELAY_SECONDS: u64 = 10;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Configuration(String),
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Front-end request shape. Field names match the web form's JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchRequest {
    pub topic: Option<String>,
    pub bulk_topics: Option<Vec<String>>,
    pub site_id: Option<String>,
    pub selected_multisites: Option<Vec<String>>,
    pub generate_image: bool,
    pub auto_publish: bool,
    pub schedule_time: Option<String>,
    pub include_money_site: bool,
    pub is_internal_link: bool,
    pub money_site_url: Option<String>,
    pub money_site_keyword: Option<String>,
    pub internal_path: Option<String>,
    pub bulk_post: bool,
    pub multisite_post: bool,
    #[serde(deserialize_with = "delay_seconds")]
    pub bulk_delay: Option<u64>,
}

/// Form inputs post the delay as a number or as the text typed into the field.
fn delay_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDelay {
        Number(u64),
        Text(String),
    }

    match Option::<RawDelay>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawDelay::Number(n)) => Ok(Some(n)),
        Some(RawDelay::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            text.parse().map(Some).map_err(|_| {
                de::Error::custom(format!(
                    "bulkDelay must be a whole number of seconds, got {:?}",
                    text
                ))
            })
        }
    }
}

/// Suspends the batch between items.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Per-item progress, used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Generating,
    GenerationFailed,
    Generated,
    ImageGenerating,
    Publishing,
    Published,
    Scheduled,
    PublishFailed,
    Skipped,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Generating => "generating",
            ItemState::GenerationFailed => "generation_failed",
            ItemState::Generated => "generated",
            ItemState::ImageGenerating => "image_generating",
            ItemState::Publishing => "publishing",
            ItemState::Published => "published",
            ItemState::Scheduled => "scheduled",
            ItemState::PublishFailed => "publish_failed",
            ItemState::Skipped => "skipped",
        }
    }
}

/// A request that passed shape validation; sites are still ids.
#[derive(Debug, Clone)]
struct ValidatedRequest {
    mode: BatchMode,
    topics: Vec<String>,
    site_ids: Vec<String>,
    link: LinkConfig,
    generate_image: bool,
    publish: bool,
    schedule: Option<DateTime<Utc>>,
    delay_seconds: u64,
}

/// Everything needed to run a batch, with sites resolved.
#[derive(Debug, Clone)]
struct BatchPlan {
    mode: BatchMode,
    topics: Vec<String>,
    sites: Vec<Site>,
    link: LinkConfig,
    generate_image: bool,
    publish: bool,
    schedule: Option<DateTime<Utc>>,
    delay_seconds: u64,
}

impl BatchPlan {
    /// Topic-major (topic index, site index) pairs.
    fn pairs(&self) -> Vec<(usize, Option<usize>)> {
        let mut pairs = Vec::with_capacity(self.topics.len() * self.sites.len().max(1));
        for t in 0..self.topics.len() {
            if self.sites.is_empty() {
                pairs.push((t, None));
            } else {
                pairs.extend((0..self.sites.len()).map(|s| (t, Some(s))));
            }
        }
        pairs
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Accepts RFC 3339, or a zone-less `YYYY-MM-DDTHH:MM[:SS]` read as UTC.
pub fn parse_schedule_time(raw: &str) -> Result<DateTime<Utc>, BatchError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(BatchError::Validation(format!(
        "invalid scheduleTime {:?}: expected an ISO-8601 date-time",
        raw
    )))
}

fn validate_request(req: &BatchRequest, default_delay: u64) -> Result<ValidatedRequest, BatchError> {
    let topics = if req.bulk_post {
        let topics: Vec<String> = req
            .bulk_topics
            .iter()
            .flatten()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if topics.is_empty() {
            return Err(BatchError::Validation(
                "Bulk topics are required for bulk posting".into(),
            ));
        }
        topics
    } else {
        match non_blank(req.topic.as_ref()) {
            Some(topic) => vec![topic],
            None => return Err(BatchError::Validation("Topic is required".into())),
        }
    };

    let mut selected: Vec<String> = Vec::new();
    for id in req.selected_multisites.iter().flatten() {
        let id = id.trim();
        if !id.is_empty() && !selected.iter().any(|s| s == id) {
            selected.push(id.to_string());
        }
    }
    let site_id = non_blank(req.site_id.as_ref());

    let (mode, site_ids) = if req.bulk_post && req.multisite_post && !selected.is_empty() {
        (BatchMode::BulkMultisite, selected)
    } else if req.bulk_post {
        match site_id {
            Some(id) => (BatchMode::BulkSingleSite, vec![id]),
            None => {
                return Err(BatchError::Validation(
                    "A site must be selected for bulk posting".into(),
                ))
            }
        }
    } else if req.multisite_post && !selected.is_empty() {
        (BatchMode::Multisite, selected)
    } else {
        (BatchMode::Single, site_id.into_iter().collect())
    };

    let schedule = match non_blank(req.schedule_time.as_ref()) {
        Some(raw) => Some(parse_schedule_time(&raw)?),
        None => None,
    };

    Ok(ValidatedRequest {
        mode,
        topics,
        site_ids,
        link: LinkConfig {
            enabled: req.include_money_site,
            is_internal: req.is_internal_link,
            external_url: non_blank(req.money_site_url.as_ref()),
            internal_path: req.internal_path.as_ref().map(|p| p.trim().to_string()),
            anchor_keyword: non_blank(req.money_site_keyword.as_ref()),
        },
        generate_image: req.generate_image,
        publish: req.auto_publish || schedule.is_some(),
        schedule,
        delay_seconds: req.bulk_delay.filter(|d| *d > 0).unwrap_or(default_delay),
    })
}

impl ValidatedRequest {
    fn into_plan(self, registered: &[Site]) -> Result<BatchPlan, BatchError> {
        let mut sites = Vec::with_capacity(self.site_ids.len());
        for id in &self.site_ids {
            match registered.iter().find(|s| &s.id == id) {
                Some(site) => sites.push(site.clone()),
                None => {
                    return Err(BatchError::Configuration(format!(
                        "Selected site not found: {}",
                        id
                    )))
                }
            }
        }
        Ok(BatchPlan {
            mode: self.mode,
            topics: self.topics,
            sites,
            link: self.link,
            generate_image: self.generate_image,
            publish: self.publish,
            schedule: self.schedule,
            delay_seconds: self.delay_seconds,
        })
    }
}

/// Knobs the orchestrator takes from configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub language: String,
    pub default_delay_seconds: u64,
}

pub struct BatchOrchestrator<'a> {
    registry: &'a dyn SiteRegistry,
    backends: &'a dyn AiBackendFactory,
    targets: &'a dyn PublishTargetFactory,
    pacer: &'a dyn Pacer,
    images: Option<&'a ImageStore>,
    settings: OrchestratorSettings,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        registry: &'a dyn SiteRegistry,
        backends: &'a dyn AiBackendFactory,
        targets: &'a dyn PublishTargetFactory,
        pacer: &'a dyn Pacer,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            backends,
            targets,
            pacer,
            images: None,
            settings,
        }
    }

    /// Keep generated images locally and report their `/images/...` reference.
    pub fn with_image_store(mut self, store: &'a ImageStore) -> Self {
        self.images = Some(store);
        self
    }

    #[instrument(skip_all)]
    pub async fn run(&self, request: &BatchRequest) -> Result<BatchReport, BatchError> {
        let validated = validate_request(request, self.settings.default_delay_seconds)?;

        let api_key = self.registry.gemini_key().await?;
        if api_key.trim().is_empty() {
            return Err(BatchError::Configuration(
                "Gemini API key not configured. Please set it in settings.".into(),
            ));
        }
        let registered = self.registry.sites().await?;
        let plan = validated.into_plan(&registered)?;

        let generator =
            ContentGenerator::new(self.backends.backend(api_key.trim()), &self.settings.language);
        let pairs = plan.pairs();
        let delay = Duration::from_secs(plan.delay_seconds);
        info!(
            mode = plan.mode.as_str(),
            topics = plan.topics.len(),
            sites = plan.sites.len(),
            items = pairs.len(),
            delay_seconds = plan.delay_seconds,
            "starting batch"
        );

        let mut items = Vec::with_capacity(pairs.len());
        for (n, &(topic_idx, site_idx)) in pairs.iter().enumerate() {
            let item = self.process_item(&generator, &plan, topic_idx, site_idx).await;
            items.push(item);

            if n + 1 < pairs.len() {
                debug!(delay_seconds = plan.delay_seconds, "pausing before next item");
                self.pacer.pause(delay).await;
            }
        }

        let report = BatchReport {
            mode: plan.mode,
            total_topics: plan.topics.len(),
            total_sites: (!plan.sites.is_empty()).then_some(plan.sites.len()),
            total_processed: items.len(),
            delay_used: plan.delay_seconds,
            items,
        };
        info!(
            processed = report.total_processed,
            failed = report.failed_count(),
            "batch finished"
        );
        Ok(report)
    }

    async fn process_item(
        &self,
        generator: &ContentGenerator,
        plan: &BatchPlan,
        topic_idx: usize,
        site_idx: Option<usize>,
    ) -> BatchItemResult {
        let topic = &plan.topics[topic_idx];
        let site = site_idx.map(|i| &plan.sites[i]);
        let trace = |state: ItemState| {
            info!(
                topic_index = topic_idx + 1,
                site_index = site_idx.map(|i| i + 1),
                site = site.map(|s| s.name.as_str()).unwrap_or("-"),
                state = state.as_str(),
                "batch item"
            );
        };

        let mut result = BatchItemResult {
            topic: topic.clone(),
            site_name: site.map(|s| s.name.clone()),
            article: None,
            error: None,
            image_ref: None,
            publish: PublishOutcome::Skipped,
            topic_index: topic_idx + 1,
            site_index: site_idx.map(|i| i + 1),
        };

        trace(ItemState::Generating);
        let link = link::resolve(&plan.link, site);
        let article = match generator.generate_article(topic, link.as_ref()).await {
            Ok(article) => article,
            Err(err) => {
                warn!(%err, topic = %topic, "article generation failed");
                trace(ItemState::GenerationFailed);
                result.error = Some(err.to_string());
                return result;
            }
        };
        trace(ItemState::Generated);

        let image = if plan.generate_image {
            trace(ItemState::ImageGenerating);
            generator.generate_image(topic, &article.title).await
        } else {
            None
        };

        let mut upload_name = None;
        if let (Some(image), Some(store)) = (&image, self.images) {
            match store.save(image).await {
                Ok(stored) => {
                    result.image_ref = Some(stored.public_ref);
                    upload_name = Some(stored.file_name);
                }
                Err(err) => warn!(?err, "failed to keep featured image locally"),
            }
        }

        result.publish = match site.filter(|_| plan.publish) {
            Some(site) => {
                trace(ItemState::Publishing);
                let upload_name = upload_name.unwrap_or_else(|| default_upload_name(image.as_ref()));
                let (outcome, media_url) = self
                    .publish(site, &article, image.as_ref(), &upload_name, plan.schedule)
                    .await;
                if result.image_ref.is_none() {
                    result.image_ref = media_url;
                }
                trace(match &outcome {
                    PublishOutcome::Published { scheduled: true, .. } => ItemState::Scheduled,
                    PublishOutcome::Published { .. } => ItemState::Published,
                    PublishOutcome::Failed { .. } => ItemState::PublishFailed,
                    PublishOutcome::Skipped => ItemState::Skipped,
                });
                outcome
            }
            None => {
                trace(ItemState::Skipped);
                PublishOutcome::Skipped
            }
        };

        result.article = Some(article);
        result
    }

    /// Upload the image (if any) then create the post. Never retries.
    async fn publish(
        &self,
        site: &Site,
        article: &Article,
        image: Option<&ImageAsset>,
        upload_name: &str,
        schedule: Option<DateTime<Utc>>,
    ) -> (PublishOutcome, Option<String>) {
        let target = match self.targets.connect(site) {
            Ok(target) => target,
            Err(err) => {
                warn!(%err, site = %site.name, "cannot open publish target");
                return (PublishOutcome::Failed { error: err.to_string() }, None);
            }
        };

        let mut media_url = None;
        let mut featured_media = None;
        if let Some(image) = image {
            match target.upload_media(image, upload_name).await {
                Ok(media) => {
                    featured_media = Some(media.id);
                    media_url = media.source_url;
                }
                Err(err) => {
                    warn!(%err, site = %site.name, "featured image upload failed");
                    return (PublishOutcome::Failed { error: err.to_string() }, None);
                }
            }
        }

        let post = NewPost {
            title: &article.title,
            html_content: &article.html_content,
            tag_names: &article.tags,
            featured_media,
            schedule,
        };
        match target.create_post(&post).await {
            Ok(post_id) => {
                info!(post_id, site = %site.name, scheduled = schedule.is_some(), "post created");
                (
                    PublishOutcome::Published {
                        post_id,
                        url: post_url(&site.url, post_id),
                        scheduled: schedule.is_some(),
                        scheduled_time: schedule,
                    },
                    media_url,
                )
            }
            Err(err) => {
                warn!(%err, site = %site.name, "post creation failed");
                (PublishOutcome::Failed { error: err.to_string() }, media_url)
            }
        }
    }
}

fn default_upload_name(image: Option<&ImageAsset>) -> String {
    let ext = image.map(ImageAsset::extension).unwrap_or("png");
    format!("featured-image-{}.{}", Utc::now().timestamp_millis(), ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(id: &str) -> Site {
        Site {
            id: id.into(),
            name: format!("Site {}", id),
            url: format!("https://{}.example", id),
            username: "u".into(),
            password: "p".into(),
        }
    }

    fn bulk_request(topics: &[&str]) -> BatchRequest {
        BatchRequest {
            bulk_post: true,
            bulk_topics: Some(topics.iter().map(|t| t.to_string()).collect()),
            site_id: Some("a".into()),
            ..Default::default()
        }
    }

    #[test]
    fn single_requires_topic() {
        let err = validate_request(&BatchRequest::default(), 10).unwrap_err();
        assert!(matches!(err, BatchError::Validation(msg) if msg == "Topic is required"));

        let req = BatchRequest {
            topic: Some("   ".into()),
            ..Default::default()
        };
        assert!(matches!(validate_request(&req, 10), Err(BatchError::Validation(_))));
    }

    #[test]
    fn bulk_requires_non_blank_topics() {
        let err = validate_request(&bulk_request(&[" ", ""]), 10).unwrap_err();
        assert!(matches!(err, BatchError::Validation(msg) if msg.contains("Bulk topics")));

        let req = BatchRequest {
            bulk_post: true,
            ..Default::default()
        };
        assert!(matches!(validate_request(&req, 10), Err(BatchError::Validation(_))));
    }

    #[test]
    fn bulk_trims_and_drops_blank_topics() {
        let v = validate_request(&bulk_request(&[" one ", "", "two"]), 10).unwrap();
        assert_eq!(v.mode, BatchMode::BulkSingleSite);
        assert_eq!(v.topics, vec!["one", "two"]);
        assert_eq!(v.site_ids, vec!["a"]);
    }

    #[test]
    fn mode_selection() {
        let mut req = bulk_request(&["t"]);
        req.multisite_post = true;
        req.selected_multisites = Some(vec!["b".into(), "c".into(), "b".into()]);
        let v = validate_request(&req, 10).unwrap();
        assert_eq!(v.mode, BatchMode::BulkMultisite);
        assert_eq!(v.site_ids, vec!["b", "c"]);

        let req = BatchRequest {
            topic: Some("t".into()),
            multisite_post: true,
            selected_multisites: Some(vec!["b".into()]),
            ..Default::default()
        };
        assert_eq!(validate_request(&req, 10).unwrap().mode, BatchMode::Multisite);

        let req = BatchRequest {
            topic: Some("t".into()),
            multisite_post: true,
            selected_multisites: Some(vec![]),
            ..Default::default()
        };
        let v = validate_request(&req, 10).unwrap();
        assert_eq!(v.mode, BatchMode::Single);
        assert!(v.site_ids.is_empty());
    }

    #[test]
    fn bulk_without_site_is_rejected() {
        let mut req = bulk_request(&["t"]);
        req.site_id = None;
        assert!(matches!(validate_request(&req, 10), Err(BatchError::Validation(_))));
    }

    #[test]
    fn delay_defaults_and_overrides() {
        let mut req = bulk_request(&["t"]);
        assert_eq!(validate_request(&req, 7).unwrap().delay_seconds, 7);
        req.bulk_delay = Some(0);
        assert_eq!(validate_request(&req, 7).unwrap().delay_seconds, 7);
        req.bulk_delay = Some(3);
        assert_eq!(validate_request(&req, 7).unwrap().delay_seconds, 3);
    }

    #[test]
    fn schedule_implies_publish() {
        let req = BatchRequest {
            topic: Some("t".into()),
            schedule_time: Some("2030-01-02T03:04".into()),
            ..Default::default()
        };
        let v = validate_request(&req, 10).unwrap();
        assert!(v.publish);
        assert_eq!(
            v.schedule.unwrap().to_rfc3339(),
            "2030-01-02T03:04:00+00:00"
        );

        let req = BatchRequest {
            topic: Some("t".into()),
            schedule_time: Some("".into()),
            ..Default::default()
        };
        let v = validate_request(&req, 10).unwrap();
        assert!(!v.publish);
        assert!(v.schedule.is_none());
    }

    #[test]
    fn schedule_formats() {
        assert_eq!(
            parse_schedule_time("2030-01-02T03:04:05.000Z").unwrap().to_rfc3339(),
            "2030-01-02T03:04:05+00:00"
        );
        assert_eq!(
            parse_schedule_time("2030-01-02T10:04:05+07:00").unwrap().to_rfc3339(),
            "2030-01-02T03:04:05+00:00"
        );
        assert!(matches!(
            parse_schedule_time("next tuesday"),
            Err(BatchError::Validation(_))
        ));
    }

    #[test]
    fn unknown_site_is_a_configuration_error() {
        let v = validate_request(&bulk_request(&["t"]), 10).unwrap();
        let err = v.into_plan(&[site("zzz")]).unwrap_err();
        assert!(matches!(err, BatchError::Configuration(msg) if msg.contains("not found")));
    }

    #[test]
    fn pairs_are_topic_major() {
        let mut req = bulk_request(&["t1", "t2"]);
        req.multisite_post = true;
        req.selected_multisites = Some(vec!["b".into(), "a".into()]);
        let plan = validate_request(&req, 10)
            .unwrap()
            .into_plan(&[site("a"), site("b")])
            .unwrap();
        assert_eq!(plan.sites[0].id, "b");
        assert_eq!(
            plan.pairs(),
            vec![(0, Some(0)), (0, Some(1)), (1, Some(0)), (1, Some(1))]
        );
    }

    #[test]
    fn generation_only_single_has_one_pair() {
        let req = BatchRequest {
            topic: Some("t".into()),
            ..Default::default()
        };
        let plan = validate_request(&req, 10).unwrap().into_plan(&[]).unwrap();
        assert_eq!(plan.pairs(), vec![(0, None)]);
    }

    #[test]
    fn request_deserializes_from_form_json() {
        let req: BatchRequest = serde_json::from_value(serde_json::json!({
            "topic": "coffee",
            "bulkTopics": null,
            "siteId": "a",
            "generateImage": true,
            "autoPublish": false,
            "includeMoneySite": true,
            "isInternalLink": false,
            "moneySiteUrl": "https://money.example",
            "bulkDelay": 5
        }))
        .unwrap();
        assert_eq!(req.topic.as_deref(), Some("coffee"));
        assert!(req.bulk_topics.is_none());
        assert!(req.generate_image);
        assert_eq!(req.bulk_delay, Some(5));
        assert_eq!(req.money_site_url.as_deref(), Some("https://money.example"));
    }

    #[test]
    fn bulk_delay_accepts_form_text() {
        let parse = |value: serde_json::Value| {
            serde_json::from_value::<BatchRequest>(serde_json::json!({ "bulkDelay": value }))
                .map(|req| req.bulk_delay)
        };
        assert_eq!(parse(serde_json::json!("10")).unwrap(), Some(10));
        assert_eq!(parse(serde_json::json!(" 7 ")).unwrap(), Some(7));
        assert_eq!(parse(serde_json::json!("")).unwrap(), None);
        assert_eq!(parse(serde_json::Value::Null).unwrap(), None);
        assert!(parse(serde_json::json!("soon")).is_err());
        assert!(parse(serde_json::json!(-3)).is_err());
    }
}
