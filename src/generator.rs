//! Article and featured-image generation on top of an [`AiBackend`].
//!
//! Model output is only loosely JSON. Recovery is layered: strict parse of the
//! first `{...}` span, then a sanitising repair pass, then per-field regex
//! salvage. Whatever survives is a complete [`Article`]; the prompt's length and
//! structure requirements are requested but never checked here.
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::gemini::AiBackend;
use crate::model::{Article, ImageAsset, LinkSpec};

static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());
static TITLE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""title"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());
static CONTENT_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)"content"\s*:\s*"(.+?)"\s*,\s*"tags""#).unwrap());
static TAGS_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)"tags"\s*:\s*\[(.*?)\]"#).unwrap());
static ANCHOR_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']*)["']"#).unwrap());

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("AI backend error: {0}")]
    Backend(String),
    #[error("invalid JSON response from AI: no article could be recovered")]
    Unparseable,
}

pub struct ContentGenerator {
    backend: Arc<dyn AiBackend>,
    language: String,
}

impl ContentGenerator {
    pub fn new(backend: Arc<dyn AiBackend>, language: impl Into<String>) -> Self {
        Self {
            backend,
            language: language.into(),
        }
    }

    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn generate_article(
        &self,
        topic: &str,
        link: Option<&LinkSpec>,
    ) -> Result<Article, GenerateError> {
        let prompt = build_article_prompt(topic, link, &self.language);
        let text = self
            .backend
            .generate_text(&prompt)
            .await
            .map_err(|err| GenerateError::Backend(format!("{:#}", err)))?;

        let article = parse_article(&text, topic)?;

        if let Some(link) = link {
            let anchors = count_links_to(&article.html_content, &link.url);
            if anchors != 1 {
                warn!(url = %link.url, anchors, "article does not carry exactly one requested link");
            }
        }
        info!(title = %article.title, tags = article.tags.len(), "generated article");
        Ok(article)
    }

    /// Best effort: any backend failure or a text-only answer yields `None`.
    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn generate_image(&self, topic: &str, title: &str) -> Option<ImageAsset> {
        let prompt = build_image_prompt(topic, title);
        match self.backend.generate_image(&prompt).await {
            Ok(Some(image)) => {
                info!(bytes = image.bytes.len(), mime = %image.mime_type, "generated featured image");
                Some(image)
            }
            Ok(None) => {
                warn!("image model returned no image part");
                None
            }
            Err(err) => {
                warn!(?err, "image generation failed");
                None
            }
        }
    }
}

pub fn build_article_prompt(topic: &str, link: Option<&LinkSpec>, language: &str) -> String {
    let mut prompt = format!(
        r#"You are an expert in SEO and content marketing.
Write a WordPress article in {language} on the topic: "{topic}"

Reply with a single JSON object exactly in this shape:
{{
  "title": "an engaging, SEO friendly title",
  "content": "HTML article body with important keywords wrapped in <strong> tags",
  "tags": ["tag1", "tag2", "tag3"],
  "meta_description": "a short description for search engines"
}}

Requirements:
1. The content must be at least 800 words long.
2. Structure the content with <h2> and <h3> sub-headings.
3. Emphasise the relevant keywords with <strong> tags.
4. Keep it readable, engaging and genuinely useful.
5. Use plain HTML <a> tags for any links."#
    );

    if let Some(link) = link {
        let kind = if link.is_internal {
            "a page on this site"
        } else {
            "the money site"
        };
        let target = if link.is_internal {
            ""
        } else {
            r#" target="_blank""#
        };
        let anchor_hint = match link.anchor_keyword.as_deref() {
            Some(keyword) => format!(
                "   - The anchor text must relate to \"{keyword}\": pick a word or phrase from the content that matches or is close to it."
            ),
            None => "   - Pick the anchor text from words or phrases in the content that relate to the article topic.".to_string(),
        };
        prompt.push_str(&format!(
            r#"
6. Include a link to {kind}: {url}
{anchor_hint}
   - The anchor text must be words that literally appear in the content; do not invent unrelated wording.
   - Format: <a href="{url}"{target}>relevant anchor text</a>
   - Never use generic anchor text such as "click here" or "read more".
   - Include exactly 1 link, placed where the content connects to it naturally."#,
            url = link.url,
        ));
    }
    prompt.push('\n');
    prompt
}

pub fn build_image_prompt(topic: &str, title: &str) -> String {
    format!(
        r#"Create a professional, high-quality featured image for a blog post titled: "{title}"
Topic: {topic}
Style: Modern, clean, professional blog header image
Include subtle visual elements related to the topic
Optimized for web display, 16:9 aspect ratio
"#
    )
}

/// Recover an [`Article`] from free-form model output.
pub fn parse_article(text: &str, topic: &str) -> Result<Article, GenerateError> {
    if let Some(span) = extract_json_span(text) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            if let Some(article) = article_from_value(&value, topic) {
                return Ok(article);
            }
        }
        let repaired = repair_json(span);
        match serde_json::from_str::<Value>(&repaired) {
            Ok(value) => {
                if let Some(article) = article_from_value(&value, topic) {
                    debug!("article recovered after JSON repair");
                    return Ok(article);
                }
            }
            Err(err) => debug!(%err, "repaired JSON still unparseable"),
        }
    }

    match salvage_fields(text, topic) {
        Some(article) => {
            warn!("article recovered by field salvage");
            Ok(article)
        }
        None => {
            warn!(len = text.len(), "model output holds no recoverable article");
            Err(GenerateError::Unparseable)
        }
    }
}

/// Greedy `{...}` span: first opening brace to last closing brace.
fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Drop control characters, escape raw line breaks and tabs inside string
/// values, and remove trailing commas before `}` / `]`.
fn repair_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    for c in raw.chars() {
        if in_string {
            if escaped {
                escaped = false;
                if !c.is_control() {
                    out.push(c);
                } else {
                    out.pop();
                }
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => {}
                c => out.push(c),
            }
        } else {
            match c {
                '"' => {
                    in_string = true;
                    out.push(c);
                }
                '\n' | '\r' | '\t' => out.push(c),
                c if c.is_control() => {}
                c => out.push(c),
            }
        }
    }
    TRAILING_COMMA.replace_all(&out, "$1").into_owned()
}

fn article_from_value(value: &Value, topic: &str) -> Option<Article> {
    let title = non_empty_str(value.get("title"))?;
    let html_content = non_empty_str(value.get("content"))?;
    let tags = value
        .get("tags")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|tags| !tags.is_empty())
        .unwrap_or_else(|| default_tags(topic));
    let meta_description =
        non_empty_str(value.get("meta_description")).unwrap_or_else(|| default_meta(topic));
    Some(Article {
        title,
        html_content,
        tags,
        meta_description,
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn salvage_fields(text: &str, topic: &str) -> Option<Article> {
    let raw_title = TITLE_FIELD.captures(text)?.get(1)?.as_str();
    let title = serde_json::from_str::<String>(&format!("\"{}\"", raw_title))
        .unwrap_or_else(|_| raw_title.to_string())
        .trim()
        .to_string();
    let content = CONTENT_FIELD.captures(text)?.get(1)?.as_str();
    let html_content = content
        .replace("\\n", "\n")
        .replace("\\\"", "\"")
        .replace("\\/", "/");
    let tags = TAGS_FIELD
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|inner| serde_json::from_str::<Vec<String>>(&format!("[{}]", inner.as_str())).ok())
        .filter(|tags| !tags.is_empty())
        .unwrap_or_else(|| default_tags(topic));
    if title.is_empty() || html_content.trim().is_empty() {
        return None;
    }
    Some(Article {
        title,
        html_content,
        tags,
        meta_description: default_meta(topic),
    })
}

fn default_tags(topic: &str) -> Vec<String> {
    vec!["SEO".to_string(), "WordPress".to_string(), topic.to_string()]
}

fn default_meta(topic: &str) -> String {
    format!("An article about {}", topic)
}

/// Number of `<a href>` elements in `html` pointing exactly at `url`.
pub fn count_links_to(html: &str, url: &str) -> usize {
    ANCHOR_HREF
        .captures_iter(html)
        .filter(|c| c.get(1).map(|m| m.as_str()) == Some(url))
        .count()
}
