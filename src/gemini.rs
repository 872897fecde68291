use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config;
use crate::model::ImageAsset;

/// Black-box generative backend: text in, text or image out.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String>;

    /// `Ok(None)` when the model answered without an image part.
    async fn generate_image(&self, prompt: &str) -> Result<Option<ImageAsset>>;
}

/// Builds a backend once the API key has been read for a batch.
pub trait AiBackendFactory: Send + Sync {
    fn backend(&self, api_key: &str) -> Arc<dyn AiBackend>;
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    text_model: String,
    image_model: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("text_model", &self.text_model)
            .field("image_model", &self.image_model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn with_base_url(
        api_key: String,
        text_model: String,
        image_model: String,
        base_url: Url,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url,
            api_key,
            text_model,
            image_model,
        }
    }

    pub fn build_request(&self, model: &str, body: &Value) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(&format!("v1beta/models/{}:generateContent", model))
            .context("invalid Gemini base URL")?;
        self.http
            .post(endpoint)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .build()
            .context("failed to build Gemini request")
    }

    async fn generate_content(&self, model: &str, body: Value) -> Result<GenerateContentResponse> {
        let request = self.build_request(model, &body)?;
        debug!(model, "calling Gemini generateContent");
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|err| anyhow!("failed to reach Gemini: {}", err.without_url()))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(model, %status, "Gemini API error");
            return Err(anyhow!("gemini error {}: {}", status, body));
        }

        res.json::<GenerateContentResponse>()
            .await
            .map_err(|err| anyhow!("invalid Gemini response JSON: {}", err.without_url()))
    }
}

#[async_trait]
impl AiBackend for GeminiClient {
    async fn generate_text(&self, prompt: &str) -> Result<String> {
        let resp = self
            .generate_content(&self.text_model, build_text_request(prompt))
            .await?;
        first_text_part(&resp).ok_or_else(|| anyhow!("Gemini returned no text part"))
    }

    async fn generate_image(&self, prompt: &str) -> Result<Option<ImageAsset>> {
        let resp = self
            .generate_content(&self.image_model, build_image_request(prompt))
            .await?;
        first_inline_image(&resp)
    }
}

/// Factory wired from the `gemini` config section.
#[derive(Debug, Clone)]
pub struct GeminiFactory {
    base_url: Url,
    text_model: String,
    image_model: String,
}

impl GeminiFactory {
    pub fn from_config(cfg: &config::Gemini) -> Result<Self> {
        let base_url = Url::parse(&cfg.api_base).context("invalid gemini.api_base")?;
        Ok(Self {
            base_url,
            text_model: cfg.text_model.clone(),
            image_model: cfg.image_model.clone(),
        })
    }
}

impl AiBackendFactory for GeminiFactory {
    fn backend(&self, api_key: &str) -> Arc<dyn AiBackend> {
        Arc::new(GeminiClient::with_base_url(
            api_key.to_string(),
            self.text_model.clone(),
            self.image_model.clone(),
            self.base_url.clone(),
        ))
    }
}

pub fn build_text_request(prompt: &str) -> Value {
    json!({
        "contents": [ { "parts": [ { "text": prompt } ] } ],
    })
}

pub fn build_image_request(prompt: &str) -> Value {
    json!({
        "contents": [ { "parts": [ { "text": prompt } ] } ],
        "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
    })
}

fn parts(resp: &GenerateContentResponse) -> &[Part] {
    resp.candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|c| c.parts.as_slice())
        .unwrap_or_default()
}

fn first_text_part(resp: &GenerateContentResponse) -> Option<String> {
    parts(resp).iter().find_map(|p| p.text.clone())
}

fn first_inline_image(resp: &GenerateContentResponse) -> Result<Option<ImageAsset>> {
    let Some(inline) = parts(resp).iter().find_map(|p| p.inline_data.as_ref()) else {
        return Ok(None);
    };
    let bytes = BASE64
        .decode(inline.data.as_bytes())
        .context("invalid base64 image data from Gemini")?;
    Ok(Some(ImageAsset {
        bytes,
        mime_type: inline
            .mime_type
            .clone()
            .unwrap_or_else(|| "image/png".to_string()),
    }))
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_at(base: &str) -> GeminiClient {
        GeminiClient::with_base_url(
            "secret-key".into(),
            "text-m".into(),
            "image-m".into(),
            Url::parse(base).unwrap(),
        )
    }

    fn client() -> GeminiClient {
        client_at("https://generativelanguage.googleapis.com/")
    }

    #[test]
    fn build_request_targets_model_endpoint() {
        let request = client()
            .build_request("text-m", &build_text_request("hi"))
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/v1beta/models/text-m:generateContent");
        assert_eq!(request.url().query(), None);
        assert_eq!(
            request
                .headers()
                .get("x-goog-api-key")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "secret-key"
        );
        assert_eq!(
            request
                .headers()
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn transport_errors_do_not_carry_the_key() {
        let client = client_at("http://127.0.0.1:1/");

        let err = client.generate_text("hi").await.unwrap_err();
        let text = format!("{:#} {:?}", err, err);
        assert!(text.contains("failed to reach Gemini"));
        assert!(!text.contains("secret-key"));

        let err = client.generate_image("hi").await.unwrap_err();
        assert!(!format!("{:#}", err).contains("secret-key"));
    }

    #[test]
    fn debug_hides_api_key() {
        assert!(!format!("{:?}", client()).contains("secret-key"));
    }

    #[test]
    fn image_request_asks_for_both_modalities() {
        let body = build_image_request("draw");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "draw");
        assert_eq!(
            body["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );
        assert!(build_text_request("x").get("generationConfig").is_none());
    }

    #[test]
    fn extracts_text_and_inline_image() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": BASE64.encode([1u8, 2, 3]) } }
                ]}
            }]
        }))
        .unwrap();
        assert_eq!(first_text_part(&resp).as_deref(), Some("here you go"));
        let img = first_inline_image(&resp).unwrap().unwrap();
        assert_eq!(img.bytes, vec![1, 2, 3]);
        assert_eq!(img.mime_type, "image/png");
    }

    #[test]
    fn missing_parts_are_tolerated() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert!(first_text_part(&resp).is_none());
        assert!(first_inline_image(&resp).unwrap().is_none());

        let resp: GenerateContentResponse =
            serde_json::from_value(json!({ "candidates": [ { "finishReason": "SAFETY" } ] }))
                .unwrap();
        assert!(first_text_part(&resp).is_none());
    }
}
