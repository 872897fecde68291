//! JSON HTTP front end: settings management, connection tests and batch runs.
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{self, SettingsStore};
use crate::gemini::AiBackendFactory;
use crate::images::{ImageStore, IMAGES_ROUTE};
use crate::model::{NewSite, Site, SiteSummary};
use crate::orchestrator::{BatchError, BatchOrchestrator, BatchRequest, OrchestratorSettings, Pacer};
use crate::wordpress::PublishTargetFactory;

/// Shown instead of the stored AI key.
pub const MASKED_KEY: &str = "***SET***";

#[derive(Clone)]
pub struct AppState {
    pub store: SettingsStore,
    pub config: Arc<Config>,
    pub backends: Arc<dyn AiBackendFactory>,
    pub targets: Arc<dyn PublishTargetFactory>,
    pub pacer: Arc<dyn Pacer>,
    pub images: Option<Arc<ImageStore>>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!(?err, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{:#}", err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(status = %rejection.status(), "malformed request body");
        Self::bad_request(rejection.body_text())
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Validation(msg) | BatchError::Configuration(msg) => Self::bad_request(msg),
            BatchError::Storage(err) => err.into(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/api/settings", get(get_settings))
        .route("/api/settings/gemini", post(set_gemini_key))
        .route("/api/settings/sites", post(add_site))
        .route("/api/settings/sites/:id", delete(remove_site))
        .route("/api/settings/backup", get(backup).post(backup))
        .route("/api/settings/restore", post(restore))
        .route("/api/settings/clear", post(clear))
        .route("/api/test-site", post(test_site))
        .route("/api/generate", post(generate));

    if let Some(images) = &state.images {
        app = app.nest_service(IMAGES_ROUTE, ServeDir::new(images.dir()));
    }

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let pool = state.store.pool();
    let key = db::gemini_key(pool).await?;
    let sites: Vec<SiteSummary> = db::list_sites(pool).await?.iter().map(SiteSummary::from).collect();
    Ok(Json(json!({
        "geminiKey": if key.is_empty() { "" } else { MASKED_KEY },
        "siteCount": sites.len(),
        "sites": sites,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiKeyBody {
    #[serde(alias = "apiKey")]
    gemini_key: String,
}

async fn set_gemini_key(
    State(state): State<AppState>,
    payload: Result<Json<GeminiKeyBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    if body.gemini_key.trim().is_empty() {
        return Err(ApiError::bad_request("API key is required"));
    }
    db::set_gemini_key(state.store.pool(), &body.gemini_key).await?;
    info!("stored Gemini API key");
    Ok(Json(json!({ "success": true })))
}

async fn add_site(
    State(state): State<AppState>,
    payload: Result<Json<NewSite>, JsonRejection>,
) -> ApiResult<Json<SiteSummary>> {
    let Json(body) = payload?;
    db::validate_site(&body).map_err(|err| ApiError::bad_request(err.to_string()))?;
    let site = db::add_site(state.store.pool(), &body).await?;
    Ok(Json(SiteSummary::from(&site)))
}

async fn remove_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !db::remove_site(state.store.pool(), &id).await? {
        return Err(ApiError::not_found(format!("site {} not found", id)));
    }
    info!(site_id = %id, "removed site");
    Ok(Json(json!({ "success": true })))
}

async fn backup(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let doc = db::backup(state.store.pool()).await?;
    let value: Value = serde_json::from_str(&doc).map_err(anyhow::Error::from)?;
    Ok(Json(value))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreBody {
    backup_json: String,
}

async fn restore(
    State(state): State<AppState>,
    payload: Result<Json<RestoreBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    db::restore(state.store.pool(), &body.backup_json)
        .await
        .map_err(|err| {
            warn!(?err, "restore rejected");
            ApiError::bad_request(format!("{:#}", err))
        })?;
    Ok(Json(json!({ "success": true })))
}

async fn clear(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    db::clear(state.store.pool()).await?;
    warn!("cleared all settings");
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestSiteBody {
    site_id: Option<String>,
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

async fn test_site(
    State(state): State<AppState>,
    payload: Result<Json<TestSiteBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    let site = match (&body.site_id, &body.url, &body.username, &body.password) {
        (Some(id), _, _, _) => db::get_site(state.store.pool(), id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("site {} not found", id)))?,
        (None, Some(url), Some(username), Some(password)) => Site {
            id: String::new(),
            name: url.clone(),
            url: db::normalize_site_url(url),
            username: username.clone(),
            password: password.clone(),
        },
        _ => {
            return Err(ApiError::bad_request(
                "siteId or url, username and password are required",
            ))
        }
    };

    let target = state
        .targets
        .connect(&site)
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    let success = target.test_connection().await;
    Ok(Json(json!({ "success": success, "url": site.url })))
}

async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = payload?;
    let settings = OrchestratorSettings {
        language: state.config.gemini.language.clone(),
        default_delay_seconds: state.config.app.default_delay_seconds,
    };
    let mut orchestrator = BatchOrchestrator::new(
        &state.store,
        state.backends.as_ref(),
        state.targets.as_ref(),
        state.pacer.as_ref(),
        settings,
    );
    if let Some(images) = &state.images {
        orchestrator = orchestrator.with_image_store(images);
    }

    let report = orchestrator.run(&request).await?;
    let mut body = serde_json::to_value(&report).map_err(anyhow::Error::from)?;
    if let Value::Object(map) = &mut body {
        map.insert("success".into(), json!(true));
    }
    Ok(Json(body))
}
