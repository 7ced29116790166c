// src/api.rs
//! Admin HTTP surface: health, on-demand crawl, scheduler control, keyword
//! reload and rate-limit inspection. No authentication here; deploy behind
//! whatever guards the admin network.

use std::sync::Arc;

use serde_json::{json, Value};
use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::config::keywords::KeywordSource;
use crate::engine::CrawlEngine;
use crate::ingest::providers::search_api::SearchApiClient;
use crate::ingest::types::CrawlGroup;
use crate::relevance::RelevanceHandle;
use crate::scheduler::Scheduler;
use crate::upload::UploadQueue;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CrawlEngine>,
    pub scheduler: Arc<Scheduler>,
    pub relevance: RelevanceHandle,
    pub keyword_source: Arc<dyn KeywordSource>,
    pub search: Option<Arc<SearchApiClient>>,
    pub uploads: Option<Arc<UploadQueue>>,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": msg.into() })))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/admin/crawl", post(admin_crawl))
        .route("/admin/scheduler", get(admin_scheduler))
        .route("/admin/scheduler/start", post(admin_scheduler_start))
        .route("/admin/scheduler/stop", post(admin_scheduler_stop))
        .route("/admin/keywords/reload", post(admin_keywords_reload))
        .route("/admin/rate-limit", get(admin_rate_limit))
        .route("/admin/uploads", get(admin_uploads))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Deserialize)]
struct CrawlParams {
    #[serde(default)]
    group: Option<String>,
}

/// Runs one cycle synchronously, outside the scheduler's cadence.
async fn admin_crawl(
    State(state): State<AppState>,
    Query(q): Query<CrawlParams>,
) -> Result<Json<Value>, ApiError> {
    let group = match q.group.as_deref() {
        Some(g) => g
            .parse::<CrawlGroup>()
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?,
        None => CrawlGroup::Primary,
    };
    let report = state
        .engine
        .run_crawl_cycle(group)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    serde_json::to_value(report)
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn admin_scheduler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": state.scheduler.status(),
        "stats": state.scheduler.task_stats(),
    }))
}

async fn admin_scheduler_start(State(state): State<AppState>) -> Json<Value> {
    let started = state.scheduler.start();
    Json(json!({ "started": started, "status": state.scheduler.status() }))
}

async fn admin_scheduler_stop(State(state): State<AppState>) -> Json<Value> {
    let stopped = state.scheduler.stop();
    Json(json!({ "stopped": stopped }))
}

async fn admin_keywords_reload(State(state): State<AppState>) -> Json<Value> {
    let outcome = state.relevance.reload(state.keyword_source.as_ref()).await;
    Json(json!({
        "outcome": outcome,
        "source": state.keyword_source.describe(),
        "enabled": state.relevance.enabled_keywords(),
    }))
}

async fn admin_rate_limit(State(state): State<AppState>) -> Json<Value> {
    match &state.search {
        Some(client) => Json(json!({ "configured": true, "state": client.rate_limit() })),
        None => Json(json!({ "configured": false })),
    }
}

async fn admin_uploads(State(state): State<AppState>) -> Json<Value> {
    match &state.uploads {
        Some(q) => Json(json!({ "enabled": true, "stats": q.stats() })),
        None => Json(json!({ "enabled": false })),
    }
}
