// tests/api_admin.rs
//
// Admin router exercised in-process via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /admin/crawl (default group, explicit group, bad group)
// - GET /admin/scheduler, POST /admin/scheduler/start|stop
// - POST /admin/keywords/reload
// - GET /admin/rate-limit, GET /admin/uploads

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use brand_pulse::api::{self, AppState};
use brand_pulse::config::keywords::StaticKeywordSource;
use brand_pulse::config::CrawlerConfig;
use brand_pulse::engine::CrawlEngine;
use brand_pulse::ingest::providers::simulated::SimulatedAdapter;
use brand_pulse::ingest::Pipeline;
use brand_pulse::relevance::{KeywordEntry, RelevanceHandle};
use brand_pulse::scheduler::{ManualTicker, Scheduler};
use brand_pulse::store::{ContentStore, InMemoryStore};

const BODY_LIMIT: usize = 1024 * 1024;

const CONFIG: &str = r#"
[[sources]]
name = "Weibo (simulated)"
kind = "simulated"
platform = "weibo"
max_items = 2
"#;

fn test_router() -> (Router, Arc<InMemoryStore>) {
    let cfg = CrawlerConfig::from_toml_str(CONFIG).unwrap();
    let store = Arc::new(InMemoryStore::new(0.0));
    let relevance = RelevanceHandle::from_keywords(["labubu"]);

    let engine = Arc::new(
        CrawlEngine::new(&cfg, store.clone(), Pipeline::from_config(&cfg, relevance.clone()))
            .with_adapter(Arc::new(SimulatedAdapter::new(relevance.clone()))),
    );
    let scheduler = Arc::new(Scheduler::standard(
        &cfg.scheduler,
        engine.clone(),
        store.clone(),
        Arc::new(ManualTicker::new(Utc::now())),
    ));

    let state = AppState {
        engine,
        scheduler,
        relevance,
        keyword_source: Arc::new(StaticKeywordSource(vec![
            KeywordEntry::enabled("popmart"),
            KeywordEntry {
                keyword: "kaws".into(),
                enabled: false,
            },
        ])),
        search: None,
        uploads: None,
    };
    (api::router(state), store)
}

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, json)
}

#[tokio::test]
async fn health_is_ok() {
    let (app, _) = test_router();
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn crawl_runs_synchronously_and_reports() {
    let (app, store) = test_router();

    let (status, report) = call(&app, "POST", "/admin/crawl").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["group"], "primary");
    assert_eq!(report["saved"], 2);
    assert_eq!(store.len(), 2);

    let (status, report) = call(&app, "POST", "/admin/crawl?group=secondary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["sources"], 0);

    let (status, body) = call(&app, "POST", "/admin/crawl?group=tertiary").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("tertiary"));
}

#[tokio::test]
async fn scheduler_can_be_inspected_started_and_stopped() {
    let (app, _) = test_router();

    let (_, body) = call(&app, "GET", "/admin/scheduler").await;
    assert_eq!(body["status"]["running"], false);
    let names: Vec<&str> = body["stats"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["task_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["primary_crawl", "secondary_crawl", "daily_cleanup"]);

    let (_, body) = call(&app, "POST", "/admin/scheduler/start").await;
    assert_eq!(body["started"], true);
    assert_eq!(body["status"]["running"], true);
    let (_, body) = call(&app, "POST", "/admin/scheduler/start").await;
    assert_eq!(body["started"], false);

    let (_, body) = call(&app, "POST", "/admin/scheduler/stop").await;
    assert_eq!(body["stopped"], true);
    let (_, body) = call(&app, "GET", "/admin/scheduler").await;
    assert_eq!(body["status"]["running"], false);
}

#[tokio::test]
async fn keyword_reload_swaps_the_active_list() {
    let (app, store) = test_router();

    let (status, body) = call(&app, "POST", "/admin/keywords/reload").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "loaded");
    assert_eq!(body["enabled"], serde_json::json!(["popmart"]));

    // simulated posts now mention popmart, not labubu
    call(&app, "POST", "/admin/crawl").await;
    assert!(store
        .items()
        .iter()
        .all(|i| i.title.to_lowercase().contains("popmart")));
    assert!(store.sources().await.unwrap().len() == 1);
}

#[tokio::test]
async fn rate_limit_and_uploads_report_unconfigured() {
    let (app, _) = test_router();
    let (_, body) = call(&app, "GET", "/admin/rate-limit").await;
    assert_eq!(body["configured"], false);
    let (_, body) = call(&app, "GET", "/admin/uploads").await;
    assert_eq!(body["enabled"], false);
}
