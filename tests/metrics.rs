// tests/metrics.rs
//
// Prometheus exposition after a crawl cycle. The recorder is process-global,
// so this binary holds a single test.

use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use brand_pulse::config::CrawlerConfig;
use brand_pulse::engine::CrawlEngine;
use brand_pulse::ingest::providers::simulated::SimulatedAdapter;
use brand_pulse::ingest::types::CrawlGroup;
use brand_pulse::ingest::Pipeline;
use brand_pulse::metrics::Metrics;
use brand_pulse::relevance::RelevanceHandle;
use brand_pulse::store::InMemoryStore;

const CONFIG: &str = r#"
[[sources]]
name = "Weibo (simulated)"
kind = "simulated"
platform = "weibo"
max_items = 2
"#;

#[tokio::test]
async fn metrics_endpoint_reports_crawl_series() {
    let metrics = Metrics::init(1800, 7200).expect("recorder installs once per process");

    let cfg = CrawlerConfig::from_toml_str(CONFIG).unwrap();
    let relevance = RelevanceHandle::from_keywords(["labubu"]);
    let engine = CrawlEngine::new(
        &cfg,
        Arc::new(InMemoryStore::new(0.0)),
        Pipeline::from_config(&cfg, relevance.clone()),
    )
    .with_adapter(Arc::new(SimulatedAdapter::new(relevance)));

    let report = engine.run_crawl_cycle(CrawlGroup::Primary).await.unwrap();
    assert_eq!(report.saved, 2);

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "crawl_interval_secs",
        "crawl_items_fetched_total",
        "crawl_items_saved_total",
        "crawl_cycle_ms",
        "crawl_last_run_ts",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }
    assert!(text.contains(r#"crawl_items_saved_total{kind="simulated"} 2"#), "{text}");
}
