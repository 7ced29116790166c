//! Brand content crawler: binary entrypoint.
//! Loads config, wires store, adapters, upload queue and scheduler, then
//! serves the admin API (plus `/metrics`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use brand_pulse::api::{self, AppState};
use brand_pulse::config::keywords::{FileKeywordSource, KeywordSource};
use brand_pulse::config::CrawlerConfig;
use brand_pulse::engine::CrawlEngine;
use brand_pulse::ingest::providers::search_api::SearchApiClient;
use brand_pulse::metrics::Metrics;
use brand_pulse::relevance::{spawn_keyword_refresh, RelevanceHandle};
use brand_pulse::scheduler::{Scheduler, TokioTicker};
use brand_pulse::store::{ContentStore, InMemoryStore};
use brand_pulse::upload::UploadQueue;

/// Compact logs; `RUST_LOG` overrides the default filter. The runtime may
/// already own the global subscriber, in which case this is a no-op.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("brand_pulse=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // .env in local/dev; no-op in prod environments
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = CrawlerConfig::load_default()?;
    tracing::info!(
        sources = cfg.sources.len(),
        search_api = cfg.search_api.enabled,
        "crawler config loaded"
    );

    let metrics = match Metrics::init(
        cfg.scheduler.primary_interval().as_secs(),
        cfg.scheduler.secondary_interval().as_secs(),
    ) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = ?e, "metrics recorder not installed, /metrics disabled");
            None
        }
    };

    // --- keywords ---
    let relevance = RelevanceHandle::default();
    let keyword_source: Arc<dyn KeywordSource> =
        Arc::new(FileKeywordSource::from_env_or(cfg.keywords.path.as_deref()));
    relevance.reload(keyword_source.as_ref()).await;
    if cfg.keywords.refresh_secs > 0 {
        spawn_keyword_refresh(
            relevance.clone(),
            keyword_source.clone(),
            Duration::from_secs(cfg.keywords.refresh_secs),
        );
    }

    // --- collaborators ---
    let http = reqwest::Client::builder()
        .user_agent(cfg.pipeline.user_agent.clone())
        .timeout(Duration::from_secs(cfg.pipeline.http_timeout_secs.max(1)))
        .build()
        .context("building http client")?;
    let store: Arc<dyn ContentStore> = Arc::new(InMemoryStore::new(cfg.pipeline.trending_jitter));

    let search = if cfg.search_api.enabled {
        match SearchApiClient::from_env(&cfg.search_api) {
            Ok(c) => Some(Arc::new(c.with_http_client(http.clone()))),
            Err(e) => {
                tracing::warn!(error = %e, "search API disabled");
                None
            }
        }
    } else {
        None
    };
    let uploads = Arc::new(UploadQueue::from_config(&cfg.uploads, http.clone()));

    let engine = Arc::new(
        CrawlEngine::standard(&cfg, store.clone(), relevance.clone(), http, search.clone())
            .with_uploads(uploads.clone()),
    );
    let scheduler = Arc::new(Scheduler::standard(
        &cfg.scheduler,
        engine.clone(),
        store,
        Arc::new(TokioTicker),
    ));
    if cfg.scheduler.autostart {
        scheduler.start();
    }

    let state = AppState {
        engine,
        scheduler,
        relevance,
        keyword_source,
        search,
        uploads: Some(uploads),
    };
    let mut router = api::router(state);
    if let Some(m) = &metrics {
        router = router.merge(m.router());
    }

    Ok(router.into())
}
