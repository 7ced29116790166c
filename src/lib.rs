// src/lib.rs
// Public library surface for the service binary and the integration tests.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod hot_score;
pub mod ingest;
pub mod metrics;
pub mod normalize;
pub mod relevance;
pub mod scheduler;
pub mod store;
pub mod upload;

// `crate_root::api::router` and `crate_root::router` both work
pub use crate::api::router;
pub use crate::engine::{CrawlEngine, CrawlReport};
pub use crate::error::{PipelineError, PipelineResult};
