use std::sync::Arc;

use remisor_core::{IngestPipeline, QueryExecutor, ReportRegistry};

use crate::config::ServerConfig;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub executor: Arc<QueryExecutor>,
    /// Latest report; empty until the first successful query
    pub reports: Arc<ReportRegistry>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            pipeline: Arc::new(IngestPipeline::new(config.pipeline.clone())),
            executor: Arc::new(QueryExecutor::new(config.pipeline.clone())),
            reports: Arc::new(ReportRegistry::new()),
            config: Arc::new(config),
        }
    }
}
