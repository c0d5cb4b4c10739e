use crate::config::Config;
use crate::ingestion::Pipeline;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// CV ingestion pipeline. Holds the LLM client, profile repository and run registry.
    pub pipeline: Pipeline,
    pub config: Config,
}
