// CV ingestion: text extraction, model-assisted extraction, validation,
// reconciliation against the consultant profile, and confirmed persistence.
// All model calls go through llm_client.

pub mod extract;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod reconcile;
pub mod repository;
pub mod run;
pub mod validation;

pub use pipeline::Pipeline;
