//! The Handler Registry: the `kind -> handler` map the worker loop dispatches
//! through (§4.3). Handlers never touch job rows directly — they return a
//! result map or an error, and the worker calls `Complete`.

pub mod extract_elements;
pub mod link_library;
pub mod parse_paper;

use serde_json::Value;
use uuid::Uuid;

use crate::config::{CoordinationConfig, JobStoreConfig, LinkingConfig};
use crate::domain_store::DomainStore;
use crate::error::Result;
use crate::job::{JobPayload, JobStore};
use crate::llm::LlmClient;

pub use extract_elements::ElementExtractor;
pub use parse_paper::PaperParser;

/// Everything a handler needs, borrowed for the duration of one job. Built
/// once per worker process at startup and shared across every job it claims.
pub struct HandlerContext<'a> {
    pub job_store: &'a dyn JobStore,
    pub domain_store: &'a dyn DomainStore,
    pub llm: &'a dyn LlmClient,
    pub parser: &'a dyn PaperParser,
    pub extractor: &'a dyn ElementExtractor,
    pub coordination: &'a CoordinationConfig,
    pub linking: &'a LinkingConfig,
    pub job_store_config: &'a JobStoreConfig,
}

/// The exhaustive match a dictionary-based registry would otherwise need:
/// the payload's variant fully determines dispatch (§9's "dynamic payloads
/// -> tagged variants" re-architecture).
pub async fn dispatch(ctx: &HandlerContext<'_>, job_id: Uuid, worker_id: &str, payload: &JobPayload) -> Result<Value> {
    match payload {
        JobPayload::ParsePaper { paper_id } => parse_paper::handle(ctx, *paper_id).await,
        JobPayload::ExtractElements { paper_id } => extract_elements::handle(ctx, job_id, *paper_id).await,
        JobPayload::LinkLibrary { library_id, cutoff } => {
            link_library::handle(ctx, job_id, worker_id, *library_id, *cutoff).await
        }
    }
}
