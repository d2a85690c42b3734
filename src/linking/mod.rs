//! The linking engine: `LINK_LIBRARY`'s four phases (§4.5).

pub mod phase_b;
pub mod phase_c;
pub mod similarity;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::LinkingConfig;
use crate::domain::{Extract, ExtractType};
use crate::domain_store::DomainStore;
use crate::error::Result;
use crate::job::JobStore;
use crate::llm::LlmClient;

/// The resumable checkpoint persisted between phase steps (§4.5's "State").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Progress {
    #[serde(default)]
    c2c_done: HashSet<Uuid>,
    #[serde(default)]
    c2o_done: HashSet<Uuid>,
}

impl Progress {
    fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

/// Phase D's report, and the shape persisted as the job's `result` (§6).
#[derive(Debug, Serialize)]
pub struct LinkLibraryReport {
    pub library_id: Uuid,
    pub claims_processed: usize,
    pub c2c_links_found: usize,
    pub c2c_links_created: usize,
    pub c2o_links_found: usize,
    pub c2o_links_created: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Runs all four phases for one `LINK_LIBRARY` job, checkpointing progress
/// after each phase so a crash mid-run resumes without redoing completed
/// claims (§9's S4 scenario).
#[allow(clippy::too_many_arguments)]
pub async fn run(
    job_store: &dyn JobStore,
    domain_store: &dyn DomainStore,
    llm: &dyn LlmClient,
    config: &LinkingConfig,
    job_id: Uuid,
    worker_id: &str,
    library_id: Uuid,
    cutoff: Option<DateTime<Utc>>,
) -> Result<LinkLibraryReport> {
    let progress_value = job_store.get_progress(job_id).await?;
    let mut progress = Progress::from_value(&progress_value);

    // Phase A — materialize.
    let unlinked = domain_store.unlinked_claims(library_id, cutoff).await?;
    let claim_ids: Vec<Uuid> = unlinked.iter().map(|e| e.id).collect();
    let embeddings = domain_store.vectors_for_extracts(&claim_ids).await?;

    let with_embeddings: Vec<Extract> = unlinked
        .into_iter()
        .filter(|e| {
            if embeddings.contains_key(&e.id) {
                true
            } else {
                warn!(claim_id = %e.id, "claim has no embedding, skipping");
                false
            }
        })
        .collect();

    let all_claims = domain_store.latest_extracts_for_library(library_id, ExtractType::Claim).await?;
    let all_observations = domain_store.latest_extracts_for_library(library_id, ExtractType::Observation).await?;
    let all_methods = domain_store.latest_extracts_for_library(library_id, ExtractType::Method).await?;

    let c_all: HashSet<Uuid> = all_claims.iter().map(|e| e.id).collect();
    let o_all: HashSet<Uuid> = all_observations.iter().map(|e| e.id).collect();
    let claim_texts: HashMap<Uuid, String> =
        all_claims.iter().filter_map(|e| e.claim_text().map(|t| (e.id, t.to_string()))).collect();
    let all_claim_embeddings = domain_store.vectors_for_extracts(&c_all.iter().copied().collect::<Vec<_>>()).await?;

    let claims_processed = with_embeddings.len();

    // Phase B — claim-to-claim.
    let b_remaining: Vec<Extract> =
        with_embeddings.iter().filter(|e| !progress.c2c_done.contains(&e.id)).cloned().collect();
    let b_outcome = phase_b::run(
        llm,
        domain_store,
        job_id,
        &b_remaining,
        &claim_texts,
        &all_claim_embeddings,
        &c_all,
        config.c2c_similarity_threshold,
        config.max_concurrent_llm_calls,
    )
    .await?;
    progress.c2c_done.extend(b_outcome.processed);
    job_store.put_progress(job_id, worker_id, progress.to_value()).await?;
    info!(
        library_id = %library_id,
        links_found = b_outcome.links_found,
        links_created = b_outcome.links_created,
        "phase B complete"
    );

    // Phase C — claim-to-observation. Runs over every claim in U, not just
    // the ones Phase B touched, since the two progress sets are independent.
    let c_remaining: Vec<Extract> =
        with_embeddings.iter().filter(|e| !progress.c2o_done.contains(&e.id)).cloned().collect();
    let c_outcome = phase_c::run(
        llm,
        domain_store,
        job_id,
        &c_remaining,
        &all_methods,
        &all_observations,
        &o_all,
        config.max_concurrent_llm_calls,
    )
    .await?;
    progress.c2o_done.extend(c_outcome.processed);
    job_store.put_progress(job_id, worker_id, progress.to_value()).await?;
    info!(
        library_id = %library_id,
        links_found = c_outcome.links_found,
        links_created = c_outcome.links_created,
        "phase C complete"
    );

    // Phase D — report.
    Ok(LinkLibraryReport {
        library_id,
        claims_processed,
        c2c_links_found: b_outcome.links_found,
        c2c_links_created: b_outcome.links_created,
        c2o_links_found: c_outcome.links_found,
        c2o_links_created: c_outcome.links_created,
        prompt_tokens: llm.usage().prompt_tokens,
        completion_tokens: llm.usage().completion_tokens,
    })
}
