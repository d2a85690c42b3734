//! Phase C — claim-to-observation linking (§4.5).

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Extract, LinkCategory, LinkContent, NewExtractLink};
use crate::domain_store::DomainStore;
use crate::error::Result;
use crate::llm::{EvidenceLinkType, LlmClient, MethodCandidate, ObservationCandidate};

pub struct PhaseCOutcome {
    pub links_found: usize,
    pub links_created: usize,
    pub processed: HashSet<Uuid>,
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    llm: &dyn LlmClient,
    domain_store: &dyn DomainStore,
    job_id: Uuid,
    remaining: &[Extract],
    methods: &[Extract],
    observations: &[Extract],
    valid_observation_ids: &HashSet<Uuid>,
    max_concurrent: usize,
) -> Result<PhaseCOutcome> {
    if remaining.is_empty() {
        return Ok(PhaseCOutcome { links_found: 0, links_created: 0, processed: HashSet::new() });
    }

    let method_candidates: Vec<MethodCandidate> = methods
        .iter()
        .filter_map(|m| m.method_summary().map(|s| MethodCandidate { id: m.id, summary: s.to_string() }))
        .collect();

    let results: Vec<(Uuid, Vec<NewExtractLink>)> = stream::iter(remaining.iter())
        .map(|claim| async move {
            let links = link_one_claim(llm, claim, &method_candidates, observations, job_id).await;
            (claim.id, links)
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect::<Vec<_>>()
        .await;

    let mut links_found = 0;
    let mut candidate_links = Vec::new();
    for (_claim_id, links) in &results {
        links_found += links.len();
        candidate_links.extend(links.clone());
    }

    let valid_links: Vec<NewExtractLink> =
        candidate_links.into_iter().filter(|l| valid_observation_ids.contains(&l.to_id)).collect();
    let dropped = links_found - valid_links.len();
    if dropped > 0 {
        warn!(dropped, "dropped claim_to_observation links with hallucinated observation ids");
    }

    let links_created = domain_store.create_links(valid_links).await?;
    let processed: HashSet<Uuid> = results.into_iter().map(|(id, _)| id).collect();

    Ok(PhaseCOutcome { links_found, links_created, processed })
}

/// Runs method preselection, builds the candidate observation set, and
/// classifies evidence for one claim. Errors at either LLM step degrade to
/// an empty result for that claim rather than failing the job (§9's error
/// table).
async fn link_one_claim(
    llm: &dyn LlmClient,
    claim: &Extract,
    method_candidates: &[MethodCandidate],
    observations: &[Extract],
    job_id: Uuid,
) -> Vec<NewExtractLink> {
    let claim_text = match claim.claim_text() {
        Some(t) => t,
        None => return Vec::new(),
    };

    let selected_methods: HashSet<Uuid> = match llm.select_relevant_methods(claim_text, method_candidates).await {
        Ok(ids) => ids.into_iter().collect(),
        Err(e) => {
            warn!(error = %e, claim_id = %claim.id, "method preselection failed, treating as empty");
            HashSet::new()
        }
    };

    let candidates: Vec<ObservationCandidate> = observations
        .iter()
        .filter_map(|o| {
            let text = o.observation_text()?;
            let same_paper = o.paper_id == claim.paper_id;
            let method_match = o.method_reference().map(|m| selected_methods.contains(&m)).unwrap_or(false);
            if !same_paper && !method_match {
                return None;
            }
            let method_summary = o.method_reference().and_then(|m| {
                method_candidates.iter().find(|c| c.id == m).map(|c| c.summary.clone())
            });
            Some(ObservationCandidate { id: o.id, text: text.to_string(), same_paper, method_summary })
        })
        .collect();

    if candidates.is_empty() {
        return Vec::new();
    }

    let classifications = match llm.classify_evidence(claim_text, &candidates).await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, claim_id = %claim.id, "evidence classification failed, treating as empty result");
            return Vec::new();
        }
    };

    classifications
        .into_iter()
        .filter(|c| c.link_type != EvidenceLinkType::None)
        .map(|c| NewExtractLink {
            from_id: claim.id,
            to_id: c.observation_id,
            content: LinkContent {
                link_category: LinkCategory::ClaimToObservation,
                link_type: match c.link_type {
                    EvidenceLinkType::Supports => "supports",
                    EvidenceLinkType::Contradicts => "contradicts",
                    EvidenceLinkType::Contextualizes => "contextualizes",
                    EvidenceLinkType::None => unreachable!("filtered above"),
                }
                .to_string(),
                reasoning: Some(c.reasoning),
            },
            job_id,
        })
        .collect()
}
