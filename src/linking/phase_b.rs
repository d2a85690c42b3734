//! Phase B — claim-to-claim linking (§4.5).

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Extract, LinkCategory, LinkContent, NewExtractLink};
use crate::domain_store::DomainStore;
use crate::error::Result;
use crate::linking::similarity::build_candidate_pairs;
use crate::llm::{LlmClient, PairwiseLinkType};

pub struct PhaseBOutcome {
    pub links_found: usize,
    pub links_created: usize,
    pub processed: HashSet<Uuid>,
}

/// For each input claim not yet in `progress.c2c_done`, finds candidate
/// partners above the similarity threshold, classifies each pair with one
/// LLM call, and persists the resulting links. Candidate generation runs
/// once for the whole batch rather than per-claim, since it's the same
/// offloaded matrix computation either way.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    llm: &dyn LlmClient,
    domain_store: &dyn DomainStore,
    job_id: Uuid,
    remaining: &[Extract],
    all_claim_texts: &HashMap<Uuid, String>,
    embeddings: &HashMap<Uuid, Vec<f32>>,
    valid_claim_ids: &HashSet<Uuid>,
    similarity_threshold: f32,
    max_concurrent: usize,
) -> Result<PhaseBOutcome> {
    if remaining.is_empty() {
        return Ok(PhaseBOutcome { links_found: 0, links_created: 0, processed: HashSet::new() });
    }

    let new_claims: Vec<(Uuid, Vec<f32>)> =
        remaining.iter().filter_map(|e| embeddings.get(&e.id).map(|v| (e.id, v.clone()))).collect();
    let all_with_embeddings: Vec<(Uuid, Vec<f32>)> =
        valid_claim_ids.iter().filter_map(|id| embeddings.get(id).map(|v| (*id, v.clone()))).collect();

    let pairs = build_candidate_pairs(new_claims, all_with_embeddings, similarity_threshold).await?;

    let classifications = stream::iter(pairs.iter())
        .map(|pair| async move {
            let text_a = all_claim_texts.get(&pair.a).map(String::as_str).unwrap_or_default();
            let text_b = all_claim_texts.get(&pair.b).map(String::as_str).unwrap_or_default();
            let classification = llm.classify_claim_pair(text_a, text_b).await;
            (pair.a, pair.b, classification)
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect::<Vec<_>>()
        .await;

    let mut links_found = 0;
    let mut candidate_links = Vec::new();

    for (a, b, classification) in classifications {
        let classification = match classification {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, claim_a = %a, claim_b = %b, "pairwise classification failed, treating as none");
                continue;
            }
        };

        let (from_id, to_id, link_type) = match classification.link_type {
            PairwiseLinkType::None => continue,
            PairwiseLinkType::Duplicate => (a, b, "duplicate"),
            PairwiseLinkType::Variant => (a, b, "variant"),
            PairwiseLinkType::Contradiction => (a, b, "contradiction"),
            PairwiseLinkType::Premise1To2 => (a, b, "premise"),
            PairwiseLinkType::Premise2To1 => (b, a, "premise"),
        };

        links_found += 1;
        candidate_links.push(NewExtractLink {
            from_id,
            to_id,
            content: LinkContent {
                link_category: LinkCategory::ClaimToClaim,
                link_type: link_type.to_string(),
                reasoning: Some(classification.reasoning),
            },
            job_id,
        });
    }

    let valid_links: Vec<NewExtractLink> = candidate_links
        .into_iter()
        .filter(|l| valid_claim_ids.contains(&l.from_id) && valid_claim_ids.contains(&l.to_id))
        .collect();

    let links_created = domain_store.create_links(valid_links).await?;
    let processed: HashSet<Uuid> = remaining.iter().map(|e| e.id).collect();

    Ok(PhaseBOutcome { links_found, links_created, processed })
}
