//! `EXTRACT_ELEMENTS` handler (§4.3). Runs three extractors over a parsed
//! paper, persists Extracts/ExtractVectors, and invokes the coordination
//! layer for every library the paper belongs to. Idempotent on retry: if
//! this job's ID already produced extracts, it reports "skipped" instead of
//! writing a second set.

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::HandlerContext;
use crate::coordination;
use crate::domain::ExtractType;
use crate::domain_store::NewExtract;
use crate::error::{Result, ScriptoriumError};

#[derive(Debug, Clone)]
pub struct ClaimDraft {
    pub rephrased_claim: String,
}

#[derive(Debug, Clone)]
pub struct MethodDraft {
    pub method_summary: String,
}

#[derive(Debug, Clone)]
pub struct ObservationDraft {
    pub observation_text: String,
    /// References a just-persisted method extract's ID (see
    /// `extract_observations`'s `methods` parameter), not a draft.
    pub method_reference: Option<Uuid>,
}

/// The prompts and schemas behind each extraction kind are out of scope
/// (§1); this trait is the seam the handler's side effects (writes, vectors,
/// coordination) are specified against.
#[async_trait]
pub trait ElementExtractor: Send + Sync {
    async fn extract_claims(&self, tei_path: &str) -> Result<Vec<ClaimDraft>>;

    async fn extract_methods(&self, tei_path: &str) -> Result<Vec<MethodDraft>>;

    /// `methods` is the set of methods already persisted for this paper
    /// (their real extract IDs), so observations can carry a real
    /// `method_reference` rather than a draft-local index.
    async fn extract_observations(&self, tei_path: &str, methods: &[(Uuid, String)]) -> Result<Vec<ObservationDraft>>;
}

/// Deterministic stand-in producing a single claim/method/observation per
/// paper, enough to exercise the handler's persistence and coordination
/// wiring without a real extraction model.
pub struct FixtureExtractor;

#[async_trait]
impl ElementExtractor for FixtureExtractor {
    async fn extract_claims(&self, tei_path: &str) -> Result<Vec<ClaimDraft>> {
        Ok(vec![ClaimDraft { rephrased_claim: format!("a claim extracted from {tei_path}") }])
    }

    async fn extract_methods(&self, tei_path: &str) -> Result<Vec<MethodDraft>> {
        Ok(vec![MethodDraft { method_summary: format!("method described in {tei_path}") }])
    }

    async fn extract_observations(&self, tei_path: &str, methods: &[(Uuid, String)]) -> Result<Vec<ObservationDraft>> {
        Ok(vec![ObservationDraft {
            observation_text: format!("an observation from {tei_path}"),
            method_reference: methods.first().map(|(id, _)| *id),
        }])
    }
}

pub async fn handle(ctx: &HandlerContext<'_>, job_id: Uuid, paper_id: Uuid) -> Result<Value> {
    if ctx.domain_store.has_extracts_from_job(paper_id, job_id).await? {
        return Ok(json!({
            "paper_id": paper_id,
            "job_id": job_id,
            "skipped": true,
            "reason": "already_ran",
        }));
    }

    let paper = ctx
        .domain_store
        .get_paper(paper_id)
        .await?
        .ok_or_else(|| ScriptoriumError::NotFound { what: "paper", id: paper_id.to_string() })?;
    let tei_path = paper
        .parsed_path
        .ok_or_else(|| ScriptoriumError::Validation(format!("paper {paper_id} has not been parsed")))?;

    let claim_drafts = ctx.extractor.extract_claims(&tei_path).await?;
    let claim_extracts = ctx
        .domain_store
        .create_extracts(
            claim_drafts
                .into_iter()
                .map(|c| NewExtract {
                    paper_id,
                    job_id: Some(job_id),
                    extract_type: ExtractType::Claim,
                    content: json!({"rephrased_claim": c.rephrased_claim}),
                })
                .collect(),
        )
        .await?;

    let method_drafts = ctx.extractor.extract_methods(&tei_path).await?;
    let method_extracts = ctx
        .domain_store
        .create_extracts(
            method_drafts
                .into_iter()
                .map(|m| NewExtract {
                    paper_id,
                    job_id: Some(job_id),
                    extract_type: ExtractType::Method,
                    content: json!({"method_summary": m.method_summary}),
                })
                .collect(),
        )
        .await?;
    let persisted_methods: Vec<(Uuid, String)> =
        method_extracts.iter().filter_map(|m| m.method_summary().map(|s| (m.id, s.to_string()))).collect();

    let observation_drafts = ctx.extractor.extract_observations(&tei_path, &persisted_methods).await?;
    let observations_skipped = observation_drafts.iter().filter(|o| o.observation_text.trim().is_empty()).count();
    let observation_extracts = ctx
        .domain_store
        .create_extracts(
            observation_drafts
                .into_iter()
                .filter(|o| !o.observation_text.trim().is_empty())
                .map(|o| NewExtract {
                    paper_id,
                    job_id: Some(job_id),
                    extract_type: ExtractType::Observation,
                    content: json!({
                        "observation_text": o.observation_text,
                        "method_reference": o.method_reference,
                    }),
                })
                .collect(),
        )
        .await?;

    let claim_ids: Vec<Uuid> = claim_extracts.iter().map(|e| e.id).collect();
    let observation_ids: Vec<Uuid> = observation_extracts.iter().map(|e| e.id).collect();
    embed_and_store(ctx, &claim_extracts, &claim_ids).await?;
    embed_and_store(ctx, &observation_extracts, &observation_ids).await?;

    let libraries = ctx.domain_store.libraries_for_paper(paper_id).await?;
    for library_id in libraries {
        coordination::maybe_enqueue_link_library(
            ctx.job_store,
            ctx.domain_store,
            ctx.coordination,
            library_id,
            None,
            ctx.job_store_config.default_max_attempts,
        )
        .await?;
    }

    Ok(json!({
        "paper_id": paper_id,
        "job_id": job_id,
        "claims_count": claim_extracts.len(),
        "methods_count": method_extracts.len(),
        "observations_count": observation_extracts.len(),
        "observations_skipped": observations_skipped,
    }))
}

async fn embed_and_store(ctx: &HandlerContext<'_>, extracts: &[crate::domain::Extract], ids: &[Uuid]) -> Result<()> {
    let texts: Vec<String> = extracts
        .iter()
        .map(|e| e.claim_text().or_else(|| e.observation_text()).unwrap_or_default().to_string())
        .collect();
    if texts.is_empty() {
        return Ok(());
    }
    let vectors = ctx.llm.embed(&texts).await?;
    ctx.domain_store.create_vectors(ids.iter().copied().zip(vectors).collect()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoordinationConfig, JobStoreConfig, LinkingConfig};
    use crate::domain_store::mock::MockDomainStore;
    use crate::domain_store::NewPaper;
    use crate::handlers::parse_paper::FixtureParser;
    use crate::job::mock::MockJobStore;
    use crate::llm::mock::MockLlmClient;

    async fn setup_parsed_paper() -> (MockJobStore, MockDomainStore, MockLlmClient, Uuid) {
        let job_store = MockJobStore::default();
        let domain_store = MockDomainStore::new();
        let llm = MockLlmClient::new();

        let paper = domain_store
            .create_or_get_paper(NewPaper {
                title: "T".into(),
                filename: "f.pdf".into(),
                storage_path: "/tmp/f.pdf".into(),
                sha256: "sha".into(),
                metadata: json!({}),
            })
            .await
            .unwrap();
        domain_store.set_parsed(paper.id, "/tmp/f.pdf.tei.xml", json!({})).await.unwrap();

        (job_store, domain_store, llm, paper.id)
    }

    #[tokio::test]
    async fn persists_extracts_and_is_idempotent_on_retry() {
        let (job_store, domain_store, llm, paper_id) = setup_parsed_paper().await;
        let parser = FixtureParser;
        let extractor = FixtureExtractor;
        let coordination = CoordinationConfig::default();
        let linking = LinkingConfig::default();
        let job_store_config = JobStoreConfig::default();
        let ctx = HandlerContext {
            job_store: &job_store,
            domain_store: &domain_store,
            llm: &llm,
            parser: &parser,
            extractor: &extractor,
            coordination: &coordination,
            linking: &linking,
            job_store_config: &job_store_config,
        };

        let job_id = Uuid::new_v4();
        let result = handle(&ctx, job_id, paper_id).await.unwrap();
        assert_eq!(result["claims_count"], json!(1));
        assert_eq!(result["observations_count"], json!(1));

        let retried = handle(&ctx, job_id, paper_id).await.unwrap();
        assert_eq!(retried["skipped"], json!(true));
    }
}
