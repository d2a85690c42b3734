//! `PARSE_PAPER` handler (§4.3). PDF→TEI conversion is an external
//! collaborator out of scope (§1); this module implements the job's
//! contract — idempotent `parsed_path` write, result shape, follow-up
//! enqueue — behind [`PaperParser`], with [`FixtureParser`] standing in for
//! the real conversion.

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::HandlerContext;
use crate::error::{Result, ScriptoriumError};
use crate::job::JobPayload;

/// Output of converting a paper's stored bytes into TEI XML.
#[derive(Debug, Clone)]
pub struct ParsedPaper {
    pub tei_path: String,
    pub tei_size: u64,
    pub figures_extracted: u32,
    pub title: Option<String>,
    pub references_count: u32,
}

#[async_trait]
pub trait PaperParser: Send + Sync {
    async fn parse(&self, storage_path: &str) -> Result<ParsedPaper>;
}

/// Deterministic stand-in: derives a plausible-looking TEI sidecar path and
/// fixed counts from the input path rather than running a real GROBID-style
/// conversion.
pub struct FixtureParser;

#[async_trait]
impl PaperParser for FixtureParser {
    async fn parse(&self, storage_path: &str) -> Result<ParsedPaper> {
        Ok(ParsedPaper {
            tei_path: format!("{storage_path}.tei.xml"),
            tei_size: 4096,
            figures_extracted: 0,
            title: None,
            references_count: 0,
        })
    }
}

pub async fn handle(ctx: &HandlerContext<'_>, paper_id: Uuid) -> Result<Value> {
    let paper = ctx
        .domain_store
        .get_paper(paper_id)
        .await?
        .ok_or_else(|| ScriptoriumError::NotFound { what: "paper", id: paper_id.to_string() })?;

    let parsed = ctx.parser.parse(&paper.storage_path).await?;

    let metadata = json!({
        "title": parsed.title,
        "figures_extracted": parsed.figures_extracted,
        "references_count": parsed.references_count,
    });
    ctx.domain_store.set_parsed(paper_id, &parsed.tei_path, metadata).await?;

    ctx.job_store
        .enqueue(JobPayload::ExtractElements { paper_id }, ctx.job_store_config.default_max_attempts)
        .await?;

    Ok(json!({
        "paper_id": paper_id,
        "parsed_path": parsed.tei_path,
        "tei_size": parsed.tei_size,
        "figures_extracted": parsed.figures_extracted,
        "title": parsed.title,
        "references_count": parsed.references_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoordinationConfig, JobStoreConfig, LinkingConfig};
    use crate::domain_store::mock::MockDomainStore;
    use crate::domain_store::NewPaper;
    use crate::handlers::extract_elements::FixtureExtractor;
    use crate::job::mock::MockJobStore;
    use crate::job::JobKind;
    use crate::llm::mock::MockLlmClient;

    #[tokio::test]
    async fn sets_parsed_path_and_enqueues_extraction() {
        let job_store = MockJobStore::default();
        let domain_store = MockDomainStore::new();
        let llm = MockLlmClient::new();
        let parser = FixtureParser;
        let extractor = FixtureExtractor;
        let coordination = CoordinationConfig::default();
        let linking = LinkingConfig::default();
        let job_store_config = JobStoreConfig::default();

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

        let result = handle(&ctx, paper.id).await.unwrap();
        assert_eq!(result["paper_id"], json!(paper.id));

        let stored = domain_store.get_paper(paper.id).await.unwrap().unwrap();
        assert!(stored.parsed_path.is_some());

        let active = job_store
            .has_active_of_kind_for_subject(JobKind::ExtractElements, "paper_id", &paper.id.to_string(), None)
            .await
            .unwrap();
        assert!(active, "PARSE_PAPER must enqueue EXTRACT_ELEMENTS on completion");
    }
}
