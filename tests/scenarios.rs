//! End-to-end scenarios driven through the real job queue: enqueue a
//! `PARSE_PAPER`, let the handler chain run to completion, and assert on
//! what landed in the Job Store / Domain Store. Exercises the coordination
//! layer's "enqueue now?" predicate the way a worker pool actually would,
//! rather than calling it directly.

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use scriptorium::config::{CoordinationConfig, JobStoreConfig, LinkingConfig};
use scriptorium::domain::ExtractType;
use scriptorium::domain_store::mock::MockDomainStore;
use scriptorium::domain_store::{DomainStore, NewExtract, NewPaper};
use scriptorium::error::Result;
use scriptorium::handlers::extract_elements::{ClaimDraft, ElementExtractor, FixtureExtractor, MethodDraft, ObservationDraft};
use scriptorium::handlers::parse_paper::FixtureParser;
use scriptorium::handlers::{self, HandlerContext};
use scriptorium::job::mock::MockJobStore;
use scriptorium::job::{JobKind, JobPayload, JobStore, Outcome};
use scriptorium::linking;
use scriptorium::llm::mock::MockLlmClient;
use scriptorium::llm::{
    EvidenceClassification, EvidenceLinkType, LlmClient, LlmUsage, MethodCandidate, ObservationCandidate,
    PairwiseClassification,
};

/// Claims and dispatches every pending job to completion, in FIFO order,
/// the same loop `worker::run_loop` runs minus the poll-sleep. Returns the
/// kind of each job processed, in order, so scenarios can assert on what
/// ran without needing a "list pending jobs" query the Job Store doesn't
/// expose.
async fn drain_queue(ctx: &HandlerContext<'_>, worker_id: &str) -> Vec<JobKind> {
    let mut kinds = Vec::new();
    while let Some(job) = ctx.job_store.claim(worker_id).await.unwrap() {
        kinds.push(job.kind());
        let outcome = match handlers::dispatch(ctx, job.id, worker_id, &job.payload).await {
            Ok(result) => Outcome::Completed { result },
            Err(e) => Outcome::Failed { error: e.to_string() },
        };
        ctx.job_store.complete(job.id, worker_id, outcome).await.unwrap();
    }
    kinds
}

async fn new_paper(domain_store: &MockDomainStore, sha: &str) -> Uuid {
    domain_store
        .create_or_get_paper(NewPaper {
            title: "Title".into(),
            filename: "paper.pdf".into(),
            storage_path: format!("/papers/{sha}.pdf"),
            sha256: sha.into(),
            metadata: json!({}),
        })
        .await
        .unwrap()
        .id
}

struct Fixtures {
    job_store: MockJobStore,
    domain_store: MockDomainStore,
    llm: MockLlmClient,
    parser: FixtureParser,
    extractor: Box<dyn ElementExtractor>,
    coordination: CoordinationConfig,
    linking: LinkingConfig,
    job_store_config: JobStoreConfig,
}

impl Fixtures {
    fn with_extractor(extractor: Box<dyn ElementExtractor>) -> Self {
        Self {
            job_store: MockJobStore::default(),
            domain_store: MockDomainStore::new(),
            llm: MockLlmClient::new(),
            parser: FixtureParser,
            extractor,
            coordination: CoordinationConfig::default(),
            linking: LinkingConfig::default(),
            job_store_config: JobStoreConfig::default(),
        }
    }

    fn default() -> Self {
        Self::with_extractor(Box::new(FixtureExtractor))
    }

    fn ctx(&self) -> HandlerContext<'_> {
        HandlerContext {
            job_store: &self.job_store,
            domain_store: &self.domain_store,
            llm: &self.llm,
            parser: &self.parser,
            extractor: self.extractor.as_ref(),
            coordination: &self.coordination,
            linking: &self.linking,
            job_store_config: &self.job_store_config,
        }
    }
}

/// S1 — fresh library, two papers added and fully processed. Expected:
/// exactly one `LINK_LIBRARY` is enqueued and run, processing both papers'
/// claims.
#[tokio::test]
async fn s1_fresh_library_enqueues_exactly_one_link_library() {
    let f = Fixtures::default();
    let library = f.domain_store.create_library("Lib", None).await.unwrap();
    let p1 = new_paper(&f.domain_store, "p1").await;
    let p2 = new_paper(&f.domain_store, "p2").await;
    f.domain_store.add_paper_to_library(library.id, p1).await.unwrap();
    f.domain_store.add_paper_to_library(library.id, p2).await.unwrap();

    f.job_store.enqueue(JobPayload::ParsePaper { paper_id: p1 }, 3).await.unwrap();
    f.job_store.enqueue(JobPayload::ParsePaper { paper_id: p2 }, 3).await.unwrap();

    let kinds = drain_queue(&f.ctx(), "worker-1").await;
    let link_runs = kinds.iter().filter(|k| **k == JobKind::LinkLibrary).count();
    assert_eq!(link_runs, 1, "exactly one LINK_LIBRARY should run for a fresh library's first batch");
}

/// S2 — burst debounce. A second and third paper land and finish
/// extraction close together; the "nothing processing" test alone should
/// serialize them into a single `LINK_LIBRARY`, same as the debounce
/// window would if extraction took longer than this test.
#[tokio::test]
async fn s2_burst_of_papers_enqueues_one_link_library_not_two() {
    let f = Fixtures::default();
    let library = f.domain_store.create_library("Lib", None).await.unwrap();
    let p1 = new_paper(&f.domain_store, "p1").await;
    f.domain_store.add_paper_to_library(library.id, p1).await.unwrap();
    f.job_store.enqueue(JobPayload::ParsePaper { paper_id: p1 }, 3).await.unwrap();
    drain_queue(&f.ctx(), "worker-1").await;

    let p2 = new_paper(&f.domain_store, "p2").await;
    let p3 = new_paper(&f.domain_store, "p3").await;
    f.domain_store.add_paper_to_library(library.id, p2).await.unwrap();
    f.domain_store.add_paper_to_library(library.id, p3).await.unwrap();
    f.job_store.enqueue(JobPayload::ParsePaper { paper_id: p2 }, 3).await.unwrap();
    f.job_store.enqueue(JobPayload::ParsePaper { paper_id: p3 }, 3).await.unwrap();

    let kinds = drain_queue(&f.ctx(), "worker-1").await;
    let link_runs = kinds.iter().filter(|k| **k == JobKind::LinkLibrary).count();
    assert_eq!(link_runs, 1, "two near-simultaneous extractions must not enqueue two LINK_LIBRARY jobs");
}

/// S3 — a paper already extracted for a different library moves into a
/// library that has already been linked. Its claims must be picked up as
/// "new to this library" on the next link run even though they predate
/// the cutoff.
#[tokio::test]
async fn s3_paper_moved_into_linked_library_is_picked_up() {
    let f = Fixtures::default();
    let l1 = f.domain_store.create_library("L1", None).await.unwrap();
    let l2 = f.domain_store.create_library("L2", None).await.unwrap();

    let resident = new_paper(&f.domain_store, "resident").await;
    f.domain_store.add_paper_to_library(l1.id, resident).await.unwrap();
    f.job_store.enqueue(JobPayload::ParsePaper { paper_id: resident }, 3).await.unwrap();
    drain_queue(&f.ctx(), "worker-1").await;

    let mover = new_paper(&f.domain_store, "mover").await;
    f.domain_store.add_paper_to_library(l2.id, mover).await.unwrap();
    f.job_store.enqueue(JobPayload::ParsePaper { paper_id: mover }, 3).await.unwrap();
    drain_queue(&f.ctx(), "worker-1").await;

    // `mover` now has extracts, scoped to l2. Move it into l1 directly, with
    // no extraction job in between.
    f.domain_store.add_paper_to_library(l1.id, mover).await.unwrap();

    let enqueued = scriptorium::coordination::maybe_enqueue_link_library(
        &f.job_store,
        &f.domain_store,
        &f.coordination,
        l1.id,
        None,
        f.job_store_config.default_max_attempts,
    )
    .await
    .unwrap();
    assert!(enqueued.is_some(), "a paper moving into an already-linked library must trigger re-linking");

    let job_id = enqueued.unwrap();
    f.job_store.claim("worker-1").await.unwrap();
    let report = linking::run(
        &f.job_store,
        &f.domain_store,
        &f.llm,
        &f.linking,
        job_id,
        "worker-1",
        l1.id,
        None,
    )
    .await
    .unwrap();
    // Both the resident paper's claim and the mover's claim are now in L1's
    // unlinked set: the resident's cutoff-based rule doesn't apply here
    // because this is the library's first LINK_LIBRARY run.
    assert_eq!(report.claims_processed, 2);
}

/// S4 — a worker crashes after phase B persists its progress but before the
/// job completes. The stale-claim sweep returns the job to pending, a
/// second worker claims it, and resuming does not re-classify or duplicate
/// the link phase B already found.
#[tokio::test]
async fn s4_retry_after_worker_crash_resumes_without_reprocessing() {
    let f = Fixtures::default();
    let library = f.domain_store.create_library("Lib", None).await.unwrap();
    let paper = new_paper(&f.domain_store, "p1").await;
    f.domain_store.add_paper_to_library(library.id, paper).await.unwrap();

    let claims = f
        .domain_store
        .create_extracts(vec![
            NewExtract {
                paper_id: paper,
                job_id: None,
                extract_type: ExtractType::Claim,
                content: json!({"rephrased_claim": "water boils at 100C at sea level"}),
            },
            NewExtract {
                paper_id: paper,
                job_id: None,
                extract_type: ExtractType::Claim,
                content: json!({"rephrased_claim": "water boils at 100C at sea level"}),
            },
        ])
        .await
        .unwrap();
    f.domain_store
        .create_vectors(claims.iter().map(|e| (e.id, vec![1.0, 0.0, 0.0])).collect())
        .await
        .unwrap();

    let job = f.job_store.enqueue(JobPayload::LinkLibrary { library_id: library.id, cutoff: None }, 3).await.unwrap();
    f.job_store.claim("worker-1").await.unwrap();

    let first =
        linking::run(&f.job_store, &f.domain_store, &f.llm, &f.linking, job.id, "worker-1", library.id, None)
            .await
            .unwrap();
    assert_eq!(first.c2c_links_created, 1, "first attempt finds and persists the duplicate link");

    // Simulate the crash: the worker never calls `complete`, so the job is
    // still `Running` when the sweep reclaims it. A threshold that puts the
    // cutoff a moment in the future guarantees `claimed_at` (set just above)
    // counts as stale regardless of clock resolution.
    let reclaimed = f.job_store.reclaim_stale(chrono::Duration::milliseconds(-1)).await.unwrap();
    assert_eq!(reclaimed, 1, "the abandoned job is reclaimed to pending");

    let resumed = f.job_store.claim("worker-2").await.unwrap().expect("reclaimed job is claimable again");
    assert_eq!(resumed.id, job.id);

    let second =
        linking::run(&f.job_store, &f.domain_store, &f.llm, &f.linking, job.id, "worker-2", library.id, None)
            .await
            .unwrap();
    assert_eq!(second.c2c_links_found, 0, "the claim pair already recorded in progress is not re-classified");
    assert_eq!(second.c2c_links_created, 0);

    f.job_store.complete(job.id, "worker-2", Outcome::Completed { result: json!({}) }).await.unwrap();
    let links = f.domain_store.links_for_library(library.id).await.unwrap();
    assert_eq!(links.len(), 1, "the link persisted before the crash is not duplicated on resume");
}

/// A wrapper delegating every call to an inner [`MockLlmClient`], except
/// `classify_evidence`, which appends one extra verdict for an observation
/// ID that was never offered as a candidate — simulating a model echoing
/// back an ID outside the closed set it was handed.
struct HallucinatingLlmClient {
    inner: MockLlmClient,
}

#[async_trait]
impl LlmClient for HallucinatingLlmClient {
    async fn classify_claim_pair(&self, claim_1: &str, claim_2: &str) -> Result<PairwiseClassification> {
        self.inner.classify_claim_pair(claim_1, claim_2).await
    }

    async fn select_relevant_methods(&self, claim_text: &str, candidates: &[MethodCandidate]) -> Result<Vec<Uuid>> {
        self.inner.select_relevant_methods(claim_text, candidates).await
    }

    async fn classify_evidence(
        &self,
        claim_text: &str,
        candidates: &[ObservationCandidate],
    ) -> Result<Vec<EvidenceClassification>> {
        let mut classifications = self.inner.classify_evidence(claim_text, candidates).await?;
        classifications.push(EvidenceClassification {
            observation_id: Uuid::new_v4(),
            link_type: EvidenceLinkType::Supports,
            reasoning: "hallucinated".into(),
        });
        Ok(classifications)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed(texts).await
    }

    fn usage(&self) -> LlmUsage {
        self.inner.usage()
    }
}

/// S5 — the evidence classifier echoes back an observation ID outside the
/// candidate set it was handed. The hallucinated link is dropped and
/// logged; the job still completes with the genuine link persisted.
#[tokio::test]
async fn s5_hallucinated_observation_id_is_dropped_but_job_completes() {
    let f = Fixtures::default();
    let library = f.domain_store.create_library("Lib", None).await.unwrap();
    let paper = new_paper(&f.domain_store, "p1").await;
    f.domain_store.add_paper_to_library(library.id, paper).await.unwrap();

    let claim = f
        .domain_store
        .create_extracts(vec![NewExtract {
            paper_id: paper,
            job_id: None,
            extract_type: ExtractType::Claim,
            content: json!({"rephrased_claim": "water boils at 100C at sea level"}),
        }])
        .await
        .unwrap();
    f.domain_store.create_vectors(claim.iter().map(|e| (e.id, vec![1.0, 0.0, 0.0])).collect()).await.unwrap();
    f.domain_store
        .create_extracts(vec![NewExtract {
            paper_id: paper,
            job_id: None,
            extract_type: ExtractType::Observation,
            content: json!({"observation_text": "a kettle measured 100C at sea level"}),
        }])
        .await
        .unwrap();

    let job = f.job_store.enqueue(JobPayload::LinkLibrary { library_id: library.id, cutoff: None }, 3).await.unwrap();
    f.job_store.claim("worker-1").await.unwrap();

    let llm = HallucinatingLlmClient { inner: MockLlmClient::new() };
    let report = linking::run(&f.job_store, &f.domain_store, &llm, &f.linking, job.id, "worker-1", library.id, None)
        .await
        .expect("a hallucinated id must not fail the job");

    assert_eq!(report.c2o_links_found, 2, "the genuine verdict plus the hallucinated one");
    assert_eq!(report.c2o_links_created, 1, "only the id from the candidate set is persisted");

    f.job_store.complete(job.id, "worker-1", Outcome::Completed { result: json!({}) }).await.unwrap();
    let links = f.domain_store.links_for_library(library.id).await.unwrap();
    assert_eq!(links.len(), 1, "the hallucinated link never reaches the domain store");
}

/// S6 — a library with claims but no observations has nothing to link yet;
/// coordination must not enqueue `LINK_LIBRARY` for it.
#[tokio::test]
async fn s6_claims_without_observations_enqueues_nothing() {
    struct ClaimsOnlyExtractor;

    #[async_trait]
    impl ElementExtractor for ClaimsOnlyExtractor {
        async fn extract_claims(&self, tei_path: &str) -> Result<Vec<ClaimDraft>> {
            Ok(vec![ClaimDraft { rephrased_claim: format!("a claim from {tei_path}") }])
        }

        async fn extract_methods(&self, _tei_path: &str) -> Result<Vec<MethodDraft>> {
            Ok(Vec::new())
        }

        async fn extract_observations(
            &self,
            _tei_path: &str,
            _methods: &[(Uuid, String)],
        ) -> Result<Vec<ObservationDraft>> {
            Ok(Vec::new())
        }
    }

    let f = Fixtures::with_extractor(Box::new(ClaimsOnlyExtractor));
    let library = f.domain_store.create_library("Lib", None).await.unwrap();
    let paper = new_paper(&f.domain_store, "p1").await;
    f.domain_store.add_paper_to_library(library.id, paper).await.unwrap();
    f.job_store.enqueue(JobPayload::ParsePaper { paper_id: paper }, 3).await.unwrap();

    let kinds = drain_queue(&f.ctx(), "worker-1").await;
    assert!(
        !kinds.contains(&JobKind::LinkLibrary),
        "a library with claims but no observations has nothing to link yet"
    );
}
