//! The Domain Store: CRUD and query surface over Paper, Library, Extract,
//! ExtractVector, and ExtractLink (§2.6, §3). Ambient to the distilled
//! spec — handlers and the coordination layer cannot be implemented without
//! it — but it shares nothing with the Job Store beyond a connection pool.

pub mod mock;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{Extract, ExtractLink, ExtractType, Library, NewExtractLink, Paper};
use crate::error::Result;



/// Input to `create_extracts`: the store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewExtract {
    pub paper_id: Uuid,
    pub job_id: Option<Uuid>,
    pub extract_type: ExtractType,
    pub content: Value,
}

#[derive(Debug, Clone)]
pub struct NewPaper {
    pub title: String,
    pub filename: String,
    pub storage_path: String,
    pub sha256: String,
    pub metadata: Value,
}

#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Content-addressed insert: identical `sha256` collapses to the
    /// existing row instead of erroring (§3's "Paper").
    async fn create_or_get_paper(&self, paper: NewPaper) -> Result<Paper>;

    async fn get_paper(&self, paper_id: Uuid) -> Result<Option<Paper>>;

    /// Sets `parsed_path`/`metadata`; repeat calls with the same path are a
    /// no-op per the `PARSE_PAPER` idempotence contract (§5).
    async fn set_parsed(&self, paper_id: Uuid, parsed_path: &str, metadata: Value) -> Result<()>;

    async fn create_library(&self, title: &str, owner_id: Option<Uuid>) -> Result<Library>;

    async fn get_library(&self, library_id: Uuid) -> Result<Option<Library>>;

    /// Upserts the `(library_id, paper_id)` membership row with `added_at =
    /// now()`; re-adding an existing member does not reset `added_at`.
    async fn add_paper_to_library(&self, library_id: Uuid, paper_id: Uuid) -> Result<()>;

    async fn library_paper_ids(&self, library_id: Uuid) -> Result<Vec<Uuid>>;

    async fn libraries_for_paper(&self, paper_id: Uuid) -> Result<Vec<Uuid>>;

    async fn added_at(&self, library_id: Uuid, paper_id: Uuid) -> Result<Option<DateTime<Utc>>>;

    async fn create_extracts(&self, extracts: Vec<NewExtract>) -> Result<Vec<Extract>>;

    /// True if any extract of `paper_id` already carries `job_id` — the
    /// idempotence check `EXTRACT_ELEMENTS` uses on retry (§4.3).
    async fn has_extracts_from_job(&self, paper_id: Uuid, job_id: Uuid) -> Result<bool>;

    /// The "latest set per (paper, type)" extracts sharing the newest
    /// `job_id` for that pair (§3), newest determined by `created_at DESC,
    /// job_id DESC` (§9's tie-break resolution).
    async fn latest_extracts_for_paper(&self, paper_id: Uuid, extract_type: ExtractType) -> Result<Vec<Extract>>;

    /// Same filter, applied across every paper in the library.
    async fn latest_extracts_for_library(&self, library_id: Uuid, extract_type: ExtractType) -> Result<Vec<Extract>>;

    async fn vectors_for_extracts(&self, extract_ids: &[Uuid]) -> Result<std::collections::HashMap<Uuid, Vec<f32>>>;

    async fn create_vectors(&self, vectors: Vec<(Uuid, Vec<f32>)>) -> Result<()>;

    /// §4.4's unlinked-claim rule. `cutoff = None` means "library new to
    /// linking": any claim qualifies as long as the library has ≥1
    /// observation too (checked by the caller via
    /// `has_claim_and_observation`). `cutoff = Some(t)` restricts to claims
    /// with `created_at > t` OR whose owning paper's `library_papers.added_at
    /// > t`.
    async fn unlinked_claims(&self, library_id: Uuid, cutoff: Option<DateTime<Utc>>) -> Result<Vec<Extract>>;

    async fn has_claim_and_observation(&self, library_id: Uuid) -> Result<bool>;

    /// Inserts links, ignoring `(from_id, to_id)` conflicts (§3's
    /// uniqueness). Returns the count actually inserted (excludes
    /// conflicts), distinct from the count attempted.
    async fn create_links(&self, links: Vec<NewExtractLink>) -> Result<usize>;

    async fn links_for_library(&self, library_id: Uuid) -> Result<Vec<ExtractLink>>;
}
