//! The LLM Client: the external collaborator boundary the linking engine's
//! classification steps dispatch through (§2.7, §4.5).
//!
//! Every signature here mirrors a DSPy module from the original
//! claim-linking prototype, translated into a typed async trait: pairwise
//! claim classification, method preselection for a claim, and evidence
//! classification for a claim/observation pair. None of these ever hand the
//! model an ID to echo back — IDs are correlated on our side from the
//! request we made, which is what keeps a hallucinated UUID from ever
//! reaching the Domain Store (§4.5's "never pass IDs" rule). Method
//! preselection and evidence classification are the two exceptions: both
//! return IDs chosen from a closed set we handed them, and the caller still
//! drops anything outside that set before writing.

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PairwiseLinkType {
    None,
    Duplicate,
    Variant,
    Contradiction,
    Premise1To2,
    Premise2To1,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseClassification {
    pub link_type: PairwiseLinkType,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceLinkType {
    None,
    Supports,
    Contradicts,
    Contextualizes,
}

/// An observation offered as a candidate for evidence classification.
/// `method_summary` is the summary of the method it references, if any —
/// carried so the prompt can group candidates by method within each of the
/// "same-paper" / "general literature" buckets (§4.5 step 3).
#[derive(Debug, Clone)]
pub struct ObservationCandidate {
    pub id: Uuid,
    pub text: String,
    pub same_paper: bool,
    pub method_summary: Option<String>,
}

/// One claim/observation evidential verdict, keyed by the observation ID the
/// model was shown. The caller validates `observation_id` against the
/// candidate set it sent before persisting anything (§4.5 step 4).
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceClassification {
    pub observation_id: Uuid,
    pub link_type: EvidenceLinkType,
    pub reasoning: String,
}

/// A method candidate offered to preselection: a request-scoped ID crosses
/// the LLM boundary here too, validated against this exact set afterward
/// (§4.5).
#[derive(Debug, Clone)]
pub struct MethodCandidate {
    pub id: Uuid,
    pub summary: String,
}

#[derive(Debug, Clone, Default)]
pub struct LlmUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn classify_claim_pair(&self, claim_1: &str, claim_2: &str) -> Result<PairwiseClassification>;

    /// Restricted to `candidates`; the caller must still drop any returned
    /// ID that is not a member of `candidates` before writing (§4.5).
    async fn select_relevant_methods(&self, claim_text: &str, candidates: &[MethodCandidate]) -> Result<Vec<Uuid>>;

    /// One call per claim, covering every candidate observation at once;
    /// the returned list may omit candidates the model found irrelevant
    /// (treated as `none`) and must never be assumed to cover all of
    /// `candidates` (§4.5 step 3).
    async fn classify_evidence(
        &self,
        claim_text: &str,
        candidates: &[ObservationCandidate],
    ) -> Result<Vec<EvidenceClassification>>;

    /// Batched, order-preserving embedding call (§2.7).
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn usage(&self) -> LlmUsage;
}
