//! A deterministic [`LlmClient`] double for handler/linking tests that
//! would otherwise require a live provider.

use async_trait::async_trait;
use std::sync::Mutex;
use uuid::Uuid;

use super::{
    EvidenceClassification, EvidenceLinkType, LlmClient, LlmUsage, MethodCandidate, ObservationCandidate,
    PairwiseClassification, PairwiseLinkType,
};
use crate::error::Result;

/// Classifies by exact text equality (duplicate) or returns `none`, and
/// selects every candidate method/observation as `supports`, so tests can
/// focus on orchestration rather than on stubbing specific LLM judgments.
/// Override via [`MockLlmClient::with_pairwise`] / [`MockLlmClient::with_evidence`]
/// when a test needs a particular verdict.
pub struct MockLlmClient {
    pairwise: Mutex<Option<PairwiseClassification>>,
    evidence: Mutex<Option<EvidenceLinkType>>,
    embedding_dim: usize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self { pairwise: Mutex::new(None), evidence: Mutex::new(None), embedding_dim: 8 }
    }

    pub fn with_pairwise(self, classification: PairwiseClassification) -> Self {
        *self.pairwise.lock().unwrap() = Some(classification);
        self
    }

    pub fn with_evidence(self, link_type: EvidenceLinkType) -> Self {
        *self.evidence.lock().unwrap() = Some(link_type);
        self
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

/// A cheap, content-derived embedding so near-identical texts end up
/// near-identical vectors without calling a real model — stable hash of
/// each word folded into a fixed-width vector.
fn fake_embedding(text: &str, dim: usize) -> Vec<f32> {
    let mut v = vec![0f32; dim];
    for (i, word) in text.split_whitespace().enumerate() {
        let mut hash: u64 = 1469598103934665603;
        for byte in word.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        v[(hash as usize + i) % dim] += 1.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn classify_claim_pair(&self, claim_1: &str, claim_2: &str) -> Result<PairwiseClassification> {
        if let Some(fixed) = self.pairwise.lock().unwrap().clone() {
            return Ok(fixed);
        }
        if claim_1.trim() == claim_2.trim() {
            return Ok(PairwiseClassification {
                link_type: PairwiseLinkType::Duplicate,
                reasoning: "identical text".into(),
            });
        }
        Ok(PairwiseClassification { link_type: PairwiseLinkType::None, reasoning: "no relationship found".into() })
    }

    async fn select_relevant_methods(&self, _claim_text: &str, candidates: &[MethodCandidate]) -> Result<Vec<Uuid>> {
        Ok(candidates.iter().map(|c| c.id).collect())
    }

    async fn classify_evidence(
        &self,
        _claim_text: &str,
        candidates: &[ObservationCandidate],
    ) -> Result<Vec<EvidenceClassification>> {
        let link_type = self.evidence.lock().unwrap().unwrap_or(EvidenceLinkType::Supports);
        Ok(candidates
            .iter()
            .map(|c| EvidenceClassification { observation_id: c.id, link_type, reasoning: "mock default".into() })
            .collect())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| fake_embedding(t, self.embedding_dim)).collect())
    }

    fn usage(&self) -> LlmUsage {
        LlmUsage::default()
    }
}
