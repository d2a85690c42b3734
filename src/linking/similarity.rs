//! Cosine similarity and candidate-pair generation for claim embeddings
//! (§4.5 Phase B step 1), offloaded to the compute executor so a library
//! with thousands of claims doesn't stall the async reactor (§5).

use uuid::Uuid;

use crate::error::Result;
use crate::executor::offload_compute;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[derive(Debug, Clone, Copy)]
pub struct CandidatePair {
    pub a: Uuid,
    pub b: Uuid,
    pub similarity: f32,
}

/// Builds candidate pairs above `threshold` from `new_claims` against
/// `all_claims`, deduplicated on the sorted `(a, b)` key so a claim present
/// in both sets doesn't produce a pair with itself or a mirrored duplicate.
///
/// Offloaded via [`offload_compute`]: O(n*m) comparisons over the library's
/// full embedding set is the single CPU-bound step in an otherwise I/O-bound
/// phase.
pub async fn build_candidate_pairs(
    new_claims: Vec<(Uuid, Vec<f32>)>,
    all_claims: Vec<(Uuid, Vec<f32>)>,
    threshold: f32,
) -> Result<Vec<CandidatePair>> {
    offload_compute(move || {
        let mut seen = std::collections::HashSet::new();
        let mut pairs = Vec::new();

        for (id_a, emb_a) in &new_claims {
            for (id_b, emb_b) in &all_claims {
                if id_a == id_b {
                    continue;
                }
                let similarity = cosine_similarity(emb_a, emb_b);
                if similarity < threshold {
                    continue;
                }
                let key = if id_a < id_b { (*id_a, *id_b) } else { (*id_b, *id_a) };
                if !seen.insert(key) {
                    continue;
                }
                pairs.push(CandidatePair { a: key.0, b: key.1, similarity });
            }
        }

        Ok(pairs)
    })
    .await
    .map_err(|e| crate::error::ScriptoriumError::Llm(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[tokio::test]
    async fn candidate_pairs_dedupe_and_respect_threshold() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let new = vec![(a, vec![1.0, 0.0])];
        let all = vec![(a, vec![1.0, 0.0]), (b, vec![1.0, 0.0])];

        let pairs = build_candidate_pairs(new, all, 0.5).await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].similarity, 1.0);
    }
}
