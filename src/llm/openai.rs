//! HTTP-backed [`LlmClient`] against an OpenAI-compatible chat completions
//! and embeddings API, wrapped in the resilience layer (§5) so a flaky
//! provider degrades the linking engine instead of wedging it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    EvidenceClassification, EvidenceLinkType, LlmClient, LlmUsage, MethodCandidate, ObservationCandidate,
    PairwiseClassification, PairwiseLinkType,
};
use crate::error::{Result, ScriptoriumError};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, ResilienceError};

const CHAT_MODEL: &str = "gpt-4o-mini";
const EMBEDDING_MODEL: &str = "text-embedding-3-small";
const EMBEDDING_DIMENSIONS: usize = 1536;

pub struct OpenAiLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl OpenAiLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, max_concurrent: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| ScriptoriumError::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            limiter: RateLimiter::per_second(max_concurrent.max(1) as u32),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        })
    }

    async fn chat_json(&self, system: &str, user: Value) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": CHAT_MODEL,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user.to_string()},
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.0,
        });

        let http = self.http.clone();
        let url_clone = url.clone();
        let api_key = self.api_key.clone();
        let body_clone = body.clone();

        let response = self
            .breaker
            .execute(|| {
                let http = http.clone();
                let url = url_clone.clone();
                let api_key = api_key.clone();
                let body = body_clone.clone();
                let limiter = self.limiter.clone();
                async move {
                    limiter
                        .execute(|| async move {
                            let resp = http
                                .post(&url)
                                .bearer_auth(&api_key)
                                .json(&body)
                                .send()
                                .await
                                .map_err(|e| ResilienceError::Transient(e.to_string()))?;

                            if resp.status().is_server_error() || resp.status().as_u16() == 429 {
                                return Err(ResilienceError::Transient(format!(
                                    "provider returned {}",
                                    resp.status()
                                )));
                            }
                            if !resp.status().is_success() {
                                let status = resp.status();
                                let text = resp.text().await.unwrap_or_default();
                                return Err(ResilienceError::Permanent(format!("{status}: {text}")));
                            }

                            resp.json::<Value>()
                                .await
                                .map_err(|e| ResilienceError::Permanent(e.to_string()))
                        })
                        .await
                }
            })
            .await
            .map_err(|e| ScriptoriumError::Llm(e.to_string()))?;

        if let Some(usage) = response.get("usage") {
            let prompt = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
            let completion = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
            self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
            self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        }

        let content = response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| ScriptoriumError::Llm("missing choices[0].message.content".into()))?;

        serde_json::from_str(content).map_err(|e| ScriptoriumError::Llm(format!("invalid JSON from model: {e}")))
    }
}

/// Groups observation candidates by the method that produced them, so the
/// prompt can present "method A → [obs, obs]" blocks rather than a flat
/// list (§4.5 step 3). Preserves first-seen method order; candidates with
/// no method reference form their own group.
fn group_by_method(candidates: &[&ObservationCandidate]) -> Vec<Value> {
    let mut groups: Vec<(Option<String>, Vec<Value>)> = Vec::new();
    for c in candidates {
        let entry = json!({"observation_id": c.id.to_string(), "text": c.text});
        match groups.iter_mut().find(|(method, _)| *method == c.method_summary) {
            Some((_, observations)) => observations.push(entry),
            None => groups.push((c.method_summary.clone(), vec![entry])),
        }
    }
    groups
        .into_iter()
        .map(|(method, observations)| json!({"method": method, "observations": observations}))
        .collect()
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponseItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingResponseItem>,
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn classify_claim_pair(&self, claim_1: &str, claim_2: &str) -> Result<PairwiseClassification> {
        const SYSTEM: &str = "Determine if two scientific claims have a meaningful relationship. \
            Respond with JSON: {\"link_type\": one of none|duplicate|variant|contradiction|premise_1_to_2|premise_2_to_1, \"reasoning\": string}. \
            duplicate: same claim in different words. variant: same phenomenon, differing conditions/detail. \
            contradiction: claims cannot both be true. premise_1_to_2/premise_2_to_1: one is a logical premise for the other.";

        let payload = self
            .chat_json(SYSTEM, json!({"claim_1": claim_1, "claim_2": claim_2}))
            .await?;

        let link_type: PairwiseLinkType = serde_json::from_value(
            payload.get("link_type").cloned().unwrap_or(Value::String("none".into())),
        )
        .unwrap_or(PairwiseLinkType::None);
        let reasoning = payload.get("reasoning").and_then(Value::as_str).unwrap_or("").to_string();

        Ok(PairwiseClassification { link_type, reasoning })
    }

    async fn select_relevant_methods(&self, claim_text: &str, candidates: &[MethodCandidate]) -> Result<Vec<Uuid>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        const SYSTEM: &str = "Identify which research methods could produce evidence relevant to a scientific claim. \
            Be inclusive: include a marginally relevant method rather than miss one. \
            Respond with JSON: {\"selected_ids\": [string, ...]} containing only ids taken from the provided list.";

        let methods: Vec<Value> = candidates
            .iter()
            .map(|m| json!({"id": m.id.to_string(), "summary": m.summary}))
            .collect();

        let payload = self
            .chat_json(SYSTEM, json!({"claim": claim_text, "methods": methods}))
            .await?;

        let selected: Vec<String> = payload
            .get("selected_ids")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();

        Ok(selected.into_iter().filter_map(|s| Uuid::parse_str(&s).ok()).collect())
    }

    async fn classify_evidence(
        &self,
        claim_text: &str,
        candidates: &[ObservationCandidate],
    ) -> Result<Vec<EvidenceClassification>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        const SYSTEM: &str = "Identify the evidential relationship between a scientific claim and each \
            candidate observation. Observations are grouped as same-paper or general-literature. \
            Respond with JSON: {\"links\": [{\"observation_id\": string, \
            \"link_type\": one of none|supports|contradicts|contextualizes, \"reasoning\": string}, ...]}. \
            Omit an observation entirely if there is no clear evidential relationship. \
            supports: the observation is a specific instance of the claim's assertion. \
            contradicts: if the claim held as stated, this observation could not occur. \
            contextualizes: relevant scope/conditions, neither supporting nor contradicting.";

        let same_paper: Vec<&ObservationCandidate> = candidates.iter().filter(|c| c.same_paper).collect();
        let general: Vec<&ObservationCandidate> = candidates.iter().filter(|c| !c.same_paper).collect();

        let payload = self
            .chat_json(
                SYSTEM,
                json!({
                    "claim": claim_text,
                    "same_paper_observations": group_by_method(&same_paper),
                    "general_observations": group_by_method(&general),
                }),
            )
            .await?;

        let links = payload.get("links").and_then(Value::as_array).cloned().unwrap_or_default();

        Ok(links
            .into_iter()
            .filter_map(|entry| {
                let observation_id = entry.get("observation_id").and_then(Value::as_str)?;
                let observation_id = Uuid::parse_str(observation_id).ok()?;
                let link_type: EvidenceLinkType = serde_json::from_value(
                    entry.get("link_type").cloned().unwrap_or(Value::String("none".into())),
                )
                .unwrap_or(EvidenceLinkType::None);
                let reasoning = entry.get("reasoning").and_then(Value::as_str).unwrap_or("").to_string();
                Some(EvidenceClassification { observation_id, link_type, reasoning })
            })
            .collect())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest { model: EMBEDDING_MODEL, input: texts, dimensions: EMBEDDING_DIMENSIONS };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ScriptoriumError::Llm(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ScriptoriumError::Llm(format!("embeddings request failed: {status}: {text}")));
        }

        let mut parsed: EmbeddingResponse =
            response.json().await.map_err(|e| ScriptoriumError::Llm(e.to_string()))?;
        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }

    fn usage(&self) -> LlmUsage {
        LlmUsage {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }
}

/// Shared handle type the handlers/linking modules depend on.
pub type SharedLlmClient = Arc<dyn LlmClient>;
