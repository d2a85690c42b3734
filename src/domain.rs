//! The data model of §3: papers, libraries, extracts, and the links between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paper {
    pub id: Uuid,
    pub title: String,
    pub filename: String,
    pub storage_path: String,
    pub parsed_path: Option<String>,
    pub sha256: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Library {
    pub id: Uuid,
    pub title: String,
    pub owner_id: Option<Uuid>,
}

/// A row of `library_papers(library_id, paper_id, added_at)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryPaper {
    pub library_id: Uuid,
    pub paper_id: Uuid,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExtractType {
    Claim,
    Method,
    Observation,
}

impl std::fmt::Display for ExtractType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractType::Claim => write!(f, "claim"),
            ExtractType::Method => write!(f, "method"),
            ExtractType::Observation => write!(f, "observation"),
        }
    }
}

/// An immutable knowledge element pulled from a paper by some extraction job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Extract {
    pub id: Uuid,
    pub paper_id: Uuid,
    pub job_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub extract_type: ExtractType,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

impl Extract {
    /// The field the extraction prompts populate for a claim's display text;
    /// other extract types key their own fields (out of scope for this spec).
    pub fn claim_text(&self) -> Option<&str> {
        self.content.get("rephrased_claim")?.as_str()
    }

    pub fn method_summary(&self) -> Option<&str> {
        self.content.get("method_summary")?.as_str()
    }

    /// The field the extraction prompts populate for an observation's
    /// display text.
    pub fn observation_text(&self) -> Option<&str> {
        self.content.get("observation_text")?.as_str()
    }

    pub fn method_reference(&self) -> Option<Uuid> {
        self.content
            .get("method_reference")?
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractVector {
    pub extract_id: Uuid,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LinkCategory {
    ClaimToClaim,
    ClaimToObservation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClaimToClaimType {
    Duplicate,
    Variant,
    Contradiction,
    /// Directional: the "from" extract is the premise of the "to" extract.
    Premise,
}

impl ClaimToClaimType {
    /// `duplicate`/`variant`/`contradiction` read the same from either
    /// direction; `premise` does not.
    pub fn is_symmetric(self) -> bool {
        !matches!(self, ClaimToClaimType::Premise)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClaimToObservationType {
    Supports,
    Contradicts,
    Contextualizes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkContent {
    pub link_category: LinkCategory,
    pub link_type: String,
    pub reasoning: Option<String>,
}

/// A typed, potentially directional relation between two extracts (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractLink {
    pub id: Uuid,
    pub from_id: Uuid,
    pub to_id: Uuid,
    pub content: LinkContent,
    pub job_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A link awaiting persistence, before the store assigns it an ID/timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewExtractLink {
    pub from_id: Uuid,
    pub to_id: Uuid,
    pub content: LinkContent,
    pub job_id: Uuid,
}

impl NewExtractLink {
    /// Normalizes endpoint order for symmetric claim_to_claim link types
    /// (sort by UUID) so the store's `(from_id, to_id)` uniqueness
    /// deduplicates across re-runs regardless of which claim was `q`.
    ///
    /// Directional links (`premise`, all `claim_to_observation`) are left
    /// untouched: direction is the payload, not an artifact of discovery
    /// order.
    pub fn normalized(mut self) -> Self {
        let symmetric = self.content.link_category == LinkCategory::ClaimToClaim
            && self.content.link_type != "premise";
        if symmetric && self.to_id < self.from_id {
            std::mem::swap(&mut self.from_id, &mut self.to_id);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(from: Uuid, to: Uuid, link_type: &str) -> NewExtractLink {
        NewExtractLink {
            from_id: from,
            to_id: to,
            content: LinkContent {
                link_category: LinkCategory::ClaimToClaim,
                link_type: link_type.to_string(),
                reasoning: None,
            },
            job_id: Uuid::nil(),
        }
    }

    #[test]
    fn symmetric_links_normalize_to_sorted_endpoints() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();

        let forward = link(b, a, "duplicate").normalized();
        let backward = link(a, b, "duplicate").normalized();

        assert_eq!(forward.from_id, backward.from_id);
        assert_eq!(forward.to_id, backward.to_id);
        assert_eq!(forward.from_id, a);
        assert_eq!(forward.to_id, b);
    }

    #[test]
    fn directional_premise_link_is_not_reordered() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();

        let premise = link(b, a, "premise").normalized();
        assert_eq!(premise.from_id, b);
        assert_eq!(premise.to_id, a);
    }
}
