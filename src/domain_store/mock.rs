//! In-memory `DomainStore` for exercising linking-engine logic and the
//! handler tests without a live database, grounded on the same
//! `Mutex<HashMap<..>>` double used for [`crate::job::mock::MockJobStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{DomainStore, NewExtract, NewPaper};
use crate::domain::{Extract, ExtractLink, ExtractType, Library, LinkContent, NewExtractLink, Paper};
use crate::error::Result;

#[derive(Default)]
struct State {
    papers: HashMap<Uuid, Paper>,
    papers_by_sha256: HashMap<String, Uuid>,
    libraries: HashMap<Uuid, Library>,
    memberships: HashMap<(Uuid, Uuid), DateTime<Utc>>,
    extracts: HashMap<Uuid, Extract>,
    vectors: HashMap<Uuid, Vec<f32>>,
    links: HashMap<(Uuid, Uuid), ExtractLink>,
}

#[derive(Default)]
pub struct MockDomainStore {
    state: Mutex<State>,
}

impl MockDomainStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DomainStore for MockDomainStore {
    async fn create_or_get_paper(&self, paper: NewPaper) -> Result<Paper> {
        let mut state = self.state.lock().unwrap();
        if let Some(&id) = state.papers_by_sha256.get(&paper.sha256) {
            return Ok(state.papers.get(&id).unwrap().clone());
        }
        let id = Uuid::new_v4();
        let record = Paper {
            id,
            title: paper.title,
            filename: paper.filename,
            storage_path: paper.storage_path,
            parsed_path: None,
            sha256: paper.sha256.clone(),
            metadata: paper.metadata,
        };
        state.papers.insert(id, record.clone());
        state.papers_by_sha256.insert(paper.sha256, id);
        Ok(record)
    }

    async fn get_paper(&self, paper_id: Uuid) -> Result<Option<Paper>> {
        Ok(self.state.lock().unwrap().papers.get(&paper_id).cloned())
    }

    async fn set_parsed(&self, paper_id: Uuid, parsed_path: &str, metadata: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(paper) = state.papers.get_mut(&paper_id) {
            paper.parsed_path = Some(parsed_path.to_string());
            paper.metadata = metadata;
        }
        Ok(())
    }

    async fn create_library(&self, title: &str, owner_id: Option<Uuid>) -> Result<Library> {
        let mut state = self.state.lock().unwrap();
        let id = Uuid::new_v4();
        let library = Library { id, title: title.to_string(), owner_id };
        state.libraries.insert(id, library.clone());
        Ok(library)
    }

    async fn get_library(&self, library_id: Uuid) -> Result<Option<Library>> {
        Ok(self.state.lock().unwrap().libraries.get(&library_id).cloned())
    }

    async fn add_paper_to_library(&self, library_id: Uuid, paper_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.memberships.entry((library_id, paper_id)).or_insert_with(Utc::now);
        Ok(())
    }

    async fn library_paper_ids(&self, library_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state.memberships.keys().filter(|(l, _)| *l == library_id).map(|(_, p)| *p).collect())
    }

    async fn libraries_for_paper(&self, paper_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state.memberships.keys().filter(|(_, p)| *p == paper_id).map(|(l, _)| *l).collect())
    }

    async fn added_at(&self, library_id: Uuid, paper_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().unwrap().memberships.get(&(library_id, paper_id)).copied())
    }

    async fn create_extracts(&self, extracts: Vec<NewExtract>) -> Result<Vec<Extract>> {
        let mut state = self.state.lock().unwrap();
        let mut out = Vec::with_capacity(extracts.len());
        for e in extracts {
            let id = Uuid::new_v4();
            let record = Extract {
                id,
                paper_id: e.paper_id,
                job_id: e.job_id,
                extract_type: e.extract_type,
                content: e.content,
                created_at: Utc::now(),
            };
            state.extracts.insert(id, record.clone());
            out.push(record);
        }
        Ok(out)
    }

    async fn has_extracts_from_job(&self, paper_id: Uuid, job_id: Uuid) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.extracts.values().any(|e| e.paper_id == paper_id && e.job_id == Some(job_id)))
    }

    async fn latest_extracts_for_paper(&self, paper_id: Uuid, extract_type: ExtractType) -> Result<Vec<Extract>> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<&Extract> = state
            .extracts
            .values()
            .filter(|e| e.paper_id == paper_id && e.extract_type == extract_type)
            .collect();
        if matching.is_empty() {
            return Ok(Vec::new());
        }
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.job_id.cmp(&a.job_id)));
        let latest_job_id = matching[0].job_id;
        Ok(matching.into_iter().filter(|e| e.job_id == latest_job_id).cloned().collect())
    }

    async fn latest_extracts_for_library(&self, library_id: Uuid, extract_type: ExtractType) -> Result<Vec<Extract>> {
        let paper_ids = self.library_paper_ids(library_id).await?;
        let mut out = Vec::new();
        for paper_id in paper_ids {
            out.extend(self.latest_extracts_for_paper(paper_id, extract_type).await?);
        }
        Ok(out)
    }

    async fn vectors_for_extracts(&self, extract_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<f32>>> {
        let state = self.state.lock().unwrap();
        Ok(extract_ids
            .iter()
            .filter_map(|id| state.vectors.get(id).map(|v| (*id, v.clone())))
            .collect())
    }

    async fn create_vectors(&self, vectors: Vec<(Uuid, Vec<f32>)>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for (id, embedding) in vectors {
            state.vectors.insert(id, embedding);
        }
        Ok(())
    }

    async fn unlinked_claims(&self, library_id: Uuid, cutoff: Option<DateTime<Utc>>) -> Result<Vec<Extract>> {
        let all_claims = self.latest_extracts_for_library(library_id, ExtractType::Claim).await?;
        let Some(cutoff) = cutoff else {
            return Ok(all_claims);
        };
        let mut out = Vec::new();
        for claim in all_claims {
            if claim.created_at > cutoff {
                out.push(claim);
                continue;
            }
            if let Some(added_at) = self.added_at(library_id, claim.paper_id).await? {
                if added_at > cutoff {
                    out.push(claim);
                }
            }
        }
        Ok(out)
    }

    async fn has_claim_and_observation(&self, library_id: Uuid) -> Result<bool> {
        let claims = self.latest_extracts_for_library(library_id, ExtractType::Claim).await?;
        if claims.is_empty() {
            return Ok(false);
        }
        let observations = self.latest_extracts_for_library(library_id, ExtractType::Observation).await?;
        Ok(!observations.is_empty())
    }

    async fn create_links(&self, links: Vec<NewExtractLink>) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let mut created = 0;
        for link in links {
            let link = link.normalized();
            let key = (link.from_id, link.to_id);
            if state.links.contains_key(&key) {
                continue;
            }
            state.links.insert(
                key,
                ExtractLink {
                    id: Uuid::new_v4(),
                    from_id: link.from_id,
                    to_id: link.to_id,
                    content: LinkContent {
                        link_category: link.content.link_category,
                        link_type: link.content.link_type,
                        reasoning: link.content.reasoning,
                    },
                    job_id: link.job_id,
                    created_at: Utc::now(),
                },
            );
            created += 1;
        }
        Ok(created)
    }

    async fn links_for_library(&self, library_id: Uuid) -> Result<Vec<ExtractLink>> {
        let paper_ids: std::collections::HashSet<Uuid> =
            self.library_paper_ids(library_id).await?.into_iter().collect();
        let state = self.state.lock().unwrap();
        Ok(state
            .links
            .values()
            .filter(|l| {
                state
                    .extracts
                    .get(&l.from_id)
                    .map(|e| paper_ids.contains(&e.paper_id))
                    .unwrap_or(false)
                    || state
                        .extracts
                        .get(&l.to_id)
                        .map(|e| paper_ids.contains(&e.paper_id))
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}
