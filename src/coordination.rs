//! The coordination layer: the library-scoped "enqueue `LINK_LIBRARY` now?"
//! predicate and its supporting cutoff/unlinked-extract computations (§4.4).

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::CoordinationConfig;
use crate::domain_store::DomainStore;
use crate::error::Result;
use crate::job::{JobKind, JobPayload, JobStore, StatusSet};

/// The two UI-facing counters §4.4 calls out, built from Job Store queries
/// rather than stored anywhere: `papers_processing` counts distinct papers
/// in the library with an active `PARSE_PAPER`/`EXTRACT_ELEMENTS`;
/// `library_linking` is whether a `LINK_LIBRARY` for this library is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryProcessingStatus {
    pub papers_processing: i64,
    pub library_linking: bool,
}

pub async fn processing_status(
    job_store: &dyn JobStore,
    domain_store: &dyn DomainStore,
    library_id: Uuid,
) -> Result<LibraryProcessingStatus> {
    let paper_ids = domain_store.library_paper_ids(library_id).await?;

    let mut papers_processing = 0i64;
    for paper_id in paper_ids {
        let paper_id_str = paper_id.to_string();
        let processing_parse = job_store
            .has_active_of_kind_for_subject(JobKind::ParsePaper, "paper_id", &paper_id_str, None)
            .await?;
        let processing_extract = job_store
            .has_active_of_kind_for_subject(JobKind::ExtractElements, "paper_id", &paper_id_str, None)
            .await?;
        if processing_parse || processing_extract {
            papers_processing += 1;
        }
    }

    let library_linking = job_store
        .has_active_of_kind_for_subject(JobKind::LinkLibrary, "library_id", &library_id.to_string(), None)
        .await?;

    Ok(LibraryProcessingStatus { papers_processing, library_linking })
}

/// The cutoff separating "already linked" from "new" for a library: the most
/// recent `claimed_at` among its completed-or-running `LINK_LIBRARY` jobs, or
/// `None` if the library has never been linked.
pub async fn compute_cutoff(job_store: &dyn JobStore, library_id: Uuid) -> Result<Option<DateTime<Utc>>> {
    job_store
        .last_claimed_at_of_kind_for_subject(
            JobKind::LinkLibrary,
            "library_id",
            &library_id.to_string(),
            StatusSet::COMPLETED_OR_RUNNING,
        )
        .await
}

/// §4.4's three-test "enqueue now?" predicate, evaluated in order so the
/// cheaper tests short-circuit the more expensive "something to do" query.
/// `exclude_job_id` lets the caller's own in-flight job not count against
/// itself for test 1.
pub async fn should_enqueue_link_library(
    job_store: &dyn JobStore,
    domain_store: &dyn DomainStore,
    config: &CoordinationConfig,
    library_id: Uuid,
    exclude_job_id: Option<Uuid>,
) -> Result<bool> {
    let paper_ids = domain_store.library_paper_ids(library_id).await?;

    for paper_id in &paper_ids {
        let paper_id_str = paper_id.to_string();
        let still_processing = job_store
            .has_active_of_kind_for_subject(JobKind::ParsePaper, "paper_id", &paper_id_str, exclude_job_id)
            .await?
            || job_store
                .has_active_of_kind_for_subject(JobKind::ExtractElements, "paper_id", &paper_id_str, exclude_job_id)
                .await?;
        if still_processing {
            return Ok(false);
        }
    }

    let recent_trigger = job_store
        .recent_pending_of_kind_for_subject(
            JobKind::LinkLibrary,
            "library_id",
            &library_id.to_string(),
            Duration::from_std(config.debounce_window).unwrap(),
        )
        .await?;
    if recent_trigger {
        return Ok(false);
    }

    let cutoff = compute_cutoff(job_store, library_id).await?;
    let has_work = match cutoff {
        None => domain_store.has_claim_and_observation(library_id).await?,
        Some(cutoff) => !domain_store.unlinked_claims(library_id, Some(cutoff)).await?.is_empty(),
    };

    Ok(has_work)
}

/// Runs the predicate and, if it holds, enqueues `LINK_LIBRARY{library_id,
/// cutoff}` with the cutoff computed fresh at enqueue time. Returns the new
/// job's ID, if one was enqueued.
pub async fn maybe_enqueue_link_library(
    job_store: &dyn JobStore,
    domain_store: &dyn DomainStore,
    config: &CoordinationConfig,
    library_id: Uuid,
    exclude_job_id: Option<Uuid>,
    max_attempts: i32,
) -> Result<Option<Uuid>> {
    if !should_enqueue_link_library(job_store, domain_store, config, library_id, exclude_job_id).await? {
        return Ok(None);
    }

    let cutoff = compute_cutoff(job_store, library_id).await?;
    let job = job_store.enqueue(JobPayload::LinkLibrary { library_id, cutoff }, max_attempts).await?;
    Ok(Some(job.id))
}

/// Convenience re-export of the debounce window as a `chrono::Duration` for
/// callers that only need the window, not the full predicate.
pub fn debounce_window(config: &CoordinationConfig) -> Duration {
    Duration::from_std(config.debounce_window).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_store::mock::MockDomainStore;
    use crate::domain_store::NewPaper;
    use crate::job::mock::MockJobStore;
    use serde_json::json;

    async fn setup_library_with_paper() -> (MockJobStore, MockDomainStore, Uuid, Uuid) {
        let job_store = MockJobStore::default();
        let domain_store = MockDomainStore::new();
        let library = domain_store.create_library("Lib", None).await.unwrap();
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
        domain_store.add_paper_to_library(library.id, paper.id).await.unwrap();
        (job_store, domain_store, library.id, paper.id)
    }

    #[tokio::test]
    async fn blocks_while_paper_still_extracting() {
        let (job_store, domain_store, library_id, paper_id) = setup_library_with_paper().await;
        job_store.enqueue(JobPayload::ExtractElements { paper_id }, 3).await.unwrap();

        let config = CoordinationConfig::default();
        let should = should_enqueue_link_library(&job_store, &domain_store, &config, library_id, None)
            .await
            .unwrap();
        assert!(!should);
    }

    #[tokio::test]
    async fn fresh_library_needs_claim_and_observation() {
        let (job_store, domain_store, library_id, _paper_id) = setup_library_with_paper().await;
        let config = CoordinationConfig::default();

        let should = should_enqueue_link_library(&job_store, &domain_store, &config, library_id, None)
            .await
            .unwrap();
        assert!(!should, "no extracts yet means nothing to link");
    }

    #[tokio::test]
    async fn debounces_within_window() {
        let (job_store, domain_store, library_id, _paper_id) = setup_library_with_paper().await;
        job_store.enqueue(JobPayload::LinkLibrary { library_id, cutoff: None }, 3).await.unwrap();

        let config = CoordinationConfig::default();
        let should = should_enqueue_link_library(&job_store, &domain_store, &config, library_id, None)
            .await
            .unwrap();
        assert!(!should, "a recent pending LINK_LIBRARY should debounce a second trigger");
    }
}
