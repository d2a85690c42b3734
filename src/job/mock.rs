//! In-memory `JobStore` for exercising the state-machine invariants of §8
//! without a live database: an `Arc<Mutex<HashMap<..>>>`-backed double of
//! the same trait the Postgres backend implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{CompleteOutcome, Job, JobKind, JobPayload, JobStatus, JobStore, Outcome, StatusSet};
use crate::backoff;
use crate::config::JobStoreConfig;
use crate::error::{Result, ScriptoriumError};

pub struct MockJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    config: JobStoreConfig,
}

impl MockJobStore {
    pub fn new(config: JobStoreConfig) -> Self {
        Self { jobs: Mutex::new(HashMap::new()), config }
    }

    fn payload_subject(payload: &JobPayload, key: &str) -> Option<String> {
        let value = serde_json::to_value(payload).ok()?;
        value.get(key).and_then(|v| v.as_str()).map(String::from)
    }
}

impl Default for MockJobStore {
    fn default() -> Self {
        Self::new(JobStoreConfig::default())
    }
}

#[async_trait]
impl JobStore for MockJobStore {
    async fn enqueue(&self, payload: JobPayload, max_attempts: i32) -> Result<Job> {
        let job = Job {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            payload,
            claimed_by: None,
            claimed_at: None,
            attempts: 0,
            max_attempts,
            retry_after: None,
            result: None,
            error: None,
            progress: Value::Object(Default::default()),
            created_at: Utc::now(),
            finished_at: None,
        };
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();

        let mut candidates: Vec<&mut Job> = jobs
            .values_mut()
            .filter(|j| {
                j.status == JobStatus::Pending && j.retry_after.map(|r| r <= now).unwrap_or(true)
            })
            .collect();
        candidates.sort_by_key(|j| j.created_at);

        let Some(job) = candidates.into_iter().next() else {
            return Ok(None);
        };

        job.status = JobStatus::Running;
        job.claimed_by = Some(worker_id.to_string());
        job.claimed_at = Some(now);
        job.attempts += 1;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, job_id: Uuid, worker_id: &str, outcome: Outcome) -> Result<CompleteOutcome> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(CompleteOutcome::Rejected);
        };
        if job.status != JobStatus::Running || job.claimed_by.as_deref() != Some(worker_id) {
            return Ok(CompleteOutcome::Rejected);
        }

        match outcome {
            Outcome::Completed { result } => {
                job.status = JobStatus::Completed;
                job.result = Some(result);
                job.finished_at = Some(Utc::now());
            }
            Outcome::Failed { error } => {
                job.error = Some(error);
                if job.attempts < job.max_attempts {
                    job.status = JobStatus::Pending;
                    job.claimed_by = None;
                    job.claimed_at = None;
                    let delay = backoff::compute(job.attempts, &self.config);
                    job.retry_after = Some(Utc::now() + chrono::Duration::from_std(delay).unwrap());
                } else {
                    job.status = JobStatus::Failed;
                    job.finished_at = Some(Utc::now());
                }
            }
        }
        Ok(CompleteOutcome::Ok)
    }

    async fn get_progress(&self, job_id: Uuid) -> Result<Value> {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(&job_id)
            .map(|j| j.progress.clone())
            .ok_or_else(|| ScriptoriumError::NotFound { what: "job", id: job_id.to_string() })
    }

    async fn put_progress(&self, job_id: Uuid, worker_id: &str, progress: Value) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else { return Ok(false) };
        if job.status != JobStatus::Running || job.claimed_by.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        job.progress = progress;
        Ok(true)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
    }

    async fn has_active_of_kind_for_subject(
        &self,
        kind: JobKind,
        key: &str,
        value: &str,
        exclude_job_id: Option<Uuid>,
    ) -> Result<bool> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs.values().any(|j| {
            j.kind() == kind
                && matches!(j.status, JobStatus::Pending | JobStatus::Running)
                && Self::payload_subject(&j.payload, key).as_deref() == Some(value)
                && exclude_job_id != Some(j.id)
        }))
    }

    async fn recent_pending_of_kind_for_subject(
        &self,
        kind: JobKind,
        key: &str,
        value: &str,
        window: chrono::Duration,
    ) -> Result<bool> {
        let jobs = self.jobs.lock().unwrap();
        let cutoff = Utc::now() - window;
        Ok(jobs.values().any(|j| {
            j.kind() == kind
                && j.status == JobStatus::Pending
                && Self::payload_subject(&j.payload, key).as_deref() == Some(value)
                && j.created_at >= cutoff
        }))
    }

    async fn last_claimed_at_of_kind_for_subject(
        &self,
        kind: JobKind,
        key: &str,
        value: &str,
        statuses: StatusSet,
    ) -> Result<Option<DateTime<Utc>>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| {
                j.kind() == kind
                    && statuses.0.contains(&j.status)
                    && Self::payload_subject(&j.payload, key).as_deref() == Some(value)
            })
            .filter_map(|j| j.claimed_at)
            .max())
    }

    async fn reclaim_stale(&self, threshold: chrono::Duration) -> Result<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let cutoff = Utc::now() - threshold;
        let mut count = 0;
        for job in jobs.values_mut() {
            if job.status == JobStatus::Running && job.claimed_at.map(|c| c < cutoff).unwrap_or(false) {
                job.status = JobStatus::Pending;
                job.claimed_by = None;
                job.claimed_at = None;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn at_most_one_claim_under_concurrency() {
        let store = Arc::new(MockJobStore::default());
        for _ in 0..5 {
            store.enqueue(JobPayload::ParsePaper { paper_id: Uuid::new_v4() }, 3).await.unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.claim(&format!("worker-{i}")).await.unwrap() }));
        }

        let mut claimed = std::collections::HashSet::new();
        for h in handles {
            if let Some(job) = h.await.unwrap() {
                assert!(claimed.insert(job.id));
            }
        }
        assert_eq!(claimed.len(), 5);
    }

    #[tokio::test]
    async fn complete_requires_ownership() {
        let store = MockJobStore::default();
        let job = store.enqueue(JobPayload::ParsePaper { paper_id: Uuid::new_v4() }, 3).await.unwrap();
        store.claim("worker-a").await.unwrap();

        let rejected = store
            .complete(job.id, "worker-b", Outcome::Completed { result: Value::Null })
            .await
            .unwrap();
        assert_eq!(rejected, CompleteOutcome::Rejected);

        let ok = store
            .complete(job.id, "worker-a", Outcome::Completed { result: Value::Null })
            .await
            .unwrap();
        assert_eq!(ok, CompleteOutcome::Ok);
    }

    #[tokio::test]
    async fn terminal_jobs_never_return_to_running_or_pending() {
        let store = MockJobStore::default();
        let job = store.enqueue(JobPayload::ParsePaper { paper_id: Uuid::new_v4() }, 1).await.unwrap();
        store.claim("worker-a").await.unwrap();
        store
            .complete(job.id, "worker-a", Outcome::Completed { result: Value::Null })
            .await
            .unwrap();

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);

        assert_eq!(
            store
                .complete(job.id, "worker-a", Outcome::Completed { result: Value::Null })
                .await
                .unwrap(),
            CompleteOutcome::Rejected
        );
    }

    #[tokio::test]
    async fn failed_job_under_max_attempts_returns_to_pending_with_retry_after() {
        let store = MockJobStore::default();
        let job = store.enqueue(JobPayload::ParsePaper { paper_id: Uuid::new_v4() }, 3).await.unwrap();
        store.claim("worker-a").await.unwrap();
        store
            .complete(job.id, "worker-a", Outcome::Failed { error: "boom".into() })
            .await
            .unwrap();

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert!(fetched.retry_after.is_some());
        assert_eq!(fetched.attempts, 1);
    }

    #[tokio::test]
    async fn failed_job_at_max_attempts_is_terminal() {
        let store = MockJobStore::default();
        let job = store.enqueue(JobPayload::ParsePaper { paper_id: Uuid::new_v4() }, 1).await.unwrap();
        store.claim("worker-a").await.unwrap();
        store
            .complete(job.id, "worker-a", Outcome::Failed { error: "boom".into() })
            .await
            .unwrap();

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Failed);
        assert!(fetched.finished_at.is_some());
    }

    #[tokio::test]
    async fn reclaim_stale_returns_abandoned_jobs_to_pending() {
        let store = MockJobStore::default();
        let job = store.enqueue(JobPayload::ParsePaper { paper_id: Uuid::new_v4() }, 3).await.unwrap();
        store.claim("worker-a").await.unwrap();

        {
            let mut jobs = store.jobs.lock().unwrap();
            jobs.get_mut(&job.id).unwrap().claimed_at = Some(Utc::now() - chrono::Duration::hours(1));
        }

        let reclaimed = store.reclaim_stale(chrono::Duration::minutes(15)).await.unwrap();
        assert_eq!(reclaimed, 1);

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert!(fetched.claimed_by.is_none());
    }

    #[tokio::test]
    async fn put_progress_requires_ownership() {
        let store = MockJobStore::default();
        let job = store.enqueue(JobPayload::ParsePaper { paper_id: Uuid::new_v4() }, 3).await.unwrap();
        store.claim("worker-a").await.unwrap();

        assert!(!store.put_progress(job.id, "worker-b", serde_json::json!({"x": 1})).await.unwrap());
        assert!(store.put_progress(job.id, "worker-a", serde_json::json!({"x": 1})).await.unwrap());
    }
}
