//! Postgres-backed `JobStore`.
//!
//! The atomic claim is one `UPDATE ... WHERE id = (SELECT ... FOR UPDATE
//! SKIP LOCKED) RETURNING *` statement — a select-and-update in a single
//! round trip, using Postgres's row-locking idiom.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{CompleteOutcome, Job, JobKind, JobPayload, JobStatus, JobStore, Outcome, StatusSet};
use crate::backoff;
use crate::config::JobStoreConfig;
use crate::error::{Result, ScriptoriumError};

pub struct PostgresJobStore {
    pool: PgPool,
    config: JobStoreConfig,
}

impl PostgresJobStore {
    pub async fn connect(database_url: &str, config: JobStoreConfig) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool, config })
    }

    pub fn from_pool(pool: PgPool, config: JobStoreConfig) -> Self {
        Self { pool, config }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| {
            ScriptoriumError::Config(format!("migration failed: {e}"))
        })
    }
}

fn row_to_job(row: PgRow) -> Result<Job> {
    let status: String = row.try_get("status")?;
    let payload: Value = row.try_get("payload")?;
    let payload: JobPayload = serde_json::from_value(payload)?;

    Ok(Job {
        id: row.try_get("id")?,
        status: status.parse()?,
        payload,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: row.try_get("claimed_at")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        retry_after: row.try_get("retry_after")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        progress: row.try_get("progress")?,
        created_at: row.try_get("created_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn enqueue(&self, payload: JobPayload, max_attempts: i32) -> Result<Job> {
        let kind = payload.kind().to_string();
        let payload_json = serde_json::to_value(&payload)?;

        let row = sqlx::query(
            r#"
            INSERT INTO jobs (kind, status, payload, attempts, max_attempts, progress)
            VALUES ($1, 'pending', $2, 0, $3, '{}'::jsonb)
            RETURNING *
            "#,
        )
        .bind(kind)
        .bind(payload_json)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        row_to_job(row)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running',
                claimed_by = $1,
                claimed_at = now(),
                attempts = attempts + 1
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                  AND (retry_after IS NULL OR retry_after <= now())
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_job).transpose()
    }

    async fn complete(&self, job_id: Uuid, worker_id: &str, outcome: Outcome) -> Result<CompleteOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT * FROM jobs WHERE id = $1 AND status = 'running' AND claimed_by = $2 FOR UPDATE",
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(CompleteOutcome::Rejected);
        };
        let job = row_to_job(row)?;

        match outcome {
            Outcome::Completed { result } => {
                sqlx::query(
                    "UPDATE jobs SET status = 'completed', result = $1, finished_at = now() WHERE id = $2",
                )
                .bind(result)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
            Outcome::Failed { error } => {
                if job.attempts < job.max_attempts {
                    let delay = backoff::compute(job.attempts, &self.config);
                    sqlx::query(
                        r#"
                        UPDATE jobs
                        SET status = 'pending',
                            error = $1,
                            claimed_by = NULL,
                            claimed_at = NULL,
                            retry_after = now() + $2::interval
                        WHERE id = $3
                        "#,
                    )
                    .bind(&error)
                    .bind(format!("{} seconds", delay.as_secs_f64()))
                    .bind(job_id)
                    .execute(&mut *tx)
                    .await?;
                } else {
                    sqlx::query(
                        "UPDATE jobs SET status = 'failed', error = $1, finished_at = now() WHERE id = $2",
                    )
                    .bind(&error)
                    .bind(job_id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(CompleteOutcome::Ok)
    }

    async fn get_progress(&self, job_id: Uuid) -> Result<Value> {
        let row = sqlx::query("SELECT progress FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ScriptoriumError::NotFound { what: "job", id: job_id.to_string() })?;
        Ok(row.try_get("progress")?)
    }

    async fn put_progress(&self, job_id: Uuid, worker_id: &str, progress: Value) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET progress = $1 WHERE id = $2 AND status = 'running' AND claimed_by = $3",
        )
        .bind(progress)
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_job).transpose()
    }

    async fn has_active_of_kind_for_subject(
        &self,
        kind: JobKind,
        key: &str,
        value: &str,
        exclude_job_id: Option<Uuid>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM jobs
                WHERE kind = $1
                  AND status IN ('pending', 'running')
                  AND payload->>$2 = $3
                  AND ($4::uuid IS NULL OR id != $4)
            ) AS exists
            "#,
        )
        .bind(kind.to_string())
        .bind(key)
        .bind(value)
        .bind(exclude_job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("exists")?)
    }

    async fn recent_pending_of_kind_for_subject(
        &self,
        kind: JobKind,
        key: &str,
        value: &str,
        window: chrono::Duration,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM jobs
                WHERE kind = $1
                  AND status = 'pending'
                  AND payload->>$2 = $3
                  AND created_at >= now() - $4::interval
            ) AS exists
            "#,
        )
        .bind(kind.to_string())
        .bind(key)
        .bind(value)
        .bind(format!("{} seconds", window.num_seconds()))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("exists")?)
    }

    async fn last_claimed_at_of_kind_for_subject(
        &self,
        kind: JobKind,
        key: &str,
        value: &str,
        statuses: StatusSet,
    ) -> Result<Option<DateTime<Utc>>> {
        let status_strs: Vec<String> = statuses.0.iter().map(|s| s.to_string()).collect();
        let row = sqlx::query(
            r#"
            SELECT MAX(claimed_at) AS last_claimed_at FROM jobs
            WHERE kind = $1
              AND status = ANY($2)
              AND payload->>$3 = $4
            "#,
        )
        .bind(kind.to_string())
        .bind(&status_strs)
        .bind(key)
        .bind(value)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("last_claimed_at")?)
    }

    async fn reclaim_stale(&self, threshold: chrono::Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL
            WHERE status = 'running'
              AND claimed_at < now() - $1::interval
            "#,
        )
        .bind(format!("{} seconds", threshold.num_seconds()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(all(test, feature = "postgres-integration-tests"))]
mod tests {
    use super::*;
    use crate::job::JobPayload;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required for these tests");
        PgPool::connect(&url).await.unwrap()
    }

    #[tokio::test]
    async fn claim_is_atomic_under_concurrency() {
        let pool = test_pool().await;
        let store = PostgresJobStore::from_pool(pool, JobStoreConfig::default());
        store.migrate().await.unwrap();

        for _ in 0..5 {
            store
                .enqueue(
                    JobPayload::ParsePaper { paper_id: Uuid::new_v4() },
                    3,
                )
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = PgPool::clone(&store.pool);
            handles.push(tokio::spawn(async move {
                let store = PostgresJobStore::from_pool(store, JobStoreConfig::default());
                store.claim(&format!("worker-{i}")).await.unwrap()
            }));
        }

        let mut claimed_ids = std::collections::HashSet::new();
        for h in handles {
            if let Some(job) = h.await.unwrap() {
                assert!(claimed_ids.insert(job.id), "job claimed twice");
            }
        }
        assert_eq!(claimed_ids.len(), 5);
    }
}
