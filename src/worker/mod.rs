//! The worker pool (§4.2): a supervisor that spawns OS-level worker
//! processes, and the per-worker claim/dispatch/complete loop each one runs.

pub mod supervisor;

use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::JobStoreConfig;
use crate::domain_store::DomainStore;
use crate::error::Result;
use crate::handlers::{self, HandlerContext};
use crate::job::{JobStore, Outcome};

/// Runs the single-job-at-a-time claim loop until `shutdown` fires. One
/// process per worker; handlers may fan out internally, but never more than
/// one job in flight per worker (§4.2's isolation rationale).
pub async fn run_loop(
    ctx: &HandlerContext<'_>,
    worker_id: &str,
    poll_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    info!(worker_id, "worker loop starting");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match ctx.job_store.claim(worker_id).await {
            Ok(Some(job)) => {
                let span = info_span!("job", job_id = %job.id, kind = %job.kind(), worker_id);
                async {
                    let payload = job.payload.clone();
                    let outcome = match handlers::dispatch(ctx, job.id, worker_id, &payload).await {
                        Ok(result) => Outcome::Completed { result },
                        Err(e) => {
                            error!(error = %e, "handler failed");
                            Outcome::Failed { error: e.to_string() }
                        }
                    };
                    if let Err(e) = ctx.job_store.complete(job.id, worker_id, outcome).await {
                        error!(error = %e, "failed to record job completion");
                    }
                }
                .instrument(span)
                .await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "claim failed, backing off");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    info!(worker_id, "worker loop stopped");
}

/// Periodically returns abandoned *running* jobs to *pending* (§4.1's
/// `ReclaimStale`). Runs alongside the worker pool so the fleet self-heals
/// even with zero active claimers.
pub async fn run_stale_claim_sweeper(
    job_store: &dyn JobStore,
    config: &JobStoreConfig,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        match job_store.reclaim_stale(chrono::Duration::from_std(config.stale_claim_threshold).unwrap()).await {
            Ok(0) => {}
            Ok(n) => info!(reclaimed = n, "reclaimed stale running jobs"),
            Err(e) => warn!(error = %e, "stale-claim sweep failed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}

/// Processing status for a library, exposed the same way §4.4's
/// coordination layer computes it — kept here only as a convenience
/// re-export for callers that import from `worker` rather than
/// `coordination` directly.
pub async fn library_status(
    job_store: &dyn JobStore,
    domain_store: &dyn DomainStore,
    library_id: Uuid,
) -> Result<crate::coordination::LibraryProcessingStatus> {
    crate::coordination::processing_status(job_store, domain_store, library_id).await
}

pub fn default_worker_id() -> String {
    format!("worker-{}", Uuid::new_v4())
}

pub use supervisor::{Supervisor, SupervisorConfig};
