//! `LINK_LIBRARY` handler (§4.3, §4.5). Thin wrapper: all phase logic lives
//! in [`crate::linking`]; this module only adapts its report into the job's
//! result shape (§6).

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use super::HandlerContext;
use crate::error::Result;
use crate::linking;

pub async fn handle(
    ctx: &HandlerContext<'_>,
    job_id: Uuid,
    worker_id: &str,
    library_id: Uuid,
    cutoff: Option<DateTime<Utc>>,
) -> Result<Value> {
    let report = linking::run(
        ctx.job_store,
        ctx.domain_store,
        ctx.llm,
        ctx.linking,
        job_id,
        worker_id,
        library_id,
        cutoff,
    )
    .await?;

    Ok(json!({
        "library_id": report.library_id,
        "claims_processed": report.claims_processed,
        "c2c_links_found": report.c2c_links_found,
        "c2c_links_created": report.c2c_links_created,
        "c2o_links_found": report.c2o_links_found,
        "c2o_links_created": report.c2o_links_created,
        "status": "complete",
    }))
}
