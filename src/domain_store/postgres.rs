use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

use super::{DomainStore, NewExtract, NewPaper};
use crate::domain::{Extract, ExtractLink, ExtractType, Library, LinkCategory, LinkContent, NewExtractLink, Paper};
use crate::error::Result;

pub struct PostgresDomainStore {
    pool: PgPool,
}

impl PostgresDomainStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_paper(row: PgRow) -> Result<Paper> {
    Ok(Paper {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        filename: row.try_get("filename")?,
        storage_path: row.try_get("storage_path")?,
        parsed_path: row.try_get("parsed_path")?,
        sha256: row.try_get("sha256")?,
        metadata: row.try_get("metadata")?,
    })
}

fn row_to_extract(row: PgRow) -> Result<Extract> {
    let extract_type: String = row.try_get("type")?;
    let extract_type = match extract_type.as_str() {
        "claim" => ExtractType::Claim,
        "method" => ExtractType::Method,
        "observation" => ExtractType::Observation,
        other => {
            return Err(crate::error::ScriptoriumError::Validation(format!(
                "unknown extract type: {other}"
            )))
        }
    };
    Ok(Extract {
        id: row.try_get("id")?,
        paper_id: row.try_get("paper_id")?,
        job_id: row.try_get("job_id")?,
        extract_type,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_link(row: PgRow) -> Result<ExtractLink> {
    let category: String = row.try_get("link_category")?;
    let link_category = match category.as_str() {
        "claim_to_claim" => LinkCategory::ClaimToClaim,
        "claim_to_observation" => LinkCategory::ClaimToObservation,
        other => {
            return Err(crate::error::ScriptoriumError::Validation(format!(
                "unknown link category: {other}"
            )))
        }
    };
    Ok(ExtractLink {
        id: row.try_get("id")?,
        from_id: row.try_get("from_id")?,
        to_id: row.try_get("to_id")?,
        content: LinkContent {
            link_category,
            link_type: row.try_get("link_type")?,
            reasoning: row.try_get("reasoning")?,
        },
        job_id: row.try_get("job_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl DomainStore for PostgresDomainStore {
    async fn create_or_get_paper(&self, paper: NewPaper) -> Result<Paper> {
        let row = sqlx::query(
            r#"
            INSERT INTO papers (title, filename, storage_path, sha256, metadata)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (sha256) DO UPDATE SET title = papers.title
            RETURNING *
            "#,
        )
        .bind(paper.title)
        .bind(paper.filename)
        .bind(paper.storage_path)
        .bind(paper.sha256)
        .bind(paper.metadata)
        .fetch_one(&self.pool)
        .await?;
        row_to_paper(row)
    }

    async fn get_paper(&self, paper_id: Uuid) -> Result<Option<Paper>> {
        let row = sqlx::query("SELECT * FROM papers WHERE id = $1")
            .bind(paper_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_paper).transpose()
    }

    async fn set_parsed(&self, paper_id: Uuid, parsed_path: &str, metadata: serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE papers SET parsed_path = $1, metadata = $2 WHERE id = $3")
            .bind(parsed_path)
            .bind(metadata)
            .bind(paper_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_library(&self, title: &str, owner_id: Option<Uuid>) -> Result<Library> {
        let row = sqlx::query("INSERT INTO libraries (title, owner_id) VALUES ($1, $2) RETURNING *")
            .bind(title)
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Library { id: row.try_get("id")?, title: row.try_get("title")?, owner_id: row.try_get("owner_id")? })
    }

    async fn get_library(&self, library_id: Uuid) -> Result<Option<Library>> {
        let row = sqlx::query("SELECT * FROM libraries WHERE id = $1")
            .bind(library_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| -> Result<Library> {
            Ok(Library { id: r.try_get("id")?, title: r.try_get("title")?, owner_id: r.try_get("owner_id")? })
        })
        .transpose()
    }

    async fn add_paper_to_library(&self, library_id: Uuid, paper_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO library_papers (library_id, paper_id, added_at)
            VALUES ($1, $2, now())
            ON CONFLICT (library_id, paper_id) DO NOTHING
            "#,
        )
        .bind(library_id)
        .bind(paper_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn library_paper_ids(&self, library_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT paper_id FROM library_papers WHERE library_id = $1")
            .bind(library_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|r| Ok(r.try_get("paper_id")?)).collect()
    }

    async fn libraries_for_paper(&self, paper_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT library_id FROM library_papers WHERE paper_id = $1")
            .bind(paper_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|r| Ok(r.try_get("library_id")?)).collect()
    }

    async fn added_at(&self, library_id: Uuid, paper_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT added_at FROM library_papers WHERE library_id = $1 AND paper_id = $2")
            .bind(library_id)
            .bind(paper_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Ok(r.try_get("added_at")?)).transpose()
    }

    async fn create_extracts(&self, extracts: Vec<NewExtract>) -> Result<Vec<Extract>> {
        let mut out = Vec::with_capacity(extracts.len());
        let mut tx = self.pool.begin().await?;
        for e in extracts {
            let row = sqlx::query(
                r#"
                INSERT INTO extracts (paper_id, job_id, type, content)
                VALUES ($1, $2, $3, $4)
                RETURNING *
                "#,
            )
            .bind(e.paper_id)
            .bind(e.job_id)
            .bind(e.extract_type.to_string())
            .bind(e.content)
            .fetch_one(&mut *tx)
            .await?;
            out.push(row_to_extract(row)?);
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn has_extracts_from_job(&self, paper_id: Uuid, job_id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM extracts WHERE paper_id = $1 AND job_id = $2) AS exists")
            .bind(paper_id)
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("exists")?)
    }

    async fn latest_extracts_for_paper(&self, paper_id: Uuid, extract_type: ExtractType) -> Result<Vec<Extract>> {
        let rows = sqlx::query(
            r#"
            WITH latest_job AS (
                SELECT job_id FROM extracts
                WHERE paper_id = $1 AND type = $2
                ORDER BY created_at DESC, job_id DESC
                LIMIT 1
            )
            SELECT e.* FROM extracts e, latest_job
            WHERE e.paper_id = $1 AND e.type = $2
              AND (e.job_id = latest_job.job_id OR (e.job_id IS NULL AND latest_job.job_id IS NULL))
            "#,
        )
        .bind(paper_id)
        .bind(extract_type.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_extract).collect()
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
        if extract_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query("SELECT extract_id, embedding FROM extract_vectors WHERE extract_id = ANY($1)")
            .bind(extract_ids)
            .fetch_all(&self.pool)
            .await?;
        let mut out = HashMap::new();
        for row in rows {
            let id: Uuid = row.try_get("extract_id")?;
            let embedding: Vec<f32> = row.try_get("embedding")?;
            out.insert(id, embedding);
        }
        Ok(out)
    }

    async fn create_vectors(&self, vectors: Vec<(Uuid, Vec<f32>)>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (extract_id, embedding) in vectors {
            sqlx::query(
                r#"
                INSERT INTO extract_vectors (extract_id, embedding)
                VALUES ($1, $2)
                ON CONFLICT (extract_id) DO UPDATE SET embedding = EXCLUDED.embedding
                "#,
            )
            .bind(extract_id)
            .bind(embedding)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
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
        let mut created = 0;
        let mut tx = self.pool.begin().await?;
        for link in links {
            let link = link.normalized();
            let result = sqlx::query(
                r#"
                INSERT INTO extract_links (from_id, to_id, link_category, link_type, reasoning, job_id)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (from_id, to_id) DO NOTHING
                "#,
            )
            .bind(link.from_id)
            .bind(link.to_id)
            .bind(match link.content.link_category {
                LinkCategory::ClaimToClaim => "claim_to_claim",
                LinkCategory::ClaimToObservation => "claim_to_observation",
            })
            .bind(&link.content.link_type)
            .bind(&link.content.reasoning)
            .bind(link.job_id)
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn links_for_library(&self, library_id: Uuid) -> Result<Vec<ExtractLink>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT l.* FROM extract_links l
            JOIN extracts e ON e.id = l.from_id OR e.id = l.to_id
            JOIN library_papers lp ON lp.paper_id = e.paper_id
            WHERE lp.library_id = $1
            "#,
        )
        .bind(library_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_link).collect()
    }
}
