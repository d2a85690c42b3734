//! Crate-wide error type.
//!
//! Handlers and the coordination layer return [`ScriptoriumError`]; the worker
//! loop is the only place an `Err` turns into a `Complete(.., failed, error)`
//! call (handlers never touch job rows directly).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptoriumError {
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("job {job_id} is not owned by worker {worker_id}, or is not running")]
    Ownership { job_id: uuid::Uuid, worker_id: String },

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("llm error: {0}")]
    Llm(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScriptoriumError>;
