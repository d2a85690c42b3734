//! Layered configuration for the worker pool, coordination layer, and linking engine.
//!
//! Every tunable (poll interval, debounce window, similarity threshold, max
//! attempts) has a hard-coded default here and an environment variable
//! override, so behavior is adjustable without a rebuild.

use std::env;
use std::thread;
use std::time::Duration;

use crate::error::{Result, ScriptoriumError};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Number of OS worker processes to supervise.
///
/// Auto-detected when the operator doesn't specify `--workers`: detected
/// cores, minimum 2.
#[derive(Debug, Clone, Copy)]
pub struct WorkerCount(pub usize);

impl WorkerCount {
    pub fn new(n: usize) -> Self {
        Self(n.max(1))
    }

    pub fn auto_detect() -> Self {
        let detected = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self(detected.max(2))
    }
}

impl Default for WorkerCount {
    fn default() -> Self {
        Self::auto_detect()
    }
}

/// Coordination-layer tunables (§4.4).
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// Debounce window for duplicate `LINK_LIBRARY` triggers. Default 3 min.
    pub debounce_window: Duration,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_secs(env_or("LINK_DEBOUNCE_SECONDS", 180)),
        }
    }
}

/// Linking-engine tunables (§4.5).
#[derive(Debug, Clone)]
pub struct LinkingConfig {
    /// Cosine-similarity threshold for claim-to-claim candidate pairs.
    pub c2c_similarity_threshold: f32,
    /// Max simultaneous in-flight LLM calls per phase.
    pub max_concurrent_llm_calls: usize,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            c2c_similarity_threshold: env_or("LINK_SIMILARITY_THRESHOLD", 0.35),
            max_concurrent_llm_calls: env_or("LINK_MAX_CONCURRENT_LLM_CALLS", 150),
        }
    }
}

/// Job-store tunables (§4.1).
#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    pub default_max_attempts: i32,
    /// Base of the exponential backoff curve.
    pub backoff_base: Duration,
    /// Upper bound on `retry_after` delay, regardless of `attempts`.
    pub backoff_cap: Duration,
    /// A *running* job whose `claimed_at` is older than this is reclaimed.
    pub stale_claim_threshold: Duration,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: env_or("JOB_MAX_ATTEMPTS", 3),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(600),
            stale_claim_threshold: Duration::from_secs(env_or("JOB_STALE_CLAIM_SECONDS", 900)),
        }
    }
}

/// Worker-pool tunables (§4.2, §6).
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: WorkerCount,
    pub poll_interval: Duration,
    pub shutdown_grace_period: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: WorkerCount::default(),
            poll_interval: Duration::from_secs_f64(env_or("WORKER_POLL_INTERVAL_SECONDS", 5.0)),
            shutdown_grace_period: Duration::from_secs(10),
        }
    }
}

/// Everything a worker process needs to boot, assembled from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub embedding_api_key: String,
    pub log_format: LogFormat,
    pub worker_pool: WorkerPoolConfig,
    pub job_store: JobStoreConfig,
    pub coordination: CoordinationConfig,
    pub linking: LinkingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ScriptoriumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ScriptoriumError::Config(format!(
                "invalid log format '{other}', expected 'pretty' or 'json'"
            ))),
        }
    }
}

impl Config {
    /// Load configuration from the environment, per §6's "Environment" table.
    ///
    /// `DATABASE_URL` and `LLM_API_KEY` are mandatory; everything else has a
    /// default. `EMBEDDING_API_KEY` falls back to `LLM_API_KEY` if unset.
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ScriptoriumError::Config("DATABASE_URL is required".into()))?;
        let llm_api_key = env::var("LLM_API_KEY")
            .map_err(|_| ScriptoriumError::Config("LLM_API_KEY is required".into()))?;
        let embedding_api_key = env::var("EMBEDDING_API_KEY").unwrap_or_else(|_| llm_api_key.clone());
        let llm_base_url =
            env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let log_format: LogFormat = env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "pretty".to_string())
            .parse()?;

        Ok(Self {
            database_url,
            llm_api_key,
            llm_base_url,
            embedding_api_key,
            log_format,
            worker_pool: WorkerPoolConfig::default(),
            job_store: JobStoreConfig::default(),
            coordination: CoordinationConfig::default(),
            linking: LinkingConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_clamps_to_minimum() {
        assert_eq!(WorkerCount::new(0).0, 1);
    }

    #[test]
    fn worker_count_auto_detect_is_at_least_two() {
        assert!(WorkerCount::auto_detect().0 >= 2);
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn coordination_config_defaults_to_three_minutes() {
        assert_eq!(CoordinationConfig::default().debounce_window, Duration::from_secs(180));
    }
}
