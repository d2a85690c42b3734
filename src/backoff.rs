//! Exponential backoff with full jitter for job retries (§4.1).
//!
//! Same curve shape the resilience module uses for transient LLM failures,
//! reused here for the Store's `retry_after` computation.

use rand::Rng;
use std::time::Duration;

use crate::config::JobStoreConfig;

/// Computes `retry_after` delay for a job about to re-enter *pending* after
/// its `attempts`'th failure. Monotonically non-decreasing in `attempts`,
/// capped at `config.backoff_cap`.
pub fn compute(attempts: i32, config: &JobStoreConfig) -> Duration {
    let exponent = attempts.max(1).saturating_sub(1).min(20) as u32;
    let unjittered = config.backoff_base.saturating_mul(2u32.saturating_pow(exponent));
    let capped = unjittered.min(config.backoff_cap);

    let mut rng = rand::thread_rng();
    let jitter_fraction: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(capped.as_secs_f64() * jitter_fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        let config = JobStoreConfig {
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(600),
            ..JobStoreConfig::default()
        };
        for attempts in 1..15 {
            let d = compute(attempts, &config);
            assert!(d <= config.backoff_cap);
        }
    }

    #[test]
    fn backoff_grows_with_attempts_on_average() {
        let config = JobStoreConfig::default();
        let sample = |n: i32| -> f64 {
            (0..200).map(|_| compute(n, &config).as_secs_f64()).sum::<f64>() / 200.0
        };
        assert!(sample(5) > sample(1));
    }
}
