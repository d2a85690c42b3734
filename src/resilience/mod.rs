//! Resilience building blocks for the LLM-backed linking engine.
//!
//! The linking engine makes a large number of independent calls to an external
//! LLM provider. Providers rate-limit and occasionally degrade, so every call
//! goes through two layers:
//!
//! - **Circuit Breaker**: fails fast once a provider is unhealthy instead of
//!   piling up timeouts behind a stuck connection.
//! - **Rate Limiter**: paces requests so a burst of candidate pairs does not
//!   trip the provider's own throttling.
//!
//! # Usage
//!
//! ```no_run
//! use scriptorium::resilience::{CircuitBreaker, RateLimiter, ResilienceError};
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let breaker = CircuitBreaker::new_default();
//! let limiter = RateLimiter::per_second(20);
//!
//! let result = breaker
//!     .execute(|| async {
//!         limiter
//!             .execute(|| async { Ok::<_, ResilienceError>(42) })
//!             .await
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod error;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::ResilienceError;
pub use rate_limiter::RateLimiter;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    pub use super::error::ResilienceError;
    pub use super::rate_limiter::RateLimiter;
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_integrated_resilience() {
        let breaker = CircuitBreaker::new_default();
        let limiter = RateLimiter::per_second(1000);

        let result = breaker
            .execute(|| {
                let limiter = limiter.clone();
                async move { limiter.execute(|| async { Ok::<_, ResilienceError>(7) }).await }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
    }
}
