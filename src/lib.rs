//! Scriptorium: a durable job queue and worker pool for turning uploaded
//! papers into a cross-referenced claim graph.
//!
//! # Overview
//!
//! Scriptorium runs three job kinds — `PARSE_PAPER`, `EXTRACT_ELEMENTS`, and
//! `LINK_LIBRARY` — through a Postgres-backed job queue with atomic
//! claim/complete semantics, a multi-process worker pool, and an LLM-backed
//! linking engine that classifies relationships between claims and
//! observations across a library of papers.
//!
//! # Modules
//!
//! - [`job`]: the durable job queue and its state machine.
//! - [`domain_store`]: papers, libraries, extracts, and the links between them.
//! - [`domain`]: the data model shared by the Domain Store and the linking engine.
//! - [`coordination`]: the "should a `LINK_LIBRARY` run now?" predicate.
//! - [`linking`]: the claim-to-claim and claim-to-observation linking engine.
//! - [`llm`]: the LLM Client boundary the linking engine dispatches through.
//! - [`handlers`]: per-job-kind handler implementations.
//! - [`worker`]: the process supervisor and per-worker claim/dispatch loop.
//! - [`executor`]: the async/compute air gap for CPU-bound work.
//! - [`resilience`]: circuit breaker and rate limiter wrapping outbound calls.
//! - [`config`]: environment-driven configuration for every tunable.
//! - [`error`]: the crate-wide error type.

pub mod backoff;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod domain_store;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod job;
pub mod linking;
pub mod llm;
pub mod resilience;
pub mod worker;
