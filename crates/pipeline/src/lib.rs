//! The resumable, concurrent, rate-limited row-enrichment pipeline.
//!
//! This crate composes the external capabilities (search, page fetch, model)
//! into per-row state machines and drives them under a bounded worker pool:
//! - [`limiter`] — per-service token-bucket admission control
//! - [`retry`] — bounded exponential backoff for transient failures
//! - [`validate`] — structured-output checking against the declared schema
//! - [`agent`] — the per-row research loop (fixed or agentic)
//! - [`row`] — the Pending → Researching → Generating → Validating state machine
//! - [`scheduler`] — concurrency, cache short-circuiting, and checkpointing

pub mod agent;
pub mod context;
pub mod limiter;
pub mod retry;
pub mod row;
pub mod scheduler;
pub mod validate;

pub use context::{PipelineContext, SERVICE_FETCH, SERVICE_MODEL, SERVICE_SEARCH};
pub use limiter::RateLimiterRegistry;
pub use retry::RetryPolicy;
pub use scheduler::{cancel_pair, CancelHandle, CancelToken};

#[cfg(test)]
pub(crate) mod testutil;
