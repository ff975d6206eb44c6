//! Bounded worker pool driving row pipelines, with cache short-circuiting
//! and checkpointing.
//!
//! Rows are independent and complete in any order; callers reassemble by
//! `row_index`. The scheduler is the only place that touches the cache
//! store: lookups before a row starts, upserts when it reaches a terminal
//! state, and job status transitions at the end of the run.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::{timeout, Duration};
use tracing::{info, instrument, warn};

use rowboat_shared::fingerprint::{cache_key, fingerprint_config, fingerprint_row};
use rowboat_shared::{JobId, Result, Row, RowOutcome, RowStatus, RowboatError, RunSummary};
use rowboat_storage::{CacheEntry, CacheStore, JobStatus};

use crate::context::PipelineContext;
use crate::row::process_row;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Run-level cancellation signal. In-flight rows observe it between state
/// transitions and stop at their next safe checkpoint.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// The sending half, held by whoever wires up Ctrl-C.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

// ---------------------------------------------------------------------------
// Job resolution
// ---------------------------------------------------------------------------

/// Find a resumable job for this exact config + input, or create a new one.
/// Returns the job id and whether an earlier run is being resumed.
pub async fn resolve_job(
    store: &CacheStore,
    config_fingerprint: &str,
    input_fingerprint: &str,
    total_rows: usize,
    auto_resume: bool,
) -> Result<(JobId, bool)> {
    if auto_resume {
        if let Some(job) = store
            .find_resumable_job(config_fingerprint, input_fingerprint)
            .await?
        {
            info!(job_id = %job.job_id, "resuming interrupted job");
            store.update_job_status(&job.job_id, JobStatus::Running).await?;
            return Ok((job.job_id, true));
        }
    }

    let job_id = JobId::new();
    store
        .insert_job(&job_id, config_fingerprint, input_fingerprint, total_rows)
        .await?;
    Ok((job_id, false))
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Process all rows under the configured concurrency limit, emitting each
/// outcome on `outcomes` as it completes (out of order). Callers should
/// drain the channel concurrently; sends block when it is full.
///
/// Only resource setup can fail; per-row errors are folded into outcomes.
#[instrument(skip_all, fields(job_id = %job_id, rows = rows.len()))]
pub async fn run(
    ctx: Arc<PipelineContext>,
    store: Option<Arc<CacheStore>>,
    job_id: JobId,
    rows: Vec<Row>,
    cancel: CancelToken,
    outcomes: mpsc::Sender<RowOutcome>,
) -> Result<RunSummary> {
    let config_fingerprint = fingerprint_config(&ctx.config)?;
    let concurrency = ctx.config.limits.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let row_timeout = Duration::from_secs(ctx.config.limits.row_timeout_secs);

    info!(concurrency, cache = store.is_some(), "starting run");

    let mut handles = Vec::with_capacity(rows.len());
    for row in rows {
        let ctx = Arc::clone(&ctx);
        let store = store.clone();
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let outcomes = outcomes.clone();
        let job_id = job_id.clone();
        let config_fingerprint = config_fingerprint.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");

            let outcome =
                drive_row(&ctx, store.as_deref(), &job_id, &config_fingerprint, &row, &cancel)
                    .await;

            let _ = outcomes.send(outcome.clone()).await;
            outcome
        }));
    }
    drop(outcomes);

    let mut summary = RunSummary::default();
    for handle in handles {
        match handle.await {
            Ok(outcome) => {
                if outcome.from_cache {
                    summary.skipped += 1;
                } else {
                    match outcome.status {
                        RowStatus::Done => summary.done += 1,
                        RowStatus::Failed => summary.failed += 1,
                        _ => summary.interrupted += 1,
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "row task panicked");
                summary.failed += 1;
            }
        }
    }

    if let Some(store) = &store {
        let final_status = if summary.interrupted > 0 || cancel.is_cancelled() {
            JobStatus::Interrupted
        } else {
            JobStatus::Completed
        };
        if let Err(e) = store.update_job_status(&job_id, final_status).await {
            warn!(error = %e, "failed to record final job status");
        }
    }

    info!(
        done = summary.done,
        failed = summary.failed,
        skipped = summary.skipped,
        interrupted = summary.interrupted,
        "run complete"
    );
    Ok(summary)
}

/// One row end to end: cache lookup, pipeline execution under the row
/// timeout, and checkpoint upsert.
async fn drive_row(
    ctx: &PipelineContext,
    store: Option<&CacheStore>,
    job_id: &JobId,
    config_fingerprint: &str,
    row: &Row,
    cancel: &CancelToken,
) -> RowOutcome {
    let caching = store.is_some() && ctx.config.cache.enabled;
    let key = cache_key(config_fingerprint, &fingerprint_row(row));

    if caching {
        if let Some(store) = store {
            match store.lookup(&key).await {
                Ok(Some(entry)) => {
                    if let Some(outcome) = outcome_from_entry(ctx, row.index, &entry) {
                        return outcome;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(row = row.index, error = %e, "cache lookup failed, reprocessing");
                }
            }
        }
    }

    if cancel.is_cancelled() {
        return RowOutcome::interrupted(row.index);
    }

    let outcome = match timeout(row_budget(ctx), process_row(ctx, row, cancel)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            let seconds = ctx.config.limits.row_timeout_secs;
            warn!(row = row.index, seconds, "row timed out");
            RowOutcome {
                row_index: row.index,
                status: RowStatus::Failed,
                output_fields: None,
                sources: Vec::new(),
                error: Some(RowboatError::Timeout { seconds }.to_string()),
                generate_attempts: 0,
                research_iterations: 0,
                from_cache: false,
            }
        }
    };

    if caching && should_persist(ctx, &outcome) {
        if let Some(store) = store {
            let entry = entry_from_outcome(&key, job_id, &outcome);
            let entry = &entry;
            let persisted = ctx
                .retry
                .execute("cache write", move || async move { store.upsert(entry).await })
                .await;
            if let Err(e) = persisted {
                // Degrades resumability for this row only; the run continues
                warn!(row = row.index, error = %e, "result not persisted, row will rerun on resume");
            }
        }
    }

    outcome
}

fn row_budget(ctx: &PipelineContext) -> Duration {
    Duration::from_secs(ctx.config.limits.row_timeout_secs)
}

/// Terminal `done` rows always checkpoint; `failed` rows only when failure
/// caching is enabled.
fn should_persist(ctx: &PipelineContext, outcome: &RowOutcome) -> bool {
    match outcome.status {
        RowStatus::Done => true,
        RowStatus::Failed => ctx.config.cache.cache_failures,
        _ => false,
    }
}

/// Rehydrate a cached entry into an outcome, if its status short-circuits
/// this row under the current cache policy.
fn outcome_from_entry(ctx: &PipelineContext, row_index: usize, entry: &CacheEntry) -> Option<RowOutcome> {
    let usable = match entry.status {
        RowStatus::Done => true,
        RowStatus::Failed => ctx.config.cache.cache_failures,
        _ => false,
    };
    if !usable {
        return None;
    }

    let output_fields = match &entry.output_json {
        Some(json) => match serde_json::from_str(json) {
            Ok(fields) => Some(fields),
            Err(e) => {
                warn!(row = row_index, error = %e, "corrupt cached output, reprocessing");
                return None;
            }
        },
        None => None,
    };

    Some(RowOutcome {
        row_index,
        status: entry.status,
        output_fields,
        sources: entry.sources.clone(),
        error: entry.error.clone(),
        generate_attempts: 0,
        research_iterations: 0,
        from_cache: true,
    })
}

fn entry_from_outcome(key: &str, job_id: &JobId, outcome: &RowOutcome) -> CacheEntry {
    CacheEntry {
        cache_key: key.to_string(),
        job_id: job_id.clone(),
        row_index: outcome.row_index,
        status: outcome.status,
        output_json: outcome
            .output_fields
            .as_ref()
            .and_then(|fields| serde_json::to_string(fields).ok()),
        sources: outcome.sources.clone(),
        error: outcome.error.clone(),
        created_at: Utc::now().to_rfc3339(),
    }
}
