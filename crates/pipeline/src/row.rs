//! Per-row state machine: Pending → Researching → Generating → Validating
//! → Done | Failed.
//!
//! Transitions are strictly sequential within a row. Cancellation is only
//! observed between states, so an interrupted row never persists partial
//! sub-state; it resumes from Pending on the next run.

use tracing::{debug, instrument, warn};

use rowboat_llm::prompt::{build_reprompt, build_user_prompt};
use rowboat_shared::{Row, RowOutcome, RowStatus, RowboatError};

use crate::agent::run_research;
use crate::context::PipelineContext;
use crate::scheduler::CancelToken;
use crate::validate::validate;

/// Drive one row to a terminal outcome. Errors never escape: every failure
/// mode is folded into the returned [`RowOutcome`] so one bad row cannot
/// abort the run.
#[instrument(skip_all, fields(row = row.index))]
pub async fn process_row(ctx: &PipelineContext, row: &Row, cancel: &CancelToken) -> RowOutcome {
    if cancel.is_cancelled() {
        return RowOutcome::interrupted(row.index);
    }

    // --- Researching ---
    let research = match run_research(ctx, row).await {
        Ok(research) => research,
        Err(e) => {
            warn!(error = %e, "research failed");
            return failed(row.index, 0, 0, e);
        }
    };
    let iterations = research.iterations;
    let sources: Vec<String> = research
        .evidence
        .sources()
        .iter()
        .map(|s| s.to_string())
        .collect();

    if cancel.is_cancelled() {
        return RowOutcome::interrupted(row.index);
    }

    // --- Generating / Validating, bounded by the re-prompt budget ---
    let system = ctx.config.prompt.system.clone();
    let base_user = build_user_prompt(
        &ctx.config.prompt.user,
        row,
        &research.evidence,
        &ctx.config.prompt.examples,
        &ctx.config.schema,
    );
    let max_reprompts = ctx.config.limits.max_reprompts.max(1);

    let mut user = base_user.clone();
    let mut attempt = 0;
    loop {
        attempt += 1;

        let raw = match ctx.call_model(&system, &user).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(attempt, error = %e, "generation failed");
                return failed(row.index, iterations, attempt, e);
            }
        };

        match validate(&raw, &ctx.config.schema) {
            Ok(output_fields) => {
                debug!(attempt, "row complete");
                return RowOutcome {
                    row_index: row.index,
                    status: RowStatus::Done,
                    output_fields: Some(output_fields),
                    sources,
                    error: None,
                    generate_attempts: attempt,
                    research_iterations: iterations,
                    from_cache: false,
                };
            }
            Err(e) if attempt >= max_reprompts => {
                warn!(attempt, error = %e, "validation budget exhausted");
                return failed(row.index, iterations, attempt, e);
            }
            Err(e) => {
                debug!(attempt, error = %e, "re-prompting after validation failure");
                user = build_reprompt(&base_user, &raw, &e.to_string());
                if cancel.is_cancelled() {
                    return RowOutcome::interrupted(row.index);
                }
            }
        }
    }
}

fn failed(row_index: usize, iterations: u32, attempts: u32, error: RowboatError) -> RowOutcome {
    RowOutcome {
        row_index,
        status: RowStatus::Failed,
        output_fields: None,
        sources: Vec::new(),
        error: Some(error.to_string()),
        generate_attempts: attempts,
        research_iterations: iterations,
        from_cache: false,
    }
}
