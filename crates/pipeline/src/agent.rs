//! The per-row research loop.
//!
//! Fixed mode runs exactly one search pass with the row's seed query.
//! Agentic mode cycles plan → search → evaluate, asking the model whether
//! the gathered evidence suffices and what to search next, bounded by a
//! hard iteration ceiling. Hitting the ceiling is not an error; generation
//! proceeds with whatever evidence exists.

use tracing::{debug, instrument, warn};

use rowboat_llm::prompt::render_template;
use rowboat_shared::{Evidence, EvidenceDoc, ResearchMode, Result, Row, RowboatError};

use crate::context::PipelineContext;

/// Evidence plus the iteration count, reported on the row outcome.
#[derive(Debug)]
pub struct ResearchOutcome {
    pub evidence: Evidence,
    pub iterations: u32,
}

/// Gather evidence for one row.
#[instrument(skip_all, fields(row = row.index))]
pub async fn run_research(ctx: &PipelineContext, row: &Row) -> Result<ResearchOutcome> {
    let seed = row.get(&ctx.config.query_column).ok_or_else(|| {
        RowboatError::Dataset(format!(
            "row {} has no value for query column '{}'",
            row.index, ctx.config.query_column
        ))
    })?;

    match ctx.config.research.mode {
        ResearchMode::Fixed => {
            let mut evidence = Evidence::default();
            search_pass(ctx, seed, &mut evidence).await?;
            Ok(ResearchOutcome {
                evidence,
                iterations: 1,
            })
        }
        ResearchMode::Agentic => agentic_loop(ctx, row, seed).await,
    }
}

/// Plan → search → evaluate until sufficiency or the iteration ceiling.
async fn agentic_loop(ctx: &PipelineContext, row: &Row, seed: &str) -> Result<ResearchOutcome> {
    let question = render_template(&ctx.config.prompt.user, row);
    let ceiling = ctx.config.research.max_iterations.max(1);

    let mut evidence = Evidence::default();
    let mut query = seed.to_string();
    let mut iterations = 0;

    for iteration in 1..=ceiling {
        iterations = iteration;
        search_pass(ctx, &query, &mut evidence).await?;

        if iteration == ceiling {
            debug!(iteration, "research ceiling reached, concluding");
            break;
        }

        if evidence_sufficient(ctx, &question, &evidence).await? {
            debug!(iteration, "evidence judged sufficient, concluding");
            break;
        }

        match plan_next_query(ctx, &question, &evidence).await? {
            Some(next) => query = next,
            None => {
                debug!(iteration, "planner reported done, concluding");
                break;
            }
        }
    }

    Ok(ResearchOutcome {
        evidence,
        iterations,
    })
}

/// One search → fetch cycle. Search failures propagate; individual page
/// fetch failures degrade that hit to its snippet.
async fn search_pass(ctx: &PipelineContext, query: &str, evidence: &mut Evidence) -> Result<()> {
    let hits = ctx.call_search(query).await?;
    let fetch_top = ctx.config.search.fetch_top;

    for (i, hit) in hits.into_iter().enumerate() {
        let text = if i < fetch_top {
            match ctx.call_fetch(&hit.url).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!(url = %hit.url, error = %e, "page fetch failed, keeping snippet only");
                    None
                }
            }
        } else {
            None
        };
        evidence.docs.push(EvidenceDoc {
            url: hit.url,
            title: hit.title,
            snippet: hit.snippet,
            text,
        });
    }
    Ok(())
}

/// Ask the model whether the evidence answers the question. Unparseable
/// verdicts count as "not sufficient" so the loop keeps working.
async fn evidence_sufficient(
    ctx: &PipelineContext,
    question: &str,
    evidence: &Evidence,
) -> Result<bool> {
    let user = format!(
        "Question: {question}\n\nEvidence gathered so far:\n{}\n\n\
         Is this evidence sufficient to answer the question reliably? \
         Reply with exactly YES or NO.",
        evidence_digest(evidence)
    );
    let verdict = ctx
        .call_model("You judge whether gathered evidence answers a question.", &user)
        .await?;
    Ok(verdict.trim().to_uppercase().starts_with("YES"))
}

/// Ask the model for the next query. `None` means the planner sees nothing
/// left worth searching.
async fn plan_next_query(
    ctx: &PipelineContext,
    question: &str,
    evidence: &Evidence,
) -> Result<Option<String>> {
    let user = format!(
        "Question: {question}\n\nEvidence gathered so far:\n{}\n\n\
         Propose the single best web search query to fill the remaining gaps. \
         Reply with only the query text, or exactly DONE if no further search would help.",
        evidence_digest(evidence)
    );
    let reply = ctx
        .call_model("You plan web searches for a research task.", &user)
        .await?;

    let query = reply.trim().trim_matches('"').to_string();
    if query.is_empty() || query.eq_ignore_ascii_case("DONE") {
        Ok(None)
    } else {
        Ok(Some(query))
    }
}

/// Compact evidence listing for planner/evaluator prompts; full page text
/// is reserved for the generation prompt.
fn evidence_digest(evidence: &Evidence) -> String {
    if evidence.is_empty() {
        return "(none)".into();
    }
    evidence
        .docs
        .iter()
        .map(|doc| format!("- {} ({}): {}", doc.title, doc.url, doc.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::testutil::{job_config, make_ctx, test_row, FakeFetcher, FakeModel, FakeSearch};

    #[tokio::test]
    async fn fixed_mode_is_a_single_search_pass() {
        let search = FakeSearch::with_hits(3);
        let fetcher = FakeFetcher::new();
        let model = FakeModel::always("unused");
        let (search_calls, fetch_calls, model_calls) =
            (search.calls.clone(), fetcher.calls.clone(), model.calls.clone());

        let ctx = make_ctx(job_config(""), search, fetcher, model);
        let outcome = run_research(&ctx, &test_row(0, "Acme")).await.expect("research");

        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.evidence.docs.len(), 3);
        assert_eq!(search_calls.load(Ordering::SeqCst), 1);
        // fetch_top = 2: only the top hits get full text
        assert_eq!(fetch_calls.load(Ordering::SeqCst), 2);
        assert!(outcome.evidence.docs[0].text.is_some());
        assert!(outcome.evidence.docs[2].text.is_none());
        // No planning or evaluation in fixed mode
        assert_eq!(model_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn agentic_loop_stops_at_ceiling() {
        let search = FakeSearch::with_hits(1);
        let fetcher = FakeFetcher::new();
        // Evaluator never satisfied, planner always has another query
        let model = FakeModel::scripted(&["NO", "acme funding", "NO", "acme revenue"]);
        let (search_calls, model_calls) = (search.calls.clone(), model.calls.clone());

        let config = job_config("[research]\nmode = \"agentic\"\nmax_iterations = 3\n");
        let ctx = make_ctx(config, search, fetcher, model);
        let outcome = run_research(&ctx, &test_row(0, "Acme")).await.expect("research");

        assert_eq!(outcome.iterations, 3);
        assert_eq!(search_calls.load(Ordering::SeqCst), 3);
        // Two evaluate + two plan calls; the final iteration concludes
        // at the ceiling without consulting the model again
        assert_eq!(model_calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.evidence.docs.len(), 3);
    }

    #[tokio::test]
    async fn agentic_loop_concludes_on_sufficiency() {
        let search = FakeSearch::with_hits(2);
        let fetcher = FakeFetcher::new();
        let model = FakeModel::always("YES");
        let (search_calls, model_calls) = (search.calls.clone(), model.calls.clone());

        let config = job_config("[research]\nmode = \"agentic\"\nmax_iterations = 5\n");
        let ctx = make_ctx(config, search, fetcher, model);
        let outcome = run_research(&ctx, &test_row(0, "Acme")).await.expect("research");

        assert_eq!(outcome.iterations, 1);
        assert_eq!(search_calls.load(Ordering::SeqCst), 1);
        assert_eq!(model_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn agentic_loop_concludes_when_planner_is_done() {
        let search = FakeSearch::with_hits(1);
        let fetcher = FakeFetcher::new();
        let model = FakeModel::scripted(&["NO", "DONE"]);
        let search_calls = search.calls.clone();

        let config = job_config("[research]\nmode = \"agentic\"\nmax_iterations = 5\n");
        let ctx = make_ctx(config, search, fetcher, model);
        let outcome = run_research(&ctx, &test_row(0, "Acme")).await.expect("research");

        assert_eq!(outcome.iterations, 1);
        assert_eq!(search_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_failures_degrade_to_snippets() {
        let search = FakeSearch::with_hits(2);
        let mut fetcher = FakeFetcher::new();
        fetcher.fail = true;
        let model = FakeModel::always("unused");

        let ctx = make_ctx(job_config(""), search, fetcher, model);
        let outcome = run_research(&ctx, &test_row(0, "Acme")).await.expect("research");

        assert_eq!(outcome.evidence.docs.len(), 2);
        assert!(outcome.evidence.docs.iter().all(|d| d.text.is_none()));
        assert!(!outcome.evidence.docs[0].snippet.is_empty());
    }

    #[tokio::test]
    async fn missing_query_column_is_a_dataset_error() {
        let ctx = make_ctx(
            job_config(""),
            FakeSearch::with_hits(1),
            FakeFetcher::new(),
            FakeModel::always("unused"),
        );
        let row = Row::new(0, vec![("other".into(), "x".into())]);
        let err = run_research(&ctx, &row).await.unwrap_err();
        assert!(matches!(err, RowboatError::Dataset(_)));
    }

    #[tokio::test]
    async fn search_failure_propagates() {
        let mut search = FakeSearch::with_hits(1);
        search.fail_on = Some("Acme".into());

        let ctx = make_ctx(job_config(""), search, FakeFetcher::new(), FakeModel::always("x"));
        let err = run_research(&ctx, &test_row(0, "Acme")).await.unwrap_err();
        assert!(matches!(err, RowboatError::Search(_)));
    }
}
