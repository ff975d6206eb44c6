//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::info;

use rowboat_pipeline::{PipelineContext, cancel_pair, scheduler};
use rowboat_search::{PageExtractor, SearchCredentials};
use rowboat_shared::fingerprint::{fingerprint_config, fingerprint_dataset};
use rowboat_shared::{
    AppConfig, JobConfig, JobId, RESERVED_COLUMNS, RowStatus, cache_db_path, config_file_path,
    init_app_config, load_app_config, require_env,
};
use rowboat_storage::CacheStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Rowboat — enrich CSV rows with web research and LLM generation.
#[derive(Parser)]
#[command(
    name = "rowboat",
    version,
    about = "Enrich CSV rows with web research and structured LLM output.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run an enrichment job from a job file.
    Run {
        /// Path to the job TOML file.
        job: PathBuf,

        /// Disable the result cache for this run (no resume, no skips).
        #[arg(long)]
        no_cache: bool,

        /// Start a fresh job even if an interrupted one matches.
        #[arg(long)]
        no_resume: bool,
    },

    /// Cache maintenance.
    Cache {
        /// Cache subcommand.
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Drop cached jobs older than the retention window.
    Clean {
        /// Override the retention window in days.
        #[arg(long)]
        days: Option<u32>,
    },
    /// Delete every cached job and row result.
    Purge,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "rowboat=info",
        1 => "rowboat=debug",
        _ => "rowboat=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            job,
            no_cache,
            no_resume,
        } => cmd_run(&job, no_cache, no_resume).await,
        Command::Cache { action } => match action {
            CacheAction::Clean { days } => cmd_cache_clean(days).await,
            CacheAction::Purge => cmd_cache_purge().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(job_path: &PathBuf, no_cache: bool, no_resume: bool) -> Result<()> {
    let app = load_app_config()?;
    let mut config = JobConfig::load(job_path)?;
    if no_cache {
        config.cache.enabled = false;
    }

    let input_path = PathBuf::from(&config.input_csv);
    let (headers, rows) = rowboat_dataset::read_rows(&input_path)?;
    check_headers(&headers, &config)?;
    let total = rows.len();

    // Resolve credentials and build the external capabilities
    let model_key = require_env(&app.credentials.model_api_key_env, "model")?;
    let credentials = search_credentials(&app, &config)?;
    let search = rowboat_search::provider_for(&config.search.engine, credentials)?;
    let fetcher = Box::new(PageExtractor::new()?);
    let model = rowboat_llm::provider_for(&config.model, model_key)?;

    let store = if config.cache.enabled {
        let db_path = cache_db_path(&app)?;
        Some(Arc::new(CacheStore::open(&db_path).await?))
    } else {
        None
    };

    // Job identity: same config + same input resumes an interrupted run
    let config_fingerprint = fingerprint_config(&config)?;
    let input_fingerprint = fingerprint_dataset(&rows);
    let (job_id, resumed) = match &store {
        Some(store) => {
            scheduler::resolve_job(
                store,
                &config_fingerprint,
                &input_fingerprint,
                total,
                !no_resume,
            )
            .await?
        }
        None => (JobId::new(), false),
    };

    if resumed {
        if let Some(store) = &store {
            let (done, failed) = store.count_results(&job_id).await?;
            info!(done, failed, "resuming with cached results");
        }
    }

    info!(
        job_id = %job_id,
        rows = total,
        resumed,
        engine = %config.search.engine,
        model = %config.model.name,
        "starting enrichment run"
    );

    let output_path = config.output_path();
    let schema = config.schema.clone();
    let ctx = Arc::new(PipelineContext::new(config, search, fetcher, model));

    // Ctrl-C requests a graceful stop; rows halt at their next checkpoint
    let (cancel_handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt received, stopping after in-flight rows...");
            cancel_handle.cancel();
        }
    });

    let bar = run_progress(total);
    let (tx, mut rx) = mpsc::channel(64);
    let run_task = tokio::spawn(scheduler::run(
        ctx,
        store,
        job_id,
        rows.clone(),
        cancel,
        tx,
    ));

    let mut outcomes = Vec::with_capacity(total);
    while let Some(outcome) = rx.recv().await {
        bar.inc(1);
        match outcome.status {
            RowStatus::Done if outcome.from_cache => bar.set_message("cached"),
            RowStatus::Done => bar.set_message("done"),
            RowStatus::Failed => bar.set_message(format!("row {} failed", outcome.row_index)),
            _ => {}
        }
        outcomes.push(outcome);
    }
    let summary = run_task.await??;
    bar.finish_and_clear();

    rowboat_dataset::write_output(&output_path, &headers, &schema, &rows, &outcomes)?;

    println!();
    println!("  Enrichment run {}", if summary.interrupted > 0 { "interrupted" } else { "complete" });
    println!("  Done:        {}", summary.done);
    println!("  Failed:      {}", summary.failed);
    println!("  From cache:  {}", summary.skipped);
    println!("  Interrupted: {}", summary.interrupted);
    println!("  Output:      {}", output_path.display());
    if summary.interrupted > 0 {
        println!();
        println!("  Re-run the same job file to resume where this run stopped.");
    }
    println!();

    Ok(())
}

/// The query column must exist, and the input must not already use the
/// columns the pipeline appends.
fn check_headers(headers: &[String], config: &JobConfig) -> Result<()> {
    if !headers.iter().any(|h| h == &config.query_column) {
        return Err(eyre!(
            "query_column '{}' not found in {} (columns: {})",
            config.query_column,
            config.input_csv,
            headers.join(", ")
        ));
    }
    for header in headers {
        if RESERVED_COLUMNS.contains(&header.as_str()) {
            return Err(eyre!(
                "input column '{header}' collides with a generated output column"
            ));
        }
    }
    Ok(())
}

fn search_credentials(app: &AppConfig, config: &JobConfig) -> Result<SearchCredentials> {
    let credentials = match config.search.engine.as_str() {
        "google" => SearchCredentials {
            api_key: require_env(&app.credentials.google_api_key_env, "Google search")?,
            google_cx: Some(require_env(&app.credentials.google_cx_env, "Google CX")?),
        },
        _ => SearchCredentials {
            api_key: require_env(&app.credentials.brave_api_key_env, "Brave search")?,
            google_cx: None,
        },
    };
    Ok(credentials)
}

fn run_progress(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} rows {msg}")
            .unwrap()
            .progress_chars("=> "),
    );
    bar
}

// ---------------------------------------------------------------------------
// cache
// ---------------------------------------------------------------------------

async fn cmd_cache_clean(days: Option<u32>) -> Result<()> {
    let app = load_app_config()?;
    let retention = days.unwrap_or(app.defaults.cache_retention_days);
    let store = CacheStore::open(&cache_db_path(&app)?).await?;

    let dropped = store.purge_older_than(retention).await?;
    println!("Dropped {dropped} job(s) older than {retention} day(s).");
    Ok(())
}

async fn cmd_cache_purge() -> Result<()> {
    let app = load_app_config()?;
    let store = CacheStore::open(&cache_db_path(&app)?).await?;

    store.purge_all().await?;
    println!("Cache purged.");
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_app_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_app_config()?;
    println!("# {}", config_file_path()?.display());
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
