//! Rowboat CLI — resumable CSV enrichment via web research and LLMs.
//!
//! Reads a job file describing an input CSV, a research prompt, and an
//! output schema, then enriches every row through search + generation
//! with a persistent cache for crash-safe resume.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
