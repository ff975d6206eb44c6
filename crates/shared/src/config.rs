//! Application and job configuration for Rowboat.
//!
//! Two layers: a global app config at `~/.rowboat/rowboat.toml` (cache
//! location, credential env var names, default limits) and a per-run job
//! file describing one enrichment run. CLI flags override job file values,
//! which override app defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RowboatError};
use crate::types::OutputSchema;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "rowboat.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".rowboat";

/// Column names reserved for pipeline-generated output.
pub const RESERVED_COLUMNS: &[&str] = &["sources", "error"];

// ---------------------------------------------------------------------------
// App config (global, ~/.rowboat/rowboat.toml)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults applied when a job file omits them.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Credential env var names (never the keys themselves).
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Cache database directory.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Default concurrent rows in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Days after which `cache clean` drops old jobs.
    #[serde(default = "default_retention_days")]
    pub cache_retention_days: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            concurrency: default_concurrency(),
            cache_retention_days: default_retention_days(),
        }
    }
}

fn default_cache_dir() -> String {
    "~/.rowboat/cache".into()
}
fn default_concurrency() -> usize {
    4
}
fn default_retention_days() -> u32 {
    30
}

/// `[credentials]` section — names of the env vars holding API keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_model_key_env")]
    pub model_api_key_env: String,

    #[serde(default = "default_brave_key_env")]
    pub brave_api_key_env: String,

    #[serde(default = "default_google_key_env")]
    pub google_api_key_env: String,

    #[serde(default = "default_google_cx_env")]
    pub google_cx_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            model_api_key_env: default_model_key_env(),
            brave_api_key_env: default_brave_key_env(),
            google_api_key_env: default_google_key_env(),
            google_cx_env: default_google_cx_env(),
        }
    }
}

fn default_model_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_brave_key_env() -> String {
    "BRAVE_API_KEY".into()
}
fn default_google_key_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_google_cx_env() -> String {
    "GOOGLE_CX".into()
}

// ---------------------------------------------------------------------------
// Job config (per run)
// ---------------------------------------------------------------------------

/// One enrichment run, deserialized from a job TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Input CSV path.
    pub input_csv: String,

    /// Output CSV path (defaults to `<input stem>.enriched.csv`).
    #[serde(default)]
    pub output_csv: Option<String>,

    /// Column whose value seeds each row's research query.
    pub query_column: String,

    /// Prompt templates and few-shot examples.
    pub prompt: PromptConfig,

    /// Model provider selection and limits.
    pub model: ModelConfig,

    /// Search provider selection and limits.
    pub search: SearchConfig,

    /// Research loop behaviour.
    #[serde(default)]
    pub research: ResearchConfig,

    /// Concurrency, retry, and timeout limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Cache behaviour.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Declared output columns.
    pub schema: OutputSchema,
}

/// `[prompt]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// System prompt.
    #[serde(default = "default_system_prompt")]
    pub system: String,

    /// User prompt template with `{{column}}` placeholders.
    pub user: String,

    /// Few-shot examples rendered into the prompt.
    #[serde(default)]
    pub examples: Vec<PromptExample>,
}

fn default_system_prompt() -> String {
    "You are a research assistant analyzing web search results.".into()
}

/// One few-shot example: an input description and its ideal output fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptExample {
    pub input: String,
    pub output: BTreeMap<String, String>,
}

/// `[model]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider kind; currently any OpenAI-compatible endpoint.
    #[serde(default = "default_model_provider")]
    pub provider: String,

    /// Model identifier sent to the provider.
    pub name: String,

    /// Chat-completions base URL.
    #[serde(default = "default_model_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: f32,

    /// Token-bucket refill rate for model calls (requests per second).
    #[serde(default = "default_model_rate")]
    pub rate_per_sec: f64,

    /// Token-bucket capacity (burst allowance) for model calls.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_model_provider() -> String {
    "openai".into()
}
fn default_model_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model_rate() -> f64 {
    1.0
}
fn default_burst() -> u32 {
    2
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search engine: "brave" or "google".
    pub engine: String,

    /// Result candidates requested per query.
    #[serde(default = "default_search_results")]
    pub results: usize,

    /// How many of those candidates get their full text fetched.
    #[serde(default = "default_fetch_top")]
    pub fetch_top: usize,

    /// Token-bucket refill rate for search calls (requests per second).
    #[serde(default = "default_search_rate")]
    pub rate_per_sec: f64,

    /// Token-bucket capacity (burst allowance) for search calls.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Token-bucket refill rate for page fetches (requests per second).
    #[serde(default = "default_fetch_rate")]
    pub fetch_rate_per_sec: f64,
}

fn default_search_results() -> usize {
    5
}
fn default_fetch_top() -> usize {
    3
}
fn default_search_rate() -> f64 {
    1.0
}
fn default_fetch_rate() -> f64 {
    4.0
}

/// Research loop mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchMode {
    /// One search pass with the seed query, no planning or evaluation.
    Fixed,
    /// Iterative plan → search → evaluate loop, bounded by `max_iterations`.
    Agentic,
}

/// `[research]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "default_research_mode")]
    pub mode: ResearchMode,

    /// Hard iteration ceiling for agentic mode.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            mode: default_research_mode(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_research_mode() -> ResearchMode {
    ResearchMode::Fixed
}
fn default_max_iterations() -> u32 {
    3
}

/// `[limits]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Concurrent rows in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum calls per external operation (first try + retries).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Maximum generate calls per row (first try + validation re-prompts).
    #[serde(default = "default_max_reprompts")]
    pub max_reprompts: u32,

    /// Wall-clock budget per row across research + generation + validation.
    #[serde(default = "default_row_timeout")]
    pub row_timeout_secs: u64,

    /// First retry backoff delay.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Backoff multiplier.
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    /// Backoff cap.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            max_reprompts: default_max_reprompts(),
            row_timeout_secs: default_row_timeout(),
            retry_base_ms: default_retry_base_ms(),
            retry_multiplier: default_retry_multiplier(),
            retry_max_delay_ms: default_retry_max_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}
fn default_max_reprompts() -> u32 {
    3
}
fn default_row_timeout() -> u64 {
    180
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_retry_multiplier() -> f64 {
    2.0
}
fn default_retry_max_ms() -> u64 {
    30_000
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether results are persisted for resume.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether failed rows are cached too (skips re-billing the same
    /// failure on resume at the cost of never retrying it).
    #[serde(default)]
    pub cache_failures: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_failures: false,
        }
    }
}

fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Load and validate a job file.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| RowboatError::io(path, e))?;
        let config: JobConfig = toml::from_str(&content).map_err(|e| {
            RowboatError::config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints TOML parsing can't express.
    pub fn validate(&self) -> Result<()> {
        if self.query_column.trim().is_empty() {
            return Err(RowboatError::config("query_column must not be empty"));
        }
        if self.schema.fields.is_empty() {
            return Err(RowboatError::config(
                "schema must declare at least one output field",
            ));
        }
        for field in &self.schema.fields {
            if RESERVED_COLUMNS.contains(&field.name.as_str()) {
                return Err(RowboatError::config(format!(
                    "output field '{}' collides with a reserved column",
                    field.name
                )));
            }
            if field.kind == crate::types::FieldType::Enum && field.options.is_empty() {
                return Err(RowboatError::config(format!(
                    "enum field '{}' declares no options",
                    field.name
                )));
            }
        }
        if self.search.fetch_top > self.search.results {
            return Err(RowboatError::config(
                "search.fetch_top cannot exceed search.results",
            ));
        }
        if self.limits.max_attempts == 0 || self.limits.max_reprompts == 0 {
            return Err(RowboatError::config(
                "limits.max_attempts and limits.max_reprompts must be at least 1",
            ));
        }
        Ok(())
    }

    /// Output path, derived from the input path when not set.
    pub fn output_path(&self) -> PathBuf {
        match &self.output_csv {
            Some(path) => PathBuf::from(path),
            None => {
                let input = Path::new(&self.input_csv);
                let stem = input
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "output".into());
                input.with_file_name(format!("{stem}.enriched.csv"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// App config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.rowboat/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RowboatError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.rowboat/rowboat.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_app_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_app_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_app_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RowboatError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RowboatError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_app_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RowboatError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RowboatError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RowboatError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the cache database path, expanding a leading `~`.
pub fn cache_db_path(config: &AppConfig) -> Result<PathBuf> {
    let raw = &config.defaults.cache_dir;
    let dir = if let Some(rest) = raw.strip_prefix("~/") {
        dirs::home_dir()
            .ok_or_else(|| RowboatError::config("could not determine home directory"))?
            .join(rest)
    } else {
        PathBuf::from(raw)
    };
    Ok(dir.join("rowboat.db"))
}

/// Read a required credential from the env var named in the config.
pub fn require_env(var_name: &str, purpose: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(RowboatError::config(format!(
            "{purpose} API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_JOB: &str = r#"
input_csv = "leads.csv"
query_column = "company"

[prompt]
user = "What industry is {{company}} in?"

[model]
name = "anthropic/claude-sonnet-4.5"

[search]
engine = "brave"

[[schema.fields]]
name = "industry"
type = "enum"
required = true
options = ["SaaS", "Fintech", "Other"]
"#;

    #[test]
    fn default_app_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("cache_dir"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn app_config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.concurrency, 4);
        assert_eq!(parsed.credentials.brave_api_key_env, "BRAVE_API_KEY");
    }

    #[test]
    fn minimal_job_parses_with_defaults() {
        let job: JobConfig = toml::from_str(MINIMAL_JOB).expect("parse job");
        job.validate().expect("valid job");
        assert_eq!(job.query_column, "company");
        assert_eq!(job.search.results, 5);
        assert_eq!(job.search.fetch_top, 3);
        assert_eq!(job.research.mode, ResearchMode::Fixed);
        assert_eq!(job.limits.max_attempts, 4);
        assert!(job.cache.enabled);
        assert!(!job.cache.cache_failures);
    }

    #[test]
    fn derived_output_path() {
        let job: JobConfig = toml::from_str(MINIMAL_JOB).expect("parse job");
        assert_eq!(job.output_path(), PathBuf::from("leads.enriched.csv"));
    }

    #[test]
    fn enum_without_options_rejected() {
        let mut job: JobConfig = toml::from_str(MINIMAL_JOB).expect("parse job");
        job.schema.fields[0].options.clear();
        let err = job.validate().unwrap_err();
        assert!(err.to_string().contains("declares no options"));
    }

    #[test]
    fn reserved_column_rejected() {
        let mut job: JobConfig = toml::from_str(MINIMAL_JOB).expect("parse job");
        job.schema.fields[0].name = "error".into();
        job.schema.fields[0].options = vec!["x".into()];
        assert!(job.validate().is_err());
    }

    #[test]
    fn fetch_top_bounded_by_results() {
        let mut job: JobConfig = toml::from_str(MINIMAL_JOB).expect("parse job");
        job.search.fetch_top = 10;
        assert!(job.validate().is_err());
    }

    #[test]
    fn agentic_research_parses() {
        let toml_str = format!("{MINIMAL_JOB}\n[research]\nmode = \"agentic\"\nmax_iterations = 5\n");
        let job: JobConfig = toml::from_str(&toml_str).expect("parse job");
        assert_eq!(job.research.mode, ResearchMode::Agentic);
        assert_eq!(job.research.max_iterations, 5);
    }

    #[test]
    fn missing_credential_env_errors() {
        let result = require_env("ROWBOAT_TEST_NONEXISTENT_KEY_99", "search");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
