//! Shared types, configuration, and error handling for Rowboat.
//!
//! Every other crate in the workspace depends on this one; it holds the
//! domain vocabulary (rows, evidence, output schemas), the two-layer TOML
//! configuration, and the fingerprint hashing that cache keys are built from.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod types;

pub use config::{
    AppConfig, JobConfig, ModelConfig, PromptExample, RESERVED_COLUMNS, ResearchMode, SearchConfig,
    cache_db_path, config_file_path, init_app_config, load_app_config, require_env,
};
pub use error::{Result, RowboatError};
pub use types::{
    Evidence, EvidenceDoc, FieldSpec, FieldType, JobId, OutputSchema, Row, RowOutcome, RowStatus,
    RunSummary, SearchHit,
};
