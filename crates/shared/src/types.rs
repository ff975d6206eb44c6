//! Core domain types for Rowboat enrichment runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for enrichment job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Row
// ---------------------------------------------------------------------------

/// One input record, with its stable position in the dataset and its
/// column values in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    /// Stable index in the input dataset.
    pub index: usize,
    /// Ordered column name → value pairs.
    pub fields: Vec<(String, String)>,
}

impl Row {
    pub fn new(index: usize, fields: Vec<(String, String)>) -> Self {
        Self { index, fields }
    }

    /// Look up a column value by name.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }
}

// ---------------------------------------------------------------------------
// Row lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle states of a row under processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Pending,
    Researching,
    Generating,
    Validating,
    Done,
    Failed,
}

impl RowStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Researching => "researching",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RowStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "researching" => Ok(Self::Researching),
            "generating" => Ok(Self::Generating),
            "validating" => Ok(Self::Validating),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown row status: {other}")),
        }
    }
}

/// Terminal result of processing one row.
#[derive(Debug, Clone)]
pub struct RowOutcome {
    /// Stable index in the input dataset.
    pub row_index: usize,
    /// Terminal status (`Done`, `Failed`, or `Pending` when interrupted
    /// before reaching a safe checkpoint).
    pub status: RowStatus,
    /// Validated output columns, populated on success.
    pub output_fields: Option<BTreeMap<String, String>>,
    /// Evidence URLs backing the output, for the `sources` column.
    pub sources: Vec<String>,
    /// Error description, populated on terminal failure.
    pub error: Option<String>,
    /// Number of generate calls made (including re-prompts).
    pub generate_attempts: u32,
    /// Number of research-loop iterations performed.
    pub research_iterations: u32,
    /// Whether this outcome was served from the cache store.
    pub from_cache: bool,
}

impl RowOutcome {
    /// Outcome for a row that was cancelled before its next checkpoint.
    /// Nothing is persisted; the row resumes from `Pending` on the next run.
    pub fn interrupted(row_index: usize) -> Self {
        Self {
            row_index,
            status: RowStatus::Pending,
            output_fields: None,
            sources: Vec::new(),
            error: None,
            generate_attempts: 0,
            research_iterations: 0,
            from_cache: false,
        }
    }
}

/// End-of-run counts reported to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub done: usize,
    pub failed: usize,
    /// Rows short-circuited by a cache hit.
    pub skipped: usize,
    /// Rows abandoned mid-flight by cancellation (not persisted).
    pub interrupted: usize,
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

/// One search hit as returned by a search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// A document gathered during a row's research loop.
#[derive(Debug, Clone)]
pub struct EvidenceDoc {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Full extracted page text, when the fetch succeeded.
    pub text: Option<String>,
}

/// All evidence accumulated for one row. Discarded once the row reaches
/// its generating phase's completion.
#[derive(Debug, Clone, Default)]
pub struct Evidence {
    pub docs: Vec<EvidenceDoc>,
}

impl Evidence {
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// URLs of all gathered documents, for the output `sources` column.
    pub fn sources(&self) -> Vec<&str> {
        self.docs.iter().map(|d| d.url.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Output schema
// ---------------------------------------------------------------------------

/// Semantic type of an output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Enum,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Enum => "enum",
        }
    }
}

/// Declaration of one output column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Output column name.
    pub name: String,
    /// Semantic type.
    #[serde(rename = "type")]
    pub kind: FieldType,
    /// Whether the model must produce this field.
    #[serde(default)]
    pub required: bool,
    /// Closed set of accepted values (enum fields only).
    #[serde(default)]
    pub options: Vec<String>,
    /// Free-text description passed to the model as a schema hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The declared shape of the model's structured output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSchema {
    pub fields: Vec<FieldSpec>,
}

impl OutputSchema {
    /// Look up a field declaration by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Output column names in declared order.
    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}
