//! SQL migration definitions for the Rowboat cache database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as a batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: jobs, row_cache",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Enrichment run metadata, for resume discovery
CREATE TABLE IF NOT EXISTS jobs (
    job_id             TEXT PRIMARY KEY,
    config_fingerprint TEXT NOT NULL,
    input_fingerprint  TEXT NOT NULL,
    status             TEXT NOT NULL,
    total_rows         INTEGER NOT NULL,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_fingerprints
    ON jobs(config_fingerprint, input_fingerprint);

-- Per-row results, keyed by hash(config_fingerprint, row_fingerprint)
CREATE TABLE IF NOT EXISTS row_cache (
    cache_key   TEXT PRIMARY KEY,
    job_id      TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
    row_index   INTEGER NOT NULL,
    status      TEXT NOT NULL,
    output_json TEXT,
    sources     TEXT,
    error       TEXT,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_row_cache_job ON row_cache(job_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
