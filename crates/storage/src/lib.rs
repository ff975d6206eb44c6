//! libSQL cache store for resumable enrichment runs.
//!
//! The [`CacheStore`] persists one [`JobRecord`] per run and one
//! [`CacheEntry`] per completed row, keyed by
//! `hash(config_fingerprint, row_fingerprint)`. Row writes are idempotent
//! upserts; concurrent row pipelines never contend on the same key because
//! keys are row-unique within a job.

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};

use rowboat_shared::{JobId, Result, RowStatus, RowboatError};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Lifecycle states of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Completed,
    Interrupted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = RowboatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "interrupted" => Ok(Self::Interrupted),
            other => Err(RowboatError::Storage(format!("unknown job status: {other}"))),
        }
    }
}

/// One enrichment run's metadata.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: JobId,
    pub config_fingerprint: String,
    pub input_fingerprint: String,
    pub status: JobStatus,
    pub total_rows: usize,
    pub created_at: String,
    pub updated_at: String,
}

/// One persisted row result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub cache_key: String,
    pub job_id: JobId,
    pub row_index: usize,
    pub status: RowStatus,
    /// JSON object of validated output fields, present when `status` is done.
    pub output_json: Option<String>,
    /// Evidence URLs backing the output.
    pub sources: Vec<String>,
    pub error: Option<String>,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct CacheStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl CacheStore {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RowboatError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| RowboatError::Storage(e.to_string()))?;

        // The schema's REFERENCES clauses are documentation only; cascades
        // are handled explicitly (see `purge_job`), so keep enforcement off.
        conn.execute("PRAGMA foreign_keys = OFF", params![])
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    RowboatError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Job operations
    // -----------------------------------------------------------------------

    /// Insert a new job record in `running` status.
    pub async fn insert_job(
        &self,
        job_id: &JobId,
        config_fingerprint: &str,
        input_fingerprint: &str,
        total_rows: usize,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO jobs (job_id, config_fingerprint, input_fingerprint, status, total_rows, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'running', ?4, ?5, ?6)",
                params![
                    job_id.to_string(),
                    config_fingerprint,
                    input_fingerprint,
                    total_rows as i64,
                    now.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT job_id, config_fingerprint, input_fingerprint, status, total_rows, created_at, updated_at
                 FROM jobs WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(RowboatError::Storage(e.to_string())),
        }
    }

    /// Find the most recent `running` job matching both fingerprints,
    /// for auto-resume.
    pub async fn find_resumable_job(
        &self,
        config_fingerprint: &str,
        input_fingerprint: &str,
    ) -> Result<Option<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT job_id, config_fingerprint, input_fingerprint, status, total_rows, created_at, updated_at
                 FROM jobs
                 WHERE config_fingerprint = ?1 AND input_fingerprint = ?2 AND status != 'completed'
                 ORDER BY updated_at DESC
                 LIMIT 1",
                params![config_fingerprint, input_fingerprint],
            )
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(RowboatError::Storage(e.to_string())),
        }
    }

    /// Transition a job's status.
    pub async fn update_job_status(&self, job_id: &JobId, status: JobStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE job_id = ?3",
                params![status.as_str(), now.as_str(), job_id.to_string()],
            )
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Count cached rows for a job, per status. Returns `(done, failed)`.
    pub async fn count_results(&self, job_id: &JobId) -> Result<(usize, usize)> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM row_cache WHERE job_id = ?1 GROUP BY status",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;

        let (mut done, mut failed) = (0usize, 0usize);
        while let Ok(Some(row)) = rows.next().await {
            let status: String = row
                .get(0)
                .map_err(|e| RowboatError::Storage(e.to_string()))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| RowboatError::Storage(e.to_string()))?;
            match status.as_str() {
                "done" => done = count as usize,
                "failed" => failed = count as usize,
                _ => {}
            }
        }
        Ok((done, failed))
    }

    // -----------------------------------------------------------------------
    // Row cache operations
    // -----------------------------------------------------------------------

    /// Look up a cached row result by key.
    pub async fn lookup(&self, cache_key: &str) -> Result<Option<CacheEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT cache_key, job_id, row_index, status, output_json, sources, error, created_at
                 FROM row_cache WHERE cache_key = ?1",
                params![cache_key],
            )
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_entry(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(RowboatError::Storage(e.to_string())),
        }
    }

    /// Store a row result (idempotent upsert on `cache_key`).
    pub async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let sources_json = if entry.sources.is_empty() {
            None
        } else {
            serde_json::to_string(&entry.sources).ok()
        };
        self.conn
            .execute(
                "INSERT INTO row_cache (cache_key, job_id, row_index, status, output_json, sources, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(cache_key) DO UPDATE SET
                   job_id = excluded.job_id,
                   row_index = excluded.row_index,
                   status = excluded.status,
                   output_json = excluded.output_json,
                   sources = excluded.sources,
                   error = excluded.error,
                   created_at = excluded.created_at",
                params![
                    entry.cache_key.as_str(),
                    entry.job_id.to_string(),
                    entry.row_index as i64,
                    entry.status.as_str(),
                    entry.output_json.as_deref(),
                    sources_json.as_deref(),
                    entry.error.as_deref(),
                    entry.created_at.as_str(),
                ],
            )
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;
        Ok(())
    }

    /// All cached results for a job, ordered by row index.
    pub async fn results_for_job(&self, job_id: &JobId) -> Result<Vec<CacheEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT cache_key, job_id, row_index, status, output_json, sources, error, created_at
                 FROM row_cache WHERE job_id = ?1 ORDER BY row_index",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_entry(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Delete a job and its cached rows.
    pub async fn purge_job(&self, job_id: &JobId) -> Result<()> {
        // libSQL does not enforce cascades without foreign_keys pragma,
        // so delete rows explicitly first.
        self.conn
            .execute(
                "DELETE FROM row_cache WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;
        self.conn
            .execute(
                "DELETE FROM jobs WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Delete everything.
    pub async fn purge_all(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM row_cache", params![])
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;
        self.conn
            .execute("DELETE FROM jobs", params![])
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Delete jobs (and their rows) not updated in the last `days` days.
    /// Returns the number of jobs removed.
    pub async fn purge_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = (Utc::now() - chrono::Duration::days(i64::from(days))).to_rfc3339();
        self.conn
            .execute(
                "DELETE FROM row_cache WHERE job_id IN
                   (SELECT job_id FROM jobs WHERE updated_at < ?1)",
                params![cutoff.as_str()],
            )
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM jobs WHERE updated_at < ?1",
                params![cutoff.as_str()],
            )
            .await
            .map_err(|e| RowboatError::Storage(e.to_string()))?;
        Ok(removed as usize)
    }
}

/// Convert a database row to a [`JobRecord`].
fn row_to_job(row: &libsql::Row) -> Result<JobRecord> {
    let job_id: String = row
        .get(0)
        .map_err(|e| RowboatError::Storage(e.to_string()))?;
    let status: String = row
        .get(3)
        .map_err(|e| RowboatError::Storage(e.to_string()))?;
    Ok(JobRecord {
        job_id: job_id
            .parse()
            .map_err(|e| RowboatError::Storage(format!("invalid job id: {e}")))?,
        config_fingerprint: row
            .get(1)
            .map_err(|e| RowboatError::Storage(e.to_string()))?,
        input_fingerprint: row
            .get(2)
            .map_err(|e| RowboatError::Storage(e.to_string()))?,
        status: status.parse()?,
        total_rows: row
            .get::<i64>(4)
            .map_err(|e| RowboatError::Storage(e.to_string()))? as usize,
        created_at: row
            .get(5)
            .map_err(|e| RowboatError::Storage(e.to_string()))?,
        updated_at: row
            .get(6)
            .map_err(|e| RowboatError::Storage(e.to_string()))?,
    })
}

/// Convert a database row to a [`CacheEntry`].
fn row_to_entry(row: &libsql::Row) -> Result<CacheEntry> {
    let job_id: String = row
        .get(1)
        .map_err(|e| RowboatError::Storage(e.to_string()))?;
    let status: String = row
        .get(3)
        .map_err(|e| RowboatError::Storage(e.to_string()))?;
    Ok(CacheEntry {
        cache_key: row
            .get(0)
            .map_err(|e| RowboatError::Storage(e.to_string()))?,
        job_id: job_id
            .parse()
            .map_err(|e| RowboatError::Storage(format!("invalid job id: {e}")))?,
        row_index: row
            .get::<i64>(2)
            .map_err(|e| RowboatError::Storage(e.to_string()))? as usize,
        status: status
            .parse()
            .map_err(RowboatError::Storage)?,
        output_json: row.get::<String>(4).ok(),
        sources: row
            .get::<String>(5)
            .ok()
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default(),
        error: row.get::<String>(6).ok(),
        created_at: row
            .get(7)
            .map_err(|e| RowboatError::Storage(e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file store for testing.
    async fn test_store() -> CacheStore {
        let tmp = std::env::temp_dir().join(format!("rowboat_test_{}.db", Uuid::now_v7()));
        CacheStore::open(&tmp).await.expect("open test db")
    }

    fn entry(job_id: &JobId, key: &str, row_index: usize, status: RowStatus) -> CacheEntry {
        CacheEntry {
            cache_key: key.into(),
            job_id: job_id.clone(),
            row_index,
            status,
            output_json: Some(r#"{"industry":"SaaS"}"#.into()),
            sources: vec!["https://example.com/doc0".into()],
            error: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("rowboat_test_{}.db", Uuid::now_v7()));
        let s1 = CacheStore::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = CacheStore::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn job_lifecycle() {
        let store = test_store().await;
        let job_id = JobId::new();

        store
            .insert_job(&job_id, "cfg-fp", "input-fp", 10)
            .await
            .expect("insert job");

        let job = store.get_job(&job_id).await.expect("get job").expect("job exists");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.total_rows, 10);
        assert_eq!(job.config_fingerprint, "cfg-fp");

        store
            .update_job_status(&job_id, JobStatus::Completed)
            .await
            .expect("update status");
        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn resumable_job_discovery() {
        let store = test_store().await;
        let running = JobId::new();
        let completed = JobId::new();

        store
            .insert_job(&completed, "cfg", "input", 5)
            .await
            .unwrap();
        store
            .update_job_status(&completed, JobStatus::Completed)
            .await
            .unwrap();
        store.insert_job(&running, "cfg", "input", 5).await.unwrap();

        let found = store
            .find_resumable_job("cfg", "input")
            .await
            .expect("query")
            .expect("found");
        assert_eq!(found.job_id, running);

        // Different fingerprints never resume
        assert!(store
            .find_resumable_job("cfg", "other-input")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_resumable_job("other-cfg", "input")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn lookup_and_upsert() {
        let store = test_store().await;
        let job_id = JobId::new();
        store.insert_job(&job_id, "cfg", "input", 3).await.unwrap();

        // Miss
        assert!(store.lookup("key-1").await.expect("lookup").is_none());

        // Hit after write
        store
            .upsert(&entry(&job_id, "key-1", 0, RowStatus::Done))
            .await
            .expect("upsert");
        let found = store.lookup("key-1").await.unwrap().expect("entry");
        assert_eq!(found.row_index, 0);
        assert_eq!(found.status, RowStatus::Done);
        assert_eq!(found.output_json.as_deref(), Some(r#"{"industry":"SaaS"}"#));
        assert_eq!(found.sources, vec!["https://example.com/doc0".to_string()]);

        // Upsert again with new payload is idempotent, not duplicating
        let mut updated = entry(&job_id, "key-1", 0, RowStatus::Done);
        updated.output_json = Some(r#"{"industry":"Fintech"}"#.into());
        store.upsert(&updated).await.expect("second upsert");
        let found = store.lookup("key-1").await.unwrap().unwrap();
        assert!(found.output_json.unwrap().contains("Fintech"));

        let all = store.results_for_job(&job_id).await.expect("list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn failed_entry_roundtrip() {
        let store = test_store().await;
        let job_id = JobId::new();
        store.insert_job(&job_id, "cfg", "input", 1).await.unwrap();

        let failed = CacheEntry {
            cache_key: "key-f".into(),
            job_id: job_id.clone(),
            row_index: 2,
            status: RowStatus::Failed,
            output_json: None,
            sources: Vec::new(),
            error: Some("validation error: missing field".into()),
            created_at: Utc::now().to_rfc3339(),
        };
        store.upsert(&failed).await.unwrap();

        let found = store.lookup("key-f").await.unwrap().unwrap();
        assert_eq!(found.status, RowStatus::Failed);
        assert!(found.output_json.is_none());
        assert!(found.error.unwrap().contains("missing field"));
    }

    #[tokio::test]
    async fn count_results_by_status() {
        let store = test_store().await;
        let job_id = JobId::new();
        store.insert_job(&job_id, "cfg", "input", 3).await.unwrap();

        store
            .upsert(&entry(&job_id, "k0", 0, RowStatus::Done))
            .await
            .unwrap();
        store
            .upsert(&entry(&job_id, "k1", 1, RowStatus::Done))
            .await
            .unwrap();
        store
            .upsert(&entry(&job_id, "k2", 2, RowStatus::Failed))
            .await
            .unwrap();

        let (done, failed) = store.count_results(&job_id).await.expect("count");
        assert_eq!(done, 2);
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn purge_job_removes_rows() {
        let store = test_store().await;
        let keep = JobId::new();
        let drop_me = JobId::new();
        store.insert_job(&keep, "cfg-a", "in", 1).await.unwrap();
        store.insert_job(&drop_me, "cfg-b", "in", 1).await.unwrap();
        store
            .upsert(&entry(&keep, "k-keep", 0, RowStatus::Done))
            .await
            .unwrap();
        store
            .upsert(&entry(&drop_me, "k-drop", 0, RowStatus::Done))
            .await
            .unwrap();

        store.purge_job(&drop_me).await.expect("purge");

        assert!(store.get_job(&drop_me).await.unwrap().is_none());
        assert!(store.lookup("k-drop").await.unwrap().is_none());
        assert!(store.lookup("k-keep").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_all_empties_store() {
        let store = test_store().await;
        let job_id = JobId::new();
        store.insert_job(&job_id, "cfg", "in", 1).await.unwrap();
        store
            .upsert(&entry(&job_id, "k", 0, RowStatus::Done))
            .await
            .unwrap();

        store.purge_all().await.expect("purge all");
        assert!(store.get_job(&job_id).await.unwrap().is_none());
        assert!(store.lookup("k").await.unwrap().is_none());
    }
}
