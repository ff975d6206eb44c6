//! Deterministic fingerprints for cache keying.
//!
//! A cache key is `sha256(config_fingerprint || row_fingerprint)`: any change
//! to the resolved job configuration or to a row's input fields yields a new
//! key, so stale output is never silently reused.

use sha2::{Digest, Sha256};

use crate::config::JobConfig;
use crate::error::{Result, RowboatError};
use crate::types::Row;

/// SHA-256 hex digest of a byte string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of the fully-resolved job configuration.
///
/// Serializes the config (struct field order is stable) so every setting
/// that influences output — prompts, schema, model, search, research mode —
/// is part of the key. Cache settings themselves are excluded: toggling
/// `cache_failures` must not invalidate prior results.
pub fn fingerprint_config(config: &JobConfig) -> Result<String> {
    let mut stripped = config.clone();
    stripped.cache = Default::default();
    stripped.output_csv = None;
    let json = serde_json::to_string(&stripped)
        .map_err(|e| RowboatError::config(format!("config not serializable: {e}")))?;
    Ok(hash_bytes(json.as_bytes()))
}

/// Fingerprint of one row's input fields, in column order.
pub fn fingerprint_row(row: &Row) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in &row.fields {
        hasher.update(name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.as_bytes());
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of the whole input dataset, for resume discovery.
pub fn fingerprint_dataset(rows: &[Row]) -> String {
    let mut hasher = Sha256::new();
    for row in rows {
        hasher.update(fingerprint_row(row).as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Cache key for one row under one configuration.
pub fn cache_key(config_fingerprint: &str, row_fingerprint: &str) -> String {
    hash_bytes(format!("{config_fingerprint}:{row_fingerprint}").as_bytes())
}
