//! Engine configuration.
//!
//! A tagged record with every knob the core consumes. Unknown keys are
//! deserialization errors, not silent no-ops.

use serde::Deserialize;

use strata_odb::gc::DEFAULT_GRACE_PERIOD_MS;
use strata_odb::StoreConfig;

use crate::RepoError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Blobs above this size are chunked (bytes).
    pub chunk_size: usize,
    /// Blobs below this size are super-chunk candidates (bytes).
    pub compaction_threshold: usize,
    pub min_blobs_for_compaction: usize,
    /// Minimum age before GC may delete an unreferenced object.
    pub grace_period_ms: i64,
    /// Backing-store key prefix for this repository.
    pub storage_prefix: String,
    pub flush_max_objects: usize,
    pub flush_max_bytes: usize,
    // Negotiation limits.
    pub max_rounds: u32,
    pub max_wants: usize,
    pub max_haves: usize,
    pub negotiation_timeout_ms: u64,
    pub max_capabilities: usize,
    pub max_ref_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2 * 1024 * 1024,
            compaction_threshold: 64 * 1024,
            min_blobs_for_compaction: 10,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            storage_prefix: String::new(),
            flush_max_objects: 256,
            flush_max_bytes: 8 * 1024 * 1024,
            max_rounds: 50,
            max_wants: 1000,
            max_haves: 10_000,
            negotiation_timeout_ms: 120_000,
            max_capabilities: 100,
            max_ref_length: 4096,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(body: &[u8]) -> Result<Self, RepoError> {
        serde_json::from_slice(body).map_err(|e| RepoError::Config(e.to_string()))
    }

    /// Defaults overridden by `GITSTRATA_*` environment variables.
    pub fn from_env() -> Result<Self, RepoError> {
        let mut config = Self::default();
        read_env("GITSTRATA_CHUNK_SIZE", &mut config.chunk_size)?;
        read_env(
            "GITSTRATA_COMPACTION_THRESHOLD",
            &mut config.compaction_threshold,
        )?;
        read_env(
            "GITSTRATA_MIN_BLOBS_FOR_COMPACTION",
            &mut config.min_blobs_for_compaction,
        )?;
        read_env("GITSTRATA_GRACE_PERIOD_MS", &mut config.grace_period_ms)?;
        read_env("GITSTRATA_MAX_WANTS", &mut config.max_wants)?;
        read_env("GITSTRATA_MAX_HAVES", &mut config.max_haves)?;
        read_env(
            "GITSTRATA_NEGOTIATION_TIMEOUT_MS",
            &mut config.negotiation_timeout_ms,
        )?;
        if let Ok(prefix) = std::env::var("GITSTRATA_STORAGE_PREFIX") {
            config.storage_prefix = prefix;
        }
        Ok(config)
    }

    /// The store-level slice of this configuration.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            chunk_size: self.chunk_size,
            compaction_threshold: self.compaction_threshold,
            min_blobs_for_compaction: self.min_blobs_for_compaction,
            flush_max_objects: self.flush_max_objects,
            flush_max_bytes: self.flush_max_bytes,
            prefix: self.storage_prefix.clone(),
            ..StoreConfig::default()
        }
    }
}

fn read_env<T: std::str::FromStr>(name: &str, into: &mut T) -> Result<(), RepoError> {
    match std::env::var(name) {
        Err(_) => Ok(()),
        Ok(raw) => {
            *into = raw
                .parse()
                .map_err(|_| RepoError::Config(format!("{name}={raw:?} is not valid")))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 2 * 1024 * 1024);
        assert_eq!(config.compaction_threshold, 64 * 1024);
        assert_eq!(config.min_blobs_for_compaction, 10);
        assert_eq!(config.max_rounds, 50);
        assert_eq!(config.max_wants, 1000);
        assert_eq!(config.max_haves, 10_000);
        assert_eq!(config.negotiation_timeout_ms, 120_000);
        assert_eq!(config.max_ref_length, 4096);
    }

    #[test]
    fn json_overrides() {
        let config =
            EngineConfig::from_json(br#"{"chunk_size": 1048576, "max_wants": 5}"#).unwrap();
        assert_eq!(config.chunk_size, 1_048_576);
        assert_eq!(config.max_wants, 5);
        // Everything else keeps its default.
        assert_eq!(config.max_haves, 10_000);
    }

    #[test]
    fn unknown_keys_are_errors() {
        let err = EngineConfig::from_json(br#"{"chunk_sise": 1}"#).unwrap_err();
        assert!(matches!(err, RepoError::Config(_)));
    }

    #[test]
    fn store_config_slice() {
        let mut config = EngineConfig::default();
        config.storage_prefix = "repos/a/".into();
        let store = config.store_config();
        assert_eq!(store.prefix, "repos/a/");
        assert_eq!(store.chunk_size, config.chunk_size);
    }
}
