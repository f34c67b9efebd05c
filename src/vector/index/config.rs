//! Configuration types for vector indexes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VicinityError};

/// Upper bound on M; larger values are clamped with a warning.
pub const MAX_M: usize = 10_000;

/// Configuration for HNSW index construction and search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswIndexConfig {
    /// Capacity of the node arena.
    pub max_elements: usize,
    /// Maximum number of connections per node on upper layers (layer 0 allows 2*M).
    pub m: usize,
    /// Size of the candidate set during construction.
    pub ef_construction: usize,
    /// Size of the candidate set during search.
    pub ef_search: usize,
    /// Seed for level assignment.
    pub seed: u64,
    /// Whether tombstoned slots may be reused by later insertions.
    pub allow_replace_deleted: bool,
}

impl Default for HnswIndexConfig {
    fn default() -> Self {
        Self {
            max_elements: 10_000,
            m: 16,
            ef_construction: 200,
            ef_search: 10,
            seed: 100,
            allow_replace_deleted: false,
        }
    }
}

impl HnswIndexConfig {
    /// Create a configuration with the given capacity and default parameters.
    pub fn new(max_elements: usize) -> Self {
        Self {
            max_elements,
            ..Default::default()
        }
    }

    /// Set the M parameter (connections per node).
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    /// Set the ef_construction parameter.
    pub fn with_ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn with_ef_search(mut self, ef_search: usize) -> Self {
        self.ef_search = ef_search;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_allow_replace_deleted(mut self, allow: bool) -> Self {
        self.allow_replace_deleted = allow;
        self
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.max_elements == 0 {
            return Err(VicinityError::invalid_argument("max_elements must be > 0"));
        }
        if self.max_elements > u32::MAX as usize {
            return Err(VicinityError::invalid_argument(format!(
                "max_elements must be <= {}",
                u32::MAX
            )));
        }
        if self.m == 0 {
            return Err(VicinityError::invalid_argument("M must be > 0"));
        }
        Ok(())
    }

    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            VicinityError::invalid_argument(format!("Invalid HNSW configuration: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            VicinityError::invalid_argument(format!("Failed to serialize configuration: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hnsw_config_defaults() {
        let config = HnswIndexConfig::new(128);
        assert_eq!(config.max_elements, 128);
        assert_eq!(config.m, 16);
        assert_eq!(config.ef_search, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hnsw_config_validation() {
        let mut config = HnswIndexConfig::new(0);
        assert!(config.validate().is_err());

        config.max_elements = 128;
        config.m = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_partial_config() {
        let config = HnswIndexConfig::from_json_str(r#"{"max_elements": 50, "m": 8}"#).unwrap();
        assert_eq!(config.max_elements, 50);
        assert_eq!(config.m, 8);
        assert_eq!(config.ef_construction, 200);

        let json = config.to_json_string().unwrap();
        assert_eq!(HnswIndexConfig::from_json_str(&json).unwrap(), config);

        assert!(HnswIndexConfig::from_json_str(r#"{"m": 0}"#).is_err());
        assert!(HnswIndexConfig::from_json_str("not json").is_err());
    }
}
