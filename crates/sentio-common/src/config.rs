//! Sentio Config - Configuration Structures
//!
//! Configuration types for the Sentio engine. Supports loading from TOML
//! files and programmatic construction, with sensible defaults for every
//! knob.
//!
//! Key Features:
//! - Value store configuration (quotas)
//! - Query configuration (default depth, display rounding)
//! - Reducer configuration (schedule interval, simulate mode)
//!
//! @version 0.1.0
//! @author Sentio Development Team

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Store Configuration
// =============================================================================

/// Configuration for the value store and tag registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Default per-source row quota assigned to new data sources.
    pub default_quota: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { default_quota: 500 }
    }
}

// =============================================================================
// Query Configuration
// =============================================================================

/// Configuration for the query layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Depth used for latest-N and range queries when the request omits one.
    pub default_depth: usize,
    /// Decimal places used for numeric display rounding by default.
    pub default_round: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_depth: 50,
            default_round: 2,
        }
    }
}

// =============================================================================
// Reducer Configuration
// =============================================================================

/// Configuration for the retention reducer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducerConfig {
    /// Interval between scheduled reduction runs, in seconds.
    pub interval_seconds: u64,
    /// When true, reduction runs enumerate candidates without deleting.
    pub simulate: bool,
}

impl ReducerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            simulate: false,
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub reducer: ReducerConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::SentioError::Configuration(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
