//! # Configuration
//!
//! `fili.toml` is read once at start-up. Every feature flag that decides which
//! handler stages get wired lives here, so the chain topology is fixed by the
//! time the first request arrives.

use fili_core::{Interval, SimplifiedIntervalList};
use fili_druid::DruidServiceConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("ttl and signature caching are mutually exclusive; enable at most one")]
    ConflictingCacheModes,

    #[error("split policy fixed_buckets needs a positive bucket count")]
    InvalidSplitBuckets,

    #[error("availability for table '{table}' is malformed: {reason}")]
    InvalidAvailability { table: String, reason: String },
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub druid: DruidConfig,
    pub workflow: WorkflowConfig,
    pub cache: CacheConfig,
    pub volatility: VolatilityConfig,
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Overall deadline for one data request, Druid calls included.
    pub response_timeout_ms: u64,
    pub metadata_refresh_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:9998".into(),
            response_timeout_ms: 660_000,
            metadata_refresh_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DruidConfig {
    pub ui: DruidServiceConfig,
    pub non_ui: DruidServiceConfig,
    /// Segment metadata source. Without one, only static availability is used.
    pub coordinator: Option<DruidServiceConfig>,
}

impl Default for DruidConfig {
    fn default() -> Self {
        Self {
            ui: DruidServiceConfig::new("ui", "http://localhost:8082/druid/v2", 60_000, Some(1)),
            non_ui: DruidServiceConfig::new("non_ui", "http://localhost:8082/druid/v2", 600_000, Some(0)),
            coordinator: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialDataPolicy {
    Allow,
    #[default]
    Reject,
}

/// How a query's intervals are cut into concurrently dispatched slices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Cut at every availability boundary inside the requested intervals.
    #[default]
    AvailabilityGaps,
    /// Consecutive runs of `buckets` grain buckets.
    FixedBuckets { buckets: usize },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub enabled: bool,
    pub policy: SplitPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub partial_data: PartialDataPolicy,
    /// 0 disables the Druid-reported uncovered interval check.
    pub uncovered_interval_limit: usize,
    /// 0 disables the weight check.
    pub query_weight_limit: u64,
    pub max_filter_clauses: usize,
    pub top_n_enabled: bool,
    pub split: SplitConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            partial_data: PartialDataPolicy::Reject,
            uncovered_interval_limit: 0,
            query_weight_limit: 100_000,
            max_filter_clauses: 1024,
            top_n_enabled: true,
            split: SplitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    None,
    Ttl,
    LocalSignature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_enabled: bool,
    pub signature_enabled: bool,
    pub ttl_secs: u64,
    pub max_entry_bytes: usize,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_enabled: false,
            signature_enabled: false,
            ttl_secs: 3600,
            max_entry_bytes: 1 << 20,
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn mode(&self) -> Result<CacheMode, ConfigError> {
        match (self.ttl_enabled, self.signature_enabled) {
            (true, true) => Err(ConfigError::ConflictingCacheModes),
            (true, false) => Ok(CacheMode::Ttl),
            (false, true) => Ok(CacheMode::LocalSignature),
            (false, false) => Ok(CacheMode::None),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityConfig {
    /// Trailing window applied to tables without their own entry. 0 means
    /// no table is volatile by default.
    pub default_window_secs: u64,
    pub tables: BTreeMap<String, u64>,
}

/// One `[[tables]]` entry: a physical table the service knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub name: String,
    /// Refresh from the coordinator when one is configured.
    pub poll: bool,
    /// Availability of every column without its own entry.
    pub availability: Vec<Interval>,
    pub columns: BTreeMap<String, Vec<Interval>>,
    /// Logical column name to physical column name.
    pub column_names: BTreeMap<String, String>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            poll: true,
            availability: Vec::new(),
            columns: BTreeMap::new(),
            column_names: BTreeMap::new(),
        }
    }
}

impl TableConfig {
    pub fn is_seeded(&self) -> bool {
        !self.availability.is_empty() || !self.columns.is_empty()
    }

    /// Seeded availability must already be sorted and disjoint.
    pub fn seeded_availability(
        &self,
    ) -> Result<(SimplifiedIntervalList, BTreeMap<String, SimplifiedIntervalList>), ConfigError> {
        let invalid = |e: fili_core::IntervalError| ConfigError::InvalidAvailability {
            table: self.name.clone(),
            reason: e.to_string(),
        };
        let default = SimplifiedIntervalList::try_from_sorted(self.availability.clone()).map_err(invalid)?;
        let columns = self
            .columns
            .iter()
            .map(|(column, intervals)| {
                SimplifiedIntervalList::try_from_sorted(intervals.clone())
                    .map(|list| (column.clone(), list))
                    .map_err(invalid)
            })
            .collect::<Result<_, _>>()?;
        Ok((default, columns))
    }
}

// =============================================================================
// Loading
// =============================================================================

impl Config {
    /// Read `path` when it exists, defaults otherwise.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content)?
        } else {
            tracing::info!("No config at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.mode()?;
        if let SplitPolicy::FixedBuckets { buckets: 0 } = self.workflow.split.policy {
            return Err(ConfigError::InvalidSplitBuckets);
        }
        for table in &self.tables {
            table.seeded_availability()?;
        }
        Ok(())
    }
}
