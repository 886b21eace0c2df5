//! Run configuration.
//!
//! Every section is `#[serde(default)]`, so a partial TOML document only
//! needs to name the values it changes:
//!
//! ```toml
//! seed = 7
//! warmup_time = 600.0
//!
//! [statistics]
//! max_data_points = 5000
//! file_level = "footprint"
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use stowage_stats::{DEFAULT_MAX_DATA_POINTS, DEFAULT_SUMMARY_SOFT_LIMIT, SeriesConfig};

use crate::error::KernelError;
use crate::fixed::SimTime;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[cfg(feature = "config-toml")]
    #[error("malformed configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// What happens to flushed series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatFileLevel {
    /// Every flushed point reaches the sink.
    All,
    /// Flushed points are dropped; only counters and summaries survive.
    Footprint,
}

impl FromStr for StatFileLevel {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(StatFileLevel::All),
            "footprint" | "footprintonly" | "footprint-only" => Ok(StatFileLevel::Footprint),
            _ => Err(KernelError::UnknownVariant {
                selector: "statistics file level",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Cap of every bounded series.
    pub max_data_points: usize,
    /// Length after which a summary list logs a warning.
    pub summary_soft_limit: usize,
    /// Fill-level sampling period of the statistics observer. 0 disables it.
    pub observer_interval: f64,
    /// `"all"` or `"footprint"`.
    pub file_level: String,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            max_data_points: DEFAULT_MAX_DATA_POINTS,
            summary_soft_limit: DEFAULT_SUMMARY_SOFT_LIMIT,
            observer_interval: 60.0,
            file_level: "all".to_string(),
        }
    }
}

/// How a run reacts to sanity findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanityPolicy {
    /// Log every finding and start anyway.
    #[default]
    Warn,
    /// Refuse to start when there is any finding.
    Refuse,
    /// Start without looking.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SanityConfig {
    pub policy: SanityPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    /// Fail the run on the first detected collision.
    pub abort_on_collision: bool,
    /// Count a bot leaving its tier's bounds as a collision.
    pub check_tier_bounds: bool,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            abort_on_collision: false,
            check_tier_bounds: true,
        }
    }
}

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_ORDER_UNITS: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed of the kernel RNG handed to subsystems.
    pub seed: u64,
    /// Time simulated before statistics are reset.
    pub warmup_time: SimTime,
    /// Measured time after the warmup.
    pub simulation_time: SimTime,
    /// Lower bound on the length of one tick in the event-driven loop.
    pub min_update_interval: SimTime,
    /// Reconcile capacity totals against a full scan every tick.
    pub verify_capacity_each_tick: bool,
    /// Largest order, in units, the kernel accepts. Each unit becomes one
    /// extract request.
    pub max_order_units: u64,
    pub statistics: StatisticsConfig,
    pub sanity: SanityConfig,
    pub collision: CollisionConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            warmup_time: 0.0,
            simulation_time: 3600.0,
            min_update_interval: 0.0,
            verify_capacity_each_tick: false,
            max_order_units: DEFAULT_MAX_ORDER_UNITS,
            statistics: StatisticsConfig::default(),
            sanity: SanityConfig::default(),
            collision: CollisionConfig::default(),
        }
    }
}

impl SimConfig {
    /// Parse and validate a TOML document.
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(text: &str) -> Result<Self, KernelError> {
        let config: SimConfig = toml::from_str(text).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and selectors.
    pub fn validate(&self) -> Result<(), KernelError> {
        fn non_negative(field: &'static str, v: f64) -> Result<(), ConfigError> {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a finite, non-negative number, got {v}"),
                })
            }
        }

        non_negative("warmup_time", self.warmup_time)?;
        non_negative("simulation_time", self.simulation_time)?;
        non_negative("min_update_interval", self.min_update_interval)?;
        non_negative("statistics.observer_interval", self.statistics.observer_interval)?;
        if self.statistics.max_data_points == 0 {
            return Err(ConfigError::Invalid {
                field: "statistics.max_data_points",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.max_order_units == 0 {
            return Err(ConfigError::Invalid {
                field: "max_order_units",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        self.file_level()?;
        Ok(())
    }

    pub fn file_level(&self) -> Result<StatFileLevel, KernelError> {
        self.statistics.file_level.parse()
    }

    pub fn series_config(&self) -> SeriesConfig {
        SeriesConfig {
            max_points: self.statistics.max_data_points,
            summary_soft_limit: self.statistics.summary_soft_limit,
        }
    }
}
