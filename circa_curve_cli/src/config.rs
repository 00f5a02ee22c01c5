//! TOML configuration for the cycle model and aggregation defaults.
//!
//! ```toml
//! [cycle]
//! units_per_day = 1440
//! phase_cycle_length = 4
//! phase_offset = 2
//!
//! [aggregation]
//! pooling = "per-subject"
//! max_day = 14
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use circa_curve::{CycleModel, Pooling};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub cycle: CycleModel,

    #[serde(default)]
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregationConfig {
    /// Group combination policy for group and daily curves.
    #[serde(default)]
    pub pooling: Pooling,

    /// Last day materialized by the daily curves.
    #[serde(default = "default_max_day")]
    pub max_day: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            pooling: Pooling::default(),
            max_day: default_max_day(),
        }
    }
}

fn default_max_day() -> usize {
    14
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        // the cycle table is validated while deserializing
        let config: Config = toml::from_str(text)?;
        Ok(config)
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.cycle, CycleModel::default());
        assert_eq!(config.aggregation.max_day, 14);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = Config::from_toml(
            "[cycle]\nphase_offset = 3\n\n[aggregation]\npooling = \"pooled\"\n",
        )
        .unwrap();
        assert_eq!(config.cycle.phase_offset(), 3);
        assert_eq!(config.cycle.phase_cycle_length(), 4);
        assert_eq!(config.aggregation.pooling, Pooling::Pooled);
        assert_eq!(config.aggregation.max_day, 14);
    }

    #[test]
    fn invalid_cycle_is_rejected() {
        assert!(Config::from_toml("[cycle]\nbins_per_day = 7\n").is_err());
        assert!(Config::from_toml("[cycle]\nphase_cycle_length = 0\n").is_err());
        assert!(Config::from_toml("[cycle]\nunits_per_day = 0\n").is_err());
        assert!(
            Config::from_toml("[cycle]\nunits_per_day = 12\nbins_per_day = 24\n").is_err()
        );
    }
}
