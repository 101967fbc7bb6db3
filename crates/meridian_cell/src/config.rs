//! # Cell Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so a file
//! only needs to name what it changes:
//!
//! ```toml
//! tick_rate = 10
//! ghost_distance = 200.0
//!
//! [witness]
//! default_aoi_radius = 100.0
//! bandwidth_per_tick = 2048
//! lod_distances = [25.0, 50.0, 100.0]
//!
//! [[partition]]
//! address = { ip = 2130706433, port = 4001 }
//! min_x = -1000.0
//! min_z = -1000.0
//! max_x = 0.0
//! max_z = 1000.0
//! ```

use std::path::Path;

use meridian_shared::{DEFAULT_TICK_RATE, MAX_LOD_LEVELS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::space::CellRect;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}

/// Witness (area of interest) settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WitnessConfig {
    /// AoI radius used when a witness is enabled without one.
    pub default_aoi_radius: f32,
    /// Extra distance an entity must move past the radius before it leaves.
    pub default_hysteresis: f32,
    /// Bytes of client traffic a witness may produce per tick.
    pub bandwidth_per_tick: usize,
    /// Upper distance of each level of detail, nearest first.
    pub lod_distances: Vec<f32>,
    /// Smallest priority increase after an update, so close entities
    /// cannot starve distant ones.
    pub min_priority_delta: f64,
}

impl Default for WitnessConfig {
    fn default() -> Self {
        Self {
            default_aoi_radius: 500.0,
            default_hysteresis: 5.0,
            bandwidth_per_tick: 1400,
            lod_distances: vec![50.0, 150.0, 300.0],
            min_priority_delta: 0.05,
        }
    }
}

/// One cell's rectangle in the space partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// Cell address.
    pub address: meridian_shared::Address,
    /// Minimum X (inclusive).
    pub min_x: f32,
    /// Minimum Z (inclusive).
    pub min_z: f32,
    /// Maximum X (exclusive).
    pub max_x: f32,
    /// Maximum Z (exclusive).
    pub max_z: f32,
}

impl PartitionEntry {
    /// The rectangle this entry describes.
    #[must_use]
    pub const fn rect(&self) -> CellRect {
        CellRect::new(self.min_x, self.min_z, self.max_x, self.max_z)
    }
}

/// Cell application settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    /// Game ticks per second.
    pub tick_rate: u32,
    /// Distance from a neighbouring cell's edge inside which a real entity
    /// keeps a ghost there.
    pub ghost_distance: f32,
    /// Extra distance before an existing ghost is deleted.
    pub ghost_hysteresis: f32,
    /// Ticks between velocity samples of a real entity.
    pub velocity_sample_ticks: u64,
    /// Witness settings.
    pub witness: WitnessConfig,
    /// Space partition. May be empty for a single-cell space.
    pub partition: Vec<PartitionEntry>,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            ghost_distance: 500.0,
            ghost_hysteresis: 20.0,
            velocity_sample_ticks: 5,
            witness: WitnessConfig::default(),
            partition: Vec::new(),
        }
    }
}

impl CellConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse or fails
    /// [`CellConfig::validate`].
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be positive"));
        }
        if !(self.ghost_distance >= 0.0 && self.ghost_hysteresis >= 0.0) {
            return Err(ConfigError::Invalid("ghost distances must be >= 0"));
        }
        if self.velocity_sample_ticks == 0 {
            return Err(ConfigError::Invalid("velocity_sample_ticks must be positive"));
        }

        let witness = &self.witness;
        if !(witness.default_aoi_radius > 0.0 && witness.default_hysteresis >= 0.0) {
            return Err(ConfigError::Invalid("witness radius must be > 0, hysteresis >= 0"));
        }
        if witness.bandwidth_per_tick == 0 {
            return Err(ConfigError::Invalid("bandwidth_per_tick must be positive"));
        }
        if witness.lod_distances.is_empty() || witness.lod_distances.len() > MAX_LOD_LEVELS {
            return Err(ConfigError::Invalid("lod_distances needs 1..=MAX_LOD_LEVELS entries"));
        }
        if witness.lod_distances.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Invalid("lod_distances must be ascending"));
        }
        if witness.min_priority_delta <= 0.0 {
            return Err(ConfigError::Invalid("min_priority_delta must be positive"));
        }

        if self.partition.iter().any(|p| p.min_x >= p.max_x || p.min_z >= p.max_z) {
            return Err(ConfigError::Invalid("partition rectangles must be non-empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CellConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CellConfig::from_toml_str(
            r#"
            ghost_distance = 120.0

            [witness]
            bandwidth_per_tick = 4096
            "#,
        )
        .unwrap();

        assert!((config.ghost_distance - 120.0).abs() < f32::EPSILON);
        assert_eq!(config.witness.bandwidth_per_tick, 4096);
        assert_eq!(config.tick_rate, DEFAULT_TICK_RATE);
        assert_eq!(config.witness.lod_distances, vec![50.0, 150.0, 300.0]);
    }

    #[test]
    fn test_partition_entries() {
        let config = CellConfig::from_toml_str(
            r#"
            [[partition]]
            address = { ip = 2130706433, port = 4001 }
            min_x = -100.0
            min_z = -100.0
            max_x = 0.0
            max_z = 100.0
            "#,
        )
        .unwrap();

        assert_eq!(config.partition.len(), 1);
        assert!(config.partition[0].rect().contains(-50.0, 0.0));
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = CellConfig::from_toml_str("tick_rate = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CellConfig::from_toml_str("[witness]\nlod_distances = [10.0, 5.0]").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CellConfig::from_toml_str("tick_rate = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
