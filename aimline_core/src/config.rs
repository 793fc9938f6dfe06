//! Rig configuration - one calibrated struct per component, loadable from JSON.
//!
//! Every field has a default taken from the calibrated pistol rig, and every
//! struct is `#[serde(default)]`, so a config file only needs the values it
//! overrides:
//!
//! ```json
//! {
//!   "pose": { "position_sensitivity": 3.5 },
//!   "reload": { "duration": 1.6 }
//! }
//! ```

use crate::aimline_geometry::{GeometryConfig, GeometryError};
use crate::aimline_pose::PoseConfig;
use crate::aimline_reload::ReloadConfig;
use crate::aimline_weapon::WeaponConfig;
use crate::tracker_runtime::TrackerConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Invalid geometry: {0}")]
    Geometry(#[from] GeometryError),
}

impl ConfigError {
    /// Creates an invalid-value error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Rejects non-finite or non-positive values.
pub(crate) fn require_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(format!("{} must be positive, got {}", name, value)))
    }
}

/// Complete rig calibration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub geometry: GeometryConfig,
    pub pose: PoseConfig,
    pub reload: ReloadConfig,
    pub weapon: WeaponConfig,
    pub tracker: TrackerConfig,
}

impl RigConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Checks every component.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.geometry.validate()?;
        self.pose.validate()?;
        self.reload.validate()?;
        self.weapon.validate()?;
        self.tracker.validate()?;
        Ok(())
    }

    /// Pretty JSON of the effective configuration.
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
