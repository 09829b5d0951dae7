use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Device scales and geometry constants
// ---------------------------------------------------------------------------

/// Cumulative dose as recorded by the device: integers 0..=25000 over a beam.
pub const DOSE_SCALE: f64 = 25_000.0;

/// Leaf positions are logged in device units; 51 units per physical unit.
pub const LEAF_POSITION_SCALE: f64 = 51.0;

/// Planned and logged gantry angles have zero points 180° apart;
/// `(540 - angle) mod 360` maps either convention onto the other.
pub const ANGLE_CONVERSION_BASE: f64 = 540.0;

/// Minimum mechanical leaf gap the planning system accepts, physical units.
pub const DEFAULT_MIN_LEAF_GAP: f64 = 0.7;

/// Field widths at or below this are treated as a closed leaf pair and left
/// alone by the gap correction.
pub const NEGLIGIBLE_FIELD_WIDTH: f64 = 0.02;

/// Margin placed on each side of the midpoint when a negative field width is
/// collapsed.
pub const FIELD_MARGIN: f64 = 0.01;

/// Exported plan labels are truncated to this many characters.
pub const PLAN_LABEL_MAX: usize = 13;

/// Prefix marking an exported plan as log-derived.
pub const EXPORT_LABEL_PREFIX: &str = "dyn_";

// ---------------------------------------------------------------------------
// Runtime configuration
// ---------------------------------------------------------------------------

/// Which planned quantity drives control-point selection from the log.
///
/// Segment-number selection existed in earlier device software but relied on
/// fields the current format no longer populates reliably; it is not offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickCriterion {
    Angle,
    Dose,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    #[serde(default = "default_criterion")]
    pub criterion: PickCriterion,
    /// Reconstruct from commanded instead of measured leaf positions.
    #[serde(default)]
    pub export_expected: bool,
    #[serde(default = "default_min_leaf_gap")]
    pub min_leaf_gap: f64,
}

fn default_criterion() -> PickCriterion {
    PickCriterion::Angle
}

fn default_min_leaf_gap() -> f64 {
    DEFAULT_MIN_LEAF_GAP
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            criterion: PickCriterion::Angle,
            export_expected: false,
            min_leaf_gap: DEFAULT_MIN_LEAF_GAP,
        }
    }
}

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_leaf_gap.is_finite() || self.min_leaf_gap <= NEGLIGIBLE_FIELD_WIDTH {
            return Err(ConfigError::Validation(format!(
                "min_leaf_gap must exceed {NEGLIGIBLE_FIELD_WIDTH}, got {}",
                self.min_leaf_gap
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    /// TOML parse / deserialization error.
    Parse(String),
    /// Value out of the accepted range.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "config parse error: {msg}"),
            Self::Validation(msg) => write!(f, "config validation error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
