// Engine configuration.
// Read from `ward_resilience.toml` in the working directory or from the path
// in the `WARD_RESILIENCE_CONFIG` environment variable. Every field has a
// default, so an empty file (or no file) yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::crs::Crs;
use crate::error::{EngineError, Result};

pub const CONFIG_ENV: &str = "WARD_RESILIENCE_CONFIG";
pub const CONFIG_FILE: &str = "ward_resilience.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_target_crs")]
    pub target_crs: Crs,
    #[serde(default)]
    pub normalization: NormalizationMethod,
    /// Rescale composites so the most vulnerable ward scores 100.
    #[serde(default = "default_true")]
    pub stretch_to_max: bool,
    #[serde(default = "default_min_ward_area")]
    pub min_ward_area_sqkm: f64,
    #[serde(default)]
    pub weights: Weights,
    #[serde(default)]
    pub directions: Directions,
    #[serde(default)]
    pub bands: Bands,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub rainfall: RainfallConfig,
    #[serde(default)]
    pub join: JoinConfig,
}

fn default_target_crs() -> Crs {
    Crs::Utm { zone: 43, north: true }
}

fn default_min_ward_area() -> f64 {
    1e-6
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_crs: default_target_crs(),
            normalization: NormalizationMethod::default(),
            stretch_to_max: true,
            min_ward_area_sqkm: default_min_ward_area(),
            weights: Weights::default(),
            directions: Directions::default(),
            bands: Bands::default(),
            grid: GridConfig::default(),
            rainfall: RainfallConfig::default(),
            join: JoinConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    #[default]
    MinMax,
    Percentile,
}

/// Composite weights. Must be non-negative and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub drain_density: f64,
    pub incident_count: f64,
    pub lowlying_fraction: f64,
    pub rainfall_anomaly: f64,
    /// Incidents within the buffer around the ward; off unless configured.
    pub proximity_incidents: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            drain_density: 0.25,
            incident_count: 0.35,
            lowlying_fraction: 0.25,
            rainfall_anomaly: 0.15,
            proximity_incidents: 0.0,
        }
    }
}

impl Weights {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.drain_density,
            self.incident_count,
            self.lowlying_fraction,
            self.rainfall_anomaly,
            self.proximity_incidents,
        ]
    }

    pub fn validate(&self) -> Result<()> {
        let w = self.as_array();
        if w.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(EngineError::Config("weights must be finite and non-negative".into()));
        }
        let sum: f64 = w.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::Config(format!("weights sum to {}, expected 1", sum)));
        }
        Ok(())
    }
}

/// Per-factor direction. `true` means a lower raw value is the more
/// vulnerable one, so the normalized value is flipped to `1 - n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Directions {
    pub invert_drain_density: bool,
    pub invert_incident_count: bool,
    pub invert_lowlying_fraction: bool,
    pub invert_rainfall_anomaly: bool,
    pub invert_proximity_incidents: bool,
}

impl Directions {
    pub fn as_array(&self) -> [bool; 5] {
        [
            self.invert_drain_density,
            self.invert_incident_count,
            self.invert_lowlying_fraction,
            self.invert_rainfall_anomaly,
            self.invert_proximity_incidents,
        ]
    }
}

/// Lower bounds of the three upper category bands on the 0..=100 scale
/// (0 = most resilient). Anything below `moderate` is High Resilience.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bands {
    pub extreme: f64,
    pub high: f64,
    pub moderate: f64,
}

impl Default for Bands {
    fn default() -> Self {
        Self { extreme: 85.0, high: 60.0, moderate: 35.0 }
    }
}

impl Bands {
    pub fn validate(&self) -> Result<()> {
        let ok = 0.0 < self.moderate
            && self.moderate < self.high
            && self.high < self.extreme
            && self.extreme < 100.0;
        if ok {
            Ok(())
        } else {
            Err(EngineError::Config(format!(
                "band thresholds must satisfy 0 < moderate < high < extreme < 100, got {:?}",
                self
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Edge of a hotspot cell, in target CRS units (metres).
    pub cell_size_m: f64,
    pub search_radius_m: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { cell_size_m: 250.0, search_radius_m: 500.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RainfallResolution {
    /// One anomaly for the whole city, applied to every ward.
    #[default]
    CityWide,
    /// Records tagged with a ward id feed that ward's own anomaly.
    PerWard,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RainfallConfig {
    pub resolution: RainfallResolution,
    /// Number of most recent years compared against the long-run mean.
    pub recent_years: usize,
}

impl Default for RainfallConfig {
    fn default() -> Self {
        Self { resolution: RainfallResolution::CityWide, recent_years: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub buffer_distance_m: f64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self { buffer_distance_m: 500.0 }
    }
}

impl EngineConfig {
    /// Load from the path in `WARD_RESILIENCE_CONFIG`, else `ward_resilience.toml`,
    /// else defaults when neither file exists.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| CONFIG_FILE.to_string());
        if Path::new(&path).exists() {
            Self::from_file(Path::new(&path))
        } else {
            tracing::info!("no config at {}, using defaults", path);
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.bands.validate()?;
        if !self.target_crs.is_projected() {
            return Err(EngineError::Config(format!(
                "target CRS {} is not projected; areas and lengths need metres",
                self.target_crs
            )));
        }
        if !(self.grid.cell_size_m > 0.0) || !(self.grid.search_radius_m > 0.0) {
            return Err(EngineError::Config(
                "grid cell size and search radius must be positive".into(),
            ));
        }
        if self.join.buffer_distance_m < 0.0 {
            return Err(EngineError::Config("buffer distance must not be negative".into()));
        }
        if self.rainfall.recent_years == 0 {
            return Err(EngineError::Config("recent_years must be at least 1".into()));
        }
        Ok(())
    }
}
