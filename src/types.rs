use geo::{Geometry, MultiLineString, MultiPolygon, Point};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tabled::Tabled;

use crate::crs::Crs;

// ---------------------------------------------------------------------------
// Raw inputs handed over by the loaders.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RawRainfallRow {
    #[serde(rename = "Year", alias = "year")]
    pub year: Option<String>,
    #[serde(rename = "Month", alias = "month", alias = "Period", default)]
    pub month: Option<String>,
    #[serde(rename = "Total", alias = "total", alias = "Value")]
    pub total: Option<String>,
    #[serde(rename = "Ward", alias = "ward_id", default)]
    pub ward: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RawWard {
    pub id: u32,
    pub name: String,
    pub boundary: Geometry<f64>,
}

#[derive(Debug, Clone)]
pub struct RawWardLayer {
    pub crs: Crs,
    pub wards: Vec<RawWard>,
}

#[derive(Debug, Clone)]
pub struct RawLayer {
    pub name: String,
    pub kind: FeatureKind,
    pub crs: Crs,
    pub geometries: Vec<Geometry<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RainfallRecord {
    pub year: i32,
    pub month: Option<u32>,
    pub value: f64,
    /// Set only when the rainfall source is resolved at ward level.
    pub ward_id: Option<u32>,
}

// ---------------------------------------------------------------------------
// Normalized model.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Drain,
    FloodProne,
    VulnerableLocation,
    LowLying,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 4] = [
        FeatureKind::Drain,
        FeatureKind::FloodProne,
        FeatureKind::VulnerableLocation,
        FeatureKind::LowLying,
    ];

    /// Features that count as recorded flood incidents.
    pub fn is_incident(self) -> bool {
        matches!(self, FeatureKind::FloodProne | FeatureKind::VulnerableLocation)
    }

    /// Features that feed the hotspot kernel.
    pub fn is_high_risk(self) -> bool {
        self != FeatureKind::Drain
    }

    pub fn label(self) -> &'static str {
        match self {
            FeatureKind::Drain => "drains",
            FeatureKind::FloodProne => "flood_prone",
            FeatureKind::VulnerableLocation => "vulnerable_locations",
            FeatureKind::LowLying => "lowlying_areas",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    Point(Point<f64>),
    Line(MultiLineString<f64>),
    Area(MultiPolygon<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpatialFeature {
    pub kind: FeatureKind,
    /// Position of the feature in its source layer.
    pub source_index: usize,
    pub geometry: FeatureGeometry,
}

/// A ward after normalization. Wards live in a `Vec` sorted by `id`, and
/// everything else refers to them by position in that vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Ward {
    pub id: u32,
    pub name: String,
    pub boundary: MultiPolygon<f64>,
    pub area_sqkm: f64,
}

/// Raw, un-normalized factors of one ward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Factors {
    pub drain_density: f64,
    pub incident_count: usize,
    pub lowlying_fraction: f64,
    pub rainfall_anomaly: f64,
    pub proximity_incidents: usize,
    pub area_sqkm: f64,
    pub drain_length_km: f64,
    pub incident_density: f64,
}

/// Factors rescaled to [0, 1] across the scored ward population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NormalizedFactors {
    pub drain_density: f64,
    pub incident_count: f64,
    pub lowlying_fraction: f64,
    pub rainfall_anomaly: f64,
    pub proximity_incidents: f64,
}

/// Ordered from most to least vulnerable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    ExtremeVulnerability,
    HighVulnerability,
    Moderate,
    HighResilience,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::ExtremeVulnerability => "Extreme Vulnerability",
            Category::HighVulnerability => "High Vulnerability",
            Category::Moderate => "Moderate",
            Category::HighResilience => "High Resilience",
        }
    }
}

pub const INSUFFICIENT_DATA: &str = "Insufficient Data";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WardScore {
    pub ward_id: u32,
    pub name: String,
    pub factors: Factors,
    /// `None` for degenerate wards left out of normalization.
    pub normalized: Option<NormalizedFactors>,
    pub composite_score: Option<f64>,
    pub category: Option<Category>,
}

impl WardScore {
    pub fn category_label(&self) -> &'static str {
        self.category.map(Category::label).unwrap_or(INSUFFICIENT_DATA)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum GridRiskLevel {
    NoIncidents,
    Minor,
    Low,
    Moderate,
    High,
    Critical,
}

impl GridRiskLevel {
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => GridRiskLevel::NoIncidents,
            1 => GridRiskLevel::Minor,
            2..=3 => GridRiskLevel::Low,
            4..=6 => GridRiskLevel::Moderate,
            7..=10 => GridRiskLevel::High,
            _ => GridRiskLevel::Critical,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GridRiskLevel::NoIncidents => "No Incidents",
            GridRiskLevel::Minor => "Minor Risk",
            GridRiskLevel::Low => "Low Risk",
            GridRiskLevel::Moderate => "Moderate Risk",
            GridRiskLevel::High => "High Risk",
            GridRiskLevel::Critical => "Critical Risk",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HotspotCell {
    pub ward_id: u32,
    pub row: usize,
    pub col: usize,
    /// Grid square clipped to the ward boundary.
    pub polygon: MultiPolygon<f64>,
    pub area_sqkm: f64,
    pub incident_count: usize,
    pub score: f64,
    pub level: GridRiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnnualRainfall {
    pub year: i32,
    pub total: f64,
    pub deviation_from_mean: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RainfallSummary {
    pub series: Vec<AnnualRainfall>,
    pub long_run_mean: f64,
    pub std_dev: f64,
    pub recent_mean: f64,
    pub city_anomaly: f64,
    pub ward_anomalies: BTreeMap<u32, f64>,
}

// ---------------------------------------------------------------------------
// Presentation rows.
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct WardScoreRow {
    #[serde(rename = "WardId")]
    #[tabled(rename = "WardId")]
    pub ward_id: u32,
    #[serde(rename = "WardName")]
    #[tabled(rename = "WardName")]
    pub ward_name: String,
    #[serde(rename = "AreaSqKm")]
    #[tabled(rename = "AreaSqKm")]
    pub area_sqkm: String,
    #[serde(rename = "DrainDensity")]
    #[tabled(rename = "DrainDensity")]
    pub drain_density: String,
    #[serde(rename = "IncidentCount")]
    #[tabled(rename = "IncidentCount")]
    pub incident_count: usize,
    #[serde(rename = "LowlyingFraction")]
    #[tabled(rename = "LowlyingFraction")]
    pub lowlying_fraction: String,
    #[serde(rename = "RainfallAnomaly")]
    #[tabled(rename = "RainfallAnomaly")]
    pub rainfall_anomaly: String,
    #[serde(rename = "ProximityIncidents")]
    #[tabled(skip)]
    pub proximity_incidents: usize,
    #[serde(rename = "NormDrain")]
    #[tabled(skip)]
    pub norm_drain: String,
    #[serde(rename = "NormIncident")]
    #[tabled(skip)]
    pub norm_incident: String,
    #[serde(rename = "NormLowlying")]
    #[tabled(skip)]
    pub norm_lowlying: String,
    #[serde(rename = "NormRainfall")]
    #[tabled(skip)]
    pub norm_rainfall: String,
    #[serde(rename = "CompositeScore")]
    #[tabled(rename = "CompositeScore")]
    pub composite_score: String,
    #[serde(rename = "Category")]
    #[tabled(rename = "Category")]
    pub category: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct HotspotRow {
    #[serde(rename = "WardId")]
    #[tabled(rename = "WardId")]
    pub ward_id: u32,
    #[serde(rename = "Row")]
    #[tabled(rename = "Row")]
    pub row: usize,
    #[serde(rename = "Col")]
    #[tabled(rename = "Col")]
    pub col: usize,
    #[serde(rename = "AreaSqKm")]
    #[tabled(rename = "AreaSqKm")]
    pub area_sqkm: String,
    #[serde(rename = "Incidents")]
    #[tabled(rename = "Incidents")]
    pub incident_count: usize,
    #[serde(rename = "Score")]
    #[tabled(rename = "Score")]
    pub score: String,
    #[serde(rename = "RiskLevel")]
    #[tabled(rename = "RiskLevel")]
    pub level: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct RainfallRow {
    #[serde(rename = "Year")]
    #[tabled(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Total")]
    #[tabled(rename = "Total")]
    pub total: String,
    #[serde(rename = "DeviationFromMean")]
    #[tabled(rename = "DeviationFromMean")]
    pub deviation_from_mean: String,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub status: crate::error::RunStatus,
    pub wards_loaded: usize,
    pub wards_scored: usize,
    pub degenerate_wards: usize,
    pub hotspot_cells: usize,
    pub mean_score: f64,
    pub median_score: f64,
    pub category_counts: BTreeMap<String, usize>,
    pub city_rainfall_anomaly: f64,
    pub features_unassigned: usize,
    pub warnings: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_order_from_most_vulnerable() {
        assert!(Category::ExtremeVulnerability < Category::HighVulnerability);
        assert!(Category::HighVulnerability < Category::Moderate);
        assert!(Category::Moderate < Category::HighResilience);
    }

    #[test]
    fn grid_levels_follow_incident_bands() {
        assert_eq!(GridRiskLevel::from_count(0), GridRiskLevel::NoIncidents);
        assert_eq!(GridRiskLevel::from_count(1), GridRiskLevel::Minor);
        assert_eq!(GridRiskLevel::from_count(3), GridRiskLevel::Low);
        assert_eq!(GridRiskLevel::from_count(6), GridRiskLevel::Moderate);
        assert_eq!(GridRiskLevel::from_count(10), GridRiskLevel::High);
        assert_eq!(GridRiskLevel::from_count(11), GridRiskLevel::Critical);
    }

    #[test]
    fn degenerate_ward_renders_placeholder() {
        let score = WardScore {
            ward_id: 1,
            name: "Tiny".into(),
            factors: Factors::default(),
            normalized: None,
            composite_score: None,
            category: None,
        };
        assert_eq!(score.category_label(), INSUFFICIENT_DATA);
    }
}
