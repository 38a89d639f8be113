// Error taxonomy for the scoring engine.
//
// Fatal problems come back as `EngineError`. Recoverable ones (a dropped
// geometry, a degenerate ward, an absent layer) are recorded as `Warning`s
// on the `RunReport` and the run keeps going.
use serde::Serialize;
use thiserror::Error;

use crate::types::FeatureKind;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("missing dataset: {0}")]
    MissingDataset(String),

    #[error("invalid geometry in layer {layer} at index {index}: {reason}")]
    Geometry {
        layer: String,
        index: usize,
        reason: String,
    },

    #[error("CRS mismatch: {0}")]
    CrsMismatch(String),

    #[error("projection error: {0}")]
    Projection(String),

    #[error("degenerate ward {0}: zero or near-zero area")]
    DegenerateWard(u32),

    #[error("no wards present after normalization")]
    NoWards,

    #[error("duplicate ward identifier {0}")]
    DuplicateWard(u32),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// A recovered problem, kept so the presentation layer can tell a clean run
/// from a degraded one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum Warning {
    MissingDataset { layer: String },
    GeometryDropped { layer: String, index: usize, reason: String },
    GeometryRepaired { layer: String, index: usize },
    CrsAssumed { layer: String, crs: String },
    DegenerateWard { ward_id: u32 },
    UnassignedFeatures { kind: FeatureKind, count: usize },
    RainfallFallback { ward_id: u32 },
}

impl Warning {
    pub fn is_omission(&self) -> bool {
        matches!(
            self,
            Warning::MissingDataset { .. }
                | Warning::GeometryDropped { .. }
                | Warning::DegenerateWard { .. }
                | Warning::RainfallFallback { .. }
        )
    }
}

impl EngineError {
    /// The warning a recoverable error turns into; `None` for fatal errors.
    pub fn as_warning(&self) -> Option<Warning> {
        match self {
            EngineError::MissingDataset(layer) => Some(Warning::MissingDataset {
                layer: layer.clone(),
            }),
            EngineError::Geometry {
                layer,
                index,
                reason,
            } => Some(Warning::GeometryDropped {
                layer: layer.clone(),
                index: *index,
                reason: reason.clone(),
            }),
            EngineError::DegenerateWard(id) => Some(Warning::DegenerateWard { ward_id: *id }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Degraded,
}

/// Diagnostics collected over one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub wards_loaded: usize,
    pub wards_scored: usize,
    pub degenerate_wards: usize,
    pub features_assigned: usize,
    pub features_unassigned: usize,
    pub geometries_dropped: usize,
    pub geometries_repaired: usize,
    pub warnings: Vec<Warning>,
}

impl RunReport {
    /// Record a recoverable error, logging it on the way.
    pub fn recover(&mut self, err: EngineError) {
        tracing::warn!("recovered: {}", err);
        if let Some(w) = err.as_warning() {
            self.push(w);
        }
    }

    pub fn push(&mut self, warning: Warning) {
        match &warning {
            Warning::GeometryDropped { .. } => self.geometries_dropped += 1,
            Warning::GeometryRepaired { .. } => self.geometries_repaired += 1,
            Warning::DegenerateWard { .. } => self.degenerate_wards += 1,
            _ => {}
        }
        self.warnings.push(warning);
    }

    /// Degraded when something the scores depend on was left out. Repairs,
    /// assumed CRSs and features outside every ward are informational.
    pub fn status(&self) -> RunStatus {
        if self.warnings.iter().any(Warning::is_omission) {
            RunStatus::Degraded
        } else {
            RunStatus::Complete
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_is_complete() {
        assert_eq!(RunReport::default().status(), RunStatus::Complete);
    }

    #[test]
    fn recovered_errors_degrade_the_run() {
        let mut report = RunReport::default();
        report.recover(EngineError::Geometry {
            layer: "drains".into(),
            index: 3,
            reason: "empty".into(),
        });
        report.recover(EngineError::DegenerateWard(7));
        assert_eq!(report.status(), RunStatus::Degraded);
        assert_eq!(report.geometries_dropped, 1);
        assert_eq!(report.degenerate_wards, 1);
    }

    #[test]
    fn informational_warnings_keep_the_run_complete() {
        let mut report = RunReport::default();
        report.push(Warning::UnassignedFeatures {
            kind: FeatureKind::FloodProne,
            count: 1,
        });
        report.push(Warning::GeometryRepaired {
            layer: "low_lying".into(),
            index: 0,
        });
        report.push(Warning::CrsAssumed {
            layer: "drains".into(),
            crs: "EPSG:4326".into(),
        });
        assert_eq!(report.status(), RunStatus::Complete);
        assert_eq!(report.warnings.len(), 3);

        report.push(Warning::RainfallFallback { ward_id: 2 });
        assert_eq!(report.status(), RunStatus::Degraded);
    }

    #[test]
    fn unassigned_warning_serializes_with_its_kind_field() {
        let w = Warning::UnassignedFeatures {
            kind: FeatureKind::FloodProne,
            count: 4,
        };
        let v = serde_json::to_value(&w).unwrap();
        assert_eq!(v["warning"], "unassigned_features");
        assert_eq!(v["count"], 4);
        assert_eq!(v["kind"], "flood_prone");
    }

    #[test]
    fn fatal_errors_carry_no_warning() {
        let mut report = RunReport::default();
        report.recover(EngineError::NoWards);
        assert!(report.warnings.is_empty());
    }
}
