// End-to-end run: normalize -> join -> aggregate -> score, with the hotspot
// grid built from the same normalized wards and joined features.
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result, RunReport};
use crate::factors::{aggregate, is_degenerate};
use crate::hotspot::{generate_grid, high_risk_anchors};
use crate::join::{spatial_join, JoinResult};
use crate::normalize::{normalize_layer, normalize_wards};
use crate::rainfall::summarize;
use crate::scoring::score_wards;
use crate::types::{
    FeatureKind, HotspotCell, RainfallRecord, RainfallSummary, RawLayer, RawWardLayer,
    SpatialFeature, Ward, WardScore,
};

/// Everything the loaders hand over for one run.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub wards: RawWardLayer,
    pub layers: Vec<RawLayer>,
    pub rainfall: Vec<RainfallRecord>,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub wards: Vec<Ward>,
    pub features: Vec<SpatialFeature>,
    pub join: JoinResult,
    pub scores: Vec<WardScore>,
    /// Cells of every scored ward, ordered by ward then row-major.
    pub hotspots: Vec<HotspotCell>,
    pub rainfall: RainfallSummary,
    pub report: RunReport,
}

fn check_present(features: &[SpatialFeature], rainfall: &[RainfallRecord], report: &mut RunReport) {
    for kind in FeatureKind::ALL {
        if !features.iter().any(|f| f.kind == kind) {
            report.recover(EngineError::MissingDataset(kind.label().to_string()));
        }
    }
    if rainfall.is_empty() {
        report.recover(EngineError::MissingDataset("rainfall".to_string()));
    }
}

/// Run the whole engine. Structural problems (irreconcilable CRS, no wards,
/// duplicate ward ids, bad configuration) abort before any scoring; every
/// other problem is recorded on the returned report.
pub fn run(inputs: &Inputs, config: &EngineConfig) -> Result<RunOutput> {
    config.validate()?;
    let mut report = RunReport::default();
    let target = &config.target_crs;

    let wards = normalize_wards(&inputs.wards, target, &mut report)?;
    report.wards_loaded = wards.len();

    let mut features = Vec::new();
    for layer in &inputs.layers {
        features.extend(normalize_layer(layer, target, &mut report)?);
    }
    check_present(&features, &inputs.rainfall, &mut report);

    let join = spatial_join(&wards, &features, config.min_ward_area_sqkm, &mut report);
    let rainfall = summarize(&inputs.rainfall, &wards, &config.rainfall, &mut report);
    let factors = aggregate(&wards, &features, &join, &rainfall, config);
    let scores = score_wards(&wards, &factors, config, &mut report);

    let mut hotspots = Vec::new();
    for (idx, ward) in wards.iter().enumerate() {
        if is_degenerate(ward, config) {
            continue;
        }
        let anchors = high_risk_anchors(idx, &features, &join);
        let cells = generate_grid(ward, &anchors, &config.grid);
        if cells.is_empty() {
            warn!("ward {} produced no hotspot cells", ward.id);
        }
        hotspots.extend(cells);
    }

    info!(
        "run finished: {} wards scored, {} hotspot cells, status {:?}",
        report.wards_scored,
        hotspots.len(),
        report.status()
    );
    Ok(RunOutput {
        wards,
        features,
        join,
        scores,
        hotspots,
        rainfall,
        report,
    })
}
