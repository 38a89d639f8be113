// Per-ward factor aggregation. Each ward's factors depend only on the ward's
// own boundary, the features joined to it and the rainfall summary.
use geo::{Area, BooleanOps, EuclideanDistance, EuclideanLength, Point};
use tracing::debug;

use crate::config::EngineConfig;
use crate::join::{feature_rect, JoinResult, WardIndex};
use crate::normalize::anchor_point;
use crate::types::{
    Factors, FeatureGeometry, FeatureKind, RainfallSummary, SpatialFeature, Ward,
};
use crate::util::finite_or_zero;

const M_PER_KM: f64 = 1_000.0;
const SQ_M_PER_SQ_KM: f64 = 1_000_000.0;

pub fn is_degenerate(ward: &Ward, config: &EngineConfig) -> bool {
    !(ward.area_sqkm > 0.0) || ward.area_sqkm < config.min_ward_area_sqkm
}

fn drain_length_km(ward: usize, features: &[SpatialFeature], join: &JoinResult) -> f64 {
    join.features_of(ward, FeatureKind::Drain)
        .iter()
        .map(|&fi| match &features[fi].geometry {
            FeatureGeometry::Line(l) => l.euclidean_length(),
            _ => 0.0,
        })
        .sum::<f64>()
        / M_PER_KM
}

fn incident_count(ward: usize, join: &JoinResult) -> usize {
    FeatureKind::ALL
        .iter()
        .filter(|k| k.is_incident())
        .map(|&k| join.features_of(ward, k).len())
        .sum()
}

/// Square metres of low-lying area inside each ward. Every intersecting
/// area counts, whichever ward the join gave it to.
pub fn lowlying_areas(wards: &[Ward], features: &[SpatialFeature], index: &WardIndex) -> Vec<f64> {
    let mut areas = vec![0.0_f64; wards.len()];
    for feature in features.iter().filter(|f| f.kind == FeatureKind::LowLying) {
        let FeatureGeometry::Area(area) = &feature.geometry else {
            continue;
        };
        let Some(rect) = feature_rect(&feature.geometry) else {
            continue;
        };
        for idx in index.candidates(rect, 0.0) {
            let inside = wards[idx].boundary.intersection(area).unsigned_area();
            if inside > 0.0 {
                areas[idx] += inside;
            }
        }
    }
    areas
}

pub fn distance_to_ward(ward: &Ward, p: &Point<f64>) -> f64 {
    ward.boundary
        .0
        .iter()
        .map(|poly| p.euclidean_distance(poly))
        .fold(f64::INFINITY, f64::min)
}

/// Count incident features within `buffer_m` of each ward, assigned or not.
/// A feature inside a ward is at distance 0 from it.
pub fn proximity_counts(
    wards: &[Ward],
    features: &[SpatialFeature],
    buffer_m: f64,
    index: &WardIndex,
) -> Vec<usize> {
    let mut counts = vec![0usize; wards.len()];
    for feature in features.iter().filter(|f| f.kind.is_incident()) {
        let rect = feature_rect(&feature.geometry);
        let (Some(rect), Some(anchor)) = (rect, anchor_point(&feature.geometry)) else {
            continue;
        };
        for idx in index.candidates(rect, buffer_m) {
            if distance_to_ward(&wards[idx], &anchor) <= buffer_m {
                counts[idx] += 1;
            }
        }
    }
    counts
}

/// Raw factors for every ward, in ward order. Degenerate wards get zeroed
/// factors; the index calculator leaves them out of normalization.
pub fn aggregate(
    wards: &[Ward],
    features: &[SpatialFeature],
    join: &JoinResult,
    rainfall: &RainfallSummary,
    config: &EngineConfig,
) -> Vec<Factors> {
    let index = WardIndex::build(wards, |w| !is_degenerate(w, config));
    let proximity = proximity_counts(wards, features, config.join.buffer_distance_m, &index);
    let lowlying = lowlying_areas(wards, features, &index);

    wards
        .iter()
        .enumerate()
        .map(|(idx, ward)| {
            if is_degenerate(ward, config) {
                debug!("ward {} is degenerate; factors zeroed", ward.id);
                return Factors {
                    area_sqkm: ward.area_sqkm,
                    ..Factors::default()
                };
            }
            let area = ward.area_sqkm;
            let drain_length_km = drain_length_km(idx, features, join);
            let incidents = incident_count(idx, join);
            let lowlying = lowlying[idx] / SQ_M_PER_SQ_KM;
            Factors {
                drain_density: finite_or_zero(drain_length_km / area),
                incident_count: incidents,
                lowlying_fraction: finite_or_zero(lowlying / area).clamp(0.0, 1.0),
                rainfall_anomaly: rainfall.anomaly_for(ward.id),
                proximity_incidents: proximity[idx],
                area_sqkm: area,
                drain_length_km,
                incident_density: finite_or_zero(incidents as f64 / area),
            }
        })
        .collect()
}
