// Spatial join of features onto wards.
//
// Each feature goes to exactly one ward: the one it overlaps most (point
// containment, clipped line length, or intersected area). Ties go to the
// lowest ward identifier. Features touching no ward land in `unassigned`.
use geo::{Area, BooleanOps, BoundingRect, EuclideanLength, Intersects, Rect};
use rstar::{RTree, RTreeObject, AABB};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{RunReport, Warning};
use crate::types::{FeatureGeometry, FeatureKind, SpatialFeature, Ward};

/// Relative slack when comparing overlaps, so equal overlaps computed along
/// different paths still count as a tie.
const OVERLAP_TIE_EPS: f64 = 1e-9;

struct WardBox {
    idx: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for WardBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// R-tree over ward bounding boxes, answering "which wards might touch this".
pub struct WardIndex {
    tree: RTree<WardBox>,
}

impl WardIndex {
    /// Index the wards for which `include` holds.
    pub fn build(wards: &[Ward], include: impl Fn(&Ward) -> bool) -> Self {
        let boxes = wards
            .iter()
            .enumerate()
            .filter(|(_, w)| include(w))
            .filter_map(|(idx, w)| {
                w.boundary.bounding_rect().map(|r| WardBox {
                    idx,
                    env: AABB::from_corners([r.min().x, r.min().y], [r.max().x, r.max().y]),
                })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(boxes),
        }
    }

    /// Ward positions whose box comes within `pad` of `rect`, ascending.
    pub fn candidates(&self, rect: Rect<f64>, pad: f64) -> Vec<usize> {
        let query = AABB::from_corners(
            [rect.min().x - pad, rect.min().y - pad],
            [rect.max().x + pad, rect.max().y + pad],
        );
        let mut out: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .map(|b| b.idx)
            .collect();
        out.sort_unstable();
        out
    }
}

pub fn feature_rect(geom: &FeatureGeometry) -> Option<Rect<f64>> {
    match geom {
        FeatureGeometry::Point(p) => Some(p.bounding_rect()),
        FeatureGeometry::Line(l) => l.bounding_rect(),
        FeatureGeometry::Area(a) => a.bounding_rect(),
    }
}

/// How much of `geom` lies in `ward`, or `None` if they do not touch at all.
/// Points weigh 1; lines by clipped length; areas by intersected area.
pub fn overlap(ward: &Ward, geom: &FeatureGeometry) -> Option<f64> {
    match geom {
        FeatureGeometry::Point(p) => ward.boundary.intersects(p).then_some(1.0),
        FeatureGeometry::Line(ml) => {
            let inside = ward.boundary.clip(ml, false).euclidean_length();
            if inside > 0.0 {
                return Some(inside);
            }
            let touches = ward
                .boundary
                .0
                .iter()
                .any(|poly| ml.0.iter().any(|ls| poly.intersects(ls)));
            touches.then_some(0.0)
        }
        FeatureGeometry::Area(area) => {
            let shared = ward.boundary.intersection(area).unsigned_area();
            if shared > 0.0 {
                return Some(shared);
            }
            let touches = ward
                .boundary
                .0
                .iter()
                .any(|poly| area.0.iter().any(|other| poly.intersects(other)));
            touches.then_some(0.0)
        }
    }
}

/// Features assigned to one ward, by kind. Values index the feature slice
/// handed to `spatial_join`.
pub type WardFeatures = BTreeMap<FeatureKind, Vec<usize>>;

#[derive(Debug, Clone, Default)]
pub struct JoinResult {
    /// One entry per ward, in ward order.
    pub by_ward: Vec<WardFeatures>,
    pub unassigned: BTreeMap<FeatureKind, Vec<usize>>,
}

impl JoinResult {
    pub fn features_of(&self, ward: usize, kind: FeatureKind) -> &[usize] {
        self.by_ward
            .get(ward)
            .and_then(|m| m.get(&kind))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn assigned_count(&self) -> usize {
        self.by_ward
            .iter()
            .flat_map(|m| m.values())
            .map(Vec::len)
            .sum()
    }

    pub fn unassigned_count(&self) -> usize {
        self.unassigned.values().map(Vec::len).sum()
    }
}

/// Pick the ward a single feature belongs to.
pub fn best_ward(
    wards: &[Ward],
    index: &WardIndex,
    feature: &SpatialFeature,
) -> Option<usize> {
    let rect = feature_rect(&feature.geometry)?;
    let mut best: Option<(usize, f64)> = None;
    for idx in index.candidates(rect, 0.0) {
        let Some(amount) = overlap(&wards[idx], &feature.geometry) else {
            continue;
        };
        // Candidates arrive in ascending ward order, so only a strictly
        // larger overlap displaces the current pick.
        let better = match best {
            None => true,
            Some((_, current)) => amount > current + current.abs() * OVERLAP_TIE_EPS,
        };
        if better {
            best = Some((idx, amount));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Assign every feature to at most one ward. Wards whose area is below
/// `min_area_sqkm` are not join targets.
pub fn spatial_join(
    wards: &[Ward],
    features: &[SpatialFeature],
    min_area_sqkm: f64,
    report: &mut RunReport,
) -> JoinResult {
    let index = WardIndex::build(wards, |w| w.area_sqkm >= min_area_sqkm && w.area_sqkm > 0.0);
    let mut result = JoinResult {
        by_ward: vec![WardFeatures::new(); wards.len()],
        unassigned: BTreeMap::new(),
    };

    for (fi, feature) in features.iter().enumerate() {
        match best_ward(wards, &index, feature) {
            Some(idx) => result.by_ward[idx].entry(feature.kind).or_default().push(fi),
            None => {
                debug!(
                    "{} feature {} lies outside every ward",
                    feature.kind.label(),
                    feature.source_index
                );
                result.unassigned.entry(feature.kind).or_default().push(fi);
            }
        }
    }

    for (kind, list) in &result.unassigned {
        report.push(Warning::UnassignedFeatures {
            kind: *kind,
            count: list.len(),
        });
    }
    report.features_assigned = result.assigned_count();
    report.features_unassigned = result.unassigned_count();
    info!(
        "spatial join: {} assigned, {} unassigned",
        report.features_assigned, report.features_unassigned
    );
    result
}
