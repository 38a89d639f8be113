// Hotspot grid: square cells over a ward's bounding box, clipped to the ward,
// each scored by a distance-weighted count of nearby high-risk features.
use geo::{
    Area, BooleanOps, BoundingRect, Centroid, EuclideanDistance, Intersects, MultiPolygon, Point,
    Rect,
};
use std::collections::HashMap;
use tracing::debug;

use crate::config::GridConfig;
use crate::join::JoinResult;
use crate::normalize::anchor_point;
use crate::types::{FeatureKind, GridRiskLevel, HotspotCell, SpatialFeature, Ward};
use crate::util::finite_or_zero;

const SQ_M_PER_SQ_KM: f64 = 1_000_000.0;
/// Clipped cells smaller than this fraction of a full cell are slivers from
/// floating point noise and are discarded.
const SLIVER_FRACTION: f64 = 1e-9;

/// Number of cells needed to span `extent`, never fewer than one.
pub fn cells_along(extent: f64, cell_size: f64) -> usize {
    let n = (extent / cell_size - 1e-9).ceil();
    if n.is_finite() && n >= 1.0 {
        n as usize
    } else {
        1
    }
}

/// Half-open cell index of an offset along one axis, clamped to `[0, n - 1]`.
fn cell_index(offset: f64, size: f64, n: usize) -> usize {
    let i = (offset / size).floor();
    if i.is_finite() && i > 0.0 {
        (i as usize).min(n - 1)
    } else {
        0
    }
}

/// Linear-decay kernel: 1 at the feature, 0 at `radius` and beyond.
pub fn kernel(distance: f64, radius: f64) -> f64 {
    if distance <= radius {
        1.0 - distance / radius
    } else {
        0.0
    }
}

/// Representative points of the high-risk features joined to a ward.
pub fn high_risk_anchors(
    ward: usize,
    features: &[SpatialFeature],
    join: &JoinResult,
) -> Vec<Point<f64>> {
    FeatureKind::ALL
        .iter()
        .filter(|k| k.is_high_risk())
        .flat_map(|&k| join.features_of(ward, k).iter())
        .filter_map(|&fi| anchor_point(&features[fi].geometry))
        .collect()
}

struct RawCell {
    row: usize,
    col: usize,
    polygon: MultiPolygon<f64>,
    area: f64,
    weight: f64,
    incidents: usize,
}

/// Build the hotspot grid of one ward in row-major order, row 0 being the
/// northernmost row and col 0 the westernmost column.
pub fn generate_grid(ward: &Ward, anchors: &[Point<f64>], grid: &GridConfig) -> Vec<HotspotCell> {
    let Some(bounds) = ward.boundary.bounding_rect() else {
        return Vec::new();
    };
    let size = grid.cell_size_m;
    let ncols = cells_along(bounds.width(), size);
    let nrows = cells_along(bounds.height(), size);
    let single = ncols == 1 && nrows == 1;

    // Each anchor inside the ward belongs to exactly one cell: cells are
    // closed on their west and north edges, and the last row and column
    // also take the far edge of the box.
    let mut counts: HashMap<(usize, usize), usize> = HashMap::new();
    for a in anchors.iter().filter(|a| ward.boundary.intersects(*a)) {
        let col = cell_index(a.x() - bounds.min().x, size, ncols);
        let row = cell_index(bounds.max().y - a.y(), size, nrows);
        *counts.entry((row, col)).or_insert(0) += 1;
    }

    let mut cells: Vec<RawCell> = Vec::with_capacity(ncols * nrows);
    for row in 0..nrows {
        for col in 0..ncols {
            let x0 = bounds.min().x + col as f64 * size;
            let y1 = bounds.max().y - row as f64 * size;
            let square = Rect::new((x0, y1 - size), (x0 + size, y1));
            // A ward smaller than one cell is its own single cell.
            let polygon = if single {
                ward.boundary.clone()
            } else {
                ward.boundary
                    .intersection(&MultiPolygon::new(vec![square.to_polygon()]))
            };
            let area = polygon.unsigned_area();
            if !(area > size * size * SLIVER_FRACTION) {
                continue;
            }
            let center = polygon
                .centroid()
                .unwrap_or_else(|| Point::from(square.center()));
            let weight = anchors
                .iter()
                .map(|a| kernel(center.euclidean_distance(a), grid.search_radius_m))
                .sum();
            let incidents = counts.get(&(row, col)).copied().unwrap_or(0);
            cells.push(RawCell { row, col, polygon, area, weight, incidents });
        }
    }

    let total_area: f64 = cells.iter().map(|c| c.area).sum();
    let total_weight: f64 = cells.iter().map(|c| c.weight).sum();
    let density = finite_or_zero(anchors.len() as f64 / ward.area_sqkm);
    debug!(
        "ward {}: {}x{} grid, {} cells kept, density {:.3}",
        ward.id,
        nrows,
        ncols,
        cells.len(),
        density
    );

    cells
        .into_iter()
        .map(|c| {
            // Weight share over area share, so the area-weighted mean of
            // cell scores equals the ward's own density.
            let score = if total_weight > 0.0 {
                finite_or_zero(density * (c.weight / total_weight) / (c.area / total_area))
            } else {
                density
            };
            HotspotCell {
                ward_id: ward.id,
                row: c.row,
                col: c.col,
                polygon: c.polygon,
                area_sqkm: c.area / SQ_M_PER_SQ_KM,
                incident_count: c.incidents,
                score,
                level: GridRiskLevel::from_count(c.incidents),
            }
        })
        .collect()
}
