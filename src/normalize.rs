// Geometry normalization: bring every layer onto the target CRS and make sure
// nothing empty or self-intersecting reaches the spatial join.
use geo::{
    Area, ConvexHull, CoordsIter, Geometry, Intersects, Line, LineString, MultiLineString,
    MultiPolygon, Point, Polygon,
};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::crs::{self, Crs, Reprojector};
use crate::error::{EngineError, Result, RunReport, Warning};
use crate::types::{FeatureGeometry, RawLayer, RawWardLayer, SpatialFeature, Ward};

const SQ_M_PER_SQ_KM: f64 = 1_000_000.0;

enum Repair<T> {
    Valid(T),
    Repaired(T),
    Invalid(&'static str),
}

/// Resolve the layer's CRS and confirm it can be brought onto `target`.
fn layer_crs(
    name: &str,
    declared: &Crs,
    geoms: &[Geometry<f64>],
    target: &Crs,
    report: &mut RunReport,
) -> Result<Crs> {
    let (resolved, assumed) = crs::resolve(declared, geoms)
        .map_err(|e| EngineError::CrsMismatch(format!("layer {}: {}", name, e)))?;
    if assumed {
        warn!("layer {} has no CRS; assuming {}", name, resolved);
        report.push(Warning::CrsAssumed {
            layer: name.to_string(),
            crs: resolved.to_string(),
        });
    }
    crs::check_reconcilable(&resolved, target)
        .map_err(|e| EngineError::CrsMismatch(format!("layer {}: {}", name, e)))?;
    Ok(resolved)
}

fn all_finite(geom: &Geometry<f64>) -> bool {
    geom.coords_iter().all(|c| c.x.is_finite() && c.y.is_finite())
}

fn clean_ring(ring: &LineString<f64>) -> LineString<f64> {
    let mut coords = ring.0.clone();
    coords.dedup();
    LineString::new(coords)
}

fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let lines: Vec<Line<f64>> = ring.lines().collect();
    let n = lines.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if !adjacent && lines[i].intersects(&lines[j]) {
                return true;
            }
        }
    }
    false
}

fn repair_polygon(poly: &Polygon<f64>) -> Repair<Polygon<f64>> {
    let exterior = clean_ring(poly.exterior());
    // A closed ring needs three distinct vertices plus the closing one.
    if exterior.0.len() < 4 {
        return Repair::Invalid("polygon has fewer than three distinct vertices");
    }
    let interiors: Vec<LineString<f64>> = poly
        .interiors()
        .iter()
        .map(clean_ring)
        .filter(|r| r.0.len() >= 4)
        .collect();
    let cleaned = Polygon::new(exterior, interiors);

    let broken = ring_self_intersects(cleaned.exterior())
        || cleaned.interiors().iter().any(ring_self_intersects);
    let (poly, repaired) = if broken {
        (cleaned.convex_hull(), true)
    } else {
        (cleaned, false)
    };
    if !(poly.unsigned_area() > 0.0) {
        return Repair::Invalid("polygon has zero area");
    }
    if repaired {
        Repair::Repaired(poly)
    } else {
        Repair::Valid(poly)
    }
}

fn repair_area(mp: &MultiPolygon<f64>) -> Repair<MultiPolygon<f64>> {
    let mut parts = Vec::with_capacity(mp.0.len());
    let mut repaired = false;
    for poly in &mp.0 {
        match repair_polygon(poly) {
            Repair::Valid(p) => parts.push(p),
            Repair::Repaired(p) => {
                parts.push(p);
                repaired = true;
            }
            Repair::Invalid(_) => repaired = true,
        }
    }
    if parts.is_empty() {
        return Repair::Invalid("no valid polygon parts");
    }
    let out = MultiPolygon::new(parts);
    if repaired {
        Repair::Repaired(out)
    } else {
        Repair::Valid(out)
    }
}

fn repair_lines(ml: &MultiLineString<f64>) -> Repair<MultiLineString<f64>> {
    let parts: Vec<LineString<f64>> = ml
        .0
        .iter()
        .map(clean_ring)
        .filter(|l| l.0.len() >= 2)
        .collect();
    if parts.is_empty() {
        return Repair::Invalid("line has fewer than two distinct vertices");
    }
    let dropped_parts = parts.len() != ml.0.len();
    let out = MultiLineString::new(parts);
    if dropped_parts {
        Repair::Repaired(out)
    } else {
        Repair::Valid(out)
    }
}

fn line(ls: LineString<f64>) -> FeatureGeometry {
    FeatureGeometry::Line(MultiLineString::new(vec![ls]))
}

fn area(p: Polygon<f64>) -> FeatureGeometry {
    FeatureGeometry::Area(MultiPolygon::new(vec![p]))
}

/// Split a geometry into the point/line/area shapes the engine works with.
fn flatten(geom: Geometry<f64>, out: &mut Vec<FeatureGeometry>) {
    match geom {
        Geometry::Point(p) => out.push(FeatureGeometry::Point(p)),
        Geometry::MultiPoint(mp) => out.extend(mp.0.into_iter().map(FeatureGeometry::Point)),
        Geometry::Line(l) => out.push(line(l.into())),
        Geometry::LineString(ls) => out.push(line(ls)),
        Geometry::MultiLineString(ml) => out.push(FeatureGeometry::Line(ml)),
        Geometry::Polygon(p) => out.push(area(p)),
        Geometry::MultiPolygon(mp) => out.push(FeatureGeometry::Area(mp)),
        Geometry::Rect(r) => out.push(area(r.to_polygon())),
        Geometry::Triangle(t) => out.push(area(t.to_polygon())),
        Geometry::GeometryCollection(gc) => {
            for g in gc.0 {
                flatten(g, out);
            }
        }
    }
}

fn repair_feature(geom: FeatureGeometry) -> Repair<FeatureGeometry> {
    match geom {
        FeatureGeometry::Point(p) => Repair::Valid(FeatureGeometry::Point(p)),
        FeatureGeometry::Line(ml) => match repair_lines(&ml) {
            Repair::Valid(l) => Repair::Valid(FeatureGeometry::Line(l)),
            Repair::Repaired(l) => Repair::Repaired(FeatureGeometry::Line(l)),
            Repair::Invalid(r) => Repair::Invalid(r),
        },
        FeatureGeometry::Area(mp) => match repair_area(&mp) {
            Repair::Valid(a) => Repair::Valid(FeatureGeometry::Area(a)),
            Repair::Repaired(a) => Repair::Repaired(FeatureGeometry::Area(a)),
            Repair::Invalid(r) => Repair::Invalid(r),
        },
    }
}

/// Normalize one feature layer. A layer left with no valid geometry yields an
/// empty vector; the caller decides what an absent layer means.
pub fn normalize_layer(
    layer: &RawLayer,
    target: &Crs,
    report: &mut RunReport,
) -> Result<Vec<SpatialFeature>> {
    let source = layer_crs(&layer.name, &layer.crs, &layer.geometries, target, report)?;
    let projector = Reprojector::new(&source, target)?;
    let mut features = Vec::with_capacity(layer.geometries.len());

    for (index, raw) in layer.geometries.iter().enumerate() {
        if !all_finite(raw) {
            report.recover(EngineError::Geometry {
                layer: layer.name.clone(),
                index,
                reason: "non-finite coordinate".into(),
            });
            continue;
        }
        let projected = match projector.geometry(raw) {
            Ok(g) => g,
            Err(e) => {
                report.recover(EngineError::Geometry {
                    layer: layer.name.clone(),
                    index,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let mut parts = Vec::new();
        flatten(projected, &mut parts);
        if parts.is_empty() {
            report.recover(EngineError::Geometry {
                layer: layer.name.clone(),
                index,
                reason: "empty geometry".into(),
            });
            continue;
        }
        for part in parts {
            match repair_feature(part) {
                Repair::Valid(geometry) => features.push(SpatialFeature {
                    kind: layer.kind,
                    source_index: index,
                    geometry,
                }),
                Repair::Repaired(geometry) => {
                    debug!("repaired geometry {} in layer {}", index, layer.name);
                    report.push(Warning::GeometryRepaired {
                        layer: layer.name.clone(),
                        index,
                    });
                    features.push(SpatialFeature {
                        kind: layer.kind,
                        source_index: index,
                        geometry,
                    });
                }
                Repair::Invalid(reason) => report.recover(EngineError::Geometry {
                    layer: layer.name.clone(),
                    index,
                    reason: reason.into(),
                }),
            }
        }
    }

    info!(
        "normalized layer {}: {} of {} geometries kept",
        layer.name,
        features.len(),
        layer.geometries.len()
    );
    Ok(features)
}

/// Normalize the ward layer into a vector sorted by ward id. A ward whose
/// boundary cannot be repaired is kept with zero area; a boundary that is not
/// a polygon at all is dropped. Duplicate ids and an empty result are fatal.
pub fn normalize_wards(
    layer: &RawWardLayer,
    target: &Crs,
    report: &mut RunReport,
) -> Result<Vec<Ward>> {
    let geoms: Vec<Geometry<f64>> = layer.wards.iter().map(|w| w.boundary.clone()).collect();
    let source = layer_crs("wards", &layer.crs, &geoms, target, report)?;
    let projector = Reprojector::new(&source, target)?;

    let mut seen = BTreeSet::new();
    let mut wards = Vec::with_capacity(layer.wards.len());
    for (index, raw) in layer.wards.iter().enumerate() {
        if !seen.insert(raw.id) {
            return Err(EngineError::DuplicateWard(raw.id));
        }
        if !all_finite(&raw.boundary) {
            report.recover(EngineError::Geometry {
                layer: "wards".into(),
                index,
                reason: "non-finite coordinate".into(),
            });
            continue;
        }
        let projected = match projector.geometry(&raw.boundary) {
            Ok(g) => g,
            Err(e) => {
                report.recover(EngineError::Geometry {
                    layer: "wards".into(),
                    index,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let boundary = match projected {
            Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
            Geometry::MultiPolygon(mp) => mp,
            Geometry::Rect(r) => MultiPolygon::new(vec![r.to_polygon()]),
            _ => {
                report.recover(EngineError::Geometry {
                    layer: "wards".into(),
                    index,
                    reason: "ward boundary is not a polygon".into(),
                });
                continue;
            }
        };
        let boundary = match repair_area(&boundary) {
            Repair::Valid(b) => b,
            Repair::Repaired(b) => {
                report.push(Warning::GeometryRepaired {
                    layer: "wards".into(),
                    index,
                });
                b
            }
            // Keep the ward so it is still reported; its zero area marks it
            // degenerate and keeps it out of scoring.
            Repair::Invalid(reason) => {
                debug!("ward {} boundary unusable: {}", raw.id, reason);
                wards.push(Ward {
                    id: raw.id,
                    name: raw.name.trim().to_string(),
                    boundary,
                    area_sqkm: 0.0,
                });
                continue;
            }
        };
        let area_sqkm = boundary.unsigned_area() / SQ_M_PER_SQ_KM;
        wards.push(Ward {
            id: raw.id,
            name: raw.name.trim().to_string(),
            boundary,
            area_sqkm,
        });
    }

    if wards.is_empty() {
        return Err(EngineError::NoWards);
    }
    wards.sort_by_key(|w| w.id);
    info!("normalized {} wards onto {}", wards.len(), target);
    Ok(wards)
}

/// Representative point of a feature: the point itself, otherwise the centroid.
pub fn anchor_point(geom: &FeatureGeometry) -> Option<Point<f64>> {
    use geo::Centroid;
    match geom {
        FeatureGeometry::Point(p) => Some(*p),
        FeatureGeometry::Line(l) => l.centroid(),
        FeatureGeometry::Area(a) => a.centroid(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeatureKind, RawWard};
    use geo::{line_string, polygon};

    fn local() -> Crs {
        Crs::Local("test".into())
    }

    fn square(x: f64, y: f64, side: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x, y: y),
            (x: x + side, y: y),
            (x: x + side, y: y + side),
            (x: x, y: y + side),
        ])
    }

    #[test]
    fn bowtie_is_replaced_by_its_hull() {
        let bowtie = polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 10.0, y: 0.0),
            (x: 0.0, y: 10.0),
        ];
        match repair_polygon(&bowtie) {
            Repair::Repaired(p) => assert!((p.unsigned_area() - 100.0).abs() < 1e-9),
            _ => panic!("expected a repaired polygon"),
        }
    }

    #[test]
    fn collapsed_polygon_is_invalid() {
        let flat = polygon![(x: 0.0, y: 0.0), (x: 5.0, y: 0.0), (x: 10.0, y: 0.0)];
        assert!(matches!(repair_polygon(&flat), Repair::Invalid(_)));
    }

    #[test]
    fn layer_drops_bad_geometry_and_keeps_the_rest() {
        let layer = RawLayer {
            name: "drains".into(),
            kind: FeatureKind::Drain,
            crs: local(),
            geometries: vec![
                Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)]),
                Geometry::LineString(line_string![(x: 1.0, y: 1.0), (x: 1.0, y: 1.0)]),
                Geometry::Point(Point::new(f64::NAN, 0.0)),
            ],
        };
        let mut report = RunReport::default();
        let out = normalize_layer(&layer, &local(), &mut report).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(report.geometries_dropped, 2);
    }

    #[test]
    fn multipoints_split_into_features_sharing_a_source_index() {
        let layer = RawLayer {
            name: "flood_prone".into(),
            kind: FeatureKind::FloodProne,
            crs: local(),
            geometries: vec![Geometry::MultiPoint(
                vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)].into(),
            )],
        };
        let mut report = RunReport::default();
        let out = normalize_layer(&layer, &local(), &mut report).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|f| f.source_index == 0));
    }

    #[test]
    fn empty_layer_is_not_an_error() {
        let layer = RawLayer {
            name: "lowlying".into(),
            kind: FeatureKind::LowLying,
            crs: local(),
            geometries: vec![],
        };
        let mut report = RunReport::default();
        assert!(normalize_layer(&layer, &local(), &mut report).unwrap().is_empty());
    }

    #[test]
    fn foreign_local_grid_aborts() {
        let layer = RawLayer {
            name: "drains".into(),
            kind: FeatureKind::Drain,
            crs: Crs::Local("other".into()),
            geometries: vec![],
        };
        let mut report = RunReport::default();
        let err = normalize_layer(&layer, &local(), &mut report).unwrap_err();
        assert!(matches!(err, EngineError::CrsMismatch(_)));
    }

    #[test]
    fn wards_are_sorted_and_measured() {
        let layer = RawWardLayer {
            crs: local(),
            wards: vec![
                RawWard { id: 9, name: " North ".into(), boundary: square(0.0, 1000.0, 1000.0) },
                RawWard { id: 2, name: "South".into(), boundary: square(0.0, 0.0, 1000.0) },
            ],
        };
        let mut report = RunReport::default();
        let wards = normalize_wards(&layer, &local(), &mut report).unwrap();
        assert_eq!(wards.iter().map(|w| w.id).collect::<Vec<_>>(), vec![2, 9]);
        assert_eq!(wards[1].name, "North");
        assert!((wards[0].area_sqkm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_area_ward_is_kept_for_reporting() {
        let layer = RawWardLayer {
            crs: local(),
            wards: vec![RawWard {
                id: 4,
                name: "Sliver".into(),
                boundary: Geometry::Polygon(polygon![
                    (x: 0.0, y: 0.0),
                    (x: 5.0, y: 0.0),
                    (x: 10.0, y: 0.0),
                ]),
            }],
        };
        let mut report = RunReport::default();
        let wards = normalize_wards(&layer, &local(), &mut report).unwrap();
        assert_eq!(wards.len(), 1);
        assert_eq!(wards[0].area_sqkm, 0.0);
    }

    #[test]
    fn duplicate_ward_ids_abort() {
        let layer = RawWardLayer {
            crs: local(),
            wards: vec![
                RawWard { id: 1, name: "A".into(), boundary: square(0.0, 0.0, 10.0) },
                RawWard { id: 1, name: "B".into(), boundary: square(10.0, 0.0, 10.0) },
            ],
        };
        let mut report = RunReport::default();
        assert!(matches!(
            normalize_wards(&layer, &local(), &mut report),
            Err(EngineError::DuplicateWard(1))
        ));
    }

    #[test]
    fn geographic_wards_reproject_to_utm() {
        let layer = RawWardLayer {
            crs: Crs::Unspecified,
            wards: vec![RawWard {
                id: 1,
                name: "Shivajinagar".into(),
                boundary: square(77.59, 12.98, 0.01),
            }],
        };
        let mut report = RunReport::default();
        let utm = Crs::Utm { zone: 43, north: true };
        let wards = normalize_wards(&layer, &utm, &mut report).unwrap();
        // 0.01 degree square near 13N is roughly 1.08 km by 1.11 km.
        assert!(wards[0].area_sqkm > 1.1 && wards[0].area_sqkm < 1.3, "{}", wards[0].area_sqkm);
        assert_eq!(report.warnings.len(), 1);
    }
}
