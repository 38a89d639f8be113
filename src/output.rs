use geo::Geometry;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, JsonValue};
use serde::Serialize;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};
use tracing::info;

use crate::crs::{Crs, Reprojector};
use crate::error::Result;
use crate::types::{HotspotCell, Ward, WardScore};

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    info!("wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

pub fn preview_table<T>(title: &str, note: Option<&str>, rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    println!("{}", title);
    if let Some(n) = note {
        println!("({})", n);
    }
    println!();
    let slice: Vec<T> = rows.iter().take(max_rows).cloned().collect();
    if slice.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let table_str = Table::new(slice).with(Style::markdown()).to_string();
    println!("{}\n", table_str);
}

/// GeoJSON readers expect lon/lat, so UTM output goes back to WGS84. Local
/// grids have no geographic anchor and stay as they are.
fn export_crs(target: &Crs) -> Crs {
    match target {
        Crs::Utm { .. } => Crs::Wgs84,
        other => other.clone(),
    }
}

fn feature(geometry: Geometry<f64>, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(&geometry))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn write_collection(path: &Path, features: Vec<Feature>) -> Result<()> {
    let count = features.len();
    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    std::fs::write(path, GeoJson::from(collection).to_string())?;
    info!("wrote {} features to {}", count, path.display());
    Ok(())
}

pub fn hotspot_collection(cells: &[HotspotCell], target: &Crs) -> Result<Vec<Feature>> {
    let projector = Reprojector::new(target, &export_crs(target))?;
    cells
        .iter()
        .map(|c| {
            let geometry = projector.geometry(&Geometry::MultiPolygon(c.polygon.clone()))?;
            let mut props = JsonObject::new();
            props.insert("ward_id".into(), JsonValue::from(c.ward_id));
            props.insert("row".into(), JsonValue::from(c.row));
            props.insert("col".into(), JsonValue::from(c.col));
            props.insert("area_sqkm".into(), JsonValue::from(c.area_sqkm));
            props.insert("incident_count".into(), JsonValue::from(c.incident_count));
            props.insert("score".into(), JsonValue::from(c.score));
            props.insert("risk_level".into(), JsonValue::from(c.level.label()));
            Ok(feature(geometry, props))
        })
        .collect()
}

pub fn write_hotspots_geojson(path: &Path, cells: &[HotspotCell], target: &Crs) -> Result<()> {
    write_collection(path, hotspot_collection(cells, target)?)
}

/// Ward boundaries with their composite score, for choropleth maps.
/// `scores` is in the same order as `wards`.
pub fn write_wards_geojson(
    path: &Path,
    wards: &[Ward],
    scores: &[WardScore],
    target: &Crs,
) -> Result<()> {
    let projector = Reprojector::new(target, &export_crs(target))?;
    let features = wards
        .iter()
        .zip(scores)
        .map(|(w, s)| {
            let geometry = projector.geometry(&Geometry::MultiPolygon(w.boundary.clone()))?;
            let mut props = JsonObject::new();
            props.insert("ward_id".into(), JsonValue::from(w.id));
            props.insert("name".into(), JsonValue::from(w.name.clone()));
            props.insert("area_sqkm".into(), JsonValue::from(w.area_sqkm));
            props.insert(
                "composite_score".into(),
                s.composite_score.map(JsonValue::from).unwrap_or(JsonValue::Null),
            );
            props.insert("category".into(), JsonValue::from(s.category_label()));
            Ok(feature(geometry, props))
        })
        .collect::<Result<Vec<_>>>()?;
    write_collection(path, features)
}
