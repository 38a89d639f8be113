use crate::crs::Crs;
use crate::error::{EngineError, Result};
use crate::pipeline::Inputs;
use crate::types::{
    FeatureKind, RainfallRecord, RawLayer, RawRainfallRow, RawWard, RawWardLayer,
};
use crate::util::{parse_f64_safe, parse_i32_safe, parse_month_safe, parse_u32_safe};
use csv::ReaderBuilder;
use geo::{Geometry, GeometryCollection};
use geojson::{Feature, GeoJson, JsonObject, JsonValue};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

pub const WARDS_FILE: &str = "bbmp-wards.geojson";
pub const RAINFALL_FILE: &str = "bangalore-rainfall-data-1900-2024-sept.csv";

/// Feature layers looked up in the data directory, one file per kind.
pub const LAYER_FILES: [(FeatureKind, &str); 4] = [
    (FeatureKind::Drain, "bangalore_swd_primary.geojson"),
    (FeatureKind::FloodProne, "bbmp_floodprone_locations.geojson"),
    (FeatureKind::VulnerableLocation, "flooding_vulnerable_locations.geojson"),
    (FeatureKind::LowLying, "bbmp_lowlying_areas.geojson"),
];

const WARD_ID_KEYS: [&str; 3] = ["KGISWardNo", "ward_id", "id"];
const WARD_NAME_KEYS: [&str; 2] = ["KGISWardName", "name"];

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub total_rows: usize,
    pub loaded_rows: usize,
    pub parse_errors: usize,
}

pub fn read_rainfall<R: Read>(reader: R) -> Result<(Vec<RainfallRecord>, LoadReport)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let mut report = LoadReport::default();
    let mut records = Vec::new();

    for result in rdr.deserialize::<RawRainfallRow>() {
        report.total_rows += 1;
        let row = match result {
            Ok(r) => r,
            Err(_) => {
                report.parse_errors += 1;
                continue;
            }
        };
        let year = match parse_i32_safe(row.year.as_deref()) {
            Some(y) if y > 0 => y,
            _ => {
                report.parse_errors += 1;
                continue;
            }
        };
        let value = match parse_f64_safe(row.total.as_deref()) {
            Some(v) if v >= 0.0 => v,
            _ => {
                report.parse_errors += 1;
                continue;
            }
        };
        records.push(RainfallRecord {
            year,
            month: parse_month_safe(row.month.as_deref()),
            value,
            ward_id: parse_u32_safe(row.ward.as_deref()),
        });
    }

    report.loaded_rows = records.len();
    Ok((records, report))
}

pub fn load_rainfall_csv(path: &Path) -> Result<(Vec<RainfallRecord>, LoadReport)> {
    let file = std::fs::File::open(path)?;
    read_rainfall(file)
}

/// Parse the pre-2016 `crs` member, e.g.
/// `{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::32643"}}`.
fn legacy_crs(foreign: Option<&JsonObject>) -> Result<Crs> {
    let name = foreign
        .and_then(|m| m.get("crs"))
        .and_then(|c| c.get("properties"))
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str());
    match name {
        Some(n) => n.parse(),
        None => Ok(Crs::Unspecified),
    }
}

fn features_of(text: &str) -> Result<(Crs, Vec<Feature>)> {
    let gj: GeoJson = text.parse()?;
    match gj {
        GeoJson::FeatureCollection(fc) => {
            let crs = legacy_crs(fc.foreign_members.as_ref())?;
            Ok((crs, fc.features))
        }
        GeoJson::Feature(f) => {
            let crs = legacy_crs(f.foreign_members.as_ref())?;
            Ok((crs, vec![f]))
        }
        GeoJson::Geometry(g) => Ok((
            Crs::Unspecified,
            vec![Feature {
                bbox: None,
                geometry: Some(g),
                id: None,
                properties: None,
                foreign_members: None,
            }],
        )),
    }
}

/// A missing geometry becomes an empty collection so the normalizer reports
/// it against the right feature index.
fn geometry_of(feature: Feature) -> Result<Geometry<f64>> {
    match feature.geometry {
        Some(gj) => Ok(gj.value.try_into()?),
        None => Ok(Geometry::GeometryCollection(GeometryCollection::default())),
    }
}

fn property<'a>(feature: &'a Feature, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter().find_map(|k| feature.property(k).filter(|v| !v.is_null()))
}

fn ward_id_of(value: &JsonValue) -> Option<u32> {
    match value {
        JsonValue::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .or_else(|| parse_u32_safe(Some(&n.to_string()))),
        JsonValue::String(s) => parse_u32_safe(Some(s)),
        _ => None,
    }
}

pub fn parse_feature_layer(text: &str, name: &str, kind: FeatureKind) -> Result<RawLayer> {
    let (crs, features) = features_of(text)?;
    let geometries = features
        .into_iter()
        .map(geometry_of)
        .collect::<Result<Vec<_>>>()?;
    Ok(RawLayer {
        name: name.to_string(),
        kind,
        crs,
        geometries,
    })
}

pub fn parse_ward_layer(text: &str) -> Result<RawWardLayer> {
    let (crs, features) = features_of(text)?;
    let mut wards = Vec::with_capacity(features.len());
    for (index, feature) in features.into_iter().enumerate() {
        let Some(id) = property(&feature, &WARD_ID_KEYS).and_then(ward_id_of) else {
            return Err(EngineError::Geometry {
                layer: "wards".into(),
                index,
                reason: "ward has no identifier".into(),
            });
        };
        let name = property(&feature, &WARD_NAME_KEYS)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| format!("Ward {}", id));
        wards.push(RawWard {
            id,
            name,
            boundary: geometry_of(feature)?,
        });
    }
    Ok(RawWardLayer { crs, wards })
}

pub fn load_feature_layer(path: &Path, kind: FeatureKind) -> Result<RawLayer> {
    let text = std::fs::read_to_string(path)?;
    parse_feature_layer(&text, kind.label(), kind)
}

pub fn load_ward_layer(path: &Path) -> Result<RawWardLayer> {
    let text = std::fs::read_to_string(path)?;
    parse_ward_layer(&text)
}

/// Load every dataset found in `dir`. The ward layer is required; an absent
/// feature layer or rainfall file is skipped here and reported by the run.
pub fn load_datasets(dir: &Path) -> Result<(Inputs, LoadReport)> {
    let wards_path = dir.join(WARDS_FILE);
    if !wards_path.exists() {
        return Err(EngineError::MissingDataset(wards_path.display().to_string()));
    }
    let wards = load_ward_layer(&wards_path)?;
    info!("loaded {} wards from {}", wards.wards.len(), wards_path.display());

    let mut layers = Vec::new();
    for (kind, file) in LAYER_FILES {
        let path = dir.join(file);
        if !path.exists() {
            warn!("{} not found; {} layer skipped", path.display(), kind.label());
            continue;
        }
        let layer = load_feature_layer(&path, kind)?;
        info!("loaded {} {} features", layer.geometries.len(), kind.label());
        layers.push(layer);
    }

    let rainfall_path = dir.join(RAINFALL_FILE);
    let (rainfall, report) = if rainfall_path.exists() {
        load_rainfall_csv(&rainfall_path)?
    } else {
        warn!("{} not found; rainfall skipped", rainfall_path.display());
        (Vec::new(), LoadReport::default())
    };

    Ok((
        Inputs {
            wards,
            layers,
            rainfall,
        },
        report,
    ))
}
