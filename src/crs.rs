// Coordinate reference systems and the reprojection that brings every layer
// onto one metric plane. Projection math is delegated to proj4rs.
use geo::{Coord, Geometry, MapCoords};
use proj4rs::proj::Proj;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// Geographic lon/lat, EPSG:4326.
    Wgs84,
    /// UTM on WGS84, EPSG:326zz (north) or EPSG:327zz (south).
    Utm { zone: u8, north: bool },
    /// A planar metre grid known only by name.
    Local(String),
    Unspecified,
}

impl Crs {
    pub fn is_projected(&self) -> bool {
        matches!(self, Crs::Utm { .. } | Crs::Local(_))
    }

    /// proj4 definition of a concrete CRS; `None` for grids with no
    /// geographic anchor.
    fn proj_definition(&self) -> Option<String> {
        match self {
            Crs::Wgs84 => Some("+proj=longlat +datum=WGS84 +no_defs".to_string()),
            Crs::Utm { zone, north } => Some(format!(
                "+proj=utm +zone={}{} +datum=WGS84 +units=m +no_defs",
                zone,
                if *north { "" } else { " +south" }
            )),
            Crs::Local(_) | Crs::Unspecified => None,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Wgs84 => write!(f, "EPSG:4326"),
            Crs::Utm { zone, north: true } => write!(f, "EPSG:326{:02}", zone),
            Crs::Utm { zone, north: false } => write!(f, "EPSG:327{:02}", zone),
            Crs::Local(name) => write!(f, "LOCAL:{}", name),
            Crs::Unspecified => write!(f, "UNSPECIFIED"),
        }
    }
}

impl FromStr for Crs {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("unspecified") {
            return Ok(Crs::Unspecified);
        }
        if let Some(name) = s.strip_prefix("LOCAL:") {
            return Ok(Crs::Local(name.to_string()));
        }
        // Accept "EPSG:32643" as well as the OGC URN "urn:ogc:def:crs:EPSG::32643".
        let code = s
            .rsplit(':')
            .next()
            .and_then(|c| c.parse::<u32>().ok())
            .filter(|_| s.to_ascii_uppercase().contains("EPSG"));
        match code {
            Some(4326) => Ok(Crs::Wgs84),
            Some(c) if (32601..=32660).contains(&c) => Ok(Crs::Utm {
                zone: (c - 32600) as u8,
                north: true,
            }),
            Some(c) if (32701..=32760).contains(&c) => Ok(Crs::Utm {
                zone: (c - 32700) as u8,
                north: false,
            }),
            _ if s.ends_with("CRS84") => Ok(Crs::Wgs84),
            _ => Err(EngineError::CrsMismatch(format!("unsupported CRS '{}'", s))),
        }
    }
}

impl TryFrom<String> for Crs {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(value: Crs) -> Self {
        value.to_string()
    }
}

/// Whether every coordinate of the geometry lies inside lon/lat range.
pub fn looks_geographic(geom: &Geometry<f64>) -> bool {
    use geo::CoordsIter;
    geom.coords_iter()
        .all(|c| c.x.abs() <= 180.0 && c.y.abs() <= 90.0)
}

/// Decide which concrete CRS a layer is in, given its declared CRS and its
/// coordinates. Returns the resolved CRS and whether it had to be assumed.
pub fn resolve(declared: &Crs, geoms: &[Geometry<f64>]) -> Result<(Crs, bool), EngineError> {
    match declared {
        Crs::Unspecified => {
            if geoms.iter().all(looks_geographic) {
                Ok((Crs::Wgs84, true))
            } else {
                Err(EngineError::CrsMismatch(
                    "layer has no CRS and coordinates are not geographic".to_string(),
                ))
            }
        }
        other => Ok((other.clone(), false)),
    }
}

/// Check that `from` can be brought onto `to` before touching any geometry.
pub fn check_reconcilable(from: &Crs, to: &Crs) -> Result<(), EngineError> {
    match (from, to) {
        (a, b) if a == b => Ok(()),
        (Crs::Wgs84 | Crs::Utm { .. }, Crs::Wgs84 | Crs::Utm { .. }) => Ok(()),
        _ => Err(EngineError::CrsMismatch(format!(
            "cannot reconcile {} with {}",
            from, to
        ))),
    }
}

fn build_proj(crs: &Crs) -> Result<Proj, EngineError> {
    let def = crs.proj_definition().ok_or_else(|| {
        EngineError::CrsMismatch(format!("{} has no projection definition", crs))
    })?;
    Proj::from_proj_string(&def).map_err(|e| EngineError::Projection(format!("{}: {}", crs, e)))
}

/// A prepared transformation between two CRSs. Built once per layer and
/// applied to every geometry in it.
pub struct Reprojector {
    // `None` when source and target are the same CRS.
    projs: Option<(Proj, Proj)>,
    from_geographic: bool,
    to_geographic: bool,
}

impl Reprojector {
    /// Callers check `check_reconcilable` first.
    pub fn new(from: &Crs, to: &Crs) -> Result<Self, EngineError> {
        let projs = if from == to {
            None
        } else {
            Some((build_proj(from)?, build_proj(to)?))
        };
        Ok(Self {
            projs,
            from_geographic: *from == Crs::Wgs84,
            to_geographic: *to == Crs::Wgs84,
        })
    }

    /// Geographic coordinates are lon/lat degrees on both sides; proj4rs
    /// works in radians.
    pub fn coord(&self, c: Coord<f64>) -> Result<Coord<f64>, EngineError> {
        let Some((from, to)) = &self.projs else {
            return Ok(c);
        };
        let mut p = if self.from_geographic {
            (c.x.to_radians(), c.y.to_radians(), 0.0)
        } else {
            (c.x, c.y, 0.0)
        };
        proj4rs::transform::transform(from, to, &mut p)
            .map_err(|e| EngineError::Projection(format!("({}, {}): {}", c.x, c.y, e)))?;
        if self.to_geographic {
            Ok(Coord {
                x: p.0.to_degrees(),
                y: p.1.to_degrees(),
            })
        } else {
            Ok(Coord { x: p.0, y: p.1 })
        }
    }

    pub fn geometry(&self, geom: &Geometry<f64>) -> Result<Geometry<f64>, EngineError> {
        if self.projs.is_none() {
            return Ok(geom.clone());
        }
        geom.try_map_coords(|c| self.coord(c))
    }
}
