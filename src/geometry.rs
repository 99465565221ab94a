//! Landmass geometry port and the thin adapters shipped with the core.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::error::RouteError;
use crate::geodesy::{METERS_PER_NM, NM_PER_DEGREE};
use crate::models::Coordinate;

const METERS_PER_DEGREE: f64 = NM_PER_DEGREE * METERS_PER_NM;

/// Obstacle source consumed by the mesh builder. Implementations answer in
/// WGS84; distances are meters.
pub trait GeometryPort: Send + Sync {
    fn is_land(&self, p: Coordinate) -> Result<bool, RouteError>;
    fn distance_to_land_m(&self, p: Coordinate) -> Result<f64, RouteError>;
    fn segment_crosses_land(
        &self,
        a: Coordinate,
        b: Coordinate,
        within_m: f64,
    ) -> Result<bool, RouteError>;
}

/// Boundless open water; the null object for tests and benchmarks.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSea;

impl GeometryPort for OpenSea {
    fn is_land(&self, _p: Coordinate) -> Result<bool, RouteError> {
        Ok(false)
    }

    fn distance_to_land_m(&self, _p: Coordinate) -> Result<f64, RouteError> {
        Ok(f64::INFINITY)
    }

    fn segment_crosses_land(
        &self,
        _a: Coordinate,
        _b: Coordinate,
        _within_m: f64,
    ) -> Result<bool, RouteError> {
        Ok(false)
    }
}

#[derive(Debug, Deserialize)]
struct LandFile {
    /// Rings of [lon, lat] pairs, closed implicitly.
    polygons: Vec<Vec<[f64; 2]>>,
}

/// Land as a set of polygon rings in WGS84. Point-in-polygon by ray
/// casting; distances against ring edges in a local tangent frame.
#[derive(Debug, Clone, Default)]
pub struct LandPolygons {
    rings: Vec<Vec<Coordinate>>,
}

impl LandPolygons {
    pub fn new(rings: Vec<Vec<Coordinate>>) -> Self {
        Self {
            rings: rings.into_iter().filter(|r| r.len() >= 3).collect(),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RouteError> {
        let file = File::open(path.as_ref()).map_err(|err| {
            RouteError::GeometryUnavailable(format!(
                "cannot open land file {}: {err}",
                path.as_ref().display()
            ))
        })?;
        let parsed: LandFile = serde_json::from_reader(BufReader::new(file)).map_err(|err| {
            RouteError::GeometryUnavailable(format!("malformed land file: {err}"))
        })?;
        Ok(Self::new(
            parsed
                .polygons
                .into_iter()
                .map(|ring| {
                    ring.into_iter()
                        .map(|[lon, lat]| Coordinate { lat, lon })
                        .collect()
                })
                .collect(),
        ))
    }

    /// Axis-aligned land rectangles, handy for carving test basins.
    pub fn from_boxes(boxes: &[(f64, f64, f64, f64)]) -> Self {
        let rings = boxes
            .iter()
            .map(|&(min_lat, max_lat, min_lon, max_lon)| {
                vec![
                    Coordinate::new(min_lat, min_lon),
                    Coordinate::new(min_lat, max_lon),
                    Coordinate::new(max_lat, max_lon),
                    Coordinate::new(max_lat, min_lon),
                ]
            })
            .collect();
        Self::new(rings)
    }

    fn contains(&self, p: Coordinate) -> bool {
        self.rings.iter().any(|ring| ring_contains(ring, p))
    }

    fn distance_m(&self, p: Coordinate) -> f64 {
        if self.contains(p) {
            return 0.0;
        }
        let mut best = f64::INFINITY;
        for ring in &self.rings {
            for i in 0..ring.len() {
                let a = ring[i];
                let b = ring[(i + 1) % ring.len()];
                best = best.min(point_segment_distance_m(p, a, b));
            }
        }
        best
    }
}

fn ring_contains(ring: &[Coordinate], p: Coordinate) -> bool {
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if (a.lat > p.lat) != (b.lat > p.lat) {
            let lon_at =
                a.lon + (p.lat - a.lat) / (b.lat - a.lat) * (b.lon - a.lon);
            if p.lon < lon_at {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Distance from `p` to segment `ab` in a local tangent frame around `p`.
pub(crate) fn point_segment_distance_m(p: Coordinate, a: Coordinate, b: Coordinate) -> f64 {
    let cos_lat = p.lat.to_radians().cos();
    let ax = (a.lon - p.lon) * cos_lat * METERS_PER_DEGREE;
    let ay = (a.lat - p.lat) * METERS_PER_DEGREE;
    let bx = (b.lon - p.lon) * cos_lat * METERS_PER_DEGREE;
    let by = (b.lat - p.lat) * METERS_PER_DEGREE;

    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f64::EPSILON {
        return (ax * ax + ay * ay).sqrt();
    }
    let t = (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0);
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    (cx * cx + cy * cy).sqrt()
}

impl GeometryPort for LandPolygons {
    fn is_land(&self, p: Coordinate) -> Result<bool, RouteError> {
        Ok(self.contains(p))
    }

    fn distance_to_land_m(&self, p: Coordinate) -> Result<f64, RouteError> {
        Ok(self.distance_m(p))
    }

    fn segment_crosses_land(
        &self,
        a: Coordinate,
        b: Coordinate,
        within_m: f64,
    ) -> Result<bool, RouteError> {
        let length_m = crate::geodesy::great_circle_distance_m(a, b)?;
        let step_m = (within_m / 2.0).max(25.0);
        let steps = ((length_m / step_m).ceil() as usize).clamp(1, 512);
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let sample = a.interpolate(b, t);
            if self.distance_m(sample) < within_m {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
