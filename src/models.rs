use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RouteError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }

    /// Linear interpolation in plate-carree space; only for corridor shaping.
    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self {
            lat: self.lat + (other.lat - self.lat) * t,
            lon: self.lon + (other.lon - self.lon) * t,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlPointKind {
    Start,
    Waypoint,
    Mark,
    Gate,
    Finish,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPoint {
    pub position: Coordinate,
    pub kind: ControlPointKind,
    #[serde(default)]
    pub width_m: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ControlPoint {
    pub fn new(position: Coordinate, kind: ControlPointKind) -> Self {
        Self {
            position,
            kind,
            width_m: None,
            description: None,
        }
    }
}

/// Positions closer than this count as the same control point.
const DISTINCT_POSITION_M: f64 = 1.0;

/// Entry validation for a control sequence: exactly one start (first) and
/// one finish (last), pairwise-distinct positions, gate widths present.
pub fn validate_control_points(points: &[ControlPoint]) -> Result<(), RouteError> {
    if points.len() < 2 {
        return Err(RouteError::InvalidInput(
            "at least two control points required (start and finish)".into(),
        ));
    }
    for (i, cp) in points.iter().enumerate() {
        if !cp.position.is_finite() {
            return Err(RouteError::InvalidInput(format!(
                "control point {i} has a non-finite position"
            )));
        }
        if !(-90.0..=90.0).contains(&cp.position.lat)
            || !(-180.0..=180.0).contains(&cp.position.lon)
        {
            return Err(RouteError::InvalidInput(format!(
                "control point {i} is outside WGS84 bounds"
            )));
        }
        match cp.kind {
            ControlPointKind::Start if i != 0 => {
                return Err(RouteError::InvalidInput(format!(
                    "start must be the first control point, found at index {i}"
                )));
            }
            ControlPointKind::Finish if i != points.len() - 1 => {
                return Err(RouteError::InvalidInput(format!(
                    "finish must be the last control point, found at index {i}"
                )));
            }
            ControlPointKind::Gate => {
                match cp.width_m {
                    Some(w) if w > 0.0 => {}
                    _ => {
                        return Err(RouteError::InvalidInput(format!(
                            "gate at index {i} requires a positive width_m"
                        )));
                    }
                }
            }
            ControlPointKind::Waypoint | ControlPointKind::Mark => {
                if cp.width_m.is_some() {
                    return Err(RouteError::InvalidInput(format!(
                        "width_m is only valid on gate, start and finish (index {i})"
                    )));
                }
            }
            _ => {}
        }
        if let Some(w) = cp.width_m {
            if !w.is_finite() || w <= 0.0 {
                return Err(RouteError::InvalidInput(format!(
                    "control point {i} has a non-positive width_m"
                )));
            }
        }
    }
    if points[0].kind != ControlPointKind::Start {
        return Err(RouteError::InvalidInput(
            "first control point must be the start".into(),
        ));
    }
    if points[points.len() - 1].kind != ControlPointKind::Finish {
        return Err(RouteError::InvalidInput(
            "last control point must be the finish".into(),
        ));
    }
    let starts = points
        .iter()
        .filter(|p| p.kind == ControlPointKind::Start)
        .count();
    let finishes = points
        .iter()
        .filter(|p| p.kind == ControlPointKind::Finish)
        .count();
    if starts != 1 || finishes != 1 {
        return Err(RouteError::InvalidInput(
            "exactly one start and one finish required".into(),
        ));
    }
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            let d = crate::geodesy::great_circle_distance_m(
                points[i].position,
                points[j].position,
            )?;
            if d < DISTINCT_POSITION_M {
                return Err(RouteError::InvalidInput(format!(
                    "control points {i} and {j} are closer than 1 m"
                )));
            }
        }
    }
    Ok(())
}

/// Effective mesh configuration, either user-provided or auto-derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshParams {
    /// Half-width of the high-resolution corridor around the rhumb lines.
    pub corridor_nm: f64,
    pub ring1_m: f64,
    pub ring2_m: f64,
    pub ring3_m: f64,
    /// Target vertex area density (m^2 per vertex), tier 1 to 3.
    pub area1: f64,
    pub area2: f64,
    pub area3: f64,
    pub shoreline_avoid_m: f64,
    pub max_weather_points: usize,
    pub weather_grid_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeshSpec {
    Auto,
    Manual(MeshParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MeshedAreaId(pub u64);

impl fmt::Display for MeshedAreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh-{}", self.0)
    }
}

/// Monotonic version of the weather attached to a meshed area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(pub u64);

/// One forecast sample; wind direction is the meteorological source
/// direction ("blowing from"), speeds are canonical knots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub position: Coordinate,
    pub valid_time: DateTime<Utc>,
    pub wind_speed_kt: f64,
    pub wind_dir_deg_from: f64,
    pub wave_height_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointOfSail {
    InIrons,
    CloseHauled,
    CloseReach,
    BeamReach,
    BroadReach,
    Running,
    DeadRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
    Easy,
    Moderate,
    Challenging,
    Difficult,
    Extreme,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub num_checks: u32,
}

pub const MAX_TIME_WINDOW_CHECKS: u32 = 24;

impl TimeWindow {
    pub fn validate(&self) -> Result<(), RouteError> {
        if self.start_time > self.end_time {
            return Err(RouteError::InvalidInput(
                "time window start must not be after its end".into(),
            ));
        }
        if self.num_checks < 1 || self.num_checks > MAX_TIME_WINDOW_CHECKS {
            return Err(RouteError::InvalidInput(format!(
                "num_checks must be in [1, {MAX_TIME_WINDOW_CHECKS}]"
            )));
        }
        Ok(())
    }

    /// Candidate departure instants, uniform over the window and inclusive
    /// of both endpoints; a single check departs at the window start.
    pub fn departure_times(&self) -> Vec<DateTime<Utc>> {
        if self.num_checks == 1 {
            return vec![self.start_time];
        }
        let span = self.end_time - self.start_time;
        let step_ms = span.num_milliseconds() / (self.num_checks as i64 - 1);
        (0..self.num_checks)
            .map(|i| self.start_time + Duration::milliseconds(step_ms * i as i64))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSegment {
    pub from_pos: Coordinate,
    pub to_pos: Coordinate,
    pub bearing: f64,
    pub distance_nm: f64,
    pub time_s: f64,
    pub boat_speed_kt: f64,
    pub wind_speed_kt: f64,
    pub wind_dir_deg_from: f64,
    /// Signed true wind angle; negative means wind on the port side.
    pub twa: f64,
    pub point_of_sail: PointOfSail,
    pub wave_height_m: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteVariant {
    pub departure_time: DateTime<Utc>,
    pub segments: Vec<RouteSegment>,
    pub total_time_h: f64,
    pub total_distance_nm: f64,
    pub avg_speed_kt: f64,
    pub avg_wind_kt: f64,
    pub avg_wave_m: f64,
    pub tacks: usize,
    pub jibes: usize,
    pub difficulty_score: f64,
    pub difficulty_level: DifficultyLevel,
    pub estimated_arrival: DateTime<Utc>,
    pub is_best: bool,
}

/// Compact description of the vessel a route was planned for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselSummary {
    pub twa_points: usize,
    pub tws_points: usize,
    pub max_wind_kt: f64,
    pub tack_duration_s: f64,
    pub jibe_duration_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    pub meshed_area_id: MeshedAreaId,
    pub vessel: VesselSummary,
    pub variants: Vec<RouteVariant>,
    pub best_variant_index: usize,
    pub overall_difficulty_score: f64,
    pub overall_difficulty: DifficultyLevel,
}
