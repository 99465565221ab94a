use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geodesy::GeodesyError;
use crate::mesh::MeshFileError;
use crate::models::MeshedAreaId;
use crate::polar::PolarError;

/// Why a single departure candidate produced no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateFailureKind {
    /// The route would arrive outside the weather horizon.
    HorizonExceeded,
    /// No feasible path between two control vertices under the forecast.
    NoNavigablePath,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub departure_time: DateTime<Utc>,
    pub kind: CandidateFailureKind,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("control point {index} has no navigable vertex within {ceiling_m:.0} m")]
    ControlPointUnreachable { index: usize, ceiling_m: f64 },

    #[error("control point {index} lies in a sea basin disconnected from the start")]
    DisconnectedControlPoints { index: usize },

    #[error("weather provider unavailable: {0}")]
    WeatherUnavailable(String),

    #[error("weather provider rate limited")]
    RateLimited,

    #[error("weather provider network error: {0}")]
    NetworkError(String),

    #[error("geometry source unavailable: {0}")]
    GeometryUnavailable(String),

    #[error("route arrival falls outside the weather horizon")]
    HorizonExceeded,

    #[error("no navigable path between control points under the current forecast")]
    NoNavigablePath,

    #[error("none of the {} departure candidates produced a feasible route", .0.len())]
    AllCandidatesInfeasible(Vec<CandidateFailure>),

    #[error("meshed area {0} not found")]
    NotFound(MeshedAreaId),

    #[error("no weather attached to meshed area {0}")]
    WeatherNotFound(MeshedAreaId),

    #[error("operation cancelled")]
    Cancelled,

    #[error("geodesic computation failed: {0}")]
    Geodesy(#[from] GeodesyError),

    #[error("invalid polar: {0}")]
    Polar(#[from] PolarError),

    #[error("mesh persistence error: {0}")]
    MeshFile(#[from] MeshFileError),

    #[error("failed to build GPX document: {0}")]
    Gpx(#[from] gpx::errors::GpxError),
}

impl RouteError {
    /// Per-candidate failures the router absorbs instead of aborting the
    /// whole request.
    pub fn candidate_failure_kind(&self) -> Option<CandidateFailureKind> {
        match self {
            RouteError::HorizonExceeded => Some(CandidateFailureKind::HorizonExceeded),
            RouteError::NoNavigablePath => Some(CandidateFailureKind::NoNavigablePath),
            _ => None,
        }
    }
}
