//! Time-optimal sailing route planning over forecast weather.
//!
//! The pipeline runs in three stages, each keyed by the meshed area id:
//! [`Planner::build_mesh`] constructs the adaptive navigation mesh,
//! [`Planner::fetch_weather`] binds a forecast to it through the weather
//! port, and [`Planner::calculate_route`] searches time-optimal variants
//! for every candidate departure in a time window.

pub mod difficulty;
pub mod error;
pub mod geodesy;
pub mod geometry;
pub mod gpx_export;
pub mod mesh;
pub mod models;
pub mod polar;
pub mod router;
pub mod store;
pub mod weather;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use crate::error::{CandidateFailure, CandidateFailureKind, RouteError};
pub use crate::models::{
    ControlPoint, ControlPointKind, Coordinate, MeshParams, MeshSpec, MeshedAreaId, RouteResult,
    RouteSegment, RouteVariant, TimeWindow, Version, WeatherSample,
};
pub use crate::polar::VesselPolar;
pub use crate::router::RouterConfig;

use crate::geometry::GeometryPort;
use crate::mesh::{auto_mesh_params, validate_mesh_params, MeshBuilder};
use crate::models::validate_control_points;
use crate::router::Router;
use crate::store::MeshStore;
use crate::weather::{WeatherBinder, WeatherPort};

/// Cooperative cancellation flag shared across a request; every pipeline
/// stage checks it at bounded intervals.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pipeline entry points over injected ports. Holds no per-request state;
/// the mesh store is passed in explicitly so tests can start empty.
pub struct Planner<G, W, S> {
    geometry: G,
    weather: W,
    store: S,
    router_config: RouterConfig,
}

impl<G, W, S> Planner<G, W, S>
where
    G: GeometryPort,
    W: WeatherPort,
    S: MeshStore,
{
    pub fn new(geometry: G, weather: W, store: S) -> Self {
        Self {
            geometry,
            weather,
            store,
            router_config: RouterConfig::default(),
        }
    }

    pub fn with_router_config(mut self, router_config: RouterConfig) -> Self {
        self.router_config = router_config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Builds and publishes the navigation mesh for a control sequence.
    pub fn build_mesh(
        &self,
        control_points: &[ControlPoint],
        spec: MeshSpec,
        cancel: &CancelToken,
    ) -> Result<MeshedAreaId, RouteError> {
        validate_control_points(control_points)?;
        let params = match spec {
            MeshSpec::Auto => auto_mesh_params(control_points)?,
            MeshSpec::Manual(params) => {
                validate_mesh_params(&params)?;
                params
            }
        };
        tracing::debug!("building mesh with {params:?}");
        let area = MeshBuilder::new(&self.geometry, params).build(control_points, cancel)?;
        Ok(self.store.put(area))
    }

    /// Fetches the forecast over a horizon and attaches it to the area,
    /// returning the new weather version.
    pub async fn fetch_weather(
        &self,
        id: MeshedAreaId,
        horizon_start: DateTime<Utc>,
        horizon_end: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<Version, RouteError> {
        let area = self.store.get(id).ok_or(RouteError::NotFound(id))?;
        let weathered = WeatherBinder::new(&self.weather)
            .bind(area, horizon_start, horizon_end, cancel)
            .await?;
        self.store.attach_weather(id, weathered)
    }

    /// Searches time-optimal route variants for every candidate departure
    /// in the window, against the latest attached weather.
    pub fn calculate_route(
        &self,
        id: MeshedAreaId,
        polar: &VesselPolar,
        window: &TimeWindow,
        cancel: &CancelToken,
    ) -> Result<RouteResult, RouteError> {
        let weathered = self
            .store
            .get_weather(id)
            .ok_or(RouteError::WeatherNotFound(id))?;
        Router::new(&weathered, polar, self.router_config).calculate(window, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
