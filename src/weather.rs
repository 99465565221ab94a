//! Weather binding: sampling centroids over the mesh, forecast fetch through
//! the weather port, and spatio-temporal interpolation for the router.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::error::RouteError;
use crate::geodesy::{great_circle_distance_m, normalize_heading, METERS_PER_NM, NM_PER_DEGREE};
use crate::mesh::MeshedArea;
use crate::models::{Coordinate, Version, WeatherSample};
use crate::CancelToken;

const METERS_PER_DEGREE: f64 = NM_PER_DEGREE * METERS_PER_NM;

/// Centroids each vertex is interpolated from.
const CENTROIDS_PER_VERTEX: usize = 3;
/// Floor for inverse-distance weights, so a vertex sitting on a centroid
/// does not divide by zero.
const IDW_FLOOR_M: f64 = 1.0;
const RETRY_BACKOFF_MS: u64 = 500;
const KMEANS_ITERATIONS: usize = 20;
/// Samples fetched for the same request point are matched back to it within
/// this radius.
const CENTROID_MATCH_M: f64 = 500.0;

/// Forecast source. The only externally blocking boundary of the pipeline.
pub trait WeatherPort: Send + Sync {
    fn fetch(
        &self,
        points: &[Coordinate],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<WeatherSample>, RouteError>> + Send;
}

/// Uniform forecast everywhere, emitted on an hourly schedule; the offline
/// provider used by the CLI and the tests.
#[derive(Debug, Clone, Copy)]
pub struct ConstantWeather {
    pub wind_speed_kt: f64,
    pub wind_dir_deg_from: f64,
    pub wave_height_m: f64,
}

impl WeatherPort for ConstantWeather {
    async fn fetch(
        &self,
        points: &[Coordinate],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WeatherSample>, RouteError> {
        let mut samples = Vec::new();
        let mut t = from;
        while t <= to {
            for &position in points {
                samples.push(WeatherSample {
                    position,
                    valid_time: t,
                    wind_speed_kt: self.wind_speed_kt,
                    wind_dir_deg_from: self.wind_dir_deg_from,
                    wave_height_m: self.wave_height_m,
                });
            }
            t += Duration::hours(1);
        }
        Ok(samples)
    }
}

/// Wind stored as the (east, north) components of the towards-vector so
/// interpolation blends directions correctly.
#[derive(Debug, Clone, Copy, PartialEq)]
struct WindWave {
    u_kt: f64,
    v_kt: f64,
    wave_m: f64,
}

impl WindWave {
    fn from_sample(sample: &WeatherSample) -> Self {
        let to_rad = (sample.wind_dir_deg_from + 180.0).to_radians();
        Self {
            u_kt: sample.wind_speed_kt * to_rad.sin(),
            v_kt: sample.wind_speed_kt * to_rad.cos(),
            wave_m: sample.wave_height_m,
        }
    }

    fn zero() -> Self {
        Self {
            u_kt: 0.0,
            v_kt: 0.0,
            wave_m: 0.0,
        }
    }

    fn lerp(a: Self, b: Self, t: f64) -> Self {
        Self {
            u_kt: a.u_kt + (b.u_kt - a.u_kt) * t,
            v_kt: a.v_kt + (b.v_kt - a.v_kt) * t,
            wave_m: a.wave_m + (b.wave_m - a.wave_m) * t,
        }
    }

    fn scaled_add(&mut self, other: Self, w: f64) {
        self.u_kt += other.u_kt * w;
        self.v_kt += other.v_kt * w;
        self.wave_m += other.wave_m * w;
    }
}

/// Interpolated conditions at one point and instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvSample {
    pub wind_speed_kt: f64,
    pub wind_dir_deg_from: f64,
    pub wave_height_m: f64,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SampleError {
    #[error("requested instant lies outside the weather horizon")]
    OutOfHorizon,
}

#[derive(Debug, Clone, Default)]
struct VertexBinding {
    centroids: Vec<u32>,
    weights: Vec<f64>,
}

/// A meshed area with an attached forecast: immutable once returned by the
/// binder, shared read-only by the router.
#[derive(Debug)]
pub struct WeatheredMesh {
    pub area: Arc<MeshedArea>,
    /// Assigned by the mesh store when the weather is attached.
    pub version: Version,
    pub valid_times: Vec<DateTime<Utc>>,
    pub centroids: Vec<Coordinate>,
    /// samples[centroid][time_idx]
    samples: Vec<Vec<WindWave>>,
    bindings: Vec<VertexBinding>,
}

impl WeatheredMesh {
    pub fn horizon(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            *self.valid_times.first().expect("non-empty schedule"),
            *self.valid_times.last().expect("non-empty schedule"),
        )
    }

    pub fn covers(&self, t: DateTime<Utc>) -> bool {
        let (start, end) = self.horizon();
        t >= start && t <= end
    }

    /// Wind and wave at a position and instant: inverse-distance blend over
    /// the centroids bound to the nearest vertex, linear in time between the
    /// bracketing valid-times. Never extrapolates beyond the horizon.
    pub fn sample(&self, position: Coordinate, t: DateTime<Utc>) -> Result<EnvSample, SampleError> {
        if !self.covers(t) {
            return Err(SampleError::OutOfHorizon);
        }
        let vertex = self
            .area
            .nearest_vertex(position, true)
            .expect("weathered mesh has navigable vertices");
        let binding = &self.bindings[vertex as usize];

        let upper = self
            .valid_times
            .partition_point(|vt| *vt <= t)
            .min(self.valid_times.len() - 1);
        let (t0_idx, t1_idx) = if upper == 0 { (0, 0) } else { (upper - 1, upper) };
        let frac = if t0_idx == t1_idx {
            0.0
        } else {
            let span = (self.valid_times[t1_idx] - self.valid_times[t0_idx])
                .num_milliseconds() as f64;
            (t - self.valid_times[t0_idx]).num_milliseconds() as f64 / span
        };

        let mut blended = WindWave::zero();
        for (&cid, &w) in binding.centroids.iter().zip(&binding.weights) {
            let series = &self.samples[cid as usize];
            let value = WindWave::lerp(series[t0_idx], series[t1_idx], frac);
            blended.scaled_add(value, w);
        }

        let wind_speed_kt = blended.u_kt.hypot(blended.v_kt);
        let dir_to = blended.u_kt.atan2(blended.v_kt).to_degrees();
        Ok(EnvSample {
            wind_speed_kt,
            wind_dir_deg_from: normalize_heading(dir_to + 180.0),
            wave_height_m: blended.wave_m,
        })
    }
}

pub struct WeatherBinder<'a, W: WeatherPort> {
    port: &'a W,
}

impl<'a, W: WeatherPort> WeatherBinder<'a, W> {
    pub fn new(port: &'a W) -> Self {
        Self { port }
    }

    /// Fetches the forecast over the horizon and attaches it to a snapshot
    /// of the meshed area. Retries the port exactly once on transient
    /// failures before surfacing them.
    pub async fn bind(
        &self,
        area: Arc<MeshedArea>,
        horizon_start: DateTime<Utc>,
        horizon_end: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<WeatheredMesh, RouteError> {
        if horizon_start > horizon_end {
            return Err(RouteError::InvalidInput(
                "weather horizon start must not be after its end".into(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(RouteError::Cancelled);
        }

        let centroids = select_centroids(&area);
        tracing::debug!("requesting forecast for {} centroids", centroids.len());

        let samples = match self.port.fetch(&centroids, horizon_start, horizon_end).await {
            Ok(samples) => samples,
            Err(err) if is_transient(&err) => {
                tracing::warn!("weather fetch failed ({err}), retrying once");
                tokio::time::sleep(std::time::Duration::from_millis(RETRY_BACKOFF_MS)).await;
                self.port.fetch(&centroids, horizon_start, horizon_end).await?
            }
            Err(err) => return Err(err),
        };
        if cancel.is_cancelled() {
            return Err(RouteError::Cancelled);
        }

        let (valid_times, series, live) =
            collect_series(&centroids, &samples, horizon_start, horizon_end)?;
        if live.len() * 2 < centroids.len() {
            return Err(RouteError::WeatherUnavailable(format!(
                "only {}/{} centroids returned usable forecasts",
                live.len(),
                centroids.len()
            )));
        }

        let bindings = bind_vertices(&area, &centroids, &live)?;

        tracing::info!(
            "weather bound: {} live centroids, {} timestamps, {} vertices",
            live.len(),
            valid_times.len(),
            bindings.len()
        );
        Ok(WeatheredMesh {
            area,
            version: Version(0),
            valid_times,
            centroids,
            samples: series,
            bindings,
        })
    }
}

fn is_transient(err: &RouteError) -> bool {
    matches!(
        err,
        RouteError::WeatherUnavailable(_) | RouteError::RateLimited | RouteError::NetworkError(_)
    )
}

/// Sampling locations: a regular grid at the configured spacing, clipped to
/// the convex hull of the mesh, reduced by K-means when it overshoots
/// `max_weather_points`.
fn select_centroids(area: &MeshedArea) -> Vec<Coordinate> {
    let params = &area.params;
    let bbox = &area.bounding_box;
    let spacing_m = params.weather_grid_km * 1000.0;
    let lat_step = spacing_m / METERS_PER_DEGREE;

    let hull = convex_hull(
        &area
            .vertices
            .iter()
            .map(|v| v.position)
            .collect::<Vec<_>>(),
    );

    let mut grid = Vec::new();
    let mut lat = bbox.min_lat + lat_step / 2.0;
    while lat <= bbox.max_lat {
        let lon_step = spacing_m / (METERS_PER_DEGREE * lat.to_radians().cos().max(0.01));
        let mut lon = bbox.min_lon + lon_step / 2.0;
        while lon <= bbox.max_lon {
            let p = Coordinate::new(lat, lon);
            if hull_contains(&hull, p) {
                grid.push(p);
            }
            lon += lon_step;
        }
        lat += lat_step;
    }
    if grid.is_empty() {
        grid.push(Coordinate::new(
            (bbox.min_lat + bbox.max_lat) / 2.0,
            (bbox.min_lon + bbox.max_lon) / 2.0,
        ));
    }
    if grid.len() > params.max_weather_points {
        grid = kmeans(&grid, params.max_weather_points);
    }
    grid
}

/// Monotone-chain convex hull over (lon, lat); returns a CCW ring.
fn convex_hull(points: &[Coordinate]) -> Vec<Coordinate> {
    let mut sorted: Vec<Coordinate> = points.to_vec();
    sorted.sort_by(|a, b| {
        a.lon
            .partial_cmp(&b.lon)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.lat.partial_cmp(&b.lat).unwrap_or(std::cmp::Ordering::Equal))
    });
    sorted.dedup_by(|a, b| a.lat == b.lat && a.lon == b.lon);
    if sorted.len() < 3 {
        return sorted;
    }

    let cross = |o: Coordinate, a: Coordinate, b: Coordinate| {
        (a.lon - o.lon) * (b.lat - o.lat) - (a.lat - o.lat) * (b.lon - o.lon)
    };

    let mut lower: Vec<Coordinate> = Vec::new();
    for &p in &sorted {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<Coordinate> = Vec::new();
    for &p in sorted.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

fn hull_contains(hull: &[Coordinate], p: Coordinate) -> bool {
    if hull.len() < 3 {
        return false;
    }
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let cross = (b.lon - a.lon) * (p.lat - a.lat) - (b.lat - a.lat) * (p.lon - a.lon);
        if cross < -1e-12 {
            return false;
        }
    }
    true
}

/// Lloyd's iterations with deterministic strided seeding; good enough to
/// thin an oversized centroid grid while keeping local groups represented.
fn kmeans(points: &[Coordinate], k: usize) -> Vec<Coordinate> {
    let stride = points.len() as f64 / k as f64;
    let mut centers: Vec<Coordinate> = (0..k)
        .map(|i| points[(i as f64 * stride) as usize % points.len()])
        .collect();

    let mid_lat = points.iter().map(|p| p.lat).sum::<f64>() / points.len() as f64;
    let cos_lat = mid_lat.to_radians().cos();
    let dist_sq = |a: Coordinate, b: Coordinate| {
        let dx = (a.lon - b.lon) * cos_lat;
        let dy = a.lat - b.lat;
        dx * dx + dy * dy
    };

    let mut assignment = vec![0usize; points.len()];
    for _ in 0..KMEANS_ITERATIONS {
        for (i, p) in points.iter().enumerate() {
            let mut best = 0;
            let mut best_d = f64::MAX;
            for (c, center) in centers.iter().enumerate() {
                let d = dist_sq(*p, *center);
                if d < best_d {
                    best_d = d;
                    best = c;
                }
            }
            assignment[i] = best;
        }
        let mut sums = vec![(0.0f64, 0.0f64, 0usize); k];
        for (i, p) in points.iter().enumerate() {
            let slot = &mut sums[assignment[i]];
            slot.0 += p.lat;
            slot.1 += p.lon;
            slot.2 += 1;
        }
        for (c, (lat_sum, lon_sum, count)) in sums.into_iter().enumerate() {
            if count > 0 {
                centers[c] = Coordinate::new(lat_sum / count as f64, lon_sum / count as f64);
            }
        }
    }
    centers
}

/// Groups fetched samples into per-centroid time series over the shared
/// valid-time schedule; centroids missing any scheduled timestamp are dead.
#[allow(clippy::type_complexity)]
fn collect_series(
    centroids: &[Coordinate],
    samples: &[WeatherSample],
    horizon_start: DateTime<Utc>,
    horizon_end: DateTime<Utc>,
) -> Result<(Vec<DateTime<Utc>>, Vec<Vec<WindWave>>, Vec<u32>), RouteError> {
    let mut valid_times: Vec<DateTime<Utc>> = samples
        .iter()
        .map(|s| s.valid_time)
        .filter(|t| *t >= horizon_start && *t <= horizon_end)
        .collect();
    valid_times.sort();
    valid_times.dedup();
    if valid_times.is_empty() {
        return Err(RouteError::WeatherUnavailable(
            "no forecast timestamps inside the requested horizon".into(),
        ));
    }

    let mut series: Vec<Vec<Option<WindWave>>> =
        vec![vec![None; valid_times.len()]; centroids.len()];
    for sample in samples {
        let Some(time_idx) = valid_times.iter().position(|t| *t == sample.valid_time) else {
            continue;
        };
        let mut best: Option<(usize, f64)> = None;
        for (cid, centroid) in centroids.iter().enumerate() {
            if let Ok(d) = great_circle_distance_m(sample.position, *centroid) {
                if best.map_or(true, |(_, bd)| d < bd) {
                    best = Some((cid, d));
                }
            }
        }
        if let Some((cid, d)) = best {
            if d <= CENTROID_MATCH_M {
                series[cid][time_idx] = Some(WindWave::from_sample(sample));
            }
        }
    }

    let mut live = Vec::new();
    let filled: Vec<Vec<WindWave>> = series
        .into_iter()
        .enumerate()
        .map(|(cid, row)| {
            if row.iter().all(Option::is_some) {
                live.push(cid as u32);
                row.into_iter().map(|s| s.expect("checked")).collect()
            } else {
                vec![WindWave::zero(); valid_times.len()]
            }
        })
        .collect();

    if live.is_empty() {
        return Err(RouteError::WeatherUnavailable(
            "no centroid returned a complete forecast series".into(),
        ));
    }
    Ok((valid_times, filled, live))
}

/// Binds every vertex to its nearest live centroids with normalized
/// inverse-distance weights. Every navigable vertex must reach at least one
/// live centroid.
fn bind_vertices(
    area: &MeshedArea,
    centroids: &[Coordinate],
    live: &[u32],
) -> Result<Vec<VertexBinding>, RouteError> {
    let mut bindings = Vec::with_capacity(area.vertices.len());
    for vertex in &area.vertices {
        let mut ranked: Vec<(u32, f64)> = live
            .iter()
            .filter_map(|&cid| {
                great_circle_distance_m(vertex.position, centroids[cid as usize])
                    .ok()
                    .map(|d| (cid, d))
            })
            .collect();
        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(CENTROIDS_PER_VERTEX);

        if ranked.is_empty() {
            if vertex.is_navigable {
                return Err(RouteError::WeatherUnavailable(format!(
                    "navigable vertex {} has no reachable weather centroid",
                    vertex.id
                )));
            }
            bindings.push(VertexBinding::default());
            continue;
        }

        let raw: Vec<f64> = ranked.iter().map(|(_, d)| 1.0 / d.max(IDW_FLOOR_M)).collect();
        let total: f64 = raw.iter().sum();
        bindings.push(VertexBinding {
            centroids: ranked.iter().map(|(cid, _)| *cid).collect(),
            weights: raw.into_iter().map(|w| w / total).collect(),
        });
    }
    Ok(bindings)
}
