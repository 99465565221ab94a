//! Time-optimal routing: for each candidate departure, a time-dependent
//! Dijkstra over the weathered mesh with the polar as the cost oracle.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Duration, Utc};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use rayon::prelude::*;

use crate::difficulty;
use crate::error::{CandidateFailure, RouteError};
use crate::geodesy::m_to_nm;
use crate::models::{Coordinate, RouteResult, RouteSegment, RouteVariant, TimeWindow};
use crate::polar::{point_of_sail, true_wind_angle, VesselPolar};
use crate::weather::WeatheredMesh;
use crate::CancelToken;

/// A TWA flip only counts as a maneuver when at least one side of it is
/// this far off the wind; smaller flips are numeric noise.
const MANEUVER_MIN_TWA_DEG: f64 = 5.0;
/// Flips whose closer-to-the-wind side is under this angle are tacks,
/// the rest are jibes.
const TACK_JIBE_BOUNDARY_DEG: f64 = 90.0;
const ARRIVAL_EPSILON_S: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    /// Wave height at which the sea-state de-rating saturates at 50%.
    pub critical_wave_m: f64,
    /// Node expansions between cancellation checks.
    pub cancel_check_interval: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            critical_wave_m: 4.0,
            cancel_check_interval: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EdgeInfo {
    distance_nm: f64,
    bearing: f64,
    midpoint: Coordinate,
}

/// Stateless between invocations; holds a read-only view of one weathered
/// mesh snapshot and the routing graph rebuilt from its records.
pub struct Router<'a> {
    mesh: &'a WeatheredMesh,
    polar: &'a VesselPolar,
    config: RouterConfig,
    graph: DiGraph<u32, EdgeInfo>,
}

#[derive(Debug, Clone, Copy)]
struct Label {
    arrival_s: f64,
    maneuvers: u32,
    /// Signed TWA of the edge this label entered on; None at a leg source
    /// with no sailing history.
    twa: Option<f64>,
    pred_from: u32,
    pred_edge: Option<EdgeIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct QueueEntry {
    arrival_s: f64,
    maneuvers: u32,
    vertex: u32,
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap pops the smallest arrival first
        other
            .arrival_s
            .partial_cmp(&self.arrival_s)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.maneuvers.cmp(&self.maneuvers))
            .then_with(|| other.vertex.cmp(&self.vertex))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum EdgeOutcome {
    Sail { time_s: f64, twa: f64 },
    Infeasible,
    BeyondHorizon,
}

impl<'a> Router<'a> {
    pub fn new(mesh: &'a WeatheredMesh, polar: &'a VesselPolar, config: RouterConfig) -> Self {
        let area = &mesh.area;
        let mut graph = DiGraph::with_capacity(area.vertices.len(), area.edges.len());
        for vertex in &area.vertices {
            graph.add_node(vertex.id);
        }
        for edge in &area.edges {
            let from = area.vertex(edge.from).position;
            let to = area.vertex(edge.to).position;
            // midpoint of validated mesh coordinates cannot fail
            let midpoint = crate::geodesy::midpoint(from, to)
                .expect("mesh vertices are finite");
            graph.add_edge(
                NodeIndex::new(edge.from as usize),
                NodeIndex::new(edge.to as usize),
                EdgeInfo {
                    distance_nm: m_to_nm(edge.distance_m),
                    bearing: edge.bearing,
                    midpoint,
                },
            );
        }
        Self {
            mesh,
            polar,
            config,
            graph,
        }
    }

    /// Routes every candidate departure in the window; candidates run in
    /// parallel and failed ones are omitted from the variant set.
    pub fn calculate(
        &self,
        window: &TimeWindow,
        cancel: &CancelToken,
    ) -> Result<RouteResult, RouteError> {
        window.validate()?;
        let (horizon_start, horizon_end) = self.mesh.horizon();
        if window.start_time < horizon_start || window.end_time > horizon_end {
            return Err(RouteError::InvalidInput(
                "time window must lie within the weather horizon".into(),
            ));
        }

        let departures = window.departure_times();
        let outcomes: Vec<Result<RouteVariant, CandidateFailure>> = departures
            .par_iter()
            .map(|&departure| {
                if cancel.is_cancelled() {
                    return Err(CandidateFailure {
                        departure_time: departure,
                        kind: crate::error::CandidateFailureKind::NoNavigablePath,
                    });
                }
                self.route_candidate(departure, cancel)
                    .map_err(|err| match err.candidate_failure_kind() {
                        Some(kind) => CandidateFailure {
                            departure_time: departure,
                            kind,
                        },
                        // cancellation and internal errors are re-raised below
                        None => CandidateFailure {
                            departure_time: departure,
                            kind: crate::error::CandidateFailureKind::NoNavigablePath,
                        },
                    })
            })
            .collect();
        if cancel.is_cancelled() {
            return Err(RouteError::Cancelled);
        }

        let mut variants = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(variant) => variants.push(variant),
                Err(failure) => {
                    tracing::debug!(
                        "candidate {} infeasible: {:?}",
                        failure.departure_time,
                        failure.kind
                    );
                    failures.push(failure);
                }
            }
        }
        if variants.is_empty() {
            return Err(RouteError::AllCandidatesInfeasible(failures));
        }

        // ties go to the earliest departure
        let mut best_variant_index = 0;
        for (i, variant) in variants.iter().enumerate().skip(1) {
            if variant.total_time_h < variants[best_variant_index].total_time_h {
                best_variant_index = i;
            }
        }
        variants[best_variant_index].is_best = true;

        let overall_difficulty_score = variants
            .iter()
            .map(|v| v.difficulty_score)
            .sum::<f64>()
            / variants.len() as f64;

        tracing::info!(
            "routed {} of {} candidates, best departs {}",
            variants.len(),
            departures.len(),
            variants[best_variant_index].departure_time
        );
        Ok(RouteResult {
            meshed_area_id: self.mesh.area.id,
            vessel: self.polar.summary(),
            variants,
            best_variant_index,
            overall_difficulty_score,
            overall_difficulty: difficulty::level(overall_difficulty_score),
        })
    }

    fn abs_time(&self, departure: DateTime<Utc>, offset_s: f64) -> DateTime<Utc> {
        departure + Duration::milliseconds((offset_s * 1000.0).round() as i64)
    }

    /// Sailing time over one edge when departing its tail at the given
    /// instant, per the polar and the interpolated forecast at the edge
    /// midpoint.
    fn edge_outcome(&self, info: &EdgeInfo, at: DateTime<Utc>) -> EdgeOutcome {
        let env = match self.mesh.sample(info.midpoint, at) {
            Ok(env) => env,
            Err(_) => return EdgeOutcome::BeyondHorizon,
        };
        if env.wind_speed_kt > self.polar.max_wind_kt {
            return EdgeOutcome::Infeasible;
        }
        let twa = true_wind_angle(env.wind_dir_deg_from, info.bearing);
        let speed = self.polar.boat_speed(twa, env.wind_speed_kt);
        if speed <= 0.0 {
            return EdgeOutcome::Infeasible;
        }
        let derating = 1.0 - (env.wave_height_m / self.config.critical_wave_m).clamp(0.0, 0.5);
        let effective = speed * derating;
        EdgeOutcome::Sail {
            time_s: info.distance_nm / effective * 3600.0,
            twa,
        }
    }

    fn maneuver_penalty_s(&self, previous_twa: Option<f64>, next_twa: f64) -> f64 {
        let Some(prev) = previous_twa else {
            return 0.0;
        };
        if !is_maneuver(prev, next_twa) {
            return 0.0;
        }
        if prev.abs().min(next_twa.abs()) < TACK_JIBE_BOUNDARY_DEG {
            self.polar.tack_duration_s
        } else {
            self.polar.jibe_duration_s
        }
    }

    fn route_candidate(
        &self,
        departure: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<RouteVariant, RouteError> {
        let control = &self.mesh.area.control_vertices;
        let mut path_edges: Vec<EdgeIndex> = Vec::new();
        let mut leg_start_s = 0.0f64;
        let mut carried_twa: Option<f64> = None;

        for leg in control.windows(2) {
            let (source, target) = (leg[0], leg[1]);
            let (leg_edges, arrival) =
                self.shortest_leg(source, target, departure, leg_start_s, carried_twa, cancel)?;
            leg_start_s = arrival.arrival_s;
            carried_twa = arrival.twa;
            path_edges.extend(leg_edges);
        }

        let (_, horizon_end) = self.mesh.horizon();
        if self.abs_time(departure, leg_start_s) > horizon_end {
            return Err(RouteError::HorizonExceeded);
        }

        self.emit_variant(departure, &path_edges)
    }

    /// Dijkstra keyed by arrival time at the head vertex; edge cost depends
    /// on the arrival time at the tail (FIFO assumption on the forecast).
    fn shortest_leg(
        &self,
        source: u32,
        target: u32,
        departure: DateTime<Utc>,
        start_offset_s: f64,
        carried_twa: Option<f64>,
        cancel: &CancelToken,
    ) -> Result<(Vec<EdgeIndex>, Label), RouteError> {
        let n = self.mesh.area.vertices.len();
        let mut labels: Vec<Option<Label>> = vec![None; n];
        let mut settled = vec![false; n];
        let mut heap = BinaryHeap::new();
        let mut horizon_blocked = false;
        let mut expansions = 0usize;

        labels[source as usize] = Some(Label {
            arrival_s: start_offset_s,
            maneuvers: 0,
            twa: carried_twa,
            pred_from: source,
            pred_edge: None,
        });
        heap.push(QueueEntry {
            arrival_s: start_offset_s,
            maneuvers: 0,
            vertex: source,
        });

        while let Some(entry) = heap.pop() {
            let u = entry.vertex;
            if settled[u as usize] {
                continue;
            }
            let label = labels[u as usize].expect("queued vertices are labeled");
            if entry.arrival_s > label.arrival_s + ARRIVAL_EPSILON_S {
                continue; // stale queue entry
            }
            settled[u as usize] = true;
            if u == target {
                break;
            }

            expansions += 1;
            if expansions % self.config.cancel_check_interval == 0 && cancel.is_cancelled() {
                return Err(RouteError::Cancelled);
            }

            let node = NodeIndex::new(u as usize);
            let mut edges = self.graph.edges(node).collect::<Vec<_>>();
            // deterministic expansion order
            edges.sort_by_key(|e| e.id());
            for edge in edges {
                let v = self.graph[edge.target()];
                if settled[v as usize] {
                    continue;
                }
                let info = edge.weight();
                let at = self.abs_time(departure, label.arrival_s);
                let (time_s, twa) = match self.edge_outcome(info, at) {
                    EdgeOutcome::Sail { time_s, twa } => (time_s, twa),
                    EdgeOutcome::Infeasible => continue,
                    EdgeOutcome::BeyondHorizon => {
                        horizon_blocked = true;
                        continue;
                    }
                };
                let penalty = self.maneuver_penalty_s(label.twa, twa);
                let candidate = Label {
                    arrival_s: label.arrival_s + penalty + time_s,
                    maneuvers: label.maneuvers + u32::from(penalty > 0.0),
                    twa: Some(twa),
                    pred_from: u,
                    pred_edge: Some(edge.id()),
                };
                let better = match &labels[v as usize] {
                    None => true,
                    Some(existing) => {
                        candidate.arrival_s < existing.arrival_s - ARRIVAL_EPSILON_S
                            || ((candidate.arrival_s - existing.arrival_s).abs()
                                <= ARRIVAL_EPSILON_S
                                && (candidate.maneuvers < existing.maneuvers
                                    || (candidate.maneuvers == existing.maneuvers
                                        && candidate.pred_from < existing.pred_from)))
                    }
                };
                if better {
                    labels[v as usize] = Some(candidate);
                    heap.push(QueueEntry {
                        arrival_s: candidate.arrival_s,
                        maneuvers: candidate.maneuvers,
                        vertex: v,
                    });
                }
            }
        }

        let Some(final_label) = labels[target as usize].filter(|_| settled[target as usize]) else {
            return Err(if horizon_blocked {
                RouteError::HorizonExceeded
            } else {
                RouteError::NoNavigablePath
            });
        };

        // walk the predecessor chain back to the leg source
        let mut edges_reversed = Vec::new();
        let mut cursor = target;
        let mut cursor_label = final_label;
        while let Some(edge) = cursor_label.pred_edge {
            edges_reversed.push(edge);
            cursor = cursor_label.pred_from;
            cursor_label = labels[cursor as usize].expect("predecessors are labeled");
        }
        debug_assert_eq!(cursor, source);
        edges_reversed.reverse();
        Ok((edges_reversed, final_label))
    }

    /// Rebuilds per-segment kinematics by re-sampling the forecast along the
    /// reconstructed edge chain, then aggregates the variant.
    fn emit_variant(
        &self,
        departure: DateTime<Utc>,
        path_edges: &[EdgeIndex],
    ) -> Result<RouteVariant, RouteError> {
        let mut segments: Vec<RouteSegment> = Vec::with_capacity(path_edges.len());
        let mut clock_s = 0.0f64;
        let mut previous_twa: Option<f64> = None;

        for &edge_idx in path_edges {
            let info = self.graph[edge_idx];
            let (tail, head) = self
                .graph
                .edge_endpoints(edge_idx)
                .expect("edge from reconstruction");
            let at = self.abs_time(departure, clock_s);
            let env = self
                .mesh
                .sample(info.midpoint, at)
                .map_err(|_| RouteError::HorizonExceeded)?;
            let twa = true_wind_angle(env.wind_dir_deg_from, info.bearing);
            let speed = self.polar.boat_speed(twa, env.wind_speed_kt);
            if env.wind_speed_kt > self.polar.max_wind_kt || speed <= 0.0 {
                // the forecast shifted between search and emission only by
                // rounding; treat as infeasible rather than emit a zero-speed
                // segment
                return Err(RouteError::NoNavigablePath);
            }
            let derating =
                1.0 - (env.wave_height_m / self.config.critical_wave_m).clamp(0.0, 0.5);
            let effective = speed * derating;
            let time_s = info.distance_nm / effective * 3600.0;

            let penalty = self.maneuver_penalty_s(previous_twa, twa);
            let start_s = clock_s + penalty;
            let end_s = start_s + time_s;

            segments.push(RouteSegment {
                from_pos: self.mesh.area.vertex(self.graph[tail]).position,
                to_pos: self.mesh.area.vertex(self.graph[head]).position,
                bearing: info.bearing,
                distance_nm: info.distance_nm,
                time_s,
                boat_speed_kt: effective,
                wind_speed_kt: env.wind_speed_kt,
                wind_dir_deg_from: env.wind_dir_deg_from,
                twa,
                point_of_sail: point_of_sail(twa),
                wave_height_m: env.wave_height_m,
                start_time: self.abs_time(departure, start_s),
                end_time: self.abs_time(departure, end_s),
            });
            previous_twa = Some(twa);
            clock_s = end_s;
        }

        if segments.is_empty() {
            return Err(RouteError::NoNavigablePath);
        }

        let (tacks, jibes) = count_maneuvers(&segments);
        let total_distance_nm: f64 = segments.iter().map(|s| s.distance_nm).sum();
        let total_time_h = clock_s / 3600.0;
        let inputs = difficulty::DifficultyInputs::from_segments(&segments, tacks, jibes);
        let difficulty_score = difficulty::score(&inputs);

        Ok(RouteVariant {
            departure_time: departure,
            total_time_h,
            total_distance_nm,
            avg_speed_kt: if total_time_h > 0.0 {
                total_distance_nm / total_time_h
            } else {
                0.0
            },
            avg_wind_kt: inputs.avg_wind_kt,
            avg_wave_m: inputs.avg_wave_m,
            tacks,
            jibes,
            difficulty_score,
            difficulty_level: difficulty::level(difficulty_score),
            estimated_arrival: self.abs_time(departure, clock_s),
            is_best: false,
            segments,
        })
    }
}

/// A sign flip counts only when at least one side is meaningfully off the
/// wind axis.
fn is_maneuver(previous_twa: f64, next_twa: f64) -> bool {
    previous_twa.signum() != next_twa.signum()
        && previous_twa != 0.0
        && next_twa != 0.0
        && (previous_twa.abs() >= MANEUVER_MIN_TWA_DEG || next_twa.abs() >= MANEUVER_MIN_TWA_DEG)
}

/// Scans consecutive segments for TWA sign flips; the side closer to the
/// wind decides tack versus jibe.
fn count_maneuvers(segments: &[RouteSegment]) -> (usize, usize) {
    let mut tacks = 0;
    let mut jibes = 0;
    for pair in segments.windows(2) {
        let (a, b) = (pair[0].twa, pair[1].twa);
        if is_maneuver(a, b) {
            if a.abs().min(b.abs()) < TACK_JIBE_BOUNDARY_DEG {
                tacks += 1;
            } else {
                jibes += 1;
            }
        }
    }
    (tacks, jibes)
}
