//! Adaptive navigation mesh: variable-density vertex tiers over the sailing
//! area, clipped to navigable water and persisted as flat records.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::RouteError;
use crate::geodesy::{
    great_circle_distance_m, initial_bearing, m_to_nm, midpoint, nm_to_m, rhumb_distance_m,
    METERS_PER_NM, NM_PER_DEGREE,
};
use crate::geometry::GeometryPort;
use crate::models::{ControlPoint, Coordinate, MeshParams, MeshedAreaId};
use crate::CancelToken;

/// Bumping this invalidates every cached meshed area.
pub const MESH_FORMAT_VERSION: u32 = 1;

const METERS_PER_DEGREE: f64 = NM_PER_DEGREE * METERS_PER_NM;

/// Same-tier neighbor count, tier 1 to 3.
const TIER_DEGREE: [usize; 3] = [8, 6, 5];
/// Stitch fan-out when a control point is inserted as an explicit vertex.
const STITCH_DEGREE: [usize; 3] = [6, 4, 3];
/// Hard snap ceiling per tier in meters.
const SNAP_CEILING_M: [f64; 3] = [200.0, 400.0, 800.0];
/// Same-tier neighbor search reach, as a multiple of the tier spacing.
const NEIGHBOR_REACH_FACTOR: f64 = 5.0;
/// Distances closer than this count as tied when picking neighbors.
const TIE_EPSILON_M: f64 = 1e-6;

const CANCEL_CHECK_STRIDE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum MeshFileError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid mesh definition: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("mesh format version {found} incompatible with {expected}")]
    FormatVersion { found: u32, expected: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshVertex {
    pub id: u32,
    pub position: Coordinate,
    /// Resolution ring, 1 (fine) to 3 (coarse).
    pub tier: u8,
    pub is_navigable: bool,
}

/// Directed edge; both directions are stored because bearing (and thus TWA
/// under a given wind) differs per direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshEdge {
    pub from: u32,
    pub to: u32,
    pub distance_m: f64,
    pub bearing: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, coord: Coordinate) -> bool {
        coord.lat >= self.min_lat
            && coord.lat <= self.max_lat
            && coord.lon >= self.min_lon
            && coord.lon <= self.max_lon
    }

    /// Box containing every control point, extended outward by a margin in
    /// nautical miles (longitude margin widened by latitude).
    pub fn from_control_points(points: &[ControlPoint], margin_nm: f64) -> Self {
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lon = f64::MAX;
        let mut max_lon = f64::MIN;
        for cp in points {
            min_lat = min_lat.min(cp.position.lat);
            max_lat = max_lat.max(cp.position.lat);
            min_lon = min_lon.min(cp.position.lon);
            max_lon = max_lon.max(cp.position.lon);
        }
        let lat_margin = margin_nm / NM_PER_DEGREE;
        let avg_lat = (min_lat + max_lat) / 2.0;
        let lon_margin = margin_nm / (NM_PER_DEGREE * avg_lat.to_radians().cos());
        Self {
            min_lat: min_lat - lat_margin,
            max_lat: max_lat + lat_margin,
            min_lon: min_lon - lon_margin,
            max_lon: max_lon + lon_margin,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeshedArea {
    pub format_version: u32,
    /// Assigned by the mesh store on publication.
    pub id: MeshedAreaId,
    pub bounding_box: BoundingBox,
    pub params: MeshParams,
    pub vertices: Vec<MeshVertex>,
    pub edges: Vec<MeshEdge>,
    /// Control point index -> vertex id of its nearest navigable vertex.
    pub control_vertices: Vec<u32>,
    #[serde(skip)]
    index: OnceLock<VertexIndex>,
}

impl MeshedArea {
    pub fn read_from_path(path: impl AsRef<Path>) -> Result<Self, MeshFileError> {
        let file = File::open(path)?;
        let area: MeshedArea = serde_json::from_reader(file)?;
        if area.format_version != MESH_FORMAT_VERSION {
            return Err(MeshFileError::FormatVersion {
                found: area.format_version,
                expected: MESH_FORMAT_VERSION,
            });
        }
        Ok(area)
    }

    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<(), MeshFileError> {
        let file = File::create(path)?;
        // 8MB buffer for fast writes, compact JSON for smaller file size
        let mut writer = BufWriter::with_capacity(8 * 1024 * 1024, file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn vertex(&self, id: u32) -> &MeshVertex {
        &self.vertices[id as usize]
    }

    fn index(&self) -> &VertexIndex {
        self.index
            .get_or_init(|| VertexIndex::build(&self.vertices, self.params.area3.sqrt()))
    }

    /// Nearest vertex to a position, optionally restricted to navigable
    /// water. Ties resolve to the lower tier, then the lower id.
    pub fn nearest_vertex(&self, p: Coordinate, only_navigable: bool) -> Option<u32> {
        self.index()
            .k_nearest(&self.vertices, p, 1, f64::INFINITY, |v| {
                !only_navigable || v.is_navigable
            })
            .first()
            .map(|(id, _)| *id)
    }

    pub(crate) fn k_nearest_navigable(
        &self,
        p: Coordinate,
        k: usize,
        max_dist_m: f64,
    ) -> Vec<(u32, f64)> {
        self.index()
            .k_nearest(&self.vertices, p, k, max_dist_m, |v| v.is_navigable)
    }

    pub fn navigable_count(&self) -> usize {
        self.vertices.iter().filter(|v| v.is_navigable).count()
    }
}

/// Uniform lat/lon bucket grid over the vertex set; cheap k-NN without an
/// external spatial index.
#[derive(Debug)]
struct VertexIndex {
    cell_deg: f64,
    cells: HashMap<(i32, i32), Vec<u32>>,
}

impl VertexIndex {
    fn build(vertices: &[MeshVertex], cell_m: f64) -> Self {
        let cell_deg = (cell_m / METERS_PER_DEGREE).max(1e-5);
        let mut cells: HashMap<(i32, i32), Vec<u32>> = HashMap::new();
        for v in vertices {
            cells
                .entry(Self::cell_at(cell_deg, v.position))
                .or_default()
                .push(v.id);
        }
        Self { cell_deg, cells }
    }

    fn cell_at(cell_deg: f64, p: Coordinate) -> (i32, i32) {
        (
            (p.lat / cell_deg).floor() as i32,
            (p.lon / cell_deg).floor() as i32,
        )
    }

    /// K nearest matching vertices within `max_dist_m`, sorted by distance
    /// with (tier, id) tie-breaks; candidates tied at the k-th distance are
    /// all included.
    fn k_nearest(
        &self,
        vertices: &[MeshVertex],
        p: Coordinate,
        k: usize,
        max_dist_m: f64,
        filter: impl Fn(&MeshVertex) -> bool,
    ) -> Vec<(u32, f64)> {
        let mut ranked: Vec<(u32, f64)> = Vec::new();
        let mut scan = |ids: &[u32], ranked: &mut Vec<(u32, f64)>| {
            for &id in ids {
                let v = &vertices[id as usize];
                if !filter(v) {
                    continue;
                }
                if let Ok(d) = great_circle_distance_m(p, v.position) {
                    if d <= max_dist_m {
                        ranked.push((id, d));
                    }
                }
            }
        };

        if max_dist_m.is_finite() {
            let reach = (max_dist_m / METERS_PER_DEGREE / self.cell_deg).ceil() as i32 + 1;
            let center = Self::cell_at(self.cell_deg, p);
            for dy in -reach..=reach {
                for dx in -reach..=reach {
                    if let Some(ids) = self.cells.get(&(center.0 + dy, center.1 + dx)) {
                        scan(ids, &mut ranked);
                    }
                }
            }
        } else {
            // Expanding ring search; falls back to a full scan only when the
            // neighborhood is empty.
            let center = Self::cell_at(self.cell_deg, p);
            let mut radius = 1i32;
            while ranked.len() < k && radius <= 64 {
                ranked.clear();
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        if let Some(ids) = self.cells.get(&(center.0 + dy, center.1 + dx)) {
                            scan(ids, &mut ranked);
                        }
                    }
                }
                radius *= 2;
            }
            if ranked.len() < k {
                ranked.clear();
                for ids in self.cells.values() {
                    scan(ids, &mut ranked);
                }
            }
        }

        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    vertices[a.0 as usize]
                        .tier
                        .cmp(&vertices[b.0 as usize].tier)
                })
                .then_with(|| a.0.cmp(&b.0))
        });
        if ranked.len() > k {
            let threshold = ranked[k - 1].1;
            ranked.retain(|(_, d)| *d <= threshold + TIE_EPSILON_M);
        }
        ranked
    }
}

/// Derives the effective mesh parameters from the course extent, using the
/// fixed four-bucket ladder; the corridor never exceeds 40% of the shortest
/// leg.
pub fn auto_mesh_params(points: &[ControlPoint]) -> Result<MeshParams, RouteError> {
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lon = f64::MAX;
    let mut max_lon = f64::MIN;
    for cp in points {
        min_lat = min_lat.min(cp.position.lat);
        max_lat = max_lat.max(cp.position.lat);
        min_lon = min_lon.min(cp.position.lon);
        max_lon = max_lon.max(cp.position.lon);
    }
    let span_nm = (max_lat - min_lat).max(max_lon - min_lon) * NM_PER_DEGREE;

    let mut min_segment_nm = f64::MAX;
    for pair in points.windows(2) {
        let d = m_to_nm(rhumb_distance_m(pair[0].position, pair[1].position)?);
        min_segment_nm = min_segment_nm.min(d);
    }

    let params = if min_segment_nm < 0.3 || span_nm < 1.0 {
        MeshParams {
            corridor_nm: (0.4 * min_segment_nm).min(0.1),
            ring1_m: 50.0,
            ring2_m: 100.0,
            ring3_m: 200.0,
            area1: 200.0,
            area2: 500.0,
            area3: 1000.0,
            shoreline_avoid_m: 50.0,
            max_weather_points: 5,
            weather_grid_km: 0.5,
        }
    } else if min_segment_nm < 1.0 || span_nm < 3.0 {
        MeshParams {
            corridor_nm: (0.4 * min_segment_nm).min(0.3),
            ring1_m: 100.0,
            ring2_m: 250.0,
            ring3_m: 500.0,
            area1: 500.0,
            area2: 1500.0,
            area3: 4000.0,
            shoreline_avoid_m: 100.0,
            max_weather_points: 10,
            weather_grid_km: 1.0,
        }
    } else if span_nm < 8.0 {
        MeshParams {
            corridor_nm: (0.4 * min_segment_nm).min(1.0),
            ring1_m: 300.0,
            ring2_m: 800.0,
            ring3_m: 1500.0,
            area1: 2000.0,
            area2: 8000.0,
            area3: 25000.0,
            shoreline_avoid_m: 150.0,
            max_weather_points: 20,
            weather_grid_km: 2.0,
        }
    } else {
        MeshParams {
            corridor_nm: (0.15 * span_nm).min(3.0).min(0.4 * min_segment_nm),
            ring1_m: 500.0,
            ring2_m: 1500.0,
            ring3_m: 3000.0,
            area1: 3000.0,
            area2: 15000.0,
            area3: 60000.0,
            shoreline_avoid_m: 200.0,
            max_weather_points: 40,
            weather_grid_km: 5.0,
        }
    };
    Ok(params)
}

pub fn validate_mesh_params(params: &MeshParams) -> Result<(), RouteError> {
    let positives = [
        ("corridor_nm", params.corridor_nm),
        ("ring1_m", params.ring1_m),
        ("ring2_m", params.ring2_m),
        ("ring3_m", params.ring3_m),
        ("area1", params.area1),
        ("area2", params.area2),
        ("area3", params.area3),
        ("shoreline_avoid_m", params.shoreline_avoid_m),
        ("weather_grid_km", params.weather_grid_km),
    ];
    for (name, value) in positives {
        if !value.is_finite() || value <= 0.0 {
            return Err(RouteError::InvalidInput(format!(
                "mesh parameter {name} must be positive"
            )));
        }
    }
    if params.ring1_m >= params.ring2_m || params.ring2_m >= params.ring3_m {
        return Err(RouteError::InvalidInput(
            "mesh rings must be strictly increasing".into(),
        ));
    }
    if params.area1 >= params.area2 || params.area2 >= params.area3 {
        return Err(RouteError::InvalidInput(
            "mesh tier areas must be strictly increasing".into(),
        ));
    }
    if params.max_weather_points == 0 {
        return Err(RouteError::InvalidInput(
            "max_weather_points must be at least 1".into(),
        ));
    }
    Ok(())
}

pub struct MeshBuilder<'a> {
    geometry: &'a dyn GeometryPort,
    params: MeshParams,
}

impl<'a> MeshBuilder<'a> {
    pub fn new(geometry: &'a dyn GeometryPort, params: MeshParams) -> Self {
        Self { geometry, params }
    }

    /// Builds the navigation mesh for a validated control sequence. The
    /// returned area carries a placeholder id until the store publishes it.
    pub fn build(
        &self,
        control_points: &[ControlPoint],
        cancel: &CancelToken,
    ) -> Result<MeshedArea, RouteError> {
        let params = self.params;
        let bbox = BoundingBox::from_control_points(control_points, params.corridor_nm);
        let legs: Vec<(Coordinate, Coordinate)> = control_points
            .windows(2)
            .map(|pair| (pair[0].position, pair[1].position))
            .collect();

        let vertices = self.rasterize(&bbox, control_points, &legs, cancel)?;
        let navigable = vertices.iter().filter(|v| v.is_navigable).count();
        tracing::debug!(
            "rasterized {} vertices ({} navigable) over {:?}",
            vertices.len(),
            navigable,
            bbox
        );

        let mut area = MeshedArea {
            format_version: MESH_FORMAT_VERSION,
            id: MeshedAreaId(0),
            bounding_box: bbox,
            params,
            vertices,
            edges: Vec::new(),
            control_vertices: Vec::new(),
            index: OnceLock::new(),
        };

        let mut extra_edges = Vec::new();
        area.control_vertices =
            self.attach_control_points(&mut area, control_points, &mut extra_edges)?;

        let mut edges = self.connect(&area, cancel)?;
        edges.extend(extra_edges);
        edges.sort_by_key(|e| (e.from, e.to));
        edges.dedup_by_key(|e| (e.from, e.to));
        area.edges = edges;

        self.verify_connected(&area)?;

        tracing::info!(
            "mesh built: {} vertices, {} edges, {} control vertices",
            area.vertices.len(),
            area.edges.len(),
            area.control_vertices.len()
        );
        Ok(area)
    }

    /// Overlays the three vertex tiers: ring disks around control points,
    /// the rhumb-line corridor, and the coarse remainder of the box.
    fn rasterize(
        &self,
        bbox: &BoundingBox,
        control_points: &[ControlPoint],
        legs: &[(Coordinate, Coordinate)],
        cancel: &CancelToken,
    ) -> Result<Vec<MeshVertex>, RouteError> {
        let params = self.params;
        let corridor_m = nm_to_m(params.corridor_nm);
        let spacings = [params.area1.sqrt(), params.area2.sqrt(), params.area3.sqrt()];

        let tier_of = |p: Coordinate| -> Result<u8, RouteError> {
            let mut ring_dist = f64::MAX;
            for cp in control_points {
                ring_dist = ring_dist.min(great_circle_distance_m(p, cp.position)?);
            }
            if ring_dist <= params.ring1_m {
                return Ok(1);
            }
            let mut corridor_dist = f64::MAX;
            for (a, b) in legs {
                corridor_dist = corridor_dist.min(crate::geometry::point_segment_distance_m(p, *a, *b));
            }
            if ring_dist <= params.ring2_m || corridor_dist <= corridor_m {
                Ok(2)
            } else {
                Ok(3)
            }
        };

        let mut vertices = Vec::new();
        let mut visited = 0usize;
        for (tier_idx, spacing_m) in spacings.iter().enumerate() {
            let tier = tier_idx as u8 + 1;
            let lat_step = spacing_m / METERS_PER_DEGREE;
            let mut lat = bbox.min_lat;
            while lat <= bbox.max_lat {
                let lon_step = spacing_m / (METERS_PER_DEGREE * lat.to_radians().cos().max(0.01));
                let mut lon = bbox.min_lon;
                while lon <= bbox.max_lon {
                    visited += 1;
                    if visited % CANCEL_CHECK_STRIDE == 0 && cancel.is_cancelled() {
                        return Err(RouteError::Cancelled);
                    }
                    let p = Coordinate::new(lat, lon);
                    if tier_of(p)? == tier {
                        let clearance = self.geometry.distance_to_land_m(p)?;
                        vertices.push(MeshVertex {
                            id: vertices.len() as u32,
                            position: p,
                            tier,
                            is_navigable: clearance >= params.shoreline_avoid_m,
                        });
                    }
                    lon += lon_step;
                }
                lat += lat_step;
            }
        }
        Ok(vertices)
    }

    /// Snaps each control point to its nearest navigable vertex, or inserts
    /// it as an explicit vertex stitched to its nearest navigable neighbors
    /// when the mesh is too coarse around it.
    fn attach_control_points(
        &self,
        area: &mut MeshedArea,
        control_points: &[ControlPoint],
        extra_edges: &mut Vec<MeshEdge>,
    ) -> Result<Vec<u32>, RouteError> {
        let params = self.params;
        let areas = [params.area1, params.area2, params.area3];
        let mut control_vertices = Vec::with_capacity(control_points.len());

        for (index, cp) in control_points.iter().enumerate() {
            let ceiling_m = SNAP_CEILING_M[2];
            let nearest = area
                .k_nearest_navigable(cp.position, 1, ceiling_m)
                .first()
                .copied();
            let Some((vid, dist)) = nearest else {
                return Err(RouteError::ControlPointUnreachable { index, ceiling_m });
            };

            let tier = area.vertex(vid).tier as usize - 1;
            let tolerance_m = areas[tier].sqrt();
            let tier_ceiling = SNAP_CEILING_M[tier];
            if dist <= tolerance_m {
                control_vertices.push(vid);
                continue;
            }

            // Coarse mesh around the point: insert it explicitly when it
            // stands in navigable water, otherwise fall back to the snap.
            let clearance = self.geometry.distance_to_land_m(cp.position)?;
            if clearance >= params.shoreline_avoid_m {
                let k = STITCH_DEGREE[tier];
                let neighbors = area.k_nearest_navigable(cp.position, k, tier_ceiling);
                if !neighbors.is_empty() {
                    let new_id = area.vertices.len() as u32;
                    area.vertices.push(MeshVertex {
                        id: new_id,
                        position: cp.position,
                        tier: area.vertices[vid as usize].tier,
                        is_navigable: true,
                    });
                    // Index is rebuilt lazily after the mutation.
                    area.index = OnceLock::new();
                    for (nid, _) in neighbors {
                        let to = area.vertex(nid).position;
                        if self
                            .geometry
                            .distance_to_land_m(midpoint(cp.position, to)?)?
                            < params.shoreline_avoid_m
                        {
                            continue;
                        }
                        let d = great_circle_distance_m(cp.position, to)?;
                        extra_edges.push(MeshEdge {
                            from: new_id,
                            to: nid,
                            distance_m: d,
                            bearing: initial_bearing(cp.position, to)?,
                        });
                        extra_edges.push(MeshEdge {
                            from: nid,
                            to: new_id,
                            distance_m: d,
                            bearing: initial_bearing(to, cp.position)?,
                        });
                    }
                    control_vertices.push(new_id);
                    continue;
                }
            }

            if dist <= tier_ceiling {
                control_vertices.push(vid);
            } else {
                return Err(RouteError::ControlPointUnreachable {
                    index,
                    ceiling_m: tier_ceiling,
                });
            }
        }
        Ok(control_vertices)
    }

    /// Connects navigable vertices: k nearest within the same tier plus one
    /// bridge per adjacent tier, discarding edges whose midpoint violates
    /// the shoreline buffer.
    fn connect(&self, area: &MeshedArea, cancel: &CancelToken) -> Result<Vec<MeshEdge>, RouteError> {
        let params = self.params;
        let spacings = [params.area1.sqrt(), params.area2.sqrt(), params.area3.sqrt()];
        let mut pairs: BTreeSet<(u32, u32)> = BTreeSet::new();

        for (i, v) in area.vertices.iter().enumerate() {
            if i % CANCEL_CHECK_STRIDE == 0 && cancel.is_cancelled() {
                return Err(RouteError::Cancelled);
            }
            if !v.is_navigable {
                continue;
            }
            let tier = v.tier as usize - 1;
            let reach = spacings[tier] * NEIGHBOR_REACH_FACTOR;

            // candidates tied at the k-th distance are all kept
            let same_tier = area
                .index()
                .k_nearest(&area.vertices, v.position, TIER_DEGREE[tier], reach, |c| {
                    c.is_navigable && c.tier == v.tier && c.id != v.id
                });
            for (nid, _) in &same_tier {
                pairs.insert((v.id.min(*nid), v.id.max(*nid)));
            }

            for adjacent in [v.tier as i8 - 1, v.tier as i8 + 1] {
                if !(1..=3).contains(&adjacent) {
                    continue;
                }
                let coarser = spacings[(adjacent as usize - 1).max(tier)];
                let bridge = area.index().k_nearest(
                    &area.vertices,
                    v.position,
                    1,
                    coarser,
                    |c| c.is_navigable && c.tier == adjacent as u8,
                );
                if let Some((nid, _)) = bridge.first() {
                    pairs.insert((v.id.min(*nid), v.id.max(*nid)));
                }
            }
        }

        let mut edges = Vec::with_capacity(pairs.len() * 2);
        for (a, b) in pairs {
            let pa = area.vertex(a).position;
            let pb = area.vertex(b).position;
            let mid = midpoint(pa, pb)?;
            if self.geometry.distance_to_land_m(mid)? < params.shoreline_avoid_m {
                continue;
            }
            let distance_m = great_circle_distance_m(pa, pb)?;
            edges.push(MeshEdge {
                from: a,
                to: b,
                distance_m,
                bearing: initial_bearing(pa, pb)?,
            });
            edges.push(MeshEdge {
                from: b,
                to: a,
                distance_m,
                bearing: initial_bearing(pb, pa)?,
            });
        }
        Ok(edges)
    }

    /// Proves all control vertices share one sea basin by BFS from the
    /// start control vertex.
    fn verify_connected(&self, area: &MeshedArea) -> Result<(), RouteError> {
        let mut adjacency: Vec<Vec<u32>> = vec![Vec::new(); area.vertices.len()];
        for edge in &area.edges {
            adjacency[edge.from as usize].push(edge.to);
        }

        let start = area.control_vertices[0];
        let mut seen = vec![false; area.vertices.len()];
        let mut queue = VecDeque::from([start]);
        seen[start as usize] = true;
        while let Some(current) = queue.pop_front() {
            for &next in &adjacency[current as usize] {
                if !seen[next as usize] {
                    seen[next as usize] = true;
                    queue.push_back(next);
                }
            }
        }

        for (index, &vid) in area.control_vertices.iter().enumerate() {
            if !seen[vid as usize] {
                return Err(RouteError::DisconnectedControlPoints { index });
            }
        }
        Ok(())
    }
}
