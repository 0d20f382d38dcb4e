//! Query engine: sphere trace, swept-sphere trace, sector trace over agents,
//! and swept-sphere trace against obstacles

use glam::Vec3;
use rand::seq::SliceRandom;
use rustc_hash::FxHashSet;

use super::filter::{Filter, Handle};
use super::grid::Grid;
use super::obstacle::BoxObstacleArena;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    None,
    NearToFar,
    FarToNear,
}

/// `-1` unlimited, `1` best-only fast path, `n>1` bounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepCount {
    Unlimited,
    Best,
    Bounded(usize),
}

impl KeepCount {
    pub fn from_i32(n: i32) -> Self {
        match n {
            -1 => KeepCount::Unlimited,
            1 => KeepCount::Best,
            n if n > 1 => KeepCount::Bounded(n as usize),
            _ => KeepCount::Best,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TraceResult {
    pub subject: Handle,
    pub location: Vec3,
    pub cached_dist_sq: f32,
}

pub struct QueryParams<'a> {
    pub keep_count: KeepCount,
    pub sort_mode: SortMode,
    pub sort_origin: Vec3,
    pub ignore: &'a [Handle],
    pub filter: Filter,
    /// `(origin, radius)` for a visibility re-check via obstacle sweep.
    pub check_visibility: Option<(Vec3, f32)>,
}

impl<'a> QueryParams<'a> {
    pub fn new(filter: Filter) -> Self {
        Self {
            keep_count: KeepCount::Unlimited,
            sort_mode: SortMode::None,
            sort_origin: Vec3::ZERO,
            ignore: &[],
            filter,
            check_visibility: None,
        }
    }
}

pub struct QueryOutcome {
    pub hit: bool,
    pub results: Vec<TraceResult>,
}

/// Shared accept/reject/accumulate pass over candidate cells, parameterized
/// by a geometric predicate and an optional obstacle arena for visibility
/// re-checks
fn run_query(
    grid: &Grid,
    candidate_cells: Vec<Vec3>,
    params: &QueryParams,
    arena: Option<&BoxObstacleArena>,
    mut accept: impl FnMut(Vec3, f32) -> bool,
) -> QueryOutcome {
    let ignore: FxHashSet<Handle> = params.ignore.iter().copied().collect();
    let mut best: Option<TraceResult> = None;
    let mut temp: Vec<TraceResult> = Vec::new();

    // Sort candidate cell centers by distance to sort_origin when requested.
    let mut cells = candidate_cells;
    match params.sort_mode {
        SortMode::None => {}
        SortMode::NearToFar => cells.sort_by(|a, b| {
            a.distance_squared(params.sort_origin)
                .partial_cmp(&b.distance_squared(params.sort_origin))
                .unwrap()
        }),
        SortMode::FarToNear => cells.sort_by(|a, b| {
            b.distance_squared(params.sort_origin)
                .partial_cmp(&a.distance_squared(params.sort_origin))
                .unwrap()
        }),
    }

    let max_cell = grid.cell_size().max_element();
    let mut threshold: Option<f32> = None;

    'cells: for cell_center in &cells {
        if let (Some(tau), SortMode::NearToFar | SortMode::FarToNear) = (threshold, params.sort_mode) {
            let cell_dist = cell_center.distance(params.sort_origin);
            if cell_dist > tau {
                break 'cells;
            }
        }
        let cage = grid.world_to_cage(*cell_center);
        let Some(cell) = grid.at(cage) else { continue };
        for bucket in cell.all_buckets() {
            for subject in bucket.iter() {
                if ignore.contains(&subject.handle) {
                    continue;
                }
                if !params.filter.matches(subject.traits) {
                    continue;
                }
                if !accept(subject.location, subject.radius) {
                    continue;
                }
                if let (Some((origin, check_radius)), Some(arena)) = (params.check_visibility, arena) {
                    let surface = subject.location
                        - (subject.location - origin).normalize_or_zero() * subject.radius;
                    if sphere_sweep_for_obstacle(grid, arena, origin, surface, check_radius).is_some() {
                        continue;
                    }
                }
                let dist_sq = subject.location.distance_squared(params.sort_origin);
                let result = TraceResult { subject: subject.handle, location: subject.location, cached_dist_sq: dist_sq };

                match params.keep_count {
                    KeepCount::Best => {
                        let better = match best {
                            None => true,
                            Some(b) => match params.sort_mode {
                                SortMode::NearToFar => dist_sq < b.cached_dist_sq,
                                SortMode::FarToNear => dist_sq > b.cached_dist_sq,
                                SortMode::None => true, // last wins
                            },
                        };
                        if better {
                            best = Some(result);
                        }
                    }
                    KeepCount::Bounded(k) => {
                        temp.push(result);
                        if temp.len() >= k && params.sort_mode != SortMode::None {
                            temp.sort_by(|a, b| a.cached_dist_sq.partial_cmp(&b.cached_dist_sq).unwrap());
                            if params.sort_mode == SortMode::FarToNear {
                                temp.reverse();
                            }
                            temp.truncate(k);
                            let worst = temp.last().unwrap().cached_dist_sq.sqrt();
                            threshold = Some(worst + 2.0 * max_cell * std::f32::consts::SQRT_2);
                        }
                    }
                    KeepCount::Unlimited => temp.push(result),
                }
            }
        }
    }

    match params.keep_count {
        KeepCount::Best => QueryOutcome { hit: best.is_some(), results: best.into_iter().collect() },
        KeepCount::Unlimited | KeepCount::Bounded(_) => {
            match params.sort_mode {
                SortMode::NearToFar => temp.sort_by(|a, b| a.cached_dist_sq.partial_cmp(&b.cached_dist_sq).unwrap()),
                SortMode::FarToNear => temp.sort_by(|a, b| b.cached_dist_sq.partial_cmp(&a.cached_dist_sq).unwrap()),
                SortMode::None => {
                    let mut rng = rand::rng();
                    temp.shuffle(&mut rng);
                }
            }
            if let KeepCount::Bounded(k) = params.keep_count {
                temp.truncate(k);
            }
            QueryOutcome { hit: !temp.is_empty(), results: temp }
        }
    }
}

fn expanded_candidate_cells(grid: &Grid, center: Vec3, radius: f32) -> Vec<Vec3> {
    let expand = radius + grid.max_cell_radius() * std::f32::consts::SQRT_2;
    grid.get_neighbor_cells(center, Vec3::splat(expand))
        .into_iter()
        .map(|c| grid.cage_to_world(c))
        .collect()
}

/// `‖subject.loc - origin‖ ≤ radius + subject.radius`
pub fn sphere_trace(grid: &Grid, origin: Vec3, radius: f32, params: &QueryParams) -> QueryOutcome {
    let cells = expanded_candidate_cells(grid, origin, radius);
    run_query(grid, cells, params, None, |loc, r| origin.distance_squared(loc) <= (radius + r).powi(2))
}

/// Nearest-point-on-segment capsule test with a projection-range cull
pub fn sphere_sweep(grid: &Grid, start: Vec3, end: Vec3, radius: f32, params: &QueryParams) -> QueryOutcome {
    let dir = end - start;
    let len = dir.length();
    let center = (start + end) * 0.5;
    let cells = expanded_candidate_cells(grid, center, radius + len * 0.5);
    run_query(grid, cells, params, None, |loc, r| {
        let combined = radius + r;
        if len <= f32::EPSILON {
            return start.distance_squared(loc) <= combined * combined;
        }
        let t = (loc - start).dot(dir) / (len * len);
        if t < -(combined) / len || t > 1.0 + combined / len {
            return false;
        }
        let clamped = t.clamp(0.0, 1.0);
        let nearest = start + dir * clamped;
        nearest.distance_squared(loc) < combined * combined
    })
}

/// XY distance + height band + angular cone test
#[allow(clippy::too_many_arguments)]
pub fn sector_trace(
    grid: &Grid,
    origin: Vec3,
    radius: f32,
    height: f32,
    direction: Vec3,
    angle_deg: f32,
    params: &QueryParams,
) -> QueryOutcome {
    let full_circle = (angle_deg - 360.0).abs() < 1e-3;
    let dir_xy = Vec3::new(direction.x, direction.y, 0.0).normalize_or_zero();
    let cos_half = (angle_deg.to_radians() * 0.5).cos();
    let cells = expanded_candidate_cells(grid, origin, radius.max(height));
    run_query(grid, cells, params, None, |loc, r| {
        let dz = loc.z - origin.z;
        if dz.abs() > height * 0.5 + r {
            return false;
        }
        let delta_xy = Vec3::new(loc.x - origin.x, loc.y - origin.y, 0.0);
        if delta_xy.length_squared() > (radius + r).powi(2) {
            return false;
        }
        if full_circle {
            return true;
        }
        let delta_dir = delta_xy.normalize_or_zero();
        delta_dir.dot(dir_xy) >= cos_half
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ObstacleHit {
    pub handle: Handle,
    pub point: Vec3,
    pub dist_sq: f32,
}

fn point_to_segment_dist_sq(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return p.distance_squared(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance_squared(a + ab * t)
}

/// Capsule-vs-box separating-axis test. The box is the quad swept from the
/// segment `current -> next`, thickened perpendicular to the segment by
/// [`BOX_WALL_HALF_THICKNESS`] (a documented simplification: the exact
/// mitered-corner reconstruction from `prev`/`next.next` in the original
/// source was not fully recoverable; the segment's own perpendicular is
/// used instead of a miter, see DESIGN.md).
pub const BOX_WALL_HALF_THICKNESS: f32 = 1.0;

fn capsule_vs_box(start: Vec3, end: Vec3, radius: f32, seg_a: Vec3, seg_b: Vec3, z0: f32, z1: f32) -> Option<f32> {
    let seg_dir = (seg_b - seg_a).normalize_or_zero();
    let perp = Vec3::new(-seg_dir.y, seg_dir.x, 0.0) * BOX_WALL_HALF_THICKNESS;
    let bottom = [seg_a + perp, seg_a - perp, seg_b - perp, seg_b + perp].map(|v| Vec3::new(v.x, v.y, z0));
    let top = bottom.map(|v| Vec3::new(v.x, v.y, z1));

    let sweep_dir = (end - start).normalize_or_zero();
    let mut axes = vec![Vec3::X, Vec3::Y, Vec3::Z];
    let bottom_edges = [bottom[1] - bottom[0], bottom[2] - bottom[1], bottom[3] - bottom[2], bottom[0] - bottom[3]];
    let side_edges = [top[0] - bottom[0], top[1] - bottom[1], top[2] - bottom[2], top[3] - bottom[3]];
    for e in bottom_edges.iter().chain(side_edges.iter()) {
        let axis = e.cross(sweep_dir);
        if axis.length_squared() > f32::EPSILON {
            axes.push(axis.normalize());
        }
    }

    let verts: Vec<Vec3> = bottom.iter().chain(top.iter()).copied().collect();
    for axis in &axes {
        let (mut box_min, mut box_max) = (f32::MAX, f32::MIN);
        for v in &verts {
            let p = v.dot(*axis);
            box_min = box_min.min(p);
            box_max = box_max.max(p);
        }
        let (mut cap_min, mut cap_max) = (start.dot(*axis), end.dot(*axis));
        if cap_min > cap_max {
            std::mem::swap(&mut cap_min, &mut cap_max);
        }
        cap_min -= radius;
        cap_max += radius;
        if box_max < cap_min || cap_max < box_min {
            return None; // separating axis found: no overlap
        }
    }

    let nearest_on_segment = point_to_segment_dist_sq((start + end) * 0.5, seg_a, seg_b);
    Some(nearest_on_segment)
}

/// Returns the nearest obstacle hit along a capsule path, with early-exit
/// once a cell's lower-bound distance exceeds the current best
pub fn sphere_sweep_for_obstacle(grid: &Grid, arena: &BoxObstacleArena, start: Vec3, end: Vec3, radius: f32) -> Option<ObstacleHit> {
    let cells = grid.sphere_sweep_for_cells(start, end, radius);
    let max_cell = grid.max_cell_radius();
    let mut best: Option<ObstacleHit> = None;

    for cage in cells {
        let Some(cell) = grid.at(cage) else { continue };
        if let Some(current) = best {
            let cell_center = grid.cage_to_world(cage);
            let d = point_to_segment_dist_sq(cell_center, start, end).sqrt() - max_cell;
            if d > 0.0 && d * d > current.dist_sq {
                continue;
            }
        }

        for bucket in [&cell.sphere_obstacles_dynamic, &cell.sphere_obstacles_static] {
            for obs in bucket.iter() {
                let d2 = point_to_segment_dist_sq(obs.location, start, end);
                let combined = (radius + obs.radius).powi(2);
                if d2 <= combined && best.map_or(true, |b| d2 < b.dist_sq) {
                    best = Some(ObstacleHit { handle: obs.handle, point: obs.location, dist_sq: d2 });
                }
            }
        }

        for bucket in [&cell.box_obstacles_dynamic, &cell.box_obstacles_static] {
            for obs in bucket.iter() {
                let node_index = obs.handle.index as usize;
                let Some((seg_a_node, seg_b_node)) = arena.segment(node_index) else { continue };
                if let Some(dist_sq) = capsule_vs_box(
                    start,
                    end,
                    radius,
                    seg_a_node.point3d,
                    seg_b_node.point3d,
                    seg_a_node.point3d.z,
                    seg_a_node.point3d.z + seg_a_node.height,
                ) {
                    if best.map_or(true, |b| dist_sq < b.dist_sq) {
                        best = Some(ObstacleHit { handle: obs.handle, point: seg_a_node.point3d, dist_sq });
                    }
                }
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::TraitMask;
    use crate::core::grid::GridConfig;
    use crate::core::registrar::{AgentInput, Registrar};

    fn grid_with_agents(points: &[(f32, f32)]) -> (Grid, Vec<Handle>) {
        let grid = Grid::new(GridConfig {
            origin: Vec3::ZERO,
            dims: (20, 20, 1),
            cell_size: Vec3::new(100.0, 100.0, 100.0),
            max_threads_allowed: 4,
            min_batch_size_allowed: 4,
        })
        .unwrap();
        let registrar = Registrar::new(&grid);
        let traits = TraitMask::LOCATED | TraitMask::COLLIDER | TraitMask::AVOIDING | TraitMask::ACTIVATED;
        let mut handles = Vec::new();
        let agents: Vec<AgentInput> = points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                let h = Handle::new(i as u32, i as u64);
                handles.push(h);
                AgentInput { handle: h, location: Vec3::new(x, y, 0.0), radius: 5.0, traits }
            })
            .collect();
        registrar.register_agent_single(&agents);
        (grid, handles)
    }

    #[test]
    fn sphere_trace_keep_one_returns_nearest() {
        let (grid, handles) = grid_with_agents(&[(100.0, 0.0), (200.0, 0.0), (300.0, 0.0)]);
        let filter = Filter::new().include(TraitMask::LOCATED);
        let mut params = QueryParams::new(filter);
        params.keep_count = KeepCount::Best;
        params.sort_mode = SortMode::NearToFar;
        let outcome = sphere_trace(&grid, Vec3::ZERO, 500.0, &params);
        assert!(outcome.hit);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].subject, handles[0]);
    }

    #[test]
    fn sector_trace_culls_off_axis_agent() {
        let (grid, _handles) = grid_with_agents(&[(500.0, 0.0), (0.0, 500.0)]);
        let filter = Filter::new().include(TraitMask::LOCATED);
        let params = QueryParams::new(filter);
        let outcome = sector_trace(&grid, Vec3::ZERO, 1000.0, 100.0, Vec3::X, 60.0, &params);
        assert_eq!(outcome.results.len(), 1);
        assert!((outcome.results[0].location.x - 500.0).abs() < 1e-3);
    }

    #[test]
    fn sort_monotonicity_near_to_far() {
        let (grid, _h) = grid_with_agents(&[(300.0, 0.0), (100.0, 0.0), (200.0, 0.0)]);
        let filter = Filter::new().include(TraitMask::LOCATED);
        let mut params = QueryParams::new(filter);
        params.keep_count = KeepCount::Unlimited;
        params.sort_mode = SortMode::NearToFar;
        let outcome = sphere_trace(&grid, Vec3::ZERO, 1000.0, &params);
        for w in outcome.results.windows(2) {
            assert!(w[0].cached_dist_sq <= w[1].cached_dist_sq);
        }
    }

    #[test]
    fn ignore_set_excludes_handle() {
        let (grid, handles) = grid_with_agents(&[(100.0, 0.0)]);
        let filter = Filter::new().include(TraitMask::LOCATED);
        let ignore = [handles[0]];
        let mut params = QueryParams::new(filter);
        params.ignore = &ignore;
        let outcome = sphere_trace(&grid, Vec3::ZERO, 1000.0, &params);
        assert!(!outcome.hit);
    }
}
