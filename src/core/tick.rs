//! Tick driver: `Reset -> Register* (parallel) -> Decouple (two-pass ORCA)`.
//!
//! Decouple runs agents-only ORCA first, blended into the current velocity
//! with an inertia term, then obstacles-only ORCA applied directly on top,
//! mirroring the source's two-pass `UpdateVelocity`/`ApplyVelocity` split
//!

use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Vec2, Vec3};
use rayon::prelude::*;

use super::filter::{canonical, Handle, TraitMask};
use super::grid::Grid;
use super::obstacle::{BoxObstacleArena, SphereObstacleDesc};
use super::orca::{self, AgentNeighbor, AgentState, ObstacleSegment};
use super::query::{KeepCount, QueryParams, SortMode};
use super::registrar::{AgentInput, Registrar};
use super::stats::GridStats;

/// Mutable per-agent state the tick driver reads and advances. The host owns
/// the backing storage; `handle.index` must be this agent's index into the
/// slice passed to [`run_tick`] (the same convention `query::sphere_sweep_for_obstacle`
/// uses for box-obstacle arena indices).
#[derive(Debug, Clone, Copy)]
pub struct SimAgent {
    pub handle: Handle,
    pub location: Vec3,
    pub velocity: Vec3,
    pub preferred_velocity: Vec3,
    pub radius: f32,
    pub max_speed: f32,
    pub acceleration: f32,
    pub time_horizon_agent: f32,
    pub time_horizon_obstacle: f32,
    pub traits: TraitMask,
}

#[derive(Debug, Clone, Copy)]
pub struct TickConfig {
    pub max_neighbors: usize,
    /// Upper clamp on the per-tick `Δt` used for integration
    pub dt_clamp_max: f32,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { max_neighbors: 10, dt_clamp_max: 0.0333 }
    }
}

/// `UInterpTo`-style exponential approach: moves `current` toward `target` by
/// at most `(target - current) * clamp(dt * rate, 0, 1)`
fn vinterp_to(current: Vec2, target: Vec2, dt: f32, rate: f32) -> Vec2 {
    if rate <= 0.0 {
        return target;
    }
    let delta = target - current;
    if delta.length_squared() < 1e-8 {
        return target;
    }
    current + delta * (dt * rate).clamp(0.0, 1.0)
}

fn gather_agent_neighbors(grid: &Grid, agents: &[SimAgent], me: &SimAgent, max_neighbors: usize) -> Vec<AgentNeighbor> {
    let base = canonical::agent_neighbor_base();
    let filter = if me.traits.contains(TraitMask::DYING) { canonical::amend_dying(base) } else { base };
    let reach = me.radius + me.max_speed * me.time_horizon_agent;
    let ignore = [me.handle];
    let mut params = QueryParams::new(filter);
    params.keep_count = KeepCount::Bounded(max_neighbors.max(1));
    params.sort_mode = SortMode::NearToFar;
    params.sort_origin = me.location;
    params.ignore = &ignore;

    let outcome = super::query::sphere_trace(grid, me.location, reach, &params);
    outcome
        .results
        .iter()
        .filter_map(|r| agents.get(r.subject.index as usize))
        .map(|other| AgentNeighbor { position: other.location.truncate(), velocity: other.velocity.truncate(), radius: other.radius })
        .collect()
}

fn gather_obstacle_neighbors(
    grid: &Grid,
    sphere_obstacles: &[SphereObstacleDesc],
    box_arena: &BoxObstacleArena,
    me: &SimAgent,
    max_neighbors: usize,
) -> (Vec<AgentNeighbor>, Vec<ObstacleSegment>) {
    let reach = me.radius + me.max_speed * me.time_horizon_obstacle;

    let mut sphere_params = QueryParams::new(canonical::sphere_obstacle_register());
    sphere_params.keep_count = KeepCount::Bounded(max_neighbors.max(1));
    sphere_params.sort_mode = SortMode::NearToFar;
    sphere_params.sort_origin = me.location;
    let sphere_hits = super::query::sphere_trace(grid, me.location, reach, &sphere_params);
    // Static circular obstacles are modeled as zero-velocity agent neighbors,
    // the common RVO2 treatment for disk obstacles (documented simplification
    // alongside the box-wall one in query.rs, see DESIGN.md).
    let sphere_neighbors: Vec<AgentNeighbor> = sphere_hits
        .results
        .iter()
        .filter_map(|r| sphere_obstacles.get(r.subject.index as usize))
        .map(|o| AgentNeighbor { position: o.location.truncate(), velocity: Vec2::ZERO, radius: o.radius })
        .collect();

    let mut box_params = QueryParams::new(canonical::box_obstacle_register());
    box_params.keep_count = KeepCount::Bounded(max_neighbors.max(1));
    box_params.sort_mode = SortMode::NearToFar;
    box_params.sort_origin = me.location;
    let box_hits = super::query::sphere_trace(grid, me.location, reach, &box_params);
    let mut seen = rustc_hash::FxHashSet::default();
    let segments: Vec<ObstacleSegment> = box_hits
        .results
        .iter()
        .filter_map(|r| {
            let index = r.subject.index as usize;
            if !seen.insert(index) {
                return None;
            }
            build_obstacle_segment(box_arena, index)
        })
        .collect();

    (sphere_neighbors, segments)
}

fn build_obstacle_segment(arena: &BoxObstacleArena, index: usize) -> Option<ObstacleSegment> {
    let (node, next) = arena.segment(index)?;
    let prev_direction = node.prev.and_then(|p| arena.get(p)).map(|p| p.unit_dir).unwrap_or(node.unit_dir);
    let next_next_direction = next.next.and_then(|n| arena.get(n)).map(|n| n.unit_dir).unwrap_or(next.unit_dir);
    Some(ObstacleSegment {
        point: node.point2d,
        next_point: next.point2d,
        direction: node.unit_dir,
        is_convex: node.is_convex,
        next_is_convex: next.is_convex,
        prev_direction,
        next_next_direction,
    })
}

/// Runs one full tick: resets the grid, re-registers every entity, then
/// solves and applies ORCA in two passes
#[allow(clippy::too_many_arguments)]
pub fn run_tick(
    grid: &Grid,
    config: &TickConfig,
    agents: &mut [SimAgent],
    sphere_obstacles: &mut [SphereObstacleDesc],
    box_arena: &mut BoxObstacleArena,
    dt: f32,
    stats: &GridStats,
) {
    grid.reset();
    let registrar = Registrar::new(grid);

    let agent_inputs: Vec<AgentInput> =
        agents.iter().map(|a| AgentInput { handle: a.handle, location: a.location, radius: a.radius, traits: a.traits }).collect();
    let single_count = registrar.register_agent_single(&agent_inputs);
    let multi_count = registrar.register_agent_multiple(&agent_inputs);
    let sphere_count = registrar.register_sphere_obstacles(sphere_obstacles);
    let box_count = registrar.register_box_obstacles(box_arena);

    let dt_clamped = dt.clamp(0.0, config.dt_clamp_max);
    let lp3_fallbacks = AtomicU64::new(0);

    // Pass 1: agents-only ORCA, inertia-interpolated toward the solved velocity.
    let agents_snapshot: Vec<SimAgent> = agents.to_vec();
    let pass1: Vec<Vec2> = agents_snapshot
        .par_iter()
        .map(|me| {
            let neighbors = gather_agent_neighbors(grid, &agents_snapshot, me, config.max_neighbors);
            let state = AgentState {
                position: me.location.truncate(),
                radius: me.radius,
                velocity: me.velocity.truncate(),
                max_speed: me.max_speed,
                time_horizon_agent: me.time_horizon_agent,
                time_horizon_obstacle: me.time_horizon_obstacle,
            };
            let mut lines = Vec::new();
            orca::compute_agent_lines(&state, &neighbors, dt_clamped, &mut lines);
            let (velocity, fail) = orca::linear_program2(&lines, me.max_speed, me.preferred_velocity.truncate(), false);
            let desired = if fail < lines.len() {
                lp3_fallbacks.fetch_add(1, Ordering::Relaxed);
                orca::linear_program3(&lines, 0, fail, me.max_speed, velocity)
            } else {
                velocity
            };
            let rate = (me.acceleration / 100.0).max(1e-4);
            vinterp_to(me.velocity.truncate(), desired, dt_clamped, rate)
        })
        .collect();

    for (agent, v) in agents.iter_mut().zip(pass1.iter()) {
        agent.velocity = Vec3::new(v.x, v.y, agent.velocity.z);
    }

    // Pass 2: obstacles-only ORCA, applied directly (no inertia).
    let agents_after_pass1: Vec<SimAgent> = agents.to_vec();
    let pass2: Vec<Vec2> = agents_after_pass1
        .par_iter()
        .map(|me| {
            let (sphere_neighbors, segments) = gather_obstacle_neighbors(grid, sphere_obstacles, box_arena, me, config.max_neighbors);
            let state = AgentState {
                position: me.location.truncate(),
                radius: me.radius,
                velocity: me.velocity.truncate(),
                max_speed: me.max_speed,
                time_horizon_agent: me.time_horizon_agent,
                time_horizon_obstacle: me.time_horizon_obstacle,
            };
            let mut lines = Vec::new();
            let num_obstacle_lines = orca::compute_obstacle_lines(&state, &segments, &mut lines);
            orca::compute_agent_lines(&state, &sphere_neighbors, dt_clamped, &mut lines);
            orca::compute_new_velocity(&lines, num_obstacle_lines, me.max_speed, me.velocity.truncate())
        })
        .collect();

    for (agent, v) in agents.iter_mut().zip(pass2.iter()) {
        agent.velocity = Vec3::new(v.x, v.y, agent.velocity.z);
        agent.location += agent.velocity * dt_clamped;
    }

    stats.record_tick(
        (single_count + multi_count) as u64,
        sphere_count as u64,
        box_count as u64,
        lp3_fallbacks.load(Ordering::Relaxed),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::GridConfig;

    fn make_agent(index: u32, location: Vec3, velocity: Vec3) -> SimAgent {
        SimAgent {
            handle: Handle::new(index, index as u64),
            location,
            velocity,
            preferred_velocity: velocity,
            radius: 20.0,
            max_speed: 100.0,
            acceleration: 400.0,
            time_horizon_agent: 2.0,
            time_horizon_obstacle: 2.0,
            traits: TraitMask::LOCATED | TraitMask::COLLIDER | TraitMask::AVOIDING | TraitMask::AVOIDANCE | TraitMask::ACTIVATED,
        }
    }

    fn small_grid() -> Grid {
        Grid::new(GridConfig {
            origin: Vec3::new(-1000.0, -1000.0, -50.0),
            dims: (40, 40, 1),
            cell_size: Vec3::new(100.0, 100.0, 100.0),
            max_threads_allowed: 4,
            min_batch_size_allowed: 4,
        })
        .unwrap()
    }

    #[test]
    fn lone_agent_runs_tick_without_panicking_and_moves_toward_preferred() {
        let grid = small_grid();
        let mut agents = vec![make_agent(0, Vec3::ZERO, Vec3::new(50.0, 0.0, 0.0))];
        let mut spheres: Vec<SphereObstacleDesc> = Vec::new();
        let mut arena = BoxObstacleArena::default();
        let stats = GridStats::default();
        run_tick(&grid, &TickConfig::default(), &mut agents, &mut spheres, &mut arena, 1.0 / 30.0, &stats);
        assert!(agents[0].location.x > 0.0);
        assert_eq!(stats.snapshot().ticks_run, 1);
    }

    #[test]
    fn head_on_pair_avoids_passing_through_each_other() {
        let grid = small_grid();
        let mut agents = vec![
            make_agent(0, Vec3::new(-200.0, 0.0, 0.0), Vec3::new(100.0, 0.0, 0.0)),
            make_agent(1, Vec3::new(200.0, 0.0, 0.0), Vec3::new(-100.0, 0.0, 0.0)),
        ];
        agents[0].preferred_velocity = Vec3::new(100.0, 0.0, 0.0);
        agents[1].preferred_velocity = Vec3::new(-100.0, 0.0, 0.0);
        let mut spheres: Vec<SphereObstacleDesc> = Vec::new();
        let mut arena = BoxObstacleArena::default();
        let stats = GridStats::default();
        for _ in 0..30 {
            run_tick(&grid, &TickConfig::default(), &mut agents, &mut spheres, &mut arena, 1.0 / 30.0, &stats);
        }
        let dist = agents[0].location.distance(agents[1].location);
        assert!(dist >= 39.0, "agents overlapped: dist={dist}");
    }

    #[test]
    fn dt_is_clamped_for_integration() {
        let grid = small_grid();
        let mut agents = vec![make_agent(0, Vec3::ZERO, Vec3::new(100.0, 0.0, 0.0))];
        agents[0].preferred_velocity = Vec3::new(100.0, 0.0, 0.0);
        let mut spheres: Vec<SphereObstacleDesc> = Vec::new();
        let mut arena = BoxObstacleArena::default();
        let stats = GridStats::default();
        run_tick(&grid, &TickConfig::default(), &mut agents, &mut spheres, &mut arena, 5.0, &stats);
        assert!(agents[0].location.x <= 100.0 * 0.0334, "position advanced past the clamped dt bound");
    }
}
