//! End-to-end scenarios against the public `core` API

use crowdgrid::core::filter::{Handle, TraitMask};
use crowdgrid::core::{
    run_tick, BoxObstacleArena, Filter, Grid, GridConfig, KeepCount, QueryParams, SimAgent, SortMode, SphereObstacleDesc, TickConfig,
};
use glam::Vec3;

fn grid() -> Grid {
    Grid::new(GridConfig {
        origin: Vec3::new(-1000.0, -1000.0, -50.0),
        dims: (40, 40, 1),
        cell_size: Vec3::new(100.0, 100.0, 100.0),
        max_threads_allowed: 4,
        min_batch_size_allowed: 4,
    })
    .unwrap()
}

fn agent(index: u32, location: Vec3, velocity: Vec3) -> SimAgent {
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

#[test]
fn single_agent_in_an_empty_world_reaches_its_preferred_velocity() {
    let grid = grid();
    let mut agents = vec![agent(0, Vec3::ZERO, Vec3::new(80.0, 0.0, 0.0))];
    let mut spheres: Vec<SphereObstacleDesc> = Vec::new();
    let mut arena = BoxObstacleArena::default();
    let stats = crowdgrid::core::GridStats::default();
    for _ in 0..10 {
        run_tick(&grid, &TickConfig::default(), &mut agents, &mut spheres, &mut arena, 1.0 / 30.0, &stats);
    }
    assert!((agents[0].velocity.x - 80.0).abs() < 1.0);
    assert!(agents[0].location.x > 0.0);
}

#[test]
fn head_on_symmetric_pair_deflects_without_colliding() {
    let grid = grid();
    let mut agents = vec![
        agent(0, Vec3::new(-300.0, 0.0, 0.0), Vec3::new(100.0, 0.0, 0.0)),
        agent(1, Vec3::new(300.0, 0.0, 0.0), Vec3::new(-100.0, 0.0, 0.0)),
    ];
    let mut spheres: Vec<SphereObstacleDesc> = Vec::new();
    let mut arena = BoxObstacleArena::default();
    let stats = crowdgrid::core::GridStats::default();
    let mut min_dist = f32::MAX;
    for _ in 0..60 {
        run_tick(&grid, &TickConfig::default(), &mut agents, &mut spheres, &mut arena, 1.0 / 30.0, &stats);
        min_dist = min_dist.min(agents[0].location.distance(agents[1].location));
    }
    assert!(min_dist >= 38.0, "agents came closer than the combined radius: {min_dist}");
}

#[test]
fn sphere_trace_with_keep_one_returns_the_nearest_registered_agent() {
    let grid = grid();
    let registrar = crowdgrid::core::Registrar::new(&grid);
    let traits = TraitMask::LOCATED | TraitMask::COLLIDER | TraitMask::AVOIDING | TraitMask::ACTIVATED;
    let inputs = vec![
        crowdgrid::core::AgentInput { handle: Handle::new(0, 0), location: Vec3::new(100.0, 0.0, 0.0), radius: 5.0, traits },
        crowdgrid::core::AgentInput { handle: Handle::new(1, 1), location: Vec3::new(400.0, 0.0, 0.0), radius: 5.0, traits },
    ];
    registrar.register_agent_single(&inputs);

    let filter = Filter::new().include(TraitMask::LOCATED);
    let mut params = QueryParams::new(filter);
    params.keep_count = KeepCount::Best;
    params.sort_mode = SortMode::NearToFar;
    let outcome = crowdgrid::core::query::sphere_trace(&grid, Vec3::ZERO, 1000.0, &params);
    assert!(outcome.hit);
    assert_eq!(outcome.results[0].subject, Handle::new(0, 0));
}

#[test]
fn sector_trace_culls_an_agent_outside_the_cone() {
    let grid = grid();
    let registrar = crowdgrid::core::Registrar::new(&grid);
    let traits = TraitMask::LOCATED | TraitMask::COLLIDER | TraitMask::AVOIDING | TraitMask::ACTIVATED;
    let inputs = vec![
        crowdgrid::core::AgentInput { handle: Handle::new(0, 0), location: Vec3::new(500.0, 0.0, 0.0), radius: 5.0, traits },
        crowdgrid::core::AgentInput { handle: Handle::new(1, 1), location: Vec3::new(0.0, 500.0, 0.0), radius: 5.0, traits },
    ];
    registrar.register_agent_single(&inputs);

    let filter = Filter::new().include(TraitMask::LOCATED);
    let params = QueryParams::new(filter);
    let outcome = crowdgrid::core::query::sector_trace(&grid, Vec3::ZERO, 1000.0, 100.0, Vec3::X, 60.0, &params);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].subject, Handle::new(0, 0));
}

#[test]
fn sphere_sweep_for_obstacle_finds_a_sphere_obstacle_blocking_the_path() {
    let grid = grid();
    let registrar = crowdgrid::core::Registrar::new(&grid);
    let mut spheres = vec![SphereObstacleDesc { handle: Handle::new(0, 0), location: Vec3::new(200.0, 0.0, 0.0), radius: 30.0, is_static: true, registered: false }];
    registrar.register_sphere_obstacles(&mut spheres);
    let arena = BoxObstacleArena::default();

    let hit = crowdgrid::core::query::sphere_sweep_for_obstacle(&grid, &arena, Vec3::ZERO, Vec3::new(400.0, 0.0, 0.0), 20.0);
    assert!(hit.is_some());
    assert_eq!(hit.unwrap().handle, Handle::new(0, 0));
}

#[test]
fn tightly_packed_neighbors_still_respect_the_speed_bound_under_lp3_fallback() {
    let grid = grid();
    let mut agents = vec![
        agent(0, Vec3::ZERO, Vec3::new(50.0, 0.0, 0.0)),
        agent(1, Vec3::new(15.0, 0.0, 0.0), Vec3::new(-50.0, 0.0, 0.0)),
        agent(2, Vec3::new(-7.5, 13.0, 0.0), Vec3::new(20.0, -50.0, 0.0)),
        agent(3, Vec3::new(-7.5, -13.0, 0.0), Vec3::new(20.0, 50.0, 0.0)),
    ];
    let mut spheres: Vec<SphereObstacleDesc> = Vec::new();
    let mut arena = BoxObstacleArena::default();
    let stats = crowdgrid::core::GridStats::default();
    for _ in 0..5 {
        run_tick(&grid, &TickConfig::default(), &mut agents, &mut spheres, &mut arena, 1.0 / 30.0, &stats);
        for a in &agents {
            assert!(a.velocity.length() <= a.max_speed + 1e-2, "speed bound violated: {:?}", a.velocity);
        }
    }
}
