//! Thin bevy host wrapper around the `core` spatial-hash/ORCA planner.
//!
//! Every `FixedUpdate` tick this plugin snapshots `(Transform, Velocity,
//! PreferredVelocity, AvoidanceAgent)` into `core::SimAgent`s, calls
//! `core::run_tick`, and writes the results back onto the entities — a
//! "gather -> solve -> scatter" shape driven by the uniform 3D grid.

use bevy::prelude::*;

use crate::core::filter::{Handle, TraitMask};
use crate::core::{run_tick, BoxObstacleArena, Grid, GridConfig, GridStats, SimAgent, TickConfig};
use crate::game::config::GameConfig;
use crate::game::profiling::profile;

#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Velocity(pub Vec3);

/// The velocity an agent would take with no neighbors in the way; set by
/// steering/input systems (e.g. `control::handle_input`), consumed by the
/// ORCA solve.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct PreferredVelocity(pub Vec3);

#[derive(Component, Debug, Clone, Copy)]
pub struct AvoidanceAgent {
    pub radius: f32,
    pub max_speed: f32,
    pub acceleration: f32,
    pub time_horizon_agent: f32,
    pub time_horizon_obstacle: f32,
}

#[derive(Resource)]
pub struct CoreGrid(pub Grid);

#[derive(Resource, Default)]
pub struct CoreObstacles {
    pub spheres: Vec<crate::core::SphereObstacleDesc>,
    pub boxes: BoxObstacleArena,
}

#[derive(Resource, Default)]
pub struct CoreGridStats(pub GridStats);

#[derive(Resource, Clone, Copy)]
pub struct CoreTickConfig(pub TickConfig, pub f32);

#[derive(Resource, Default)]
pub struct SimTick(pub u64);

pub struct SimulationPlugin;

impl Plugin for SimulationPlugin {
    fn build(&self, app: &mut App) {
        let cfg = GameConfig::default();
        app.insert_resource(Time::<Fixed>::from_seconds(cfg.tick_dt as f64))
            .insert_resource(CoreGrid(
                Grid::new(GridConfig {
                    origin: Vec3::new(cfg.grid_origin.0, cfg.grid_origin.1, cfg.grid_origin.2),
                    dims: cfg.grid_dims,
                    cell_size: Vec3::new(cfg.grid_cell_size.0, cfg.grid_cell_size.1, cfg.grid_cell_size.2),
                    max_threads_allowed: cfg.max_threads_allowed,
                    min_batch_size_allowed: cfg.min_batch_size_allowed,
                })
                .expect("default grid config is valid"),
            ))
            .insert_resource(CoreObstacles::default())
            .insert_resource(CoreGridStats::default())
            .insert_resource(CoreTickConfig(TickConfig { max_neighbors: cfg.max_neighbors, ..TickConfig::default() }, cfg.tick_dt))
            .init_resource::<SimTick>()
            .add_systems(FixedUpdate, run_avoidance_tick);
    }
}

#[profile]
fn run_avoidance_tick(
    mut query: Query<(Entity, &mut Transform, &mut Velocity, &PreferredVelocity, &AvoidanceAgent)>,
    grid: Res<CoreGrid>,
    mut obstacles: ResMut<CoreObstacles>,
    stats: Res<CoreGridStats>,
    tick_config: Res<CoreTickConfig>,
    mut tick: ResMut<SimTick>,
) {
    tick.0 += 1;

    let mut entities: Vec<Entity> = Vec::new();
    let mut agents: Vec<SimAgent> = Vec::new();
    for (entity, transform, velocity, preferred, avoidance) in query.iter() {
        let index = entities.len() as u32;
        entities.push(entity);
        agents.push(SimAgent {
            handle: Handle::new(index, entity.to_bits()),
            location: transform.translation,
            velocity: velocity.0,
            preferred_velocity: preferred.0,
            radius: avoidance.radius,
            max_speed: avoidance.max_speed,
            acceleration: avoidance.acceleration,
            time_horizon_agent: avoidance.time_horizon_agent,
            time_horizon_obstacle: avoidance.time_horizon_obstacle,
            traits: TraitMask::LOCATED | TraitMask::COLLIDER | TraitMask::AVOIDING | TraitMask::AVOIDANCE | TraitMask::ACTIVATED,
        });
    }

    run_tick(&grid.0, &tick_config.0, &mut agents, &mut obstacles.spheres, &mut obstacles.boxes, tick_config.1, &stats.0);

    for (entity, agent) in entities.iter().zip(agents.iter()) {
        if let Ok((_, mut transform, mut velocity, _, _)) = query.get_mut(*entity) {
            transform.translation = agent.location;
            velocity.0 = agent.velocity;
        }
    }
}
