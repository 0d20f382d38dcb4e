//! RON-backed asset config, loaded via a `bevy_common_assets`
//! `RonAssetPlugin` plus a `Handle<GameConfig>` resource.

use bevy::prelude::*;
use bevy_common_assets::ron::RonAssetPlugin;
use serde::Deserialize;

#[derive(Deserialize, Asset, TypePath, Clone, Debug)]
pub struct GameConfig {
    pub grid_origin: (f32, f32, f32),
    pub grid_dims: (u32, u32, u32),
    pub grid_cell_size: (f32, f32, f32),
    pub max_threads_allowed: usize,
    pub min_batch_size_allowed: usize,

    pub tick_dt: f32,
    pub max_neighbors: usize,

    pub agent_radius: f32,
    pub agent_max_speed: f32,
    pub agent_acceleration: f32,
    pub agent_time_horizon: f32,
    pub agent_time_horizon_obstacle: f32,

    pub camera_speed: f32,
    pub camera_zoom_speed: f32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grid_origin: (-2000.0, -2000.0, -200.0),
            grid_dims: (64, 64, 8),
            grid_cell_size: (64.0, 64.0, 64.0),
            max_threads_allowed: 8,
            min_batch_size_allowed: 64,
            tick_dt: 1.0 / 30.0,
            max_neighbors: 10,
            agent_radius: 20.0,
            agent_max_speed: 150.0,
            agent_acceleration: 400.0,
            agent_time_horizon: 2.0,
            agent_time_horizon_obstacle: 2.0,
            camera_speed: 20.0,
            camera_zoom_speed: 5.0,
        }
    }
}

#[derive(Resource)]
pub struct GameConfigHandle(pub Handle<GameConfig>);

pub struct GameConfigPlugin;

impl Plugin for GameConfigPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(RonAssetPlugin::<GameConfig>::new(&["game_config.ron"])).add_systems(Startup, setup_config);
    }
}

fn setup_config(mut commands: Commands, asset_server: Res<AssetServer>) {
    let handle = asset_server.load("game_config.ron");
    commands.insert_resource(GameConfigHandle(handle));
}
