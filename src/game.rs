use bevy::prelude::*;

mod camera;
pub mod config;
mod control;
mod profiling;
pub mod simulation;
mod unit;

use camera::RtsCameraPlugin;
use config::GameConfigPlugin;
use control::ControlPlugin;
use simulation::SimulationPlugin;
use unit::UnitPlugin;

pub struct GamePlugin;

impl Plugin for GamePlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins((GameConfigPlugin, SimulationPlugin, RtsCameraPlugin, UnitPlugin, ControlPlugin))
            .add_systems(Startup, setup_game);
    }
}

fn setup_game(mut commands: Commands, mut meshes: ResMut<Assets<Mesh>>, mut materials: ResMut<Assets<StandardMaterial>>) {
    info!("Game setup started");

    // Ground Plane
    commands.spawn((
        Mesh3d(meshes.add(Plane3d::default().mesh().size(2000.0, 2000.0))),
        MeshMaterial3d(materials.add(Color::srgb(0.3, 0.5, 0.3))),
    ));

    // Light
    commands.spawn((
        PointLight { shadows_enabled: true, intensity: 10_000_000.0, range: 4000.0, ..default() },
        Transform::from_xyz(300.0, 600.0, 300.0),
    ));

    // UI Camera
    commands.spawn((Camera2d::default(), Camera { order: 1, ..default() }));
}
