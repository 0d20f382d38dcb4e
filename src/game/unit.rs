use bevy::prelude::*;

use crate::game::simulation::{AvoidanceAgent, PreferredVelocity, Velocity};

#[derive(Component)]
pub struct Unit;

#[derive(Component)]
pub struct Selected;

#[derive(Resource)]
pub struct UnitMaterials {
    pub normal: Handle<StandardMaterial>,
    pub selected: Handle<StandardMaterial>,
}

pub struct UnitPlugin;

impl Plugin for UnitPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, spawn_test_units).add_systems(Update, update_selection_visuals);
    }
}

fn update_selection_visuals(mut query: Query<(Option<&Selected>, &mut MeshMaterial3d<StandardMaterial>), With<Unit>>, unit_materials: Res<UnitMaterials>) {
    for (selected, mut mat_handle) in query.iter_mut() {
        let target_mat = if selected.is_some() { &unit_materials.selected } else { &unit_materials.normal };
        if mat_handle.0 != *target_mat {
            mat_handle.0 = target_mat.clone();
        }
    }
}

fn spawn_test_units(mut commands: Commands, mut meshes: ResMut<Assets<Mesh>>, mut materials: ResMut<Assets<StandardMaterial>>) {
    let mesh = meshes.add(Capsule3d::new(20.0, 40.0));
    let normal_mat = materials.add(Color::srgb(0.8, 0.7, 0.6));
    let selected_mat = materials.add(Color::srgb(0.2, 0.8, 0.2));

    commands.insert_resource(UnitMaterials { normal: normal_mat.clone(), selected: selected_mat.clone() });

    for x in -2..3 {
        for z in -2..3 {
            commands.spawn((
                Unit,
                Mesh3d(mesh.clone()),
                MeshMaterial3d(normal_mat.clone()),
                Transform::from_xyz(x as f32 * 60.0, 0.0, z as f32 * 60.0),
                Velocity::default(),
                PreferredVelocity::default(),
                AvoidanceAgent { radius: 20.0, max_speed: 150.0, acceleration: 400.0, time_horizon_agent: 2.0, time_horizon_obstacle: 2.0 },
            ));
        }
    }
}
