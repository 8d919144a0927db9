//! Basic example showing how to use bevy_highlighting.
//!
//! Press 1, 2 or 3 to select a cube, Escape to clear the selection.
//!
//! Run with: cargo run --example basic

use bevy::prelude::*;
use bevy_highlighting::prelude::*;

fn main() {
    App::new()
        .add_plugins((DefaultPlugins, HighlightingPlugin))
        .add_systems(Startup, setup)
        .add_systems(Update, (select_cube, rotate_cubes))
        .run();
}

/// Number key that selects a cube, and its glow color.
#[derive(Component)]
struct Selectable {
    key: KeyCode,
    color: LinearRgba,
}

fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let cubes = [
        (KeyCode::Digit1, -2.0, Color::srgb(0.8, 0.2, 0.2), LinearRgba::rgb(1.0, 0.5, 0.0)),
        (KeyCode::Digit2, 0.0, Color::srgb(0.2, 0.8, 0.2), LinearRgba::rgb(0.2, 0.4, 1.0)),
        (KeyCode::Digit3, 2.0, Color::srgb(0.2, 0.2, 0.8), LinearRgba::WHITE),
    ];
    for (key, x, base, glow) in cubes {
        commands.spawn((
            Mesh3d(meshes.add(Cuboid::new(1.0, 1.0, 1.0))),
            MeshMaterial3d(materials.add(base)),
            Transform::from_xyz(x, 0.5, 0.0),
            Highlighter::default(),
            Selectable { key, color: glow },
            Rotates,
        ));
    }

    // Cube that can never glow, for comparison
    commands.spawn((
        Mesh3d(meshes.add(Cuboid::new(1.0, 1.0, 1.0))),
        MeshMaterial3d(materials.add(Color::srgb(0.5, 0.5, 0.5))),
        Transform::from_xyz(4.0, 0.5, 0.0),
    ));

    // Ground plane
    commands.spawn((
        Mesh3d(meshes.add(Plane3d::default().mesh().size(20.0, 20.0))),
        MeshMaterial3d(materials.add(Color::srgb(0.3, 0.3, 0.3))),
    ));

    // Light
    commands.spawn((
        DirectionalLight {
            illuminance: 10000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(4.0, 8.0, 4.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));

    // Camera with highlighting
    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(0.0, 5.0, 10.0).looking_at(Vec3::ZERO, Vec3::Y),
        HighlightingSettings::default(),
    ));
}

/// Only the selected cube glows.
fn select_cube(
    keys: Res<ButtonInput<KeyCode>>,
    mut cubes: Query<(&Selectable, &mut Highlighter)>,
) {
    if keys.just_pressed(KeyCode::Escape) {
        for (_, mut highlighter) in cubes.iter_mut() {
            highlighter.off();
        }
        return;
    }

    let Some(pressed) = cubes
        .iter()
        .map(|(selectable, _)| selectable.key)
        .find(|key| keys.just_pressed(*key))
    else {
        return;
    };

    for (selectable, mut highlighter) in cubes.iter_mut() {
        if selectable.key == pressed {
            highlighter.constant_on(selectable.color);
        } else {
            highlighter.off();
        }
    }
}

#[derive(Component)]
struct Rotates;

fn rotate_cubes(time: Res<Time>, mut query: Query<&mut Transform, With<Rotates>>) {
    for mut transform in query.iter_mut() {
        transform.rotate_y(time.delta_secs() * 0.5);
    }
}
