//! Example showing bevy_highlighting tuned from an egui window.
//!
//! Run with: cargo run --example with_egui

use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts, EguiPlugin, EguiPrimaryContextPass};
use bevy_highlighting::prelude::*;

fn main() {
    App::new()
        .add_plugins((DefaultPlugins, EguiPlugin::default(), HighlightingPlugin))
        .init_resource::<GlowConfig>()
        .add_systems(Startup, setup)
        .add_systems(EguiPrimaryContextPass, ui_system)
        .add_systems(Update, (update_highlighting, rotate_cube))
        .run();
}

#[derive(Resource)]
struct GlowConfig {
    color: [f32; 4],
    highlighted: bool,
    transparent: bool,
    settings: HighlightingSettings,
    downsample: u32,
}

impl Default for GlowConfig {
    fn default() -> Self {
        Self {
            color: [1.0, 0.5, 0.0, 1.0],
            highlighted: true,
            transparent: false,
            settings: HighlightingSettings::default(),
            downsample: Downsample::default().factor(),
        }
    }
}

#[derive(Component)]
struct GlowingCube;

fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    commands.spawn((
        Mesh3d(meshes.add(Cuboid::new(2.0, 2.0, 2.0))),
        MeshMaterial3d(materials.add(Color::srgb(0.8, 0.2, 0.2))),
        Transform::from_xyz(0.0, 1.0, 0.0),
        Highlighter::new(LinearRgba::rgb(1.0, 0.5, 0.0)),
        GlowingCube,
    ));

    // Ground plane
    commands.spawn((
        Mesh3d(meshes.add(Plane3d::default().mesh().size(10.0, 10.0))),
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

    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(0.0, 5.0, 8.0).looking_at(Vec3::ZERO, Vec3::Y),
        HighlightingSettings::default(),
    ));
}

fn ui_system(mut contexts: EguiContexts, mut config: ResMut<GlowConfig>) -> Result {
    egui::Window::new("Highlighting").show(contexts.ctx_mut()?, |ui| {
        let config = &mut *config;
        ui.checkbox(&mut config.settings.enabled, "Enable highlighting");
        ui.checkbox(&mut config.highlighted, "Highlight cube");
        ui.checkbox(&mut config.transparent, "Transparent silhouette");
        ui.color_edit_button_rgba_unmultiplied(&mut config.color);

        ui.separator();
        ui.horizontal(|ui| {
            ui.label("Downsample");
            for factor in [1, 2, 4] {
                ui.radio_value(&mut config.downsample, factor, format!("{factor}x"));
            }
        });
        ui.add(egui::Slider::new(&mut config.settings.iterations, 0..=8).text("Iterations"));
        ui.add(
            egui::Slider::new(&mut config.settings.blur_min_spread, 0.0..=3.0).text("Min spread"),
        );
        ui.add(egui::Slider::new(&mut config.settings.blur_spread, 0.0..=3.0).text("Spread"));
        ui.add(
            egui::Slider::new(&mut config.settings.blur_intensity, 0.0..=1.0).text("Intensity"),
        );
    });
    Ok(())
}

fn update_highlighting(
    mut config: ResMut<GlowConfig>,
    mut cubes: Query<&mut Highlighter, With<GlowingCube>>,
    mut cameras: Query<&mut HighlightingSettings>,
) {
    if !config.is_changed() {
        return;
    }

    let factor = config.downsample;
    if let Err(err) = config.settings.set_downsample_factor(factor) {
        warn!("{err}");
    }

    let [r, g, b, a] = config.color;
    let color = LinearRgba::new(r, g, b, a);
    for mut highlighter in cubes.iter_mut() {
        if config.highlighted {
            highlighter.constant_on(color);
        } else {
            highlighter.off();
        }
        highlighter.transparent = config.transparent;
    }

    for mut settings in cameras.iter_mut() {
        *settings = config.settings;
    }
}

fn rotate_cube(time: Res<Time>, mut query: Query<&mut Transform, With<GlowingCube>>) {
    for mut transform in query.iter_mut() {
        transform.rotate_y(time.delta_secs() * 0.5);
    }
}
