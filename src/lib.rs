//! # Bevy Highlighting
//!
//! Soft glow highlighting around selected objects for Bevy 0.18.
//!
//! Highlighted meshes are drawn as flat silhouettes into an offscreen buffer, blurred
//! at reduced resolution and composited over the camera's frame with the silhouettes
//! themselves cut out, so only the glow around them remains.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bevy::prelude::*;
//! use bevy_highlighting::prelude::*;
//!
//! fn main() {
//!     App::new()
//!         .add_plugins((DefaultPlugins, HighlightingPlugin))
//!         .add_systems(Startup, setup)
//!         .run();
//! }
//!
//! fn setup(
//!     mut commands: Commands,
//!     mut meshes: ResMut<Assets<Mesh>>,
//!     mut materials: ResMut<Assets<StandardMaterial>>,
//! ) {
//!     // A cube with a cyan glow
//!     commands.spawn((
//!         Mesh3d(meshes.add(Cuboid::default())),
//!         MeshMaterial3d(materials.add(Color::srgb(0.8, 0.2, 0.2))),
//!         Highlighter::new(LinearRgba::rgb(0.0, 1.0, 1.0)),
//!     ));
//!
//!     // Camera that renders the glow
//!     commands.spawn((
//!         Camera3d::default(),
//!         Transform::from_xyz(0.0, 2.0, 5.0).looking_at(Vec3::ZERO, Vec3::Y),
//!         HighlightingSettings::default(),
//!     ));
//! }
//! ```
//!
//! The render-independent driver lives in [`pipeline`] and talks to the GPU through the
//! [`backend::RenderBackend`] trait, so it can be reused with any graphics layer.

pub mod backend;
pub mod capability;
mod components;
mod error;
pub mod materials;
pub mod pipeline;
pub mod registry;
pub mod render;
mod silhouette_material;
pub mod systems;

pub mod prelude {
    pub use crate::components::{Downsample, HighlightMode, Highlighter, HighlightingSettings};
    pub use crate::error::HighlightingError;
    pub use crate::HighlightingPlugin;
}

pub use components::*;
pub use error::HighlightingError;
pub use silhouette_material::{HighlightSilhouetteKey, HighlightSilhouetteMaterial};

use bevy::{
    asset::embedded_asset, camera::visibility::VisibilitySystems, prelude::*,
    transform::TransformSystems,
};

use registry::HighlightRegistry;
use render::HighlightingRenderPlugin;
use systems::{
    resize_highlight_textures, setup_highlighting_camera, sync_highlight_silhouettes,
    sync_highlighting_cameras, teardown_highlighting_camera, track_highlighters,
    HighlightSilhouettes,
};

/// Plugin that enables glow highlighting.
///
/// Add [`Highlighter`] to meshes that may glow and [`HighlightingSettings`] to the camera
/// that should show it.
pub struct HighlightingPlugin;

impl Plugin for HighlightingPlugin {
    fn build(&self, app: &mut App) {
        embedded_asset!(app, "shaders/clear.wgsl");
        embedded_asset!(app, "shaders/blit.wgsl");
        embedded_asset!(app, "shaders/blur.wgsl");
        embedded_asset!(app, "shaders/cut.wgsl");
        embedded_asset!(app, "shaders/composite.wgsl");
        embedded_asset!(app, "shaders/silhouette.wgsl");

        app.register_type::<Highlighter>()
            .register_type::<HighlightingSettings>()
            .init_resource::<HighlightRegistry<Entity>>()
            .init_resource::<HighlightSilhouettes>()
            .add_plugins((
                HighlightingRenderPlugin,
                MaterialPlugin::<HighlightSilhouetteMaterial>::default(),
            ))
            .add_systems(
                PostUpdate,
                (
                    track_highlighters,
                    setup_highlighting_camera,
                    teardown_highlighting_camera,
                    sync_highlight_silhouettes,
                    sync_highlighting_cameras,
                    resize_highlight_textures,
                )
                    .chain()
                    .after(TransformSystems::Propagate)
                    .before(VisibilitySystems::VisibilityPropagate)
                    .before(VisibilitySystems::UpdateFrusta),
            );
    }
}
