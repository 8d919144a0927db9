//! Main-world systems: highlighter registration, silhouette copies and highlight cameras.

use bevy::{
    asset::RenderAssetUsages,
    camera::{visibility::RenderLayers, RenderTarget},
    ecs::entity::EntityHashMap,
    prelude::*,
    render::render_resource::{Extent3d, TextureDimension, TextureFormat, TextureUsages},
};

use crate::{
    backend::HIGHLIGHT_RENDER_LAYER,
    components::{Highlighter, HighlightingSettings},
    materials::SilhouetteShader,
    registry::HighlightRegistry,
    silhouette_material::HighlightSilhouetteMaterial,
};

/// Links a camera to the camera that draws its highlight layer.
#[derive(Component, Clone)]
pub struct HighlightingCameraLink {
    pub highlight_camera: Entity,
    pub highlight_texture: Handle<Image>,
}

/// Marker for cameras that draw the highlight layer.
#[derive(Component)]
pub struct HighlightingCamera;

/// Copy of a highlighted mesh living on the highlight layer.
#[derive(Component)]
pub struct HighlightSilhouette {
    pub source: Entity,
}

/// Silhouette copy of every registered highlighter, keyed by highlighter entity.
#[derive(Resource, Default)]
pub struct HighlightSilhouettes(pub EntityHashMap<Entity>);

/// Keeps the highlighter registry in step with `Highlighter` components.
pub fn track_highlighters(
    mut registry: ResMut<HighlightRegistry<Entity>>,
    added: Query<Entity, Added<Highlighter>>,
    mut removed: RemovedComponents<Highlighter>,
) {
    for entity in removed.read() {
        registry.unregister(&entity);
    }
    for entity in added.iter() {
        registry.register(entity);
    }
}

fn target_size(
    render_target: Option<&RenderTarget>,
    images: &Assets<Image>,
    windows: &Query<&Window>,
) -> Option<UVec2> {
    match render_target {
        Some(RenderTarget::Window(window_ref)) => {
            let window = match window_ref {
                bevy::window::WindowRef::Primary => windows.iter().next(),
                bevy::window::WindowRef::Entity(e) => windows.get(*e).ok(),
            };
            window.map(|w| UVec2::new(w.physical_width(), w.physical_height()))
        }
        Some(RenderTarget::Image(image_target)) => {
            images.get(&image_target.handle).map(|img| img.size())
        }
        _ => windows
            .iter()
            .next()
            .map(|w| UVec2::new(w.physical_width(), w.physical_height())),
    }
}

/// Spawns a highlight camera for every camera that gained [`HighlightingSettings`].
pub fn setup_highlighting_camera(
    mut commands: Commands,
    mut images: ResMut<Assets<Image>>,
    cameras: Query<
        (Entity, &GlobalTransform, &Projection, Option<&RenderTarget>),
        (With<HighlightingSettings>, Without<HighlightingCameraLink>),
    >,
    windows: Query<&Window>,
) {
    for (entity, global_transform, projection, render_target) in cameras.iter() {
        let size = target_size(render_target, &images, &windows).unwrap_or(UVec2::new(1920, 1080));

        let mut highlight_image = Image::new_fill(
            Extent3d {
                width: size.x.max(1),
                height: size.y.max(1),
                depth_or_array_layers: 1,
            },
            TextureDimension::D2,
            &[0, 0, 0, 0],
            TextureFormat::Rgba8UnormSrgb,
            RenderAssetUsages::RENDER_WORLD,
        );
        highlight_image.texture_descriptor.usage =
            TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING;
        let highlight_handle = images.add(highlight_image);

        let highlight_camera = commands
            .spawn((
                Camera3d::default(),
                Camera {
                    // Draw before the main camera so its output is ready for compositing
                    order: -1,
                    clear_color: ClearColorConfig::Custom(Color::NONE),
                    is_active: false,
                    ..default()
                },
                RenderTarget::Image(highlight_handle.clone().into()),
                global_transform.compute_transform(),
                projection.clone(),
                Msaa::Off,
                RenderLayers::layer(HIGHLIGHT_RENDER_LAYER),
                HighlightingCamera,
            ))
            .id();

        commands.entity(entity).insert(HighlightingCameraLink {
            highlight_camera,
            highlight_texture: highlight_handle,
        });
    }
}

/// Despawns highlight cameras whose main camera lost its [`HighlightingSettings`].
pub fn teardown_highlighting_camera(
    mut commands: Commands,
    mut removed: RemovedComponents<HighlightingSettings>,
    links: Query<&HighlightingCameraLink>,
) {
    for entity in removed.read() {
        if let Ok(link) = links.get(entity) {
            commands.entity(link.highlight_camera).despawn();
            commands.entity(entity).remove::<HighlightingCameraLink>();
        }
    }
}

/// Settings of the camera the silhouettes are drawn for: the first active highlighting
/// camera, or any highlighting camera when none is active.
fn driving_settings(
    cameras: &Query<(&Camera, &HighlightingSettings), With<HighlightingCameraLink>>,
) -> HighlightingSettings {
    cameras
        .iter()
        .find(|(camera, _)| camera.is_active)
        .or_else(|| cameras.iter().next())
        .map(|(_, settings)| *settings)
        .unwrap_or_default()
}

/// Keeps a silhouette copy of each registered highlighter on the highlight layer.
///
/// A copy is visible only while its highlighter is on and the source entity is visible.
/// Runs after transform propagation, so copies take this frame's global transform directly.
pub fn sync_highlight_silhouettes(
    mut commands: Commands,
    registry: Res<HighlightRegistry<Entity>>,
    mut copies: ResMut<HighlightSilhouettes>,
    mut materials: ResMut<Assets<HighlightSilhouetteMaterial>>,
    cameras: Query<(&Camera, &HighlightingSettings), With<HighlightingCameraLink>>,
    sources: Query<(
        &Highlighter,
        &Mesh3d,
        &GlobalTransform,
        Option<&InheritedVisibility>,
    )>,
    mut silhouettes: Query<
        (
            &mut Transform,
            &mut GlobalTransform,
            &mut Visibility,
            &MeshMaterial3d<HighlightSilhouetteMaterial>,
        ),
        (With<HighlightSilhouette>, Without<Highlighter>),
    >,
) {
    copies.0.retain(|source, silhouette| {
        if registry.contains(source) {
            return true;
        }
        commands.entity(*silhouette).despawn();
        false
    });

    let settings = driving_settings(&cameras);

    for &source in registry.iter() {
        let Ok((highlighter, mesh, global_transform, inherited)) = sources.get(source) else {
            continue;
        };

        let drawn = highlighter.is_on() && inherited.map_or(true, |v| v.get());
        let visibility = if drawn {
            Visibility::Visible
        } else {
            Visibility::Hidden
        };
        let material = HighlightSilhouetteMaterial {
            color: highlighter.color,
            shader: if highlighter.transparent {
                SilhouetteShader::Transparent
            } else {
                SilhouetteShader::Opaque
            },
            ..default()
        }
        .with_offsets(&settings);
        let transform = global_transform.compute_transform();

        let existing = copies
            .0
            .get(&source)
            .and_then(|silhouette| silhouettes.get_mut(*silhouette).ok());

        match existing {
            Some((
                mut silhouette_transform,
                mut silhouette_global,
                mut silhouette_visibility,
                handle,
            )) => {
                if *silhouette_transform != transform {
                    *silhouette_transform = transform;
                }
                silhouette_global.set_if_neq(*global_transform);
                silhouette_visibility.set_if_neq(visibility);

                let stale = materials.get(&handle.0).is_some_and(|current| {
                    current.color != material.color
                        || current.shader != material.shader
                        || current.offset_factor != material.offset_factor
                        || current.offset_units != material.offset_units
                });
                if stale {
                    if let Some(current) = materials.get_mut(&handle.0) {
                        *current = material;
                    }
                }
            }
            None => {
                let silhouette = commands
                    .spawn((
                        HighlightSilhouette { source },
                        Mesh3d(mesh.0.clone()),
                        MeshMaterial3d(materials.add(material)),
                        transform,
                        *global_transform,
                        visibility,
                        RenderLayers::layer(HIGHLIGHT_RENDER_LAYER),
                    ))
                    .id();
                copies.0.insert(source, silhouette);
            }
        }
    }
}

/// Mirrors each main camera onto its highlight camera.
///
/// The highlight camera only renders while the main camera does and at least one
/// registered highlighter is on.
pub fn sync_highlighting_cameras(
    registry: Res<HighlightRegistry<Entity>>,
    highlighters: Query<&Highlighter>,
    main_cameras: Query<(
        &Camera,
        &GlobalTransform,
        &Projection,
        &HighlightingSettings,
        &HighlightingCameraLink,
    )>,
    mut highlight_cameras: Query<
        (
            &mut Camera,
            &mut Transform,
            &mut GlobalTransform,
            &mut Projection,
        ),
        (With<HighlightingCamera>, Without<HighlightingCameraLink>),
    >,
) {
    let any_on = registry
        .iter()
        .any(|entity| highlighters.get(*entity).is_ok_and(|h| h.is_on()));

    for (camera, global_transform, projection, settings, link) in main_cameras.iter() {
        let Ok((mut highlight_camera, mut transform, mut highlight_global, mut highlight_projection)) =
            highlight_cameras.get_mut(link.highlight_camera)
        else {
            continue;
        };

        let active = any_on && settings.enabled && camera.is_active;
        if highlight_camera.is_active != active {
            highlight_camera.is_active = active;
        }
        *transform = global_transform.compute_transform();
        *highlight_global = *global_transform;
        *highlight_projection = projection.clone();
    }
}

/// Resizes highlight camera targets when the main target changes size.
pub fn resize_highlight_textures(
    mut images: ResMut<Assets<Image>>,
    cameras: Query<(Option<&RenderTarget>, &HighlightingCameraLink), With<HighlightingSettings>>,
    windows: Query<&Window>,
) {
    for (render_target, link) in cameras.iter() {
        let Some(target_size) = target_size(render_target, &images, &windows) else {
            continue;
        };

        if target_size.x == 0 || target_size.y == 0 {
            continue;
        }

        let current = images.get(&link.highlight_texture).map(|img| img.size());
        if current.is_some_and(|size| size != target_size) {
            if let Some(img) = images.get_mut(&link.highlight_texture) {
                img.resize(Extent3d {
                    width: target_size.x,
                    height: target_size.y,
                    depth_or_array_layers: 1,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_app() -> App {
        let mut app = App::new();
        app.init_resource::<HighlightRegistry<Entity>>()
            .add_systems(Update, track_highlighters);
        app
    }

    fn registered(app: &App) -> Vec<Entity> {
        app.world()
            .resource::<HighlightRegistry<Entity>>()
            .iter()
            .copied()
            .collect()
    }

    #[test]
    fn highlighters_register_in_spawn_order() {
        let mut app = registry_app();
        let a = app.world_mut().spawn(Highlighter::default()).id();
        let b = app.world_mut().spawn(Highlighter::new(LinearRgba::RED)).id();
        app.update();
        assert_eq!(registered(&app), vec![a, b]);

        let c = app.world_mut().spawn(Highlighter::default()).id();
        app.update();
        assert_eq!(registered(&app), vec![a, b, c]);
    }

    #[test]
    fn removal_and_despawn_unregister() {
        let mut app = registry_app();
        let a = app.world_mut().spawn(Highlighter::default()).id();
        let b = app.world_mut().spawn(Highlighter::default()).id();
        let c = app.world_mut().spawn(Highlighter::default()).id();
        app.update();

        app.world_mut().entity_mut(b).remove::<Highlighter>();
        app.world_mut().despawn(c);
        app.update();
        assert_eq!(registered(&app), vec![a]);

        // Re-adding registers again, at the end
        app.world_mut().entity_mut(b).insert(Highlighter::default());
        app.update();
        assert_eq!(registered(&app), vec![a, b]);
    }

    #[test]
    fn switching_off_keeps_registration() {
        let mut app = registry_app();
        let a = app.world_mut().spawn(Highlighter::new(LinearRgba::GREEN)).id();
        app.update();

        app.world_mut()
            .entity_mut(a)
            .get_mut::<Highlighter>()
            .unwrap()
            .off();
        app.update();
        assert_eq!(registered(&app), vec![a]);
    }

    fn silhouette_app() -> App {
        let mut app = App::new();
        app.init_resource::<HighlightRegistry<Entity>>()
            .init_resource::<HighlightSilhouettes>()
            .init_resource::<Assets<HighlightSilhouetteMaterial>>()
            .add_systems(Update, (track_highlighters, sync_highlight_silhouettes).chain());
        app
    }

    fn spawn_source(app: &mut App, highlighter: Highlighter, visible: bool) -> Entity {
        app.world_mut()
            .spawn((
                highlighter,
                Mesh3d(Handle::default()),
                GlobalTransform::from_xyz(1.0, 2.0, 3.0),
                if visible {
                    InheritedVisibility::VISIBLE
                } else {
                    InheritedVisibility::HIDDEN
                },
            ))
            .id()
    }

    fn copy_of(app: &App, source: Entity) -> Entity {
        app.world().resource::<HighlightSilhouettes>().0[&source]
    }

    fn copy_visibility(app: &App, source: Entity) -> Visibility {
        *app.world().get::<Visibility>(copy_of(app, source)).unwrap()
    }

    #[test]
    fn silhouette_copy_shows_only_while_on_and_visible() {
        let mut app = silhouette_app();
        let on = spawn_source(&mut app, Highlighter::new(LinearRgba::RED), true);
        let off = spawn_source(&mut app, Highlighter::default(), true);
        let hidden = spawn_source(&mut app, Highlighter::new(LinearRgba::RED), false);
        app.update();

        assert_eq!(copy_visibility(&app, on), Visibility::Visible);
        assert_eq!(copy_visibility(&app, off), Visibility::Hidden);
        assert_eq!(copy_visibility(&app, hidden), Visibility::Hidden);

        app.world_mut()
            .get_mut::<Highlighter>(on)
            .unwrap()
            .off();
        app.world_mut()
            .get_mut::<Highlighter>(off)
            .unwrap()
            .constant_on(LinearRgba::GREEN);
        app.update();

        assert_eq!(copy_visibility(&app, on), Visibility::Hidden);
        assert_eq!(copy_visibility(&app, off), Visibility::Visible);
    }

    #[test]
    fn silhouette_copy_follows_source_and_goes_with_it() {
        let mut app = silhouette_app();
        let source = spawn_source(&mut app, Highlighter::new(LinearRgba::RED), true);
        app.update();

        let copy = copy_of(&app, source);
        let world = app.world();
        assert_eq!(
            world.get::<GlobalTransform>(copy),
            world.get::<GlobalTransform>(source)
        );
        assert_eq!(
            world.get::<HighlightSilhouette>(copy).map(|s| s.source),
            Some(source)
        );

        app.world_mut().despawn(source);
        app.update();
        app.update();
        assert!(app.world().get_entity(copy).is_err());
        assert!(app.world().resource::<HighlightSilhouettes>().0.is_empty());
    }

    #[test]
    fn silhouette_material_takes_active_camera_offsets() {
        let mut app = silhouette_app();
        let placeholder = app.world_mut().spawn_empty().id();
        let link = HighlightingCameraLink {
            highlight_camera: placeholder,
            highlight_texture: Handle::default(),
        };
        app.world_mut().spawn((
            Camera {
                is_active: false,
                ..default()
            },
            HighlightingSettings {
                offset_units: -9.0,
                ..default()
            },
            link.clone(),
        ));
        app.world_mut().spawn((
            Camera::default(),
            HighlightingSettings {
                offset_factor: -1.0,
                offset_units: -2.0,
                ..default()
            },
            link,
        ));
        let source = spawn_source(&mut app, Highlighter::new(LinearRgba::RED), true);
        app.update();

        let copy = copy_of(&app, source);
        let handle = app
            .world()
            .get::<MeshMaterial3d<HighlightSilhouetteMaterial>>(copy)
            .unwrap()
            .0
            .clone();
        let materials = app.world().resource::<Assets<HighlightSilhouetteMaterial>>();
        let material = materials.get(&handle).unwrap();
        assert_eq!(material.offset_factor, -1.0);
        assert_eq!(material.offset_units, -2.0);
    }

    struct CameraPair {
        main: Entity,
        highlight: Entity,
    }

    fn camera_app(settings: HighlightingSettings, main_active: bool) -> (App, CameraPair) {
        let mut app = App::new();
        app.init_resource::<HighlightRegistry<Entity>>()
            .add_systems(Update, (track_highlighters, sync_highlighting_cameras).chain());

        let highlight = app
            .world_mut()
            .spawn((
                Camera {
                    is_active: false,
                    ..default()
                },
                Transform::default(),
                Projection::default(),
                HighlightingCamera,
            ))
            .id();
        let main = app
            .world_mut()
            .spawn((
                Camera {
                    is_active: main_active,
                    ..default()
                },
                GlobalTransform::from_xyz(0.0, 5.0, 10.0),
                Projection::default(),
                settings,
                HighlightingCameraLink {
                    highlight_camera: highlight,
                    highlight_texture: Handle::default(),
                },
            ))
            .id();
        (app, CameraPair { main, highlight })
    }

    fn highlight_active(app: &App, cameras: &CameraPair) -> bool {
        app.world().get::<Camera>(cameras.highlight).unwrap().is_active
    }

    #[test]
    fn highlight_camera_runs_only_when_something_is_on() {
        let (mut app, cameras) = camera_app(HighlightingSettings::default(), true);
        let cube = app.world_mut().spawn(Highlighter::default()).id();
        app.update();
        assert!(!highlight_active(&app, &cameras));

        app.world_mut()
            .get_mut::<Highlighter>(cube)
            .unwrap()
            .constant_on(LinearRgba::BLUE);
        app.update();
        assert!(highlight_active(&app, &cameras));

        let world = app.world();
        assert_eq!(
            world.get::<GlobalTransform>(cameras.highlight),
            world.get::<GlobalTransform>(cameras.main)
        );
    }

    #[test]
    fn highlight_camera_stays_off_for_disabled_settings() {
        let settings = HighlightingSettings {
            enabled: false,
            ..default()
        };
        let (mut app, cameras) = camera_app(settings, true);
        app.world_mut().spawn(Highlighter::new(LinearRgba::RED));
        app.update();
        assert!(!highlight_active(&app, &cameras));
    }

    #[test]
    fn highlight_camera_stays_off_for_inactive_main_camera() {
        let (mut app, cameras) = camera_app(HighlightingSettings::default(), false);
        app.world_mut().spawn(Highlighter::new(LinearRgba::RED));
        app.update();
        assert!(!highlight_active(&app, &cameras));
    }
}
