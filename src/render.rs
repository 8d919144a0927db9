//! Render-world side: extraction, GPU pipelines, the wgpu backend and the render node.

use std::sync::{Arc, Mutex, PoisonError};

use bevy::{
    core_pipeline::{
        core_3d::graph::{Core3d, Node3d},
        prepass::DeferredPrepass,
    },
    ecs::entity::EntityHashMap,
    log::{debug, warn_once},
    prelude::*,
    render::{
        extract_component::ExtractComponentPlugin,
        render_asset::RenderAssets,
        render_graph::{
            NodeRunError, RenderGraphContext, RenderGraphExt, RenderLabel, ViewNode, ViewNodeRunner,
        },
        render_resource::{
            binding_types::{sampler as sampler_layout, texture_2d, uniform_buffer},
            BindGroup, BindGroupEntries, BindGroupLayout, BindGroupLayoutDescriptor,
            BindGroupLayoutEntries, BlendState, BufferInitDescriptor, BufferUsages,
            CachedPipelineState, CachedRenderPipelineId, ColorTargetState, ColorWrites,
            CompareFunction, DepthBiasState, DepthStencilState, Extent3d, FilterMode,
            FragmentState, LoadOp, MultisampleState, Operations, PipelineCache, PrimitiveState,
            RenderPassColorAttachment, RenderPassDepthStencilAttachment, RenderPassDescriptor,
            RenderPipelineDescriptor, Sampler, SamplerBindingType, SamplerDescriptor,
            ShaderStages, ShaderType, StencilFaceState, StencilOperation, StencilState, StoreOp,
            Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureSampleType,
            TextureUsages, TextureView, TextureViewDescriptor, VertexState,
        },
        renderer::{RenderAdapter, RenderContext, RenderDevice},
        sync_world::RenderEntity,
        texture::GpuImage,
        view::{ViewDepthTexture, ViewTarget},
        Extract, RenderApp,
    },
};

use crate::{
    backend::{
        CameraParams, ClearPass, FrameBuffer, HighlightCamera, HostFrame, RenderBackend,
        RenderParams, RenderingPath, TargetDescriptor,
    },
    capability::PlatformCapabilities,
    components::{Highlighter, HighlightingSettings},
    materials::{HighlightPass, PassMaterials},
    pipeline::HighlightPipeline,
    registry::{ActiveDriver, HighlightRegistry, Highlightable},
    systems::HighlightingCameraLink,
};

/// Color format of highlight and blur targets.
pub const HIGHLIGHT_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Depth-stencil format of highlight targets that carry their own depth.
pub const HIGHLIGHT_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24PlusStencil8;

/// Stencil value marking highlighted pixels.
const SILHOUETTE_STENCIL: u32 = 1;

/// Per-camera data extracted from the main world.
#[derive(Component, Clone)]
pub struct ExtractedHighlighting {
    pub highlight_texture: Handle<Image>,
    pub camera: CameraParams,
    pub is_active: bool,
    pub rendering_path: RenderingPath,
}

/// A registered highlighter as seen by the render world.
#[derive(Clone, Debug)]
pub struct ExtractedHighlighter {
    pub entity: Entity,
    pub drawable: bool,
    pub drawing: bool,
}

impl PartialEq for ExtractedHighlighter {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
    }
}

impl Highlightable for ExtractedHighlighter {
    /// Drawn only on behalf of the driver holding the marker.
    fn enter_highlight_state(&mut self, active: &ActiveDriver) -> bool {
        self.drawing = self.drawable && active.current().is_some();
        self.drawing
    }

    fn exit_highlight_state(&mut self) {
        self.drawing = false;
    }
}

/// This frame's highlighters, in registration order.
#[derive(Resource, Default)]
pub struct ExtractedHighlighters(pub HighlightRegistry<ExtractedHighlighter>);

/// One highlighting driver per view, kept across frames.
#[derive(Resource)]
pub struct HighlightDrivers {
    drivers: Mutex<EntityHashMap<HighlightPipeline<GpuTarget>>>,
    active: ActiveDriver,
    materials: Arc<PassMaterials>,
}

impl Default for HighlightDrivers {
    fn default() -> Self {
        Self {
            drivers: Mutex::new(EntityHashMap::default()),
            active: ActiveDriver::new(),
            materials: PassMaterials::initialize(),
        }
    }
}

/// A highlighter is drawn while it is on and its entity is visible.
fn highlighter_drawable(highlighter: Option<(&Highlighter, Option<&InheritedVisibility>)>) -> bool {
    highlighter.is_some_and(|(highlighter, visibility)| {
        highlighter.is_on() && visibility.map_or(true, |v| v.get())
    })
}

/// Stop and drop the drivers of views that are gone. GPU targets are freed on drop.
fn prune_drivers<T>(drivers: &mut EntityHashMap<HighlightPipeline<T>>, live: &[Entity]) {
    drivers.retain(|view, driver| {
        if live.contains(view) {
            return true;
        }
        debug!("Highlighting: stopping driver {}", driver.id().get());
        drop(driver.stop());
        false
    });
}

/// Extract highlighting cameras and the highlighter registry to the render world.
pub fn extract_highlighting(
    mut commands: Commands,
    cameras: Extract<
        Query<(
            &RenderEntity,
            &Camera,
            &GlobalTransform,
            &HighlightingCameraLink,
            Has<DeferredPrepass>,
        )>,
    >,
    registry: Extract<Res<HighlightRegistry<Entity>>>,
    highlighters: Extract<Query<(&Highlighter, Option<&InheritedVisibility>)>>,
    mut extracted: ResMut<ExtractedHighlighters>,
    mut drivers: ResMut<HighlightDrivers>,
) {
    extracted.0.clear();
    for &entity in registry.iter() {
        let drawable = highlighter_drawable(highlighters.get(entity).ok());
        extracted.0.register(ExtractedHighlighter {
            entity,
            drawable,
            drawing: false,
        });
    }

    let mut live = Vec::new();
    for (render_entity, camera, global_transform, link, deferred) in cameras.iter() {
        let clip_from_view = camera.clip_from_view();
        commands.entity(render_entity.id()).insert(ExtractedHighlighting {
            highlight_texture: link.highlight_texture.clone(),
            camera: CameraParams {
                world_from_view: global_transform.to_matrix(),
                clip_from_view,
            },
            is_active: camera.is_active,
            rendering_path: if deferred {
                RenderingPath::Deferred
            } else {
                RenderingPath::Forward
            },
        });
        live.push(render_entity.id());
    }

    let drivers = drivers
        .drivers
        .get_mut()
        .unwrap_or_else(PoisonError::into_inner);
    prune_drivers(drivers, &live);
}

/// GPU uniform for the blur pass.
#[derive(Clone, Copy, Default, ShaderType, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct BlurUniform {
    pub offset_scale: f32,
    pub intensity: f32,
    pub texel_width: f32,
    pub texel_height: f32,
}

/// Render pipelines of the five highlighting passes.
#[derive(Resource)]
pub struct HighlightingPipelines {
    pub texture_layout: BindGroupLayout,
    pub blur_layout: BindGroupLayout,
    pub sampler: Sampler,

    pub clear_color: CachedRenderPipelineId,
    pub clear_all: CachedRenderPipelineId,
    /// Resolves the highlight camera output into a highlight buffer, marking the stencil.
    pub layer: CachedRenderPipelineId,
    pub blit: CachedRenderPipelineId,
    pub blit_view: CachedRenderPipelineId,
    pub blit_view_hdr: CachedRenderPipelineId,
    pub blur: CachedRenderPipelineId,
    pub cut_glow: CachedRenderPipelineId,
    pub cut_inner: CachedRenderPipelineId,
    pub composite: CachedRenderPipelineId,
    pub composite_hdr: CachedRenderPipelineId,

    /// What the adapter supports, apart from shader compilation.
    pub platform: PlatformCapabilities,
}

/// Whether the pass pipelines finished compiling.
#[derive(Debug, PartialEq, Eq)]
pub enum PipelineReadiness {
    Pending,
    Ready,
}

fn stencil_state(compare: CompareFunction, pass_op: StencilOperation, write_mask: u32) -> StencilState {
    let face = StencilFaceState {
        compare,
        fail_op: StencilOperation::Keep,
        depth_fail_op: StencilOperation::Keep,
        pass_op,
    };
    StencilState {
        front: face,
        back: face,
        read_mask: 0xff,
        write_mask,
    }
}

fn depth_stencil_state(depth_write: bool, stencil: StencilState) -> DepthStencilState {
    DepthStencilState {
        format: HIGHLIGHT_DEPTH_FORMAT,
        depth_write_enabled: depth_write,
        depth_compare: CompareFunction::Always,
        stencil,
        bias: DepthBiasState::default(),
    }
}

impl FromWorld for HighlightingPipelines {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>();
        let render_adapter = world.resource::<RenderAdapter>();
        let asset_server = world.resource::<AssetServer>();
        let pipeline_cache = world.resource::<PipelineCache>();

        let sampler = render_device.create_sampler(&SamplerDescriptor {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..default()
        });

        let vertex_shader = asset_server
            .load("embedded://bevy_core_pipeline/fullscreen_vertex_shader/fullscreen.wgsl");
        let materials = PassMaterials::initialize();
        let clear_shader = asset_server.load(materials.pass(HighlightPass::Clear).shader);
        let blit_shader = asset_server.load(materials.pass(HighlightPass::Blit).shader);
        let blur_shader = asset_server.load(materials.pass(HighlightPass::Blur).shader);
        let cut_shader = asset_server.load(materials.pass(HighlightPass::Cut).shader);
        let composite_shader = asset_server.load(materials.pass(HighlightPass::Composite).shader);

        let texture_layout_entries = BindGroupLayoutEntries::sequential(
            ShaderStages::FRAGMENT,
            (
                texture_2d(TextureSampleType::Float { filterable: true }),
                sampler_layout(SamplerBindingType::Filtering),
            ),
        );
        let texture_layout = render_device.create_bind_group_layout(
            Some("highlighting_texture_bind_group_layout"),
            &texture_layout_entries,
        );
        let texture_layout_desc = BindGroupLayoutDescriptor::new(
            "highlighting_texture_bind_group_layout",
            &texture_layout_entries,
        );

        let blur_layout_entries = BindGroupLayoutEntries::sequential(
            ShaderStages::FRAGMENT,
            (
                texture_2d(TextureSampleType::Float { filterable: true }),
                sampler_layout(SamplerBindingType::Filtering),
                uniform_buffer::<BlurUniform>(false),
            ),
        );
        let blur_layout = render_device.create_bind_group_layout(
            Some("highlighting_blur_bind_group_layout"),
            &blur_layout_entries,
        );
        let blur_layout_desc = BindGroupLayoutDescriptor::new(
            "highlighting_blur_bind_group_layout",
            &blur_layout_entries,
        );

        let queue = |label: &'static str,
                     shader: &Handle<Shader>,
                     entry_point: &'static str,
                     layout: Vec<BindGroupLayoutDescriptor>,
                     format: TextureFormat,
                     blend: Option<BlendState>,
                     depth_stencil: Option<DepthStencilState>| {
            pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
                label: Some(label.into()),
                layout,
                vertex: VertexState {
                    shader: vertex_shader.clone(),
                    shader_defs: vec![],
                    entry_point: Some("fullscreen_vertex_shader".into()),
                    buffers: vec![],
                },
                fragment: Some(FragmentState {
                    shader: shader.clone(),
                    shader_defs: vec![],
                    entry_point: Some(entry_point.into()),
                    targets: vec![Some(ColorTargetState {
                        format,
                        blend,
                        write_mask: ColorWrites::ALL,
                    })],
                }),
                primitive: PrimitiveState::default(),
                depth_stencil,
                multisample: MultisampleState::default(),
                push_constant_ranges: vec![],
                zero_initialize_workgroup_memory: false,
            })
        };

        let texture = || vec![texture_layout_desc.clone()];
        let sdr = TextureFormat::bevy_default();
        let hdr = ViewTarget::TEXTURE_FORMAT_HDR;

        let clear_color = queue(
            "highlighting_clear_color_pipeline",
            &clear_shader,
            "fragment",
            vec![],
            HIGHLIGHT_FORMAT,
            None,
            None,
        );
        let clear_all = queue(
            "highlighting_clear_all_pipeline",
            &clear_shader,
            "fragment",
            vec![],
            HIGHLIGHT_FORMAT,
            None,
            Some(depth_stencil_state(
                true,
                stencil_state(CompareFunction::Always, StencilOperation::Zero, 0xff),
            )),
        );
        let layer = queue(
            "highlighting_layer_pipeline",
            &blit_shader,
            "fragment_mask",
            texture(),
            HIGHLIGHT_FORMAT,
            None,
            Some(depth_stencil_state(
                false,
                stencil_state(CompareFunction::Always, StencilOperation::Replace, 0xff),
            )),
        );
        let blit = queue(
            "highlighting_blit_pipeline",
            &blit_shader,
            "fragment",
            texture(),
            HIGHLIGHT_FORMAT,
            None,
            None,
        );
        let blit_view = queue(
            "highlighting_blit_view_pipeline",
            &blit_shader,
            "fragment",
            texture(),
            sdr,
            None,
            None,
        );
        let blit_view_hdr = queue(
            "highlighting_blit_view_hdr_pipeline",
            &blit_shader,
            "fragment",
            texture(),
            hdr,
            None,
            None,
        );
        let blur = queue(
            "highlighting_blur_pipeline",
            &blur_shader,
            "fragment",
            vec![blur_layout_desc],
            HIGHLIGHT_FORMAT,
            None,
            None,
        );
        let cut_glow = queue(
            "highlighting_cut_glow_pipeline",
            &cut_shader,
            "fragment_glow",
            texture(),
            HIGHLIGHT_FORMAT,
            None,
            Some(depth_stencil_state(
                false,
                stencil_state(CompareFunction::NotEqual, StencilOperation::Keep, 0),
            )),
        );
        let cut_inner = queue(
            "highlighting_cut_inner_pipeline",
            &cut_shader,
            "fragment_inner",
            texture(),
            HIGHLIGHT_FORMAT,
            None,
            Some(depth_stencil_state(
                false,
                stencil_state(CompareFunction::Equal, StencilOperation::Keep, 0),
            )),
        );
        let composite = queue(
            "highlighting_composite_pipeline",
            &composite_shader,
            "fragment",
            texture(),
            sdr,
            Some(BlendState::ALPHA_BLENDING),
            None,
        );
        let composite_hdr = queue(
            "highlighting_composite_hdr_pipeline",
            &composite_shader,
            "fragment",
            texture(),
            hdr,
            Some(BlendState::ALPHA_BLENDING),
            None,
        );

        let usable = |format: TextureFormat, usages: TextureUsages| {
            render_adapter
                .get_texture_format_features(format)
                .allowed_usages
                .contains(usages)
        };
        let platform = PlatformCapabilities {
            offscreen_effects: usable(HIGHLIGHT_FORMAT, TextureUsages::TEXTURE_BINDING),
            render_targets: usable(HIGHLIGHT_DEPTH_FORMAT, TextureUsages::RENDER_ATTACHMENT),
            rgba32_render_target: usable(HIGHLIGHT_FORMAT, TextureUsages::RENDER_ATTACHMENT),
            ..default()
        };

        Self {
            texture_layout,
            blur_layout,
            sampler,
            clear_color,
            clear_all,
            layer,
            blit,
            blit_view,
            blit_view_hdr,
            blur,
            cut_glow,
            cut_inner,
            composite,
            composite_hdr,
            platform,
        }
    }
}

impl HighlightingPipelines {
    fn by_pass(&self) -> [(HighlightPass, CachedRenderPipelineId); 11] {
        [
            (HighlightPass::Clear, self.clear_color),
            (HighlightPass::Clear, self.clear_all),
            (HighlightPass::Blit, self.layer),
            (HighlightPass::Blit, self.blit),
            (HighlightPass::Blit, self.blit_view),
            (HighlightPass::Blit, self.blit_view_hdr),
            (HighlightPass::Blur, self.blur),
            (HighlightPass::Cut, self.cut_glow),
            (HighlightPass::Cut, self.cut_inner),
            (HighlightPass::Composite, self.composite),
            (HighlightPass::Composite, self.composite_hdr),
        ]
    }

    /// Pipelines still compiling keep the effect off; failed ones are reported as
    /// unsupported shaders once everything settled.
    pub fn readiness(&self, pipeline_cache: &PipelineCache) -> PipelineReadiness {
        let pending = self.by_pass().iter().any(|(_, id)| {
            matches!(
                pipeline_cache.get_render_pipeline_state(*id),
                CachedPipelineState::Queued | CachedPipelineState::Creating(_)
            )
        });
        if pending {
            PipelineReadiness::Pending
        } else {
            PipelineReadiness::Ready
        }
    }

    /// Platform capabilities with every pass whose pipeline failed marked unsupported.
    ///
    /// Silhouette shaders are never marked here. They are specialized per mesh by Bevy's
    /// material pipeline, which reports its own failures and simply skips the draw, so on
    /// this host the silhouette checks of [`crate::capability::check_supported`] always
    /// pass.
    pub fn capabilities(&self, pipeline_cache: &PipelineCache) -> PlatformCapabilities {
        let mut caps = self.platform.clone();
        for (pass, id) in self.by_pass() {
            if let CachedPipelineState::Err(err) = pipeline_cache.get_render_pipeline_state(id) {
                warn!("Highlighting: {} failed to compile: {err}", pass.name());
                caps.unsupported_shaders.insert(pass.name().to_string());
            }
        }
        caps
    }

    fn blit_for(&self, format: TextureFormat) -> CachedRenderPipelineId {
        if format == HIGHLIGHT_FORMAT {
            self.blit
        } else if format == ViewTarget::TEXTURE_FORMAT_HDR {
            self.blit_view_hdr
        } else {
            self.blit_view
        }
    }

    fn composite_for(&self, format: TextureFormat) -> CachedRenderPipelineId {
        if format == ViewTarget::TEXTURE_FORMAT_HDR {
            self.composite_hdr
        } else {
            self.composite
        }
    }

    /// Whether everything needed to composite onto a `format` view target is compiled.
    pub fn can_composite(&self, pipeline_cache: &PipelineCache, format: TextureFormat) -> bool {
        [self.blit_for(format), self.composite_for(format)]
            .into_iter()
            .all(|id| pipeline_cache.get_render_pipeline(id).is_some())
    }
}

/// What happens to the view target once the highlight buffer is rendered.
#[derive(Debug, PartialEq, Eq)]
enum ViewOutput {
    /// Left as is, which is how a view passes through unchanged.
    Untouched,
    /// Swapped and rewritten with the glow on top.
    Composite,
}

fn view_output(has_highlight_buffer: bool, can_composite: bool) -> ViewOutput {
    if has_highlight_buffer && can_composite {
        ViewOutput::Composite
    } else {
        ViewOutput::Untouched
    }
}

/// A color target with an optional depth-stencil attachment.
#[derive(Clone)]
pub struct GpuTarget {
    /// Owned textures; empty for views borrowed from the host.
    textures: Vec<Texture>,
    pub view: TextureView,
    pub depth_stencil: Option<TextureView>,
    pub format: TextureFormat,
    pub size: UVec2,
}

impl GpuTarget {
    /// Wrap a view owned by someone else.
    pub fn borrowed(
        view: TextureView,
        depth_stencil: Option<TextureView>,
        format: TextureFormat,
        size: UVec2,
    ) -> Self {
        Self {
            textures: Vec::new(),
            view,
            depth_stencil,
            format,
            size,
        }
    }

    fn texel_size(&self) -> (f32, f32) {
        (1.0 / self.size.x.max(1) as f32, 1.0 / self.size.y.max(1) as f32)
    }
}

/// Usable depth bits of a view depth format.
///
/// Only the format the stencil pipelines are built for can be shared; anything else
/// reports zero.
fn stencil_depth_bits(format: TextureFormat) -> u32 {
    if format == HIGHLIGHT_DEPTH_FORMAT {
        24
    } else {
        0
    }
}

/// [`RenderBackend`] on top of Bevy's wgpu render context.
pub struct GpuBackend<'a, 'w> {
    render_context: &'a mut RenderContext<'w>,
    pipelines: &'a HighlightingPipelines,
    pipeline_cache: &'a PipelineCache,
    /// Output of the highlight camera for this view.
    layer_source: Option<&'a TextureView>,
}

impl<'a, 'w> GpuBackend<'a, 'w> {
    pub fn new(
        render_context: &'a mut RenderContext<'w>,
        pipelines: &'a HighlightingPipelines,
        pipeline_cache: &'a PipelineCache,
        layer_source: Option<&'a TextureView>,
    ) -> Self {
        Self {
            render_context,
            pipelines,
            pipeline_cache,
            layer_source,
        }
    }

    fn texture_bind_group(&self, label: &'static str, view: &TextureView) -> BindGroup {
        self.render_context.render_device().create_bind_group(
            label,
            &self.pipelines.texture_layout,
            &BindGroupEntries::sequential((view, &self.pipelines.sampler)),
        )
    }

    /// Draw full-screen triangles into `target`, one per `(pipeline, bind group)`.
    fn draw(
        &mut self,
        label: &'static str,
        target: &GpuTarget,
        depth_stencil: Option<&TextureView>,
        stencil_reference: u32,
        draws: &[(CachedRenderPipelineId, Option<&BindGroup>)],
    ) {
        let mut pipelines = Vec::with_capacity(draws.len());
        for (id, bind_group) in draws {
            let Some(pipeline) = self.pipeline_cache.get_render_pipeline(*id) else {
                return;
            };
            pipelines.push((pipeline, *bind_group));
        }

        let mut render_pass = self
            .render_context
            .begin_tracked_render_pass(RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: Operations::default(),
                    depth_slice: None,
                })],
                depth_stencil_attachment: depth_stencil.map(|view| {
                    RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(Operations {
                            load: LoadOp::Load,
                            store: StoreOp::Store,
                        }),
                        stencil_ops: Some(Operations {
                            load: LoadOp::Load,
                            store: StoreOp::Store,
                        }),
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

        if depth_stencil.is_some() {
            render_pass.set_stencil_reference(stencil_reference);
        }
        for (pipeline, bind_group) in pipelines {
            render_pass.set_render_pipeline(pipeline);
            if let Some(bind_group) = bind_group {
                render_pass.set_bind_group(0, bind_group, &[]);
            }
            render_pass.draw(0..3, 0..1);
        }
    }
}

impl RenderBackend for GpuBackend<'_, '_> {
    type Target = GpuTarget;

    fn acquire_target(&mut self, desc: &TargetDescriptor) -> GpuTarget {
        let device = self.render_context.render_device();
        let size = Extent3d {
            width: desc.width.max(1),
            height: desc.height.max(1),
            depth_or_array_layers: 1,
        };

        // The highlight camera output is already resolved, so these never multisample.
        let color = device.create_texture(&TextureDescriptor {
            label: Some("highlighting_color_texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: HIGHLIGHT_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = color.create_view(&TextureViewDescriptor::default());
        let mut textures = vec![color];

        let depth_stencil = (desc.depth_bits > 0).then(|| {
            let depth = device.create_texture(&TextureDescriptor {
                label: Some("highlighting_depth_stencil_texture"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: HIGHLIGHT_DEPTH_FORMAT,
                usage: TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            let view = depth.create_view(&TextureViewDescriptor::default());
            textures.push(depth);
            view
        });

        GpuTarget {
            textures,
            view,
            depth_stencil,
            format: HIGHLIGHT_FORMAT,
            size: UVec2::new(size.width, size.height),
        }
    }

    fn release_target(&mut self, target: GpuTarget) {
        drop(target);
    }

    fn discard_contents(&mut self, _target: &GpuTarget) {
        // Every pass overwrites its whole target, nothing to do
    }

    fn clear(&mut self, target: &GpuTarget, pass: ClearPass, _params: &RenderParams) {
        match pass {
            ClearPass::Color => {
                self.draw(
                    "highlighting_clear_color_pass",
                    target,
                    None,
                    0,
                    &[(self.pipelines.clear_color, None)],
                );
            }
            ClearPass::All => {
                let Some(depth_stencil) = target.depth_stencil.as_ref() else {
                    warn_once!("Highlighting: asked to clear depth of a target without one");
                    return;
                };
                self.draw(
                    "highlighting_clear_all_pass",
                    target,
                    Some(depth_stencil),
                    0,
                    &[(self.pipelines.clear_all, None)],
                );
            }
            ClearPass::Stencil => {
                // Stencil-only clear needs no color attachment or draw
                let Some(depth_stencil) = target.depth_stencil.as_ref() else {
                    return;
                };
                let _render_pass =
                    self.render_context
                        .begin_tracked_render_pass(RenderPassDescriptor {
                            label: Some("highlighting_clear_stencil_pass"),
                            color_attachments: &[],
                            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                                view: depth_stencil,
                                depth_ops: Some(Operations {
                                    load: LoadOp::Load,
                                    store: StoreOp::Store,
                                }),
                                stencil_ops: Some(Operations {
                                    load: LoadOp::Clear(0),
                                    store: StoreOp::Store,
                                }),
                            }),
                            timestamp_writes: None,
                            occlusion_query_set: None,
                        });
            }
        }
    }

    fn render_highlight_layer(
        &mut self,
        _camera: &HighlightCamera,
        color: &GpuTarget,
        depth_stencil: &GpuTarget,
        _params: &RenderParams,
    ) {
        // The highlight camera itself was rendered earlier this frame by the camera driver;
        // here its output is copied in and marked in the stencil. Depth offsets were
        // applied there, by the silhouette material's depth bias.
        let Some(source) = self.layer_source else {
            return;
        };
        let Some(depth_view) = depth_stencil.depth_stencil.as_ref() else {
            warn_once!("Highlighting: highlight layer has no stencil to mark");
            return;
        };
        let bind_group = self.texture_bind_group("highlighting_layer_bind_group", source);
        self.draw(
            "highlighting_layer_pass",
            color,
            Some(depth_view),
            SILHOUETTE_STENCIL,
            &[(self.pipelines.layer, Some(&bind_group))],
        );
    }

    fn blit(
        &mut self,
        src: &GpuTarget,
        dst: &GpuTarget,
        pass: HighlightPass,
        params: &RenderParams,
    ) {
        if pass != HighlightPass::Blur {
            let bind_group = self.texture_bind_group("highlighting_blit_bind_group", &src.view);
            self.draw(
                "highlighting_blit_pass",
                dst,
                None,
                0,
                &[(self.pipelines.blit_for(dst.format), Some(&bind_group))],
            );
            return;
        }

        let (texel_width, texel_height) = src.texel_size();
        let uniform = BlurUniform {
            offset_scale: params.blur_offset_scale,
            intensity: params.blur_intensity,
            texel_width,
            texel_height,
        };
        let device = self.render_context.render_device();
        let buffer = device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("highlighting_blur_uniform_buffer"),
            contents: bytemuck::bytes_of(&uniform),
            usage: BufferUsages::UNIFORM,
        });
        let bind_group = device.create_bind_group(
            "highlighting_blur_bind_group",
            &self.pipelines.blur_layout,
            &BindGroupEntries::sequential((
                &src.view,
                &self.pipelines.sampler,
                buffer.as_entire_binding(),
            )),
        );
        self.draw(
            "highlighting_blur_pass",
            dst,
            None,
            0,
            &[(self.pipelines.blur, Some(&bind_group))],
        );
    }

    fn cut(
        &mut self,
        blurred: &GpuTarget,
        color: &GpuTarget,
        depth_stencil: &GpuTarget,
        _params: &RenderParams,
    ) {
        let Some(depth_view) = depth_stencil.depth_stencil.as_ref() else {
            warn_once!("Highlighting: no stencil to cut the glow with");
            return;
        };
        let bind_group = self.texture_bind_group("highlighting_cut_bind_group", &blurred.view);
        self.draw(
            "highlighting_cut_pass",
            color,
            Some(depth_view),
            SILHOUETTE_STENCIL,
            &[
                (self.pipelines.cut_glow, Some(&bind_group)),
                (self.pipelines.cut_inner, Some(&bind_group)),
            ],
        );
    }

    fn composite(
        &mut self,
        src: &GpuTarget,
        highlight: &GpuTarget,
        dst: &GpuTarget,
        _params: &RenderParams,
    ) {
        let source = self.texture_bind_group("highlighting_source_bind_group", &src.view);
        let glow = self.texture_bind_group("highlighting_composite_bind_group", &highlight.view);
        self.draw(
            "highlighting_composite_pass",
            dst,
            None,
            0,
            &[
                (self.pipelines.blit_for(dst.format), Some(&source)),
                (self.pipelines.composite_for(dst.format), Some(&glow)),
            ],
        );
    }
}

/// Render label for the highlighting node
#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct HighlightingNodeLabel;

/// Renders the highlight buffer for a view and composites it over the view target.
#[derive(Default)]
pub struct HighlightingNode;

impl ViewNode for HighlightingNode {
    type ViewQuery = (
        &'static ViewTarget,
        &'static HighlightingSettings,
        &'static ExtractedHighlighting,
        Option<&'static ViewDepthTexture>,
        Option<&'static Msaa>,
    );

    fn run<'w>(
        &self,
        graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (view_target, settings, extracted, view_depth, msaa): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let pipelines = world.resource::<HighlightingPipelines>();
        let pipeline_cache = world.resource::<PipelineCache>();
        let gpu_images = world.resource::<RenderAssets<GpuImage>>();
        let drivers = world.resource::<HighlightDrivers>();

        if pipelines.readiness(pipeline_cache) == PipelineReadiness::Pending {
            return Ok(());
        }

        let mut registry = world.resource::<ExtractedHighlighters>().0.clone();

        let mut driver_map = drivers
            .drivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let driver = driver_map.entry(graph.view_entity()).or_insert_with(|| {
            HighlightPipeline::new(*settings, drivers.materials.clone(), drivers.active.clone())
        });
        if !driver.is_started() {
            // Failure is logged by the driver, which then passes frames through
            let _ = driver.start(&pipelines.capabilities(pipeline_cache));
        }
        driver.apply_settings(settings);
        driver.set_owner_active(extracted.is_active);

        let format = view_target.main_texture_format();
        let main_size = view_target.main_texture().size();
        let size = UVec2::new(main_size.width, main_size.height);

        let depth_bits = view_depth.map_or(0, |depth| stencil_depth_bits(depth.texture.format()));
        let frame_target = GpuTarget::borrowed(
            view_target.main_texture_view().clone(),
            view_depth
                .filter(|_| depth_bits > 0)
                .map(|depth| depth.view().clone()),
            format,
            size,
        );

        let layer_source = gpu_images
            .get(&extracted.highlight_texture)
            .map(|image| &image.texture_view);
        let mut backend = GpuBackend::new(render_context, pipelines, pipeline_cache, layer_source);

        let frame = HostFrame {
            frame_buffer: Some(FrameBuffer {
                target: &frame_target,
                width: size.x,
                height: size.y,
                depth_bits,
            }),
            antialiasing: msaa.map_or(1, |msaa| msaa.samples()),
            rendering_path: extracted.rendering_path,
            screen_width: size.x,
            screen_height: size.y,
            clear_stencil_after_lighting: false,
            camera: extracted.camera,
        };
        driver.render_highlighting(&mut backend, &mut registry, &frame);

        // A buffer that can't be composited is released by the next frame's render
        let output = view_output(
            driver.has_highlight_buffer(),
            pipelines.can_composite(pipeline_cache, format),
        );
        if output == ViewOutput::Untouched {
            return Ok(());
        }

        let post_process = view_target.post_process_write();
        let src = GpuTarget::borrowed(post_process.source.clone(), None, format, size);
        let dst = GpuTarget::borrowed(post_process.destination.clone(), None, format, size);
        driver.blit_highlighting(&mut backend, &src, &dst);

        Ok(())
    }
}

/// Plugin that sets up extraction and the highlighting render node
pub struct HighlightingRenderPlugin;

impl Plugin for HighlightingRenderPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(ExtractComponentPlugin::<HighlightingSettings>::default());

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app
            .init_resource::<ExtractedHighlighters>()
            .init_resource::<HighlightDrivers>()
            .add_systems(ExtractSchedule, extract_highlighting)
            .add_render_graph_node::<ViewNodeRunner<HighlightingNode>>(Core3d, HighlightingNodeLabel)
            .add_render_graph_edges(
                Core3d,
                (
                    Node3d::Tonemapping,
                    HighlightingNodeLabel,
                    Node3d::EndMainPassPostProcessing,
                ),
            );
    }

    fn finish(&self, app: &mut App) {
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app.init_resource::<HighlightingPipelines>();
    }
}
