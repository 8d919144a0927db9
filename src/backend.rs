//! The draw call layer the highlighting pipeline renders through.
//!
//! [`crate::pipeline::HighlightPipeline`] only decides *what* to draw and in which order.
//! A [`RenderBackend`] owns the actual targets and executes each pass. Every call receives
//! the frame's [`RenderParams`] explicitly; there is no shared shader state between calls.

use bevy::math::Mat4;

use crate::materials::HighlightPass;

/// Render layer reserved for highlight silhouettes.
pub const HIGHLIGHT_RENDER_LAYER: usize = 30;

/// Depth precision the main frame buffer needs for its depth-stencil to be reused.
pub const MIN_REUSABLE_DEPTH_BITS: u32 = 24;

/// Depth bits of a highlight buffer that carries its own depth-stencil.
pub const HIGHLIGHT_DEPTH_BITS: u32 = 24;

/// Shape of a temporary RGBA32 render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetDescriptor {
    pub width: u32,
    pub height: u32,
    /// Bits of depth. Non-zero depth always comes with 8 stencil bits.
    pub depth_bits: u32,
    /// MSAA sample count.
    pub samples: u32,
}

impl TargetDescriptor {
    pub fn color(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth_bits: 0,
            samples: 1,
        }
    }
}

/// Variants of the clear pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClearPass {
    /// Color only.
    Color = 0,
    /// Stencil bits of the depth-stencil only.
    Stencil = 1,
    /// Color, depth and stencil.
    All = 2,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RenderingPath {
    #[default]
    Forward,
    /// Lighting is resolved in a later pass. Such cameras never multisample.
    Deferred,
}

/// What the camera drawing highlights should clear before drawing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CameraClear {
    Nothing,
    Color([f32; 4]),
}

/// View and projection of a camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraParams {
    pub world_from_view: Mat4,
    pub clip_from_view: Mat4,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            world_from_view: Mat4::IDENTITY,
            clip_from_view: Mat4::IDENTITY,
        }
    }
}

/// Configuration of the auxiliary camera that draws the highlight layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HighlightCamera {
    pub view: CameraParams,
    pub render_layer: usize,
    pub rendering_path: RenderingPath,
    pub hdr: bool,
    pub occlusion_culling: bool,
    pub background: [f32; 4],
    pub clear: CameraClear,
}

impl HighlightCamera {
    /// The highlight camera for a main camera with the given view.
    pub fn cloned_from(view: CameraParams) -> Self {
        Self {
            view,
            render_layer: HIGHLIGHT_RENDER_LAYER,
            rendering_path: RenderingPath::Forward,
            hdr: false,
            occlusion_culling: false,
            background: [0.0; 4],
            clear: CameraClear::Nothing,
        }
    }
}

/// Uniforms shared by every draw of one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderParams {
    pub offset_factor: f32,
    pub offset_units: f32,
    /// Silhouette draws write their own depth.
    pub zwrite: bool,
    pub blur_intensity: f32,
    pub blur_offset_scale: f32,
}

/// The application's already rendered frame.
#[derive(Debug)]
pub struct FrameBuffer<'a, T> {
    pub target: &'a T,
    pub width: u32,
    pub height: u32,
    /// Usable depth precision. Zero when the depth has no stencil to write into.
    pub depth_bits: u32,
}

/// Host state for one frame.
#[derive(Debug)]
pub struct HostFrame<'a, T> {
    pub frame_buffer: Option<FrameBuffer<'a, T>>,
    /// Host MSAA setting, where 0 means off.
    pub antialiasing: u32,
    pub rendering_path: RenderingPath,
    pub screen_width: u32,
    pub screen_height: u32,
    /// The host already leaves a clean stencil after its lighting pass.
    pub clear_stencil_after_lighting: bool,
    pub camera: CameraParams,
}

// Manual impls: only the reference to `T` is copied, so `T` itself need not be `Copy`.
impl<T> Clone for FrameBuffer<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FrameBuffer<'_, T> {}

impl<T> Clone for HostFrame<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for HostFrame<'_, T> {}

/// Executes highlighting passes on some graphics API.
pub trait RenderBackend {
    /// Handle to a render target.
    type Target;

    /// Get a temporary RGBA32 target.
    fn acquire_target(&mut self, desc: &TargetDescriptor) -> Self::Target;

    /// Give back a target from [`RenderBackend::acquire_target`].
    fn release_target(&mut self, target: Self::Target);

    /// The contents of `target` will not be read again.
    fn discard_contents(&mut self, target: &Self::Target);

    fn clear(&mut self, target: &Self::Target, pass: ClearPass, params: &RenderParams);

    /// Draw the highlight layer into `color`, with depth and stencil in `depth_stencil`.
    fn render_highlight_layer(
        &mut self,
        camera: &HighlightCamera,
        color: &Self::Target,
        depth_stencil: &Self::Target,
        params: &RenderParams,
    );

    /// Full-screen draw of `src` into `dst` with `pass`, which is [`HighlightPass::Blit`]
    /// or [`HighlightPass::Blur`].
    fn blit(
        &mut self,
        src: &Self::Target,
        dst: &Self::Target,
        pass: HighlightPass,
        params: &RenderParams,
    );

    /// Upscale `blurred` into `color` and cut the silhouettes marked in `depth_stencil`
    /// out of it.
    fn cut(
        &mut self,
        blurred: &Self::Target,
        color: &Self::Target,
        depth_stencil: &Self::Target,
        params: &RenderParams,
    );

    /// Copy `src` into `dst` and blend `highlight` over it.
    fn composite(
        &mut self,
        src: &Self::Target,
        highlight: &Self::Target,
        dst: &Self::Target,
        params: &RenderParams,
    );
}
