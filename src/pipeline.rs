//! The highlighting driver.
//!
//! Each frame the driver:
//! 1. Draws every registered highlightable that agrees to be drawn into an isolated
//!    highlight buffer, marking its silhouette in a stencil
//! 2. Downsamples that buffer and blurs it with a few ping-pong passes
//! 3. Upscales the blur back into the highlight buffer, cutting the silhouettes out so only
//!    the glow around them remains
//! 4. Composites the highlight buffer over the application's frame

use std::sync::Arc;

use bevy::log::{debug, warn};

use crate::{
    backend::{
        ClearPass, HighlightCamera, HostFrame, RenderBackend, RenderParams, RenderingPath,
        TargetDescriptor, HIGHLIGHT_DEPTH_BITS, MIN_REUSABLE_DEPTH_BITS,
    },
    capability::{check_supported, PlatformCapabilities},
    components::HighlightingSettings,
    error::HighlightingError,
    materials::{HighlightPass, PassMaterials},
    registry::{ActiveDriver, DriverId, HighlightRegistry, Highlightable},
};

/// Drives highlight rendering for one camera.
///
/// `T` is the render target handle of the backend the driver renders through.
pub struct HighlightPipeline<T> {
    id: DriverId,
    settings: HighlightingSettings,
    materials: Arc<PassMaterials>,
    active: ActiveDriver,
    started: bool,
    supported: bool,
    owner_active: bool,
    depth_available: bool,
    highlight_buffer: Option<T>,
}

impl<T> HighlightPipeline<T> {
    pub fn new(
        settings: HighlightingSettings,
        materials: Arc<PassMaterials>,
        active: ActiveDriver,
    ) -> Self {
        Self {
            id: active.allocate(),
            settings,
            materials,
            active,
            started: false,
            supported: false,
            owner_active: true,
            depth_available: true,
            highlight_buffer: None,
        }
    }

    pub fn id(&self) -> DriverId {
        self.id
    }

    pub fn settings(&self) -> &HighlightingSettings {
        &self.settings
    }

    /// Probe the platform and get ready to render.
    ///
    /// An unsupported platform disables this driver for good; later frames pass the
    /// source image through untouched.
    pub fn start(&mut self, caps: &PlatformCapabilities) -> Result<(), HighlightingError> {
        self.started = true;
        if let Err(err) = check_supported(caps, &self.materials) {
            self.supported = false;
            warn!("Highlighting has been disabled: {err}");
            return Err(err);
        }

        self.supported = true;
        self.materials.set_blur_intensity(self.settings.blur_intensity);
        Ok(())
    }

    /// Stop rendering, handing back the highlight buffer if one is still held.
    pub fn stop(&mut self) -> Option<T> {
        self.active.release(self.id);
        self.started = false;
        self.supported = false;
        self.highlight_buffer.take()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// Whether the main frame buffer's depth-stencil was reused on the last frame.
    pub fn is_depth_available(&self) -> bool {
        self.depth_available
    }

    pub fn has_highlight_buffer(&self) -> bool {
        self.highlight_buffer.is_some()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.settings.enabled != enabled {
            debug!(
                "Highlighting: driver {} {}",
                self.id.get(),
                if enabled { "enabled" } else { "disabled" }
            );
            self.settings.enabled = enabled;
        }
    }

    /// Tell the driver whether whatever owns it (usually a camera) is active.
    pub fn set_owner_active(&mut self, active: bool) {
        self.owner_active = active;
    }

    /// Change the blur intensity, updating the shared blur material right away.
    pub fn set_blur_intensity(&mut self, intensity: f32) {
        if self.settings.blur_intensity != intensity {
            self.settings.blur_intensity = intensity;
            if self.supported {
                self.materials.set_blur_intensity(intensity);
            }
        }
    }

    /// Replace all tunables at once.
    pub fn apply_settings(&mut self, settings: &HighlightingSettings) {
        self.settings = HighlightingSettings {
            enabled: self.settings.enabled,
            blur_intensity: self.settings.blur_intensity,
            ..*settings
        };
        self.set_enabled(settings.enabled);
        self.set_blur_intensity(settings.blur_intensity);
    }

    fn is_running(&self) -> bool {
        self.started && self.supported && self.settings.enabled && self.owner_active
    }

    fn frame_params(&self) -> RenderParams {
        RenderParams {
            offset_factor: self.settings.offset_factor,
            offset_units: self.settings.offset_units,
            zwrite: !self.depth_available,
            blur_intensity: self.materials.blur_intensity(),
            blur_offset_scale: 0.0,
        }
    }

    /// Work out the effective MSAA level and whether the frame's depth can be reused,
    /// recording any change in depth availability.
    fn update_depth_availability(&mut self, frame: &HostFrame<'_, T>) -> u32 {
        let mut antialiasing = frame.antialiasing.max(1);
        let mut depth_available = frame
            .frame_buffer
            .is_some_and(|fb| fb.depth_bits >= MIN_REUSABLE_DEPTH_BITS);

        if frame.rendering_path == RenderingPath::Deferred {
            antialiasing = 1;
        } else if antialiasing > 1 {
            // Multisampled depth can't be shared with the highlight buffer
            depth_available = false;
        }

        if depth_available != self.depth_available {
            self.depth_available = depth_available;
            if depth_available {
                warn!("Highlighting: frame buffer depth is available again and will occlude highlighting. Highlighting occluders disabled.");
            } else {
                warn!("Highlighting: frame buffer depth is not available and can't occlude highlighting. Highlighting occluders enabled.");
            }
        }

        antialiasing
    }

    /// Render this frame's glow into the highlight buffer.
    ///
    /// Returns whether a highlight buffer is ready for [`Self::blit_highlighting`].
    pub fn render_highlighting<B, H>(
        &mut self,
        backend: &mut B,
        registry: &mut HighlightRegistry<H>,
        frame: &HostFrame<'_, T>,
    ) -> bool
    where
        B: RenderBackend<Target = T>,
        H: Highlightable,
    {
        // A previous frame may have rendered without compositing
        if let Some(stale) = self.highlight_buffer.take() {
            debug!("Highlighting: releasing highlight buffer left over from the previous frame");
            backend.release_target(stale);
        }

        if !self.is_running() {
            return false;
        }

        let antialiasing = self.update_depth_availability(frame);
        let params = self.frame_params();

        if let Some(other) = self.active.claim(self.id) {
            if other != self.id {
                warn!(
                    "Highlighting: driver {} started rendering while driver {} was still active",
                    self.id.get(),
                    other.get()
                );
            }
        }

        let mut drawn = 0;
        for highlightable in registry.iter_mut() {
            if highlightable.enter_highlight_state(&self.active) {
                drawn += 1;
            }
        }

        if drawn == 0 {
            self.active.release(self.id);
            return false;
        }

        // Reuse the frame's depth-stencil when possible, otherwise bring our own.
        let frame_buffer = frame.frame_buffer.filter(|_| self.depth_available);
        let desc = match frame_buffer {
            Some(fb) => TargetDescriptor {
                width: fb.width,
                height: fb.height,
                depth_bits: 0,
                samples: antialiasing,
            },
            None => TargetDescriptor {
                width: frame.screen_width,
                height: frame.screen_height,
                depth_bits: HIGHLIGHT_DEPTH_BITS,
                samples: antialiasing,
            },
        };
        let buffer = backend.acquire_target(&desc);

        let depth_stencil = match frame_buffer {
            Some(fb) => {
                backend.clear(&buffer, ClearPass::Color, &params);
                if !frame.clear_stencil_after_lighting {
                    backend.clear(fb.target, ClearPass::Stencil, &params);
                }
                fb.target
            }
            None => {
                backend.clear(&buffer, ClearPass::All, &params);
                &buffer
            }
        };

        let camera = HighlightCamera::cloned_from(frame.camera);
        backend.render_highlight_layer(&camera, &buffer, depth_stencil, &params);

        for highlightable in registry.iter_mut() {
            highlightable.exit_highlight_state();
        }
        self.active.release(self.id);

        let factor = self.settings.downsample.factor();
        let working = TargetDescriptor::color(desc.width / factor, desc.height / factor);
        let first = backend.acquire_target(&working);
        let second = backend.acquire_target(&working);

        backend.blit(&buffer, &first, HighlightPass::Blit, &params);

        let (mut src, mut dst) = (&first, &second);
        for iteration in 0..self.settings.iterations {
            let blur = RenderParams {
                blur_offset_scale: self.settings.blur_offset(iteration),
                ..params
            };
            backend.blit(src, dst, HighlightPass::Blur, &blur);
            backend.discard_contents(src);
            std::mem::swap(&mut src, &mut dst);
        }

        backend.cut(src, &buffer, depth_stencil, &params);

        backend.release_target(first);
        backend.release_target(second);

        debug!(
            "Highlighting: rendered {drawn} highlighter(s) into a {}x{} buffer",
            desc.width, desc.height
        );
        self.highlight_buffer = Some(buffer);
        true
    }

    /// Write `src` with this frame's glow on top into `dst`.
    ///
    /// Without a rendered highlight buffer this is a plain copy.
    pub fn blit_highlighting<B: RenderBackend<Target = T>>(
        &mut self,
        backend: &mut B,
        src: &T,
        dst: &T,
    ) {
        let params = self.frame_params();
        match self.highlight_buffer.take() {
            Some(buffer) => {
                backend.composite(src, &buffer, dst, &params);
                backend.release_target(buffer);
            }
            None => backend.blit(src, dst, HighlightPass::Blit, &params),
        }
    }
}
