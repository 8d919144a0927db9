//! The fixed set of full-screen passes and silhouette shaders.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

/// Full-screen passes used by the highlighting pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HighlightPass {
    Clear,
    Blit,
    Blur,
    Cut,
    Composite,
}

impl HighlightPass {
    pub const ALL: [HighlightPass; 5] = [
        HighlightPass::Clear,
        HighlightPass::Blit,
        HighlightPass::Blur,
        HighlightPass::Cut,
        HighlightPass::Composite,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HighlightPass::Clear => "Highlighted/Clear",
            HighlightPass::Blit => "Highlighted/Blit",
            HighlightPass::Blur => "Highlighted/Blur",
            HighlightPass::Cut => "Highlighted/Cut",
            HighlightPass::Composite => "Highlighted/Composite",
        }
    }

    pub fn shader_path(self) -> &'static str {
        match self {
            HighlightPass::Clear => "embedded://bevy_highlighting/shaders/clear.wgsl",
            HighlightPass::Blit => "embedded://bevy_highlighting/shaders/blit.wgsl",
            HighlightPass::Blur => "embedded://bevy_highlighting/shaders/blur.wgsl",
            HighlightPass::Cut => "embedded://bevy_highlighting/shaders/cut.wgsl",
            HighlightPass::Composite => "embedded://bevy_highlighting/shaders/composite.wgsl",
        }
    }
}

/// Per-object shaders that draw highlighted silhouettes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SilhouetteShader {
    Opaque,
    Transparent,
}

impl SilhouetteShader {
    pub fn name(self) -> &'static str {
        match self {
            SilhouetteShader::Opaque => "Highlighted/Opaque",
            SilhouetteShader::Transparent => "Highlighted/Transparent",
        }
    }

    pub fn shader_path(self) -> &'static str {
        "embedded://bevy_highlighting/shaders/silhouette.wgsl"
    }
}

/// One loaded pass.
#[derive(Debug)]
pub struct PassMaterial {
    pub pass: HighlightPass,
    pub shader: &'static str,
}

/// Materials for every pass, created once per process.
///
/// The blur material also holds the blur intensity uniform, which every driver shares.
#[derive(Debug)]
pub struct PassMaterials {
    passes: [PassMaterial; 5],
    silhouettes: [SilhouetteShader; 2],
    blur_intensity: AtomicU32,
}

static MATERIALS: OnceLock<Arc<PassMaterials>> = OnceLock::new();

impl PassMaterials {
    /// Load the shared materials, or return them if they already exist.
    pub fn initialize() -> Arc<PassMaterials> {
        MATERIALS
            .get_or_init(|| Arc::new(PassMaterials::load()))
            .clone()
    }

    /// Build a private set of materials not shared with the rest of the process.
    pub fn load() -> PassMaterials {
        PassMaterials {
            passes: HighlightPass::ALL.map(|pass| PassMaterial {
                pass,
                shader: pass.shader_path(),
            }),
            silhouettes: [SilhouetteShader::Opaque, SilhouetteShader::Transparent],
            blur_intensity: AtomicU32::new(0.3f32.to_bits()),
        }
    }

    pub fn pass(&self, pass: HighlightPass) -> &PassMaterial {
        &self.passes[pass as usize]
    }

    pub fn passes(&self) -> impl Iterator<Item = &PassMaterial> {
        self.passes.iter()
    }

    pub fn silhouettes(&self) -> impl Iterator<Item = SilhouetteShader> + '_ {
        self.silhouettes.iter().copied()
    }

    pub fn blur_intensity(&self) -> f32 {
        f32::from_bits(self.blur_intensity.load(Ordering::Relaxed))
    }

    pub fn set_blur_intensity(&self, intensity: f32) {
        self.blur_intensity
            .store(intensity.to_bits(), Ordering::Relaxed);
    }
}
