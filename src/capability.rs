//! Platform capability probe.

use std::collections::HashSet;

use crate::{error::HighlightingError, materials::PassMaterials};

/// What the host renderer can do, as far as highlighting cares.
#[derive(Clone, Debug, Default)]
pub struct PlatformCapabilities {
    /// Rendered images can be sampled by a later full-screen pass.
    pub offscreen_effects: bool,
    /// Offscreen color and depth-stencil targets can be created.
    pub render_targets: bool,
    /// 32-bit RGBA render targets are available.
    pub rgba32_render_target: bool,
    /// Names of shaders that failed to compile or load.
    pub unsupported_shaders: HashSet<String>,
}

impl PlatformCapabilities {
    /// Capabilities of a platform that supports everything.
    pub fn full() -> Self {
        Self {
            offscreen_effects: true,
            render_targets: true,
            rgba32_render_target: true,
            unsupported_shaders: HashSet::new(),
        }
    }

    pub fn supports_shader(&self, name: &str) -> bool {
        !self.unsupported_shaders.contains(name)
    }
}

/// Check that everything the pipeline needs is available.
///
/// The first missing capability is returned as the error. Shader support is only as good
/// as what the host puts in [`PlatformCapabilities::unsupported_shaders`]; the Bevy host
/// only reports pass shaders.
pub fn check_supported(
    caps: &PlatformCapabilities,
    materials: &PassMaterials,
) -> Result<(), HighlightingError> {
    if !caps.offscreen_effects {
        return Err(HighlightingError::OffscreenEffectsUnsupported);
    }
    if !caps.render_targets {
        return Err(HighlightingError::RenderTargetsUnsupported);
    }
    if !caps.rgba32_render_target {
        return Err(HighlightingError::FormatUnsupported("RGBA32"));
    }

    for silhouette in materials.silhouettes() {
        if !caps.supports_shader(silhouette.name()) {
            return Err(HighlightingError::ShaderUnsupported(
                silhouette.name().to_string(),
            ));
        }
    }

    for material in materials.passes() {
        let name = material.pass.name();
        if !caps.supports_shader(name) {
            return Err(HighlightingError::ShaderUnsupported(name.to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::{HighlightPass, SilhouetteShader};

    #[test]
    fn full_platform_is_supported() {
        let materials = PassMaterials::load();
        assert_eq!(
            check_supported(&PlatformCapabilities::full(), &materials),
            Ok(())
        );
    }

    #[test]
    fn reports_first_missing_capability() {
        let materials = PassMaterials::load();

        let caps = PlatformCapabilities {
            render_targets: false,
            rgba32_render_target: false,
            ..PlatformCapabilities::full()
        };
        assert_eq!(
            check_supported(&caps, &materials),
            Err(HighlightingError::RenderTargetsUnsupported)
        );

        let caps = PlatformCapabilities {
            offscreen_effects: false,
            ..PlatformCapabilities::full()
        };
        assert_eq!(
            check_supported(&caps, &materials),
            Err(HighlightingError::OffscreenEffectsUnsupported)
        );

        let caps = PlatformCapabilities {
            rgba32_render_target: false,
            ..PlatformCapabilities::full()
        };
        assert_eq!(
            check_supported(&caps, &materials),
            Err(HighlightingError::FormatUnsupported("RGBA32"))
        );
    }

    #[test]
    fn silhouette_shaders_are_checked_before_passes() {
        let materials = PassMaterials::load();
        let mut caps = PlatformCapabilities::full();
        caps.unsupported_shaders
            .insert(HighlightPass::Cut.name().to_string());
        caps.unsupported_shaders
            .insert(SilhouetteShader::Transparent.name().to_string());

        assert_eq!(
            check_supported(&caps, &materials),
            Err(HighlightingError::ShaderUnsupported(
                "Highlighted/Transparent".to_string()
            ))
        );

        caps.unsupported_shaders
            .remove(SilhouetteShader::Transparent.name());
        assert_eq!(
            check_supported(&caps, &materials),
            Err(HighlightingError::ShaderUnsupported(
                "Highlighted/Cut".to_string()
            ))
        );
    }
}
