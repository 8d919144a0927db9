//! Material for drawing highlighted silhouettes on the highlight layer.
//!
//! Outputs the highlighter's flat color with no lighting. Opaque and transparent
//! highlighters share the shader and differ only in alpha mode.

use bevy::{
    mesh::MeshVertexBufferLayoutRef,
    pbr::{MaterialPipeline, MaterialPipelineKey},
    prelude::*,
    render::render_resource::{AsBindGroup, RenderPipelineDescriptor, SpecializedMeshPipelineError},
    shader::ShaderRef,
};

use crate::{components::HighlightingSettings, materials::SilhouetteShader};

#[derive(Asset, TypePath, AsBindGroup, Clone, Debug)]
#[bind_group_data(HighlightSilhouetteKey)]
pub struct HighlightSilhouetteMaterial {
    #[uniform(0)]
    pub color: LinearRgba,
    pub shader: SilhouetteShader,
    /// Slope-scaled depth offset, from the camera's highlighting settings.
    pub offset_factor: f32,
    /// Constant depth offset in depth units, from the camera's highlighting settings.
    pub offset_units: f32,
}

impl Default for HighlightSilhouetteMaterial {
    fn default() -> Self {
        Self {
            color: LinearRgba::WHITE,
            shader: SilhouetteShader::Opaque,
            offset_factor: 0.0,
            offset_units: 0.0,
        }
    }
}

impl HighlightSilhouetteMaterial {
    /// Copy the depth offsets of `settings`.
    pub fn with_offsets(mut self, settings: &HighlightingSettings) -> Self {
        self.offset_factor = settings.offset_factor;
        self.offset_units = settings.offset_units;
        self
    }
}

/// Pipeline key carrying the rasterizer depth bias of a silhouette material.
///
/// Offsets follow the usual convention where negative values pull towards the camera.
/// Bevy uses reverse-Z, so both are negated on the way into the pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct HighlightSilhouetteKey {
    pub constant: i32,
    /// `f32` bits of the slope scale.
    pub slope_scale_bits: u32,
}

impl HighlightSilhouetteKey {
    pub fn slope_scale(&self) -> f32 {
        f32::from_bits(self.slope_scale_bits)
    }
}

impl From<&HighlightSilhouetteMaterial> for HighlightSilhouetteKey {
    fn from(material: &HighlightSilhouetteMaterial) -> Self {
        Self {
            constant: -material.offset_units.round() as i32,
            slope_scale_bits: (-material.offset_factor).to_bits(),
        }
    }
}

impl Material for HighlightSilhouetteMaterial {
    fn fragment_shader() -> ShaderRef {
        SilhouetteShader::Opaque.shader_path().into()
    }

    fn alpha_mode(&self) -> AlphaMode {
        match self.shader {
            SilhouetteShader::Opaque => AlphaMode::Opaque,
            SilhouetteShader::Transparent => AlphaMode::Blend,
        }
    }

    fn depth_bias(&self) -> f32 {
        -self.offset_units
    }

    fn specialize(
        _pipeline: &MaterialPipeline,
        descriptor: &mut RenderPipelineDescriptor,
        _layout: &MeshVertexBufferLayoutRef,
        key: MaterialPipelineKey<Self>,
    ) -> Result<(), SpecializedMeshPipelineError> {
        if let Some(depth_stencil) = descriptor.depth_stencil.as_mut() {
            depth_stencil.bias.constant = key.bind_group_data.constant;
            depth_stencil.bias.slope_scale = key.bind_group_data.slope_scale();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_become_reverse_z_depth_bias() {
        let material = HighlightSilhouetteMaterial::default().with_offsets(&HighlightingSettings {
            offset_factor: -1.5,
            offset_units: -2.0,
            ..Default::default()
        });
        let key = HighlightSilhouetteKey::from(&material);
        assert_eq!(key.constant, 2);
        assert_eq!(key.slope_scale(), 1.5);
        assert_eq!(material.depth_bias(), 2.0);
    }

    #[test]
    fn zero_offsets_leave_depth_untouched() {
        let key = HighlightSilhouetteKey::from(&HighlightSilhouetteMaterial::default());
        assert_eq!(key.constant, 0);
        assert_eq!(key.slope_scale(), 0.0);
    }
}
