use thiserror::Error;

/// Reasons a highlighting driver refuses to run.
///
/// Everything here is detected at configuration or start-up time. Problems that come up
/// while rendering a frame are never errors: the frame's effect is skipped instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HighlightingError {
    #[error("offscreen image effects are not supported on this platform")]
    OffscreenEffectsUnsupported,
    #[error("render target textures are not supported on this platform")]
    RenderTargetsUnsupported,
    #[error("render target format {0} is not supported on this platform")]
    FormatUnsupported(&'static str),
    #[error("shader '{0}' is not supported on this platform")]
    ShaderUnsupported(String),
    #[error("invalid downsample factor {0}, expected 1, 2 or 4")]
    InvalidDownsample(u32),
}
