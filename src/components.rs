use bevy::{prelude::*, render::extract_component::ExtractComponent};

use crate::error::HighlightingError;

/// Whether a [`Highlighter`] is currently drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Reflect)]
pub enum HighlightMode {
    /// Registered but not drawn.
    #[default]
    Off,
    /// Drawn every frame until switched off.
    ConstantOn,
}

/// Component that makes a mesh entity highlightable.
///
/// The entity is registered with the highlighting system for as long as this component
/// is present. It only glows while its mode is [`HighlightMode::ConstantOn`] and the
/// entity itself is visible.
#[derive(Component, Clone, Copy, Debug, Reflect)]
#[reflect(Component)]
pub struct Highlighter {
    pub mode: HighlightMode,
    /// Tint of the glow.
    pub color: LinearRgba,
    /// Draw the silhouette with alpha blending instead of as an opaque shape.
    pub transparent: bool,
}

impl Default for Highlighter {
    fn default() -> Self {
        Self {
            mode: HighlightMode::Off,
            color: LinearRgba::new(0.0, 1.0, 1.0, 1.0),
            transparent: false,
        }
    }
}

impl Highlighter {
    /// A highlighter that is switched on with the given color.
    pub fn new(color: impl Into<LinearRgba>) -> Self {
        Self {
            mode: HighlightMode::ConstantOn,
            color: color.into(),
            ..Default::default()
        }
    }

    /// Switch the highlight on with the given color.
    pub fn constant_on(&mut self, color: impl Into<LinearRgba>) {
        self.mode = HighlightMode::ConstantOn;
        self.color = color.into();
    }

    /// Switch the highlight off. The entity stays registered.
    pub fn off(&mut self) {
        self.mode = HighlightMode::Off;
    }

    pub fn is_on(&self) -> bool {
        self.mode != HighlightMode::Off
    }
}

/// Resolution divisor applied to the highlight buffer before blurring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Reflect)]
pub enum Downsample {
    None,
    Half,
    #[default]
    Quarter,
}

impl Downsample {
    pub fn factor(self) -> u32 {
        match self {
            Downsample::None => 1,
            Downsample::Half => 2,
            Downsample::Quarter => 4,
        }
    }
}

impl TryFrom<u32> for Downsample {
    type Error = HighlightingError;

    fn try_from(factor: u32) -> Result<Self, Self::Error> {
        match factor {
            1 => Ok(Downsample::None),
            2 => Ok(Downsample::Half),
            4 => Ok(Downsample::Quarter),
            other => Err(HighlightingError::InvalidDownsample(other)),
        }
    }
}

/// Camera component that enables and configures highlight rendering.
///
/// Add this to the camera whose output should receive the glow. Only one camera should
/// carry it at a time.
#[derive(Component, Clone, Copy, Debug, PartialEq, ExtractComponent, Reflect)]
#[reflect(Component)]
pub struct HighlightingSettings {
    /// Whether highlight rendering is enabled.
    pub enabled: bool,
    /// Depth offset factor applied to every silhouette draw.
    pub offset_factor: f32,
    /// Depth offset units applied to every silhouette draw.
    pub offset_units: f32,
    pub downsample: Downsample,
    /// Number of blur passes over the downsampled buffer.
    pub iterations: u32,
    /// Blur spread of the first iteration.
    pub blur_min_spread: f32,
    /// Blur spread added by every further iteration.
    pub blur_spread: f32,
    /// Alpha intensity of the blur.
    pub blur_intensity: f32,
}

impl Default for HighlightingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            offset_factor: 0.0,
            offset_units: 0.0,
            downsample: Downsample::Quarter,
            iterations: 2,
            blur_min_spread: 0.65,
            blur_spread: 0.25,
            blur_intensity: 0.3,
        }
    }
}

impl HighlightingSettings {
    /// Spread of blur iteration `iteration`, counting from zero.
    pub fn blur_offset(&self, iteration: u32) -> f32 {
        self.blur_min_spread + iteration as f32 * self.blur_spread
    }

    /// Set the downsample factor from its integer value.
    pub fn set_downsample_factor(&mut self, factor: u32) -> Result<(), HighlightingError> {
        self.downsample = Downsample::try_from(factor)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsample_accepts_only_powers_up_to_four() {
        assert_eq!(Downsample::try_from(1), Ok(Downsample::None));
        assert_eq!(Downsample::try_from(2), Ok(Downsample::Half));
        assert_eq!(Downsample::try_from(4), Ok(Downsample::Quarter));
        assert_eq!(
            Downsample::try_from(3),
            Err(HighlightingError::InvalidDownsample(3))
        );
        assert_eq!(
            Downsample::try_from(0),
            Err(HighlightingError::InvalidDownsample(0))
        );
    }

    #[test]
    fn invalid_factor_leaves_settings_untouched() {
        let mut settings = HighlightingSettings::default();
        assert!(settings.set_downsample_factor(8).is_err());
        assert_eq!(settings.downsample, Downsample::Quarter);

        settings.set_downsample_factor(2).unwrap();
        assert_eq!(settings.downsample.factor(), 2);
    }

    #[test]
    fn blur_offset_grows_linearly() {
        let settings = HighlightingSettings {
            blur_min_spread: 0.5,
            blur_spread: 0.25,
            ..Default::default()
        };
        assert_eq!(settings.blur_offset(0), 0.5);
        assert_eq!(settings.blur_offset(1), 0.75);
        assert_eq!(settings.blur_offset(4), 1.5);
    }

    #[test]
    fn highlighter_toggles() {
        let mut highlighter = Highlighter::default();
        assert!(!highlighter.is_on());

        highlighter.constant_on(LinearRgba::RED);
        assert!(highlighter.is_on());
        assert_eq!(highlighter.color, LinearRgba::RED);

        highlighter.off();
        assert!(!highlighter.is_on());
    }
}
