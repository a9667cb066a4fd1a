//! Viewer configuration, validated once when a [`Viewport`](crate::viewport::Viewport)
//! is constructed.

use serde::{Deserialize, Serialize};

use crate::enums::{DisplayConvention, Interpolation};
use crate::error::{Error, Result};

/// How markers are drawn on top of the composited slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerStyle {
    /// Disc radius in output pixels.
    pub radius_px: f32,
    /// Used when a marker's label has no palette entry.
    pub fallback_color: [u8; 4],
    pub selected_color: [u8; 4],
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            radius_px: 4.0,
            fallback_color: [0, 255, 0, 255],
            selected_color: [255, 255, 0, 255],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub display_convention: DisplayConvention,
    /// Emits per-frame compositing timings at debug level.
    pub debug_mode: bool,
    /// Color behind the bottom layer. Transparent by default.
    pub background: [u8; 4],
    /// In-plane resampling for continuous layers that do not set their own,
    /// applied on every composite. Label layers are always resampled nearest.
    pub interpolation: Interpolation,
    pub annotation_opacity: f32,
    pub marker_style: MarkerStyle,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            display_convention: DisplayConvention::Radiological,
            debug_mode: false,
            background: [0, 0, 0, 0],
            interpolation: Interpolation::Nearest,
            annotation_opacity: 1.0,
            marker_style: MarkerStyle::default(),
        }
    }
}

impl ViewerConfig {
    /// Parse and validate a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ViewerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.annotation_opacity) {
            return Err(Error::InvalidConfig(format!(
                "annotation_opacity must be within [0, 1], got {}",
                self.annotation_opacity
            )));
        }
        let radius = self.marker_style.radius_px;
        if !radius.is_finite() || radius <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "marker radius must be positive, got {radius}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ViewerConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config =
            ViewerConfig::from_json(r#"{ "display_convention": "Neurological", "debug_mode": true }"#)
                .unwrap();
        assert_eq!(config.display_convention, DisplayConvention::Neurological);
        assert!(config.debug_mode);
        assert_eq!(config.marker_style, MarkerStyle::default());
        assert_eq!(config.annotation_opacity, 1.0);
    }

    #[test]
    fn out_of_range_opacity_is_rejected() {
        let err = ViewerConfig::from_json(r#"{ "annotation_opacity": 1.5 }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = ViewerConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
