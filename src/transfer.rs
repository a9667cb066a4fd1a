use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::colormap::{ColormapRegistry, LabelPalette};
use crate::error::{Error, Result};

const LUT_SIZE: usize = 256;
const TRANSPARENT: Rgba<f32> = Rgba([0.0; 4]);

/// Window/level: the `(center, width)` pair that selects which scalar range
/// spans the color ramp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    center: f32,
    width: f32,
}

impl Window {
    pub fn new(center: f32, width: f32) -> Result<Self> {
        if !center.is_finite() || !width.is_finite() || width <= 0.0 {
            return Err(Error::InvalidWindow(width));
        }
        Ok(Self { center, width })
    }

    /// Window spanning `[min, max]`; a degenerate range gets width 1.
    pub fn from_range(min: f32, max: f32) -> Self {
        let width = max - min;
        if width.is_finite() && width > 0.0 {
            Self {
                center: min + width / 2.0,
                width,
            }
        } else {
            Self {
                center: if min.is_finite() { min } else { 0.0 },
                width: 1.0,
            }
        }
    }

    pub fn center(&self) -> f32 {
        self.center
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn lower(&self) -> f32 {
        self.center - self.width / 2.0
    }

    pub fn upper(&self) -> f32 {
        self.center + self.width / 2.0
    }

    /// Position of `value` on the ramp, clamped to `[0, 1]`.
    pub fn normalize(&self, value: f32) -> f32 {
        ((value - self.lower()) / self.width).clamp(0.0, 1.0)
    }
}

/// Where the alpha of a continuous sample comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlphaMode {
    /// The caller's opacity for every in-range sample.
    #[default]
    Constant,
    /// Opacity scaled by the sample's position inside the window.
    Ramp,
}

/// Scalar → color mapping through a windowed colormap.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousTransfer {
    window: Window,
    colormap: String,
    lut: Vec<[f32; 3]>,
    alpha_mode: AlphaMode,
    clip_below: bool,
    clip_above: bool,
}

impl ContinuousTransfer {
    pub fn window(&self) -> Window {
        self.window
    }

    pub fn set_window(&mut self, window: Window) {
        self.window = window;
    }

    pub fn colormap(&self) -> &str {
        &self.colormap
    }

    pub fn alpha_mode(&self) -> AlphaMode {
        self.alpha_mode
    }

    pub fn map(&self, value: f32, opacity: f32) -> Rgba<f32> {
        self.map_with_window(value, &self.window, opacity)
    }

    /// Maps through `window` instead of the stored one, for interactive
    /// window/level overrides.
    pub fn map_with_window(&self, value: f32, window: &Window, opacity: f32) -> Rgba<f32> {
        if value.is_nan()
            || (self.clip_below && value < window.lower())
            || (self.clip_above && value > window.upper())
        {
            return TRANSPARENT;
        }
        let t = window.normalize(value);
        let index = (t * (self.lut.len() - 1) as f32).round() as usize;
        let [r, g, b] = self.lut[index.min(self.lut.len() - 1)];
        let alpha = match self.alpha_mode {
            AlphaMode::Constant => opacity,
            AlphaMode::Ramp => t * opacity,
        };
        Rgba([r, g, b, alpha.clamp(0.0, 1.0)])
    }
}

/// Label → color mapping for segmentations.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteTransfer {
    palette: LabelPalette,
}

impl DiscreteTransfer {
    pub fn palette(&self) -> &LabelPalette {
        &self.palette
    }

    pub fn palette_mut(&mut self) -> &mut LabelPalette {
        &mut self.palette
    }

    pub fn map(&self, label: i64, opacity: f32) -> Rgba<f32> {
        scale_alpha(self.palette.lookup(label), opacity)
    }

    /// Maps a stored scalar; non-finite values get the unlabeled color.
    pub fn map_value(&self, value: f32, opacity: f32) -> Rgba<f32> {
        match label_of(value) {
            Some(label) => self.map(label, opacity),
            None => scale_alpha(self.palette.unlabeled(), opacity),
        }
    }
}

fn scale_alpha(Rgba([r, g, b, a]): Rgba<f32>, opacity: f32) -> Rgba<f32> {
    Rgba([r, g, b, (a * opacity).clamp(0.0, 1.0)])
}

/// Rounds a stored scalar to a label id. NaN has no label.
pub fn label_of(value: f32) -> Option<i64> {
    value.is_finite().then(|| value.round() as i64)
}

/// A layer's color mapping. Replacing the variant (switching between
/// continuous and discrete) drops the old lookup table with it.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorTransferFunction {
    Continuous(ContinuousTransfer),
    Discrete(DiscreteTransfer),
}

impl ColorTransferFunction {
    pub fn continuous(window: Window, registry: &ColormapRegistry, colormap: &str) -> Self {
        ColorTransferFunction::Continuous(ContinuousTransfer {
            window,
            colormap: colormap.to_lowercase(),
            lut: registry.get(colormap).lut(LUT_SIZE),
            alpha_mode: AlphaMode::Constant,
            clip_below: false,
            clip_above: false,
        })
    }

    pub fn grayscale(window: Window) -> Self {
        Self::continuous(
            window,
            &ColormapRegistry::builtin(),
            ColormapRegistry::GRAYSCALE,
        )
    }

    pub fn discrete(palette: LabelPalette) -> Self {
        ColorTransferFunction::Discrete(DiscreteTransfer { palette })
    }

    /// No effect on discrete mappings.
    pub fn with_alpha_mode(mut self, mode: AlphaMode) -> Self {
        if let ColorTransferFunction::Continuous(c) = &mut self {
            c.alpha_mode = mode;
        }
        self
    }

    /// Makes values below / above the window fully transparent instead of
    /// clamping them to the end colors. No effect on discrete mappings.
    pub fn with_clipping(mut self, below: bool, above: bool) -> Self {
        if let ColorTransferFunction::Continuous(c) = &mut self {
            c.clip_below = below;
            c.clip_above = above;
        }
        self
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, ColorTransferFunction::Continuous(_))
    }

    pub fn window(&self) -> Option<Window> {
        match self {
            ColorTransferFunction::Continuous(c) => Some(c.window),
            ColorTransferFunction::Discrete(_) => None,
        }
    }

    /// Returns false for discrete mappings, which have no window.
    pub fn set_window(&mut self, window: Window) -> bool {
        match self {
            ColorTransferFunction::Continuous(c) => {
                c.set_window(window);
                true
            }
            ColorTransferFunction::Discrete(_) => false,
        }
    }

    pub fn map(&self, value: f32, opacity: f32) -> Rgba<f32> {
        self.map_with_window(value, None, opacity)
    }

    /// `window` shadows the stored window of a continuous mapping and is
    /// ignored by discrete ones.
    pub fn map_with_window(&self, value: f32, window: Option<&Window>, opacity: f32) -> Rgba<f32> {
        match self {
            ColorTransferFunction::Continuous(c) => {
                c.map_with_window(value, window.unwrap_or(&c.window), opacity)
            }
            ColorTransferFunction::Discrete(d) => d.map_value(value, opacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colormap::rgba8;
    use approx::assert_abs_diff_eq;

    fn gray(center: f32, width: f32) -> ColorTransferFunction {
        ColorTransferFunction::grayscale(Window::new(center, width).unwrap())
    }

    #[test]
    fn window_width_must_be_positive() {
        assert!(matches!(Window::new(0.0, 0.0), Err(Error::InvalidWindow(_))));
        assert!(matches!(Window::new(0.0, -5.0), Err(Error::InvalidWindow(_))));
        assert!(Window::new(f32::NAN, 5.0).is_err());
        let w = Window::from_range(3.0, 3.0);
        assert!(w.width() > 0.0);
    }

    #[test]
    fn from_range_round_trips_bounds() {
        let w = Window::from_range(-1000.0, 3000.0);
        assert_abs_diff_eq!(w.center(), 1000.0);
        assert_abs_diff_eq!(w.width(), 4000.0);
        assert_abs_diff_eq!(w.lower(), -1000.0);
        assert_abs_diff_eq!(w.upper(), 3000.0);
    }

    #[test]
    fn continuous_clamps_outside_window() {
        let tf = gray(50.0, 100.0);
        assert_eq!(tf.map(-20.0, 1.0), Rgba([0.0, 0.0, 0.0, 1.0]));
        assert_eq!(tf.map(0.0, 1.0), Rgba([0.0, 0.0, 0.0, 1.0]));
        assert_eq!(tf.map(100.0, 1.0), Rgba([1.0, 1.0, 1.0, 1.0]));
        assert_eq!(tf.map(500.0, 0.25), Rgba([1.0, 1.0, 1.0, 0.25]));
        let mid = tf.map(50.0, 1.0);
        assert_abs_diff_eq!(mid.0[0], 0.5, epsilon = 0.01);
    }

    #[test]
    fn continuous_is_monotonic_inside_window() {
        let tf = gray(0.0, 200.0);
        let mut previous = -1.0;
        for step in 0..=200 {
            let value = -100.0 + step as f32;
            let intensity = tf.map(value, 1.0).0[0];
            assert!(intensity >= previous, "{value} -> {intensity} < {previous}");
            previous = intensity;
        }
    }

    #[test]
    fn clipping_makes_out_of_window_values_transparent() {
        let tf = gray(50.0, 100.0).with_clipping(true, false);
        assert_eq!(tf.map(-1.0, 1.0).0[3], 0.0);
        assert_eq!(tf.map(0.0, 1.0).0[3], 1.0);
        assert_eq!(tf.map(1000.0, 1.0).0[3], 1.0);
        let tf = tf.with_clipping(false, true);
        assert_eq!(tf.map(-1.0, 1.0).0[3], 1.0);
        assert_eq!(tf.map(1000.0, 1.0).0[3], 0.0);
    }

    #[test]
    fn ramp_alpha_follows_window_position() {
        let tf = gray(50.0, 100.0).with_alpha_mode(AlphaMode::Ramp);
        assert_abs_diff_eq!(tf.map(25.0, 0.8).0[3], 0.2);
        assert_abs_diff_eq!(tf.map(-5.0, 0.8).0[3], 0.0);
        assert_abs_diff_eq!(tf.map(100.0, 0.8).0[3], 0.8);
    }

    #[test]
    fn nan_maps_to_transparent() {
        assert_eq!(gray(0.0, 1.0).map(f32::NAN, 1.0), TRANSPARENT);
        let tf = ColorTransferFunction::discrete(LabelPalette::segmentation());
        assert_eq!(tf.map(f32::NAN, 1.0), TRANSPARENT);
    }

    #[test]
    fn window_override_shadows_stored_window() {
        let tf = gray(50.0, 100.0);
        let narrow = Window::new(10.0, 2.0).unwrap();
        assert_eq!(tf.map_with_window(11.0, Some(&narrow), 1.0).0[0], 1.0);
        assert!(tf.map(11.0, 1.0).0[0] < 0.2);
    }

    #[test]
    fn discrete_lookup_is_total_and_scaled_by_opacity() {
        let palette = LabelPalette::new().with_label(2, rgba8([255, 0, 0, 255]));
        let tf = ColorTransferFunction::discrete(palette);
        assert_eq!(tf.map(2.0, 0.5), Rgba([1.0, 0.0, 0.0, 0.5]));
        assert_eq!(tf.map(2.4, 1.0), Rgba([1.0, 0.0, 0.0, 1.0]));
        for value in [0.0, 1.0, 3.0, -7.0, 1e9] {
            assert_eq!(tf.map(value, 1.0), TRANSPARENT);
        }
    }

    #[test]
    fn switching_modes_replaces_the_lookup_table() {
        let mut tf = gray(0.0, 10.0);
        assert!(tf.set_window(Window::new(5.0, 2.0).unwrap()));
        assert_eq!(tf.window().unwrap().center(), 5.0);
        tf = ColorTransferFunction::discrete(LabelPalette::segmentation());
        assert!(!tf.is_continuous());
        assert!(tf.window().is_none());
        assert!(!tf.set_window(Window::new(5.0, 2.0).unwrap()));
    }

    #[test]
    fn unknown_colormap_name_degrades_to_grayscale() {
        let registry = ColormapRegistry::builtin();
        let window = Window::new(0.5, 1.0).unwrap();
        let unknown = ColorTransferFunction::continuous(window, &registry, "does-not-exist");
        let gray = ColorTransferFunction::continuous(window, &registry, "gray");
        assert_eq!(unknown.map(0.3, 1.0), gray.map(0.3, 1.0));
    }
}
