//! Named color curves for continuous data and label palettes for
//! segmentations.

use std::collections::{BTreeMap, HashMap};

use image::Rgba;

use crate::error::{Error, Result};

/// Piecewise-linear RGB curve over `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorCurve {
    stops: Vec<(f32, [f32; 3])>,
}

impl ColorCurve {
    /// Stops must be non-empty with strictly increasing positions inside `[0, 1]`.
    pub fn new(stops: Vec<(f32, [f32; 3])>) -> Result<Self> {
        if stops.is_empty() {
            return Err(Error::InvalidColormap("a curve needs at least one stop".into()));
        }
        if stops
            .iter()
            .any(|(t, rgb)| !(0.0..=1.0).contains(t) || rgb.iter().any(|c| !(0.0..=1.0).contains(c)))
        {
            return Err(Error::InvalidColormap(
                "stop positions and colors must lie in [0, 1]".into(),
            ));
        }
        if stops.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(Error::InvalidColormap(
                "stop positions must be strictly increasing".into(),
            ));
        }
        Ok(Self { stops })
    }

    /// Evenly spaced stops.
    pub fn uniform(colors: &[[f32; 3]]) -> Result<Self> {
        let last = colors.len().saturating_sub(1).max(1) as f32;
        Self::new(
            colors
                .iter()
                .enumerate()
                .map(|(i, rgb)| (i as f32 / last, *rgb))
                .collect(),
        )
    }

    pub fn sample(&self, t: f32) -> [f32; 3] {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let first = self.stops[0];
        if t <= first.0 {
            return first.1;
        }
        for pair in self.stops.windows(2) {
            let (t0, c0) = pair[0];
            let (t1, c1) = pair[1];
            if t <= t1 {
                let f = (t - t0) / (t1 - t0);
                return std::array::from_fn(|i| c0[i] + (c1[i] - c0[i]) * f);
            }
        }
        self.stops[self.stops.len() - 1].1
    }

    /// `n` evenly spaced samples, the lookup table continuous transfer functions use.
    pub fn lut(&self, n: usize) -> Vec<[f32; 3]> {
        let last = n.saturating_sub(1).max(1) as f32;
        (0..n).map(|i| self.sample(i as f32 / last)).collect()
    }
}

/// Immutable name → curve table. Built once and handed by reference to
/// whoever creates transfer functions. Unknown names resolve to grayscale.
#[derive(Debug, Clone)]
pub struct ColormapRegistry {
    curves: HashMap<String, ColorCurve>,
    fallback: ColorCurve,
}

impl ColormapRegistry {
    pub const GRAYSCALE: &'static str = "gray";

    /// Registry with grayscale, sequential (viridis, inferno, hot) and
    /// diverging (coolwarm) curves.
    pub fn builtin() -> Self {
        let gray = ColorCurve {
            stops: vec![(0.0, [0.0; 3]), (1.0, [1.0; 3])],
        };
        let viridis = ColorCurve {
            stops: vec![
                (0.0, [0.267, 0.005, 0.329]),
                (0.25, [0.229, 0.322, 0.546]),
                (0.5, [0.128, 0.567, 0.551]),
                (0.75, [0.369, 0.789, 0.383]),
                (1.0, [0.993, 0.906, 0.144]),
            ],
        };
        let inferno = ColorCurve {
            stops: vec![
                (0.0, [0.001, 0.000, 0.014]),
                (0.25, [0.342, 0.062, 0.429]),
                (0.5, [0.735, 0.216, 0.330]),
                (0.75, [0.978, 0.557, 0.035]),
                (1.0, [0.988, 0.998, 0.645]),
            ],
        };
        let hot = ColorCurve {
            stops: vec![
                (0.0, [0.0, 0.0, 0.0]),
                (0.375, [1.0, 0.0, 0.0]),
                (0.75, [1.0, 1.0, 0.0]),
                (1.0, [1.0, 1.0, 1.0]),
            ],
        };
        let coolwarm = ColorCurve {
            stops: vec![
                (0.0, [0.230, 0.299, 0.754]),
                (0.5, [0.865, 0.865, 0.865]),
                (1.0, [0.706, 0.016, 0.150]),
            ],
        };

        let mut curves = HashMap::new();
        curves.insert("grayscale".to_string(), gray.clone());
        curves.insert("cet-l1".to_string(), gray.clone());
        curves.insert(Self::GRAYSCALE.to_string(), gray.clone());
        curves.insert("viridis".to_string(), viridis);
        curves.insert("inferno".to_string(), inferno);
        curves.insert("hot".to_string(), hot);
        curves.insert("coolwarm".to_string(), coolwarm);
        Self {
            curves,
            fallback: gray,
        }
    }

    /// Adds or replaces a curve. Names are case-insensitive.
    pub fn with_curve(mut self, name: &str, curve: ColorCurve) -> Self {
        self.curves.insert(name.to_lowercase(), curve);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.curves.contains_key(&name.to_lowercase())
    }

    pub fn get(&self, name: &str) -> &ColorCurve {
        match self.curves.get(&name.to_lowercase()) {
            Some(curve) => curve,
            None => {
                log::debug!("unknown colormap {name:?}, using grayscale");
                &self.fallback
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.curves.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ColormapRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Label → color table. Lookups are total: anything not in the table,
/// including label 0, gets the `unlabeled` color.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPalette {
    colors: BTreeMap<i64, Rgba<f32>>,
    unlabeled: Rgba<f32>,
}

impl LabelPalette {
    pub fn new() -> Self {
        Self {
            colors: BTreeMap::new(),
            unlabeled: Rgba([0.0; 4]),
        }
    }

    /// Labels 1..=7 in green, blue, red, yellow, purple, orange and cyan.
    pub fn segmentation() -> Self {
        const COLORS: [[u8; 3]; 7] = [
            [0, 128, 0],
            [0, 0, 255],
            [255, 0, 0],
            [255, 255, 0],
            [128, 0, 128],
            [255, 165, 0],
            [0, 255, 255],
        ];
        COLORS
            .iter()
            .enumerate()
            .fold(Self::new(), |palette, (i, [r, g, b])| {
                palette.with_label(i as i64 + 1, rgba8([*r, *g, *b, 255]))
            })
    }

    pub fn with_label(mut self, label: i64, color: Rgba<f32>) -> Self {
        self.colors.insert(label, color);
        self
    }

    pub fn with_unlabeled(mut self, color: Rgba<f32>) -> Self {
        self.unlabeled = color;
        self
    }

    pub fn set(&mut self, label: i64, color: Rgba<f32>) {
        self.colors.insert(label, color);
    }

    pub fn remove(&mut self, label: i64) -> Option<Rgba<f32>> {
        self.colors.remove(&label)
    }

    pub fn contains(&self, label: i64) -> bool {
        self.colors.contains_key(&label)
    }

    pub fn unlabeled(&self) -> Rgba<f32> {
        self.unlabeled
    }

    pub fn lookup(&self, label: i64) -> Rgba<f32> {
        self.colors.get(&label).copied().unwrap_or(self.unlabeled)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

impl Default for LabelPalette {
    fn default() -> Self {
        Self::segmentation()
    }
}

/// 8-bit RGBA to the normalised float color used throughout the crate.
pub fn rgba8(c: [u8; 4]) -> Rgba<f32> {
    Rgba(c.map(|v| v as f32 / 255.0))
}
