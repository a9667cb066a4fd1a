//! Blends the visible layers of a stack, the annotation mask and markers into
//! one RGBA raster.
//!
//! Colors are accumulated premultiplied in `f32` and converted to straight
//! 8-bit RGBA at the end. Every pass is row-parallel, and each output pixel
//! depends only on the state passed in, so identical state yields
//! byte-identical rasters.

use image::{Rgba, RgbaImage};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::annotation::AnnotationSnapshot;
use crate::colormap::rgba8;
use crate::config::{MarkerStyle, ViewerConfig};
use crate::enums::{BlendMode, DisplayConvention, Interpolation, ViewDirection};
use crate::error::Result;
use crate::geometry::{SliceTransform, VolumeGeometry};
use crate::interpolator::Interpolator;
use crate::layer::{LayerStack, StackEntry};

/// Everything about the current view except the layers themselves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub view: ViewDirection,
    pub slice_index: usize,
    pub zoom: f32,
    /// Output pixels; positive x moves the image right, positive y down.
    pub pan: [f32; 2],
    pub width: u32,
    pub height: u32,
}

impl ViewState {
    pub fn new(view: ViewDirection, width: u32, height: u32) -> Self {
        Self {
            view,
            slice_index: 0,
            zoom: 1.0,
            pan: [0.0, 0.0],
            width,
            height,
        }
    }
}

type Premultiplied = [f32; 4];

#[derive(Debug, Clone)]
pub struct SliceCompositor {
    convention: DisplayConvention,
    interpolation: Interpolation,
    background: Rgba<f32>,
    annotation_opacity: f32,
    marker_style: MarkerStyle,
    debug_mode: bool,
}

impl SliceCompositor {
    pub fn new(config: &ViewerConfig) -> Self {
        Self {
            convention: config.display_convention,
            interpolation: config.interpolation,
            background: rgba8(config.background),
            annotation_opacity: config.annotation_opacity,
            marker_style: config.marker_style.clone(),
            debug_mode: config.debug_mode,
        }
    }

    pub fn convention(&self) -> DisplayConvention {
        self.convention
    }

    /// Zoom/pan mapping of the view onto the annotation's volume.
    pub fn transform_for(
        &self,
        geometry: &VolumeGeometry,
        state: &ViewState,
    ) -> Result<SliceTransform> {
        let plane = geometry.plane(state.view, self.convention);
        SliceTransform::new(plane, state.width, state.height, state.zoom, state.pan)
    }

    /// Composites `stack` bottom to top, then the annotation mask, then its
    /// markers. A layer or annotation that cannot be drawn at this state is
    /// skipped with a warning.
    pub fn composite(
        &self,
        state: &ViewState,
        stack: &LayerStack,
        annotation: Option<&AnnotationSnapshot>,
    ) -> RgbaImage {
        let start = Instant::now();
        let width = state.width as usize;
        let height = state.height as usize;
        if width == 0 || height == 0 {
            return RgbaImage::new(state.width, state.height);
        }

        let Rgba([r, g, b, a]) = self.background;
        let mut acc: Vec<Premultiplied> = vec![[r * a, g * a, b * a, a]; width * height];

        let mut drawn = 0;
        for entry in stack.entries().iter().filter(|e| e.layer.visible) {
            match entry.layer.extract(state, self.convention, self.interpolation) {
                Ok(values) => {
                    self.blend_layer(&mut acc, width, entry, &values);
                    drawn += 1;
                }
                Err(err) => log::warn!("skipping layer {:?} ({}): {err}", entry.layer.name, entry.id),
            }
        }

        if let Some(annotation) = annotation {
            match self.blend_annotation(&mut acc, width, state, annotation) {
                Ok(()) => self.draw_markers(&mut acc, width, state, annotation),
                Err(err) => log::warn!("skipping annotation: {err}"),
            }
        }

        let raster = to_raster(&acc, state.width, state.height);
        if self.debug_mode {
            log::debug!(
                "composited {drawn} layer(s) into {}x{} {} slice {} in {:?}",
                state.width,
                state.height,
                state.view,
                state.slice_index,
                start.elapsed()
            );
        }
        raster
    }

    fn blend_layer(&self, acc: &mut [Premultiplied], width: usize, entry: &StackEntry, values: &Array2<f32>) {
        let layer = &entry.layer;
        let window = entry.window_override.as_ref();
        let opacity = layer.opacity();
        acc.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
            for (dst, &value) in row.iter_mut().zip(values.row(y).iter()) {
                if value.is_nan() {
                    continue;
                }
                let src = layer.transfer.map_with_window(value, window, opacity);
                blend(dst, src, layer.blend);
            }
        });
    }

    fn blend_annotation(
        &self,
        acc: &mut [Premultiplied],
        width: usize,
        state: &ViewState,
        annotation: &AnnotationSnapshot,
    ) -> Result<()> {
        let mask = annotation.oriented_mask(state.view, state.slice_index, self.convention)?;
        let transform = self.transform_for(annotation.geometry(), state)?;
        let labels = Interpolator::resample_labels(&mask, &transform);
        let opacity = annotation.opacity() * self.annotation_opacity;
        let palette = annotation.palette();
        acc.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
            for (dst, &label) in row.iter_mut().zip(labels.row(y).iter()) {
                if label == 0 {
                    continue;
                }
                let Rgba([r, g, b, a]) = palette.lookup(label as i64);
                blend(dst, Rgba([r, g, b, a * opacity]), BlendMode::Normal);
            }
        });
        Ok(())
    }

    fn draw_markers(
        &self,
        acc: &mut [Premultiplied],
        width: usize,
        state: &ViewState,
        annotation: &AnnotationSnapshot,
    ) {
        let Ok(transform) = self.transform_for(annotation.geometry(), state) else {
            return;
        };
        let style = &self.marker_style;
        let palette = annotation.palette();
        let discs: Vec<(f32, f32, Rgba<f32>)> = annotation
            .markers()
            .iter()
            .filter_map(|marker| {
                let voxel = annotation.geometry().world_to_voxel(marker.position);
                let (x, y, slice) = transform.voxel_to_screen(voxel);
                if slice.round() != state.slice_index as f32 {
                    return None;
                }
                let color = if annotation.selected() == Some(marker.id) {
                    rgba8(style.selected_color)
                } else if palette.contains(marker.label as i64) {
                    palette.lookup(marker.label as i64)
                } else {
                    rgba8(style.fallback_color)
                };
                Some((x, y, color))
            })
            .collect();
        if discs.is_empty() {
            return;
        }

        let r2 = style.radius_px * style.radius_px;
        acc.par_chunks_mut(width).enumerate().for_each(|(py, row)| {
            let cy = py as f32 + 0.5;
            for &(mx, my, color) in &discs {
                if (cy - my).abs() > style.radius_px {
                    continue;
                }
                for (px, dst) in row.iter_mut().enumerate() {
                    let cx = px as f32 + 0.5;
                    if (cx - mx).powi(2) + (cy - my).powi(2) <= r2 {
                        blend(dst, color, BlendMode::Normal);
                    }
                }
            }
        });
    }
}

impl Default for SliceCompositor {
    fn default() -> Self {
        Self::new(&ViewerConfig::default())
    }
}

/// Blends a straight-alpha color into a premultiplied accumulator pixel.
#[inline]
fn blend(dst: &mut Premultiplied, Rgba([r, g, b, a]): Rgba<f32>, mode: BlendMode) {
    if a <= 0.0 {
        return;
    }
    let src = [r * a, g * a, b * a, a];
    match mode {
        BlendMode::Normal => {
            for i in 0..4 {
                dst[i] = src[i] + dst[i] * (1.0 - a);
            }
        }
        BlendMode::Additive => {
            for i in 0..4 {
                dst[i] = (dst[i] + src[i]).min(1.0);
            }
        }
        BlendMode::Max => {
            for i in 0..4 {
                dst[i] = dst[i].max(src[i]);
            }
        }
    }
}

fn to_raster(acc: &[Premultiplied], width: u32, height: u32) -> RgbaImage {
    let bytes: Vec<u8> = acc
        .par_iter()
        .flat_map_iter(|&[r, g, b, a]| {
            let px = if a <= 0.0 {
                [0, 0, 0, 0]
            } else {
                [to_u8(r / a), to_u8(g / a), to_u8(b / a), to_u8(a)]
            };
            px.into_iter()
        })
        .collect();
    RgbaImage::from_raw(width, height, bytes).unwrap_or_else(|| RgbaImage::new(width, height))
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use approx::assert_abs_diff_eq;

    use crate::annotation::AnnotationLayer;
    use crate::colormap::LabelPalette;
    use crate::geometry::Orientation;
    use crate::layer::Layer;
    use crate::transfer::{ColorTransferFunction, Window};
    use crate::volume::VolumeBuffer;

    fn constant_layer(value: f32, dims: [usize; 3]) -> Layer {
        let n = dims.iter().product::<usize>();
        let volume = VolumeBuffer::new(vec![value; n], dims, [1.0; 3], Orientation::LPS).unwrap();
        Layer::new(
            "flat",
            Arc::new(volume),
            ColorTransferFunction::grayscale(Window::new(50.0, 100.0).unwrap()),
        )
    }

    fn state(width: u32, height: u32) -> ViewState {
        ViewState::new(ViewDirection::Axial, width, height)
    }

    fn assert_pixel(actual: Premultiplied, expected: Premultiplied) {
        for (a, e) in actual.iter().zip(expected) {
            assert_abs_diff_eq!(*a, e, epsilon = 1e-6);
        }
    }

    #[test]
    fn blend_modes() {
        let mut dst = [0.2, 0.2, 0.2, 1.0];
        blend(&mut dst, Rgba([1.0, 0.0, 0.0, 0.5]), BlendMode::Normal);
        assert_pixel(dst, [0.6, 0.1, 0.1, 1.0]);

        let mut dst = [0.8, 0.1, 0.0, 0.8];
        blend(&mut dst, Rgba([1.0, 1.0, 0.0, 0.5]), BlendMode::Additive);
        assert_pixel(dst, [1.0, 0.6, 0.0, 1.0]);

        let mut dst = [0.5, 0.1, 0.0, 0.5];
        blend(&mut dst, Rgba([0.2, 0.8, 0.0, 1.0]), BlendMode::Max);
        assert_pixel(dst, [0.5, 0.8, 0.0, 1.0]);
    }

    #[test]
    fn background_fills_empty_stack() {
        let config = ViewerConfig {
            background: [10, 20, 30, 255],
            ..ViewerConfig::default()
        };
        let raster = SliceCompositor::new(&config).composite(&state(3, 2), &LayerStack::new(), None);
        assert_eq!(raster.dimensions(), (3, 2));
        assert!(raster.pixels().all(|p| *p == Rgba([10, 20, 30, 255])));
    }

    #[test]
    fn hidden_layers_are_not_drawn() {
        let mut stack = LayerStack::new();
        let id = stack.push(constant_layer(100.0, [2, 2, 1]));
        stack.get_mut(id).unwrap().visible = false;
        let raster = SliceCompositor::default().composite(&state(2, 2), &stack, None);
        assert!(raster.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn failing_layer_is_skipped() {
        let mut stack = LayerStack::new();
        stack.push(constant_layer(100.0, [2, 2, 3]));
        // only one axial slice, so slice 2 is out of range for this layer
        stack.push(constant_layer(0.0, [2, 2, 1]));
        let mut s = state(2, 2);
        s.slice_index = 2;
        let raster = SliceCompositor::default().composite(&s, &stack, None);
        assert!(raster.pixels().all(|p| *p == Rgba([255, 255, 255, 255])));
    }

    #[test]
    fn annotation_draws_over_layers() {
        let mut stack = LayerStack::new();
        stack.push(constant_layer(0.0, [2, 2, 1]));
        let geometry = stack.entries()[0].layer.volume().geometry().clone();
        let palette = LabelPalette::new().with_label(1, rgba8([255, 0, 0, 255]));
        let mut annotation = AnnotationLayer::new(geometry).with_palette(palette);
        annotation.set_voxel([0, 0, 0], 1).unwrap();

        let raster =
            SliceCompositor::default().composite(&state(2, 2), &stack, Some(&annotation.snapshot()));
        assert_eq!(*raster.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(*raster.get_pixel(1, 0), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn markers_draw_only_on_their_slice() {
        let geometry = VolumeGeometry::new([9, 9, 2], [1.0; 3], Orientation::LPS).unwrap();
        let mut annotation = AnnotationLayer::new(geometry);
        // LPS with origin 0: voxel (4, 4, 1) sits at world (-4, -4, 1)
        let id = annotation.add_marker([-4.0, -4.0, 1.0], 99).unwrap();
        let compositor = SliceCompositor::default();
        let stack = LayerStack::new();

        let mut s = state(9, 9);
        s.slice_index = 1;
        let raster = compositor.composite(&s, &stack, Some(&annotation.snapshot()));
        assert_eq!(*raster.get_pixel(4, 4), Rgba([0, 255, 0, 255]));
        assert_eq!(raster.get_pixel(0, 0).0[3], 0);

        annotation.select_marker(id).unwrap();
        let raster = compositor.composite(&s, &stack, Some(&annotation.snapshot()));
        assert_eq!(*raster.get_pixel(4, 4), Rgba([255, 255, 0, 255]));

        s.slice_index = 0;
        let raster = compositor.composite(&s, &stack, Some(&annotation.snapshot()));
        assert!(raster.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn bilinear_config_never_invents_labels() {
        let volume = VolumeBuffer::new(vec![1.0, 3.0], [2, 1, 1], [1.0; 3], Orientation::LPS).unwrap();
        let palette = LabelPalette::new()
            .with_label(1, rgba8([255, 0, 0, 255]))
            .with_label(2, rgba8([0, 255, 0, 255]))
            .with_label(3, rgba8([0, 0, 255, 255]));
        let mut stack = LayerStack::new();
        stack.push(
            Layer::new("labels", Arc::new(volume), ColorTransferFunction::discrete(palette))
                .with_interpolation(Interpolation::Bilinear),
        );
        let config = ViewerConfig {
            interpolation: Interpolation::Bilinear,
            ..ViewerConfig::default()
        };

        let raster = SliceCompositor::new(&config).composite(&state(8, 4), &stack, None);
        let row: Vec<[u8; 4]> = (0..8).map(|x| raster.get_pixel(x, 2).0).collect();
        assert!(!row.contains(&[0, 255, 0, 255]), "{row:?}");
        assert_eq!(row[..4], [[255, 0, 0, 255]; 4]);
        assert_eq!(row[4..], [[0, 0, 255, 255]; 4]);
    }

    #[test]
    fn zero_sized_output_is_empty() {
        let raster = SliceCompositor::default().composite(&state(0, 4), &LayerStack::new(), None);
        assert_eq!(raster.dimensions(), (0, 4));
    }
}
