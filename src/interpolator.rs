use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::enums::Interpolation;
use crate::geometry::{SliceTransform, display_cell};

pub(crate) struct Interpolator;

impl Interpolator {
    /// Resample a display-oriented slice onto the output raster described by
    /// `transform`. Output pixels that fall outside the slice are NaN.
    pub(crate) fn resample(
        slice: &ArrayView2<'_, f32>,
        transform: &SliceTransform,
        interpolation: Interpolation,
    ) -> Array2<f32> {
        let (slice_height, slice_width) = slice.dim();
        let width = transform.width as usize;
        let height = transform.height as usize;

        let values: Vec<f32> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..width).map(move |x| {
                    let (c, r) = transform.screen_to_display(x as f32 + 0.5, y as f32 + 0.5);
                    let (Some(col), Some(row)) =
                        (display_cell(c, slice_width), display_cell(r, slice_height))
                    else {
                        return f32::NAN;
                    };
                    match interpolation {
                        Interpolation::Nearest => slice[[row, col]],
                        Interpolation::Bilinear => {
                            let c = c.clamp(0.0, (slice_width - 1) as f32);
                            let r = r.clamp(0.0, (slice_height - 1) as f32);
                            Self::bilinear_interpolate(slice, r, c)
                        }
                    }
                })
            })
            .collect();

        Array2::from_shape_vec((height, width), values)
            .unwrap_or_else(|_| Array2::from_elem((height, width), f32::NAN))
    }

    /// Nearest-neighbor resampling of a label slice. Pixels outside the slice
    /// read as label 0.
    pub(crate) fn resample_labels(slice: &ArrayView2<'_, u16>, transform: &SliceTransform) -> Array2<u16> {
        let (slice_height, slice_width) = slice.dim();
        let width = transform.width as usize;
        let height = transform.height as usize;

        let labels: Vec<u16> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..width).map(move |x| {
                    let (c, r) = transform.screen_to_display(x as f32 + 0.5, y as f32 + 0.5);
                    match (display_cell(c, slice_width), display_cell(r, slice_height)) {
                        (Some(col), Some(row)) => slice[[row, col]],
                        _ => 0,
                    }
                })
            })
            .collect();

        Array2::from_shape_vec((height, width), labels)
            .unwrap_or_else(|_| Array2::zeros((height, width)))
    }

    #[inline]
    pub(crate) fn bilinear_interpolate(slice: &ArrayView2<'_, f32>, y: f32, x: f32) -> f32 {
        let (height, width) = slice.dim();

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dy = y - y0 as f32;
        let dx = x - x0 as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let v00 = slice[[y0, x0]];
        let v01 = slice[[y0, x1]];
        let v10 = slice[[y1, x0]];
        let v11 = slice[[y1, x1]];

        let v0 = v00.mul_add(one_minus_dx, v01 * dx);
        let v1 = v10.mul_add(one_minus_dx, v11 * dx);

        v0.mul_add(one_minus_dy, v1 * dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{DisplayConvention, ViewDirection};
    use crate::geometry::{Orientation, VolumeGeometry};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn transform(dims: [usize; 3], width: u32, height: u32, zoom: f32) -> SliceTransform {
        let plane = VolumeGeometry::new(dims, [1.0; 3], Orientation::LPS)
            .unwrap()
            .plane(ViewDirection::Axial, DisplayConvention::Radiological);
        SliceTransform::new(plane, width, height, zoom, [0.0, 0.0]).unwrap()
    }

    #[test]
    fn bilinear_blends_neighbors() {
        let slice = array![[0.0_f32, 10.0], [20.0, 30.0]];
        let view = slice.view();
        assert_abs_diff_eq!(Interpolator::bilinear_interpolate(&view, 0.5, 0.5), 15.0);
        assert_abs_diff_eq!(Interpolator::bilinear_interpolate(&view, 0.0, 1.0), 10.0);
        assert_abs_diff_eq!(Interpolator::bilinear_interpolate(&view, 1.0, 1.0), 30.0);
    }

    #[test]
    fn identity_resample_reproduces_the_slice() {
        let slice = array![[1.0_f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let t = transform([3, 2, 1], 3, 2, 1.0);
        for interpolation in [Interpolation::Nearest, Interpolation::Bilinear] {
            let out = Interpolator::resample(&slice.view(), &t, interpolation);
            assert_eq!(out, slice);
        }
    }

    #[test]
    fn letterboxed_pixels_are_nan() {
        let slice = array![[1.0_f32, 2.0]];
        // 2x1 slice into a 2x3 raster: rows 0 and 2 fall outside at zoom 1
        let t = transform([2, 1, 1], 2, 3, 1.0);
        let out = Interpolator::resample(&slice.view(), &t, Interpolation::Nearest);
        assert_eq!(out.dim(), (3, 2));
        assert!(out[[0, 0]].is_nan());
        assert!(out[[2, 1]].is_nan());
        assert_eq!(out[[1, 0]], 1.0);
        assert_eq!(out[[1, 1]], 2.0);
    }

    #[test]
    fn label_resampling_pads_with_zero() {
        let slice = array![[3_u16, 4]];
        let t = transform([2, 1, 1], 2, 3, 1.0);
        let out = Interpolator::resample_labels(&slice.view(), &t);
        assert_eq!(out, array![[0, 0], [3, 4], [0, 0]]);
    }

    #[test]
    fn nearest_zoom_repeats_voxels() {
        let slice = array![[1.0_f32, 2.0], [3.0, 4.0]];
        let t = transform([2, 2, 1], 4, 4, 1.0);
        let out = Interpolator::resample(&slice.view(), &t, Interpolation::Nearest);
        assert_eq!(
            out,
            array![
                [1.0, 1.0, 2.0, 2.0],
                [1.0, 1.0, 2.0, 2.0],
                [3.0, 3.0, 4.0, 4.0],
                [3.0, 3.0, 4.0, 4.0]
            ]
        );
    }
}
