//! Voxel, physical and screen coordinate spaces.
//!
//! Physical coordinates are RAS+ (x toward patient Right, y toward Anterior,
//! z toward Superior) in the volume's spacing units. Screen coordinates are
//! continuous output-pixel positions with the origin at the top-left corner,
//! so the center of pixel `(i, j)` is `(i + 0.5, j + 0.5)`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::enums::{AxisCode, DisplayConvention, ViewDirection};
use crate::error::{Error, Result};

/// Axis codes of the three array axes, e.g. `RAS` or `LPS`.
///
/// Array axis 0 must lie on the left/right axis, 1 on anterior/posterior and
/// 2 on superior/inferior. Permuted acquisitions have to be canonicalised by
/// the loader first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Orientation([AxisCode; 3]);

impl Orientation {
    pub const RAS: Orientation = Orientation([AxisCode::R, AxisCode::A, AxisCode::S]);
    pub const LPS: Orientation = Orientation([AxisCode::L, AxisCode::P, AxisCode::S]);

    pub fn new(codes: [AxisCode; 3]) -> Result<Self> {
        if codes
            .iter()
            .enumerate()
            .any(|(axis, code)| code.world_axis() != axis)
        {
            let text: String = codes.iter().map(|c| c.as_char()).collect();
            return Err(Error::InvalidOrientation(text));
        }
        Ok(Self(codes))
    }

    pub fn codes(&self) -> [AxisCode; 3] {
        self.0
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Orientation::RAS
    }
}

impl FromStr for Orientation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let codes: Vec<AxisCode> = s.chars().filter_map(AxisCode::from_char).collect();
        if codes.len() != 3 || s.chars().count() != 3 {
            return Err(Error::InvalidOrientation(s.to_string()));
        }
        Orientation::new([codes[0], codes[1], codes[2]])
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for code in self.0 {
            write!(f, "{}", code.as_char())?;
        }
        Ok(())
    }
}

/// Index space of a volume and its placement in physical space.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeGeometry {
    /// (nx, ny, nz)
    pub dims: [usize; 3],
    pub spacing: [f32; 3],
    pub orientation: Orientation,
    /// Physical position of voxel (0, 0, 0).
    pub origin: [f32; 3],
}

impl VolumeGeometry {
    pub fn new(dims: [usize; 3], spacing: [f32; 3], orientation: Orientation) -> Result<Self> {
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(Error::InvalidSpacing(spacing));
        }
        Ok(Self {
            dims,
            spacing,
            orientation,
            origin: [0.0; 3],
        })
    }

    pub fn with_origin(mut self, origin: [f32; 3]) -> Self {
        self.origin = origin;
        self
    }

    pub fn contains(&self, index: [isize; 3]) -> bool {
        index
            .iter()
            .zip(self.dims.iter())
            .all(|(&i, &n)| i >= 0 && (i as usize) < n)
    }

    pub fn check_index(&self, index: [isize; 3]) -> Result<[usize; 3]> {
        if !self.contains(index) {
            return Err(Error::OutOfBounds {
                index,
                dims: self.dims,
            });
        }
        Ok([index[0] as usize, index[1] as usize, index[2] as usize])
    }

    pub fn voxel_to_world(&self, ijk: [f32; 3]) -> [f32; 3] {
        let codes = self.orientation.codes();
        std::array::from_fn(|axis| {
            self.origin[axis] + codes[axis].sign() * ijk[axis] * self.spacing[axis]
        })
    }

    pub fn world_to_voxel(&self, xyz: [f32; 3]) -> [f32; 3] {
        let codes = self.orientation.codes();
        std::array::from_fn(|axis| {
            (xyz[axis] - self.origin[axis]) * codes[axis].sign() / self.spacing[axis]
        })
    }

    /// Nearest voxel to a physical position, if it lies inside the volume.
    pub fn world_to_index(&self, xyz: [f32; 3]) -> Option<[usize; 3]> {
        let ijk = self.world_to_voxel(xyz);
        let index = ijk.map(|v| v.round() as isize);
        self.contains(index)
            .then(|| [index[0] as usize, index[1] as usize, index[2] as usize])
    }

    pub fn slice_extent(&self, view: ViewDirection) -> usize {
        self.dims[view.slice_axis()]
    }

    pub fn check_slice(&self, view: ViewDirection, index: usize) -> Result<()> {
        let extent = self.slice_extent(view);
        if index >= extent {
            return Err(Error::SliceIndexOutOfRange {
                view,
                index,
                extent,
            });
        }
        Ok(())
    }

    /// Display layout of the cross-sections this volume yields for `view`.
    pub fn plane(&self, view: ViewDirection, convention: DisplayConvention) -> SlicePlane {
        let codes = self.orientation.codes();
        let (u_axis, v_axis) = view.plane_axes();
        // Columns run toward patient left (radiological) or right (neurological);
        // sagittal columns run anterior to posterior.
        let flip_u = match view {
            ViewDirection::Axial | ViewDirection::Coronal => match convention {
                DisplayConvention::Radiological => codes[0] == AxisCode::R,
                DisplayConvention::Neurological => codes[0] == AxisCode::L,
            },
            ViewDirection::Sagittal => codes[1] == AxisCode::A,
        };
        // Rows run top to bottom: anterior to posterior for axial, superior to
        // inferior otherwise.
        let flip_v = match view {
            ViewDirection::Axial => codes[1] == AxisCode::A,
            ViewDirection::Coronal | ViewDirection::Sagittal => codes[2] == AxisCode::S,
        };
        SlicePlane {
            view,
            u_axis,
            v_axis,
            flip_u,
            flip_v,
            n_u: self.dims[u_axis],
            n_v: self.dims[v_axis],
            sp_u: self.spacing[u_axis],
            sp_v: self.spacing[v_axis],
        }
    }
}

/// Maps a display-oriented cross-section back onto voxel axes.
///
/// Display coordinates `(c, r)` are continuous column/row positions in the
/// oriented slice; integer values are voxel centers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlicePlane {
    pub view: ViewDirection,
    pub u_axis: usize,
    pub v_axis: usize,
    pub flip_u: bool,
    pub flip_v: bool,
    pub n_u: usize,
    pub n_v: usize,
    pub sp_u: f32,
    pub sp_v: f32,
}

impl SlicePlane {
    pub fn display_to_voxel(&self, c: f32, r: f32, slice: f32) -> [f32; 3] {
        let mut voxel = [0.0; 3];
        voxel[self.u_axis] = if self.flip_u {
            (self.n_u as f32 - 1.0) - c
        } else {
            c
        };
        voxel[self.v_axis] = if self.flip_v {
            (self.n_v as f32 - 1.0) - r
        } else {
            r
        };
        voxel[self.view.slice_axis()] = slice;
        voxel
    }

    /// Inverse of [`display_to_voxel`](Self::display_to_voxel): `(c, r, slice)`.
    pub fn voxel_to_display(&self, voxel: [f32; 3]) -> (f32, f32, f32) {
        let u = voxel[self.u_axis];
        let v = voxel[self.v_axis];
        let c = if self.flip_u {
            (self.n_u as f32 - 1.0) - u
        } else {
            u
        };
        let r = if self.flip_v {
            (self.n_v as f32 - 1.0) - v
        } else {
            v
        };
        (c, r, voxel[self.view.slice_axis()])
    }
}

/// Zoom and pan mapping between output pixels and a [`SlicePlane`].
///
/// At zoom 1 the whole slice fits the output, aspect-correct for anisotropic
/// spacing, centered. The slice center is always drawn at
/// `(width / 2 + pan_x, height / 2 + pan_y)`; pan is in output pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SliceTransform {
    pub plane: SlicePlane,
    pub width: u32,
    pub height: u32,
    pub pan: [f32; 2],
    scale: f32,
}

impl SliceTransform {
    pub fn new(plane: SlicePlane, width: u32, height: u32, zoom: f32, pan: [f32; 2]) -> Result<Self> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(Error::InvalidZoom(zoom));
        }
        let fit_u = width as f32 / (plane.n_u as f32 * plane.sp_u);
        let fit_v = height as f32 / (plane.n_v as f32 * plane.sp_v);
        let scale = (fit_u.min(fit_v) * zoom).max(f32::MIN_POSITIVE);
        Ok(Self {
            plane,
            width,
            height,
            pan,
            scale,
        })
    }

    /// Output pixels per physical unit.
    pub fn pixels_per_unit(&self) -> f32 {
        self.scale
    }

    pub fn screen_to_display(&self, x: f32, y: f32) -> (f32, f32) {
        let p = &self.plane;
        let c = (x - self.width as f32 / 2.0 - self.pan[0]) / (self.scale * p.sp_u)
            + p.n_u as f32 / 2.0
            - 0.5;
        let r = (y - self.height as f32 / 2.0 - self.pan[1]) / (self.scale * p.sp_v)
            + p.n_v as f32 / 2.0
            - 0.5;
        (c, r)
    }

    pub fn display_to_screen(&self, c: f32, r: f32) -> (f32, f32) {
        let p = &self.plane;
        let x = (c + 0.5 - p.n_u as f32 / 2.0) * self.scale * p.sp_u
            + self.width as f32 / 2.0
            + self.pan[0];
        let y = (r + 0.5 - p.n_v as f32 / 2.0) * self.scale * p.sp_v
            + self.height as f32 / 2.0
            + self.pan[1];
        (x, y)
    }

    pub fn screen_to_voxel(&self, x: f32, y: f32, slice_index: usize) -> [f32; 3] {
        let (c, r) = self.screen_to_display(x, y);
        self.plane.display_to_voxel(c, r, slice_index as f32)
    }

    /// In-plane voxel drawn at screen position `(x, y)`, with `slice_index`
    /// on the slice axis. Uses the same cell rule as resampling, so a pixel
    /// resolves to a voxel exactly when it is drawn.
    pub fn screen_to_index(&self, x: f32, y: f32, slice_index: usize) -> Option<[usize; 3]> {
        let (c, r) = self.screen_to_display(x, y);
        let col = display_cell(c, self.plane.n_u)?;
        let row = display_cell(r, self.plane.n_v)?;
        let voxel = self
            .plane
            .display_to_voxel(col as f32, row as f32, slice_index as f32);
        Some(voxel.map(|v| v as usize))
    }

    /// Screen position of a voxel coordinate plus its position along the slice axis.
    pub fn voxel_to_screen(&self, voxel: [f32; 3]) -> (f32, f32, f32) {
        let (c, r, slice) = self.plane.voxel_to_display(voxel);
        let (x, y) = self.display_to_screen(c, r);
        (x, y, slice)
    }
}

/// Display cell holding continuous coordinate `coord` along an axis of
/// `len` voxels. Cell `i` covers `[i - 0.5, i + 0.5)`.
#[inline]
pub(crate) fn display_cell(coord: f32, len: usize) -> Option<usize> {
    let cell = (coord + 0.5).floor();
    (cell >= 0.0 && cell < len as f32).then_some(cell as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn geometry(dims: [usize; 3], orientation: &str) -> VolumeGeometry {
        VolumeGeometry::new(dims, [1.0, 1.0, 1.0], orientation.parse().unwrap()).unwrap()
    }

    #[test]
    fn orientation_parsing_rejects_permuted_codes() {
        assert_eq!("ras".parse::<Orientation>().unwrap(), Orientation::RAS);
        assert_eq!("LPS".parse::<Orientation>().unwrap(), Orientation::LPS);
        assert!(matches!(
            "ASR".parse::<Orientation>(),
            Err(Error::InvalidOrientation(_))
        ));
        assert!(matches!(
            "RA".parse::<Orientation>(),
            Err(Error::InvalidOrientation(_))
        ));
    }

    #[test]
    fn non_positive_spacing_is_rejected() {
        let err = VolumeGeometry::new([2, 2, 2], [1.0, 0.0, 1.0], Orientation::RAS).unwrap_err();
        assert!(matches!(err, Error::InvalidSpacing(_)));
    }

    #[test]
    fn voxel_world_round_trip_respects_axis_codes() {
        let geom = VolumeGeometry::new([10, 10, 10], [0.5, 2.0, 3.0], Orientation::LPS)
            .unwrap()
            .with_origin([10.0, 20.0, -5.0]);
        let world = geom.voxel_to_world([2.0, 1.0, 3.0]);
        assert_abs_diff_eq!(world[0], 9.0);
        assert_abs_diff_eq!(world[1], 18.0);
        assert_abs_diff_eq!(world[2], 4.0);
        let back = geom.world_to_voxel(world);
        for (a, b) in back.iter().zip([2.0, 1.0, 3.0]) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-5);
        }
        assert_eq!(geom.world_to_index(world), Some([2, 1, 3]));
        assert_eq!(geom.world_to_index([100.0, 0.0, 0.0]), None);
    }

    #[test]
    fn radiological_axial_puts_patient_right_on_screen_left() {
        let plane = geometry([4, 3, 2], "RAS").plane(ViewDirection::Axial, DisplayConvention::Radiological);
        // column 0 is the rightmost voxel, row 0 the most anterior one
        assert_eq!(plane.display_to_voxel(0.0, 0.0, 1.0), [3.0, 2.0, 1.0]);
        let plane = geometry([4, 3, 2], "LPS").plane(ViewDirection::Axial, DisplayConvention::Radiological);
        assert_eq!(plane.display_to_voxel(0.0, 0.0, 1.0), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn neurological_convention_mirrors_left_right() {
        let geom = geometry([4, 3, 2], "RAS");
        let radio = geom.plane(ViewDirection::Coronal, DisplayConvention::Radiological);
        let neuro = geom.plane(ViewDirection::Coronal, DisplayConvention::Neurological);
        assert_ne!(radio.flip_u, neuro.flip_u);
        assert_eq!(radio.flip_v, neuro.flip_v);
        let sag_radio = geom.plane(ViewDirection::Sagittal, DisplayConvention::Radiological);
        let sag_neuro = geom.plane(ViewDirection::Sagittal, DisplayConvention::Neurological);
        assert_eq!(sag_radio, sag_neuro);
    }

    #[test]
    fn display_voxel_round_trip() {
        let geom = geometry([5, 6, 7], "RPI");
        for view in [ViewDirection::Axial, ViewDirection::Coronal, ViewDirection::Sagittal] {
            let plane = geom.plane(view, DisplayConvention::Radiological);
            let voxel = plane.display_to_voxel(1.0, 2.0, 3.0);
            assert_eq!(plane.voxel_to_display(voxel), (1.0, 2.0, 3.0));
        }
    }

    #[test]
    fn zoom_keeps_the_slice_center_fixed() {
        let plane = geometry([5, 5, 1], "LPS").plane(ViewDirection::Axial, DisplayConvention::Radiological);
        for zoom in [1.0, 2.0, 3.5] {
            let t = SliceTransform::new(plane, 10, 10, zoom, [0.0, 0.0]).unwrap();
            let (x, y, slice) = t.voxel_to_screen([2.0, 2.0, 0.0]);
            assert_abs_diff_eq!(x, 5.0);
            assert_abs_diff_eq!(y, 5.0);
            assert_abs_diff_eq!(slice, 0.0);
        }
        let zoomed = SliceTransform::new(plane, 10, 10, 2.0, [0.0, 0.0]).unwrap();
        assert_abs_diff_eq!(zoomed.pixels_per_unit(), 4.0);
    }

    #[test]
    fn pan_shifts_in_output_pixels() {
        let plane = geometry([5, 5, 1], "LPS").plane(ViewDirection::Axial, DisplayConvention::Radiological);
        let t = SliceTransform::new(plane, 10, 10, 1.0, [3.0, -2.0]).unwrap();
        let (x, y, _) = t.voxel_to_screen([2.0, 2.0, 0.0]);
        assert_abs_diff_eq!(x, 8.0);
        assert_abs_diff_eq!(y, 3.0);
        let voxel = t.screen_to_voxel(8.0, 3.0, 0);
        assert_abs_diff_eq!(voxel[0], 2.0);
        assert_abs_diff_eq!(voxel[1], 2.0);
    }

    #[test]
    fn half_pixel_pan_resolves_edge_pixels_like_rendering() {
        for orientation in ["RAS", "LPS"] {
            let plane = geometry([4, 4, 4], orientation).plane(ViewDirection::Axial, DisplayConvention::Radiological);
            // pixel centers land on display columns -0.5, 0.5, 1.5, 2.5
            let t = SliceTransform::new(plane, 4, 4, 1.0, [0.5, 0.0]).unwrap();
            let mut columns: Vec<usize> = (0..4)
                .map(|px| t.screen_to_index(px as f32 + 0.5, 1.5, 2).unwrap()[0])
                .collect();
            columns.sort_unstable();
            assert_eq!(columns, vec![0, 1, 2, 3], "{orientation}");

            // columns 0.5 .. 3.5: the last pixel center sits past the slice edge
            let t = SliceTransform::new(plane, 4, 4, 1.0, [-0.5, 0.0]).unwrap();
            assert!(t.screen_to_index(3.5, 1.5, 2).is_none(), "{orientation}");
            assert!(t.screen_to_index(0.5, 1.5, 2).is_some(), "{orientation}");
        }
    }

    #[test]
    fn display_cells_are_half_open() {
        assert_eq!(display_cell(-0.5, 4), Some(0));
        assert_eq!(display_cell(-0.51, 4), None);
        assert_eq!(display_cell(0.49, 4), Some(0));
        assert_eq!(display_cell(0.5, 4), Some(1));
        assert_eq!(display_cell(3.49, 4), Some(3));
        assert_eq!(display_cell(3.5, 4), None);
        assert_eq!(display_cell(f32::NAN, 4), None);
    }

    #[test]
    fn anisotropic_spacing_fits_physical_extent() {
        let geom = VolumeGeometry::new([10, 5, 1], [1.0, 2.0, 1.0], Orientation::LPS).unwrap();
        let plane = geom.plane(ViewDirection::Axial, DisplayConvention::Radiological);
        let t = SliceTransform::new(plane, 20, 20, 1.0, [0.0, 0.0]).unwrap();
        // both in-plane extents are 10 units, so 2 pixels per unit
        assert_abs_diff_eq!(t.pixels_per_unit(), 2.0);
        let (x0, y0, _) = t.voxel_to_screen([0.0, 0.0, 0.0]);
        assert_abs_diff_eq!(x0, 1.0);
        assert_abs_diff_eq!(y0, 2.0);
    }

    #[test]
    fn invalid_zoom_is_rejected() {
        let plane = geometry([2, 2, 2], "RAS").plane(ViewDirection::Axial, DisplayConvention::Radiological);
        assert!(matches!(
            SliceTransform::new(plane, 4, 4, 0.0, [0.0, 0.0]),
            Err(Error::InvalidZoom(_))
        ));
        assert!(SliceTransform::new(plane, 4, 4, f32::NAN, [0.0, 0.0]).is_err());
    }
}
