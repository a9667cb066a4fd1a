use std::sync::OnceLock;

use ndarray::{Array3, Array4, ArrayView2, Axis, s};
use rayon::prelude::*;

use crate::enums::{DisplayConvention, ViewDirection};
use crate::error::{Error, Result};
use crate::geometry::{Orientation, VolumeGeometry};

/// An immutable, already-decoded volume.
///
/// Voxels are stored as `(nz, ny, nx, channels)`, i.e. a flat input array is
/// read with x varying fastest and channels interleaved per voxel. The value
/// range is computed on first access and cached; a new buffer replaces an old
/// one instead of being edited in place, so the cache can never go stale.
#[derive(Debug)]
pub struct VolumeBuffer {
    data: Array4<f32>,
    geometry: VolumeGeometry,
    range: OnceLock<(f32, f32)>,
}

impl VolumeBuffer {
    /// Single-channel volume from a flat array of `nx * ny * nz` values.
    pub fn new(
        data: Vec<f32>,
        dims: [usize; 3],
        spacing: [f32; 3],
        orientation: Orientation,
    ) -> Result<Self> {
        Self::with_channels(data, dims, 1, spacing, orientation)
    }

    pub fn with_channels(
        data: Vec<f32>,
        dims: [usize; 3],
        channels: usize,
        spacing: [f32; 3],
        orientation: Orientation,
    ) -> Result<Self> {
        let geometry = VolumeGeometry::new(dims, spacing, orientation)?;
        Self::from_flat(data, geometry, channels)
    }

    /// Volume with an explicit physical placement.
    pub fn from_flat(data: Vec<f32>, geometry: VolumeGeometry, channels: usize) -> Result<Self> {
        let [nx, ny, nz] = geometry.dims;
        let actual = data.len();
        let expected = [nx, ny, nz, channels]
            .into_iter()
            .try_fold(1_usize, usize::checked_mul);
        let expected = match expected {
            Some(expected) if expected == actual && expected != 0 => expected,
            _ => {
                return Err(Error::ShapeMismatch {
                    dims: geometry.dims,
                    channels,
                    expected: expected.unwrap_or(usize::MAX),
                    actual,
                });
            }
        };
        let data = Array4::from_shape_vec((nz, ny, nx, channels), data).map_err(|_| {
            Error::ShapeMismatch {
                dims: geometry.dims,
                channels,
                expected,
                actual,
            }
        })?;
        Ok(Self {
            data,
            geometry,
            range: OnceLock::new(),
        })
    }

    /// Single-channel volume from an array shaped `(depth, height, width)`,
    /// the layout slice-stacking loaders produce.
    pub fn from_array(
        data: Array3<f32>,
        spacing: [f32; 3],
        orientation: Orientation,
    ) -> Result<Self> {
        let (nz, ny, nx) = data.dim();
        let geometry = VolumeGeometry::new([nx, ny, nz], spacing, orientation)?;
        if data.is_empty() {
            return Err(Error::ShapeMismatch {
                dims: geometry.dims,
                channels: 1,
                expected: 0,
                actual: 0,
            });
        }
        Ok(Self {
            data: data.insert_axis(Axis(3)),
            geometry,
            range: OnceLock::new(),
        })
    }

    pub fn with_origin(mut self, origin: [f32; 3]) -> Self {
        self.geometry.origin = origin;
        self
    }

    /// (nx, ny, nz)
    pub fn dims(&self) -> [usize; 3] {
        self.geometry.dims
    }

    pub fn channels(&self) -> usize {
        self.data.dim().3
    }

    pub fn spacing(&self) -> [f32; 3] {
        self.geometry.spacing
    }

    pub fn orientation(&self) -> Orientation {
        self.geometry.orientation
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// Nearest-neighbor read of channel 0.
    pub fn sample(&self, ix: isize, iy: isize, iz: isize) -> Result<f32> {
        self.sample_channel(ix, iy, iz, 0)
    }

    pub fn sample_channel(&self, ix: isize, iy: isize, iz: isize, channel: usize) -> Result<f32> {
        let [x, y, z] = self.geometry.check_index([ix, iy, iz])?;
        self.check_channel(channel)?;
        Ok(self.data[[z, y, x, channel]])
    }

    /// Cached `(min, max)` over all finite values of all channels.
    pub fn value_range(&self) -> (f32, f32) {
        *self.range.get_or_init(|| self.compute_range())
    }

    fn compute_range(&self) -> (f32, f32) {
        let (min, max) = self
            .data
            .par_iter()
            .filter(|v| v.is_finite())
            .fold(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |(lo, hi), &v| (lo.min(v), hi.max(v)),
            )
            .reduce(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |a, b| (a.0.min(b.0), a.1.max(b.1)),
            );
        if min > max { (0.0, 0.0) } else { (min, max) }
    }

    fn check_channel(&self, channel: usize) -> Result<()> {
        let channels = self.channels();
        if channel >= channels {
            return Err(Error::ChannelOutOfRange { channel, channels });
        }
        Ok(())
    }

    /// Cross-section at `index` along `view`, laid out for display: rows top
    /// to bottom, columns left to right, following `convention`.
    pub fn oriented_slice(
        &self,
        view: ViewDirection,
        index: usize,
        channel: usize,
        convention: DisplayConvention,
    ) -> Result<ArrayView2<'_, f32>> {
        self.geometry.check_slice(view, index)?;
        self.check_channel(channel)?;
        // every native cross-section comes out as (v, u)
        let mut slice = match view {
            ViewDirection::Axial => self.data.slice(s![index, .., .., channel]),
            ViewDirection::Coronal => self.data.slice(s![.., index, .., channel]),
            ViewDirection::Sagittal => self.data.slice(s![.., .., index, channel]),
        };
        let plane = self.geometry.plane(view, convention);
        if plane.flip_v {
            slice.invert_axis(Axis(0));
        }
        if plane.flip_u {
            slice.invert_axis(Axis(1));
        }
        Ok(slice)
    }
}
