use crate::{
    enums::{AxisCode, SortBy},
    error::Error,
    geometry::Orientation,
    volume::VolumeBuffer,
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("Only axial series are supported, got image orientation {0:?}")]
    NotAxial(Vec<f32>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error(transparent)]
    Volume(#[from] Error),
}

/// One decoded image plus what is needed to place it in the stack.
struct DecodedSlice {
    order: Option<f32>,
    /// ImagePositionPatient, LPS.
    position: Option<[f32; 3]>,
    image: Array2<f32>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from DICOM objects
    ///
    /// Pixel values go through the modality LUT (rescale slope/intercept)
    /// but not through any VOI LUT, so windowing stays up to the layer's
    /// transfer function. Axis codes and origin come from
    /// ImageOrientationPatient and ImagePositionPatient.
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found, dimensions are inconsistent,
    /// spacing is missing or the series is not axial.
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<VolumeBuffer, VolumeLoaderError> {
        let mut slices: Vec<_> = dicom_objects
            .iter()
            .filter_map(|dicom_object| Self::decode_slice(dicom_object, &sort_by))
            .collect();

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::sort_slices(&mut slices, &sort_by);
        Self::validate_dimensions(&slices)?;

        let datasets: Vec<&InMemDicomObject> = dicom_objects.iter().map(|object| &**object).collect();
        let [row_code, column_code] = Self::in_plane_codes(&datasets)?;
        let (slice_code, origin) = Self::placement(&slices);
        let orientation = Orientation::new([row_code, column_code, slice_code])?;
        let spacing = Self::get_spacing(&datasets, &slices).ok_or(VolumeLoaderError::MissingSpacing)?;

        let volume_array = Self::build_volume_array(&slices);
        let (depth, height, width) = volume_array.dim();
        log::info!(
            "loaded {depth} slices of {width}x{height} ({orientation}, spacing {spacing:?})"
        );

        Ok(VolumeBuffer::from_array(volume_array, spacing, orientation)?.with_origin(origin))
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<VolumeBuffer, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<VolumeBuffer, VolumeLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        log::info!("reading {} files from {}", paths.len(), path.as_ref().display());
        Self::load_from_file_paths(&paths, sort_by)
    }

    fn decode_slice(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<DecodedSlice> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let image = Self::decode_image(dicom_object)?;
        Some(DecodedSlice {
            order,
            position: Self::position(dicom_object),
            image,
        })
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => Some(Some(Self::position(dicom_object)?[2])),
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    fn position(dicom_object: &InMemDicomObject) -> Option<[f32; 3]> {
        let pos = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float32()
            .ok()?;
        (pos.len() == 3).then(|| [pos[0], pos[1], pos[2]])
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<f32>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn sort_slices(slices: &mut [DecodedSlice], sort_by: &SortBy) {
        if !matches!(sort_by, SortBy::None) {
            slices.sort_by(|a, b| a.order.partial_cmp(&b.order).unwrap_or(std::cmp::Ordering::Equal));
        }
    }

    fn validate_dimensions(slices: &[DecodedSlice]) -> Result<(), VolumeLoaderError> {
        let first_dim = slices[0].image.dim();
        if slices.iter().any(|slice| slice.image.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    /// Axis codes of the column and row directions. DICOM patient space is
    /// LPS, so a cosine of +1 along x points Left.
    fn in_plane_codes(
        dicom_objects: &[&InMemDicomObject],
    ) -> Result<[AxisCode; 2], VolumeLoaderError> {
        let cosines = dicom_objects.iter().find_map(|dicom_object| {
            dicom_object
                .element(tags::IMAGE_ORIENTATION_PATIENT)
                .ok()?
                .to_multi_float32()
                .ok()
                .filter(|c| c.len() == 6)
        });
        let Some(cosines) = cosines else {
            log::warn!("no ImageOrientationPatient, assuming LPS rows and columns");
            return Ok([AxisCode::L, AxisCode::P]);
        };

        let dominant = |v: &[f32]| {
            let (axis, value) = v
                .iter()
                .enumerate()
                .fold((0, 0.0_f32), |best, (i, &c)| if c.abs() > best.1.abs() { (i, c) } else { best });
            (axis, value >= 0.0)
        };
        match (dominant(&cosines[..3]), dominant(&cosines[3..])) {
            ((0, toward_left), (1, toward_posterior)) => Ok([
                if toward_left { AxisCode::L } else { AxisCode::R },
                if toward_posterior { AxisCode::P } else { AxisCode::A },
            ]),
            _ => Err(VolumeLoaderError::NotAxial(cosines)),
        }
    }

    /// Slice-axis code and RAS origin, from the positions of the first and
    /// last slice in stack order.
    fn placement(slices: &[DecodedSlice]) -> (AxisCode, [f32; 3]) {
        let (Some(first), Some(last)) = (slices[0].position, slices[slices.len() - 1].position) else {
            log::warn!("no ImagePositionPatient, placing the volume at the origin");
            return (AxisCode::S, [0.0; 3]);
        };
        let code = if last[2] < first[2] { AxisCode::I } else { AxisCode::S };
        (code, [-first[0], -first[1], first[2]])
    }

    /// (x, y, z) spacing. In-plane from PixelSpacing (row spacing first),
    /// through-plane from slice positions, else SliceThickness.
    fn get_spacing(
        dicom_objects: &[&InMemDicomObject],
        slices: &[DecodedSlice],
    ) -> Option<[f32; 3]> {
        let pixel_spacing = dicom_objects.iter().find_map(|dicom_object| {
            dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float32()
                .ok()
                .filter(|s| s.len() == 2)
        })?;

        let from_positions = match (slices[0].position, slices[slices.len() - 1].position) {
            (Some(first), Some(last)) if slices.len() > 1 => {
                Some((last[2] - first[2]).abs() / (slices.len() - 1) as f32).filter(|s| *s > 0.0)
            }
            _ => None,
        };
        let slice_spacing = from_positions.or_else(|| {
            dicom_objects.iter().find_map(|dicom_object| {
                dicom_object
                    .element(tags::SLICE_THICKNESS)
                    .ok()?
                    .to_float32()
                    .ok()
            })
        })?;

        Some([pixel_spacing[1], pixel_spacing[0], slice_spacing])
    }

    fn build_volume_array(slices: &[DecodedSlice]) -> Array3<f32> {
        let (height, width) = slices[0].image.dim();
        let depth = slices.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.image);
        }

        volume
    }
}
