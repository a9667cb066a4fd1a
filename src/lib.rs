//! # volume-compositor
//!
//! Rendering core for interactive medical volume viewers. Given one or
//! more co-registered volumes this crate produces a single composited RGBA
//! slice image, and keeps producing it as the user scrolls, zooms, pans,
//! adjusts window/level or opacity, paints or places markers.
//!
//! The pieces, leaf first:
//!  - [`VolumeBuffer`]: an immutable decoded volume with spacing, axis codes
//!    and a cached value range
//!  - [`ColorTransferFunction`]: continuous (window/level through a named
//!    colormap) or discrete (label palette) value to RGBA mapping
//!  - [`Layer`]: a volume with its display parameters; extracts resampled
//!    axial, coronal or sagittal slices
//!  - [`AnnotationLayer`]: a label mask and a list of markers in the same
//!    index space, shared copy-on-write with linked views
//!  - [`SliceCompositor`]: blends the visible layers bottom to top, then the
//!    mask and markers
//!  - [`Viewport`]: view state, layer stack and the pointer gesture state
//!    machine a host GUI drives
//!
//!  The crate does no I/O of its own and never decides when to redraw. It
//!  only computes a frame when asked. With the default `dicom` feature,
//!  [`VolumeLoader`](volume_loader::VolumeLoader) turns an axial DICOM
//!  series into a [`VolumeBuffer`].
//!
//! # Conventions
//!
//!  - Physical coordinates are RAS+. Array axis 0 lies on left/right, 1 on
//!    anterior/posterior, 2 on superior/inferior; the [`Orientation`] codes
//!    say which way each one points.
//!  - Layer stacks are bottom first: entry 0 is drawn first.
//!  - Pan is in output pixels. At zoom 1 the slice fits the output,
//!    aspect-correct and centered; the slice center is always drawn at
//!    `(width / 2 + pan_x, height / 2 + pan_y)`.
//!  - Radiological display by default: axial and coronal views show
//!    patient right on the left of the screen.
//!
//! # Examples
//!
//! ## Compositing a label mask over a CT volume
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use volume_compositor::{
//! #     ColorTransferFunction, LabelPalette, Layer, Orientation, ViewDirection, ViewerConfig,
//! #     Viewport, VolumeBuffer,
//! # };
//! let dims = [64, 64, 32];
//! let n = dims.iter().product::<usize>();
//! let ct = VolumeBuffer::new(vec![0.0; n], dims, [0.8, 0.8, 2.5], Orientation::LPS)
//!     .expect("should have matched dimensions");
//! let labels = VolumeBuffer::new(vec![0.0; n], dims, [0.8, 0.8, 2.5], Orientation::LPS)
//!     .expect("should have matched dimensions");
//!
//! let mut viewport = Viewport::new(ViewerConfig::default(), ViewDirection::Axial, 512, 512)
//!     .expect("should have accepted the default config");
//! viewport.add_layer(Layer::grayscale("ct", Arc::new(ct)));
//! viewport.add_layer(
//!     Layer::new(
//!         "labels",
//!         Arc::new(labels),
//!         ColorTransferFunction::discrete(LabelPalette::segmentation()),
//!     )
//!     .with_opacity(0.5),
//! );
//! viewport.scroll(3);
//! viewport.render().save("slice.png").expect("should have written the image");
//! ```

pub mod annotation;
pub mod colormap;
pub mod compositor;
pub mod config;
pub mod enums;
pub mod error;
pub mod geometry;
mod interpolator;
pub mod layer;
pub mod transfer;
pub mod viewport;
pub mod volume;
#[cfg(feature = "dicom")]
pub mod volume_loader;

pub use annotation::{AnnotationLayer, AnnotationSnapshot, Marker, MarkerId};
pub use colormap::{ColorCurve, ColormapRegistry, LabelPalette};
pub use compositor::{SliceCompositor, ViewState};
pub use config::{MarkerStyle, ViewerConfig};
pub use enums::{AxisCode, BlendMode, DisplayConvention, Interpolation, ViewDirection};
pub use error::{Error, Result};
pub use geometry::{Orientation, SlicePlane, SliceTransform, VolumeGeometry};
pub use layer::{Layer, LayerId, LayerStack, StackEntry};
pub use transfer::{AlphaMode, ColorTransferFunction, Window};
pub use viewport::{CursorReadout, Interaction, RedrawReason, Viewport};
pub use volume::VolumeBuffer;
