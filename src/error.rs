use thiserror::Error;

use crate::annotation::MarkerId;
use crate::enums::ViewDirection;
use crate::layer::LayerId;

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "data length {actual} does not match dimensions {dims:?} with {channels} channel(s) (expected {expected})"
    )]
    ShapeMismatch {
        dims: [usize; 3],
        channels: usize,
        expected: usize,
        actual: usize,
    },

    #[error("voxel index {index:?} is outside volume dimensions {dims:?}")]
    OutOfBounds { index: [isize; 3], dims: [usize; 3] },

    #[error("slice index {index} is outside 0..{extent} for the {view} view")]
    SliceIndexOutOfRange {
        view: ViewDirection,
        index: usize,
        extent: usize,
    },

    #[error("marker {0} not found")]
    MarkerNotFound(MarkerId),

    #[error("voxel spacing must be positive and finite, got {0:?}")]
    InvalidSpacing([f32; 3]),

    #[error("unsupported orientation code {0:?}")]
    InvalidOrientation(String),

    #[error("window width must be positive, got {0}")]
    InvalidWindow(f32),

    #[error("zoom factor must be positive and finite, got {0}")]
    InvalidZoom(f32),

    #[error("invalid colormap: {0}")]
    InvalidColormap(String),

    #[error("channel {channel} is outside 0..{channels}")]
    ChannelOutOfRange { channel: usize, channels: usize },

    #[error("layer {0} not found")]
    LayerNotFound(LayerId),

    #[error("cannot start {requested} while {active} is in progress")]
    GestureInProgress {
        active: &'static str,
        requested: &'static str,
    },

    #[error("no {0} gesture in progress")]
    NoGesture(&'static str),

    #[error("no annotation layer is attached to this viewport")]
    NoAnnotationLayer,

    #[error("physical position {0:?} lies outside the volume")]
    PositionOutOfBounds([f32; 3]),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration parse error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
