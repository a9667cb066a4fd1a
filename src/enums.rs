use std::fmt;

use serde::{Deserialize, Serialize};

/// The three orthogonal view directions a viewport can display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewDirection {
    Axial,
    Coronal,
    Sagittal,
}

impl ViewDirection {
    /// Index of the voxel axis that is held fixed by this view (x = 0, y = 1, z = 2).
    pub fn slice_axis(self) -> usize {
        match self {
            ViewDirection::Axial => 2,
            ViewDirection::Coronal => 1,
            ViewDirection::Sagittal => 0,
        }
    }

    /// Voxel axes shown along the display columns and rows.
    pub fn plane_axes(self) -> (usize, usize) {
        match self {
            ViewDirection::Axial => (0, 1),
            ViewDirection::Coronal => (0, 2),
            ViewDirection::Sagittal => (1, 2),
        }
    }

    /// Anatomical direction labels clockwise from the top of the screen, for
    /// the radiological display convention.
    pub fn direction_labels(self) -> [char; 4] {
        match self {
            ViewDirection::Axial => ['A', 'L', 'P', 'R'],
            ViewDirection::Coronal => ['S', 'L', 'I', 'R'],
            ViewDirection::Sagittal => ['S', 'P', 'I', 'A'],
        }
    }
}

impl fmt::Display for ViewDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViewDirection::Axial => "axial",
            ViewDirection::Coronal => "coronal",
            ViewDirection::Sagittal => "sagittal",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    #[default]
    Nearest,
    Bilinear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendMode {
    /// Porter-Duff "over".
    #[default]
    Normal,
    Additive,
    Max,
}

/// How patient left/right is laid out on screen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayConvention {
    /// Patient right on the left of the screen.
    #[default]
    Radiological,
    /// Patient left on the left of the screen.
    Neurological,
}

/// Anatomical direction that increasing voxel index points toward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisCode {
    R,
    L,
    A,
    P,
    S,
    I,
}

impl AxisCode {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'R' => Some(AxisCode::R),
            'L' => Some(AxisCode::L),
            'A' => Some(AxisCode::A),
            'P' => Some(AxisCode::P),
            'S' => Some(AxisCode::S),
            'I' => Some(AxisCode::I),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            AxisCode::R => 'R',
            AxisCode::L => 'L',
            AxisCode::A => 'A',
            AxisCode::P => 'P',
            AxisCode::S => 'S',
            AxisCode::I => 'I',
        }
    }

    /// +1 when the code points along the RAS+ world axis, -1 otherwise.
    pub fn sign(self) -> f32 {
        match self {
            AxisCode::R | AxisCode::A | AxisCode::S => 1.0,
            AxisCode::L | AxisCode::P | AxisCode::I => -1.0,
        }
    }

    /// World axis (0 = x, 1 = y, 2 = z) this code lies on.
    pub fn world_axis(self) -> usize {
        match self {
            AxisCode::R | AxisCode::L => 0,
            AxisCode::A | AxisCode::P => 1,
            AxisCode::S | AxisCode::I => 2,
        }
    }
}

#[cfg(feature = "dicom")]
#[derive(Default)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}
